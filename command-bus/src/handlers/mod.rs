//! Server-side handlers for the configuration and embedding commands.

pub mod embed_embedding;
pub mod embed_start;
pub mod extract_load;
pub mod rag_load;

use std::{
    collections::HashMap,
    future::Future,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use common::{error::AppError, utils::embedding::EmbeddingProvider, utils::names::is_valid_name};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{OnceCell, RwLock};

use crate::{
    commands::{EmbedEmbedding, EmbedStart, ExtractLoad, RagLoad, RemoteCommand},
    dispatcher::HandlerRegistry,
};

/// State shared by every handler of one dispatcher process.
pub struct ServerContext {
    data_dir: PathBuf,
    embed_models: RwLock<HashMap<String, Arc<OnceCell<Arc<EmbeddingProvider>>>>>,
}

impl ServerContext {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            embed_models: RwLock::new(HashMap::new()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directory holding the `rag-`, `extract-` and `embed-` configuration files.
    pub fn agent_dir(&self) -> PathBuf {
        self.data_dir.join(".agent")
    }

    pub async fn embed_model(&self, embed_name: &str) -> Option<Arc<EmbeddingProvider>> {
        self.embed_models
            .read()
            .await
            .get(embed_name)
            .and_then(|cell| cell.get().cloned())
    }

    /// Returns the model started under `embed_name`, running `load` if there is
    /// none yet. Concurrent first calls for one name share a single load. The
    /// flag is true when the model had already been started by someone else.
    pub async fn start_embed_model<F, Fut>(
        &self,
        embed_name: &str,
        load: F,
    ) -> Result<(Arc<EmbeddingProvider>, bool), AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<EmbeddingProvider, AppError>>,
    {
        let cell = {
            let mut models = self.embed_models.write().await;
            Arc::clone(models.entry(embed_name.to_string()).or_default())
        };

        let loaded_here = AtomicBool::new(false);
        let provider = cell
            .get_or_try_init(|| {
                loaded_here.store(true, Ordering::Relaxed);
                async move { load().await.map(Arc::new) }
            })
            .await?;
        Ok((Arc::clone(provider), !loaded_here.load(Ordering::Relaxed)))
    }

    /// Reads `<data_dir>/.agent/<kind>-<name>.json`.
    pub async fn read_agent_config(&self, kind: &str, label: &str, name: &str) -> Result<Value, AppError> {
        ensure_name(label, name)?;
        let path = self.agent_dir().join(format!("{kind}-{name}.json"));
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(AppError::NotFound(format!(
                "Specified {label} configuration '{name}' not found on server at '{}'.",
                path.display()
            )));
        }
        let raw = tokio::fs::read(&path).await?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

/// Registers the built-in server commands.
pub fn default_registry(context: Arc<ServerContext>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry
        .register(
            RagLoad::MODE,
            RagLoad::CMD,
            Arc::new(rag_load::RagLoadHandler::new(Arc::clone(&context))),
        )
        .register(
            ExtractLoad::MODE,
            ExtractLoad::CMD,
            Arc::new(extract_load::ExtractLoadHandler::new(Arc::clone(&context))),
        )
        .register(
            EmbedStart::MODE,
            EmbedStart::CMD,
            Arc::new(embed_start::EmbedStartHandler::new(Arc::clone(&context))),
        )
        .register(
            EmbedEmbedding::MODE,
            EmbedEmbedding::CMD,
            Arc::new(embed_embedding::EmbedEmbeddingHandler::new(context)),
        );
    registry
}

pub(crate) fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, AppError> {
    serde_json::from_value(args).map_err(|e| AppError::Validation(format!("invalid arguments: {e}")))
}

pub(crate) fn ensure_name(label: &str, name: &str) -> Result<(), AppError> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "{label} name can only contain alphanumeric characters, underscores, and hyphens."
        )))
    }
}
