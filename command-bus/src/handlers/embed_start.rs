use std::sync::Arc;

use async_trait::async_trait;
use common::{
    error::AppError,
    utils::embedding::{EmbeddingBackend, EmbeddingProvider, DEFAULT_HASHED_DIMENSION},
};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use super::{parse_args, ServerContext};
use crate::{
    commands::{EmbedStartArgs, EmbedStarted},
    dispatcher::CommandHandler,
};

/// Contents of `embed-<name>.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbedConfiguration {
    #[serde(default)]
    pub embed_model: Option<String>,
    #[serde(default)]
    pub embed_backend: Option<String>,
    #[serde(default)]
    pub embed_dimension: Option<usize>,
}

impl EmbedConfiguration {
    async fn load_provider(&self, embed_name: &str) -> Result<EmbeddingProvider, AppError> {
        let backend = match self.embed_backend.as_deref() {
            Some(label) => label.parse::<EmbeddingBackend>()?,
            None => EmbeddingBackend::default(),
        };
        let provider = match backend {
            EmbeddingBackend::Hashed => EmbeddingProvider::new_hashed(
                self.embed_dimension.unwrap_or(DEFAULT_HASHED_DIMENSION),
            )?,
            EmbeddingBackend::FastEmbed => {
                let model = self
                    .embed_model
                    .clone()
                    .filter(|m| !m.trim().is_empty())
                    .ok_or_else(|| {
                        AppError::Validation(format!(
                            "Embed configuration '{embed_name}' does not name an embed_model."
                        ))
                    })?;
                EmbeddingProvider::new_fastembed(Some(model))
                    .await
                    .map_err(|e| AppError::Embedding(e.to_string()))?
            }
        };
        Ok(provider)
    }
}

/// `embed_start`: loads the named model once and keeps it in the session cache.
pub struct EmbedStartHandler {
    context: Arc<ServerContext>,
}

impl EmbedStartHandler {
    pub fn new(context: Arc<ServerContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl CommandHandler for EmbedStartHandler {
    async fn execute(&self, args: Value) -> Result<Value, AppError> {
        let args: EmbedStartArgs = parse_args(args)?;
        let embed_name = args.embed_name;

        let (provider, already_started) = self
            .context
            .start_embed_model(&embed_name, || async {
                let raw = self
                    .context
                    .read_agent_config("embed", "Embed", &embed_name)
                    .await?;
                let configuration: EmbedConfiguration = serde_json::from_value(raw)?;
                configuration.load_provider(&embed_name).await
            })
            .await?;
        if !already_started {
            info!(
                embed_name = %embed_name,
                backend = provider.backend_label(),
                dimension = provider.dimension(),
                "embedding model started"
            );
        }

        let started = EmbedStarted {
            embed_name,
            backend: provider.backend_label().to_string(),
            dimension: provider.dimension(),
            already_started,
        };
        Ok(serde_json::to_value(started)?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::handlers::test_support::write_agent_file;

    #[tokio::test]
    async fn starts_once_and_reuses_the_cached_model() {
        let dir = tempfile::tempdir().unwrap();
        write_agent_file(
            dir.path(),
            "embed-mini.json",
            &json!({"embed_name": "mini", "embed_backend": "hashed", "embed_dimension": 8}),
        );
        let context = Arc::new(ServerContext::new(dir.path()));
        let handler = EmbedStartHandler::new(Arc::clone(&context));

        let first: EmbedStarted =
            serde_json::from_value(handler.execute(json!({"embed_name": "mini"})).await.unwrap())
                .unwrap();
        let second: EmbedStarted =
            serde_json::from_value(handler.execute(json!({"embed_name": "mini"})).await.unwrap())
                .unwrap();

        assert_eq!(first.dimension, 8);
        assert_eq!(first.backend, "hashed");
        assert!(!first.already_started);
        assert!(second.already_started);
        assert!(context.embed_model("mini").await.is_some());
    }

    #[tokio::test]
    async fn concurrent_first_starts_load_the_model_once() {
        let dir = tempfile::tempdir().unwrap();
        write_agent_file(
            dir.path(),
            "embed-mini.json",
            &json!({"embed_backend": "hashed", "embed_dimension": 8}),
        );
        let context = Arc::new(ServerContext::new(dir.path()));
        let handler = Arc::new(EmbedStartHandler::new(Arc::clone(&context)));

        let starts = (0..8).map(|_| {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move { handler.execute(json!({"embed_name": "mini"})).await })
        });
        let mut fresh_starts = 0;
        for start in starts.collect::<Vec<_>>() {
            let started: EmbedStarted =
                serde_json::from_value(start.await.unwrap().unwrap()).unwrap();
            assert_eq!(started.dimension, 8);
            if !started.already_started {
                fresh_starts += 1;
            }
        }
        assert_eq!(fresh_starts, 1);
    }

    #[tokio::test]
    async fn failed_start_can_be_retried() {
        let dir = tempfile::tempdir().unwrap();
        let context = Arc::new(ServerContext::new(dir.path()));
        let handler = EmbedStartHandler::new(Arc::clone(&context));

        let err = handler
            .execute(json!({"embed_name": "late"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        write_agent_file(
            dir.path(),
            "embed-late.json",
            &json!({"embed_backend": "hashed", "embed_dimension": 4}),
        );
        let started: EmbedStarted =
            serde_json::from_value(handler.execute(json!({"embed_name": "late"})).await.unwrap())
                .unwrap();
        assert!(!started.already_started);
        assert_eq!(started.dimension, 4);
    }

    #[tokio::test]
    async fn fastembed_requires_a_model_name() {
        let dir = tempfile::tempdir().unwrap();
        write_agent_file(dir.path(), "embed-empty.json", &json!({"embed_name": "empty"}));
        let handler = EmbedStartHandler::new(Arc::new(ServerContext::new(dir.path())));

        let err = handler
            .execute(json!({"embed_name": "empty"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("embed_model"));
    }

    #[tokio::test]
    async fn invalid_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let handler = EmbedStartHandler::new(Arc::new(ServerContext::new(dir.path())));

        let err = handler
            .execute(json!({"embed_name": "bad name"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
