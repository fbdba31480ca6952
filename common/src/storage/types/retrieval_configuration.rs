use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::AppError, storage::vector_store::VectorStoreParams};

/// A named retrieval (RAG) configuration as stored in `rag-<name>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfiguration {
    #[serde(default)]
    pub rag_name: String,
    /// Storage backend tag, e.g. `vector_surreal`.
    #[serde(default)]
    pub rag_type: String,
    /// Name of the embedding configuration to start.
    #[serde(default)]
    pub embed: Option<String>,
    /// Extraction configuration names, processed in order.
    #[serde(default)]
    pub extract: Vec<String>,
    #[serde(default)]
    pub vector_store_host: Option<String>,
    #[serde(default)]
    pub vector_store_port: Option<u16>,
    #[serde(default)]
    pub vector_store_dbname: Option<String>,
    #[serde(default)]
    pub vector_store_user: Option<String>,
    #[serde(default)]
    pub vector_store_pass: Option<String>,
    #[serde(default)]
    pub vector_store_timeout: Option<u64>,
}

impl RetrievalConfiguration {
    /// Decodes a configuration payload and checks that it names at least one
    /// extraction configuration.
    pub fn from_value(rag_name: &str, value: Value) -> Result<Self, AppError> {
        let extract_is_name_list = value
            .get("extract")
            .and_then(Value::as_array)
            .is_some_and(|names| names.iter().all(Value::is_string));
        if !extract_is_name_list {
            return Err(no_extract_names(rag_name));
        }

        let mut config: Self = serde_json::from_value(value).map_err(|e| {
            AppError::Validation(format!("RAG configuration '{rag_name}' is invalid: {e}"))
        })?;
        if config.rag_name.is_empty() {
            config.rag_name = rag_name.to_string();
        }
        if config.extract.iter().all(|name| name.trim().is_empty()) {
            return Err(no_extract_names(rag_name));
        }
        Ok(config)
    }

    pub fn embed_name(&self) -> Result<&str, AppError> {
        self.embed
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "RAG configuration '{}' does not name an embedding model.",
                    self.rag_name
                ))
            })
    }

    pub fn store_params(&self) -> VectorStoreParams {
        VectorStoreParams::from_configuration(self)
    }
}

fn no_extract_names(rag_name: &str) -> AppError {
    AppError::Validation(format!(
        "RAG configuration '{rag_name}' does not contain valid extract names."
    ))
}
