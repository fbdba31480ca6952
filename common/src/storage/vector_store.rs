//! Pluggable vector store.
//!
//! A backend is chosen by the retrieval configuration's `rag_type` tag. The
//! registration run opens one [`VectorTransaction`] with [`VectorStore::connect`],
//! inserts every record through it and then commits or rolls back exactly once.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::info;

use super::{
    surreal_store::SurrealVectorStore,
    types::{RecordDraft, RetrievalConfiguration},
};
use crate::{error::AppError, utils::names::is_valid_name};

pub const BACKEND_SURREAL: &str = "vector_surreal";
pub const DEFAULT_STORE_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_STORE_PORT: u16 = 8000;
pub const DEFAULT_OWNER: &str = "rag";
pub const DEFAULT_DATABASE: &str = "rag";

/// Connection parameters read from a retrieval configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorStoreParams {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub timeout: Duration,
}

impl VectorStoreParams {
    pub fn from_configuration(config: &RetrievalConfiguration) -> Self {
        Self {
            host: config
                .vector_store_host
                .clone()
                .unwrap_or_else(|| "127.0.0.1".to_string()),
            port: config.vector_store_port.unwrap_or(DEFAULT_STORE_PORT),
            dbname: config
                .vector_store_dbname
                .clone()
                .unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            user: config.vector_store_user.clone().filter(|u| !u.is_empty()),
            pass: config.vector_store_pass.clone(),
            timeout: Duration::from_secs(
                config
                    .vector_store_timeout
                    .unwrap_or(DEFAULT_STORE_TIMEOUT_SECS),
            ),
        }
    }

    /// Engine address. A host with a scheme is used as given, except that the port
    /// is appended when it carries none.
    pub fn address(&self) -> String {
        if self.is_embedded() {
            return "mem://".to_string();
        }
        match self.host.split_once("://") {
            Some((_, rest)) if rest.contains(':') => self.host.clone(),
            Some(_) => format!("{}:{}", self.host.trim_end_matches('/'), self.port),
            None => format!("ws://{}:{}", self.host, self.port),
        }
    }

    pub fn is_embedded(&self) -> bool {
        self.host.starts_with("mem://")
    }

    /// The namespace records are written under.
    pub fn owner(&self) -> &str {
        self.user.as_deref().unwrap_or(DEFAULT_OWNER)
    }
}

/// Connection scoped to one registration run. Inserted records become visible
/// only once [`VectorTransaction::commit`] succeeds.
#[async_trait]
pub trait VectorTransaction: Send {
    /// Validates `draft` and stages it for `service`. Fails when content, metadata
    /// or the embedding vector is missing.
    async fn insert_record(&mut self, service: &str, draft: RecordDraft) -> Result<(), AppError>;

    /// Number of records staged so far.
    fn staged(&self) -> usize;

    /// Writes all staged records atomically and returns how many were written.
    async fn commit(self: Box<Self>) -> Result<usize, AppError>;

    /// Discards all staged records.
    async fn rollback(self: Box<Self>) -> Result<(), AppError>;
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Creates backend prerequisites. Safe to call repeatedly.
    async fn provision(&self) -> Result<(), AppError>;

    /// Creates the per-configuration table with its record-id and vector indexes.
    /// Safe to call repeatedly with the same arguments.
    async fn create_schema(&self, service: &str, dimension: usize) -> Result<(), AppError>;

    async fn connect(&self) -> Result<Box<dyn VectorTransaction>, AppError>;

    async fn select_record_ids(
        &self,
        service: &str,
        source: Option<&str>,
    ) -> Result<Vec<String>, AppError>;

    /// Record ids whose `metadata.page` lies in `start_page..=end_page`.
    async fn select_record_ids_in_page_range(
        &self,
        service: &str,
        source: Option<&str>,
        start_page: i64,
        end_page: i64,
    ) -> Result<Vec<String>, AppError>;
}

/// Builds the store a retrieval configuration asks for.
#[async_trait]
pub trait VectorStoreFactory: Send + Sync {
    async fn create(
        &self,
        config: &RetrievalConfiguration,
    ) -> Result<Arc<dyn VectorStore>, AppError>;
}

/// Resolves backend tags to the stores compiled into this build.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendRegistry;

#[async_trait]
impl VectorStoreFactory for BackendRegistry {
    async fn create(
        &self,
        config: &RetrievalConfiguration,
    ) -> Result<Arc<dyn VectorStore>, AppError> {
        match config.rag_type.as_str() {
            BACKEND_SURREAL => {
                let params = config.store_params();
                info!(
                    backend = BACKEND_SURREAL,
                    address = %params.address(),
                    owner = params.owner(),
                    "opening vector store"
                );
                let store = SurrealVectorStore::connect(&params).await?;
                Ok(Arc::new(store))
            }
            other => Err(AppError::UnsupportedBackend(other.to_string())),
        }
    }
}

/// Checks a service name and returns the table its records live in.
pub fn table_name(service: &str) -> Result<String, AppError> {
    if !is_valid_name(service) {
        return Err(AppError::Validation(format!(
            "invalid service name '{service}': only alphanumeric characters, underscores, and hyphens are allowed"
        )));
    }
    Ok(format!("{}_embedding", service.replace('-', "_")))
}
