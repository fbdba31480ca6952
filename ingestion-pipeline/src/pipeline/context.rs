use common::{
    auth::{Identity, SessionContext},
    error::AppError,
    storage::{
        types::RetrievalConfiguration,
        vector_store::{VectorStoreFactory, VectorTransaction},
    },
};
use tracing::{error, warn};

use super::{
    config::{RegistrationReport, RegistrationRequest},
    services::RegistrationServices,
};
use crate::extraction::ExtractorRegistry;

pub struct RegistrationContext<'a> {
    pub request: &'a RegistrationRequest,
    pub run_id: String,
    pub services: &'a dyn RegistrationServices,
    pub session: Option<&'a dyn SessionContext>,
    pub extractors: &'a ExtractorRegistry,
    pub stores: &'a dyn VectorStoreFactory,
    pub configuration: Option<RetrievalConfiguration>,
    pub identity: Option<Identity>,
    pub transaction: Option<Box<dyn VectorTransaction>>,
    pub report: RegistrationReport,
}

impl<'a> RegistrationContext<'a> {
    pub fn new(
        request: &'a RegistrationRequest,
        services: &'a dyn RegistrationServices,
        session: Option<&'a dyn SessionContext>,
        extractors: &'a ExtractorRegistry,
        stores: &'a dyn VectorStoreFactory,
    ) -> Self {
        Self {
            request,
            run_id: uuid::Uuid::new_v4().to_string(),
            services,
            session,
            extractors,
            stores,
            configuration: None,
            identity: None,
            transaction: None,
            report: RegistrationReport {
                rag_name: request.rag_name.clone(),
                ..RegistrationReport::default()
            },
        }
    }

    pub fn configuration(&self) -> Result<&RetrievalConfiguration, AppError> {
        self.configuration.as_ref().ok_or_else(|| {
            AppError::InternalError("retrieval configuration expected to be loaded".into())
        })
    }

    pub fn identity(&self) -> Result<&Identity, AppError> {
        self.identity
            .as_ref()
            .ok_or_else(|| AppError::InternalError("identity expected to be verified".into()))
    }

    pub fn transaction_mut(&mut self) -> Result<&mut Box<dyn VectorTransaction>, AppError> {
        self.transaction
            .as_mut()
            .ok_or_else(|| AppError::InternalError("vector store connection expected".into()))
    }

    pub fn take_transaction(&mut self) -> Result<Box<dyn VectorTransaction>, AppError> {
        self.transaction.take().ok_or_else(|| {
            AppError::InternalError("vector store connection expected for commit".into())
        })
    }

    /// Records a recoverable problem in the report.
    pub fn warn(&mut self, message: String) {
        warn!(
            run_id = %self.run_id,
            rag_name = %self.request.rag_name,
            warning = %message,
            "registration warning"
        );
        self.report.warnings.push(message);
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        error!(
            run_id = %self.run_id,
            rag_name = %self.request.rag_name,
            error = %err,
            "registration pipeline aborted"
        );
        err
    }

    /// Rolls back whatever the run staged. Called on every failed run.
    pub async fn discard_transaction(&mut self) {
        if let Some(transaction) = self.transaction.take() {
            let staged = transaction.staged();
            if let Err(err) = transaction.rollback().await {
                error!(run_id = %self.run_id, error = %err, "rollback failed");
            } else {
                warn!(run_id = %self.run_id, staged, "registration rolled back");
            }
        }
    }
}
