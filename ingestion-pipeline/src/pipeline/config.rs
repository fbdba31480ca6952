use std::path::PathBuf;

use common::{error::AppError, utils::names::is_valid_name};
use serde::Serialize;

/// Parameters of one registration run.
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub rag_name: String,
    /// Root holding `.cmds/` and the relative `loadpath`s of extraction configurations.
    pub data_dir: PathBuf,
}

impl RegistrationRequest {
    pub fn new(rag_name: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            rag_name: rag_name.into(),
            data_dir: data_dir.into(),
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.rag_name.trim().is_empty() {
            return Err(AppError::Validation("rag_name is required.".into()));
        }
        if !is_valid_name(&self.rag_name) {
            return Err(AppError::Validation(
                "RAG name can only contain alphanumeric characters, underscores, and hyphens."
                    .into(),
            ));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(AppError::Validation("data is required.".into()));
        }
        Ok(())
    }
}

pub const SUCCESS_MESSAGE: &str = "RAG registration completed successfully.";

/// Outcome of a committed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistrationReport {
    pub rag_name: String,
    pub message: String,
    pub files_processed: usize,
    pub files_skipped: usize,
    pub chunks_skipped: usize,
    pub records_committed: usize,
    pub warnings: Vec<String>,
}
