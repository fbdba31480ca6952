use common::error::AppError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of a remote call as carried on the reply queue.
///
/// `Warn` is produced by the server (handler failure, unknown command, not found).
/// `Error` is produced on the client side when no reply could be obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RpcResult {
    Success(Value),
    Warn(String),
    Error(String),
}

impl RpcResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, AppError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, AppError> {
        serde_json::from_slice(raw).map_err(|e| {
            AppError::RemoteCommunication(format!("unreadable reply: {e}"))
        })
    }

    /// Turns the tagged outcome into the error taxonomy.
    pub fn into_result(self) -> Result<Value, AppError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Warn(message) => Err(AppError::Remote(message)),
            Self::Error(message) => Err(AppError::RemoteCommunication(message)),
        }
    }
}

impl From<Result<Value, AppError>> for RpcResult {
    fn from(result: Result<Value, AppError>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(err) => Self::Warn(err.to_string()),
        }
    }
}
