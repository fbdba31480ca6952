//! Identity and command authorization consumed by the registration pipeline.

pub mod signin;

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::AppError;

pub use signin::SigninFile;

/// An authenticated caller together with the signin record that authorized it.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_name: String,
    pub groups: Vec<String>,
    pub signin: Arc<SigninFile>,
}

/// Supplies the identity bound to the current request or session.
pub trait SessionContext: Send + Sync {
    /// Returns `Ok(None)` when the session has no active signin.
    fn current_identity(&self) -> Result<Option<Identity>, AppError>;
}

/// Decides whether an identity may run a resolved command.
pub trait PermissionGate: Send + Sync {
    fn validate(
        &self,
        identity: &Identity,
        groups: &[String],
        mode: &str,
        cmd: &str,
        options: &Map<String, Value>,
    ) -> bool;
}

/// A session whose identity was resolved up front, as the CLI does.
#[derive(Debug, Clone, Default)]
pub struct StaticSession {
    identity: Option<Identity>,
}

impl StaticSession {
    pub fn new(identity: Option<Identity>) -> Self {
        Self { identity }
    }
}

impl SessionContext for StaticSession {
    fn current_identity(&self) -> Result<Option<Identity>, AppError> {
        Ok(self.identity.clone())
    }
}
