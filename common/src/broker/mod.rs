//! Push / blocking-pop access to the shared broker.
//!
//! The broker only knows named queues carrying opaque byte payloads. Everything
//! above it (envelopes, correlation keys, retries) lives in the command bus.

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod redis_broker;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Represents errors that can occur during broker operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Broker connection error: {0}")]
    Connection(String),

    #[error("Broker command error: {0}")]
    Command(String),
}

/// Defines the queue primitives the command bus is built on.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Appends `payload` to the tail of `queue`.
    async fn push(&self, queue: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    /// Appends `payload` to `queue` and lets the whole queue expire after `ttl`.
    /// Used for reply queues, which may outlive the caller that minted them.
    async fn push_expiring(
        &self,
        queue: &str,
        payload: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), BrokerError>;

    /// Pops the head of `queue`, waiting up to `timeout` for an item to arrive.
    /// Returns `Ok(None)` when the wait elapsed without an item.
    async fn blocking_pop(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, BrokerError>;

    /// Removes `queue` and anything left in it.
    async fn delete(&self, queue: &str) -> Result<(), BrokerError>;
}

/// Name of the shared work queue served by the dispatcher called `server_name`.
pub fn work_queue_name(server_name: &str) -> String {
    format!("sv-{server_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_queue_is_prefixed() {
        assert_eq!(work_queue_name("server"), "sv-server");
    }
}
