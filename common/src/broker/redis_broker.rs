use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::trace;

use super::{BrokerError, BrokerTransport};

/// Connection timeout used when opening a broker connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Slack added on top of a blocking pop so the client does not give up before the server.
const RESPONSE_SLACK: Duration = Duration::from_secs(5);

/// Broker transport backed by Redis lists (`RPUSH` / `BLPOP` / `DEL`, `PEXPIRE` for replies).
pub struct RedisBroker {
    client: redis::Client,
}

impl RedisBroker {
    /// Creates a new instance of `RedisBroker`.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - The Redis server URL (e.g., "redis://127.0.0.1/").
    pub fn new(redis_url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        Ok(Self { client })
    }

    /// Establishes a dedicated multiplexed connection.
    ///
    /// Every operation gets its own connection: a pending `BLPOP` holds the
    /// server side of its connection until it returns.
    async fn get_connection(
        &self,
        response_timeout: Duration,
    ) -> Result<redis::aio::MultiplexedConnection, BrokerError> {
        self.client
            .get_multiplexed_async_connection_with_timeouts(response_timeout, CONNECT_TIMEOUT)
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))
    }
}

#[async_trait]
impl BrokerTransport for RedisBroker {
    async fn push(&self, queue: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let mut conn = self.get_connection(RESPONSE_SLACK).await?;
        let _: () = conn
            .rpush(queue, payload)
            .await
            .map_err(|e| BrokerError::Command(e.to_string()))?;
        trace!(queue, "pushed broker item");
        Ok(())
    }

    async fn push_expiring(
        &self,
        queue: &str,
        payload: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), BrokerError> {
        let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1);
        let mut conn = self.get_connection(RESPONSE_SLACK).await?;
        let _: () = redis::pipe()
            .atomic()
            .rpush(queue, payload)
            .ignore()
            .pexpire(queue, ttl_millis)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::Command(e.to_string()))?;
        trace!(queue, ttl_millis, "pushed expiring broker item");
        Ok(())
    }

    async fn blocking_pop(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, BrokerError> {
        let mut conn = self
            .get_connection(timeout.saturating_add(RESPONSE_SLACK))
            .await?;
        let popped: Option<(String, Vec<u8>)> = conn
            .blpop(queue, timeout.as_secs_f64())
            .await
            .map_err(|e| BrokerError::Command(e.to_string()))?;
        Ok(popped.map(|(_, payload)| payload))
    }

    async fn delete(&self, queue: &str) -> Result<(), BrokerError> {
        let mut conn = self.get_connection(RESPONSE_SLACK).await?;
        let _: () = conn
            .del(queue)
            .await
            .map_err(|e| BrokerError::Command(e.to_string()))?;
        Ok(())
    }
}
