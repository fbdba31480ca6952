use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use common::{
    broker::{work_queue_name, BrokerTransport},
    error::AppError,
};
use serde_json::Value;
use tokio::{sync::Semaphore, time::sleep};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    envelope::{command_id, RpcEnvelope},
    result::RpcResult,
};

const BROKER_ERROR_BACKOFF: Duration = Duration::from_secs(1);
/// Lifetime of a reply queue nobody collects.
const DEFAULT_REPLY_TTL: Duration = Duration::from_secs(600);

/// A server-side command. Handlers run concurrently for different callers.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn execute(&self, args: Value) -> Result<Value, AppError>;
}

/// Static mapping from `(mode, cmd)` to its handler, built once at startup.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, mode: &str, cmd: &str, handler: Arc<dyn CommandHandler>) -> &mut Self {
        self.handlers.insert(command_id(mode, cmd), handler);
        self
    }

    pub fn resolve(&self, command_id: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(command_id).cloned()
    }

    pub fn command_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handlers.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Pops work items from the server queue and answers each on its reply queue.
#[derive(Clone)]
pub struct Dispatcher {
    broker: Arc<dyn BrokerTransport>,
    work_queue: String,
    registry: Arc<HandlerRegistry>,
    permits: Arc<Semaphore>,
    concurrency: usize,
    poll_timeout: Duration,
    reply_ttl: Duration,
}

impl Dispatcher {
    pub fn new(
        broker: Arc<dyn BrokerTransport>,
        server_name: &str,
        registry: HandlerRegistry,
        concurrency: usize,
        poll_timeout: Duration,
    ) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            broker,
            work_queue: work_queue_name(server_name),
            registry: Arc::new(registry),
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            poll_timeout,
            reply_ttl: DEFAULT_REPLY_TTL,
        }
    }

    /// Replies to callers that already gave up are dropped by the broker after `ttl`.
    #[must_use]
    pub fn with_reply_ttl(mut self, ttl: Duration) -> Self {
        self.reply_ttl = ttl;
        self
    }

    /// Serves work items until `shutdown` resolves, then waits for in-flight
    /// items to finish.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), AppError>
    where
        F: Future<Output = ()> + Send,
    {
        info!(
            queue = %self.work_queue,
            commands = ?self.registry.command_ids(),
            concurrency = self.concurrency,
            "dispatcher started"
        );
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                popped = self.broker.blocking_pop(&self.work_queue, self.poll_timeout) => {
                    match popped {
                        Ok(Some(raw)) => self.spawn_item(raw).await?,
                        Ok(None) => {}
                        Err(err) => {
                            error!(error = %err, "failed to pop work item");
                            warn!("Backing off for 1s after broker error");
                            sleep(BROKER_ERROR_BACKOFF).await;
                        }
                    }
                }
            }
        }

        let permits = u32::try_from(self.concurrency).unwrap_or(u32::MAX);
        let _drained = self
            .permits
            .acquire_many(permits)
            .await
            .map_err(|e| AppError::InternalError(e.to_string()))?;
        info!(queue = %self.work_queue, "dispatcher stopped");
        Ok(())
    }

    async fn spawn_item(&self, raw: Vec<u8>) -> Result<(), AppError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| AppError::InternalError(e.to_string()))?;
        let dispatcher = self.clone();
        tokio::spawn(async move {
            dispatcher.handle_item(raw).await;
            drop(permit);
        });
        Ok(())
    }

    /// Decodes, executes and answers one work item. Never fails: every outcome
    /// other than an undecodable item is pushed back as a reply.
    pub async fn handle_item(&self, raw: Vec<u8>) {
        let envelope = match RpcEnvelope::decode(&raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(error = %err, "dropping undecodable work item");
                return;
            }
        };
        let reply = self.execute(&envelope).await;
        self.reply(&envelope.reply_key, &reply).await;
    }

    #[instrument(skip_all, fields(command = %envelope.command_id, reply_key = %envelope.reply_key))]
    async fn execute(&self, envelope: &RpcEnvelope) -> RpcResult {
        let Some(handler) = self.registry.resolve(&envelope.command_id) else {
            warn!("unknown command");
            return RpcResult::Warn(format!("Unknown command: {}", envelope.command_id));
        };

        let args = envelope.payload.clone();
        let outcome = tokio::spawn(async move { handler.execute(args).await }).await;
        match outcome {
            Ok(Ok(value)) => {
                debug!("command succeeded");
                RpcResult::Success(value)
            }
            Ok(Err(err)) => {
                warn!(error = %err, "command failed");
                RpcResult::Warn(format!("{}: {err}", envelope.command_id))
            }
            Err(join_err) => {
                error!(error = %join_err, "command handler panicked");
                RpcResult::Warn(format!("{}: {join_err}", envelope.command_id))
            }
        }
    }

    async fn reply(&self, reply_key: &str, reply: &RpcResult) {
        let bytes = match reply.to_bytes() {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(reply_key, error = %err, "failed to encode reply");
                return;
            }
        };
        if let Err(err) = self
            .broker
            .push_expiring(reply_key, bytes, self.reply_ttl)
            .await
        {
            error!(reply_key, error = %err, "failed to push reply");
        }
    }
}
