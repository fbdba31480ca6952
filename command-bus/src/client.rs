use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use common::{
    broker::{work_queue_name, BrokerTransport},
    error::AppError,
    utils::config::RpcPolicy,
};
use serde_json::Value;
use tokio_retry::{strategy::FixedInterval, Retry};
use tracing::{debug, instrument, warn};

use crate::{commands::RemoteCommand, envelope::RpcEnvelope, result::RpcResult};

/// Request/response client over the broker.
///
/// Every attempt mints its own reply key, pushes the work item and waits on
/// that reply queue, which is deleted once the attempt ends. A reply that
/// arrives after its attempt gave up therefore never answers a later attempt.
/// A missing reply or a broker fault is retried until the policy's attempts
/// are used up.
#[derive(Clone)]
pub struct RpcClient {
    broker: Arc<dyn BrokerTransport>,
    work_queue: String,
    policy: RpcPolicy,
}

impl RpcClient {
    pub fn new(broker: Arc<dyn BrokerTransport>, server_name: &str, policy: RpcPolicy) -> Self {
        Self {
            broker,
            work_queue: work_queue_name(server_name),
            policy,
        }
    }

    pub fn policy(&self) -> RpcPolicy {
        self.policy
    }

    pub fn work_queue(&self) -> &str {
        &self.work_queue
    }

    pub async fn call(&self, command_id: &str, payload: Value) -> RpcResult {
        self.call_with(command_id, payload, self.policy).await
    }

    #[instrument(skip_all, fields(command = %command_id))]
    pub async fn call_with(&self, command_id: &str, payload: Value, policy: RpcPolicy) -> RpcResult {
        if policy.timeout.is_zero() {
            return RpcResult::Error(format!(
                "timeout must be greater than 0. cmd={command_id}"
            ));
        }

        let template = RpcEnvelope::new(command_id, payload);
        if let Err(err) = template.encode() {
            return RpcResult::Error(format!(
                "fail to execute command. cmd={command_id}, msg={err}"
            ));
        }
        let attempts = AtomicUsize::new(0);

        let strategy = FixedInterval::new(policy.retry_interval).take(policy.retry_count);
        let outcome = Retry::spawn(strategy, || {
            self.attempt(&template, policy.timeout, &attempts)
        })
        .await;

        match outcome {
            Ok(raw) => RpcResult::from_bytes(&raw).unwrap_or_else(|err| {
                RpcResult::Error(format!(
                    "fail to execute command. cmd={command_id}, msg={err}"
                ))
            }),
            Err(err) => {
                warn!(
                    attempts = attempts.load(Ordering::Relaxed),
                    error = %err,
                    "command failed after retries"
                );
                RpcResult::Error(format!(
                    "fail to execute command. cmd={command_id}, msg={err}"
                ))
            }
        }
    }

    async fn attempt(
        &self,
        template: &RpcEnvelope,
        timeout: Duration,
        attempts: &AtomicUsize,
    ) -> Result<Vec<u8>, AppError> {
        let attempt = attempts.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        let envelope = template.with_fresh_reply_key();
        let item = envelope.encode()?;
        debug!(attempt, reply_key = %envelope.reply_key, "sending work item");

        let outcome = self
            .exchange(item, &envelope.reply_key, timeout, attempt)
            .await;

        if let Err(err) = self.broker.delete(&envelope.reply_key).await {
            warn!(reply_key = %envelope.reply_key, error = %err, "failed to delete reply queue");
        }
        outcome
    }

    async fn exchange(
        &self,
        item: Vec<u8>,
        reply_key: &str,
        timeout: Duration,
        attempt: usize,
    ) -> Result<Vec<u8>, AppError> {
        self.broker
            .push(&self.work_queue, item)
            .await
            .inspect_err(|err| warn!(attempt, error = %err, "broker push failed"))?;

        match self
            .broker
            .blocking_pop(reply_key, timeout)
            .await
            .inspect_err(|err| warn!(attempt, error = %err, "broker pop failed"))?
        {
            Some(raw) => Ok(raw),
            None => {
                warn!(attempt, reply_key, "response timed out");
                Err(AppError::RemoteCommunication(format!(
                    "Response timed out after {:.1}s.",
                    timeout.as_secs_f64()
                )))
            }
        }
    }

    /// Runs a typed command and decodes its success payload.
    pub async fn execute<C: RemoteCommand>(&self, args: &C::Args) -> Result<C::Output, AppError> {
        let command_id = C::command_id();
        let payload = serde_json::to_value(args)?;
        let value = self.call(&command_id, payload).await.into_result()?;
        serde_json::from_value(value).map_err(|e| {
            AppError::RemoteCommunication(format!("unexpected reply for {command_id}: {e}"))
        })
    }
}
