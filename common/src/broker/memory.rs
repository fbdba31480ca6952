use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::Notify, time::Instant};

use super::{BrokerError, BrokerTransport};

#[derive(Default)]
struct Queue {
    items: VecDeque<Vec<u8>>,
    expires_at: Option<Instant>,
}

impl Queue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// In-process broker with the same queue semantics as the Redis transport.
/// Expired queues are dropped lazily on the next access.
#[derive(Default)]
pub struct MemoryBroker {
    queues: Mutex<HashMap<String, Queue>>,
    pushes: Mutex<HashMap<String, usize>>,
    notify: Notify,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items ever pushed to `queue`.
    pub fn push_count(&self, queue: &str) -> usize {
        self.pushes
            .lock()
            .map(|pushes| pushes.get(queue).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Number of items currently waiting in `queue`.
    pub fn len(&self, queue: &str) -> usize {
        self.with_queues(|queues| queues.get(queue).map_or(0, |q| q.items.len()))
            .unwrap_or(0)
    }

    /// Names of all live queues that currently hold items.
    pub fn queue_names(&self) -> Vec<String> {
        self.with_queues(|queues| {
            let mut names: Vec<String> = queues
                .iter()
                .filter(|(_, queue)| !queue.items.is_empty())
                .map(|(name, _)| name.clone())
                .collect();
            names.sort();
            names
        })
        .unwrap_or_default()
    }

    fn with_queues<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, Queue>) -> T,
    ) -> Result<T, BrokerError> {
        let mut queues = self
            .queues
            .lock()
            .map_err(|e| BrokerError::Command(e.to_string()))?;
        let now = Instant::now();
        queues.retain(|_, queue| !queue.is_expired(now));
        Ok(f(&mut queues))
    }

    fn append(
        &self,
        queue: &str,
        payload: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), BrokerError> {
        self.with_queues(|queues| {
            let entry = queues.entry(queue.to_string()).or_default();
            entry.items.push_back(payload);
            if let Some(ttl) = ttl {
                entry.expires_at = Some(Instant::now() + ttl);
            }
        })?;
        {
            let mut pushes = self
                .pushes
                .lock()
                .map_err(|e| BrokerError::Command(e.to_string()))?;
            let count = pushes.entry(queue.to_string()).or_insert(0);
            *count = count.saturating_add(1);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    fn try_pop(&self, queue: &str) -> Result<Option<Vec<u8>>, BrokerError> {
        self.with_queues(|queues| {
            let popped = queues.get_mut(queue).and_then(|q| q.items.pop_front());
            if queues.get(queue).is_some_and(|q| q.items.is_empty()) {
                queues.remove(queue);
            }
            popped
        })
    }
}

#[async_trait]
impl BrokerTransport for MemoryBroker {
    async fn push(&self, queue: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        self.append(queue, payload, None)
    }

    async fn push_expiring(
        &self,
        queue: &str,
        payload: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), BrokerError> {
        self.append(queue, payload, Some(ttl))
    }

    async fn blocking_pop(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, BrokerError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_pop(queue)? {
                return Ok(Some(item));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return self.try_pop(queue);
            }
        }
    }

    async fn delete(&self, queue: &str) -> Result<(), BrokerError> {
        self.with_queues(|queues| {
            queues.remove(queue);
        })
    }
}
