//! Shared key-value store abstraction used for sessions, refresh-token
//! bookkeeping, and the pub/sub channels that carry credential lifecycle
//! events between backend processes.
//!
//! Values are plain strings; callers serialize structured data (JSON)
//! themselves. Per-key operations are atomic at the backend; nothing here
//! assumes multi-key transactions.

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use memory::InMemoryKvStore;
pub use redis_store::RedisStore;

pub type KvResult<T> = Result<T, KvError>;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("key-value store error: {0}")]
    Store(String),
}

impl From<redis::RedisError> for KvError {
    fn from(value: redis::RedisError) -> Self {
        Self::Store(value.to_string())
    }
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> KvResult<Option<String>>;

    /// Set `key` to `value`, with an expiry when `ttl_seconds` is given.
    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> KvResult<()>;

    async fn del(&self, key: &str) -> KvResult<()>;

    async fn exists(&self, key: &str) -> KvResult<bool>;

    async fn publish(&self, channel: &str, message: &str) -> KvResult<()>;

    /// Subscribe to a pub/sub channel. Messages published after this call
    /// are delivered through the returned handle; delivery is best-effort.
    async fn subscribe(&self, channel: &str) -> KvResult<Subscription>;
}

/// Live pub/sub subscription. Dropping it (or calling [`Subscription::close`])
/// stops the background forwarding task.
pub struct Subscription {
    channel: String,
    receiver: mpsc::Receiver<String>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn new(channel: String, receiver: mpsc::Receiver<String>, task: JoinHandle<()>) -> Self {
        Self {
            channel,
            receiver,
            task,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next message on the channel, or `None` once the subscription ended.
    pub async fn next_message(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    pub fn close(self) {
        self.task.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
