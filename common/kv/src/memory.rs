use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::{KvResult, KvStore, Subscription};

/// In-memory store for tests and local development. Expiry is enforced
/// lazily on read, which is enough for TTL semantics in tests; pub/sub is
/// backed by per-channel broadcast channels.
#[derive(Clone, Default)]
pub struct InMemoryKvStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>,
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        matches!(self.expires_at, Some(deadline) if deadline <= Instant::now())
    }
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().expect("kv entries lock poisoned");
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().expect("kv channels lock poisoned");
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        Ok(self.live_value(key))
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> KvResult<()> {
        let expires_at = ttl_seconds.map(|ttl| Instant::now() + Duration::from_secs(ttl));
        let mut entries = self.entries.lock().expect("kv entries lock poisoned");
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> KvResult<()> {
        let mut entries = self.entries.lock().expect("kv entries lock poisoned");
        entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> KvResult<bool> {
        Ok(self.live_value(key).is_some())
    }

    async fn publish(&self, channel: &str, message: &str) -> KvResult<()> {
        // A send error just means nobody is subscribed right now.
        let _ = self.sender_for(channel).send(message.to_string());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> KvResult<Subscription> {
        let mut source = self.sender_for(channel).subscribe();
        let (tx, rx) = mpsc::channel(64);
        let task = tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(Subscription::new(channel.to_string(), rx, task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn set_get_del_round_trip() {
        let store = InMemoryKvStore::new();
        store.set("alpha", "one", None).await.unwrap();
        assert_eq!(store.get("alpha").await.unwrap(), Some("one".to_string()));
        assert!(store.exists("alpha").await.unwrap());

        store.del("alpha").await.unwrap();
        assert_eq!(store.get("alpha").await.unwrap(), None);
        assert!(!store.exists("alpha").await.unwrap());
    }

    #[tokio::test]
    async fn set_overwrites_previous_value() {
        let store = InMemoryKvStore::new();
        store.set("key", "first", Some(60)).await.unwrap();
        store.set("key", "second", Some(60)).await.unwrap();
        assert_eq!(store.get("key").await.unwrap(), Some("second".to_string()));
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let store = InMemoryKvStore::new();
        store.set("ephemeral", "soon gone", Some(0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.get("ephemeral").await.unwrap(), None);
        assert!(!store.exists("ephemeral").await.unwrap());
    }

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let store = InMemoryKvStore::new();
        let mut subscription = store.subscribe("events").await.unwrap();
        store.publish("events", "hello").await.unwrap();
        assert_eq!(subscription.next_message().await, Some("hello".to_string()));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let store = InMemoryKvStore::new();
        store.publish("nobody-listening", "payload").await.unwrap();
    }
}
