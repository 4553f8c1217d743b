use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::warn;

use crate::{KvError, KvResult, KvStore, Subscription};

/// Redis-backed store. Commands go through a [`ConnectionManager`] (which
/// reconnects on failure); each subscription opens its own connection, as
/// Redis dedicates a connection to pub/sub mode.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    manager: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> KvResult<Self> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client.clone()).await?;
        Ok(Self { client, manager })
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> KvResult<()> {
        let mut conn = self.manager.clone();
        match ttl_seconds {
            Some(ttl) => {
                let _: () = conn.set_ex(key, value, ttl).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> KvResult<()> {
        let mut conn = self.manager.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> KvResult<bool> {
        let mut conn = self.manager.clone();
        let found: bool = conn.exists(key).await?;
        Ok(found)
    }

    async fn publish(&self, channel: &str, message: &str) -> KvResult<()> {
        let mut conn = self.manager.clone();
        let _: i64 = conn.publish(channel, message).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> KvResult<Subscription> {
        let connection = self.client.get_async_connection().await?;
        let mut pubsub = connection.into_pubsub();
        pubsub
            .subscribe(channel)
            .await
            .map_err(|err| KvError::Store(err.to_string()))?;

        let (tx, rx) = mpsc::channel(64);
        let channel_name = channel.to_string();
        let task = tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(message) = stream.next().await {
                let payload: String = match message.get_payload() {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(channel = %channel_name, error = %err, "Dropping undecodable pub/sub payload");
                        continue;
                    }
                };
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
        });

        Ok(Subscription::new(channel.to_string(), rx, task))
    }
}
