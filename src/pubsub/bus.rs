//! Pub/Sub Bus contract (spec §2 item 3): publish a byte payload to a named
//! channel, subscribe and receive a stream of payloads, and expose a
//! per-process backlog counter. This generalizes the teacher's
//! `service::communication::message_queue::MessageQueue` (a Redis work
//! queue) into a typed broadcast bus the Hub and Command Router share.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

#[async_trait]
pub trait PubSubBus: Send + Sync {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Subscribes to `channel`, returning a stream of payloads. Each call
    /// opens a logically independent subscription; the Hub is responsible
    /// for reference-counting so only one physical subscription per channel
    /// per process is open at a time (spec §4.6).
    async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<std::pin::Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>, BusError>;

    /// Current backlog length summed across all channels this process is
    /// tracking, exported as the `pubsub_backlog` gauge (spec §4.8).
    fn backlog(&self) -> i64;

    /// Attempts to acquire a short-TTL lease on `key`, returning `true` iff
    /// this call won it. Backs the Hub's per-match ticker election (spec §5).
    async fn try_acquire_lease(&self, key: &str, ttl: Duration) -> Result<bool, BusError>;

    /// Renews a lease this process believes it holds, refreshing its TTL.
    /// Returns `false` once the lease has expired or been taken elsewhere.
    async fn renew_lease(&self, key: &str, ttl: Duration) -> Result<bool, BusError>;

    async fn release_lease(&self, key: &str) -> Result<(), BusError>;
}

/// Redis-backed bus. One dedicated connection runs `PSUBSCRIBE`-style
/// per-channel subscriptions fanned out to local `broadcast::Sender`s so
/// multiple local callers can `subscribe` to the same channel without
/// opening multiple Redis connections.
pub struct RedisBus {
    client: redis::Client,
    local_fanout: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
}

impl RedisBus {
    pub fn new(redis_url: &str) -> Result<Self, BusError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            local_fanout: Mutex::new(HashMap::new()),
        })
    }

    /// Ensures a background task is forwarding this Redis channel into the
    /// local broadcast sender, starting one on first subscriber.
    async fn ensure_pumped(&self, channel: &str) -> Result<broadcast::Sender<Vec<u8>>, BusError> {
        let mut guard = self.local_fanout.lock().expect("local_fanout mutex poisoned");
        if let Some(tx) = guard.get(channel) {
            return Ok(tx.clone());
        }

        let (tx, _rx) = broadcast::channel(1024);
        guard.insert(channel.to_string(), tx.clone());
        drop(guard);

        let client = self.client.clone();
        let channel_owned = channel.to_string();
        let forward_tx = tx.clone();
        tokio::spawn(async move {
            let conn = match client.get_async_connection().await {
                Ok(c) => c,
                Err(e) => {
                    error!(channel = %channel_owned, error = %e, "redis pubsub connection failed");
                    return;
                }
            };
            let mut pubsub = conn.into_pubsub();
            if let Err(e) = pubsub.subscribe(&channel_owned).await {
                error!(channel = %channel_owned, error = %e, "redis subscribe failed");
                return;
            }
            let mut stream = pubsub.on_message();
            use futures_util::StreamExt as _;
            while let Some(msg) = stream.next().await {
                let payload: Vec<u8> = msg.get_payload_bytes().to_vec();
                if forward_tx.send(payload).is_err() {
                    break;
                }
            }
        });

        Ok(tx)
    }
}

#[async_trait]
impl PubSubBus for RedisBus {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let mut conn = self.client.get_async_connection().await?;
        let _: () = conn.publish(channel, payload).await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<std::pin::Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>, BusError> {
        let tx = self.ensure_pumped(channel).await?;
        let rx = tx.subscribe();
        Ok(Box::pin(BroadcastStream::new(rx).filter_map(|r| match r {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("local subscriber lagged; frames dropped");
                None
            }
        })))
    }

    fn backlog(&self) -> i64 {
        let guard = self.local_fanout.lock().expect("local_fanout mutex poisoned");
        guard.values().map(|tx| tx.len() as i64).sum()
    }

    /// `SET key ticker PX <ttl> NX`. Approximates a distributed lock; does
    /// not use a Lua compare-and-delete, so a process that stalls past its
    /// own TTL can have its lease silently taken by another before it
    /// notices on the next renew (acceptable: the ticker's own state re-read
    /// each tick means a stale owner just stops making progress, it never
    /// corrupts match state).
    async fn try_acquire_lease(&self, key: &str, ttl: Duration) -> Result<bool, BusError> {
        let mut conn = self.client.get_async_connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("ticker")
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn renew_lease(&self, key: &str, ttl: Duration) -> Result<bool, BusError> {
        let mut conn = self.client.get_async_connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("ticker")
            .arg("XX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn release_lease(&self, key: &str) -> Result<(), BusError> {
        let mut conn = self.client.get_async_connection().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }
}

/// In-process bus for tests and single-replica development, backed by
/// `tokio::sync::broadcast` so no Redis dependency is required.
pub struct InMemoryBus {
    channels: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
    leases: Mutex<HashMap<String, Instant>>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            leases: Mutex::new(HashMap::new()),
        }
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        let mut guard = self.channels.lock().expect("channels mutex poisoned");
        guard
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(1024).0)
            .clone()
    }
}

#[async_trait]
impl PubSubBus for InMemoryBus {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let tx = self.sender(channel);
        // No receivers yet is not an error: a publish with zero local
        // subscribers is normal (e.g. nobody watching this match right now).
        let _ = tx.send(payload);
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<std::pin::Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>, BusError> {
        let tx = self.sender(channel);
        let rx = tx.subscribe();
        Ok(Box::pin(BroadcastStream::new(rx).filter_map(|r| r.ok())))
    }

    fn backlog(&self) -> i64 {
        let guard = self.channels.lock().expect("channels mutex poisoned");
        guard.values().map(|tx| tx.len() as i64).sum()
    }

    async fn try_acquire_lease(&self, key: &str, ttl: Duration) -> Result<bool, BusError> {
        let mut guard = self.leases.lock().expect("leases mutex poisoned");
        let now = Instant::now();
        if let Some(expires_at) = guard.get(key) {
            if *expires_at > now {
                return Ok(false);
            }
        }
        guard.insert(key.to_string(), now + ttl);
        Ok(true)
    }

    async fn renew_lease(&self, key: &str, ttl: Duration) -> Result<bool, BusError> {
        let mut guard = self.leases.lock().expect("leases mutex poisoned");
        if !guard.contains_key(key) {
            return Ok(false);
        }
        guard.insert(key.to_string(), Instant::now() + ttl);
        Ok(true)
    }

    async fn release_lease(&self, key: &str) -> Result<(), BusError> {
        self.leases.lock().expect("leases mutex poisoned").remove(key);
        Ok(())
    }
}
