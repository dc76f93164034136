//! Per-process connection registry and channel subscription index (spec
//! §4.6). A single reader/writer lock guards both maps; the per-channel
//! subscriber set is reference-counted so the Broadcast Dispatcher opens
//! exactly one Pub/Sub subscription per channel per process, regardless of
//! how many local connections are watching it.

use crate::hub::connection::{EvictReason, Outbound};
use crate::models::match_model::ChannelId;
use actix::Recipient;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

pub struct ConnectionHandle {
    pub recipient: Recipient<Outbound>,
    pub queue_len: Arc<AtomicUsize>,
    pub queue_capacity: usize,
    /// Millis-since-epoch timestamp of the oldest frame still sitting in
    /// this connection's send queue; `0` means the queue is empty. Set when
    /// a frame is enqueued into an empty queue, cleared by the connection
    /// actor once it drains back to empty (spec §4.6/§7: eviction on queue
    /// full OR blocked past `SEND_TIMEOUT`).
    pub oldest_pending_millis: Arc<AtomicU64>,
    pub send_timeout: Duration,
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

#[derive(Default)]
struct ChannelEntry {
    subscribers: HashSet<u64>,
    dispatcher_task: Option<JoinHandle<()>>,
    ticker_task: Option<JoinHandle<()>>,
}

/// Background tasks to abort once a channel's last subscriber leaves.
#[derive(Default)]
pub struct VacatedChannelTasks {
    pub dispatcher: Option<JoinHandle<()>>,
    pub ticker: Option<JoinHandle<()>>,
}

pub struct ConnectionRegistry {
    connections: RwLock<HashMap<u64, ConnectionHandle>>,
    channels: RwLock<HashMap<ChannelId, ChannelEntry>>,
    next_id: AtomicU64,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn next_connection_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn register(&self, id: u64, handle: ConnectionHandle) {
        self.connections.write().await.insert(id, handle);
    }

    pub async fn deregister(&self, id: u64) {
        self.connections.write().await.remove(&id);
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Adds `connection_id` to `channel`'s subscriber set. Returns `true`
    /// when this was the first subscriber, meaning the caller (the Hub) must
    /// start a Broadcast Dispatcher task for this channel.
    pub async fn subscribe(&self, channel: ChannelId, connection_id: u64) -> bool {
        let mut guard = self.channels.write().await;
        let entry = guard.entry(channel).or_default();
        let was_empty = entry.subscribers.is_empty();
        entry.subscribers.insert(connection_id);
        was_empty
    }

    /// Removes `connection_id` from `channel`'s subscriber set. Returns the
    /// background tasks to abort when this was the last subscriber.
    pub async fn unsubscribe(&self, channel: &ChannelId, connection_id: u64) -> Option<VacatedChannelTasks> {
        let mut guard = self.channels.write().await;
        if let Some(entry) = guard.get_mut(channel) {
            entry.subscribers.remove(&connection_id);
            if entry.subscribers.is_empty() {
                let entry = guard.remove(channel).unwrap();
                return Some(VacatedChannelTasks {
                    dispatcher: entry.dispatcher_task,
                    ticker: entry.ticker_task,
                });
            }
        }
        None
    }

    pub async fn set_dispatcher_task(&self, channel: ChannelId, task: JoinHandle<()>) {
        let mut guard = self.channels.write().await;
        guard.entry(channel).or_default().dispatcher_task = Some(task);
    }

    pub async fn set_ticker_task(&self, channel: ChannelId, task: JoinHandle<()>) {
        let mut guard = self.channels.write().await;
        guard.entry(channel).or_default().ticker_task = Some(task);
    }

    /// Spawns `make_task` as `channel`'s ticker task iff the channel still
    /// has subscribers and no live ticker is already tracked for it (a
    /// prior ticker may have exited after an early SCHEDULED/PAUSED check,
    /// see `MatchTicker::run`). Returns `true` iff a new task was spawned.
    pub async fn ensure_ticker_task<F>(&self, channel: &ChannelId, make_task: F) -> bool
    where
        F: FnOnce() -> JoinHandle<()>,
    {
        let mut guard = self.channels.write().await;
        let Some(entry) = guard.get_mut(channel) else {
            return false;
        };
        if entry.subscribers.is_empty() {
            return false;
        }
        let alive = entry.ticker_task.as_ref().map(|t| !t.is_finished()).unwrap_or(false);
        if alive {
            return false;
        }
        entry.ticker_task = Some(make_task());
        true
    }

    pub async fn subscribers(&self, channel: &ChannelId) -> Vec<u64> {
        self.channels
            .read()
            .await
            .get(channel)
            .map(|e| e.subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn subscriber_count(&self, channel: &ChannelId) -> usize {
        self.channels.read().await.get(channel).map(|e| e.subscribers.len()).unwrap_or(0)
    }

    /// Hands `payload` to one connection's bounded send queue. The
    /// connection is evicted instead of blocking the caller if its queue is
    /// already at capacity, or if the oldest frame still queued has been
    /// sitting longer than `send_timeout` — the consumer is draining too
    /// slowly even though its queue never filled (spec §4.6/§4.7/§7: "never
    /// block the Broadcast Dispatcher on a single slow client").
    pub async fn deliver(&self, connection_id: u64, payload: String) -> DeliveryOutcome {
        let guard = self.connections.read().await;
        let Some(handle) = guard.get(&connection_id) else {
            return DeliveryOutcome::Gone;
        };

        let oldest = handle.oldest_pending_millis.load(Ordering::Acquire);
        if oldest != 0 {
            let blocked_for = now_millis().saturating_sub(oldest);
            if blocked_for > handle.send_timeout.as_millis() as u64 {
                return DeliveryOutcome::SendTimeout;
            }
        }

        let len = handle.queue_len.fetch_add(1, Ordering::AcqRel);
        if len >= handle.queue_capacity {
            handle.queue_len.fetch_sub(1, Ordering::AcqRel);
            return DeliveryOutcome::QueueFull;
        }

        if len == 0 {
            handle.oldest_pending_millis.store(now_millis(), Ordering::Release);
        }

        if handle.recipient.do_send(Outbound::Frame(payload)).is_err() {
            handle.queue_len.fetch_sub(1, Ordering::AcqRel);
            return DeliveryOutcome::Gone;
        }

        DeliveryOutcome::Delivered
    }

    /// Forces eviction of a connection outside the normal deliver path, e.g.
    /// when the Broadcast Dispatcher finds its queue already at capacity.
    pub async fn evict(&self, connection_id: u64, reason: EvictReason) {
        let guard = self.connections.read().await;
        if let Some(handle) = guard.get(&connection_id) {
            let _ = handle.recipient.do_send(Outbound::Evict(reason));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    QueueFull,
    SendTimeout,
    Gone,
}
