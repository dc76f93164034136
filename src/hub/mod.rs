//! The Hub (spec §4.6): per-process connection registry plus the glue that
//! starts/stops a Broadcast Dispatcher per channel, reference-counted by
//! subscriber count, and keeps a timer ticker running for every match
//! channel that is both subscribed-to and IN_PROGRESS — spawned at
//! first-subscriber join time and re-spawned whenever `Command::Start`
//! transitions a match into IN_PROGRESS after the ticker it had exited.

pub mod connection;
pub mod dispatcher;
pub mod registry;
pub mod ticker;

use crate::engine::Command;
use crate::hub::connection::{MatchConnection, Outbound};
use crate::hub::dispatcher::BroadcastDispatcher;
use crate::hub::registry::{ConnectionHandle, ConnectionRegistry};
use crate::hub::ticker::MatchTicker;
use crate::metrics::Metrics;
use crate::models::match_model::{ChannelId, MatchState};
use crate::models::Role;
use crate::pubsub::PubSubBus;
use crate::router::{CommandError, CommandRouter, RoutedCommand};
use crate::store::MatchStore;
use crate::ws::frame::ServerFrame;
use actix::Addr;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct Hub {
    pub registry: Arc<ConnectionRegistry>,
    bus: Arc<dyn PubSubBus>,
    store: Arc<dyn MatchStore>,
    router: Arc<CommandRouter>,
    metrics: Arc<Metrics>,
    ping_interval: Duration,
    resume_backlog_limit: i64,
}

impl Hub {
    pub fn new(
        bus: Arc<dyn PubSubBus>,
        store: Arc<dyn MatchStore>,
        router: Arc<CommandRouter>,
        metrics: Arc<Metrics>,
        ping_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry: ConnectionRegistry::shared(),
            bus,
            store,
            router,
            metrics,
            ping_interval,
            resume_backlog_limit: 1000,
        })
    }

    pub fn next_connection_id(&self) -> u64 {
        self.registry.next_connection_id()
    }

    /// Registers a new connection and, if it is the channel's first local
    /// subscriber, starts the Broadcast Dispatcher (and, for match channels,
    /// the timer ticker).
    pub async fn join(&self, connection_id: u64, channel: ChannelId, handle: ConnectionHandle) {
        self.registry.register(connection_id, handle).await;
        self.metrics.current_ws_connections.inc();

        let first_subscriber = self.registry.subscribe(channel.clone(), connection_id).await;
        if !first_subscriber {
            return;
        }

        let dispatcher = BroadcastDispatcher::new(self.registry.clone(), self.bus.clone(), self.metrics.clone());
        let dispatcher_channel = channel.clone();
        let dispatcher_task = tokio::spawn(async move { dispatcher.run(dispatcher_channel).await });
        self.registry.set_dispatcher_task(channel.clone(), dispatcher_task).await;

        if let ChannelId::Match(match_id) = &channel {
            let ticker = MatchTicker::new(self.bus.clone(), self.router.clone(), self.store.clone(), self.ping_interval);
            let match_id = match_id.clone();
            let ticker_task = tokio::spawn(async move { ticker.run(&match_id).await });
            self.registry.set_ticker_task(channel, ticker_task).await;
        }
    }

    pub async fn leave(&self, connection_id: u64, channel: &ChannelId) {
        self.registry.deregister(connection_id).await;
        self.metrics.current_ws_connections.dec();

        if let Some(tasks) = self.registry.unsubscribe(channel, connection_id).await {
            if let Some(task) = tasks.dispatcher {
                task.abort();
            }
            if let Some(task) = tasks.ticker {
                task.abort();
            }
        }
    }

    /// Sends the backlog of events since `since_version` to a newly-joined
    /// connection resuming a prior session (spec §6.3 scenario 6), before it
    /// joins the live broadcast stream.
    pub async fn send_resume_backlog(&self, channel: &ChannelId, since_version: i64, addr: Addr<MatchConnection>) {
        let ChannelId::Match(match_id) = channel else {
            return;
        };

        match self.store.recent_events(match_id, since_version, self.resume_backlog_limit).await {
            Ok(events) if !events.is_empty() => {
                let frame = ServerFrame::event_appended(match_id, &events, Utc::now());
                let _ = addr.try_send(Outbound::Frame(frame.to_json()));
            }
            Ok(_) => {}
            Err(e) => warn!(match_id, error = %e, "failed to load resume backlog"),
        }
    }

    pub async fn route_command(
        &self,
        match_id: &str,
        command: Command,
        actor_id: &str,
        actor_roles: &HashSet<Role>,
        now: DateTime<Utc>,
    ) -> Result<RoutedCommand, CommandError> {
        let result = self.router.route(match_id, command, actor_id, actor_roles, now).await?;
        if result.next_match.state == MatchState::InProgress {
            self.ensure_ticker(match_id).await;
        }
        Ok(result)
    }

    /// Spawns a ticker for `match_id` if the channel has subscribers and no
    /// ticker is currently running for it. The join-time ticker in `join`
    /// exits immediately if a match isn't yet IN_PROGRESS (the common case:
    /// viewers join a SCHEDULED match before a referee starts it), so this
    /// is what actually starts the timer once `Command::Start` succeeds.
    async fn ensure_ticker(&self, match_id: &str) {
        let channel = ChannelId::Match(match_id.to_string());
        let bus = self.bus.clone();
        let router = self.router.clone();
        let store = self.store.clone();
        let ping_interval = self.ping_interval;
        let match_id_owned = match_id.to_string();

        let spawned = self
            .registry
            .ensure_ticker_task(&channel, move || {
                tokio::spawn(async move {
                    let ticker = MatchTicker::new(bus, router, store, ping_interval);
                    ticker.run(&match_id_owned).await;
                })
            })
            .await;

        if spawned {
            info!(match_id, "spawned match ticker after transition to IN_PROGRESS");
        }
    }
}
