//! Per-match timer ticker with cross-process lease election (spec §5). A
//! lightweight `TIMER_UPDATE` broadcasts every second straight to the bus;
//! a durable `TimerSet`/`TimerExpired` command reconciles the Store every
//! `durable_flush_every` seconds, or immediately at zero.

use crate::engine::Command;
use crate::models::match_model::{ChannelId, MatchState};
use crate::models::Role;
use crate::pubsub::PubSubBus;
use crate::router::CommandRouter;
use crate::store::MatchStore;
use crate::ws::frame::ServerFrame;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Synthetic actor id attached to ticker-driven commands, distinguishing
/// them from referee-issued ones in the event log's `actorId`.
const TICKER_ACTOR: &str = "system:ticker";

pub struct MatchTicker {
    bus: Arc<dyn PubSubBus>,
    router: Arc<CommandRouter>,
    store: Arc<dyn MatchStore>,
    ping_interval: Duration,
    durable_flush_every: Duration,
}

impl MatchTicker {
    pub fn new(
        bus: Arc<dyn PubSubBus>,
        router: Arc<CommandRouter>,
        store: Arc<dyn MatchStore>,
        ping_interval: Duration,
    ) -> Self {
        Self {
            bus,
            router,
            store,
            ping_interval,
            durable_flush_every: Duration::from_secs(10),
        }
    }

    fn lease_key(match_id: &str) -> String {
        format!("ticker-lease:{match_id}")
    }

    /// Runs until the match leaves IN_PROGRESS, the lease is lost to another
    /// process, or this process never won the lease in the first place.
    pub async fn run(&self, match_id: &str) {
        let lease_key = Self::lease_key(match_id);
        let lease_ttl = self.ping_interval;

        match self.bus.try_acquire_lease(&lease_key, lease_ttl).await {
            Ok(true) => info!(match_id, "acquired ticker lease"),
            Ok(false) => return,
            Err(e) => {
                warn!(match_id, error = %e, "ticker lease acquisition failed");
                return;
            }
        }

        let mut remaining = match self.store.load_match(match_id).await {
            Ok(m) if m.state == MatchState::InProgress => m.time_remaining_seconds,
            _ => {
                let _ = self.bus.release_lease(&lease_key).await;
                return;
            }
        };

        let topic = ChannelId::Match(match_id.to_string()).as_topic();
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        let mut last_durable_flush = Instant::now();
        let mut last_renew = Instant::now();
        let renew_every = self.ping_interval / 2;

        loop {
            interval.tick().await;

            if last_renew.elapsed() >= renew_every {
                match self.bus.renew_lease(&lease_key, lease_ttl).await {
                    Ok(true) => last_renew = Instant::now(),
                    _ => {
                        warn!(match_id, "ticker lease lost, stepping down");
                        return;
                    }
                }
            }

            let still_running = match self.store.load_match(match_id).await {
                Ok(m) => m.state == MatchState::InProgress,
                Err(e) => {
                    warn!(match_id, error = %e, "ticker failed to reload match state");
                    true
                }
            };
            if !still_running {
                info!(match_id, "match left IN_PROGRESS, ticker stopping");
                let _ = self.bus.release_lease(&lease_key).await;
                return;
            }

            remaining = (remaining - 1).max(0);

            let now = Utc::now();
            let frame = ServerFrame::timer_tick(match_id, remaining, now);
            if let Err(e) = self.bus.publish(&topic, frame.to_json().into_bytes()).await {
                warn!(match_id, error = %e, "ticker publish failed");
            }

            let at_zero = remaining == 0;
            let actor_roles: HashSet<Role> = HashSet::from([Role::Admin]);

            if at_zero {
                // The engine's TimerExpired handler only finishes the match
                // once it reads a persisted time_remaining_seconds of zero;
                // the periodic flush below runs at most every
                // durable_flush_every and may still hold a stale positive
                // value, so the zeroed TimerSet must land first.
                if let Err(e) = self
                    .router
                    .route(match_id, Command::TimerSet { seconds: 0 }, TICKER_ACTOR, &actor_roles, now)
                    .await
                {
                    warn!(match_id, error = %e, "ticker failed to persist zeroed time remaining");
                }
                if let Err(e) = self
                    .router
                    .route(match_id, Command::TimerExpired, TICKER_ACTOR, &actor_roles, now)
                    .await
                {
                    warn!(match_id, error = %e, "ticker failed to auto-finish expired match");
                }
                last_durable_flush = Instant::now();
                let _ = self.bus.release_lease(&lease_key).await;
                return;
            }

            if last_durable_flush.elapsed() >= self.durable_flush_every {
                if let Err(e) = self
                    .router
                    .route(match_id, Command::TimerSet { seconds: remaining }, TICKER_ACTOR, &actor_roles, now)
                    .await
                {
                    warn!(match_id, error = %e, "ticker durable flush failed");
                }
                last_durable_flush = Instant::now();
            }
        }
    }
}
