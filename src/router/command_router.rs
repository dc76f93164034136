//! The Command Router (spec §4.5): authorize, validate, invoke the Event Log
//! Appender, then publish the resulting snapshot to the Pub/Sub Bus.

use crate::engine::{Command, Rejection};
use crate::models::event::MatchEvent;
use crate::models::match_model::{ChannelId, Match};
use crate::models::Role;
use crate::pubsub::PubSubBus;
use crate::store::{AppendError, CircuitBreaker, EventLogAppender};
use crate::ws::frame::ServerFrame;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::metrics::Metrics;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("actor is not authorized to issue this command")]
    Unauthorized,
    #[error("command did not match the expected shape")]
    MalformedCommand,
    #[error("command not valid from the match's current state")]
    InvalidTransition,
    #[error("participant id is not on this match")]
    UnknownParticipant,
    #[error("match is in a terminal state")]
    MatchTerminal,
    #[error("optimistic-concurrency retries exhausted")]
    Conflict,
    #[error("match not found")]
    NotFound,
    #[error("store call exceeded its deadline")]
    StoreTimeout,
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl CommandError {
    /// The `ERROR.data.kind` string sent back to the originating connection
    /// (spec §7). Every kind here keeps the connection open; only
    /// handshake-time `Unauthenticated` (not representable as a `CommandError`,
    /// see `ws::routes`) closes it.
    pub fn frame_kind(&self) -> &'static str {
        match self {
            CommandError::Unauthorized => "Unauthorized",
            CommandError::MalformedCommand => "MalformedCommand",
            CommandError::InvalidTransition => "InvalidTransition",
            CommandError::UnknownParticipant => "UnknownParticipant",
            CommandError::MatchTerminal => "MatchTerminal",
            CommandError::Conflict => "Conflict",
            CommandError::NotFound => "NotFound",
            CommandError::StoreTimeout => "StoreTimeout",
            CommandError::StoreUnavailable(_) => "StoreUnavailable",
        }
    }
}

impl From<Rejection> for CommandError {
    fn from(r: Rejection) -> Self {
        match r {
            Rejection::InvalidTransition => CommandError::InvalidTransition,
            Rejection::Unauthorized => CommandError::Unauthorized,
            Rejection::UnknownParticipant => CommandError::UnknownParticipant,
            Rejection::MalformedCommand => CommandError::MalformedCommand,
            Rejection::MatchTerminal => CommandError::MatchTerminal,
        }
    }
}

impl From<AppendError> for CommandError {
    fn from(e: AppendError) -> Self {
        match e {
            AppendError::Rejected(r) => r.into(),
            AppendError::NotFound => CommandError::NotFound,
            AppendError::Conflict => CommandError::Conflict,
            AppendError::Unavailable(msg) => CommandError::StoreUnavailable(msg),
        }
    }
}

pub struct CommandRouter {
    appender: EventLogAppender,
    bus: Arc<dyn PubSubBus>,
    metrics: Arc<Metrics>,
    store_deadline: Duration,
    breaker: CircuitBreaker,
}

const STORE_FAILURE_THRESHOLD: u32 = 5;
const STORE_RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);

pub struct RoutedCommand {
    pub next_match: Match,
    pub events: Vec<MatchEvent>,
}

impl CommandRouter {
    pub fn new(
        appender: EventLogAppender,
        bus: Arc<dyn PubSubBus>,
        metrics: Arc<Metrics>,
        store_deadline: Duration,
    ) -> Self {
        Self {
            appender,
            bus,
            metrics,
            store_deadline,
            breaker: CircuitBreaker::new(STORE_FAILURE_THRESHOLD, STORE_RECOVERY_TIMEOUT),
        }
    }

    /// Applies one inbound command, persists it, and publishes the result.
    /// Returns the `CommandError` to send back to the originating connection
    /// on any failure; never partially applies a command (§7: "no error kind
    /// causes data loss").
    pub async fn route(
        &self,
        match_id: &str,
        command: Command,
        actor_id: &str,
        actor_roles: &HashSet<Role>,
        now: DateTime<Utc>,
    ) -> Result<RoutedCommand, CommandError> {
        if command.is_client_issuable() && !actor_roles.iter().any(|r| r.can_mutate()) {
            self.metrics
                .commands_rejected_total
                .with_label_values(&["Unauthorized"])
                .inc();
            return Err(CommandError::Unauthorized);
        }

        if !self.breaker.allow() {
            self.metrics
                .commands_rejected_total
                .with_label_values(&["StoreUnavailable"])
                .inc();
            return Err(CommandError::StoreUnavailable("circuit open".to_string()));
        }

        let kind_label = command.name();
        let outcome = tokio::time::timeout(
            self.store_deadline,
            self.appender
                .apply_and_append(match_id, &command, actor_id, actor_roles, now),
        )
        .await;

        let (next_match, events) = match outcome {
            Err(_elapsed) => {
                self.breaker.record_failure();
                self.metrics
                    .commands_rejected_total
                    .with_label_values(&["StoreTimeout"])
                    .inc();
                return Err(CommandError::StoreTimeout);
            }
            Ok(Err(e)) => {
                let mapped: CommandError = e.into();
                if matches!(mapped, CommandError::StoreTimeout | CommandError::StoreUnavailable(_)) {
                    self.breaker.record_failure();
                }
                self.metrics
                    .commands_rejected_total
                    .with_label_values(&[mapped.frame_kind()])
                    .inc();
                return Err(mapped);
            }
            Ok(Ok(pair)) => {
                self.breaker.record_success();
                pair
            }
        };

        self.metrics
            .commands_accepted_total
            .with_label_values(&[kind_label])
            .inc();

        for event in &events {
            if event.event_type == crate::models::event::EventType::AutoFinish {
                let cause = event
                    .metadata
                    .as_ref()
                    .and_then(|m| m.get("cause"))
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string());
                self.metrics.auto_finish_total.with_label_values(&[&cause]).inc();
            }
        }

        if !events.is_empty() {
            self.publish_snapshot(&next_match, &events, now).await;
        }

        Ok(RoutedCommand { next_match, events })
    }

    async fn publish_snapshot(&self, m: &Match, events: &[MatchEvent], now: DateTime<Utc>) {
        let match_channel = ChannelId::Match(m.id.clone()).as_topic();
        let frame = ServerFrame::match_update(m, events, now);
        if let Err(e) = self.bus.publish(&match_channel, frame.to_json().into_bytes()).await {
            warn!(match_id = %m.id, error = %e, "failed to publish match update");
            return;
        }
        self.metrics
            .ws_messages_published
            .with_label_values(&[&match_channel])
            .inc();

        let tournament_channel = ChannelId::Tournament(m.tournament_id.clone()).as_topic();
        let delta = ServerFrame::match_update(m, &[], now);
        if let Err(e) = self.bus.publish(&tournament_channel, delta.to_json().into_bytes()).await {
            warn!(tournament_id = %m.tournament_id, error = %e, "failed to publish tournament delta");
            return;
        }
        self.metrics
            .ws_messages_published
            .with_label_values(&[&tournament_channel])
            .inc();
    }
}
