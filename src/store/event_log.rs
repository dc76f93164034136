//! Wraps `MatchStore::append_events` with optimistic-concurrency retry.
//!
//! On `VersionConflict` the match is reloaded and the pure engine is re-run
//! against the fresh state, up to `COMMAND_RETRY_MAX` (default 3) attempts.
//! This guarantees invariants I1 (dense, gap-free sequence) and I2
//! (`version == max(sequence)`) hold even under concurrent writers.

use crate::engine::{apply, ApplyOutcome, Command, Rejection};
use crate::models::event::MatchEvent;
use crate::models::match_model::Match;
use crate::models::Role;
use crate::store::match_store::{MatchStore, StoreError};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum AppendError {
    #[error(transparent)]
    Rejected(#[from] Rejection),
    #[error("match not found")]
    NotFound,
    #[error("optimistic-concurrency retries exhausted")]
    Conflict,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub struct EventLogAppender {
    store: Arc<dyn MatchStore>,
    max_retries: u32,
}

impl EventLogAppender {
    pub fn new(store: Arc<dyn MatchStore>, max_retries: u32) -> Self {
        Self { store, max_retries }
    }

    /// Loads the match, applies `command` through the pure engine, and
    /// persists the result, retrying on a concurrent writer's version bump.
    pub async fn apply_and_append(
        &self,
        match_id: &str,
        command: &Command,
        actor_id: &str,
        actor_roles: &HashSet<Role>,
        now: DateTime<Utc>,
    ) -> Result<(Match, Vec<MatchEvent>), AppendError> {
        let mut attempt = 0;
        loop {
            let current = self
                .store
                .load_match(match_id)
                .await
                .map_err(|e| match e {
                    StoreError::NotFound => AppendError::NotFound,
                    other => {
                        warn!(%match_id, error = %other, "store load failed during append");
                        AppendError::Unavailable(other.to_string())
                    }
                })?;

            let ApplyOutcome { next_match, events } =
                apply(&current, command, actor_id, actor_roles, now)?;

            if events.is_empty() {
                // No-op command (e.g. an early synthetic tick); nothing to
                // persist, nothing to broadcast.
                return Ok((next_match, events));
            }

            match self
                .store
                .append_events(current.version, &next_match, &events)
                .await
            {
                Ok(_) => {
                    info!(
                        match_id,
                        command = command.name(),
                        sequence = events.last().map(|e| e.sequence).unwrap_or_default(),
                        "command applied"
                    );
                    return Ok((next_match, events));
                }
                Err(StoreError::VersionConflict) => {
                    attempt += 1;
                    if attempt >= self.max_retries {
                        warn!(match_id, attempt, "event log append conflict, retries exhausted");
                        return Err(AppendError::Conflict);
                    }
                    warn!(match_id, attempt, "event log append conflict, retrying");
                    continue;
                }
                Err(StoreError::NotFound) => return Err(AppendError::NotFound),
                Err(StoreError::Database(e)) => {
                    warn!(match_id, error = %e, "store append failed");
                    return Err(AppendError::Unavailable(e.to_string()));
                }
            }
        }
    }
}
