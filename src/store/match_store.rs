//! The Match Store contract (spec §4.2): load/save the Match aggregate,
//! append events, and query recent events. `AppendEvent` is atomic with the
//! version bump so `(LoadMatch, AppendEvent)` pairs serialize per `matchId`.

use crate::models::event::MatchEvent;
use crate::models::match_model::Match;
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("match not found")]
    NotFound,
    #[error("version conflict")]
    VersionConflict,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait MatchStore: Send + Sync {
    async fn load_match(&self, match_id: &str) -> Result<Match, StoreError>;

    /// Persists `new_version`'s match row together with `events`, succeeding
    /// only if the stored version is still `expected_version`.
    async fn append_events(
        &self,
        expected_version: i64,
        next_match: &Match,
        events: &[MatchEvent],
    ) -> Result<i64, StoreError>;

    async fn recent_events(
        &self,
        match_id: &str,
        since_sequence: i64,
        limit: i64,
    ) -> Result<Vec<MatchEvent>, StoreError>;
}

/// Postgres-backed implementation. The CAS on `version` is a single
/// `UPDATE ... WHERE version = $expected` inside the same transaction as the
/// event insert, giving serializability without a row lock held across
/// await points.
pub struct PgMatchStore {
    pool: PgPool,
}

impl PgMatchStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MatchStore for PgMatchStore {
    async fn load_match(&self, match_id: &str) -> Result<Match, StoreError> {
        sqlx::query_as::<_, Match>(
            r#"
            SELECT id, tournament_id, participant1, participant2, score1, score2,
                   duration_seconds, time_remaining_seconds, state,
                   winner_participant_id, created_at, updated_at, started_at,
                   finished_at, version
            FROM matches
            WHERE id = $1
            "#,
        )
        .bind(match_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn append_events(
        &self,
        expected_version: i64,
        next_match: &Match,
        events: &[MatchEvent],
    ) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE matches
            SET tournament_id = $1, participant1 = $2, participant2 = $3,
                score1 = $4, score2 = $5, duration_seconds = $6,
                time_remaining_seconds = $7, state = $8,
                winner_participant_id = $9, updated_at = $10, started_at = $11,
                finished_at = $12, version = $13
            WHERE id = $14 AND version = $15
            "#,
        )
        .bind(&next_match.tournament_id)
        .bind(sqlx::types::Json(&next_match.participant1))
        .bind(sqlx::types::Json(&next_match.participant2))
        .bind(sqlx::types::Json(&next_match.score1))
        .bind(sqlx::types::Json(&next_match.score2))
        .bind(next_match.duration_seconds)
        .bind(next_match.time_remaining_seconds)
        .bind(next_match.state)
        .bind(&next_match.winner_participant_id)
        .bind(next_match.updated_at)
        .bind(next_match.started_at)
        .bind(next_match.finished_at)
        .bind(next_match.version)
        .bind(&next_match.id)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::VersionConflict);
        }

        for event in events {
            sqlx::query(
                r#"
                INSERT INTO match_events
                    (id, match_id, sequence, timestamp, actor_id, participant_id, event_type, value, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(&event.id)
            .bind(&event.match_id)
            .bind(event.sequence)
            .bind(event.timestamp)
            .bind(&event.actor_id)
            .bind(&event.participant_id)
            .bind(event.event_type)
            .bind(&event.value)
            .bind(sqlx::types::Json(&event.metadata))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(next_match.version)
    }

    async fn recent_events(
        &self,
        match_id: &str,
        since_sequence: i64,
        limit: i64,
    ) -> Result<Vec<MatchEvent>, StoreError> {
        let rows = sqlx::query_as::<_, MatchEvent>(
            r#"
            SELECT id, match_id, sequence, timestamp, actor_id, participant_id, event_type, value, metadata
            FROM match_events
            WHERE match_id = $1 AND sequence > $2
            ORDER BY sequence ASC
            LIMIT $3
            "#,
        )
        .bind(match_id)
        .bind(since_sequence)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

/// In-memory store used by engine/router tests and local development without
/// Postgres. Guarded by a single mutex; fine for test-scale concurrency.
#[derive(Default)]
pub struct InMemoryMatchStore {
    inner: Mutex<HashMap<String, (Match, Vec<MatchEvent>)>>,
}

impl InMemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, m: Match) {
        let mut guard = self.inner.lock().await;
        guard.insert(m.id.clone(), (m, Vec::new()));
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl MatchStore for InMemoryMatchStore {
    async fn load_match(&self, match_id: &str) -> Result<Match, StoreError> {
        let guard = self.inner.lock().await;
        guard
            .get(match_id)
            .map(|(m, _)| m.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn append_events(
        &self,
        expected_version: i64,
        next_match: &Match,
        events: &[MatchEvent],
    ) -> Result<i64, StoreError> {
        let mut guard = self.inner.lock().await;
        let (current, log) = guard.get_mut(&next_match.id).ok_or(StoreError::NotFound)?;
        if current.version != expected_version {
            return Err(StoreError::VersionConflict);
        }
        *current = next_match.clone();
        log.extend(events.iter().cloned());
        Ok(current.version)
    }

    async fn recent_events(
        &self,
        match_id: &str,
        since_sequence: i64,
        limit: i64,
    ) -> Result<Vec<MatchEvent>, StoreError> {
        let guard = self.inner.lock().await;
        let (_, log) = guard.get(match_id).ok_or(StoreError::NotFound)?;
        Ok(log
            .iter()
            .filter(|e| e.sequence > since_sequence)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}
