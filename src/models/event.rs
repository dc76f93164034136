use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An immutable record of an accepted match mutation. `sequence` is dense and
/// gap-free per match (invariant I1); `version` on `Match` always equals the
/// sequence of the most recently appended event (invariant I2).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MatchEvent {
    pub id: String,
    pub match_id: String,
    pub sequence: i64,
    pub timestamp: DateTime<Utc>,
    pub actor_id: String,
    pub participant_id: Option<String>,
    #[sqlx(rename = "event_type")]
    pub event_type: EventType,
    pub value: Option<String>,
    #[sqlx(json)]
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "match_event_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Points2,
    Advantage,
    Penalty,
    Submission,
    Start,
    Stop,
    Reset,
    Comment,
    MatchCreated,
    StateChange,
    TimerUpdate,
    AutoFinish,
}
