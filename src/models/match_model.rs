use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A grappling match under live control-plane management.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Match {
    pub id: String,
    pub tournament_id: String,
    #[sqlx(json)]
    pub participant1: Participant,
    #[sqlx(json)]
    pub participant2: Participant,
    #[sqlx(json)]
    pub score1: Score,
    #[sqlx(json)]
    pub score2: Score,
    pub duration_seconds: i64,
    pub time_remaining_seconds: i64,
    pub state: MatchState,
    pub winner_participant_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl Match {
    pub fn new(id: String, tournament_id: String, participant1: Participant, participant2: Participant, duration_seconds: i64, now: DateTime<Utc>) -> Self {
        Self {
            id,
            tournament_id,
            participant1,
            participant2,
            score1: Score::default(),
            score2: Score::default(),
            duration_seconds,
            time_remaining_seconds: duration_seconds,
            state: MatchState::Scheduled,
            winner_participant_id: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            version: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, MatchState::Finished | MatchState::Cancelled)
    }

    pub fn participant_ids(&self) -> (&str, &str) {
        (&self.participant1.id, &self.participant2.id)
    }

    pub fn score_for(&self, participant_id: &str) -> Option<&Score> {
        if self.participant1.id == participant_id {
            Some(&self.score1)
        } else if self.participant2.id == participant_id {
            Some(&self.score2)
        } else {
            None
        }
    }

    pub fn score_for_mut(&mut self, participant_id: &str) -> Option<&mut Score> {
        if self.participant1.id == participant_id {
            Some(&mut self.score1)
        } else if self.participant2.id == participant_id {
            Some(&mut self.score2)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    pub team: Option<String>,
    pub weight: Option<f64>,
    pub grade: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Score {
    pub points: u32,
    pub advantages: u32,
    pub penalties: u32,
    pub submissions: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "match_control_state", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchState {
    Scheduled,
    InProgress,
    Paused,
    Finished,
    Cancelled,
}

impl MatchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, MatchState::Finished | MatchState::Cancelled)
    }
}

/// Opaque fan-out topic identifier, either `match:{id}` or `tournament:{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ChannelId {
    Match(String),
    Tournament(String),
}

impl ChannelId {
    pub fn as_topic(&self) -> String {
        match self {
            ChannelId::Match(id) => format!("match:{id}"),
            ChannelId::Tournament(id) => format!("tournament:{id}"),
        }
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_topic())
    }
}
