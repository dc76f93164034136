use serde::{Deserialize, Serialize};

/// The kinds of score adjustment a `SCORE` command may carry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScoreKind {
    Points2,
    Advantage,
    Penalty,
    Submission,
}

/// A referee-issued intent. Every variant carries only the fields it needs;
/// the router is responsible for routing each one to `Engine::apply`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    Start,
    Pause,
    Reset,
    End,
    Cancel,
    Score {
        kind: ScoreKind,
        participant_id: String,
    },
    TimerSet {
        seconds: i64,
    },
    Comment {
        text: String,
    },
    /// Synthetic command driven by the Hub's per-match ticker (spec §4.4,
    /// auto-finish) when `timeRemainingSeconds` reaches zero while the match
    /// is in progress. Never issued directly by a client.
    TimerExpired,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start => "START",
            Command::Pause => "PAUSE",
            Command::Reset => "RESET",
            Command::End => "END",
            Command::Cancel => "CANCEL",
            Command::Score { .. } => "SCORE",
            Command::TimerSet { .. } => "TIMER_SET",
            Command::Comment { .. } => "COMMENT",
            Command::TimerExpired => "TIMER_EXPIRED",
        }
    }

    /// Whether this command may be issued by a plain client frame, as
    /// opposed to being synthesized internally by the Hub's ticker.
    pub fn is_client_issuable(&self) -> bool {
        !matches!(self, Command::TimerExpired)
    }
}
