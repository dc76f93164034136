//! The wire frame format of spec §6.2: every frame is
//! `{type, matchId?, tournamentId?, data, timestamp, correlationId?, version?}`.

use crate::engine::{Command, Rejection, ScoreKind};
use crate::models::event::MatchEvent;
use crate::models::match_model::Match;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientFrameType {
    Ping,
    ScoreUpdate,
    MatchStateUpdate,
    TimerUpdate,
    Comment,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerFrameType {
    Pong,
    MatchUpdate,
    TimerUpdate,
    EventAppended,
    ConnectionStatus,
    Error,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientFrame {
    #[serde(rename = "type")]
    pub frame_type: ClientFrameType,
    #[serde(rename = "matchId")]
    pub match_id: Option<String>,
    #[serde(rename = "tournamentId")]
    pub tournament_id: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "correlationId")]
    pub correlation_id: Option<String>,
    pub version: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerFrame {
    #[serde(rename = "type")]
    pub frame_type: ServerFrameType,
    #[serde(rename = "matchId", skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
    #[serde(rename = "tournamentId", skip_serializing_if = "Option::is_none")]
    pub tournament_id: Option<String>,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "correlationId", skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
}

impl ServerFrame {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("ServerFrame always serializes")
    }

    pub fn pong(now: DateTime<Utc>) -> Self {
        ServerFrame {
            frame_type: ServerFrameType::Pong,
            match_id: None,
            tournament_id: None,
            data: Value::Object(Default::default()),
            timestamp: now,
            correlation_id: None,
            version: None,
        }
    }

    pub fn error(kind: &str, message: impl Into<String>, correlation_id: Option<String>, now: DateTime<Utc>) -> Self {
        ServerFrame {
            frame_type: ServerFrameType::Error,
            match_id: None,
            tournament_id: None,
            data: serde_json::json!({
                "kind": kind,
                "message": message.into(),
                "correlationId": correlation_id,
            }),
            timestamp: now,
            correlation_id: None,
            version: None,
        }
    }

    pub fn match_update(m: &Match, emitted_events: &[MatchEvent], now: DateTime<Utc>) -> Self {
        ServerFrame {
            frame_type: ServerFrameType::MatchUpdate,
            match_id: Some(m.id.clone()),
            tournament_id: Some(m.tournament_id.clone()),
            data: serde_json::json!({
                "match": m,
                "emittedEvents": emitted_events,
            }),
            timestamp: now,
            correlation_id: None,
            version: Some(m.version),
        }
    }

    pub fn event_appended(match_id: &str, events: &[MatchEvent], now: DateTime<Utc>) -> Self {
        ServerFrame {
            frame_type: ServerFrameType::EventAppended,
            match_id: Some(match_id.to_string()),
            tournament_id: None,
            data: serde_json::json!({ "events": events }),
            timestamp: now,
            correlation_id: None,
            version: events.last().map(|e| e.sequence),
        }
    }

    pub fn timer_tick(match_id: &str, time_remaining_seconds: i64, now: DateTime<Utc>) -> Self {
        ServerFrame {
            frame_type: ServerFrameType::TimerUpdate,
            match_id: Some(match_id.to_string()),
            tournament_id: None,
            data: serde_json::json!({ "timeRemainingSeconds": time_remaining_seconds }),
            timestamp: now,
            correlation_id: None,
            version: None,
        }
    }

    pub fn connection_status(status: &str, match_id: Option<String>, now: DateTime<Utc>) -> Self {
        ServerFrame {
            frame_type: ServerFrameType::ConnectionStatus,
            match_id,
            tournament_id: None,
            data: serde_json::json!({ "status": status }),
            timestamp: now,
            correlation_id: None,
            version: None,
        }
    }
}

/// Translates an inbound client frame into a `Command`, or `None` for `PING`
/// (which carries no command). Malformed shapes are `Rejection::MalformedCommand`
/// rather than a panic or a silently-dropped frame (spec §9: "Dynamic message
/// dispatch by string type" is redesigned into exhaustive, typed handling).
pub fn parse_command(frame: &ClientFrame) -> Result<Option<Command>, Rejection> {
    match frame.frame_type {
        ClientFrameType::Ping => Ok(None),
        ClientFrameType::ScoreUpdate => {
            let kind = frame
                .data
                .get("kind")
                .and_then(Value::as_str)
                .ok_or(Rejection::MalformedCommand)?;
            let kind = parse_score_kind(kind).ok_or(Rejection::MalformedCommand)?;
            let participant_id = frame
                .data
                .get("participantId")
                .and_then(Value::as_str)
                .ok_or(Rejection::MalformedCommand)?
                .to_string();
            Ok(Some(Command::Score { kind, participant_id }))
        }
        ClientFrameType::MatchStateUpdate => {
            let command = frame
                .data
                .get("command")
                .and_then(Value::as_str)
                .ok_or(Rejection::MalformedCommand)?;
            let command = match command {
                "START" => Command::Start,
                "PAUSE" => Command::Pause,
                "RESET" => Command::Reset,
                "END" => Command::End,
                "CANCEL" => Command::Cancel,
                _ => return Err(Rejection::MalformedCommand),
            };
            Ok(Some(command))
        }
        ClientFrameType::TimerUpdate => {
            let seconds = frame
                .data
                .get("seconds")
                .and_then(Value::as_i64)
                .ok_or(Rejection::MalformedCommand)?;
            Ok(Some(Command::TimerSet { seconds }))
        }
        ClientFrameType::Comment => {
            let text = frame
                .data
                .get("text")
                .and_then(Value::as_str)
                .ok_or(Rejection::MalformedCommand)?
                .to_string();
            Ok(Some(Command::Comment { text }))
        }
    }
}

fn parse_score_kind(raw: &str) -> Option<ScoreKind> {
    match raw {
        "POINTS_2" => Some(ScoreKind::Points2),
        "ADVANTAGE" => Some(ScoreKind::Advantage),
        "PENALTY" => Some(ScoreKind::Penalty),
        "SUBMISSION" => Some(ScoreKind::Submission),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(frame_type: ClientFrameType, data: Value) -> ClientFrame {
        ClientFrame {
            frame_type,
            match_id: Some("m1".to_string()),
            tournament_id: None,
            data,
            timestamp: Utc::now(),
            correlation_id: Some("c1".to_string()),
            version: None,
        }
    }

    #[test]
    fn parses_score_update() {
        let f = frame(
            ClientFrameType::ScoreUpdate,
            json!({"kind": "SUBMISSION", "participantId": "p1"}),
        );
        let cmd = parse_command(&f).unwrap().unwrap();
        assert_eq!(
            cmd,
            Command::Score {
                kind: ScoreKind::Submission,
                participant_id: "p1".to_string()
            }
        );
    }

    #[test]
    fn rejects_malformed_score_update() {
        let f = frame(ClientFrameType::ScoreUpdate, json!({"kind": "NOT_A_KIND"}));
        assert_eq!(parse_command(&f).unwrap_err(), Rejection::MalformedCommand);
    }

    #[test]
    fn ping_carries_no_command() {
        let f = frame(ClientFrameType::Ping, json!({}));
        assert_eq!(parse_command(&f).unwrap(), None);
    }
}
