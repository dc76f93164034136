//! Pure match state machine. `apply` never performs I/O and never reads the
//! system clock on its own; `now` is always supplied by the caller so the
//! function stays referentially transparent (spec §8: "equal inputs ⇒ equal
//! outputs").

use crate::engine::command::{Command, ScoreKind};
use crate::engine::rejection::Rejection;
use crate::models::event::{EventType, MatchEvent};
use crate::models::match_model::{Match, MatchState, Score};
use crate::models::Role;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::collections::HashSet;
use uuid::Uuid;

pub struct ApplyOutcome {
    pub next_match: Match,
    pub events: Vec<MatchEvent>,
}

/// The result of an auto-finish check performed after a score mutation or a
/// synthetic timer expiry.
enum AutoFinishCause {
    Submission,
    Disqualification,
    TimerExpired,
}

impl AutoFinishCause {
    fn as_str(&self) -> &'static str {
        match self {
            AutoFinishCause::Submission => "submission",
            AutoFinishCause::Disqualification => "disqualification",
            AutoFinishCause::TimerExpired => "timer_expired",
        }
    }
}

/// `Apply(match, command, actorRoles, now) -> (nextMatch, events) | Rejection`
/// as specified in spec.md §4.4.
pub fn apply(
    current: &Match,
    command: &Command,
    actor_id: &str,
    actor_roles: &HashSet<Role>,
    now: DateTime<Utc>,
) -> Result<ApplyOutcome, Rejection> {
    if command.is_client_issuable() && !actor_roles.iter().any(|r| r.can_mutate()) {
        return Err(Rejection::Unauthorized);
    }

    let mut next = current.clone();
    let mut events = Vec::new();

    match command {
        Command::Start => {
            require_one_of(current.state, &[MatchState::Scheduled, MatchState::Paused])?;
            if next.started_at.is_none() {
                next.started_at = Some(now);
            }
            next.state = MatchState::InProgress;
            push_event(&mut events, &next, actor_id, now, EventType::Start, None, Some("IN_PROGRESS".to_string()));
        }
        Command::Pause => {
            require_one_of(current.state, &[MatchState::InProgress])?;
            next.state = MatchState::Paused;
            push_event(&mut events, &next, actor_id, now, EventType::Stop, None, Some("PAUSED".to_string()));
        }
        Command::Reset => {
            require_non_terminal(current.state)?;
            next.state = MatchState::Scheduled;
            next.score1 = Score::default();
            next.score2 = Score::default();
            next.time_remaining_seconds = next.duration_seconds;
            next.started_at = None;
            next.finished_at = None;
            next.winner_participant_id = None;
            push_event(&mut events, &next, actor_id, now, EventType::Reset, None, None);
        }
        Command::End => {
            require_one_of(current.state, &[MatchState::InProgress, MatchState::Paused])?;
            finish(&mut next, &mut events, actor_id, now, None);
        }
        Command::Cancel => {
            require_non_terminal(current.state)?;
            next.state = MatchState::Cancelled;
            next.finished_at = Some(now);
            push_state_change(&mut events, &next, actor_id, now, "CANCELLED");
        }
        Command::Score { kind, participant_id } => {
            require_one_of(current.state, &[MatchState::InProgress])?;
            let score = next
                .score_for_mut(participant_id)
                .ok_or(Rejection::UnknownParticipant)?;
            apply_score(score, *kind);
            push_event(
                &mut events,
                &next,
                actor_id,
                now,
                score_event_type(*kind),
                Some(participant_id.clone()),
                None,
            );

            if let Some(cause) = auto_finish_cause(&next) {
                finish(&mut next, &mut events, actor_id, now, Some(cause));
            }
        }
        Command::TimerSet { seconds } => {
            require_non_terminal(current.state)?;
            let clamped = (*seconds).clamp(0, next.duration_seconds);
            next.time_remaining_seconds = clamped;
            push_event(
                &mut events,
                &next,
                actor_id,
                now,
                EventType::TimerUpdate,
                None,
                Some(clamped.to_string()),
            );
        }
        Command::Comment { text } => {
            push_event(
                &mut events,
                &next,
                actor_id,
                now,
                EventType::Comment,
                None,
                Some(text.clone()),
            );
        }
        Command::TimerExpired => {
            require_one_of(current.state, &[MatchState::InProgress])?;
            if next.time_remaining_seconds > 0 {
                // Nothing to do yet; the ticker fired early relative to the
                // authoritative clock. Not an error, just a no-op tick.
                return Ok(ApplyOutcome { next_match: next, events });
            }
            finish(&mut next, &mut events, actor_id, now, Some(AutoFinishCause::TimerExpired));
        }
    }

    next.updated_at = now;
    next.version = current.version + events.len() as i64;
    renumber(&mut events, current.version);

    Ok(ApplyOutcome { next_match: next, events })
}

fn require_non_terminal(state: MatchState) -> Result<(), Rejection> {
    if state.is_terminal() {
        Err(Rejection::MatchTerminal)
    } else {
        Ok(())
    }
}

fn require_one_of(state: MatchState, allowed: &[MatchState]) -> Result<(), Rejection> {
    if state.is_terminal() {
        return Err(Rejection::MatchTerminal);
    }
    if allowed.contains(&state) {
        Ok(())
    } else {
        Err(Rejection::InvalidTransition)
    }
}

fn apply_score(score: &mut Score, kind: ScoreKind) {
    match kind {
        ScoreKind::Points2 => score.points += 2,
        ScoreKind::Advantage => score.advantages += 1,
        ScoreKind::Penalty => score.penalties += 1,
        ScoreKind::Submission => score.submissions += 1,
    }
}

fn score_event_type(kind: ScoreKind) -> EventType {
    match kind {
        ScoreKind::Points2 => EventType::Points2,
        ScoreKind::Advantage => EventType::Advantage,
        ScoreKind::Penalty => EventType::Penalty,
        ScoreKind::Submission => EventType::Submission,
    }
}

/// Checks the auto-finish triggers of spec §4.4 after a score mutation:
/// any submission, or any participant crossing the penalty threshold.
fn auto_finish_cause(m: &Match) -> Option<AutoFinishCause> {
    if m.score1.submissions > 0 || m.score2.submissions > 0 {
        return Some(AutoFinishCause::Submission);
    }
    if m.score1.penalties >= 3 || m.score2.penalties >= 3 {
        return Some(AutoFinishCause::Disqualification);
    }
    None
}

/// Transitions the match to FINISHED, computes the winner via the
/// deterministic tie-break, and appends the terminating event: a manual
/// `STATE_CHANGE` for a referee-issued `END`, or an `AUTO_FINISH` for an
/// engine-triggered finish (submission, disqualification, or timer expiry).
fn finish(
    next: &mut Match,
    events: &mut Vec<MatchEvent>,
    actor_id: &str,
    now: DateTime<Utc>,
    cause: Option<AutoFinishCause>,
) {
    next.state = MatchState::Finished;
    next.finished_at = Some(now);
    next.winner_participant_id = compute_winner(next);

    match cause {
        None => push_state_change(events, next, actor_id, now, "FINISHED"),
        Some(cause) => {
            let mut metadata = HashMap::new();
            metadata.insert("cause".to_string(), cause.as_str().to_string());
            push_event(
                events,
                next,
                actor_id,
                now,
                EventType::AutoFinish,
                next.winner_participant_id.clone(),
                None,
            )
            .metadata = Some(metadata);
        }
    }
}

/// Deterministic tie-break of spec §4.4, applied on every transition to
/// FINISHED.
fn compute_winner(m: &Match) -> Option<String> {
    let (p1, p2) = (m.participant1.id.as_str(), m.participant2.id.as_str());
    let (s1, s2) = (m.score1, m.score2);

    match (s1.submissions > 0, s2.submissions > 0) {
        (true, false) => return Some(p1.to_string()),
        (false, true) => return Some(p2.to_string()),
        _ => {}
    }

    match (s1.penalties >= 3, s2.penalties >= 3) {
        (true, false) => return Some(p2.to_string()),
        (false, true) => return Some(p1.to_string()),
        _ => {}
    }

    if s1.points != s2.points {
        return Some(if s1.points > s2.points { p1 } else { p2 }.to_string());
    }
    if s1.advantages != s2.advantages {
        return Some(if s1.advantages > s2.advantages { p1 } else { p2 }.to_string());
    }
    if s1.penalties != s2.penalties {
        return Some(if s1.penalties < s2.penalties { p1 } else { p2 }.to_string());
    }
    None
}

fn push_state_change(
    events: &mut Vec<MatchEvent>,
    next: &Match,
    actor_id: &str,
    now: DateTime<Utc>,
    value: &str,
) {
    push_event(events, next, actor_id, now, EventType::StateChange, None, Some(value.to_string()));
}

fn push_event(
    events: &mut Vec<MatchEvent>,
    next: &Match,
    actor_id: &str,
    now: DateTime<Utc>,
    event_type: EventType,
    participant_id: Option<String>,
    value: Option<String>,
) -> &mut MatchEvent {
    events.push(MatchEvent {
        id: Uuid::new_v4().to_string(),
        match_id: next.id.clone(),
        // Provisional; `renumber` below fixes these up against the match's
        // pre-command version once every event for this command is known.
        sequence: 0,
        timestamp: now,
        actor_id: actor_id.to_string(),
        participant_id,
        event_type,
        value,
        metadata: None,
    });
    events.last_mut().unwrap()
}

fn renumber(events: &mut [MatchEvent], base_version: i64) {
    for (i, event) in events.iter_mut().enumerate() {
        event.sequence = base_version + i as i64 + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::match_model::Participant;

    fn referee() -> HashSet<Role> {
        HashSet::from([Role::Referee])
    }

    fn viewer() -> HashSet<Role> {
        HashSet::from([Role::Competitor])
    }

    fn new_match(now: DateTime<Utc>) -> Match {
        Match::new(
            "m1".to_string(),
            "t1".to_string(),
            Participant { id: "p1".to_string(), display_name: "A".to_string(), team: None, weight: None, grade: None },
            Participant { id: "p2".to_string(), display_name: "B".to_string(), team: None, weight: None, grade: None },
            300,
            now,
        )
    }

    fn in_progress(now: DateTime<Utc>) -> Match {
        apply(&new_match(now), &Command::Start, "ref1", &referee(), now).unwrap().next_match
    }

    #[test]
    fn submission_auto_finishes_and_awards_winner() {
        let now = Utc::now();
        let current = in_progress(now);
        let outcome = apply(
            &current,
            &Command::Score { kind: ScoreKind::Submission, participant_id: "p1".to_string() },
            "ref1",
            &referee(),
            now,
        )
        .unwrap();

        assert_eq!(outcome.next_match.state, MatchState::Finished);
        assert_eq!(outcome.next_match.winner_participant_id.as_deref(), Some("p1"));
        assert_eq!(outcome.events.len(), 2);
        assert_eq!(outcome.events[1].event_type, EventType::AutoFinish);
        assert_eq!(outcome.events[1].metadata.as_ref().unwrap().get("cause").unwrap(), "submission");
    }

    #[test]
    fn third_penalty_disqualifies_the_penalized_participant() {
        let now = Utc::now();
        let mut current = in_progress(now);
        for _ in 0..2 {
            current = apply(
                &current,
                &Command::Score { kind: ScoreKind::Penalty, participant_id: "p1".to_string() },
                "ref1",
                &referee(),
                now,
            )
            .unwrap()
            .next_match;
        }

        let outcome = apply(
            &current,
            &Command::Score { kind: ScoreKind::Penalty, participant_id: "p1".to_string() },
            "ref1",
            &referee(),
            now,
        )
        .unwrap();

        assert_eq!(outcome.next_match.state, MatchState::Finished);
        assert_eq!(outcome.next_match.winner_participant_id.as_deref(), Some("p2"));
    }

    #[test]
    fn non_mutating_role_is_rejected() {
        let now = Utc::now();
        let current = in_progress(now);
        let err = apply(
            &current,
            &Command::Score { kind: ScoreKind::Points2, participant_id: "p1".to_string() },
            "viewer1",
            &viewer(),
            now,
        )
        .unwrap_err();

        assert_eq!(err, Rejection::Unauthorized);
    }

    #[test]
    fn sequence_numbers_stay_dense_across_commands() {
        let now = Utc::now();
        let mut current = in_progress(now);
        let mut last_sequence = 0;
        for kind in [ScoreKind::Points2, ScoreKind::Advantage, ScoreKind::Penalty] {
            let outcome = apply(
                &current,
                &Command::Score { kind, participant_id: "p1".to_string() },
                "ref1",
                &referee(),
                now,
            )
            .unwrap();
            for event in &outcome.events {
                assert_eq!(event.sequence, last_sequence + 1);
                last_sequence = event.sequence;
            }
            assert_eq!(outcome.next_match.version, last_sequence);
            current = outcome.next_match;
        }
    }

    #[test]
    fn score_on_unknown_participant_is_rejected() {
        let now = Utc::now();
        let current = in_progress(now);
        let err = apply(
            &current,
            &Command::Score { kind: ScoreKind::Points2, participant_id: "nobody".to_string() },
            "ref1",
            &referee(),
            now,
        )
        .unwrap_err();

        assert_eq!(err, Rejection::UnknownParticipant);
    }

    #[test]
    fn commands_on_a_terminal_match_are_rejected() {
        let now = Utc::now();
        let current = apply(&in_progress(now), &Command::Cancel, "ref1", &referee(), now).unwrap().next_match;
        let err = apply(&current, &Command::Start, "ref1", &referee(), now).unwrap_err();
        assert_eq!(err, Rejection::MatchTerminal);
    }
}
