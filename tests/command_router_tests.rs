//! Router -> Engine -> Store -> Pub/Sub round trip, exercising spec.md §8's
//! literal end-to-end scenarios against the in-memory Store and Bus.

use async_trait::async_trait;
use match_control_plane::engine::{Command, ScoreKind};
use match_control_plane::metrics::Metrics;
use match_control_plane::models::match_model::{ChannelId, Match, MatchState, Participant};
use match_control_plane::models::event::MatchEvent;
use match_control_plane::models::Role;
use match_control_plane::pubsub::{InMemoryBus, PubSubBus};
use match_control_plane::router::{CommandError, CommandRouter};
use match_control_plane::store::{EventLogAppender, InMemoryMatchStore, MatchStore, StoreError};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;

fn referee() -> HashSet<Role> {
    HashSet::from([Role::Referee])
}

fn viewer() -> HashSet<Role> {
    HashSet::from([Role::Competitor])
}

fn new_router(store: Arc<dyn MatchStore>, bus: Arc<dyn PubSubBus>) -> CommandRouter {
    let appender = EventLogAppender::new(store, 3);
    CommandRouter::new(appender, bus, Arc::new(Metrics::new()), Duration::from_secs(2))
}

async fn seed_scheduled_match(store: &InMemoryMatchStore, match_id: &str) {
    let now = Utc::now();
    let m = Match::new(
        match_id.to_string(),
        "t1".to_string(),
        Participant { id: "p1".to_string(), display_name: "A".to_string(), team: None, weight: None, grade: None },
        Participant { id: "p2".to_string(), display_name: "B".to_string(), team: None, weight: None, grade: None },
        300,
        now,
    );
    store.seed(m).await;
}

#[tokio::test]
async fn submission_finish_round_trips_through_store_and_bus() {
    let store = InMemoryMatchStore::shared();
    seed_scheduled_match(&store, "m1").await;
    let bus = InMemoryBus::shared();
    let router = new_router(store.clone(), bus.clone());

    let topic = ChannelId::Match("m1".to_string()).as_topic();
    let mut subscription = bus.subscribe(&topic).await.unwrap();

    router.route("m1", Command::Start, "ref1", &referee(), Utc::now()).await.unwrap();
    let outcome = router
        .route(
            "m1",
            Command::Score { kind: ScoreKind::Submission, participant_id: "p1".to_string() },
            "ref1",
            &referee(),
            Utc::now(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.next_match.state, MatchState::Finished);
    assert_eq!(outcome.next_match.winner_participant_id.as_deref(), Some("p1"));

    let stored = store.load_match("m1").await.unwrap();
    assert_eq!(stored.version, outcome.next_match.version);
    assert_eq!(stored.state, MatchState::Finished);

    // Both commands publish a MATCH_UPDATE; the second carries the
    // SUBMISSION + AUTO_FINISH pair.
    let first = subscription.next().await.expect("start publishes a snapshot");
    let second = subscription.next().await.expect("submission publishes a snapshot");
    assert!(String::from_utf8(first).unwrap().contains("\"START\""));
    let second_text = String::from_utf8(second).unwrap();
    assert!(second_text.contains("\"SUBMISSION\""));
    assert!(second_text.contains("\"AUTO_FINISH\""));
}

#[tokio::test]
async fn third_penalty_disqualifies_and_auto_finishes() {
    let store = InMemoryMatchStore::shared();
    seed_scheduled_match(&store, "m2").await;
    let bus = InMemoryBus::shared();
    let router = new_router(store.clone(), bus);

    router.route("m2", Command::Start, "ref1", &referee(), Utc::now()).await.unwrap();
    for _ in 0..2 {
        router
            .route(
                "m2",
                Command::Score { kind: ScoreKind::Penalty, participant_id: "p2".to_string() },
                "ref1",
                &referee(),
                Utc::now(),
            )
            .await
            .unwrap();
    }
    let outcome = router
        .route(
            "m2",
            Command::Score { kind: ScoreKind::Penalty, participant_id: "p2".to_string() },
            "ref1",
            &referee(),
            Utc::now(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.next_match.state, MatchState::Finished);
    assert_eq!(outcome.next_match.winner_participant_id.as_deref(), Some("p1"));

    // A further command against the now-terminal match is rejected, not
    // silently accepted (spec §8 boundary behavior).
    let err = router
        .route(
            "m2",
            Command::Score { kind: ScoreKind::Points2, participant_id: "p1".to_string() },
            "ref1",
            &referee(),
            Utc::now(),
        )
        .await
        .unwrap_err();
    assert_eq!(err, CommandError::MatchTerminal);
}

#[tokio::test]
async fn viewer_role_cannot_issue_score_commands() {
    let store = InMemoryMatchStore::shared();
    seed_scheduled_match(&store, "m3").await;
    let bus = InMemoryBus::shared();
    let router = new_router(store.clone(), bus);

    router.route("m3", Command::Start, "ref1", &referee(), Utc::now()).await.unwrap();
    let err = router
        .route(
            "m3",
            Command::Score { kind: ScoreKind::Points2, participant_id: "p1".to_string() },
            "viewer1",
            &viewer(),
            Utc::now(),
        )
        .await
        .unwrap_err();

    assert_eq!(err, CommandError::Unauthorized);

    let stored = store.load_match("m3").await.unwrap();
    assert_eq!(stored.score1.points, 0, "a rejected command must not mutate the match");
}

/// Wraps `InMemoryMatchStore` and forces `VersionConflict` on the first
/// `conflicts_left` append attempts, exercising the Event Log Appender's
/// reload-and-retry path (spec §4.3) without relying on real concurrency.
struct FlakyStore {
    inner: Arc<InMemoryMatchStore>,
    conflicts_left: AtomicUsize,
}

#[async_trait]
impl MatchStore for FlakyStore {
    async fn load_match(&self, match_id: &str) -> Result<Match, StoreError> {
        self.inner.load_match(match_id).await
    }

    async fn append_events(
        &self,
        expected_version: i64,
        next_match: &Match,
        events: &[MatchEvent],
    ) -> Result<i64, StoreError> {
        if self.conflicts_left.load(Ordering::Acquire) > 0 {
            self.conflicts_left.fetch_sub(1, Ordering::AcqRel);
            return Err(StoreError::VersionConflict);
        }
        self.inner.append_events(expected_version, next_match, events).await
    }

    async fn recent_events(
        &self,
        match_id: &str,
        since_sequence: i64,
        limit: i64,
    ) -> Result<Vec<MatchEvent>, StoreError> {
        self.inner.recent_events(match_id, since_sequence, limit).await
    }
}

#[tokio::test]
async fn conflict_is_retried_and_eventually_succeeds() {
    let inner = InMemoryMatchStore::shared();
    seed_scheduled_match(&inner, "m4").await;
    let store: Arc<dyn MatchStore> = Arc::new(FlakyStore { inner: inner.clone(), conflicts_left: AtomicUsize::new(2) });
    let bus = InMemoryBus::shared();
    let router = new_router(store, bus);

    let outcome = router.route("m4", Command::Start, "ref1", &referee(), Utc::now()).await.unwrap();
    assert_eq!(outcome.next_match.state, MatchState::InProgress);

    let stored = inner.load_match("m4").await.unwrap();
    assert_eq!(stored.state, MatchState::InProgress);
}

#[tokio::test]
async fn conflict_exhausting_retries_fails_the_command() {
    let inner = InMemoryMatchStore::shared();
    seed_scheduled_match(&inner, "m5").await;
    let store: Arc<dyn MatchStore> = Arc::new(FlakyStore { inner: inner.clone(), conflicts_left: AtomicUsize::new(10) });
    let bus = InMemoryBus::shared();
    let router = new_router(store, bus);

    let err = router.route("m5", Command::Start, "ref1", &referee(), Utc::now()).await.unwrap_err();
    assert_eq!(err, CommandError::Conflict);

    let stored = inner.load_match("m5").await.unwrap();
    assert_eq!(stored.state, MatchState::Scheduled, "the match must be untouched after exhausting retries");
}

#[tokio::test]
async fn sequence_numbers_stay_dense_across_the_whole_match() {
    let store = InMemoryMatchStore::shared();
    seed_scheduled_match(&store, "m6").await;
    let bus = InMemoryBus::shared();
    let router = new_router(store.clone(), bus);

    router.route("m6", Command::Start, "ref1", &referee(), Utc::now()).await.unwrap();
    for kind in [ScoreKind::Points2, ScoreKind::Advantage, ScoreKind::Penalty] {
        router
            .route("m6", Command::Score { kind, participant_id: "p1".to_string() }, "ref1", &referee(), Utc::now())
            .await
            .unwrap();
    }

    let events = store.load_match("m6").await.unwrap();
    let log = store.recent_events("m6", 0, 1000).await.unwrap();
    let sequences: Vec<i64> = log.iter().map(|e| e.sequence).collect();
    let expected: Vec<i64> = (1..=sequences.len() as i64).collect();
    assert_eq!(sequences, expected, "sequence must be dense and gap-free");
    assert_eq!(events.version, sequences.len() as i64);
}
