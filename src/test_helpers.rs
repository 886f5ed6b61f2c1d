//! Shared fixtures and scripted collaborators for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::catalog::SlideCatalog;
use crate::model::{PermanentAdjustment, ScoredRoundRecord, Session, SessionStatus, SlideDefinition, TeamDecision};
use crate::store::{SessionStore, StoreError};
use crate::transport::{EventTransport, Subscription, TransportError, TransportMessage};

// =============================================================================
// FIXTURES
// =============================================================================

pub fn slide(id: u32, kind: &str, round_number: u32, key: Option<&str>, timer_seconds: Option<u32>) -> SlideDefinition {
    SlideDefinition {
        id,
        kind: kind.into(),
        round_number,
        interactive_key: key.map(str::to_owned),
        timer_seconds,
        title: None,
    }
}

/// Positions:
/// 0 video r1, 1 `interactive_invest` r1 (rd1-invest, 120s), 2 kpi r1,
/// 3 `interactive_choice` r1 (ch1), 4 consequence r1 (ch1), 5 `kpi_reset` r2,
/// 6 `interactive_invest` r2 (rd2-invest), 7 kpi r2.
pub fn catalog() -> Arc<SlideCatalog> {
    let slides = vec![
        slide(10, "video", 1, None, None),
        slide(11, "interactive_invest", 1, Some("rd1-invest"), Some(120)),
        slide(12, "kpi", 1, None, None),
        slide(13, "interactive_choice", 1, Some("ch1"), None),
        slide(14, "consequence", 1, Some("ch1"), None),
        slide(15, "kpi_reset", 2, None, None),
        slide(16, "interactive_invest", 2, Some("rd2-invest"), None),
        slide(17, "kpi", 2, None, None),
    ];
    Arc::new(SlideCatalog::new(slides).unwrap())
}

pub fn record(team_id: Uuid, round_number: u32, capacity: f64) -> ScoredRoundRecord {
    ScoredRoundRecord {
        team_id,
        round_number,
        capacity,
        orders: 1_000.0,
        cost: 250_000.0,
        price: 310.0,
        revenue: Some(310_000.0),
        margin: Some(0.19),
        income: None,
    }
}

pub fn decision(team_id: Uuid, phase_key: &str) -> TeamDecision {
    decision_at(team_id, phase_key, 0)
}

pub fn decision_at(team_id: Uuid, phase_key: &str, minute: i64) -> TeamDecision {
    TeamDecision {
        id: Uuid::new_v4(),
        team_id,
        phase_key: phase_key.into(),
        round_number: 1,
        submitted_at: OffsetDateTime::UNIX_EPOCH + time::Duration::minutes(minute),
    }
}

pub fn adjustment(team_id: Uuid, kpi_key: &str, change_value: f64, applies_from_round: u32) -> PermanentAdjustment {
    PermanentAdjustment {
        id: Uuid::new_v4(),
        team_id,
        challenge_id: "ch1".into(),
        kpi_key: kpi_key.into(),
        change_value,
        applies_from_round,
    }
}

// =============================================================================
// MOCK STORE
// =============================================================================

#[derive(Default)]
struct MockStoreInner {
    session: Option<Session>,
    rounds: HashMap<u32, ScoredRoundRecord>,
    round_scripts: HashMap<u32, VecDeque<Option<ScoredRoundRecord>>>,
    decisions: Vec<TeamDecision>,
    adjustments: Vec<PermanentAdjustment>,
    failing: bool,
    round_calls: Vec<(u32, Instant)>,
    session_calls: usize,
    decision_calls: usize,
    adjustment_calls: usize,
    next_session_delay: Option<Duration>,
}

/// In-memory store whose contents tests mutate between reads.
#[derive(Default)]
pub struct MockStore {
    inner: Mutex<MockStoreInner>,
}

impl MockStore {
    pub fn with_session(session_id: Uuid, position: usize) -> Arc<Self> {
        let store = Self::default();
        store.set_position(session_id, position);
        Arc::new(store)
    }

    pub fn set_position(&self, session_id: Uuid, position: usize) {
        self.inner.lock().unwrap().session = Some(Session {
            id: session_id,
            current_slide_position: Some(position),
            status: SessionStatus::Active,
        });
    }

    pub fn mark_deleted(&self) {
        if let Some(session) = self.inner.lock().unwrap().session.as_mut() {
            session.status = SessionStatus::Deleted;
        }
    }

    pub fn set_round(&self, record: ScoredRoundRecord) {
        self.inner.lock().unwrap().rounds.insert(record.round_number, record);
    }

    /// Responses returned for `round`, one per call, before falling back to
    /// the plain round table.
    pub fn script_round(&self, round: u32, responses: Vec<Option<ScoredRoundRecord>>) {
        self.inner.lock().unwrap().round_scripts.insert(round, responses.into());
    }

    pub fn set_decisions(&self, decisions: Vec<TeamDecision>) {
        self.inner.lock().unwrap().decisions = decisions;
    }

    pub fn remove_decision(&self, decision_id: Uuid) {
        self.inner.lock().unwrap().decisions.retain(|d| d.id != decision_id);
    }

    pub fn push_decision(&self, decision: TeamDecision) {
        self.inner.lock().unwrap().decisions.push(decision);
    }

    pub fn set_adjustments(&self, adjustments: Vec<PermanentAdjustment>) {
        self.inner.lock().unwrap().adjustments = adjustments;
    }

    pub fn set_failing(&self, failing: bool) {
        self.inner.lock().unwrap().failing = failing;
    }

    /// The next session read captures the row immediately but returns it
    /// only after `delay`.
    pub fn delay_next_session(&self, delay: Duration) {
        self.inner.lock().unwrap().next_session_delay = Some(delay);
    }

    pub fn round_calls(&self) -> Vec<(u32, Instant)> {
        self.inner.lock().unwrap().round_calls.clone()
    }

    pub fn calls_for_round(&self, round: u32) -> usize {
        self.round_calls().iter().filter(|(r, _)| *r == round).count()
    }

    pub fn session_calls(&self) -> usize {
        self.inner.lock().unwrap().session_calls
    }

    pub fn decision_calls(&self) -> usize {
        self.inner.lock().unwrap().decision_calls
    }

    pub fn adjustment_calls(&self) -> usize {
        self.inner.lock().unwrap().adjustment_calls
    }
}

fn unavailable() -> StoreError {
    StoreError::Database(sqlx::Error::PoolTimedOut)
}

#[async_trait::async_trait]
impl SessionStore for MockStore {
    async fn get_session(&self, _session_id: Uuid) -> Result<Option<Session>, StoreError> {
        let (result, delay) = {
            let mut inner = self.inner.lock().unwrap();
            inner.session_calls += 1;
            let result = if inner.failing { Err(unavailable()) } else { Ok(inner.session.clone()) };
            (result, inner.next_session_delay.take())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn get_scored_round(
        &self,
        _session_id: Uuid,
        _team_id: Uuid,
        round: u32,
    ) -> Result<Option<ScoredRoundRecord>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.round_calls.push((round, Instant::now()));
        if inner.failing {
            return Err(unavailable());
        }
        if let Some(scripted) = inner.round_scripts.get_mut(&round).and_then(VecDeque::pop_front) {
            return Ok(scripted);
        }
        Ok(inner.rounds.get(&round).cloned())
    }

    async fn get_decisions_for_session(&self, _session_id: Uuid) -> Result<Vec<TeamDecision>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.decision_calls += 1;
        if inner.failing {
            return Err(unavailable());
        }
        Ok(inner.decisions.clone())
    }

    async fn get_adjustments(&self, _session_id: Uuid, team_id: Uuid) -> Result<Vec<PermanentAdjustment>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.adjustment_calls += 1;
        if inner.failing {
            return Err(unavailable());
        }
        Ok(inner
            .adjustments
            .iter()
            .filter(|a| a.team_id == team_id)
            .cloned()
            .collect())
    }
}

// =============================================================================
// MOCK TRANSPORT
// =============================================================================

struct MockTransportInner {
    subscribe_calls: usize,
    senders: Vec<mpsc::Sender<TransportMessage>>,
    auto_ack: bool,
    failing: bool,
}

/// In-process transport. Each subscribe opens a fresh channel; tests push
/// events into the newest one and can sever every open subscription.
pub struct MockTransport {
    inner: Mutex<MockTransportInner>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(MockTransportInner {
                subscribe_calls: 0,
                senders: Vec::new(),
                auto_ack: true,
                failing: false,
            }),
        })
    }

    /// Subscriptions are opened but never acknowledged.
    pub fn without_ack() -> Arc<Self> {
        let transport = Self::new();
        transport.inner.lock().unwrap().auto_ack = false;
        transport
    }

    pub fn set_failing(&self, failing: bool) {
        self.inner.lock().unwrap().failing = failing;
    }

    pub fn subscribe_calls(&self) -> usize {
        self.inner.lock().unwrap().subscribe_calls
    }

    pub fn active_subscriptions(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .senders
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    fn latest_sender(&self) -> Option<mpsc::Sender<TransportMessage>> {
        self.inner
            .lock()
            .unwrap()
            .senders
            .iter()
            .rev()
            .find(|tx| !tx.is_closed())
            .cloned()
    }

    /// Deliver a raw payload on the newest open subscription. Returns false
    /// when nothing is subscribed.
    pub async fn publish(&self, payload: serde_json::Value) -> bool {
        let Some(tx) = self.latest_sender() else {
            return false;
        };
        tx.send(TransportMessage::Event(payload)).await.is_ok()
    }

    pub async fn ack_latest(&self) -> bool {
        let Some(tx) = self.latest_sender() else {
            return false;
        };
        tx.send(TransportMessage::Subscribed).await.is_ok()
    }

    /// Close every open subscription with `reason`.
    pub async fn drop_connections(&self, reason: &str) {
        let senders: Vec<_> = self.inner.lock().unwrap().senders.drain(..).collect();
        for tx in senders {
            if tx.send(TransportMessage::Closed { reason: reason.into() }).await.is_err() {
                continue;
            }
        }
    }
}

#[async_trait::async_trait]
impl EventTransport for MockTransport {
    async fn subscribe(&self, _session_id: Uuid) -> Result<Subscription, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.subscribe_calls += 1;
        if inner.failing {
            return Err(TransportError::Connect(Box::new(tokio_tungstenite::tungstenite::Error::ConnectionClosed)));
        }
        let (tx, rx) = mpsc::channel(64);
        if inner.auto_ack {
            tx.try_send(TransportMessage::Subscribed).unwrap();
        }
        inner.senders.push(tx);
        Ok(Subscription::new(rx))
    }
}
