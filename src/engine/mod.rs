//! Reconciliation engine: one actor per (session, team).
//!
//! DESIGN
//! ======
//! [`SyncClient::open`] spawns an actor task that owns every piece of
//! mutable state: the subscription, the synchronizers, in-flight fetches
//! and all timers. A single `select!` loop multiplexes
//!
//! - caller commands (`refresh`, `close`),
//! - the pending subscribe attempt and the live subscription,
//! - fetch completions from a `JoinSet`,
//! - single-slot timers (ack timeout, reconnect, poll, metric settle,
//!   reset debounce, countdown tick).
//!
//! Fetches never run on the loop. Each one is tagged with a generation from
//! the [`RequestSequencer`] and its result is applied only if no newer
//! fetch of the same kind was issued since. Reconciled state is published
//! as one [`SyncView`] through a `watch` channel; callers never block on
//! the engine.
//!
//! Convergence does not depend on push delivery. Every (re)connect runs a
//! full resync, and the fallback poll runs the same resync on a timer that
//! tightens while the subscription is down.
//!
//! ERROR HANDLING
//! ==============
//! Nothing here is fatal. Store and transport failures are logged with
//! their error code and the previous values stay on screen. A deleted
//! session is terminal: timers stop, fetches are aborted and the view
//! carries `session_deleted = true`.

pub mod snapshot;
pub mod supervisor;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::SlideCatalog;
use crate::config::SyncConfig;
use crate::error::ErrorCode;
use crate::event::SessionEvent;
use crate::model::{PermanentAdjustment, ScoredRoundRecord, Session, TeamDecision};
use crate::store::{SessionStore, StoreError};
use crate::sync::adjustment;
use crate::sync::decision::{DecisionTracker, DeleteReaction};
use crate::sync::metric::{self, MetricResolution, RetryPolicy};
use crate::sync::sequence::{FetchKey, RequestSequencer};
use crate::sync::slide::{Countdown, CurrentSlide, SlideOutcome, SlideSync};
use crate::sync::timer::TimerSlot;
use crate::transport::{EventTransport, Subscription, TransportError, TransportMessage};

use self::supervisor::{ConnectionState, ConnectionSupervisor};

const COMMAND_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OpenError {
    #[error("session and team ids must be non-nil (session={session_id}, team={team_id})")]
    InvalidKeys { session_id: Uuid, team_id: Uuid },
}

impl ErrorCode for OpenError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidKeys { .. } => "E_INVALID_KEYS",
        }
    }
}

// =============================================================================
// VIEW
// =============================================================================

/// Which reads are currently in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadingFlags {
    pub session: bool,
    pub decisions: bool,
    pub metrics: bool,
    pub adjustments: bool,
}

/// Everything the UI renders for one team.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncView {
    pub slide: Option<CurrentSlide>,
    pub decision_active: bool,
    pub submitted_phase_keys: Vec<String>,
    pub metrics: Option<ScoredRoundRecord>,
    /// True when `metrics` is the previous round standing in for one that
    /// has not been scored yet.
    pub metrics_fallback: bool,
    pub adjustments: Vec<PermanentAdjustment>,
    pub connection: ConnectionState,
    pub reset_counter: u64,
    pub loading: LoadingFlags,
    pub countdown_remaining: Option<u32>,
    pub session_deleted: bool,
}

// =============================================================================
// CLIENT
// =============================================================================

/// Owns at most one running engine.
pub struct SyncClient {
    store: Arc<dyn SessionStore>,
    transport: Arc<dyn EventTransport>,
    catalog: Arc<SlideCatalog>,
    config: SyncConfig,
    active: Option<SyncHandle>,
}

impl SyncClient {
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        transport: Arc<dyn EventTransport>,
        catalog: Arc<SlideCatalog>,
        config: SyncConfig,
    ) -> Self {
        Self { store, transport, catalog, config, active: None }
    }

    /// Start (or reuse) the engine for `(session_id, team_id)`.
    ///
    /// Re-opening the running keys returns the existing handle. Opening
    /// different keys closes the running engine first.
    ///
    /// # Errors
    ///
    /// Returns [`OpenError::InvalidKeys`] if either id is nil.
    pub async fn open(&mut self, session_id: Uuid, team_id: Uuid) -> Result<SyncHandle, OpenError> {
        if session_id.is_nil() || team_id.is_nil() {
            return Err(OpenError::InvalidKeys { session_id, team_id });
        }

        if let Some(active) = &self.active {
            if active.session_id == session_id && active.team_id == team_id && !active.is_closed() {
                return Ok(active.clone());
            }
        }
        self.close().await;

        let handle = spawn_engine(
            session_id,
            team_id,
            Arc::clone(&self.store),
            Arc::clone(&self.transport),
            Arc::clone(&self.catalog),
            self.config,
        );
        self.active = Some(handle.clone());
        Ok(handle)
    }

    /// Close the running engine, if any.
    pub async fn close(&mut self) {
        if let Some(active) = self.active.take() {
            active.close().await;
        }
    }

    #[must_use]
    pub fn active(&self) -> Option<&SyncHandle> {
        self.active.as_ref()
    }
}

// =============================================================================
// HANDLE
// =============================================================================

#[derive(Debug)]
enum Command {
    Refresh,
    Close(oneshot::Sender<()>),
}

/// Cheap, cloneable access to one running engine.
#[derive(Clone, Debug)]
pub struct SyncHandle {
    session_id: Uuid,
    team_id: Uuid,
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<SyncView>,
}

impl SyncHandle {
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    #[must_use]
    pub fn team_id(&self) -> Uuid {
        self.team_id
    }

    /// Latest published view.
    #[must_use]
    pub fn view(&self) -> SyncView {
        self.view.borrow().clone()
    }

    /// Receiver notified on every view change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SyncView> {
        self.view.clone()
    }

    /// Request a full resync. Coalesces with resyncs already queued.
    pub fn refresh(&self) {
        if self.commands.try_send(Command::Refresh).is_err() {
            debug!(session_id = %self.session_id, "refresh dropped; engine busy or closed");
        }
    }

    /// Stop the engine. Once this returns, no further view is published.
    pub async fn close(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(Command::Close(ack_tx)).await.is_err() {
            return;
        }
        if ack_rx.await.is_err() {
            debug!(session_id = %self.session_id, "engine exited before acknowledging close");
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

fn spawn_engine(
    session_id: Uuid,
    team_id: Uuid,
    store: Arc<dyn SessionStore>,
    transport: Arc<dyn EventTransport>,
    catalog: Arc<SlideCatalog>,
    config: SyncConfig,
) -> SyncHandle {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (view_tx, view_rx) = watch::channel(SyncView::default());

    let engine = Engine {
        session_id,
        team_id,
        store,
        transport,
        slides: SlideSync::new(catalog),
        policy: RetryPolicy::from(&config),
        config,
        commands: command_rx,
        view: view_tx,
        supervisor: ConnectionSupervisor::new(&config),
        connect_task: None,
        subscription: None,
        fetches: JoinSet::new(),
        sequencer: RequestSequencer::new(),
        metric_task: None,
        decisions: DecisionTracker::new(team_id),
        countdown: Countdown::default(),
        metrics: None,
        adjustments: Vec::new(),
        poll: TimerSlot::new(),
        metric_settle: TimerSlot::new(),
        reset_debounce: TimerSlot::new(),
        countdown_tick: TimerSlot::new(),
        terminated: false,
    };

    tokio::spawn(async move {
        if let Some(ack) = engine.run().await {
            if ack.send(()).is_err() {
                debug!(%session_id, "close requester went away");
            }
        }
    });

    SyncHandle { session_id, team_id, commands: command_tx, view: view_rx }
}

// =============================================================================
// ACTOR
// =============================================================================

enum FetchOutcome {
    Session { generation: u64, result: Result<Option<Session>, StoreError> },
    Decisions { generation: u64, result: Result<Vec<TeamDecision>, StoreError> },
    Metrics { generation: u64, position: usize, result: Result<MetricResolution, StoreError> },
    Adjustments { generation: u64, result: Result<Vec<PermanentAdjustment>, StoreError> },
}

type ConnectResult = Result<Subscription, TransportError>;

struct Engine {
    session_id: Uuid,
    team_id: Uuid,
    store: Arc<dyn SessionStore>,
    transport: Arc<dyn EventTransport>,
    config: SyncConfig,
    policy: RetryPolicy,
    commands: mpsc::Receiver<Command>,
    view: watch::Sender<SyncView>,

    supervisor: ConnectionSupervisor,
    connect_task: Option<JoinHandle<ConnectResult>>,
    subscription: Option<Subscription>,

    fetches: JoinSet<FetchOutcome>,
    sequencer: RequestSequencer,
    metric_task: Option<AbortHandle>,

    slides: SlideSync,
    decisions: DecisionTracker,
    countdown: Countdown,
    metrics: Option<ScoredRoundRecord>,
    adjustments: Vec<PermanentAdjustment>,

    poll: TimerSlot,
    metric_settle: TimerSlot,
    reset_debounce: TimerSlot,
    countdown_tick: TimerSlot,
    terminated: bool,
}

/// Next message from the subscription; pending while there is none.
async fn next_message(subscription: &mut Option<Subscription>) -> Option<TransportMessage> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

/// Result of the in-flight subscribe attempt; pending while there is none.
async fn connect_finished(task: &mut Option<JoinHandle<ConnectResult>>) -> Result<ConnectResult, JoinError> {
    match task {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}

impl Engine {
    /// Drive the engine until closed. Returns the close acknowledgement to
    /// send once all engine state has been dropped.
    async fn run(mut self) -> Option<oneshot::Sender<()>> {
        info!(session_id = %self.session_id, team_id = %self.team_id, "engine: started");
        self.resync();
        self.start_connect();
        self.publish();

        let ack = loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Refresh) => self.resync(),
                    Some(Command::Close(ack)) => break Some(ack),
                    None => break None,
                },
                joined = connect_finished(&mut self.connect_task) => {
                    self.connect_task = None;
                    self.on_connect_finished(joined);
                }
                message = next_message(&mut self.subscription) => self.on_transport_message(message),
                Some(joined) = self.fetches.join_next(), if !self.fetches.is_empty() => self.on_fetch(joined),
                () = self.supervisor.ack_expired() => {
                    warn!(session_id = %self.session_id, "subscribe not acknowledged in time");
                    self.connection_lost();
                }
                () = self.supervisor.reconnect_due() => self.start_connect(),
                () = self.poll.fired() => {
                    debug!(session_id = %self.session_id, state = ?self.supervisor.state(), "poll tick");
                    self.resync();
                }
                () = self.metric_settle.fired() => {
                    self.metric_settle.cancel();
                    self.start_metric_resolution();
                }
                () = self.reset_debounce.fired() => {
                    self.reset_debounce.cancel();
                    let counter = self.decisions.commit_reset();
                    info!(session_id = %self.session_id, reset_counter = counter, "decision reset");
                }
                () = self.countdown_tick.fired() => self.schedule_countdown_tick(),
            }
            self.publish();
        };

        info!(session_id = %self.session_id, "engine: stopped");
        ack
    }

    // -------------------------------------------------------------------------
    // Connection
    // -------------------------------------------------------------------------

    fn start_connect(&mut self) {
        if self.terminated {
            return;
        }
        self.drop_subscription();
        self.supervisor.begin_attempt();

        let transport = Arc::clone(&self.transport);
        let session_id = self.session_id;
        self.connect_task = Some(tokio::spawn(async move { transport.subscribe(session_id).await }));
        debug!(%session_id, "subscribing");
    }

    fn drop_subscription(&mut self) {
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        self.subscription = None;
    }

    fn on_connect_finished(&mut self, joined: Result<ConnectResult, JoinError>) {
        match joined {
            Ok(Ok(subscription)) => self.subscription = Some(subscription),
            Ok(Err(e)) => {
                warn!(session_id = %self.session_id, code = e.error_code(), error = %e, "subscribe failed");
                self.connection_lost();
            }
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "subscribe task failed");
                self.connection_lost();
            }
        }
    }

    fn on_transport_message(&mut self, message: Option<TransportMessage>) {
        match message {
            Some(TransportMessage::Subscribed) => {
                if self.supervisor.on_subscribed() {
                    info!(session_id = %self.session_id, "subscription acknowledged; resyncing");
                    self.resync();
                }
            }
            Some(TransportMessage::Event(payload)) => match SessionEvent::from_value(payload) {
                Ok(event) => self.on_event(event),
                Err(e) => warn!(session_id = %self.session_id, code = e.error_code(), error = %e, "dropping malformed event"),
            },
            Some(TransportMessage::Closed { reason }) => {
                info!(session_id = %self.session_id, %reason, "subscription closed");
                self.connection_lost();
            }
            None => {
                info!(session_id = %self.session_id, "subscription ended");
                self.connection_lost();
            }
        }
    }

    fn connection_lost(&mut self) {
        self.drop_subscription();
        if self.terminated {
            return;
        }
        let delay = self.supervisor.on_lost();
        self.poll.schedule_if_sooner(self.config.degraded_poll_interval);
        info!(session_id = %self.session_id, retry_ms = delay.as_millis(), "disconnected; reconnect scheduled");
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    fn on_event(&mut self, event: SessionEvent) {
        if self.terminated {
            return;
        }
        debug!(session_id = %self.session_id, kind = event.kind(), "event");
        match event {
            SessionEvent::SlideChanged { position } => {
                // Session reads issued before this push carry an older position.
                self.sequencer.supersede(FetchKey::Session);
                self.apply_position(position);
            }
            SessionEvent::DecisionDeleted { decision_id, team_id, phase_key } => {
                if self.decisions.on_delete_event(decision_id, team_id, &phase_key) == DeleteReaction::Refresh {
                    self.fetch_decisions();
                }
            }
            SessionEvent::MetricUpdated { team_id, round_number, .. } => {
                let concerns = self
                    .slides
                    .current()
                    .is_some_and(|current| metric::update_concerns(team_id, round_number, self.team_id, &current.slide));
                if concerns {
                    self.start_metric_resolution();
                }
            }
            SessionEvent::AdjustmentAdded { team_id, .. } => {
                if team_id == self.team_id {
                    self.fetch_adjustments();
                }
            }
            SessionEvent::SessionDeleted => self.terminate(),
            SessionEvent::DecisionClosed { phase_key } => {
                self.slides.close_decision(&phase_key);
            }
            SessionEvent::SlideReopened { slide_id } => {
                if let Err(e) = self.slides.reopen_slide(slide_id) {
                    warn!(session_id = %self.session_id, code = e.error_code(), error = %e, "cannot reopen slide");
                }
            }
        }
    }

    fn apply_position(&mut self, position: usize) {
        match self.slides.on_slide_changed(position) {
            Ok(SlideOutcome::Changed(current)) => {
                debug!(session_id = %self.session_id, position, slide_id = current.slide.id, "slide changed");
                self.countdown.start(current.slide.timer_seconds, Instant::now());
                self.schedule_countdown_tick();
                self.metric_settle.schedule(self.config.metric_settle);
            }
            Ok(SlideOutcome::Unchanged) => {}
            Err(e) => warn!(session_id = %self.session_id, code = e.error_code(), error = %e, "unknown slide position"),
        }
    }

    fn schedule_countdown_tick(&mut self) {
        match self.countdown.next_tick(Instant::now()) {
            Some(after) => self.countdown_tick.schedule(after),
            None => self.countdown_tick.cancel(),
        }
    }

    // -------------------------------------------------------------------------
    // Fetches
    // -------------------------------------------------------------------------

    /// Re-read session, decisions and adjustments; metrics follow once the
    /// session position is known. Also re-arms the poll.
    fn resync(&mut self) {
        if self.terminated {
            return;
        }
        self.fetch_session();
        self.fetch_decisions();
        self.fetch_adjustments();

        let interval = if self.supervisor.state() == ConnectionState::Connected {
            self.config.poll_interval
        } else {
            self.config.degraded_poll_interval
        };
        self.poll.schedule(interval);
    }

    fn fetch_session(&mut self) {
        let generation = self.sequencer.issue(FetchKey::Session);
        let store = Arc::clone(&self.store);
        let session_id = self.session_id;
        self.fetches.spawn(async move {
            FetchOutcome::Session { generation, result: store.get_session(session_id).await }
        });
    }

    fn fetch_decisions(&mut self) {
        let generation = self.sequencer.issue(FetchKey::Decisions);
        let store = Arc::clone(&self.store);
        let session_id = self.session_id;
        self.fetches.spawn(async move {
            FetchOutcome::Decisions { generation, result: store.get_decisions_for_session(session_id).await }
        });
    }

    fn fetch_adjustments(&mut self) {
        let generation = self.sequencer.issue(FetchKey::Adjustments);
        let store = Arc::clone(&self.store);
        let (session_id, team_id) = (self.session_id, self.team_id);
        self.fetches.spawn(async move {
            FetchOutcome::Adjustments { generation, result: adjustment::refresh(store.as_ref(), session_id, team_id).await }
        });
    }

    /// Resolve metrics for the current slide, superseding any resolution in
    /// flight.
    fn start_metric_resolution(&mut self) {
        if self.terminated {
            return;
        }
        let Some(current) = self.slides.current().cloned() else {
            return;
        };
        self.metric_settle.cancel();
        if let Some(previous) = self.metric_task.take() {
            previous.abort();
        }

        let generation = self.sequencer.issue(FetchKey::Metrics);
        let store = Arc::clone(&self.store);
        let (session_id, team_id, policy) = (self.session_id, self.team_id, self.policy);
        let handle = self.fetches.spawn(async move {
            let result = metric::resolve_for_slide(store.as_ref(), session_id, team_id, &current.slide, policy).await;
            FetchOutcome::Metrics { generation, position: current.position, result }
        });
        self.metric_task = Some(handle);
    }

    fn on_fetch(&mut self, joined: Result<FetchOutcome, JoinError>) {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => return,
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "fetch task failed");
                return;
            }
        };

        match outcome {
            FetchOutcome::Session { generation, result } => {
                if self.sequencer.complete(FetchKey::Session, generation) {
                    self.on_session(result);
                }
            }
            FetchOutcome::Decisions { generation, result } => {
                if self.sequencer.complete(FetchKey::Decisions, generation) {
                    self.on_decisions(result);
                }
            }
            FetchOutcome::Metrics { generation, position, result } => {
                if self.sequencer.complete(FetchKey::Metrics, generation) {
                    self.metric_task = None;
                    self.on_metrics(position, result);
                }
            }
            FetchOutcome::Adjustments { generation, result } => {
                if self.sequencer.complete(FetchKey::Adjustments, generation) {
                    self.on_adjustments(result);
                }
            }
        }
    }

    fn on_session(&mut self, result: Result<Option<Session>, StoreError>) {
        let session = match result {
            Ok(Some(session)) if !session.is_deleted() => session,
            Ok(_) => {
                info!(session_id = %self.session_id, "session no longer exists");
                self.terminate();
                return;
            }
            Err(e) => {
                warn!(session_id = %self.session_id, code = e.error_code(), error = %e, "session fetch failed");
                return;
            }
        };

        if let Some(position) = session.current_slide_position {
            self.apply_position(position);
        }

        // A recent slide change resolves once the settle timer fires.
        if !self.metric_settle.is_armed() {
            self.start_metric_resolution();
        }
    }

    fn on_decisions(&mut self, result: Result<Vec<TeamDecision>, StoreError>) {
        let decisions = match result {
            Ok(decisions) => decisions,
            Err(e) => {
                warn!(session_id = %self.session_id, code = e.error_code(), error = %e, "decision fetch failed");
                return;
            }
        };

        let refresh = self.decisions.apply_fetch(&decisions);
        if !refresh.deleted_phase_keys.is_empty() {
            info!(
                session_id = %self.session_id,
                phases = ?refresh.deleted_phase_keys,
                "decisions deleted by host"
            );
            self.decisions.note_deletions();
            self.reset_debounce.schedule(self.config.reset_debounce);
        }
    }

    fn on_metrics(&mut self, position: usize, result: Result<MetricResolution, StoreError>) {
        // EDGE: the slide moved on; its own resolution is already pending.
        let Some(current) = self.slides.current() else {
            return;
        };
        if current.position != position {
            return;
        }
        let transition = current.slide.is_transition();

        match result {
            Ok(resolution) => {
                debug!(
                    session_id = %self.session_id,
                    target_round = resolution.target_round,
                    found = resolution.record.is_some(),
                    fell_back = resolution.fell_back,
                    "metrics resolved"
                );
                self.metrics = metric::prefer_last_known_good(self.metrics.take(), resolution.record);
                if transition {
                    self.fetch_adjustments();
                }
            }
            Err(e) => {
                warn!(session_id = %self.session_id, code = e.error_code(), error = %e, "metric fetch failed");
            }
        }
    }

    fn on_adjustments(&mut self, result: Result<Vec<PermanentAdjustment>, StoreError>) {
        match result {
            Ok(adjustments) => self.adjustments = adjustments,
            Err(e) => {
                warn!(session_id = %self.session_id, code = e.error_code(), error = %e, "adjustment fetch failed");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        info!(session_id = %self.session_id, "session deleted; engine idle");

        self.supervisor.shutdown();
        self.drop_subscription();
        self.fetches.abort_all();
        self.sequencer.invalidate_all();
        self.metric_task = None;

        self.poll.cancel();
        self.metric_settle.cancel();
        self.reset_debounce.cancel();
        self.countdown_tick.cancel();
        self.countdown.stop();
    }

    /// The displayed record belongs to a round below the one the current
    /// slide targets.
    fn showing_previous_round(&self) -> bool {
        match (&self.metrics, self.slides.current()) {
            (Some(record), Some(current)) => record.round_number < current.slide.target_round(),
            _ => false,
        }
    }

    fn publish(&self) {
        let next = SyncView {
            slide: self.slides.current().cloned(),
            decision_active: self.slides.is_decision_active(),
            submitted_phase_keys: self.decisions.submitted_phase_keys(),
            metrics: self.metrics.clone(),
            metrics_fallback: self.showing_previous_round(),
            adjustments: self.adjustments.clone(),
            connection: self.supervisor.state(),
            reset_counter: self.decisions.reset_counter(),
            loading: LoadingFlags {
                session: self.sequencer.is_loading(FetchKey::Session),
                decisions: self.sequencer.is_loading(FetchKey::Decisions),
                metrics: self.sequencer.is_loading(FetchKey::Metrics),
                adjustments: self.sequencer.is_loading(FetchKey::Adjustments),
            },
            countdown_remaining: self.countdown.remaining(Instant::now()),
            session_deleted: self.terminated,
        };
        self.view.send_if_modified(|view| {
            if *view == next {
                return false;
            }
            *view = next;
            true
        });
    }
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod tests;
