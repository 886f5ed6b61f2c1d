//! Connection supervisor: subscription health and reconnect pacing.
//!
//! DESIGN
//! ======
//! `Disconnected → Connecting → Connected → Disconnected`. An attempt arms
//! the ack timer; the transport's acknowledgement moves to `Connected` and
//! resets the backoff. Any loss (error, close, ack timeout) schedules the
//! next attempt on the reconnect timer, doubling the delay up to a cap.
//!
//! The supervisor only tracks state and timers. The engine actor owns the
//! subscription itself and reacts to the transitions reported here.

use std::time::Duration;

use rand::Rng;
use serde::Serialize;

use crate::config::SyncConfig;
use crate::sync::timer::TimerSlot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

// =============================================================================
// BACKOFF
// =============================================================================

/// Exponential reconnect delay with up to 10% random jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max: max.max(base), current: base }
    }

    /// Delay before the next attempt. Advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        let jitter_ms = u64::try_from(delay.as_millis() / 10).unwrap_or(u64::MAX);
        if jitter_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

// =============================================================================
// SUPERVISOR
// =============================================================================

#[derive(Debug)]
pub struct ConnectionSupervisor {
    state: ConnectionState,
    backoff: Backoff,
    ack_timeout: Duration,
    ack: TimerSlot,
    reconnect: TimerSlot,
}

impl ConnectionSupervisor {
    #[must_use]
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            backoff: Backoff::new(config.reconnect_base, config.reconnect_max),
            ack_timeout: config.ack_timeout,
            ack: TimerSlot::new(),
            reconnect: TimerSlot::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// A subscribe attempt is starting.
    pub fn begin_attempt(&mut self) {
        self.state = ConnectionState::Connecting;
        self.reconnect.cancel();
        self.ack.schedule(self.ack_timeout);
    }

    /// The transport acknowledged. Returns `true` when this is a fresh
    /// transition into `Connected` (the caller resyncs).
    pub fn on_subscribed(&mut self) -> bool {
        if self.state != ConnectionState::Connecting {
            return false;
        }
        self.state = ConnectionState::Connected;
        self.ack.cancel();
        self.backoff.reset();
        true
    }

    /// The subscription failed or ended. Returns the delay before the next
    /// attempt, which is already scheduled.
    pub fn on_lost(&mut self) -> Duration {
        self.state = ConnectionState::Disconnected;
        self.ack.cancel();
        let delay = self.backoff.next_delay();
        self.reconnect.schedule(delay);
        delay
    }

    /// Stop for good: no pending ack, no reconnect.
    pub fn shutdown(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.ack.cancel();
        self.reconnect.cancel();
    }

    /// Resolves when the current attempt has gone unacknowledged too long.
    pub async fn ack_expired(&self) {
        self.ack.fired().await;
    }

    /// Resolves when the next reconnect attempt is due.
    pub async fn reconnect_due(&self) {
        self.reconnect.fired().await;
    }
}
