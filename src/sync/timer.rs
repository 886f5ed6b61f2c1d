//! Single-slot timers.
//!
//! A [`TimerSlot`] holds at most one deadline. Scheduling replaces any
//! pending deadline (cancel-and-reschedule), which is exactly the debounce
//! semantics the engine needs. The slot is polled from the actor's
//! `select!` loop, so dropping the actor drops every timer with it.

use std::time::Duration;

use tokio::time::{Instant, sleep_until};

#[derive(Debug, Default)]
pub struct TimerSlot {
    deadline: Option<Instant>,
}

impl TimerSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the slot `after` from now, replacing any pending deadline.
    pub fn schedule(&mut self, after: Duration) {
        self.deadline = Some(Instant::now() + after);
    }

    /// Arm the slot `after` from now unless it is already due sooner.
    pub fn schedule_if_sooner(&mut self, after: Duration) {
        let candidate = Instant::now() + after;
        match self.deadline {
            Some(current) if current <= candidate => {}
            _ => self.deadline = Some(candidate),
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves once the armed deadline passes; never resolves while
    /// disarmed. The caller must `cancel` or reschedule after it fires.
    pub async fn fired(&self) {
        match self.deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}
