//! Slide synchronizer: host position → local slide.
//!
//! DESIGN
//! ======
//! The host broadcasts an ordinal position; the slide itself comes from the
//! static catalog. Whether the team may still submit for the slide is
//! derived, not stored:
//!
//! `decision_active = interactive kind && interactive_key is set && key not closed`
//!
//! Keys are closed by `decision_closed` events and reopened either
//! explicitly (`slide_reopened`) or when the host navigates back to an
//! earlier slide carrying the key.
//!
//! ERROR HANDLING
//! ==============
//! An unknown position or slide id is reported to the caller and leaves the
//! current slide untouched.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::catalog::SlideCatalog;
use crate::error::ErrorCode;
use crate::model::SlideDefinition;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SlideError {
    #[error("no slide at position {position} (catalog has {len})")]
    UnknownPosition { position: usize, len: usize },
    #[error("no slide with id {0}")]
    UnknownSlideId(u32),
}

impl ErrorCode for SlideError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownPosition { .. } => "E_SLIDE_POSITION",
            Self::UnknownSlideId(_) => "E_SLIDE_ID",
        }
    }
}

/// Slide currently shown, with the host position it was resolved from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentSlide {
    pub position: usize,
    pub slide: SlideDefinition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlideOutcome {
    /// Same position as before; nothing to do.
    Unchanged,
    Changed(CurrentSlide),
}

/// Decision-active rule shared by the live synchronizer and one-shot reads.
#[must_use]
pub fn decision_active(slide: &SlideDefinition, closed_keys: &HashSet<String>) -> bool {
    slide.is_interactive()
        && slide
            .interactive_key
            .as_ref()
            .is_some_and(|key| !closed_keys.contains(key))
}

#[derive(Debug)]
pub struct SlideSync {
    catalog: Arc<SlideCatalog>,
    current: Option<CurrentSlide>,
    closed_keys: HashSet<String>,
}

impl SlideSync {
    #[must_use]
    pub fn new(catalog: Arc<SlideCatalog>) -> Self {
        Self { catalog, current: None, closed_keys: HashSet::new() }
    }

    /// Resolve a host position.
    ///
    /// # Errors
    ///
    /// Returns [`SlideError::UnknownPosition`] when the catalog has no slide
    /// there; the previous slide stays current.
    pub fn on_slide_changed(&mut self, position: usize) -> Result<SlideOutcome, SlideError> {
        let slide = self
            .catalog
            .get(position)
            .ok_or(SlideError::UnknownPosition { position, len: self.catalog.len() })?
            .clone();

        let previous = self.current.as_ref().map(|current| current.position);
        if previous == Some(position) {
            return Ok(SlideOutcome::Unchanged);
        }

        // EDGE: navigating back to a slide reopens its decision.
        if previous.is_some_and(|previous| position < previous) {
            if let Some(key) = &slide.interactive_key {
                self.closed_keys.remove(key);
            }
        }

        let current = CurrentSlide { position, slide };
        self.current = Some(current.clone());
        Ok(SlideOutcome::Changed(current))
    }

    /// Close submissions for `phase_key`. Returns `true` if the key was open.
    pub fn close_decision(&mut self, phase_key: &str) -> bool {
        self.closed_keys.insert(phase_key.to_owned())
    }

    /// Reopen the key carried by `slide_id`. Returns `true` if a closed key
    /// was reopened.
    ///
    /// # Errors
    ///
    /// Returns [`SlideError::UnknownSlideId`] when the catalog has no such
    /// slide.
    pub fn reopen_slide(&mut self, slide_id: u32) -> Result<bool, SlideError> {
        let position = self
            .catalog
            .position_of(slide_id)
            .ok_or(SlideError::UnknownSlideId(slide_id))?;
        let Some(key) = self.catalog.get(position).and_then(|slide| slide.interactive_key.as_ref()) else {
            return Ok(false);
        };
        Ok(self.closed_keys.remove(key))
    }

    #[must_use]
    pub fn is_decision_active(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|current| decision_active(&current.slide, &self.closed_keys))
    }

    #[must_use]
    pub fn current(&self) -> Option<&CurrentSlide> {
        self.current.as_ref()
    }
}

// =============================================================================
// COUNTDOWN
// =============================================================================

/// Display countdown for slides with `timer_seconds`.
#[derive(Debug, Default)]
pub struct Countdown {
    ends_at: Option<Instant>,
}

impl Countdown {
    /// Restart for a newly entered slide. `None` stops the countdown.
    pub fn start(&mut self, seconds: Option<u32>, now: Instant) {
        self.ends_at = seconds.map(|secs| now + Duration::from_secs(u64::from(secs)));
    }

    pub fn stop(&mut self) {
        self.ends_at = None;
    }

    /// Whole seconds left, rounded up. `Some(0)` once expired.
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Option<u32> {
        let ends_at = self.ends_at?;
        let left = ends_at.saturating_duration_since(now);
        let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
        Some(u32::try_from(secs).unwrap_or(u32::MAX))
    }

    /// Time until `remaining` next changes, or `None` when there is nothing
    /// left to count.
    #[must_use]
    pub fn next_tick(&self, now: Instant) -> Option<Duration> {
        let left = self.ends_at?.saturating_duration_since(now);
        if left.is_zero() {
            return None;
        }
        let fraction = Duration::from_nanos(u64::from(left.subsec_nanos()));
        if fraction.is_zero() { Some(Duration::from_secs(1)) } else { Some(fraction) }
    }
}

#[cfg(test)]
#[path = "slide_test.rs"]
mod tests;
