//! Typed change notifications delivered by the event transport.
//!
//! DESIGN
//! ======
//! Transports hand the engine raw JSON payloads. Parsing happens here, at
//! the engine boundary, so a malformed payload becomes one logged
//! [`EventError`] instead of a transport failure. Payloads are internally
//! tagged by `type` in `snake_case`:
//!
//! ```json
//! {"type": "slide_changed", "position": 5}
//! {"type": "decision_deleted", "decision_id": "…", "team_id": "…", "phase_key": "rd1-invest"}
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::model::{PermanentAdjustment, ScoredRoundRecord};

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("malformed event payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl ErrorCode for EventError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "E_EVENT_MALFORMED",
        }
    }
}

/// One change notification for the subscribed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    SlideChanged {
        position: usize,
    },
    DecisionDeleted {
        decision_id: Uuid,
        team_id: Uuid,
        phase_key: String,
    },
    MetricUpdated {
        team_id: Uuid,
        round_number: u32,
        #[serde(default)]
        record: Option<ScoredRoundRecord>,
    },
    AdjustmentAdded {
        team_id: Uuid,
        adjustment: PermanentAdjustment,
    },
    SessionDeleted,
    DecisionClosed {
        phase_key: String,
    },
    SlideReopened {
        slide_id: u32,
    },
}

impl SessionEvent {
    /// Parse a raw transport payload.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Malformed`] for unknown tags or missing fields.
    pub fn from_value(value: serde_json::Value) -> Result<Self, EventError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Wire tag, used as a log field.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SlideChanged { .. } => "slide_changed",
            Self::DecisionDeleted { .. } => "decision_deleted",
            Self::MetricUpdated { .. } => "metric_updated",
            Self::AdjustmentAdded { .. } => "adjustment_added",
            Self::SessionDeleted => "session_deleted",
            Self::DecisionClosed { .. } => "decision_closed",
            Self::SlideReopened { .. } => "slide_reopened",
        }
    }
}

#[cfg(test)]
#[path = "event_test.rs"]
mod tests;
