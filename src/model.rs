//! Domain records observed by the engine.
//!
//! DESIGN
//! ======
//! Every type here mirrors a row owned by the durable store or an entry in
//! the static slide catalog. The engine only reads them; nothing in this
//! crate creates, updates, or deletes a record upstream.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Slide kinds that mark the boundary into a new scored round.
const TRANSITION_KINDS: &[&str] = &["kpi_reset", "round_transition"];

/// Prefix shared by every slide kind that accepts team decisions.
const INTERACTIVE_PREFIX: &str = "interactive_";

// =============================================================================
// SESSION
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Deleted,
}

/// Host-controlled session row. Read-only from the client side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    /// Ordinal position into the slide catalog. `None` before the host starts.
    pub current_slide_position: Option<usize>,
    #[serde(default)]
    pub status: SessionStatus,
}

impl Session {
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.status == SessionStatus::Deleted
    }
}

// =============================================================================
// SLIDES
// =============================================================================

/// One entry in the static content catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideDefinition {
    pub id: u32,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub round_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interactive_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl SlideDefinition {
    /// True when the slide kind accepts team decisions.
    #[must_use]
    pub fn is_interactive(&self) -> bool {
        self.kind.starts_with(INTERACTIVE_PREFIX)
    }

    /// True when the slide opens a new scored round. Scoring for the new
    /// round may land in the store after the slide is already visible.
    #[must_use]
    pub fn is_transition(&self) -> bool {
        TRANSITION_KINDS.contains(&self.kind.as_str()) || self.kind.ends_with("_transition")
    }

    /// Round whose metrics this slide should display. Unset rounds count as 1.
    #[must_use]
    pub fn target_round(&self) -> u32 {
        self.round_number.max(1)
    }
}

// =============================================================================
// DECISIONS
// =============================================================================

/// A team's submitted decision for one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamDecision {
    pub id: Uuid,
    pub team_id: Uuid,
    pub phase_key: String,
    pub round_number: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
}

// =============================================================================
// METRICS
// =============================================================================

/// Computed per-round KPIs for one team. Written by the scoring step after
/// a round transition, so it can lag behind the slide that displays it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRoundRecord {
    pub team_id: Uuid,
    pub round_number: u32,
    pub capacity: f64,
    pub orders: f64,
    pub cost: f64,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revenue: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub margin: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub income: Option<f64>,
}

/// Permanent KPI change granted by a challenge outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermanentAdjustment {
    pub id: Uuid,
    pub team_id: Uuid,
    pub challenge_id: String,
    pub kpi_key: String,
    pub change_value: f64,
    pub applies_from_round: u32,
}

#[cfg(test)]
#[path = "model_test.rs"]
mod tests;
