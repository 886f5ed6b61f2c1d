//! One-shot reconciliation straight from the store.
//!
//! [`fetch_fresh`] computes what a quiescent engine should converge to:
//! the same slide, decision-active flag, submitted phases, metric record and
//! adjustments, derived from a single pass of direct reads. The CLI's
//! `snapshot` command prints it; tests compare live views against it.

use std::collections::HashSet;

use serde::Serialize;
use uuid::Uuid;

use crate::catalog::SlideCatalog;
use crate::model::{PermanentAdjustment, ScoredRoundRecord};
use crate::store::{SessionStore, StoreError};
use crate::sync::adjustment;
use crate::sync::decision::DecisionTracker;
use crate::sync::metric::{self, RetryPolicy};
use crate::sync::slide::{CurrentSlide, decision_active};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FreshState {
    pub session_deleted: bool,
    pub slide: Option<CurrentSlide>,
    pub decision_active: bool,
    pub submitted_phase_keys: Vec<String>,
    pub metrics: Option<ScoredRoundRecord>,
    pub adjustments: Vec<PermanentAdjustment>,
}

impl FreshState {
    fn deleted() -> Self {
        Self {
            session_deleted: true,
            slide: None,
            decision_active: false,
            submitted_phase_keys: Vec::new(),
            metrics: None,
            adjustments: Vec::new(),
        }
    }
}

/// Read session, slide, decisions, metrics and adjustments once.
///
/// Closed decision keys only exist as transport events, so the
/// decision-active flag here assumes every key is open.
///
/// # Errors
///
/// Returns the first [`StoreError`] encountered.
pub async fn fetch_fresh(
    store: &dyn SessionStore,
    catalog: &SlideCatalog,
    session_id: Uuid,
    team_id: Uuid,
    policy: RetryPolicy,
) -> Result<FreshState, StoreError> {
    let Some(session) = store.get_session(session_id).await? else {
        return Ok(FreshState::deleted());
    };
    if session.is_deleted() {
        return Ok(FreshState::deleted());
    }

    let slide = session
        .current_slide_position
        .and_then(|position| catalog.get(position).map(|slide| CurrentSlide { position, slide: slide.clone() }));

    let mut tracker = DecisionTracker::new(team_id);
    tracker.apply_fetch(&store.get_decisions_for_session(session_id).await?);

    let metrics = match &slide {
        Some(current) => metric::resolve_for_slide(store, session_id, team_id, &current.slide, policy).await?.record,
        None => None,
    };

    let adjustments = adjustment::refresh(store, session_id, team_id).await?;

    Ok(FreshState {
        session_deleted: false,
        decision_active: slide
            .as_ref()
            .is_some_and(|current| decision_active(&current.slide, &HashSet::new())),
        slide,
        submitted_phase_keys: tracker.submitted_phase_keys(),
        metrics,
        adjustments,
    })
}
