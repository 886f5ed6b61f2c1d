//! Adjustment synchronizer: permanent KPI changes granted to the team.
//!
//! Adjustments are few and append-only upstream, so every trigger refetches
//! the full list for (session, team) and replaces the previous one.

use uuid::Uuid;

use crate::model::PermanentAdjustment;
use crate::store::{SessionStore, StoreError};

/// Fetch the team's adjustments ordered by the round they apply from.
///
/// # Errors
///
/// Returns the underlying [`StoreError`]; callers keep their previous list.
pub async fn refresh(
    store: &dyn SessionStore,
    session_id: Uuid,
    team_id: Uuid,
) -> Result<Vec<PermanentAdjustment>, StoreError> {
    let mut adjustments = store.get_adjustments(session_id, team_id).await?;
    adjustments.retain(|adjustment| adjustment.team_id == team_id);
    adjustments.sort_by_key(|adjustment| adjustment.applies_from_round);
    Ok(adjustments)
}

/// Sum of `change_value` for `kpi_key` across adjustments already in
/// effect at `round`.
#[must_use]
pub fn kpi_total(adjustments: &[PermanentAdjustment], kpi_key: &str, round: u32) -> f64 {
    adjustments
        .iter()
        .filter(|adjustment| adjustment.kpi_key == kpi_key && adjustment.applies_from_round <= round)
        .map(|adjustment| adjustment.change_value)
        .sum()
}
