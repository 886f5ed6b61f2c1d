//! Metric synchronizer: which scored-round record the team sees.
//!
//! DESIGN
//! ======
//! A slide names the round it displays. Round 1 is fetched directly. For a
//! later round the record may not exist yet: the scoring step writes it
//! shortly after the host advances onto the transition slide. On a
//! transition slide a missing record is re-fetched a bounded number of
//! times before falling back to the previous round; on any other slide the
//! fallback is immediate.
//!
//! Resolutions never blank a record already on screen. The caller folds
//! each result through [`prefer_last_known_good`].
//!
//! ERROR HANDLING
//! ==============
//! Failures on the first fetch and on the fallback fetch are returned to
//! the caller. Failures during the retry phase are logged and treated as
//! "not there yet".

use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::ErrorCode;
use crate::model::{ScoredRoundRecord, SlideDefinition};
use crate::store::{SessionStore, StoreError};

/// Bounded re-fetch schedule for a round that scoring has not produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Fetches after the first one.
    pub retries: u32,
    pub interval: Duration,
}

impl From<&SyncConfig> for RetryPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self { retries: config.metric_retry_attempts, interval: config.metric_retry_interval }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricResolution {
    pub record: Option<ScoredRoundRecord>,
    /// Round the slide asked for.
    pub target_round: u32,
    /// True when `record` came from `target_round - 1`.
    pub fell_back: bool,
}

/// Resolve the record to display for `slide`.
///
/// # Errors
///
/// Returns the [`StoreError`] of the first or the fallback fetch.
pub async fn resolve_for_slide(
    store: &dyn SessionStore,
    session_id: Uuid,
    team_id: Uuid,
    slide: &SlideDefinition,
    policy: RetryPolicy,
) -> Result<MetricResolution, StoreError> {
    let target_round = slide.target_round();
    let record = store.get_scored_round(session_id, team_id, target_round).await?;

    if target_round == 1 || record.is_some() {
        return Ok(MetricResolution { record, target_round, fell_back: false });
    }

    if slide.is_transition() {
        for attempt in 1..=policy.retries {
            tokio::time::sleep(policy.interval).await;
            match store.get_scored_round(session_id, team_id, target_round).await {
                Ok(Some(record)) => {
                    debug!(round = target_round, attempt, "scored round appeared");
                    return Ok(MetricResolution { record: Some(record), target_round, fell_back: false });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        code = e.error_code(),
                        error = %e,
                        round = target_round,
                        attempt,
                        total = policy.retries,
                        "scored round fetch failed; retrying"
                    );
                }
            }
        }
    }

    let previous = target_round - 1;
    debug!(round = target_round, fallback = previous, "scored round missing; falling back");
    let record = store.get_scored_round(session_id, team_id, previous).await?;
    Ok(MetricResolution { record, target_round, fell_back: true })
}

/// Keep `current` when a resolution came back empty.
#[must_use]
pub fn prefer_last_known_good(
    current: Option<ScoredRoundRecord>,
    resolved: Option<ScoredRoundRecord>,
) -> Option<ScoredRoundRecord> {
    resolved.or(current)
}

/// True when a `metric_updated` event for (`event_team`, `round`) may change
/// what `slide` displays for `team_id`. The round below the target counts
/// because the fallback may be showing it.
#[must_use]
pub fn update_concerns(event_team: Uuid, round: u32, team_id: Uuid, slide: &SlideDefinition) -> bool {
    if event_team != team_id {
        return false;
    }
    let target = slide.target_round();
    round == target || round + 1 == target
}

#[cfg(test)]
#[path = "metric_test.rs"]
mod tests;
