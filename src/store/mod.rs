//! Durable-store read contract.
//!
//! DESIGN
//! ======
//! The engine consumes the store through the [`SessionStore`] trait so the
//! reconciliation core stays independent of the backing database and can
//! be driven by scripted mocks in tests. [`pg::PgStore`] is the production
//! implementation.
//!
//! ERROR HANDLING
//! ==============
//! Every read may fail transiently. Callers log the error and keep their
//! last-known-good value; no store error is ever fatal.

pub mod pg;

use uuid::Uuid;

use crate::error::ErrorCode;
use crate::model::{PermanentAdjustment, ScoredRoundRecord, Session, TeamDecision};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid {table} row: {reason}")]
    InvalidRow { table: &'static str, reason: String },
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Database(_) => "E_DATABASE",
            Self::InvalidRow { .. } => "E_INVALID_ROW",
        }
    }

    fn retryable(&self) -> bool {
        !matches!(self, Self::InvalidRow { .. })
    }
}

/// Point-in-time reads against the authoritative store.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Current session row, or `None` when the session no longer exists.
    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, StoreError>;

    /// Scored record for one (team, round), or `None` while scoring has not
    /// produced it yet.
    async fn get_scored_round(
        &self,
        session_id: Uuid,
        team_id: Uuid,
        round: u32,
    ) -> Result<Option<ScoredRoundRecord>, StoreError>;

    /// Every team's decisions for the session.
    async fn get_decisions_for_session(&self, session_id: Uuid) -> Result<Vec<TeamDecision>, StoreError>;

    /// Permanent adjustments granted to one team.
    async fn get_adjustments(&self, session_id: Uuid, team_id: Uuid) -> Result<Vec<PermanentAdjustment>, StoreError>;
}
