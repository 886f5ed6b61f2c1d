//! Postgres-backed [`SessionStore`].
//!
//! SYSTEM CONTEXT
//! ==============
//! The schema is owned by the host application; this adapter only issues
//! read queries against `sessions`, `team_round_data`, `team_decisions`
//! and `permanent_kpi_adjustments`. No migrations run from here.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{SessionStore, StoreError};
use crate::model::{PermanentAdjustment, ScoredRoundRecord, Session, SessionStatus, TeamDecision};

const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

type RoundRow = (Uuid, i32, f64, f64, f64, f64, Option<f64>, Option<f64>, Option<f64>);
type DecisionRow = (Uuid, Uuid, String, i32, OffsetDateTime);
type AdjustmentRow = (Uuid, Uuid, String, String, f64, i32);

fn db_max_connections() -> u32 {
    std::env::var("DB_MAX_CONNECTIONS")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Open a connection pool.
    ///
    /// # Errors
    ///
    /// Returns a database error if the initial connection fails.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(db_max_connections())
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SessionStore for PgStore {
    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query_as::<_, (Uuid, Option<i32>, Option<String>)>(
            "SELECT id, current_slide_position, status
             FROM sessions
             WHERE id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((id, position, status)) = row else {
            return Ok(None);
        };
        let current_slide_position = position
            .map(|p| usize::try_from(p).map_err(|_| invalid("sessions", format!("negative slide position {p}"))))
            .transpose()?;
        let status = match status.as_deref() {
            Some("deleted") => SessionStatus::Deleted,
            _ => SessionStatus::Active,
        };
        Ok(Some(Session { id, current_slide_position, status }))
    }

    async fn get_scored_round(
        &self,
        session_id: Uuid,
        team_id: Uuid,
        round: u32,
    ) -> Result<Option<ScoredRoundRecord>, StoreError> {
        let round = i32::try_from(round).map_err(|_| invalid("team_round_data", format!("round {round} out of range")))?;
        let row = sqlx::query_as::<_, RoundRow>(
            "SELECT team_id, round_number, capacity, orders, cost, price, revenue, margin, income
             FROM team_round_data
             WHERE session_id = $1 AND team_id = $2 AND round_number = $3",
        )
        .bind(session_id)
        .bind(team_id)
        .bind(round)
        .fetch_optional(&self.pool)
        .await?;

        row.map(round_record).transpose()
    }

    async fn get_decisions_for_session(&self, session_id: Uuid) -> Result<Vec<TeamDecision>, StoreError> {
        let rows = sqlx::query_as::<_, DecisionRow>(
            "SELECT id, team_id, phase_key, round_number, submitted_at
             FROM team_decisions
             WHERE session_id = $1
             ORDER BY submitted_at ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, team_id, phase_key, round_number, submitted_at)| -> Result<TeamDecision, StoreError> {
                Ok(TeamDecision {
                    id,
                    team_id,
                    phase_key,
                    round_number: round_from_db("team_decisions", round_number)?,
                    submitted_at,
                })
            })
            .collect()
    }

    async fn get_adjustments(&self, session_id: Uuid, team_id: Uuid) -> Result<Vec<PermanentAdjustment>, StoreError> {
        let rows = sqlx::query_as::<_, AdjustmentRow>(
            "SELECT id, team_id, challenge_id, kpi_key, change_value, applies_from_round
             FROM permanent_kpi_adjustments
             WHERE session_id = $1 AND team_id = $2
             ORDER BY applies_from_round ASC, created_at ASC",
        )
        .bind(session_id)
        .bind(team_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, team_id, challenge_id, kpi_key, change_value, applies_from_round)| -> Result<PermanentAdjustment, StoreError> {
                Ok(PermanentAdjustment {
                    id,
                    team_id,
                    challenge_id,
                    kpi_key,
                    change_value,
                    applies_from_round: round_from_db("permanent_kpi_adjustments", applies_from_round)?,
                })
            })
            .collect()
    }
}

fn round_record(row: RoundRow) -> Result<ScoredRoundRecord, StoreError> {
    let (team_id, round_number, capacity, orders, cost, price, revenue, margin, income) = row;
    Ok(ScoredRoundRecord {
        team_id,
        round_number: round_from_db("team_round_data", round_number)?,
        capacity,
        orders,
        cost,
        price,
        revenue,
        margin,
        income,
    })
}

fn invalid(table: &'static str, reason: String) -> StoreError {
    StoreError::InvalidRow { table, reason }
}

fn round_from_db(table: &'static str, raw: i32) -> Result<u32, StoreError> {
    u32::try_from(raw).map_err(|_| invalid(table, format!("negative round number {raw}")))
}
