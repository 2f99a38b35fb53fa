//! Append-only audit trail for deprovision runs.
//!
//! Every sub-step of a run is recorded regardless of outcome, so an
//! operator can reconstruct exactly which remote calls were made, with
//! which status, against which endpoint. Rows are never updated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Outcome of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum StepStatus {
    /// Recorded before execution; should not persist past a run.
    Pending,
    /// In flight.
    Running,
    /// Completed successfully.
    Ok,
    /// Failed.
    Error,
    /// Not needed, for example a 404 on a delete.
    Skipped,
}

impl StepStatus {
    /// Whether the step counts as a success for outcome derivation.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, StepStatus::Ok | StepStatus::Skipped)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "PENDING"),
            StepStatus::Running => write!(f, "RUNNING"),
            StepStatus::Ok => write!(f, "OK"),
            StepStatus::Error => write!(f, "ERROR"),
            StepStatus::Skipped => write!(f, "SKIPPED"),
        }
    }
}

/// What kind of remote object a step acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StepTargetType {
    Device,
    Gateway,
    Application,
    Organization,
    DevEui,
    Db,
}

impl std::fmt::Display for StepTargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepTargetType::Device => write!(f, "device"),
            StepTargetType::Gateway => write!(f, "gateway"),
            StepTargetType::Application => write!(f, "application"),
            StepTargetType::Organization => write!(f, "organization"),
            StepTargetType::DevEui => write!(f, "dev_eui"),
            StepTargetType::Db => write!(f, "db"),
        }
    }
}

/// One recorded step of a deprovision run.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DeprovisionRunStep {
    /// Row ID.
    pub id: Uuid,
    /// The run this step belongs to; one claim produces one run.
    pub run_id: Uuid,
    /// The job that triggered the run, when known.
    pub job_id: Option<Uuid>,
    /// Step name, e.g. `delete_device_ns` or `purge_application`.
    pub step_name: String,
    /// Kind of object the step acted on.
    pub target_type: StepTargetType,
    /// Identifier of the object acted on.
    pub target_id: String,
    /// Outcome.
    pub status: StepStatus,
    /// HTTP status of the remote call, when one was made.
    pub http_status: Option<i32>,
    /// Endpoint path the call went to.
    pub endpoint: Option<String>,
    /// Truncated response body for failed calls.
    pub response_snippet: Option<String>,
    /// Whether a failure here fails the whole run.
    pub critical: bool,
    /// When the step was recorded.
    pub created_at: DateTime<Utc>,
}

/// Parameters for recording a step.
#[derive(Debug, Clone)]
pub struct NewDeprovisionRunStep {
    pub run_id: Uuid,
    pub job_id: Option<Uuid>,
    pub step_name: String,
    pub target_type: StepTargetType,
    pub target_id: String,
    pub status: StepStatus,
    pub http_status: Option<i32>,
    pub endpoint: Option<String>,
    pub response_snippet: Option<String>,
    pub critical: bool,
}

impl DeprovisionRunStep {
    /// Append one step to the audit trail.
    pub async fn insert(
        pool: &sqlx::PgPool,
        new: &NewDeprovisionRunStep,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r"
            INSERT INTO deprovision_run_steps (
                run_id, job_id, step_name, target_type, target_id,
                status, http_status, endpoint, response_snippet, critical
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            ",
        )
        .bind(new.run_id)
        .bind(new.job_id)
        .bind(&new.step_name)
        .bind(new.target_type)
        .bind(&new.target_id)
        .bind(new.status)
        .bind(new.http_status)
        .bind(&new.endpoint)
        .bind(&new.response_snippet)
        .bind(new.critical)
        .fetch_one(pool)
        .await
    }

    /// All steps of a run, in recording order.
    pub async fn list_for_run(
        pool: &sqlx::PgPool,
        run_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM deprovision_run_steps
            WHERE run_id = $1
            ORDER BY created_at ASC
            ",
        )
        .bind(run_id)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_classification() {
        assert!(StepStatus::Ok.is_success());
        assert!(StepStatus::Skipped.is_success());
        assert!(!StepStatus::Error.is_success());
        assert!(!StepStatus::Pending.is_success());
        assert!(!StepStatus::Running.is_success());
    }

    #[test]
    fn test_target_type_display() {
        assert_eq!(StepTargetType::DevEui.to_string(), "dev_eui");
        assert_eq!(StepTargetType::Gateway.to_string(), "gateway");
        assert_eq!(StepTargetType::Organization.to_string(), "organization");
    }
}
