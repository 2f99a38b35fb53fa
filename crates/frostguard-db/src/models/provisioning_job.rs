//! Provisioning job queue.
//!
//! One row per organization awaiting remote application creation. Claiming
//! uses `FOR UPDATE SKIP LOCKED` inside a single transaction that also
//! increments the attempt counter and marks the row running, so two
//! concurrent workers can never process the same job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Status of a provisioning job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProvisioningJobStatus {
    /// Queued, never attempted.
    Pending,
    /// Exclusively claimed by a worker.
    Running,
    /// All steps completed; terminal.
    Completed,
    /// Permanent error; terminal.
    Failed,
    /// Transient failure, waiting for the next retry window.
    Retrying,
}

impl std::fmt::Display for ProvisioningJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProvisioningJobStatus::Pending => write!(f, "pending"),
            ProvisioningJobStatus::Running => write!(f, "running"),
            ProvisioningJobStatus::Completed => write!(f, "completed"),
            ProvisioningJobStatus::Failed => write!(f, "failed"),
            ProvisioningJobStatus::Retrying => write!(f, "retrying"),
        }
    }
}

impl std::str::FromStr for ProvisioningJobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ProvisioningJobStatus::Pending),
            "running" => Ok(ProvisioningJobStatus::Running),
            "completed" => Ok(ProvisioningJobStatus::Completed),
            "failed" => Ok(ProvisioningJobStatus::Failed),
            "retrying" => Ok(ProvisioningJobStatus::Retrying),
            _ => Err(format!("Unknown provisioning job status: {s}")),
        }
    }
}

impl ProvisioningJobStatus {
    /// Whether the job has reached a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProvisioningJobStatus::Completed | ProvisioningJobStatus::Failed
        )
    }
}

/// One organization's pending remote application creation.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ProvisioningJob {
    /// Job ID.
    pub id: Uuid,
    /// The organization to provision for.
    pub organization_id: Uuid,
    /// Display name used for the remote organization/application.
    pub org_name: String,
    /// URL-safe slug used to derive remote identifiers.
    pub org_slug: String,
    /// Current status.
    pub status: ProvisioningJobStatus,
    /// The step the next attempt resumes from.
    pub current_step: Option<String>,
    /// Number of attempts so far.
    pub attempts: i32,
    /// Attempt bound; exceeding it fails the job.
    pub max_attempts: i32,
    /// Earliest time the next attempt may be claimed.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Last classified error code.
    pub last_error_code: Option<String>,
    /// Last error message.
    pub last_error_message: Option<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
}

impl ProvisioningJob {
    /// Enqueue a provisioning job for an organization.
    pub async fn enqueue(
        pool: &sqlx::PgPool,
        organization_id: Uuid,
        org_name: &str,
        org_slug: &str,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r"
            INSERT INTO provisioning_jobs (organization_id, org_name, org_slug)
            VALUES ($1, $2, $3)
            RETURNING *
            ",
        )
        .bind(organization_id)
        .bind(org_name)
        .bind(org_slug)
        .fetch_one(pool)
        .await
    }

    /// Claim the next runnable job, or `None` when nothing is claimable.
    ///
    /// Lock-and-skip inside one transaction: the row is selected with
    /// `FOR UPDATE SKIP LOCKED`, transitioned to `running`, and its attempt
    /// counter incremented before the transaction commits. A concurrent
    /// claimer skips the locked row instead of blocking on it.
    pub async fn claim_next(pool: &sqlx::PgPool) -> Result<Option<Self>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let candidate: Option<(Uuid,)> = sqlx::query_as(
            r"
            SELECT id FROM provisioning_jobs
            WHERE status IN ('pending', 'retrying')
              AND (next_retry_at IS NULL OR next_retry_at <= NOW())
            ORDER BY created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            ",
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some((id,)) = candidate else {
            tx.rollback().await?;
            return Ok(None);
        };

        let job: Self = sqlx::query_as(
            r"
            UPDATE provisioning_jobs
            SET status = 'running', attempts = attempts + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            ",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(job))
    }

    /// Record the step the job is currently executing.
    pub async fn update_step(
        pool: &sqlx::PgPool,
        id: Uuid,
        step: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            UPDATE provisioning_jobs
            SET current_step = $2, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(step)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Mark the job completed (terminal).
    pub async fn mark_completed(pool: &sqlx::PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            UPDATE provisioning_jobs
            SET status = 'completed', current_step = NULL,
                last_error_code = NULL, last_error_message = NULL,
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Mark the job failed with a permanent error (terminal).
    pub async fn mark_failed(
        pool: &sqlx::PgPool,
        id: Uuid,
        error_code: &str,
        error_message: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            UPDATE provisioning_jobs
            SET status = 'failed', last_error_code = $2, last_error_message = $3,
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(error_code)
        .bind(error_message)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Schedule a retry: record the resume step, the error, and the earliest
    /// time the job may be claimed again.
    pub async fn mark_retrying(
        pool: &sqlx::PgPool,
        id: Uuid,
        resume_step: &str,
        error_code: &str,
        error_message: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            UPDATE provisioning_jobs
            SET status = 'retrying', current_step = $2,
                last_error_code = $3, last_error_message = $4,
                next_retry_at = $5, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(resume_step)
        .bind(error_code)
        .bind(error_message)
        .bind(next_retry_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Find a job by ID.
    pub async fn find_by_id(
        pool: &sqlx::PgPool,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(r"SELECT * FROM provisioning_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}
