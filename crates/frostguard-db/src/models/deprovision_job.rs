//! Deprovision job queue.
//!
//! One row per device (or per organization, for org-level teardown)
//! requesting removal from the control plane. Retry timing uses a fixed
//! exponential backoff table; a job is claimable only when `next_retry_at`
//! is null or in the past.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Backoff schedule in minutes, indexed by `min(attempts - 1, 4)`.
pub const RETRY_BACKOFF_MINUTES: [i64; 5] = [1, 5, 15, 60, 240];

/// Delay before the next attempt, clamped to the last table entry.
#[must_use]
pub fn backoff_delay(attempts: i32) -> Duration {
    let index = usize::try_from((attempts - 1).max(0)).unwrap_or(0);
    let index = index.min(RETRY_BACKOFF_MINUTES.len() - 1);
    Duration::minutes(RETRY_BACKOFF_MINUTES[index])
}

/// Status of a deprovision job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "UPPERCASE")]
pub enum DeprovisionJobStatus {
    /// Queued, never attempted.
    Pending,
    /// Exclusively claimed by a worker.
    Running,
    /// Transient failure, waiting for `next_retry_at`.
    Retrying,
    /// Non-retryable error requiring operator action; terminal until
    /// manually re-queued.
    Blocked,
    /// Retries exhausted; terminal.
    Failed,
    /// Teardown confirmed; terminal.
    Succeeded,
}

impl std::fmt::Display for DeprovisionJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeprovisionJobStatus::Pending => write!(f, "PENDING"),
            DeprovisionJobStatus::Running => write!(f, "RUNNING"),
            DeprovisionJobStatus::Retrying => write!(f, "RETRYING"),
            DeprovisionJobStatus::Blocked => write!(f, "BLOCKED"),
            DeprovisionJobStatus::Failed => write!(f, "FAILED"),
            DeprovisionJobStatus::Succeeded => write!(f, "SUCCEEDED"),
        }
    }
}

impl std::str::FromStr for DeprovisionJobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(DeprovisionJobStatus::Pending),
            "RUNNING" => Ok(DeprovisionJobStatus::Running),
            "RETRYING" => Ok(DeprovisionJobStatus::Retrying),
            "BLOCKED" => Ok(DeprovisionJobStatus::Blocked),
            "FAILED" => Ok(DeprovisionJobStatus::Failed),
            "SUCCEEDED" => Ok(DeprovisionJobStatus::Succeeded),
            _ => Err(format!("Unknown deprovision job status: {s}")),
        }
    }
}

impl DeprovisionJobStatus {
    /// Whether the job has reached a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeprovisionJobStatus::Succeeded
                | DeprovisionJobStatus::Failed
                | DeprovisionJobStatus::Blocked
        )
    }
}

/// A queued removal of a device (or whole organization) from the control
/// plane.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DeprovisionJob {
    /// Job ID.
    pub id: Uuid,
    /// Owning organization.
    pub organization_id: Uuid,
    /// The sensor being removed; null for org-level teardown.
    pub sensor_id: Option<Uuid>,
    /// Hardware DevEUI; null for org-level teardown.
    pub dev_eui: Option<String>,
    /// Derived remote device id (`eui-...`); null for org-level teardown.
    pub device_id: Option<String>,
    /// Remote application the device lives under.
    pub application_id: String,
    /// Why the removal was requested.
    pub reason: String,
    /// Current status.
    pub status: DeprovisionJobStatus,
    /// Number of attempts so far.
    pub attempts: i32,
    /// Attempt bound; exceeding it fails the job.
    pub max_attempts: i32,
    /// Earliest time the next attempt may be claimed.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Operator override: clear local credentials even on partial failure.
    pub force_clear: bool,
    /// Last classified error code.
    pub last_error_code: Option<String>,
    /// Last error message.
    pub last_error_message: Option<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Parameters for enqueueing a deprovision job.
#[derive(Debug, Clone)]
pub struct NewDeprovisionJob {
    pub organization_id: Uuid,
    pub sensor_id: Option<Uuid>,
    pub dev_eui: Option<String>,
    pub device_id: Option<String>,
    pub application_id: String,
    pub reason: String,
    pub force_clear: bool,
}

impl DeprovisionJob {
    /// Enqueue a deprovision job.
    pub async fn enqueue(
        pool: &sqlx::PgPool,
        new: &NewDeprovisionJob,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r"
            INSERT INTO deprovision_jobs (
                organization_id, sensor_id, dev_eui, device_id,
                application_id, reason, force_clear
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            ",
        )
        .bind(new.organization_id)
        .bind(new.sensor_id)
        .bind(&new.dev_eui)
        .bind(&new.device_id)
        .bind(&new.application_id)
        .bind(&new.reason)
        .bind(new.force_clear)
        .fetch_one(pool)
        .await
    }

    /// Claim the next runnable job, or `None` when nothing is claimable.
    ///
    /// A job is claimable when pending or retrying and its `next_retry_at`
    /// is null or in the past. Same lock-and-skip transaction as the
    /// provisioning queue.
    pub async fn claim_next(pool: &sqlx::PgPool) -> Result<Option<Self>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let candidate: Option<(Uuid,)> = sqlx::query_as(
            r"
            SELECT id FROM deprovision_jobs
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
            UPDATE deprovision_jobs
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

    /// Schedule a retry with backoff, or fail the job when retries are
    /// exhausted. Returns the status that was applied.
    pub async fn schedule_retry(
        pool: &sqlx::PgPool,
        id: Uuid,
        attempts: i32,
        max_attempts: i32,
        error_code: &str,
        error_message: &str,
    ) -> Result<DeprovisionJobStatus, sqlx::Error> {
        if attempts >= max_attempts {
            Self::finish(pool, id, DeprovisionJobStatus::Failed, error_code, error_message)
                .await?;
            return Ok(DeprovisionJobStatus::Failed);
        }

        let next_retry_at = Utc::now() + backoff_delay(attempts);
        sqlx::query(
            r"
            UPDATE deprovision_jobs
            SET status = 'retrying', next_retry_at = $2,
                last_error_code = $3, last_error_message = $4,
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(next_retry_at)
        .bind(error_code)
        .bind(error_message)
        .execute(pool)
        .await?;
        Ok(DeprovisionJobStatus::Retrying)
    }

    /// Transition the job to a terminal status with an error record.
    pub async fn finish(
        pool: &sqlx::PgPool,
        id: Uuid,
        status: DeprovisionJobStatus,
        error_code: &str,
        error_message: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            UPDATE deprovision_jobs
            SET status = $2, last_error_code = NULLIF($3, ''),
                last_error_message = NULLIF($4, ''), updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(status)
        .bind(error_code)
        .bind(error_message)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Mark the job succeeded (terminal).
    pub async fn mark_succeeded(pool: &sqlx::PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        Self::finish(pool, id, DeprovisionJobStatus::Succeeded, "", "").await
    }

    /// Find a job by ID.
    pub async fn find_by_id(
        pool: &sqlx::PgPool,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(r"SELECT * FROM deprovision_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_backoff_table() {
        assert_eq!(backoff_delay(1), Duration::minutes(1));
        assert_eq!(backoff_delay(2), Duration::minutes(5));
        assert_eq!(backoff_delay(3), Duration::minutes(15));
        assert_eq!(backoff_delay(4), Duration::minutes(60));
        assert_eq!(backoff_delay(5), Duration::minutes(240));
    }

    #[test]
    fn test_backoff_clamps() {
        assert_eq!(backoff_delay(6), Duration::minutes(240));
        assert_eq!(backoff_delay(100), Duration::minutes(240));
        assert_eq!(backoff_delay(0), Duration::minutes(1));
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            DeprovisionJobStatus::Pending,
            DeprovisionJobStatus::Running,
            DeprovisionJobStatus::Retrying,
            DeprovisionJobStatus::Blocked,
            DeprovisionJobStatus::Failed,
            DeprovisionJobStatus::Succeeded,
        ] {
            let parsed = DeprovisionJobStatus::from_str(&status.to_string()).unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(DeprovisionJobStatus::Succeeded.is_terminal());
        assert!(DeprovisionJobStatus::Failed.is_terminal());
        assert!(DeprovisionJobStatus::Blocked.is_terminal());
        assert!(!DeprovisionJobStatus::Retrying.is_terminal());
    }
}
