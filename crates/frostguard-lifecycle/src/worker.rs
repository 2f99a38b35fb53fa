//! Externally triggered lifecycle worker.
//!
//! `run_once` claims a bounded batch of jobs and processes them
//! sequentially. The worker owns no scheduling of its own; retry timing
//! lives entirely in the job rows (`next_retry_at`), so whatever cadence
//! triggers `run_once` cannot make retries fire early.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use frostguard_db::{
    backoff_delay, CredentialScope, DeprovisionJob, DeprovisionJobStatus, DeprovisionRunStep,
    NewCredentials, ProvisioningJob, ProvisioningState, Sensor, TtnConnectionConfig,
};
use frostguard_ttn::client::TtnClient;
use frostguard_ttn::crypto::{key_fingerprint, CredentialEncryption};
use frostguard_ttn::types::{device_id_for_eui, normalize_dev_eui};
use sqlx::PgPool;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::deprovisioner::DeprovisionExecutor;
use crate::error::LifecycleResult;
use crate::provisioner::{
    valid_org_slug, ProvisionExecutor, ProvisionRequest, ProvisionStep, WEBHOOK_ID,
};
use crate::run::{RunOutcome, RunReport};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Most jobs processed per `run_once` call.
    pub batch_size: usize,
    /// Remote organization new applications are created under.
    pub ttn_organization_id: String,
    /// Public base URL uplink webhooks deliver to.
    pub webhook_base_url: String,
    /// Wait before release verification.
    pub propagation_delay: Duration,
    /// Wait before the single verification re-poll.
    pub verify_retry_delay: Duration,
}

impl WorkerConfig {
    /// Config with production delays and the default batch size.
    #[must_use]
    pub fn new(
        ttn_organization_id: impl Into<String>,
        webhook_base_url: impl Into<String>,
    ) -> Self {
        Self {
            batch_size: 5,
            ttn_organization_id: ttn_organization_id.into(),
            webhook_base_url: webhook_base_url.into(),
            propagation_delay: Duration::from_secs(3),
            verify_retry_delay: Duration::from_secs(5),
        }
    }
}

/// Which queue a summary came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Provision,
    Deprovision,
}

/// Result of processing one claimed job.
#[derive(Debug, Clone)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub organization_id: Uuid,
    /// Status the job row was left in.
    pub status: String,
    /// Error code recorded on the row, if the job did not succeed.
    pub error_code: Option<String>,
}

/// Processes provisioning and deprovision queues against the control plane.
pub struct LifecycleWorker {
    pool: PgPool,
    /// Admin-credentialed client. `None` fails jobs with
    /// `ADMIN_CREDENTIAL_NOT_CONFIGURED` instead of panicking at startup.
    client: Option<Arc<TtnClient>>,
    encryption: CredentialEncryption,
    config: WorkerConfig,
}

impl LifecycleWorker {
    /// Create a worker.
    #[must_use]
    pub fn new(
        pool: PgPool,
        client: Option<Arc<TtnClient>>,
        encryption: CredentialEncryption,
        config: WorkerConfig,
    ) -> Self {
        Self {
            pool,
            client,
            encryption,
            config,
        }
    }

    /// Claim and process up to `batch_size` jobs, provisioning first.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> LifecycleResult<Vec<JobSummary>> {
        let mut summaries = Vec::new();

        while summaries.len() < self.config.batch_size {
            let Some(job) = ProvisioningJob::claim_next(&self.pool).await? else {
                break;
            };
            summaries.push(self.process_provisioning(job).await?);
        }

        while summaries.len() < self.config.batch_size {
            let Some(job) = DeprovisionJob::claim_next(&self.pool).await? else {
                break;
            };
            summaries.push(self.process_deprovision(job).await?);
        }

        info!(processed = summaries.len(), "worker pass complete");
        Ok(summaries)
    }

    async fn process_provisioning(&self, job: ProvisioningJob) -> LifecycleResult<JobSummary> {
        info!(job_id = %job.id, organization_id = %job.organization_id, attempt = job.attempts, "provisioning");

        let Some(client) = self.client.as_deref() else {
            return self
                .fail_provisioning(
                    &job,
                    "ADMIN_CREDENTIAL_NOT_CONFIGURED",
                    "no admin control-plane credential configured",
                )
                .await;
        };

        if !valid_org_slug(&job.org_slug) {
            return self
                .fail_provisioning(
                    &job,
                    "INVALID_ORG",
                    &format!("slug {:?} cannot form a remote identifier", job.org_slug),
                )
                .await;
        }

        let config =
            TtnConnectionConfig::find_by_organization(&self.pool, job.organization_id).await?;
        if config.is_none() {
            return self
                .fail_provisioning(
                    &job,
                    "ORG_NOT_FOUND",
                    "organization has no connection config row",
                )
                .await;
        }

        let executor = ProvisionExecutor::new(
            client,
            &self.config.ttn_organization_id,
            &self.config.webhook_base_url,
        );
        let request = ProvisionRequest {
            org_name: job.org_name.clone(),
            org_slug: job.org_slug.clone(),
            resume_from: job.current_step.as_deref().and_then(ProvisionStep::parse),
        };
        let run = executor.execute(&request).await?;

        if let Some(failure) = run.failure {
            if !failure.retry || job.attempts >= job.max_attempts {
                return self
                    .fail_provisioning(&job, &failure.code, &failure.message)
                    .await;
            }
            let next_retry_at = Utc::now() + backoff_delay(job.attempts);
            ProvisioningJob::mark_retrying(
                &self.pool,
                job.id,
                failure.step.as_str(),
                &failure.code,
                &failure.message,
                next_retry_at,
            )
            .await?;
            warn!(job_id = %job.id, code = %failure.code, step = %failure.step, "provisioning retry scheduled");
            return Ok(JobSummary {
                job_id: job.id,
                kind: JobKind::Provision,
                organization_id: job.organization_id,
                status: "retrying".to_string(),
                error_code: Some(failure.code),
            });
        }

        let artifacts = run.artifacts;
        let (Some(api_key), Some(webhook_secret)) =
            (artifacts.api_key, artifacts.webhook_secret)
        else {
            return self
                .fail_provisioning(&job, "UNKNOWN", "run completed without credentials")
                .await;
        };

        ProvisioningJob::update_step(&self.pool, job.id, ProvisionStep::SaveCredentials.as_str())
            .await?;
        let credentials = NewCredentials {
            ttn_organization_id: Some(self.config.ttn_organization_id.clone()),
            application_id: artifacts.application_id.clone(),
            api_key_encrypted: self
                .encryption
                .encrypt(job.organization_id, api_key.key.as_bytes())?,
            api_key_last4: key_fingerprint(&api_key.key),
            api_key_scope: CredentialScope::Application,
            webhook_id: artifacts.webhook_id.unwrap_or_else(|| WEBHOOK_ID.to_string()),
            webhook_secret,
        };
        TtnConnectionConfig::save_credentials(&self.pool, job.organization_id, &credentials)
            .await?;
        ProvisioningJob::mark_completed(&self.pool, job.id).await?;

        info!(
            job_id = %job.id,
            application_id = %artifacts.application_id,
            key = %credentials.api_key_last4,
            "provisioning complete"
        );
        Ok(JobSummary {
            job_id: job.id,
            kind: JobKind::Provision,
            organization_id: job.organization_id,
            status: "completed".to_string(),
            error_code: None,
        })
    }

    async fn fail_provisioning(
        &self,
        job: &ProvisioningJob,
        code: &str,
        message: &str,
    ) -> LifecycleResult<JobSummary> {
        warn!(job_id = %job.id, code, message, "provisioning failed");
        ProvisioningJob::mark_failed(&self.pool, job.id, code, message).await?;
        Ok(JobSummary {
            job_id: job.id,
            kind: JobKind::Provision,
            organization_id: job.organization_id,
            status: "failed".to_string(),
            error_code: Some(code.to_string()),
        })
    }

    async fn process_deprovision(&self, job: DeprovisionJob) -> LifecycleResult<JobSummary> {
        info!(job_id = %job.id, organization_id = %job.organization_id, attempt = job.attempts, reason = %job.reason, "deprovisioning");

        let Some(client) = self.client.as_deref() else {
            DeprovisionJob::finish(
                &self.pool,
                job.id,
                DeprovisionJobStatus::Blocked,
                "ADMIN_CREDENTIAL_NOT_CONFIGURED",
                "no admin control-plane credential configured",
            )
            .await?;
            return Ok(self.deprovision_summary(&job, DeprovisionJobStatus::Blocked, Some("ADMIN_CREDENTIAL_NOT_CONFIGURED")));
        };

        let executor = DeprovisionExecutor::new(client)
            .with_propagation_delay(self.config.propagation_delay)
            .with_verify_retry_delay(self.config.verify_retry_delay);
        let mut report = RunReport::new();
        let org_level = job.dev_eui.is_none();

        if let Some(dev_eui) = &job.dev_eui {
            let Some(normalized) = normalize_dev_eui(dev_eui) else {
                DeprovisionJob::finish(
                    &self.pool,
                    job.id,
                    DeprovisionJobStatus::Failed,
                    "INVALID_JOB",
                    &format!("malformed DevEUI {dev_eui:?}"),
                )
                .await?;
                return Ok(self.deprovision_summary(&job, DeprovisionJobStatus::Failed, Some("INVALID_JOB")));
            };
            let device_id = job
                .device_id
                .clone()
                .unwrap_or_else(|| device_id_for_eui(&normalized));
            executor
                .run_device(&mut report, &job.application_id, &device_id, Some(&normalized))
                .await;
        } else {
            let config =
                TtnConnectionConfig::find_by_organization(&self.pool, job.organization_id).await?;
            let ttn_org = config.and_then(|c| c.ttn_organization_id);
            executor
                .run_organization(&mut report, &job.application_id, ttn_org.as_deref())
                .await;
        }

        for step in report.steps.clone() {
            DeprovisionRunStep::insert(&self.pool, &step.into_new_row(report.run_id, Some(job.id)))
                .await?;
        }

        let outcome = report.outcome();
        info!(job_id = %job.id, run_id = %report.run_id, ?outcome, steps = report.steps.len(), "deprovision run recorded");

        let status = match outcome {
            RunOutcome::Succeeded => {
                DeprovisionJob::mark_succeeded(&self.pool, job.id).await?;
                if org_level {
                    TtnConnectionConfig::clear_credentials(&self.pool, job.organization_id)
                        .await?;
                    Sensor::reset_for_organization(&self.pool, job.organization_id).await?;
                } else if let Some(sensor_id) = job.sensor_id {
                    Sensor::update_provisioning_state(
                        &self.pool,
                        sensor_id,
                        ProvisioningState::NotConfigured,
                        None,
                    )
                    .await?;
                }
                DeprovisionJobStatus::Succeeded
            }
            RunOutcome::Failed | RunOutcome::Partial => {
                let (code, message, retry, block) = match &report.failure {
                    Some(c) => (
                        c.code.as_str().to_string(),
                        c.message.clone(),
                        c.retry,
                        c.block,
                    ),
                    None => (
                        "UNKNOWN".to_string(),
                        "critical step failed without classification".to_string(),
                        true,
                        false,
                    ),
                };
                let applied = if block {
                    DeprovisionJob::finish(
                        &self.pool,
                        job.id,
                        DeprovisionJobStatus::Blocked,
                        &code,
                        &message,
                    )
                    .await?;
                    DeprovisionJobStatus::Blocked
                } else if retry {
                    DeprovisionJob::schedule_retry(
                        &self.pool,
                        job.id,
                        job.attempts,
                        job.max_attempts,
                        &code,
                        &message,
                    )
                    .await?
                } else {
                    DeprovisionJob::finish(
                        &self.pool,
                        job.id,
                        DeprovisionJobStatus::Failed,
                        &code,
                        &message,
                    )
                    .await?;
                    DeprovisionJobStatus::Failed
                };

                if org_level && job.force_clear {
                    warn!(job_id = %job.id, "force clearing credentials despite incomplete teardown");
                    TtnConnectionConfig::clear_credentials(&self.pool, job.organization_id)
                        .await?;
                }
                applied
            }
        };

        let error_code = match status {
            DeprovisionJobStatus::Succeeded => None,
            _ => report.failure.as_ref().map(|c| c.code.as_str().to_string()),
        };
        Ok(self.deprovision_summary(&job, status, error_code.as_deref()))
    }

    fn deprovision_summary(
        &self,
        job: &DeprovisionJob,
        status: DeprovisionJobStatus,
        error_code: Option<&str>,
    ) -> JobSummary {
        JobSummary {
            job_id: job.id,
            kind: JobKind::Deprovision,
            organization_id: job.organization_id,
            status: status.to_string(),
            error_code: error_code.map(ToString::to_string),
        }
    }
}

impl std::fmt::Debug for LifecycleWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleWorker")
            .field("batch_size", &self.config.batch_size)
            .field("has_admin_client", &self.client.is_some())
            .finish_non_exhaustive()
    }
}
