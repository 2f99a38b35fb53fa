//! Provisioning orchestration.
//!
//! Walks an organization through `create_application -> create_api_key ->
//! create_webhook -> save_credentials`. The HTTP steps run here; the final
//! credential write is a database step owned by the worker. A failed job
//! resumes from its recorded step on the next attempt.

use frostguard_ttn::classify::{classify_network, Classification};
use frostguard_ttn::client::TtnClient;
use frostguard_ttn::error::TtnError;
use frostguard_ttn::types::ApiKeyCreated;
use serde_json::json;
use tracing::info;

use crate::error::LifecycleResult;

/// Rights requested for the per-organization application key.
const APPLICATION_KEY_RIGHTS: &[&str] = &[
    "RIGHT_APPLICATION_INFO",
    "RIGHT_APPLICATION_DEVICES_READ",
    "RIGHT_APPLICATION_DEVICES_WRITE",
    "RIGHT_APPLICATION_TRAFFIC_READ",
];

/// Webhook id used for the uplink webhook of every application.
pub const WEBHOOK_ID: &str = "fg-uplinks";

/// Error codes that fail a provisioning job immediately, without retry.
pub const PERMANENT_ERROR_CODES: &[&str] = &[
    "INVALID_ORG",
    "ORG_NOT_FOUND",
    "ADMIN_CREDENTIAL_NOT_CONFIGURED",
];

/// The ordered steps of a provisioning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProvisionStep {
    CreateApplication,
    CreateApiKey,
    CreateWebhook,
    SaveCredentials,
}

impl ProvisionStep {
    /// Execution order.
    pub const SEQUENCE: [ProvisionStep; 4] = [
        ProvisionStep::CreateApplication,
        ProvisionStep::CreateApiKey,
        ProvisionStep::CreateWebhook,
        ProvisionStep::SaveCredentials,
    ];

    /// Stable label persisted on the job row.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionStep::CreateApplication => "create_application",
            ProvisionStep::CreateApiKey => "create_api_key",
            ProvisionStep::CreateWebhook => "create_webhook",
            ProvisionStep::SaveCredentials => "save_credentials",
        }
    }

    /// Parse a persisted step label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        Self::SEQUENCE.into_iter().find(|s| s.as_str() == label)
    }
}

impl std::fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive the remote application id for an organization slug.
#[must_use]
pub fn application_id_for_slug(slug: &str) -> String {
    format!("fg-app-{slug}")
}

/// Whether a slug can safely become part of a remote identifier.
///
/// TTN ids are lowercase alphanumeric with interior hyphens, at most 36
/// characters total including the `fg-app-` prefix.
#[must_use]
pub fn valid_org_slug(slug: &str) -> bool {
    if slug.is_empty() || slug.len() > 29 {
        return false;
    }
    let mut chars = slug.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_lowercase());
    first_ok
        && !slug.ends_with('-')
        && !slug.contains("--")
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// What to provision.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    /// Display name for the remote application.
    pub org_name: String,
    /// Slug the remote identifiers derive from.
    pub org_slug: String,
    /// Step to resume from; `None` starts from the beginning.
    pub resume_from: Option<ProvisionStep>,
}

/// Remote artifacts created by a run.
#[derive(Debug, Clone, Default)]
pub struct ProvisionArtifacts {
    /// The created (or pre-existing) application id.
    pub application_id: String,
    /// The freshly minted API key. Shown exactly once by the control plane.
    pub api_key: Option<ApiKeyCreated>,
    /// The uplink webhook id.
    pub webhook_id: Option<String>,
    /// The uplink webhook signing secret, generated locally.
    pub webhook_secret: Option<String>,
}

/// A failed run: which step failed and how the failure was classified.
#[derive(Debug, Clone)]
pub struct ProvisionFailure {
    /// The step to resume from on the next attempt.
    pub step: ProvisionStep,
    /// Stable error code for the job row.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Whether the job should be retried with backoff.
    pub retry: bool,
}

impl ProvisionFailure {
    fn from_classification(step: ProvisionStep, c: &Classification) -> Self {
        Self {
            step,
            code: c.code.as_str().to_string(),
            message: c.message.clone(),
            retry: c.retry,
        }
    }
}

/// Result of one provisioning run.
#[derive(Debug)]
pub struct ProvisionRun {
    /// Artifacts produced so far.
    pub artifacts: ProvisionArtifacts,
    /// Steps that completed this run.
    pub completed: Vec<ProvisionStep>,
    /// The failure that stopped the run, if any.
    pub failure: Option<ProvisionFailure>,
}

impl ProvisionRun {
    /// Whether every HTTP step completed and credentials are ready to save.
    #[must_use]
    pub fn ready_to_save(&self) -> bool {
        self.failure.is_none() && self.artifacts.api_key.is_some()
    }
}

/// Executes the HTTP steps of a provisioning run.
#[derive(Debug)]
pub struct ProvisionExecutor<'a> {
    client: &'a TtnClient,
    /// Remote organization applications are created under.
    ttn_organization_id: String,
    /// Public base URL uplink webhooks deliver to.
    webhook_base_url: String,
}

impl<'a> ProvisionExecutor<'a> {
    /// Create an executor.
    #[must_use]
    pub fn new(
        client: &'a TtnClient,
        ttn_organization_id: impl Into<String>,
        webhook_base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            ttn_organization_id: ttn_organization_id.into(),
            webhook_base_url: webhook_base_url.into(),
        }
    }

    /// Run the HTTP steps, resuming from the requested step.
    ///
    /// API key material is returned exactly once by the control plane, so a
    /// resume point past `create_api_key` is clamped back to it; the earlier
    /// key is abandoned and a fresh one minted.
    pub async fn execute(&self, request: &ProvisionRequest) -> LifecycleResult<ProvisionRun> {
        let application_id = application_id_for_slug(&request.org_slug);
        let mut run = ProvisionRun {
            artifacts: ProvisionArtifacts {
                application_id: application_id.clone(),
                ..ProvisionArtifacts::default()
            },
            completed: Vec::new(),
            failure: None,
        };

        let resume = request
            .resume_from
            .unwrap_or(ProvisionStep::CreateApplication)
            .min(ProvisionStep::CreateApiKey);

        if resume == ProvisionStep::CreateApplication {
            if let Some(failure) = self.create_application(request, &application_id).await? {
                run.failure = Some(failure);
                return Ok(run);
            }
            run.completed.push(ProvisionStep::CreateApplication);
        }

        match self.create_api_key(&application_id).await? {
            Ok(key) => {
                run.artifacts.api_key = Some(key);
                run.completed.push(ProvisionStep::CreateApiKey);
            }
            Err(failure) => {
                run.failure = Some(failure);
                return Ok(run);
            }
        }

        match self.create_webhook(&application_id).await? {
            Ok(secret) => {
                run.artifacts.webhook_id = Some(WEBHOOK_ID.to_string());
                run.artifacts.webhook_secret = Some(secret);
                run.completed.push(ProvisionStep::CreateWebhook);
            }
            Err(failure) => {
                run.failure = Some(failure);
                return Ok(run);
            }
        }

        info!(%application_id, "provisioning HTTP steps complete");
        Ok(run)
    }

    async fn create_application(
        &self,
        request: &ProvisionRequest,
        application_id: &str,
    ) -> LifecycleResult<Option<ProvisionFailure>> {
        let application = json!({
            "ids": { "application_id": application_id },
            "name": request.org_name,
            "description": format!("FrostGuard sensors for {}", request.org_name),
        });
        let result = self
            .client
            .create_application(&self.ttn_organization_id, &application)
            .await;

        Ok(match result {
            // 409 means an earlier attempt already created it.
            Ok(response) if response.ok || response.status == 409 => None,
            Ok(response) => response.classification().map(|c| {
                ProvisionFailure::from_classification(ProvisionStep::CreateApplication, &c)
            }),
            Err(error) => Some(Self::network_failure(
                ProvisionStep::CreateApplication,
                &error,
            )),
        })
    }

    async fn create_api_key(
        &self,
        application_id: &str,
    ) -> LifecycleResult<Result<ApiKeyCreated, ProvisionFailure>> {
        let result = self
            .client
            .create_application_api_key(application_id, "frostguard-ingest", APPLICATION_KEY_RIGHTS)
            .await;

        Ok(match result {
            Ok(response) if response.ok => match response.decode::<ApiKeyCreated>() {
                Ok(key) => Ok(key),
                Err(error) => Err(ProvisionFailure {
                    step: ProvisionStep::CreateApiKey,
                    code: "UNKNOWN".to_string(),
                    message: format!("malformed API key response: {error}"),
                    retry: true,
                }),
            },
            Ok(response) => Err(response
                .classification()
                .map(|c| ProvisionFailure::from_classification(ProvisionStep::CreateApiKey, &c))
                .unwrap_or_else(|| ProvisionFailure {
                    step: ProvisionStep::CreateApiKey,
                    code: "UNKNOWN".to_string(),
                    message: "unclassifiable response".to_string(),
                    retry: true,
                })),
            Err(error) => Err(Self::network_failure(ProvisionStep::CreateApiKey, &error)),
        })
    }

    async fn create_webhook(
        &self,
        application_id: &str,
    ) -> LifecycleResult<Result<String, ProvisionFailure>> {
        let secret = generate_webhook_secret();
        let webhook = json!({
            "ids": {
                "webhook_id": WEBHOOK_ID,
                "application_ids": { "application_id": application_id },
            },
            "base_url": self.webhook_base_url,
            "format": "json",
            "headers": { "X-FrostGuard-Signature": secret },
            "uplink_message": { "path": "/uplink" },
        });
        let result = self.client.create_webhook(application_id, &webhook).await;

        Ok(match result {
            // 409: the webhook survived an earlier attempt.
            Ok(response) if response.ok || response.status == 409 => Ok(secret),
            Ok(response) => Err(response
                .classification()
                .map(|c| ProvisionFailure::from_classification(ProvisionStep::CreateWebhook, &c))
                .unwrap_or_else(|| ProvisionFailure {
                    step: ProvisionStep::CreateWebhook,
                    code: "UNKNOWN".to_string(),
                    message: "unclassifiable response".to_string(),
                    retry: true,
                })),
            Err(error) => Err(Self::network_failure(ProvisionStep::CreateWebhook, &error)),
        })
    }

    fn network_failure(step: ProvisionStep, error: &TtnError) -> ProvisionFailure {
        ProvisionFailure::from_classification(step, &classify_network(error.to_string()))
    }
}

/// A fresh random webhook signing secret, hex encoded.
fn generate_webhook_secret() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
