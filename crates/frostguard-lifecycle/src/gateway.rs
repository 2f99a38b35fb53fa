//! Gateway provisioning and teardown.
//!
//! Registers a gateway under the deployment's TTN organization, mints its
//! LNS connection key (and a CUPS key on request), and confirms the
//! registration through the Gateway Server. A 404 from the connection
//! stats endpoint right after registration means the gateway is
//! registered but has not connected yet, which counts as success.
//!
//! Teardown mirrors the device path: soft delete, registry purge, then a
//! re-fetch that must come back 404 before the run counts as complete.

use frostguard_db::{StepStatus, StepTargetType};
use frostguard_ttn::classify::{classify_network, Classification, ErrorCode};
use frostguard_ttn::client::{TtnClient, TtnResponse};
use frostguard_ttn::error::TtnError;
use frostguard_ttn::types::{gateway_id_for_eui, normalize_dev_eui, ApiKeyCreated};
use serde_json::json;
use tracing::info;

use crate::run::{record_call, RunReport, StepRecord, SNIPPET_MAX_LEN};

/// Frequency plan used when a request does not name one.
pub const GATEWAY_DEFAULT_FREQUENCY_PLAN: &str = "US_902_928_FSB_2";

/// Rights on the LNS connection key. This is the key the gateway dials
/// the Gateway Server with.
pub const LNS_KEY_RIGHTS: [&str; 1] = ["RIGHT_GATEWAY_LINK"];

/// Rights on the CUPS key, for gateways that fetch their configuration
/// over CUPS.
pub const CUPS_KEY_RIGHTS: [&str; 3] = [
    "RIGHT_GATEWAY_INFO",
    "RIGHT_GATEWAY_SETTINGS_BASIC",
    "RIGHT_GATEWAY_READ_SECRETS",
];

/// Parameters for registering one gateway.
#[derive(Debug, Clone)]
pub struct GatewayProvisionRequest {
    /// Hardware gateway EUI, separators allowed.
    pub gateway_eui: String,
    /// Display name for the registration.
    pub name: String,
    /// Frequency plan id; defaults to [`GATEWAY_DEFAULT_FREQUENCY_PLAN`].
    pub frequency_plan: Option<String>,
    /// Also mint a CUPS key.
    pub cups: bool,
}

/// Identifiers and credentials produced by a gateway provision run.
///
/// Key material appears here exactly once; it is never logged and the
/// caller encrypts it before persisting.
#[derive(Debug, Default)]
pub struct GatewayArtifacts {
    /// Derived TTN gateway id, set once registration succeeded.
    pub gateway_id: Option<String>,
    /// LNS connection key.
    pub lns_key: Option<ApiKeyCreated>,
    /// CUPS key, when requested.
    pub cups_key: Option<ApiKeyCreated>,
}

/// Executes gateway provision and deprovision runs.
///
/// Holds no database state; like the other executors it appends to a
/// [`RunReport`] the caller persists.
#[derive(Debug)]
pub struct GatewayExecutor<'a> {
    client: &'a TtnClient,
    ttn_organization_id: String,
}

impl<'a> GatewayExecutor<'a> {
    /// Create an executor registering under the given TTN organization.
    #[must_use]
    pub fn new(client: &'a TtnClient, ttn_organization_id: impl Into<String>) -> Self {
        Self {
            client,
            ttn_organization_id: ttn_organization_id.into(),
        }
    }

    /// Register a gateway, mint its connection keys, and confirm the
    /// registration.
    ///
    /// A 409 on registration means the gateway already exists; the run
    /// proceeds to key minting so a retried job still produces usable
    /// credentials.
    pub async fn provision(
        &self,
        report: &mut RunReport,
        request: &GatewayProvisionRequest,
    ) -> GatewayArtifacts {
        let mut artifacts = GatewayArtifacts::default();

        let Some(eui) = normalize_dev_eui(&request.gateway_eui) else {
            report.push(
                StepRecord::local(
                    "register_gateway",
                    StepTargetType::Gateway,
                    &request.gateway_eui,
                    StepStatus::Error,
                    true,
                )
                .with_detail(format!("malformed gateway EUI {:?}", request.gateway_eui)),
                Some(Classification::new(
                    ErrorCode::Unknown,
                    format!("malformed gateway EUI {:?}", request.gateway_eui),
                )),
            );
            return artifacts;
        };
        let gateway_id = gateway_id_for_eui(&eui);

        let frequency_plan = request
            .frequency_plan
            .as_deref()
            .unwrap_or(GATEWAY_DEFAULT_FREQUENCY_PLAN);
        let gateway = json!({
            "ids": { "gateway_id": gateway_id, "eui": eui },
            "name": request.name,
            "frequency_plan_ids": [frequency_plan],
            "gateway_server_address": self.client.cluster().host(),
            "enforce_duty_cycle": true,
            "require_authenticated_connection": true,
            "status_public": false,
            "location_public": false,
        });

        let endpoint = format!("/api/v3/organizations/{}/gateways", self.ttn_organization_id);
        let result = self
            .client
            .register_gateway(&self.ttn_organization_id, &gateway)
            .await;
        if !self.push_register(report, &gateway_id, &endpoint, result) {
            return artifacts;
        }
        artifacts.gateway_id = Some(gateway_id.clone());

        let endpoint = format!("/api/v3/gateways/{gateway_id}/api-keys");
        let result = self
            .client
            .create_gateway_api_key(&gateway_id, "frostguard-lns", &LNS_KEY_RIGHTS)
            .await;
        artifacts.lns_key =
            self.push_key_creation(report, "create_lns_key", &gateway_id, &endpoint, result);

        if request.cups {
            let result = self
                .client
                .create_gateway_api_key(&gateway_id, "frostguard-cups", &CUPS_KEY_RIGHTS)
                .await;
            artifacts.cups_key =
                self.push_key_creation(report, "create_cups_key", &gateway_id, &endpoint, result);
        }

        self.verify_registered(report, &gateway_id).await;

        info!(
            %gateway_id,
            registered = artifacts.gateway_id.is_some(),
            lns_key = artifacts.lns_key.is_some(),
            cups_key = artifacts.cups_key.is_some(),
            "gateway provision run complete"
        );
        artifacts
    }

    /// Tear down a gateway: soft delete, purge, then confirm the
    /// registration is gone.
    pub async fn deprovision(&self, report: &mut RunReport, gateway_id: &str) {
        let endpoint = format!("/api/v3/gateways/{gateway_id}");
        let result = self.client.delete_gateway(gateway_id).await;
        record_call(
            report,
            "delete_gateway",
            StepTargetType::Gateway,
            gateway_id,
            &endpoint,
            result,
            false,
        );

        let endpoint = format!("/api/v3/gateways/{gateway_id}/purge");
        let result = self.client.purge_gateway(gateway_id).await;
        let purged = matches!(&result, Ok(r) if r.is_gone_or_deleted());
        record_call(
            report,
            "purge_gateway",
            StepTargetType::Gateway,
            gateway_id,
            &endpoint,
            result,
            true,
        );

        if !purged {
            report.push(
                StepRecord::local(
                    "verify_gateway_release",
                    StepTargetType::Gateway,
                    gateway_id,
                    StepStatus::Error,
                    true,
                )
                .with_detail("purge did not complete; gateway release not verified"),
                Some(Classification::new(
                    ErrorCode::Unknown,
                    "purge did not complete".to_string(),
                )),
            );
            return;
        }

        match self.client.get_gateway(gateway_id).await {
            Ok(response) if response.status == 404 => {
                report.push(
                    StepRecord::local(
                        "verify_gateway_release",
                        StepTargetType::Gateway,
                        gateway_id,
                        StepStatus::Ok,
                        true,
                    ),
                    None,
                );
            }
            Ok(response) if response.ok => {
                report.push(
                    StepRecord::local(
                        "verify_gateway_release",
                        StepTargetType::Gateway,
                        gateway_id,
                        StepStatus::Error,
                        true,
                    )
                    .with_detail("gateway still registered after purge"),
                    Some(Classification::new(
                        ErrorCode::Unknown,
                        format!("gateway {gateway_id} still registered after purge"),
                    )),
                );
            }
            Ok(response) => {
                let classification = response.classification();
                report.push(
                    StepRecord::local(
                        "verify_gateway_release",
                        StepTargetType::Gateway,
                        gateway_id,
                        StepStatus::Error,
                        true,
                    )
                    .with_detail(response.snippet(SNIPPET_MAX_LEN)),
                    classification,
                );
            }
            Err(error) => {
                report.push(
                    StepRecord::local(
                        "verify_gateway_release",
                        StepTargetType::Gateway,
                        gateway_id,
                        StepStatus::Error,
                        true,
                    )
                    .with_detail(error.to_string()),
                    Some(classify_network(error.to_string())),
                );
            }
        }
    }

    /// Record the registration call. Returns whether the run may proceed.
    fn push_register(
        &self,
        report: &mut RunReport,
        gateway_id: &str,
        endpoint: &str,
        result: Result<TtnResponse, TtnError>,
    ) -> bool {
        match result {
            // 409 means the id or EUI is already registered; an earlier
            // attempt got this far.
            Ok(response) if response.ok || response.status == 409 => {
                let status = if response.ok {
                    StepStatus::Ok
                } else {
                    StepStatus::Skipped
                };
                report.push(
                    StepRecord {
                        step_name: "register_gateway".to_string(),
                        target_type: StepTargetType::Gateway,
                        target_id: gateway_id.to_string(),
                        status,
                        http_status: Some(i32::from(response.status)),
                        endpoint: Some(endpoint.to_string()),
                        response_snippet: None,
                        critical: true,
                    },
                    None,
                );
                true
            }
            Ok(response) => {
                let classification = response.classification();
                report.push(
                    StepRecord {
                        step_name: "register_gateway".to_string(),
                        target_type: StepTargetType::Gateway,
                        target_id: gateway_id.to_string(),
                        status: StepStatus::Error,
                        http_status: Some(i32::from(response.status)),
                        endpoint: Some(endpoint.to_string()),
                        response_snippet: Some(response.snippet(SNIPPET_MAX_LEN)),
                        critical: true,
                    },
                    classification,
                );
                false
            }
            Err(error) => {
                report.push(
                    StepRecord::local(
                        "register_gateway",
                        StepTargetType::Gateway,
                        gateway_id,
                        StepStatus::Error,
                        true,
                    )
                    .with_detail(error.to_string()),
                    Some(classify_network(error.to_string())),
                );
                false
            }
        }
    }

    /// Record a key-minting call and decode the created key.
    fn push_key_creation(
        &self,
        report: &mut RunReport,
        step_name: &str,
        gateway_id: &str,
        endpoint: &str,
        result: Result<TtnResponse, TtnError>,
    ) -> Option<ApiKeyCreated> {
        match result {
            Ok(response) if response.ok => match response.decode::<ApiKeyCreated>() {
                Ok(key) => {
                    report.push(
                        StepRecord {
                            step_name: step_name.to_string(),
                            target_type: StepTargetType::Gateway,
                            target_id: gateway_id.to_string(),
                            status: StepStatus::Ok,
                            http_status: Some(i32::from(response.status)),
                            endpoint: Some(endpoint.to_string()),
                            response_snippet: None,
                            critical: true,
                        },
                        None,
                    );
                    Some(key)
                }
                Err(error) => {
                    report.push(
                        StepRecord::local(
                            step_name,
                            StepTargetType::Gateway,
                            gateway_id,
                            StepStatus::Error,
                            true,
                        )
                        .with_detail(format!("undecodable api key response: {error}")),
                        Some(classify_network(format!(
                            "undecodable api key response: {error}"
                        ))),
                    );
                    None
                }
            },
            Ok(response) => {
                let classification = response.classification();
                report.push(
                    StepRecord {
                        step_name: step_name.to_string(),
                        target_type: StepTargetType::Gateway,
                        target_id: gateway_id.to_string(),
                        status: StepStatus::Error,
                        http_status: Some(i32::from(response.status)),
                        endpoint: Some(endpoint.to_string()),
                        response_snippet: Some(response.snippet(SNIPPET_MAX_LEN)),
                        critical: true,
                    },
                    classification,
                );
                None
            }
            Err(error) => {
                report.push(
                    StepRecord::local(
                        step_name,
                        StepTargetType::Gateway,
                        gateway_id,
                        StepStatus::Error,
                        true,
                    )
                    .with_detail(error.to_string()),
                    Some(classify_network(error.to_string())),
                );
                None
            }
        }
    }

    /// Confirm the registration exists and ask the Gateway Server for
    /// connection stats. The stats call is non-critical: 404 there means
    /// registered but not yet connected.
    async fn verify_registered(&self, report: &mut RunReport, gateway_id: &str) {
        let endpoint = format!("/api/v3/gateways/{gateway_id}");
        match self.client.get_gateway(gateway_id).await {
            Ok(response) if response.ok => {
                report.push(
                    StepRecord {
                        step_name: "verify_gateway".to_string(),
                        target_type: StepTargetType::Gateway,
                        target_id: gateway_id.to_string(),
                        status: StepStatus::Ok,
                        http_status: Some(i32::from(response.status)),
                        endpoint: Some(endpoint),
                        response_snippet: None,
                        critical: true,
                    },
                    None,
                );
            }
            Ok(response) => {
                let classification = response.classification();
                report.push(
                    StepRecord {
                        step_name: "verify_gateway".to_string(),
                        target_type: StepTargetType::Gateway,
                        target_id: gateway_id.to_string(),
                        status: StepStatus::Error,
                        http_status: Some(i32::from(response.status)),
                        endpoint: Some(endpoint),
                        response_snippet: Some(response.snippet(SNIPPET_MAX_LEN)),
                        critical: true,
                    },
                    classification,
                );
                return;
            }
            Err(error) => {
                report.push(
                    StepRecord::local(
                        "verify_gateway",
                        StepTargetType::Gateway,
                        gateway_id,
                        StepStatus::Error,
                        true,
                    )
                    .with_detail(error.to_string()),
                    Some(classify_network(error.to_string())),
                );
                return;
            }
        }

        let endpoint = format!("/api/v3/gs/gateways/{gateway_id}/connection/stats");
        let result = self.client.gateway_connection_stats(gateway_id).await;
        record_call(
            report,
            "check_connection_stats",
            StepTargetType::Gateway,
            gateway_id,
            &endpoint,
            result,
            false,
        );
    }
}
