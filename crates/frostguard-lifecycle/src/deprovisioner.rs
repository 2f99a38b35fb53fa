//! Deprovisioning orchestration.
//!
//! Tears a device (or a whole organization) out of the control plane in a
//! fixed order: per-role deletes, registry purge, release verification,
//! then application and organization purge. Every sub-step is recorded on
//! the run report whether it succeeds or not; the caller derives the run
//! outcome from the report and decides what to persist.
//!
//! Deletes from the individual server roles are non-critical because the
//! registry purge supersedes them. The purge and the verification are
//! critical: the DevEUI is only released once the identity registry has
//! forgotten the device.

use std::time::Duration;

use frostguard_db::{StepStatus, StepTargetType};
use frostguard_ttn::classify::{classify_network, Classification, ErrorCode};
use frostguard_ttn::client::TtnClient;
use frostguard_ttn::types::{normalize_dev_eui, DeviceListPage, EndDeviceSearchResult, ServerRole};
use tracing::{info, warn};

use crate::run::{record_call, RunReport, StepRecord};

/// Upper bound on device-list pages during organization teardown.
const MAX_LIST_PAGES: usize = 100;

/// Executes deprovision runs against the control plane.
///
/// Holds no database state; it appends to a [`RunReport`] that the caller
/// persists. Delays are configurable so tests can run without waiting.
#[derive(Debug)]
pub struct DeprovisionExecutor<'a> {
    client: &'a TtnClient,
    propagation_delay: Duration,
    verify_retry_delay: Duration,
}

impl<'a> DeprovisionExecutor<'a> {
    /// Create an executor with production delays.
    #[must_use]
    pub fn new(client: &'a TtnClient) -> Self {
        Self {
            client,
            propagation_delay: Duration::from_secs(3),
            verify_retry_delay: Duration::from_secs(5),
        }
    }

    /// Override the wait before release verification.
    #[must_use]
    pub fn with_propagation_delay(mut self, delay: Duration) -> Self {
        self.propagation_delay = delay;
        self
    }

    /// Override the wait before the single verification re-poll.
    #[must_use]
    pub fn with_verify_retry_delay(mut self, delay: Duration) -> Self {
        self.verify_retry_delay = delay;
        self
    }

    /// Tear down one device: delete from every server role, purge the
    /// registry record, then verify the DevEUI was released.
    pub async fn run_device(
        &self,
        report: &mut RunReport,
        application_id: &str,
        device_id: &str,
        dev_eui: Option<&str>,
    ) {
        for role in ServerRole::ALL {
            let step_name = format!("delete_device_{role}");
            let endpoint = format!(
                "/api/v3{}/applications/{application_id}/devices/{device_id}",
                role.path_prefix()
            );
            let result = self.client.delete_device(role, application_id, device_id).await;
            record_call(report, &step_name, StepTargetType::Device, device_id, &endpoint, result, false);
        }

        let endpoint = format!("/api/v3/applications/{application_id}/devices/{device_id}/purge");
        let result = self.client.purge_device(application_id, device_id).await;
        let purged = matches!(&result, Ok(r) if r.is_gone_or_deleted());
        record_call(
            report,
            "purge_device",
            StepTargetType::Device,
            device_id,
            &endpoint,
            result,
            true,
        );

        if let Some(dev_eui) = dev_eui {
            if purged {
                self.verify_release(report, dev_eui).await;
            } else {
                report.push(
                    StepRecord::local(
                        "verify_release",
                        StepTargetType::DevEui,
                        dev_eui,
                        StepStatus::Error,
                        true,
                    )
                    .with_detail("purge did not complete; EUI release not verified"),
                    Some(Classification::new(
                        ErrorCode::Unknown,
                        "purge did not complete".to_string(),
                    )),
                );
            }
        }
    }

    /// Tear down an organization: every device of the application, then the
    /// application itself, then the remote organization.
    pub async fn run_organization(
        &self,
        report: &mut RunReport,
        application_id: &str,
        ttn_organization_id: Option<&str>,
    ) {
        let devices = match self.list_all_devices(application_id).await {
            Ok(devices) => {
                report.push(
                    StepRecord::local(
                        "list_devices",
                        StepTargetType::Application,
                        application_id,
                        StepStatus::Ok,
                        false,
                    ),
                    None,
                );
                devices
            }
            Err(classification) => {
                // Without a device inventory the per-device teardown cannot
                // run; purging blind would strand role mirrors.
                warn!(
                    application_id,
                    code = %classification.code,
                    "device listing failed, aborting teardown"
                );
                report.push(
                    StepRecord::local(
                        "list_devices",
                        StepTargetType::Application,
                        application_id,
                        StepStatus::Error,
                        true,
                    )
                    .with_detail(classification.message.clone()),
                    Some(classification),
                );
                return;
            }
        };

        info!(application_id, devices = devices.len(), "tearing down application");
        for (device_id, dev_eui) in &devices {
            self.run_device(report, application_id, device_id, dev_eui.as_deref())
                .await;
        }

        // The soft deletes are non-critical: the purges below supersede
        // them, same as the per-role deletes on a device.
        let endpoint = format!("/api/v3/applications/{application_id}");
        let result = self.client.delete_application(application_id).await;
        record_call(
            report,
            "delete_application",
            StepTargetType::Application,
            application_id,
            &endpoint,
            result,
            false,
        );

        let endpoint = format!("/api/v3/applications/{application_id}/purge");
        let result = self.client.purge_application(application_id).await;
        record_call(
            report,
            "purge_application",
            StepTargetType::Application,
            application_id,
            &endpoint,
            result,
            true,
        );

        if let Some(org_id) = ttn_organization_id {
            let endpoint = format!("/api/v3/organizations/{org_id}");
            let result = self.client.delete_organization(org_id).await;
            record_call(
                report,
                "delete_organization",
                StepTargetType::Organization,
                org_id,
                &endpoint,
                result,
                false,
            );

            let endpoint = format!("/api/v3/organizations/{org_id}/purge");
            let result = self.client.purge_organization(org_id).await;
            record_call(
                report,
                "purge_organization",
                StepTargetType::Organization,
                org_id,
                &endpoint,
                result,
                true,
            );
        }
    }

    /// Confirm the DevEUI no longer resolves to any registration.
    ///
    /// Registry purges propagate asynchronously, so the check waits first
    /// and re-polls exactly once before recording a critical error.
    async fn verify_release(&self, report: &mut RunReport, dev_eui: &str) {
        tokio::time::sleep(self.propagation_delay).await;

        let first = self.eui_still_registered(dev_eui).await;
        let second = match first {
            Ok(false) => {
                self.push_verified(report, dev_eui);
                return;
            }
            Ok(true) => {
                tokio::time::sleep(self.verify_retry_delay).await;
                self.eui_still_registered(dev_eui).await
            }
            Err(classification) => Err(classification),
        };

        match second {
            Ok(false) => self.push_verified(report, dev_eui),
            Ok(true) => {
                report.push(
                    StepRecord::local(
                        "verify_release",
                        StepTargetType::DevEui,
                        dev_eui,
                        StepStatus::Error,
                        true,
                    )
                    .with_detail("DevEUI still registered after purge"),
                    Some(Classification::new(
                        ErrorCode::Unknown,
                        format!("DevEUI {dev_eui} still registered after purge"),
                    )),
                );
            }
            Err(classification) => {
                report.push(
                    StepRecord::local(
                        "verify_release",
                        StepTargetType::DevEui,
                        dev_eui,
                        StepStatus::Error,
                        true,
                    )
                    .with_detail(classification.message.clone()),
                    Some(classification),
                );
            }
        }
    }

    fn push_verified(&self, report: &mut RunReport, dev_eui: &str) {
        report.push(
            StepRecord::local(
                "verify_release",
                StepTargetType::DevEui,
                dev_eui,
                StepStatus::Ok,
                true,
            ),
            None,
        );
    }

    /// Whether the DevEUI still matches any reachable registration.
    async fn eui_still_registered(&self, dev_eui: &str) -> Result<bool, Classification> {
        let normalized = normalize_dev_eui(dev_eui);
        let response = self
            .client
            .search_end_devices(dev_eui)
            .await
            .map_err(|e| classify_network(e.to_string()))?;

        if !response.ok {
            // 404 from the search endpoint means nothing matched.
            if response.status == 404 {
                return Ok(false);
            }
            return Err(response
                .classification()
                .unwrap_or_else(|| classify_network("unclassifiable search failure")));
        }

        let result: EndDeviceSearchResult = response
            .decode()
            .map_err(|e| classify_network(e.to_string()))?;
        let still = result.end_devices.iter().any(|d| {
            d.ids
                .dev_eui
                .as_deref()
                .and_then(normalize_dev_eui)
                .map_or(false, |eui| Some(&eui) == normalized.as_ref())
        });
        Ok(still)
    }

    /// Fetch all device ids of an application, following pagination.
    async fn list_all_devices(
        &self,
        application_id: &str,
    ) -> Result<Vec<(String, Option<String>)>, Classification> {
        let mut devices = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let response = self
                .client
                .list_devices(application_id, page_token.as_deref())
                .await
                .map_err(|e| classify_network(e.to_string()))?;

            if !response.ok {
                // A missing application means nothing to tear down.
                if response.status == 404 {
                    return Ok(devices);
                }
                return Err(response
                    .classification()
                    .unwrap_or_else(|| classify_network("unclassifiable list failure")));
            }

            let page: DeviceListPage = response
                .decode()
                .map_err(|e| classify_network(e.to_string()))?;
            for device in page.end_devices {
                devices.push((device.ids.device_id, device.ids.dev_eui));
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(devices),
            }
        }
        Ok(devices)
    }
}
