//! Existence verification against the control plane.
//!
//! The cheap path lists an application's devices once and answers every
//! sensor's check from the resulting DevEUI map. When the listing itself
//! fails, each device falls back to direct registry fetches before its
//! state is marked `error`; `missing_in_ttn` is only ever recorded off
//! clean 404s, never off an ambiguous failure.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use frostguard_db::{CredentialScope, Gateway, ProvisioningState, Sensor, TtnConnectionConfig};
use frostguard_ttn::client::{TtnClient, TtnClientConfig};
use frostguard_ttn::crypto::CredentialEncryption;
use frostguard_ttn::error::TtnError;
use frostguard_ttn::types::{
    device_id_for_eui, normalize_dev_eui, ConnectionStats, DeviceListPage, GatewayListPage,
    ServerRole,
};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{LifecycleError, LifecycleResult};

/// Upper bound on device-list pages per verification sweep.
const MAX_LIST_PAGES: usize = 100;

/// Build a client from an organization's stored credentials.
///
/// Verification sweeps run with the organization's own key, not the admin
/// credential.
pub fn client_for_org(
    base_url: &str,
    config: &TtnConnectionConfig,
    encryption: &CredentialEncryption,
) -> LifecycleResult<TtnClient> {
    let blob = config
        .api_key_encrypted
        .as_deref()
        .filter(|_| config.has_credentials())
        .ok_or(LifecycleError::MissingCredentials {
            organization_id: config.organization_id,
        })?;
    let key_bytes = encryption.decrypt(config.organization_id, blob)?;
    let api_key = String::from_utf8(key_bytes).map_err(|_| {
        LifecycleError::Ttn(TtnError::DecryptionFailed {
            message: "decrypted credential is not valid UTF-8".to_string(),
        })
    })?;
    Ok(TtnClient::new(TtnClientConfig::new(base_url, api_key))?)
}

/// Outcome of checking one device or gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckResult {
    /// Confirmed present; carries the remote id it was found under.
    Exists { remote_id: String },
    /// Confirmed absent.
    Missing,
    /// Existence could not be determined.
    Failed { message: String },
}

impl CheckResult {
    /// The persistence state this result maps to.
    #[must_use]
    pub fn state(&self) -> ProvisioningState {
        match self {
            CheckResult::Exists { .. } => ProvisioningState::ExistsInTtn,
            CheckResult::Missing => ProvisioningState::MissingInTtn,
            CheckResult::Failed { .. } => ProvisioningState::Error,
        }
    }

    /// The error message to persist, if any.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match self {
            CheckResult::Failed { message } => Some(message),
            _ => None,
        }
    }

    /// The remote id, when confirmed present.
    #[must_use]
    pub fn remote_id(&self) -> Option<&str> {
        match self {
            CheckResult::Exists { remote_id } => Some(remote_id),
            _ => None,
        }
    }
}

/// Result of a gateway check, including liveness data when reachable.
#[derive(Debug, Clone)]
pub struct GatewayCheck {
    /// Existence result.
    pub result: CheckResult,
    /// Last uplink or status message seen by the Gateway Server.
    pub last_seen_at: Option<DateTime<Utc>>,
    /// Median round trip in milliseconds.
    pub rtt_median_ms: Option<i32>,
}

/// Counts from one verification sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifySummary {
    pub checked: usize,
    pub exists: usize,
    pub missing: usize,
    pub failed: usize,
}

impl VerifySummary {
    fn count(&mut self, result: &CheckResult) {
        self.checked += 1;
        match result {
            CheckResult::Exists { .. } => self.exists += 1,
            CheckResult::Missing => self.missing += 1,
            CheckResult::Failed { .. } => self.failed += 1,
        }
    }
}

/// Checks whether locally known devices still exist remotely.
#[derive(Debug)]
pub struct ExistenceVerifier<'a> {
    client: &'a TtnClient,
}

impl<'a> ExistenceVerifier<'a> {
    /// Create a verifier.
    #[must_use]
    pub fn new(client: &'a TtnClient) -> Self {
        Self { client }
    }

    /// Build the DevEUI -> device id map for an application.
    ///
    /// Returns `None` when the listing failed; callers then fall back to
    /// per-device checks instead of treating every device as missing.
    pub async fn device_map(&self, application_id: &str) -> Option<HashMap<String, String>> {
        let mut map = HashMap::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let response = match self
                .client
                .list_devices(application_id, page_token.as_deref())
                .await
            {
                Ok(response) if response.ok => response,
                Ok(response) => {
                    warn!(application_id, status = response.status, "device listing failed");
                    return None;
                }
                Err(error) => {
                    warn!(application_id, error = %error, "device listing failed");
                    return None;
                }
            };

            let page: DeviceListPage = match response.decode() {
                Ok(page) => page,
                Err(error) => {
                    warn!(application_id, error = %error, "device listing undecodable");
                    return None;
                }
            };

            for device in page.end_devices {
                if let Some(eui) = device.ids.dev_eui.as_deref().and_then(normalize_dev_eui) {
                    map.insert(eui, device.ids.device_id);
                }
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Some(map),
            }
        }
        Some(map)
    }

    /// Check one device, using the map when available.
    pub async fn check_device(
        &self,
        application_id: &str,
        dev_eui: &str,
        map: Option<&HashMap<String, String>>,
    ) -> CheckResult {
        let Some(normalized) = normalize_dev_eui(dev_eui) else {
            return CheckResult::Failed {
                message: format!("malformed DevEUI {dev_eui:?}"),
            };
        };

        if let Some(map) = map {
            // The listing is authoritative: absence from a complete map is a
            // confirmed miss, not an error.
            return match map.get(&normalized) {
                Some(device_id) => CheckResult::Exists {
                    remote_id: device_id.clone(),
                },
                None => CheckResult::Missing,
            };
        }

        self.check_device_direct(application_id, &device_id_for_eui(&normalized))
            .await
    }

    /// Fallback for one device: identity registry first, then the Network
    /// Server mirror. Missing only when both return clean 404s.
    async fn check_device_direct(&self, application_id: &str, device_id: &str) -> CheckResult {
        let registry = self
            .client
            .get_device(ServerRole::Identity, application_id, device_id)
            .await;

        let registry_status = match registry {
            Ok(response) if response.ok => {
                return CheckResult::Exists {
                    remote_id: device_id.to_string(),
                }
            }
            Ok(response) => Some(response.status),
            Err(_) => None,
        };

        let network = self
            .client
            .get_device(ServerRole::Network, application_id, device_id)
            .await;

        match network {
            Ok(response) if response.ok => CheckResult::Exists {
                remote_id: device_id.to_string(),
            },
            Ok(response) if response.status == 404 && registry_status == Some(404) => {
                CheckResult::Missing
            }
            Ok(response) => CheckResult::Failed {
                message: format!(
                    "registry returned {}, network server returned {}",
                    registry_status.map_or_else(|| "transport failure".to_string(), |s| s.to_string()),
                    response.status
                ),
            },
            Err(error) => CheckResult::Failed {
                message: format!("network server check failed: {error}"),
            },
        }
    }

    /// Build the set of reachable gateway ids.
    ///
    /// Returns `None` when the listing failed; callers then fall back to
    /// per-gateway fetches.
    pub async fn gateway_map(&self) -> Option<HashSet<String>> {
        let mut set = HashSet::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let response = match self.client.list_gateways(page_token.as_deref()).await {
                Ok(response) if response.ok => response,
                Ok(response) => {
                    warn!(status = response.status, "gateway listing failed");
                    return None;
                }
                Err(error) => {
                    warn!(error = %error, "gateway listing failed");
                    return None;
                }
            };

            let page: GatewayListPage = match response.decode() {
                Ok(page) => page,
                Err(error) => {
                    warn!(error = %error, "gateway listing undecodable");
                    return None;
                }
            };

            for gateway in page.gateways {
                set.insert(gateway.ids.gateway_id);
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Some(set),
            }
        }
        Some(set)
    }

    /// Check a gateway's registration and connection stats.
    ///
    /// Application-scoped credentials cannot read the gateway registry, so
    /// the check is refused up front instead of burning a request on a
    /// guaranteed 403. A complete `registry` listing answers existence
    /// without a per-gateway fetch.
    pub async fn check_gateway(
        &self,
        scope: Option<CredentialScope>,
        gateway_id: &str,
        registry: Option<&HashSet<String>>,
    ) -> GatewayCheck {
        if scope != Some(CredentialScope::Organization) {
            return GatewayCheck {
                result: CheckResult::Failed {
                    message: "stored API key is application-scoped; gateway checks require an \
                              organization-scoped key"
                        .to_string(),
                },
                last_seen_at: None,
                rtt_median_ms: None,
            };
        }

        let registration = if let Some(registry) = registry {
            // The listing is authoritative, same as the device map.
            if registry.contains(gateway_id) {
                CheckResult::Exists {
                    remote_id: gateway_id.to_string(),
                }
            } else {
                CheckResult::Missing
            }
        } else {
            match self.client.get_gateway(gateway_id).await {
                Ok(response) if response.ok => CheckResult::Exists {
                    remote_id: gateway_id.to_string(),
                },
                Ok(response) if response.status == 404 => CheckResult::Missing,
                Ok(response) => CheckResult::Failed {
                    message: response
                        .classification()
                        .map_or_else(|| format!("status {}", response.status), |c| c.message),
                },
                Err(error) => CheckResult::Failed {
                    message: format!("gateway check failed: {error}"),
                },
            }
        };

        if !matches!(registration, CheckResult::Exists { .. }) {
            return GatewayCheck {
                result: registration,
                last_seen_at: None,
                rtt_median_ms: None,
            };
        }

        // Stats are best effort; a disconnected gateway returns 404 here
        // while still being registered.
        let (last_seen_at, rtt_median_ms) =
            match self.client.gateway_connection_stats(gateway_id).await {
                Ok(response) if response.ok => match response.decode::<ConnectionStats>() {
                    Ok(stats) => (last_seen(&stats), median_ms(&stats)),
                    Err(_) => (None, None),
                },
                _ => (None, None),
            };

        GatewayCheck {
            result: registration,
            last_seen_at,
            rtt_median_ms,
        }
    }

    /// Exercise the credential with a cheap read of the organization's
    /// application.
    ///
    /// Returns the error message to surface when the credential does not
    /// work. A 2xx proves both reachability and rights on the application.
    pub async fn check_connection(&self, application_id: &str) -> Result<(), String> {
        match self.client.get_application(application_id).await {
            Ok(response) if response.ok => Ok(()),
            Ok(response) => Err(response.classification().map_or_else(
                || format!("status {}", response.status),
                |c| format!("{}: {}", c.code, c.message),
            )),
            Err(error) => Err(format!("connection test failed: {error}")),
        }
    }

    /// Run the connection test for an organization and persist the outcome
    /// on its connection config.
    pub async fn run_connection_test(
        &self,
        pool: &PgPool,
        organization_id: Uuid,
        application_id: &str,
    ) -> LifecycleResult<bool> {
        let result = self.check_connection(application_id).await;
        let ok = result.is_ok();
        TtnConnectionConfig::record_connection_test(
            pool,
            organization_id,
            ok,
            result.as_ref().err().map(String::as_str),
        )
        .await?;
        info!(%organization_id, application_id, ok, "connection test recorded");
        Ok(ok)
    }

    /// Verify every sensor of an organization and persist the results.
    pub async fn verify_sensors(
        &self,
        pool: &PgPool,
        organization_id: Uuid,
        application_id: &str,
    ) -> LifecycleResult<VerifySummary> {
        let sensors = Sensor::list_for_organization(pool, organization_id).await?;
        let map = self.device_map(application_id).await;
        let mut summary = VerifySummary::default();

        for sensor in &sensors {
            let result = self
                .check_device(application_id, &sensor.dev_eui, map.as_ref())
                .await;
            summary.count(&result);
            Sensor::record_check(
                pool,
                sensor.id,
                result.state(),
                result.error_message(),
                result.remote_id(),
            )
            .await?;
        }

        info!(
            %organization_id,
            checked = summary.checked,
            exists = summary.exists,
            missing = summary.missing,
            failed = summary.failed,
            "sensor verification sweep complete"
        );
        Ok(summary)
    }

    /// Verify every gateway of an organization and persist the results.
    pub async fn verify_gateways(
        &self,
        pool: &PgPool,
        organization_id: Uuid,
        scope: Option<CredentialScope>,
    ) -> LifecycleResult<VerifySummary> {
        let gateways = Gateway::list_for_organization(pool, organization_id).await?;
        let mut summary = VerifySummary::default();

        let registry = if scope == Some(CredentialScope::Organization)
            && gateways.iter().any(|g| g.ttn_gateway_id.is_some())
        {
            self.gateway_map().await
        } else {
            None
        };

        for gateway in &gateways {
            let Some(gateway_id) = gateway.ttn_gateway_id.as_deref() else {
                summary.checked += 1;
                summary.missing += 1;
                Gateway::update_provisioning_state(
                    pool,
                    gateway.id,
                    ProvisioningState::NotConfigured,
                    None,
                )
                .await?;
                continue;
            };

            let check = self.check_gateway(scope, gateway_id, registry.as_ref()).await;
            summary.count(&check.result);
            Gateway::update_provisioning_state(
                pool,
                gateway.id,
                check.result.state(),
                check.result.error_message(),
            )
            .await?;
            if check.last_seen_at.is_some() || check.rtt_median_ms.is_some() {
                Gateway::update_connection_stats(
                    pool,
                    gateway.id,
                    check.last_seen_at,
                    check.rtt_median_ms,
                )
                .await?;
            }
        }

        info!(
            %organization_id,
            checked = summary.checked,
            exists = summary.exists,
            missing = summary.missing,
            failed = summary.failed,
            "gateway verification sweep complete"
        );
        Ok(summary)
    }
}

fn last_seen(stats: &ConnectionStats) -> Option<DateTime<Utc>> {
    stats
        .last_uplink_received_at
        .as_deref()
        .or(stats.last_status_received_at.as_deref())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn median_ms(stats: &ConnectionStats) -> Option<i32> {
    stats
        .round_trip_times
        .as_ref()
        .and_then(|rtt| rtt.median_duration())
        .and_then(|d| i32::try_from(d.as_millis()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use frostguard_ttn::types::RoundTripTimes;

    #[test]
    fn test_check_result_states() {
        let exists = CheckResult::Exists {
            remote_id: "eui-x".to_string(),
        };
        assert_eq!(exists.state(), ProvisioningState::ExistsInTtn);
        assert_eq!(CheckResult::Missing.state(), ProvisioningState::MissingInTtn);

        let failed = CheckResult::Failed {
            message: "boom".to_string(),
        };
        assert_eq!(failed.state(), ProvisioningState::Error);
        assert_eq!(failed.error_message(), Some("boom"));
    }

    #[test]
    fn test_last_seen_prefers_uplink() {
        let stats = ConnectionStats {
            connected_at: None,
            last_uplink_received_at: Some("2026-08-01T10:00:00Z".to_string()),
            last_status_received_at: Some("2026-08-01T09:00:00Z".to_string()),
            round_trip_times: None,
        };
        let seen = last_seen(&stats).unwrap();
        assert_eq!(seen.to_rfc3339(), "2026-08-01T10:00:00+00:00");
    }

    #[test]
    fn test_median_ms_from_go_duration() {
        let stats = ConnectionStats {
            connected_at: None,
            last_uplink_received_at: None,
            last_status_received_at: None,
            round_trip_times: Some(RoundTripTimes {
                min: None,
                max: None,
                median: Some("45ms".to_string()),
            }),
        };
        assert_eq!(median_ms(&stats), Some(45));
    }

    #[test]
    fn test_summary_counting() {
        let mut summary = VerifySummary::default();
        summary.count(&CheckResult::Missing);
        summary.count(&CheckResult::Exists {
            remote_id: "x".to_string(),
        });
        summary.count(&CheckResult::Failed {
            message: "y".to_string(),
        });
        assert_eq!(summary.checked, 3);
        assert_eq!(summary.exists, 1);
        assert_eq!(summary.missing, 1);
        assert_eq!(summary.failed, 1);
    }
}
