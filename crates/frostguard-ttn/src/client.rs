//! Low-level TTN v3 control-plane client.
//!
//! Thin wrapper over reqwest that attaches the bearer credential, enforces
//! the cluster guard on every outbound URL, and returns a uniform
//! [`TtnResponse`] for both success and HTTP-level failure. Only transport
//! failures surface as errors; callers classify those as `NETWORK_ERROR`.

use std::time::Duration;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use crate::classify::{classify, Classification};
use crate::cluster::{assert_single_cluster, ClusterConfig};
use crate::crypto::key_fingerprint;
use crate::error::{TtnError, TtnResult};
use crate::types::ServerRole;

/// Configuration for a [`TtnClient`].
#[derive(Debug, Clone)]
pub struct TtnClientConfig {
    /// Approved cluster base URL, e.g. `https://nam1.cloud.thethings.network`.
    pub base_url: String,
    /// Bearer API key for the control plane.
    pub api_key: String,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
    /// User agent sent with every request.
    pub user_agent: String,
    /// Permit a plain-http base URL. Only for local mock servers.
    pub allow_insecure: bool,
}

impl TtnClientConfig {
    /// Create a config with default timeout and user agent.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout_secs: 30,
            user_agent: concat!("frostguard-ttn/", env!("CARGO_PKG_VERSION")).to_string(),
            allow_insecure: false,
        }
    }

    /// Override the per-call timeout.
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Permit a plain-http base URL (local mock servers only).
    #[must_use]
    pub fn with_allow_insecure(mut self) -> Self {
        self.allow_insecure = true;
        self
    }
}

/// Uniform result of a control-plane call.
///
/// `ok` mirrors the HTTP success range; a 403 or 500 is still an `Ok` return
/// at the Rust level so the caller can classify it.
#[derive(Debug, Clone)]
pub struct TtnResponse {
    /// Whether the HTTP status was 2xx.
    pub ok: bool,
    /// HTTP status code.
    pub status: u16,
    /// Parsed JSON body, `{}` when the response had no body.
    pub body: Value,
    /// Raw body text, kept only when it was not valid JSON.
    pub raw: Option<String>,
}

impl TtnResponse {
    /// Decode the body into a typed shape.
    pub fn decode<T: DeserializeOwned>(&self) -> TtnResult<T> {
        Ok(serde_json::from_value(self.body.clone())?)
    }

    /// Classify this response as a failure. Returns `None` when `ok`.
    #[must_use]
    pub fn classification(&self) -> Option<Classification> {
        if self.ok {
            None
        } else {
            Some(classify(self.status, &self.body))
        }
    }

    /// Whether this response means "deleted or already gone".
    #[must_use]
    pub fn is_gone_or_deleted(&self) -> bool {
        self.ok || self.status == 404
    }

    /// A short body excerpt safe to persist on audit records.
    #[must_use]
    pub fn snippet(&self, max_len: usize) -> String {
        let text = self
            .raw
            .clone()
            .unwrap_or_else(|| self.body.to_string());
        if text.len() <= max_len {
            text
        } else {
            let mut end = max_len;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}…", &text[..end])
        }
    }
}

/// HTTP client for the TTN v3 API, locked to a single cluster.
pub struct TtnClient {
    http: reqwest::Client,
    cluster: ClusterConfig,
    api_key: String,
    fingerprint: String,
}

impl std::fmt::Debug for TtnClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtnClient")
            .field("cluster", &self.cluster.host())
            .field("key", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

impl TtnClient {
    /// Build a client for the approved cluster.
    pub fn new(config: TtnClientConfig) -> TtnResult<Self> {
        let cluster = if config.allow_insecure {
            ClusterConfig::new_allowing_http(&config.base_url)?
        } else {
            ClusterConfig::new(&config.base_url)?
        };
        let fingerprint = key_fingerprint(&config.api_key);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| TtnError::InvalidConfiguration {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            cluster,
            api_key: config.api_key,
            fingerprint,
        })
    }

    /// The approved cluster configuration.
    #[must_use]
    pub fn cluster(&self) -> &ClusterConfig {
        &self.cluster
    }

    /// Issue a request against an API path on the approved cluster.
    pub async fn request(
        &self,
        function: &'static str,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> TtnResult<TtnResponse> {
        let url = self.cluster.endpoint(path);
        self.request_url(function, method, &url, body).await
    }

    /// Issue a request against a full URL. The cluster guard runs first; a
    /// URL off the approved cluster fails before any traffic is sent.
    pub async fn request_url(
        &self,
        function: &'static str,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> TtnResult<TtnResponse> {
        assert_single_cluster(&self.cluster, url)?;

        let request_id = Uuid::new_v4();
        debug!(
            function,
            method = %method,
            endpoint = %url,
            request_id = %request_id,
            key = %self.fingerprint,
            "ttn request"
        );

        let mut builder = self
            .http
            .request(method, url)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(json_body) = body {
            builder = builder.json(json_body);
        }

        let response = builder.send().await.map_err(|e| {
            TtnError::network_with_source(format!("{function}: transport failure"), e)
        })?;

        let status = response.status().as_u16();
        let ok = response.status().is_success();
        let text = response.text().await.map_err(|e| {
            TtnError::network_with_source(format!("{function}: failed reading body"), e)
        })?;

        let (parsed, raw) = if text.trim().is_empty() {
            (json!({}), None)
        } else {
            match serde_json::from_str::<Value>(&text) {
                Ok(value) => (value, None),
                Err(_) => (Value::Null, Some(text)),
            }
        };

        debug!(
            function,
            status,
            request_id = %request_id,
            "ttn response"
        );

        Ok(TtnResponse {
            ok,
            status,
            body: parsed,
            raw,
        })
    }

    // ── Organizations ────────────────────────────────────────────────────

    /// Soft-delete an organization.
    pub async fn delete_organization(&self, org_id: &str) -> TtnResult<TtnResponse> {
        self.request(
            "delete_organization",
            Method::DELETE,
            &format!("/api/v3/organizations/{org_id}"),
            None,
        )
        .await
    }

    /// Hard-delete (purge) an organization.
    pub async fn purge_organization(&self, org_id: &str) -> TtnResult<TtnResponse> {
        self.request(
            "purge_organization",
            Method::DELETE,
            &format!("/api/v3/organizations/{org_id}/purge"),
            None,
        )
        .await
    }

    // ── Applications ─────────────────────────────────────────────────────

    /// Fetch an application.
    pub async fn get_application(&self, app_id: &str) -> TtnResult<TtnResponse> {
        self.request(
            "get_application",
            Method::GET,
            &format!("/api/v3/applications/{app_id}"),
            None,
        )
        .await
    }

    /// Create an application under an organization.
    pub async fn create_application(
        &self,
        org_id: &str,
        application: &Value,
    ) -> TtnResult<TtnResponse> {
        self.request(
            "create_application",
            Method::POST,
            &format!("/api/v3/organizations/{org_id}/applications"),
            Some(&json!({ "application": application })),
        )
        .await
    }

    /// Soft-delete an application.
    pub async fn delete_application(&self, app_id: &str) -> TtnResult<TtnResponse> {
        self.request(
            "delete_application",
            Method::DELETE,
            &format!("/api/v3/applications/{app_id}"),
            None,
        )
        .await
    }

    /// Hard-delete (purge) an application.
    pub async fn purge_application(&self, app_id: &str) -> TtnResult<TtnResponse> {
        self.request(
            "purge_application",
            Method::DELETE,
            &format!("/api/v3/applications/{app_id}/purge"),
            None,
        )
        .await
    }

    /// Create an application API key with the given rights.
    pub async fn create_application_api_key(
        &self,
        app_id: &str,
        name: &str,
        rights: &[&str],
    ) -> TtnResult<TtnResponse> {
        self.request(
            "create_application_api_key",
            Method::POST,
            &format!("/api/v3/applications/{app_id}/api-keys"),
            Some(&json!({ "name": name, "rights": rights })),
        )
        .await
    }

    /// Create the uplink webhook for an application.
    pub async fn create_webhook(&self, app_id: &str, webhook: &Value) -> TtnResult<TtnResponse> {
        self.request(
            "create_webhook",
            Method::POST,
            &format!("/api/v3/as/webhooks/{app_id}"),
            Some(webhook),
        )
        .await
    }

    // ── End devices ──────────────────────────────────────────────────────

    /// Fetch a device from the registry of a given server role.
    pub async fn get_device(
        &self,
        role: ServerRole,
        app_id: &str,
        device_id: &str,
    ) -> TtnResult<TtnResponse> {
        self.request(
            "get_device",
            Method::GET,
            &format!(
                "/api/v3{}/applications/{app_id}/devices/{device_id}?field_mask=ids",
                role.path_prefix()
            ),
            None,
        )
        .await
    }

    /// Delete a device from one server role's mirror.
    pub async fn delete_device(
        &self,
        role: ServerRole,
        app_id: &str,
        device_id: &str,
    ) -> TtnResult<TtnResponse> {
        self.request(
            "delete_device",
            Method::DELETE,
            &format!(
                "/api/v3{}/applications/{app_id}/devices/{device_id}",
                role.path_prefix()
            ),
            None,
        )
        .await
    }

    /// Hard-delete (purge) a device from the identity registry. This is the
    /// step that releases the DevEUI for reuse.
    pub async fn purge_device(&self, app_id: &str, device_id: &str) -> TtnResult<TtnResponse> {
        self.request(
            "purge_device",
            Method::DELETE,
            &format!("/api/v3/applications/{app_id}/devices/{device_id}/purge"),
            None,
        )
        .await
    }

    /// Search all reachable registrations for a DevEUI.
    pub async fn search_end_devices(&self, dev_eui: &str) -> TtnResult<TtnResponse> {
        self.request(
            "search_end_devices",
            Method::GET,
            &format!("/api/v3/end_devices?dev_eui={dev_eui}"),
            None,
        )
        .await
    }

    /// List one page of an application's devices.
    pub async fn list_devices(
        &self,
        app_id: &str,
        page_token: Option<&str>,
    ) -> TtnResult<TtnResponse> {
        let mut path = format!("/api/v3/applications/{app_id}/devices?field_mask=ids&page_size=100");
        if let Some(token) = page_token {
            path.push_str("&page_token=");
            path.push_str(token);
        }
        self.request("list_devices", Method::GET, &path, None).await
    }

    // ── Gateways ─────────────────────────────────────────────────────────

    /// Register a gateway under an organization.
    pub async fn register_gateway(
        &self,
        org_id: &str,
        gateway: &Value,
    ) -> TtnResult<TtnResponse> {
        self.request(
            "register_gateway",
            Method::POST,
            &format!("/api/v3/organizations/{org_id}/gateways"),
            Some(&json!({ "gateway": gateway })),
        )
        .await
    }

    /// Fetch a gateway registration.
    pub async fn get_gateway(&self, gateway_id: &str) -> TtnResult<TtnResponse> {
        self.request(
            "get_gateway",
            Method::GET,
            &format!(
                "/api/v3/gateways/{gateway_id}?field_mask=ids,name,frequency_plan_ids,gateway_server_address"
            ),
            None,
        )
        .await
    }

    /// List one page of reachable gateways.
    pub async fn list_gateways(&self, page_token: Option<&str>) -> TtnResult<TtnResponse> {
        let mut path = "/api/v3/gateways?field_mask=ids&page_size=100".to_string();
        if let Some(token) = page_token {
            path.push_str("&page_token=");
            path.push_str(token);
        }
        self.request("list_gateways", Method::GET, &path, None)
            .await
    }

    /// Soft-delete a gateway.
    pub async fn delete_gateway(&self, gateway_id: &str) -> TtnResult<TtnResponse> {
        self.request(
            "delete_gateway",
            Method::DELETE,
            &format!("/api/v3/gateways/{gateway_id}"),
            None,
        )
        .await
    }

    /// Hard-delete (purge) a gateway, releasing its EUI.
    pub async fn purge_gateway(&self, gateway_id: &str) -> TtnResult<TtnResponse> {
        self.request(
            "purge_gateway",
            Method::DELETE,
            &format!("/api/v3/gateways/{gateway_id}/purge"),
            None,
        )
        .await
    }

    /// Create a gateway API key (LNS/CUPS connection credentials).
    pub async fn create_gateway_api_key(
        &self,
        gateway_id: &str,
        name: &str,
        rights: &[&str],
    ) -> TtnResult<TtnResponse> {
        self.request(
            "create_gateway_api_key",
            Method::POST,
            &format!("/api/v3/gateways/{gateway_id}/api-keys"),
            Some(&json!({ "name": name, "rights": rights })),
        )
        .await
    }

    /// Gateway Server connection stats: last-seen timestamps and RTTs.
    pub async fn gateway_connection_stats(&self, gateway_id: &str) -> TtnResult<TtnResponse> {
        self.request(
            "gateway_connection_stats",
            Method::GET,
            &format!("/api/v3/gs/gateways/{gateway_id}/connection/stats"),
            None,
        )
        .await
    }
}
