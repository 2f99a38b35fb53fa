//! Per-organization TTN connection configuration.
//!
//! Holds the remote application id and encrypted credentials written by
//! provisioning and cleared by deprovisioning. Only the encrypted blob and
//! the last-4 fingerprint of the API key are stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Scope of the stored API key.
///
/// Application-scoped keys cannot read the gateway registry at all; the
/// gateway existence check is gated on this flag up front rather than
/// inferred from a transient 403/404.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CredentialScope {
    /// Organization-scoped: can manage applications, devices, and gateways.
    Organization,
    /// Application-scoped: devices only, no gateway registry access.
    Application,
}

impl std::fmt::Display for CredentialScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialScope::Organization => write!(f, "organization"),
            CredentialScope::Application => write!(f, "application"),
        }
    }
}

/// One organization's connection to the control plane.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TtnConnectionConfig {
    /// Row ID.
    pub id: Uuid,
    /// Owning organization.
    pub organization_id: Uuid,
    /// Whether the connection is enabled.
    pub enabled: bool,
    /// Approved cluster short name, e.g. `nam1`.
    pub cluster: String,
    /// Remote TTN organization id, when one was created.
    pub ttn_organization_id: Option<String>,
    /// Remote application id.
    pub application_id: Option<String>,
    /// API key, AES-256-GCM encrypted.
    #[serde(skip_serializing)]
    pub api_key_encrypted: Option<Vec<u8>>,
    /// Last 4 characters of the API key, for display.
    pub api_key_last4: Option<String>,
    /// Scope of the stored key.
    pub api_key_scope: Option<CredentialScope>,
    /// Uplink webhook id.
    pub webhook_id: Option<String>,
    /// Uplink webhook signing secret.
    #[serde(skip_serializing)]
    pub webhook_secret: Option<String>,
    /// Result of the last connection test.
    pub last_test_ok: Option<bool>,
    /// When the last connection test ran.
    pub last_test_at: Option<DateTime<Utc>>,
    /// Error from the last connection test, if it failed.
    pub last_test_error: Option<String>,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Credentials written by a successful provisioning run.
#[derive(Debug, Clone)]
pub struct NewCredentials {
    pub ttn_organization_id: Option<String>,
    pub application_id: String,
    pub api_key_encrypted: Vec<u8>,
    pub api_key_last4: String,
    pub api_key_scope: CredentialScope,
    pub webhook_id: String,
    pub webhook_secret: String,
}

impl TtnConnectionConfig {
    /// Find the connection config for an organization.
    pub async fn find_by_organization(
        pool: &sqlx::PgPool,
        organization_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(r"SELECT * FROM ttn_connection_configs WHERE organization_id = $1")
            .bind(organization_id)
            .fetch_optional(pool)
            .await
    }

    /// Create the initial (disabled, credential-less) config row.
    pub async fn create(
        pool: &sqlx::PgPool,
        organization_id: Uuid,
        cluster: &str,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r"
            INSERT INTO ttn_connection_configs (organization_id, cluster)
            VALUES ($1, $2)
            ON CONFLICT (organization_id) DO UPDATE SET updated_at = NOW()
            RETURNING *
            ",
        )
        .bind(organization_id)
        .bind(cluster)
        .fetch_one(pool)
        .await
    }

    /// Persist credentials after a successful provisioning run and enable
    /// the connection.
    pub async fn save_credentials(
        pool: &sqlx::PgPool,
        organization_id: Uuid,
        credentials: &NewCredentials,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            UPDATE ttn_connection_configs
            SET enabled = TRUE,
                ttn_organization_id = $2,
                application_id = $3,
                api_key_encrypted = $4,
                api_key_last4 = $5,
                api_key_scope = $6,
                webhook_id = $7,
                webhook_secret = $8,
                updated_at = NOW()
            WHERE organization_id = $1
            ",
        )
        .bind(organization_id)
        .bind(&credentials.ttn_organization_id)
        .bind(&credentials.application_id)
        .bind(&credentials.api_key_encrypted)
        .bind(&credentials.api_key_last4)
        .bind(credentials.api_key_scope)
        .bind(&credentials.webhook_id)
        .bind(&credentials.webhook_secret)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Null out all credential state after a successful deprovision run
    /// (or a forced one).
    pub async fn clear_credentials(
        pool: &sqlx::PgPool,
        organization_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            UPDATE ttn_connection_configs
            SET enabled = FALSE,
                ttn_organization_id = NULL,
                application_id = NULL,
                api_key_encrypted = NULL,
                api_key_last4 = NULL,
                api_key_scope = NULL,
                webhook_id = NULL,
                webhook_secret = NULL,
                updated_at = NOW()
            WHERE organization_id = $1
            ",
        )
        .bind(organization_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Record the outcome of a connection test.
    pub async fn record_connection_test(
        pool: &sqlx::PgPool,
        organization_id: Uuid,
        ok: bool,
        error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            UPDATE ttn_connection_configs
            SET last_test_ok = $2, last_test_at = NOW(), last_test_error = $3,
                updated_at = NOW()
            WHERE organization_id = $1
            ",
        )
        .bind(organization_id)
        .bind(ok)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Whether the config carries a usable credential.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.enabled && self.api_key_encrypted.is_some() && self.application_id.is_some()
    }

    /// Whether the stored credential can read the gateway registry.
    #[must_use]
    pub fn can_read_gateways(&self) -> bool {
        matches!(self.api_key_scope, Some(CredentialScope::Organization))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_scope(scope: Option<CredentialScope>) -> TtnConnectionConfig {
        TtnConnectionConfig {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            enabled: true,
            cluster: "nam1".to_string(),
            ttn_organization_id: Some("fg-org-acme".to_string()),
            application_id: Some("fg-app-acme".to_string()),
            api_key_encrypted: Some(vec![1, 2, 3]),
            api_key_last4: Some("WXYZ".to_string()),
            api_key_scope: scope,
            webhook_id: Some("fg-uplinks".to_string()),
            webhook_secret: Some("shhh".to_string()),
            last_test_ok: None,
            last_test_at: None,
            last_test_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_has_credentials() {
        let config = config_with_scope(Some(CredentialScope::Organization));
        assert!(config.has_credentials());

        let mut missing = config_with_scope(None);
        missing.api_key_encrypted = None;
        assert!(!missing.has_credentials());

        let mut disabled = config_with_scope(None);
        disabled.enabled = false;
        assert!(!disabled.has_credentials());
    }

    #[test]
    fn test_gateway_capability_is_scope_based() {
        assert!(config_with_scope(Some(CredentialScope::Organization)).can_read_gateways());
        assert!(!config_with_scope(Some(CredentialScope::Application)).can_read_gateways());
        assert!(!config_with_scope(None).can_read_gateways());
    }

    #[test]
    fn test_secrets_not_serialized() {
        let config = config_with_scope(Some(CredentialScope::Organization));
        let json = serde_json::to_value(&config).unwrap();
        assert!(json.get("api_key_encrypted").is_none());
        assert!(json.get("webhook_secret").is_none());
        assert_eq!(json["api_key_last4"], "WXYZ");
    }
}
