//! Sensor rows, restricted to the lifecycle-state columns the pipeline
//! owns. The broader sensor schema (placement, calibration, alerts) lives
//! outside this crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Where a device stands relative to the control plane registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningState {
    /// Never provisioned, or credentials cleared.
    NotConfigured,
    /// Existence could not be determined; see `last_check_error`.
    Unknown,
    /// Confirmed present in the remote registry.
    ExistsInTtn,
    /// Expected but confirmed absent from the remote registry.
    MissingInTtn,
    /// The last check itself failed.
    Error,
}

impl std::fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProvisioningState::NotConfigured => write!(f, "not_configured"),
            ProvisioningState::Unknown => write!(f, "unknown"),
            ProvisioningState::ExistsInTtn => write!(f, "exists_in_ttn"),
            ProvisioningState::MissingInTtn => write!(f, "missing_in_ttn"),
            ProvisioningState::Error => write!(f, "error"),
        }
    }
}

/// A sensor's lifecycle view.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Sensor {
    /// Row ID.
    pub id: Uuid,
    /// Owning organization.
    pub organization_id: Uuid,
    /// Hardware DevEUI, 16 uppercase hex characters.
    pub dev_eui: String,
    /// Remote device id (`eui-...`), set once provisioned.
    pub ttn_device_id: Option<String>,
    /// Remote application the device was registered under.
    pub ttn_application_id: Option<String>,
    /// Current registry state.
    pub provisioning_state: ProvisioningState,
    /// When the state was last verified.
    pub last_check_at: Option<DateTime<Utc>>,
    /// Error from the last verification, if it failed.
    pub last_check_error: Option<String>,
}

impl Sensor {
    /// All sensors of an organization, ordered by DevEUI.
    pub async fn list_for_organization(
        pool: &sqlx::PgPool,
        organization_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM sensors
            WHERE organization_id = $1
            ORDER BY dev_eui ASC
            ",
        )
        .bind(organization_id)
        .fetch_all(pool)
        .await
    }

    /// Find one sensor by DevEUI within an organization.
    pub async fn find_by_dev_eui(
        pool: &sqlx::PgPool,
        organization_id: Uuid,
        dev_eui: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"SELECT * FROM sensors WHERE organization_id = $1 AND dev_eui = $2",
        )
        .bind(organization_id)
        .bind(dev_eui)
        .fetch_optional(pool)
        .await
    }

    /// Record the outcome of an existence check, including the remote
    /// device id the sensor was found under.
    ///
    /// A check that could not determine a remote id (`None`) leaves the
    /// stored `ttn_device_id` untouched.
    pub async fn record_check(
        pool: &sqlx::PgPool,
        id: Uuid,
        state: ProvisioningState,
        error: Option<&str>,
        remote_id: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            UPDATE sensors
            SET provisioning_state = $2,
                ttn_device_id = COALESCE($4, ttn_device_id),
                last_check_at = NOW(), last_check_error = $3
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(state)
        .bind(error)
        .bind(remote_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Overwrite the provisioning state without touching the remote id.
    pub async fn update_provisioning_state(
        pool: &sqlx::PgPool,
        id: Uuid,
        state: ProvisioningState,
        error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            UPDATE sensors
            SET provisioning_state = $2, last_check_at = NOW(), last_check_error = $3
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(state)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Reset all of an organization's sensors to `not_configured` after
    /// a teardown.
    pub async fn reset_for_organization(
        pool: &sqlx::PgPool,
        organization_id: Uuid,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE sensors
            SET provisioning_state = 'not_configured',
                ttn_device_id = NULL, ttn_application_id = NULL,
                last_check_at = NOW(), last_check_error = NULL
            WHERE organization_id = $1
            ",
        )
        .bind(organization_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
