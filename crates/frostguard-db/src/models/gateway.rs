//! Gateway rows, lifecycle-state columns only.
//!
//! Gateways additionally carry liveness data (last seen, median round
//! trip) pulled from the gateway server's connection stats, which devices
//! have no equivalent of.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::sensor::ProvisioningState;

/// A gateway's lifecycle view.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Gateway {
    /// Row ID.
    pub id: Uuid,
    /// Owning organization.
    pub organization_id: Uuid,
    /// Hardware gateway EUI, 16 uppercase hex characters.
    pub gateway_eui: String,
    /// Remote gateway id (`fg-gw-...`), set once registered.
    pub ttn_gateway_id: Option<String>,
    /// Current registry state.
    pub provisioning_state: ProvisioningState,
    /// When the state was last verified.
    pub last_check_at: Option<DateTime<Utc>>,
    /// Error from the last verification, if it failed.
    pub last_check_error: Option<String>,
    /// Last uplink observed by the gateway server.
    pub last_seen_at: Option<DateTime<Utc>>,
    /// Median round trip to the gateway server, in milliseconds.
    pub rtt_median_ms: Option<i32>,
}

impl Gateway {
    /// All gateways of an organization, ordered by EUI.
    pub async fn list_for_organization(
        pool: &sqlx::PgPool,
        organization_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM gateways
            WHERE organization_id = $1
            ORDER BY gateway_eui ASC
            ",
        )
        .bind(organization_id)
        .fetch_all(pool)
        .await
    }

    /// Record the outcome of an existence check.
    pub async fn update_provisioning_state(
        pool: &sqlx::PgPool,
        id: Uuid,
        state: ProvisioningState,
        error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            UPDATE gateways
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

    /// Record liveness data from the gateway server's connection stats.
    pub async fn update_connection_stats(
        pool: &sqlx::PgPool,
        id: Uuid,
        last_seen_at: Option<DateTime<Utc>>,
        rtt_median_ms: Option<i32>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            UPDATE gateways
            SET last_seen_at = COALESCE($2, last_seen_at),
                rtt_median_ms = COALESCE($3, rtt_median_ms)
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(last_seen_at)
        .bind(rtt_median_ms)
        .execute(pool)
        .await?;
        Ok(())
    }
}
