//! # FrostGuard TTN client
//!
//! Control-plane client layer for The Things Network v3, scoped to a single
//! approved cluster for the whole deployment.
//!
//! This crate provides:
//! - Cluster guard: every outbound URL is checked against the approved
//!   cluster before any traffic is sent
//! - A uniform HTTP wrapper that never errors on 4xx/5xx responses
//! - The fixed error taxonomy and retry/block classification
//! - Typed response shapes for the endpoints the lifecycle pipeline touches
//! - AES-256-GCM credential encryption for stored API keys

pub mod classify;
pub mod client;
pub mod cluster;
pub mod crypto;
pub mod error;
pub mod types;

pub use classify::{classify, classify_network, Classification, ErrorCode};
pub use client::{TtnClient, TtnClientConfig, TtnResponse};
pub use cluster::{assert_single_cluster, ClusterConfig, ClusterConfigError, ClusterViolation};
pub use crypto::{key_fingerprint, CredentialEncryption};
pub use error::{TtnError, TtnResult};
pub use types::{
    device_id_for_eui, gateway_id_for_eui, normalize_dev_eui, parse_go_duration, ApiKeyCreated,
    ConnectionStats, DeviceListPage, EndDevice, EndDeviceIds, EndDeviceSearchResult,
    GatewayIds, GatewayListPage, GatewayRecord, RoundTripTimes, ServerRole,
};
