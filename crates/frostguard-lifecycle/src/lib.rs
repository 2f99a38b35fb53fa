//! # FrostGuard lifecycle orchestration
//!
//! Provisioning and deprovisioning of LoRaWAN sensors, gateways, and their
//! TTN applications. The orchestrators here are pure over HTTP: they take a
//! [`frostguard_ttn::client::TtnClient`] and produce step reports; the
//! [`worker::LifecycleWorker`] glues them to the job queues and persistence
//! in `frostguard-db`.

pub mod deprovisioner;
pub mod error;
pub mod gateway;
pub mod provisioner;
pub mod run;
pub mod verifier;
pub mod worker;

pub use deprovisioner::DeprovisionExecutor;
pub use error::{LifecycleError, LifecycleResult};
pub use gateway::{
    GatewayArtifacts, GatewayExecutor, GatewayProvisionRequest, CUPS_KEY_RIGHTS,
    GATEWAY_DEFAULT_FREQUENCY_PLAN, LNS_KEY_RIGHTS,
};
pub use provisioner::{
    application_id_for_slug, valid_org_slug, ProvisionArtifacts, ProvisionExecutor,
    ProvisionFailure, ProvisionRequest, ProvisionRun, ProvisionStep, PERMANENT_ERROR_CODES,
    WEBHOOK_ID,
};
pub use run::{derive_outcome, RunOutcome, RunReport, StepRecord, SNIPPET_MAX_LEN};
pub use verifier::{client_for_org, CheckResult, ExistenceVerifier, GatewayCheck, VerifySummary};
pub use worker::{JobKind, JobSummary, LifecycleWorker, WorkerConfig};
