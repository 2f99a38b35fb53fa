//! # FrostGuard persistence layer
//!
//! Job queues, connection configuration, and audit records for the device
//! lifecycle pipeline. Business entities (sites, units, sensors) live
//! elsewhere; this crate only owns the lifecycle-state fields the pipeline
//! reads and writes.

pub mod error;
pub mod migrations;
pub mod models;
pub mod pool;

pub use error::DbError;
pub use migrations::run_migrations;
pub use pool::connect;
pub use models::connection_config::{CredentialScope, NewCredentials, TtnConnectionConfig};
pub use models::deprovision_job::{
    backoff_delay, DeprovisionJob, DeprovisionJobStatus, NewDeprovisionJob,
    RETRY_BACKOFF_MINUTES,
};
pub use models::gateway::Gateway;
pub use models::provisioning_job::{ProvisioningJob, ProvisioningJobStatus};
pub use models::run_step::{
    DeprovisionRunStep, NewDeprovisionRunStep, StepStatus, StepTargetType,
};
pub use models::sensor::{ProvisioningState, Sensor};
