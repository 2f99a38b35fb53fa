//! Persistence models for the lifecycle pipeline.

pub mod connection_config;
pub mod deprovision_job;
pub mod gateway;
pub mod provisioning_job;
pub mod run_step;
pub mod sensor;
