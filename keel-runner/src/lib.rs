//! Keel Runner
//!
//! The deployment pipeline: capability provisioning, source sync, dependency
//! install and verification, frontend build, process reconciliation, proxy
//! configuration and post-deployment verification.
//!
//! This crate contains:
//! - Pipeline controller: stage sequencing and abort policies
//! - Services: one module per host collaborator
//! - Scheduler: trigger serialization and run history

pub mod config;
pub mod context;
pub mod error;
pub mod exec;
pub mod pipeline;
pub mod plan;
pub mod scheduler;
pub mod service;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{RunnerConfig, TriggerPolicy};
pub use error::{PipelineError, Result};
pub use pipeline::PipelineController;
pub use scheduler::{RunScheduler, Submission};
