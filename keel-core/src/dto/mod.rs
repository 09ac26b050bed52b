//! Data Transfer Objects for the orchestrator API
//!
//! DTOs are lightweight representations of domain entities exchanged between
//! the orchestrator and its clients (CLI, source-control webhooks).

pub mod run;
pub mod trigger;
