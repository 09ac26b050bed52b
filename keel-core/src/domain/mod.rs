//! Core domain types
//!
//! This module contains the core domain structures used across Keel crates.
//! They describe what a deployment should look like (the plan) and what
//! happened while bringing the host to that state (the run).

pub mod capability;
pub mod log;
pub mod plan;
pub mod process;
pub mod route;
pub mod run;
pub mod stage;
