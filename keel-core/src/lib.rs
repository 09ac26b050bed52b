//! Keel Core
//!
//! Core types and abstractions for the Keel deployment orchestrator.
//!
//! This crate contains:
//! - Domain types: Deployment runs, stages, capabilities, processes, routes and the deployment plan
//! - DTOs: Data transfer objects exchanged between the orchestrator and its clients

pub mod domain;
pub mod dto;
