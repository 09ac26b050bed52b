//! Scheduler layer for the runner
//!
//! This layer accepts triggers and makes sure at most one deployment run is
//! active at a time. It also keeps the recent run records in memory.

pub mod history;
pub mod trigger;

pub use history::RunHistory;
pub use trigger::{RunScheduler, Submission};
