//! Service Module
//!
//! Stage logic for the deployment pipeline.
//! Each service drives one collaborator on the host through the run context.

pub mod atomic;
pub mod build;
pub mod capabilities;
pub mod dependencies;
pub mod log_sink;
pub mod proxy;
pub mod source;
pub mod supervisor;
pub mod verifier;

// Re-export for convenience
pub use build as build_service;
pub use capabilities as capability_service;
pub use dependencies as dependency_service;
pub use proxy as proxy_service;
pub use source as source_service;
pub use supervisor as supervisor_service;
pub use verifier as verifier_service;

pub use log_sink::{FileLogSink, LogSink, MemoryLogSink};
