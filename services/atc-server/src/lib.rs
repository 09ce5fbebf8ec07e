//! Service orchestrator library (`spec.md` §4.9, component C9): config
//! loading, admission control, and the per-frequency/post-processor wiring
//! the binary entry point drives.

pub mod admission;
pub mod config;
pub mod orchestrator;

pub use admission::{AdmissionControl, AdmissionError};
pub use orchestrator::{Orchestrator, OrchestratorError};
