//! # fluidsh-cp: the control plane
//!
//! Accepts host daemon connections over the stream protocol
//! ([`fluidsh_registry`]), places sandbox and source-VM operations on
//! the right host, persists the resulting state, and exposes all of
//! it over a REST boundary whose handlers delegate to
//! [`orchestrator::Orchestrator`] (§6). `fluidsh-cp`'s binary
//! (`src/main.rs`) wires the pieces together; the library surface
//! exists so the REST layer can be exercised without a real listener.

pub mod error;
pub mod http;
pub mod orchestrator;

pub use error::{CpError, CpResult};
pub use orchestrator::{CreateSandboxParams, Orchestrator, OrchestratorTimeouts, SourceCommandOutcome};
