//! # fluidsh-host: the sandbox host daemon
//!
//! Owns the hypervisor driver, the sandbox lifecycle manager, the SSH
//! certificate cache, read-only source VM enforcement, and the
//! registration/heartbeat/command stream back to the control plane.
//! `fluidsh-host`'s binary (`src/main.rs`) wires these together; the
//! library surface exists so integration tests can drive the pieces
//! independently of the network loop.

pub mod client;
pub mod dispatch;
pub mod error;
pub mod source_vm;
pub mod ssh_admin;

pub use client::{run, ClientConfig, HostStatus};
pub use dispatch::Dispatcher;
pub use error::{HostError, HostResult};
pub use source_vm::{SourceCommandOutcome, SourceVmService};
