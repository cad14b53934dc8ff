//! # Fluid.sh
//!
//! Rust SDK for Fluid.sh, the multi-host sandbox orchestration and
//! access plane for autonomous agents: clone a production VM (or a
//! known base image) into a disposable sandbox, run commands against
//! it over SSH, and tear it down — all routed through a control plane
//! that places each operation on the right host.
//!
//! # Quick start
//!
//! ```no_run
//! use fluidsh::{Client, CreateSandboxRequest};
//! use fluidsh_types::AgentId;
//!
//! # async fn run() -> Result<(), fluidsh::ClientError> {
//! let client = Client::new("http://127.0.0.1:8080");
//! let sandbox = client
//!     .create_sandbox(CreateSandboxRequest::new(AgentId::generate()).base_image("ubuntu-22.04"))
//!     .await?;
//! let output = client.run_command(sandbox.id, "uname -a", 30).await?;
//! println!("{}", output.stdout);
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - **Client**: [`Client`] — the REST client that talks to a control
//!   plane (§6).
//! - **Types**: re-exported from `fluidsh-types` — [`Sandbox`],
//!   [`HostRecord`], [`CommandRecord`], [`SourceVm`], and the entity ID
//!   newtypes.

mod client;
mod error;

pub use client::{Client, CreateSandboxRequest, SourceCommandOutcome};
pub use error::{ClientError, ClientResult};

pub use fluidsh_types::{
    AgentId, CommandId, CommandRecord, HostHealth, HostId, HostRecord, RequestId, ResourceSnapshot, Sandbox, SandboxId,
    SandboxState, SourceVm,
};
