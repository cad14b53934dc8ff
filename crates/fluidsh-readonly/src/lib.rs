//! # fluidsh-readonly: Read-Only Source VM Enforcement (§4.4)
//!
//! Three independent defense layers: the client allowlist ([`validate`]),
//! principal-scoped authentication (enforced by [`fluidsh_ca`]'s two
//! disjoint [`fluidsh_ca::Principal`] values, not duplicated here), and
//! the restricted shell installed on the VM itself ([`shell_script`],
//! [`prepare`]).

mod allowlist;
mod blocklist;
mod error;
mod pipeline;
mod prepare;
mod shell_script;
mod telemetry;
mod validate;

pub use blocklist::{categories as blocklist_categories, check as blocklist_check, Category};
pub use error::{ReadonlyError, ReadonlyResult};
pub use pipeline::{split_pipeline, tokenize};
pub use prepare::{prepare, AdminConnection, CommandOutput, PrepareOutcome, CA_PUBKEY_PATH, READONLY_USER};
pub use shell_script::{render as render_restricted_shell, INSTALL_PATH as RESTRICTED_SHELL_PATH};
pub use telemetry::{RecordingTelemetry, Telemetry, TracingTelemetry};
pub use validate::validate_command;
