use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CommandId, SandboxId};

/// An append-only record of one command execution against a sandbox (or,
/// via the read-only path, a source VM). Never mutated after creation;
/// survives the owning sandbox's soft-delete for audit purposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub id: CommandId,
    pub sandbox_id: SandboxId,
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl CommandRecord {
    /// The exit-code sentinel reserved for SSH-transport-class failures
    /// (connection refused, handshake timeout, etc.) as distinct from the
    /// remote command's own non-zero exit.
    pub const TRANSPORT_FAILURE_EXIT_CODE: i32 = -255;

    pub fn is_transport_failure(&self) -> bool {
        self.exit_code == Self::TRANSPORT_FAILURE_EXIT_CODE
    }
}
