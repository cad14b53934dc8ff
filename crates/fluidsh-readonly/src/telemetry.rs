//! Telemetry sink for blocked read-only attempts (§4.4 Layer A:
//! "Blocked attempts are recorded to telemetry").

use std::sync::Mutex;

/// Minimal recording interface so the orchestrator can wire this into
/// whatever metrics/logging backend it uses without this crate caring.
pub trait Telemetry: Send + Sync {
    fn record_block(&self, vm_name: &str, command: &str, reason: &str);
}

/// Logs blocks via `tracing` at `warn` level. The default in
/// production; callers needing structured metrics implement
/// [`Telemetry`] themselves and pass it through instead.
#[derive(Debug, Default)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn record_block(&self, vm_name: &str, command: &str, reason: &str) {
        tracing::warn!(vm_name, command, reason, "read-only command blocked");
    }
}

/// Records blocks in memory, for tests that assert a block happened.
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    blocks: Mutex<Vec<(String, String, String)>>,
}

impl Telemetry for RecordingTelemetry {
    fn record_block(&self, vm_name: &str, command: &str, reason: &str) {
        self.blocks
            .lock()
            .expect("telemetry lock poisoned")
            .push((vm_name.to_string(), command.to_string(), reason.to_string()));
    }
}

impl RecordingTelemetry {
    pub fn blocks(&self) -> Vec<(String, String, String)> {
        self.blocks.lock().expect("telemetry lock poisoned").clone()
    }
}
