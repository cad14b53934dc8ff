use serde::{Deserialize, Serialize};

/// A production VM prepared for read-only inspection.
///
/// Identity is the (sanitized) VM name rather than a generated ID —
/// source VMs are named infrastructure the operator already knows about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceVm {
    pub name: String,
    pub ip: Option<String>,
    pub prepared: bool,
    /// SHA-256 fingerprint of the CA public key installed on this VM at
    /// its last successful `Prepare`. Compared against the current CA on
    /// every later prepare to detect rotation.
    pub ca_fingerprint_at_prepare: Option<String>,
}

impl SourceVm {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ip: None,
            prepared: false,
            ca_fingerprint_at_prepare: None,
        }
    }

    /// Whether the CA has rotated since this VM was last prepared, i.e.
    /// whether it needs re-prep before read-only access is trusted.
    pub fn needs_reprep(&self, current_ca_fingerprint: &str) -> bool {
        match &self.ca_fingerprint_at_prepare {
            Some(fp) => fp != current_ca_fingerprint,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unprepared_vm_always_needs_reprep() {
        let vm = SourceVm::new("prod-db-1");
        assert!(vm.needs_reprep("abc123"));
    }

    #[test]
    fn prepared_vm_flags_mismatch_as_needing_reprep() {
        let mut vm = SourceVm::new("prod-db-1");
        vm.ca_fingerprint_at_prepare = Some("abc123".to_string());
        assert!(!vm.needs_reprep("abc123"));
        assert!(vm.needs_reprep("def456"));
    }
}
