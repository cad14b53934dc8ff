use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::SandboxId;

/// Key for the credential cache: either a sandbox, or a source VM
/// addressed by its (already-sanitized) name.
///
/// Renders as the on-disk directory name under `<keyDir>/`, e.g.
/// `SBX-a1b2c3d4` or `sourcevm-prod-db-1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialTarget {
    Sandbox(SandboxId),
    SourceVm(String),
}

impl Display for CredentialTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialTarget::Sandbox(id) => write!(f, "{id}"),
            CredentialTarget::SourceVm(name) => write!(f, "sourcevm-{name}"),
        }
    }
}

/// A cached Ed25519 keypair plus its CA-signed certificate for one
/// `(target, principal)` pair.
///
/// Principal is one of exactly two values, `sandbox` or `fluid-readonly`;
/// the two namespaces never mix on the same credential.
#[derive(Clone, Serialize, Deserialize)]
pub struct SshCertificateCredential {
    pub target: CredentialTarget,
    pub principal: String,
    pub private_key_bytes: Vec<u8>,
    pub certificate_bytes: Vec<u8>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub serial: u64,
}

impl std::fmt::Debug for SshCertificateCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshCertificateCredential")
            .field("target", &self.target)
            .field("principal", &self.principal)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("serial", &self.serial)
            .finish_non_exhaustive()
    }
}

impl SshCertificateCredential {
    /// Whether this credential should be regenerated: true once
    /// `now + refresh_margin >= not_after`.
    pub fn needs_refresh(&self, now: DateTime<Utc>, refresh_margin: chrono::Duration) -> bool {
        now + refresh_margin >= self.not_after
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(not_after: DateTime<Utc>) -> SshCertificateCredential {
        SshCertificateCredential {
            target: CredentialTarget::SourceVm("prod-db-1".to_string()),
            principal: "fluid-readonly".to_string(),
            private_key_bytes: vec![0u8; 32],
            certificate_bytes: vec![1u8; 64],
            not_before: Utc::now() - chrono::Duration::minutes(1),
            not_after,
            serial: 1,
        }
    }

    #[test]
    fn needs_refresh_once_within_margin_of_expiry() {
        let cred = credential(Utc::now() + chrono::Duration::seconds(20));
        assert!(cred.needs_refresh(Utc::now(), chrono::Duration::seconds(30)));
    }

    #[test]
    fn does_not_need_refresh_well_before_expiry() {
        let cred = credential(Utc::now() + chrono::Duration::minutes(30));
        assert!(!cred.needs_refresh(Utc::now(), chrono::Duration::seconds(30)));
    }

    #[test]
    fn credential_target_renders_expected_directory_names() {
        assert_eq!(
            CredentialTarget::SourceVm("prod-db-1".to_string()).to_string(),
            "sourcevm-prod-db-1"
        );
    }
}
