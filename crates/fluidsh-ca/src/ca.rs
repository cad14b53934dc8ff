//! The SSH Certificate Authority itself (§4.3 "CA init", "Certificate
//! request").
//!
//! One [`CertificateAuthority`] is constructed at host-daemon startup
//! and held behind an `Arc` for the process's lifetime — never a
//! package-scoped singleton (§9 redesign flag "global mutable state").

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::RngCore;
use ssh_key::certificate::{Builder, CertType};
use ssh_key::{Algorithm, LineEnding, PrivateKey};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{CaError, CaResult};
use crate::perms;
use crate::principal::Principal;

const CA_KEY_FILENAME: &str = "ca_key";
const CA_PUBKEY_FILENAME: &str = "ca_key.pub";

/// One certificate request (§4.3 "Certificate request"): who it's for,
/// the target it identifies (for the audit-traceable identity string),
/// and a requested TTL that gets clamped, never rejected.
#[derive(Debug, Clone)]
pub struct CertificateRequest {
    pub user_id: String,
    /// The base image or source VM this credential's target was cloned
    /// from or inspects, for the `vm:<VMID>` identity segment.
    pub vm_id: String,
    /// The sandbox this credential is for, or `"-"` for a source-VM
    /// (`fluid-readonly`) credential, which has no sandbox.
    pub sandbox_id: String,
    pub principal: Principal,
    /// `None` requests the default TTL (30 min); any value is clamped
    /// into `[min_ttl, max_ttl]` rather than rejected.
    pub ttl: Option<Duration>,
}

/// A freshly issued certificate and its matching private key, ready to
/// be written to the credential cache (§4.3 "Certificate request"
/// output).
#[derive(Clone)]
pub struct IssuedCertificate {
    /// OpenSSH-format private key PEM bytes.
    pub private_key_bytes: Vec<u8>,
    /// OpenSSH-format certificate line (`ssh-ed25519-cert-v01@openssh.com ...`).
    pub certificate_bytes: Vec<u8>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub serial: u64,
}

impl std::fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("serial", &self.serial)
            .finish_non_exhaustive()
    }
}

/// Clamps a requested TTL into `[min, max]` (§4.3: "Certificate TTL
/// clamped to [1 min, 60 min]"). Never rejects — an over-long request
/// is silently capped, per §8 scenario 5.
fn clamp_ttl(requested: Duration, min: Duration, max: Duration) -> Duration {
    requested.clamp(min, max)
}

pub struct CertificateAuthority {
    signing_key: PrivateKey,
    key_path: PathBuf,
    serial: AtomicU64,
    min_ttl: Duration,
    max_ttl: Duration,
    default_ttl: Duration,
    backdate: Duration,
}

impl CertificateAuthority {
    /// Loads the CA keypair from `key_dir`, generating a fresh Ed25519
    /// keypair on first startup (§4.3 "CA init"). The private key is
    /// written owner-read/write only; the public key is world-readable.
    #[instrument(skip_all, fields(key_dir = %key_dir.as_ref().display()))]
    pub async fn init(
        key_dir: impl AsRef<Path>,
        min_ttl: Duration,
        max_ttl: Duration,
        default_ttl: Duration,
        backdate: Duration,
    ) -> CaResult<Self> {
        let key_dir = key_dir.as_ref();
        tokio::fs::create_dir_all(key_dir).await?;
        perms::secure_dir(key_dir).await?;

        let key_path = key_dir.join(CA_KEY_FILENAME);
        let pubkey_path = key_dir.join(CA_PUBKEY_FILENAME);

        let signing_key = if tokio::fs::try_exists(&key_path).await? {
            let pem = tokio::fs::read_to_string(&key_path).await?;
            PrivateKey::from_openssh(&pem)?
        } else {
            info!("generating new CA signing key");
            let key = PrivateKey::random(&mut rand::rngs::OsRng, Algorithm::Ed25519)?;
            let pem = key.to_openssh(LineEnding::LF)?;
            tokio::fs::write(&key_path, pem.as_bytes()).await?;
            perms::secure_file(&key_path).await?;

            let public = key.public_key().to_openssh()?;
            tokio::fs::write(&pubkey_path, public.as_bytes()).await?;
            perms::public_file(&pubkey_path).await?;

            key
        };

        if perms::has_insecure_bits(&key_path).await? {
            return Err(CaError::InsecureKeyPermissions(key_path));
        }

        Ok(Self {
            signing_key,
            key_path,
            serial: AtomicU64::new(rand::thread_rng().next_u64()),
            min_ttl,
            max_ttl,
            default_ttl,
            backdate,
        })
    }

    /// SHA-256 fingerprint of the CA's Ed25519 public key, recorded
    /// against a source VM's `ca_fingerprint_at_prepare` (§3, §4.4) to
    /// detect rotation.
    pub fn fingerprint_hex(&self) -> CaResult<String> {
        let bytes = ed25519_public_bytes(self.signing_key.public_key())?;
        Ok(fluidsh_crypto::sha256_hex(&bytes))
    }

    pub fn public_key_openssh(&self) -> CaResult<String> {
        Ok(self.signing_key.public_key().to_openssh()?)
    }

    /// Issues a certificate and matching keypair for `request` (§4.3
    /// "Certificate request"). Re-checks the CA private key's on-disk
    /// permissions before every signing operation and refuses to sign
    /// if group/world bits have appeared since `init`.
    #[instrument(skip(self), fields(principal = %request.principal, user_id = %request.user_id))]
    pub async fn issue(&self, request: &CertificateRequest) -> CaResult<IssuedCertificate> {
        if perms::has_insecure_bits(&self.key_path).await? {
            return Err(CaError::InsecureKeyPermissions(self.key_path.clone()));
        }

        let ttl = clamp_ttl(request.ttl.unwrap_or(self.default_ttl), self.min_ttl, self.max_ttl);

        let issued_at = Utc::now();
        let not_before = issued_at - chrono::Duration::from_std(self.backdate).unwrap_or_default();
        let not_after = issued_at + chrono::Duration::from_std(ttl).unwrap_or_default();

        let serial = self.serial.fetch_add(1, Ordering::SeqCst);
        let cert_id = Uuid::new_v4();
        let identity = format!(
            "user:{}-vm:{}-sbx:{}-cert:{cert_id}",
            request.user_id, request.vm_id, request.sandbox_id
        );

        let subject_key = PrivateKey::random(&mut rand::rngs::OsRng, Algorithm::Ed25519)?;
        let subject_public = subject_key.public_key().key_data().clone();

        let mut builder = Builder::new_with_random_nonce(
            &mut rand::rngs::OsRng,
            subject_public,
            not_before.timestamp() as u64,
            not_after.timestamp() as u64,
        )?;
        builder.serial(serial);
        builder.cert_type(CertType::User);
        builder.key_id(identity);
        builder.valid_principal(request.principal.as_str())?;
        // Extensions granted are allow-listed explicitly; anything not
        // added here (agent/X11/port forwarding) is denied by omission,
        // matching §4.3's "critical options: forbid port, agent, X11
        // forwarding".
        builder.extension("permit-pty", "")?;

        let certificate = builder.sign(&self.signing_key)?;

        let private_key_pem = subject_key.to_openssh(LineEnding::LF)?;
        let certificate_line = certificate.to_openssh()?;

        Ok(IssuedCertificate {
            private_key_bytes: private_key_pem.as_bytes().to_vec(),
            certificate_bytes: certificate_line.into_bytes(),
            not_before,
            not_after,
            serial,
        })
    }
}

fn ed25519_public_bytes(public_key: &ssh_key::PublicKey) -> CaResult<[u8; 32]> {
    match public_key.key_data() {
        ssh_key::public::KeyData::Ed25519(k) => Ok(*k.as_ref()),
        _ => Err(CaError::SshKey(ssh_key::Error::AlgorithmUnknown)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn test_ca() -> CertificateAuthority {
        let dir = tempdir().unwrap();
        CertificateAuthority::init(
            dir.path(),
            Duration::from_secs(60),
            Duration::from_secs(3600),
            Duration::from_secs(1800),
            Duration::from_secs(60),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn init_is_idempotent_across_restarts() {
        let dir = tempdir().unwrap();
        let ca1 = CertificateAuthority::init(
            dir.path(),
            Duration::from_secs(60),
            Duration::from_secs(3600),
            Duration::from_secs(1800),
            Duration::from_secs(60),
        )
        .await
        .unwrap();
        let ca2 = CertificateAuthority::init(
            dir.path(),
            Duration::from_secs(60),
            Duration::from_secs(3600),
            Duration::from_secs(1800),
            Duration::from_secs(60),
        )
        .await
        .unwrap();

        assert_eq!(ca1.fingerprint_hex().unwrap(), ca2.fingerprint_hex().unwrap());
    }

    #[tokio::test]
    async fn ttl_above_cap_is_clamped_not_rejected() {
        let ca = test_ca().await;
        let request = CertificateRequest {
            user_id: "agent-1".to_string(),
            vm_id: "ubuntu-22.04".to_string(),
            sandbox_id: "SBX-deadbeef".to_string(),
            principal: Principal::Sandbox,
            ttl: Some(Duration::from_secs(24 * 3600)),
        };

        let issued = ca.issue(&request).await.unwrap();
        let span = issued.not_after - issued.not_before;
        assert!(span <= chrono::Duration::minutes(61));
    }

    #[tokio::test]
    async fn not_before_is_backdated_by_one_minute() {
        let ca = test_ca().await;
        let before = Utc::now();
        let issued = ca
            .issue(&CertificateRequest {
                user_id: "agent-1".to_string(),
                vm_id: "ubuntu-22.04".to_string(),
                sandbox_id: "SBX-deadbeef".to_string(),
                principal: Principal::Sandbox,
                ttl: None,
            })
            .await
            .unwrap();

        assert!(issued.not_before <= before - chrono::Duration::seconds(59));
        assert!(issued.not_after > before);
    }

    #[tokio::test]
    async fn serials_are_unique_and_monotonic_within_one_ca_instance() {
        let ca = test_ca().await;
        let request = CertificateRequest {
            user_id: "agent-1".to_string(),
            vm_id: "ubuntu-22.04".to_string(),
            sandbox_id: "SBX-deadbeef".to_string(),
            principal: Principal::Sandbox,
            ttl: None,
        };

        let first = ca.issue(&request).await.unwrap();
        let second = ca.issue(&request).await.unwrap();

        assert_ne!(first.serial, second.serial);
        assert_eq!(second.serial, first.serial + 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn refuses_to_sign_once_key_permissions_are_widened() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let ca = CertificateAuthority::init(
            dir.path(),
            Duration::from_secs(60),
            Duration::from_secs(3600),
            Duration::from_secs(1800),
            Duration::from_secs(60),
        )
        .await
        .unwrap();

        tokio::fs::set_permissions(
            dir.path().join(CA_KEY_FILENAME),
            std::fs::Permissions::from_mode(0o644),
        )
        .await
        .unwrap();

        let request = CertificateRequest {
            user_id: "agent-1".to_string(),
            vm_id: "ubuntu-22.04".to_string(),
            sandbox_id: "SBX-deadbeef".to_string(),
            principal: Principal::Sandbox,
            ttl: None,
        };

        let result = ca.issue(&request).await;
        assert!(matches!(result, Err(CaError::InsecureKeyPermissions(_))));
    }
}
