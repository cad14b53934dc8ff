//! # fluidsh-ca: SSH Certificate Authority & Credential Cache (§4.3)
//!
//! Generates and caches per-sandbox and per-source-VM Ed25519 keypairs,
//! issues short-TTL SSH certificates scoped to exactly one principal
//! (`sandbox` or `fluid-readonly`), and refreshes them automatically
//! before expiry.

mod ca;
mod cache;
mod error;
mod perms;
mod principal;
mod sanitize;

pub use ca::{CertificateAuthority, CertificateRequest, IssuedCertificate};
pub use cache::CredentialCache;
pub use error::{CaError, CaResult};
pub use principal::Principal;
pub use sanitize::sanitize_for_path;
