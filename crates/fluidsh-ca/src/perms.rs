//! POSIX permission helpers backing §3 invariant 4 ("the CA private
//! key, every generated private key, and every per-sandbox key
//! directory have permissions such that no group/world bit is set").
//!
//! No teacher module needs this — it is a POSIX-file-permission concern
//! unique to this spec's threat model, so it is hand-rolled against
//! `std::os::unix::fs::PermissionsExt` rather than pulled from a crate.

use std::path::Path;

#[cfg(unix)]
pub fn has_group_or_world_bits(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o077 != 0
}

#[cfg(not(unix))]
pub fn has_group_or_world_bits(_metadata: &std::fs::Metadata) -> bool {
    false
}

/// Sets a regular file to owner-read/write only (`0600`).
pub async fn secure_file(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}

/// Sets a directory to owner-rwx only (`0700`), disallowing any
/// non-owner access to the credential files inside it.
pub async fn secure_dir(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700)).await
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}

/// World-readable, owner-writable (`0644`) — used for the CA public key
/// and per-sandbox public key files.
pub async fn public_file(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)).await
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}

pub async fn has_insecure_bits(path: &Path) -> std::io::Result<bool> {
    let metadata = tokio::fs::metadata(path).await?;
    Ok(has_group_or_world_bits(&metadata))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    #[tokio::test]
    async fn secure_file_clears_group_and_world_bits() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("key");
        tokio::fs::write(&path, b"secret").await.unwrap();
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o666))
            .await
            .unwrap();

        secure_file(&path).await.unwrap();

        assert!(!has_insecure_bits(&path).await.unwrap());
    }

    #[tokio::test]
    async fn detects_preexisting_insecure_permissions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("key");
        tokio::fs::write(&path, b"secret").await.unwrap();
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644))
            .await
            .unwrap();

        assert!(has_insecure_bits(&path).await.unwrap());
    }
}
