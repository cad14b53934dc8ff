//! Bearer-token exchange that precedes the framed protocol on a fresh
//! stream (§6 "Authorization: `authorization: Bearer <token>` metadata
//! on stream establishment").
//!
//! The wire protocol itself (`fluidsh_wire`) carries no token field —
//! like gRPC metadata, the token belongs to stream establishment, not
//! the message body. Over a plain `TcpStream` that means one
//! newline-terminated line, read before either side switches to
//! length-delimited framing.

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{RegistryError, RegistryResult};

const MAX_TOKEN_LEN: usize = 4096;

/// Writes `token` as a single line. Called by the host daemon
/// immediately after connecting, before sending its `Registration`.
pub async fn write_bearer_token<IO>(io: &mut IO, token: &str) -> RegistryResult<()>
where
    IO: AsyncWrite + Unpin,
{
    io.write_all(token.as_bytes()).await?;
    io.write_all(b"\n").await?;
    io.flush().await?;
    Ok(())
}

/// Reads a single newline-terminated token line. Called by the control
/// plane immediately after accepting a connection, before reading the
/// host's `Registration`.
pub async fn read_bearer_token<IO>(io: &mut IO) -> RegistryResult<String>
where
    IO: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = io.read(&mut byte).await?;
        if n == 0 {
            return Err(RegistryError::Handshake(
                "stream closed before bearer token was received".to_string(),
            ));
        }
        if byte[0] == b'\n' {
            break;
        }
        buf.push(byte[0]);
        if buf.len() > MAX_TOKEN_LEN {
            return Err(RegistryError::Handshake("bearer token exceeded maximum length".to_string()));
        }
    }
    String::from_utf8(buf).map_err(|_| RegistryError::Handshake("bearer token was not valid utf-8".to_string()))
}

/// The SHA-256 hex digest of a presented token, the only form the
/// control plane ever persists (§6).
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(digest)
}

/// Minimal hex encoder so this crate doesn't need to pull in the `hex`
/// crate for one call site.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut out = String::with_capacity(bytes.as_ref().len() * 2);
        for byte in bytes.as_ref() {
            let _ = write!(out, "{byte:02x}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn token_round_trips_over_a_duplex_stream() {
        let (mut client, mut server) = duplex(256);
        write_bearer_token(&mut client, "secret-token").await.unwrap();
        let received = read_bearer_token(&mut server).await.unwrap();
        assert_eq!(received, "secret-token");
    }

    #[test]
    fn hash_is_stable_sha256_hex() {
        let digest = hash_token("secret-token");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, hash_token("secret-token"));
        assert_ne!(digest, hash_token("different-token"));
    }

    #[tokio::test]
    async fn closing_before_newline_is_a_handshake_error() {
        let (client, mut server) = duplex(64);
        drop(client);
        assert!(read_bearer_token(&mut server).await.is_err());
    }
}
