//! Host<->control-plane wire protocol.
//!
//! Messages are tagged-union enums ([`HostMessage`], [`ControlMessage`])
//! serialized with `postcard` and framed with a 4-byte length prefix
//! over any `AsyncRead + AsyncWrite` transport — in production a
//! `tokio::net::TcpStream`, in tests an in-memory duplex pipe.

mod codec;
mod error;
mod messages;

pub use codec::{MessageTransport, decode_frame, encode_frame, frame_codec, MAX_FRAME_LEN};
pub use error::{WireError, WireResult};
pub use messages::{
    ControlMessage, ControlPayload, ErrorKind, HostMessage, HostPayload, ResourceSnapshotWire,
};
