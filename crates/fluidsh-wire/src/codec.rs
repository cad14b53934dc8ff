//! Framing for the Host<->CP stream: 4-byte-length-prefixed postcard
//! frames over a `tokio::net::TcpStream`, via
//! `tokio_util::codec::LengthDelimitedCodec`.

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::{WireError, WireResult};

/// Maximum single-frame length. Generous enough for `ReadSourceFile`
/// responses while still bounding a misbehaving peer.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// A length-delimited, postcard-encoded duplex channel for messages of
/// type `M` over an async byte stream `IO`.
pub struct MessageTransport<IO, M> {
    framed: Framed<IO, LengthDelimitedCodec>,
    _marker: std::marker::PhantomData<M>,
}

impl<IO, M> MessageTransport<IO, M>
where
    IO: AsyncRead + AsyncWrite + Unpin,
    M: Serialize + DeserializeOwned,
{
    pub fn new(io: IO) -> Self {
        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(MAX_FRAME_LEN)
            .length_field_length(4)
            .new_codec();
        Self {
            framed: Framed::new(io, codec),
            _marker: std::marker::PhantomData,
        }
    }

    pub async fn send(&mut self, message: &M) -> WireResult<()> {
        let bytes: Vec<u8> = postcard::to_allocvec(message).map_err(WireError::Encode)?;
        self.framed
            .send(Bytes::from(bytes))
            .await
            .map_err(WireError::Io)
    }

    pub async fn recv(&mut self) -> WireResult<Option<M>> {
        match self.framed.next().await {
            Some(Ok(frame)) => {
                let message = postcard::from_bytes(&frame).map_err(WireError::Decode)?;
                Ok(Some(message))
            }
            Some(Err(e)) => Err(WireError::Io(e)),
            None => Ok(None),
        }
    }
}

/// A `Sink`/`Stream` pair over raw frames, used by the multiplexer's
/// split-read/split-write halves. Kept separate from [`MessageTransport`]
/// so callers that need `StreamExt::split` can do so on the underlying
/// `Framed` value directly.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LEN)
        .length_field_length(4)
        .new_codec()
}

pub fn encode_frame<M: Serialize>(message: &M) -> WireResult<BytesMut> {
    let bytes = postcard::to_allocvec(message).map_err(WireError::Encode)?;
    Ok(BytesMut::from(&bytes[..]))
}

pub fn decode_frame<M: DeserializeOwned>(frame: &[u8]) -> WireResult<M> {
    postcard::from_bytes(frame).map_err(WireError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluidsh_types::RequestId;
    use tokio::io::duplex;

    use crate::messages::{ControlMessage, ControlPayload};

    #[tokio::test]
    async fn send_then_recv_round_trips_a_control_message() {
        let (client_io, server_io) = duplex(4096);
        let mut client: MessageTransport<_, ControlMessage> = MessageTransport::new(client_io);
        let mut server: MessageTransport<_, ControlMessage> = MessageTransport::new(server_io);

        let msg = ControlMessage {
            request_id: RequestId::generate(),
            payload: ControlPayload::DiscoverHosts,
        };

        client.send(&msg).await.unwrap();
        let received = server.recv().await.unwrap().unwrap();

        assert_eq!(received.request_id, msg.request_id);
        assert!(matches!(received.payload, ControlPayload::DiscoverHosts));
    }

    #[tokio::test]
    async fn recv_returns_none_once_peer_drops() {
        let (client_io, server_io) = duplex(4096);
        let mut server: MessageTransport<_, ControlMessage> = MessageTransport::new(server_io);
        drop(client_io);

        assert!(server.recv().await.unwrap().is_none());
    }
}
