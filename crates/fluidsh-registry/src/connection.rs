//! One connected host's stream: a serialized writer half, a reader
//! task that demultiplexes inbound frames, and the per-host
//! pending-request table (§4.1 "Send-and-wait", §5 "sharded locking
//! keyed by HostId so one host's storm does not delay others" — the
//! sharding is realized here, one table per [`ConnectedHost`], rather
//! than a single lock shared across all hosts).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fluidsh_types::{HostId, RequestId};
use fluidsh_wire::{ControlMessage, HostMessage};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, Mutex};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::{debug, warn};

use crate::error::{RegistryError, RegistryResult};

type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;
type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(fluidsh_wire::MAX_FRAME_LEN)
        .length_field_length(4)
        .new_codec()
}

/// One host's half of the multiplexed stream, from the control
/// plane's point of view. Writes are mutex-serialized (§5 "Per
/// stream: writes are serialized"); the matching reader task is
/// spawned separately and owns the read half exclusively.
pub struct ConnectedHost {
    id: HostId,
    writer: Mutex<FramedWrite<BoxedWrite, LengthDelimitedCodec>>,
    pending: Mutex<HashMap<RequestId, oneshot::Sender<HostMessage>>>,
    connected: AtomicBool,
    /// Invoked with `(available_cpus, active_sandboxes)` whenever an
    /// inbound `Heartbeat` arrives with no matching pending slot (§4.1
    /// "Heartbeat"). `None` until the registry installs one right
    /// after `accept` returns.
    heartbeat_handler: std::sync::Mutex<Option<Arc<dyn Fn(u32, u32) + Send + Sync>>>,
}

impl ConnectedHost {
    fn new(id: HostId, write_half: BoxedWrite) -> Self {
        Self {
            id,
            writer: Mutex::new(FramedWrite::new(write_half, codec())),
            pending: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
            heartbeat_handler: std::sync::Mutex::new(None),
        }
    }

    pub fn id(&self) -> HostId {
        self.id
    }

    /// Installs the callback invoked on every inbound `Heartbeat`
    /// (§4.1 "Heartbeat"). The registry installs one right after
    /// accepting the connection so `record_heartbeat` fires without
    /// the caller having to poll the stream itself.
    pub fn set_heartbeat_handler(&self, handler: impl Fn(u32, u32) + Send + Sync + 'static) {
        *self.heartbeat_handler.lock().expect("heartbeat handler lock poisoned") = Some(Arc::new(handler));
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Sends a command and waits for the `HostMessage` carrying the
    /// same `RequestId` (§4.1 "Send-and-wait" steps 1-4).
    pub async fn send_and_wait(
        &self,
        message: ControlMessage,
        timeout: Duration,
    ) -> RegistryResult<HostMessage> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(message.request_id, tx);
        }

        let bytes = fluidsh_wire::encode_frame(&message)?;
        if let Err(err) = self.writer.lock().await.send(Bytes::from(bytes)).await {
            self.pending.lock().await.remove(&message.request_id);
            return Err(RegistryError::Wire(err.into()));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_canceled)) => Err(RegistryError::StreamDropped(self.id)),
            Err(_elapsed) => {
                self.pending.lock().await.remove(&message.request_id);
                Err(RegistryError::Timeout(self.id))
            }
        }
    }

    /// Writes a raw (non-correlated) reply to the host — used only for
    /// the one-time `RegistrationAck` reply to the host's initial
    /// `Registration`, which this implementation carries in a
    /// `HostMessage` envelope rather than a `ControlMessage` since
    /// `RegistrationAck` is declared as a `HostPayload` variant.
    async fn send_raw(&self, message: &HostMessage) -> RegistryResult<()> {
        let bytes = fluidsh_wire::encode_frame(message)?;
        self.writer
            .lock()
            .await
            .send(Bytes::from(bytes))
            .await
            .map_err(|err| RegistryError::Wire(err.into()))
    }

    /// Completes a pending slot if one is waiting on this
    /// `RequestId`; routes an unsolicited `Heartbeat` to the
    /// installed handler; otherwise logs and drops the message.
    async fn complete_or_drop(&self, message: HostMessage) {
        let sender = self.pending.lock().await.remove(&message.request_id);
        match sender {
            Some(tx) => {
                let _ = tx.send(message);
            }
            None => match &message.payload {
                fluidsh_wire::HostPayload::Heartbeat {
                    available_cpus,
                    active_sandboxes,
                    ..
                } => {
                    let handler = self.heartbeat_handler.lock().expect("heartbeat handler lock poisoned").clone();
                    match handler {
                        Some(f) => f(*available_cpus, *active_sandboxes),
                        None => debug!(host_id = %self.id, "heartbeat arrived before a handler was installed"),
                    }
                }
                _ => {
                    debug!(host_id = %self.id, request_id = %message.request_id, "dropping unsolicited host message");
                }
            },
        }
    }

    /// Fails every outstanding pending slot once the stream drops
    /// (§4.1 "On drop, all outstanding slots for that host are
    /// completed with an error").
    async fn fail_all_pending(&self) {
        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(HostMessage {
                request_id: RequestId::generate(),
                payload: fluidsh_wire::HostPayload::ErrorReport {
                    kind: fluidsh_wire::ErrorKind::TransientTransport,
                    message: "stream dropped".to_string(),
                },
            });
        }
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// Splits a boxed duplex stream into boxed read/write halves, and
/// performs the registration handshake: read the host's
/// `Registration`, hand it to `on_registration` for authentication
/// and bookkeeping, send the resulting `RegistrationAck`, then spawn
/// the reader loop that demultiplexes every later `HostMessage` into
/// either a heartbeat callback or a completed pending slot.
///
/// Returns the live [`ConnectedHost`] handle and the `Registration`
/// payload, so the caller can persist a `HostRecord` before the
/// reader loop starts delivering heartbeats.
pub async fn accept<IO, F, Fut>(
    io: IO,
    on_registration: F,
) -> RegistryResult<(Arc<ConnectedHost>, fluidsh_wire::HostPayload)>
where
    IO: AsyncRead + AsyncWrite + Send + 'static,
    F: FnOnce(fluidsh_wire::HostPayload) -> Fut,
    Fut: std::future::Future<Output = RegistryResult<(HostId, fluidsh_wire::HostPayload)>>,
{
    let (read_half, write_half) = tokio::io::split(io);
    let mut reader: FramedRead<BoxedRead, LengthDelimitedCodec> =
        FramedRead::new(Box::new(read_half), codec());
    let write_half: BoxedWrite = Box::new(write_half);

    let frame = reader
        .next()
        .await
        .ok_or_else(|| RegistryError::Handshake("stream closed before registration".to_string()))?
        .map_err(|e| RegistryError::Wire(e.into()))?;
    let registration: HostMessage = fluidsh_wire::decode_frame(&frame)?;
    let request_id = registration.request_id;
    let registration_payload = registration.payload.clone();

    let (host_id, ack_payload) = on_registration(registration.payload).await?;

    let host = Arc::new(ConnectedHost::new(host_id, write_half));
    host.send_raw(&HostMessage {
        request_id,
        payload: ack_payload,
    })
    .await?;

    spawn_reader_loop(host.clone(), reader);
    Ok((host, registration_payload))
}

fn spawn_reader_loop(
    host: Arc<ConnectedHost>,
    mut reader: FramedRead<BoxedRead, LengthDelimitedCodec>,
) {
    tokio::spawn(async move {
        loop {
            match reader.next().await {
                Some(Ok(frame)) => match fluidsh_wire::decode_frame::<HostMessage>(&frame) {
                    Ok(message) => host.complete_or_drop(message).await,
                    Err(err) => warn!(host_id = %host.id, error = %err, "failed to decode host frame"),
                },
                Some(Err(err)) => {
                    warn!(host_id = %host.id, error = %err, "stream read error; disconnecting host");
                    break;
                }
                None => {
                    debug!(host_id = %host.id, "host stream closed");
                    break;
                }
            }
        }
        host.mark_disconnected();
        host.fail_all_pending().await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluidsh_wire::{ControlPayload, HostPayload};
    use tokio::io::duplex;

    #[tokio::test]
    async fn send_and_wait_resolves_on_matching_request_id() {
        let (a, b) = duplex(8192);
        let (a_read, a_write) = tokio::io::split(a);
        let (b_read, b_write) = tokio::io::split(b);

        let host = Arc::new(ConnectedHost::new(HostId::generate(), Box::new(a_write)));
        let mut peer_reader: FramedRead<BoxedRead, LengthDelimitedCodec> =
            FramedRead::new(Box::new(b_read), codec());
        let mut peer_writer: FramedWrite<BoxedWrite, LengthDelimitedCodec> =
            FramedWrite::new(Box::new(b_write), codec());
        spawn_reader_loop(host.clone(), FramedRead::new(Box::new(a_read), codec()));

        let send_task = tokio::spawn({
            let host = host.clone();
            async move {
                host.send_and_wait(
                    ControlMessage {
                        request_id: RequestId::generate(),
                        payload: ControlPayload::DiscoverHosts,
                    },
                    Duration::from_secs(1),
                )
                .await
            }
        });

        let frame = peer_reader.next().await.unwrap().unwrap();
        let received: ControlMessage = fluidsh_wire::decode_frame(&frame).unwrap();
        let reply = HostMessage {
            request_id: received.request_id,
            payload: HostPayload::DiscoverHostsResult { hosts: vec![] },
        };
        let bytes = fluidsh_wire::encode_frame(&reply).unwrap();
        peer_writer.send(Bytes::from(bytes)).await.unwrap();

        let result = send_task.await.unwrap().unwrap();
        assert!(matches!(result.payload, HostPayload::DiscoverHostsResult { .. }));
    }

    #[tokio::test]
    async fn send_and_wait_times_out_when_no_reply_arrives() {
        let (a, _b) = duplex(8192);
        let (_a_read, a_write) = tokio::io::split(a);
        let host = ConnectedHost::new(HostId::generate(), Box::new(a_write));

        let result = host
            .send_and_wait(
                ControlMessage {
                    request_id: RequestId::generate(),
                    payload: ControlPayload::DiscoverHosts,
                },
                Duration::from_millis(50),
            )
            .await;

        assert!(matches!(result, Err(RegistryError::Timeout(_))));
    }

    #[tokio::test]
    async fn dropped_stream_fails_outstanding_pending_slots() {
        let (a, b) = duplex(8192);
        let (a_read, a_write) = tokio::io::split(a);
        let host = Arc::new(ConnectedHost::new(HostId::generate(), Box::new(a_write)));
        spawn_reader_loop(host.clone(), FramedRead::new(Box::new(a_read), codec()));

        let send_task = tokio::spawn({
            let host = host.clone();
            async move {
                host.send_and_wait(
                    ControlMessage {
                        request_id: RequestId::generate(),
                        payload: ControlPayload::DiscoverHosts,
                    },
                    Duration::from_secs(5),
                )
                .await
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(b);

        let result = send_task.await.unwrap();
        assert!(result.is_ok(), "stream drop completes the pending slot rather than hanging");
        assert!(!host.is_connected());
    }
}
