//! The host daemon's half of the stream to the control plane (§4.1):
//! connect, present the bearer token, register, then run a heartbeat
//! task and an inbound command loop side by side over one stream
//! until it drops, at which point the caller reconnects with
//! exponential backoff.
//!
//! Mirrors `fluidsh-registry`'s `connection::ConnectedHost` from the
//! other end: a mutex-serialized `FramedWrite` half shared by the
//! heartbeat task and the response writer, and a reader task that
//! demultiplexes inbound frames — here there is only ever one peer,
//! so there is no pending-request table, only a handler pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fluidsh_types::{HostId, RequestId};
use fluidsh_wire::{ControlMessage, HostMessage, HostPayload, ResourceSnapshotWire};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::{info, instrument, warn};

use crate::dispatch::Dispatcher;
use crate::error::{HostError, HostResult};

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(fluidsh_wire::MAX_FRAME_LEN)
        .length_field_length(4)
        .new_codec()
}

/// Supplies the figures a `Registration` or `Heartbeat` carries.
/// Implemented by `main.rs` over the live hypervisor driver and state
/// store so `client` itself stays free of those dependencies.
#[async_trait]
pub trait HostStatus: Send + Sync {
    async fn resources(&self) -> ResourceSnapshotWire;
    async fn source_vm_names(&self) -> Vec<String>;
}

/// Everything a freshly (re)dialed stream needs to register and stay
/// alive — constant across reconnects, unlike the `HostId` the
/// control plane may (re)assign on each registration.
pub struct ClientConfig {
    pub control_plane_addr: String,
    pub bearer_token: String,
    pub hostname: String,
    pub version: String,
    pub advertised_images: Vec<String>,
    pub heartbeat_interval: Duration,
    pub handler_pool_size: usize,
    pub reconnect_initial_backoff: Duration,
    pub reconnect_max_backoff: Duration,
    pub reconnect_reset_after: Duration,
}

/// Connects to the control plane, registers, and runs the connection
/// forever, reconnecting with exponential backoff on every drop. The
/// caller's locally-chosen `host_id` is sent on every registration, so
/// a restart reuses the same identity rather than registering fresh
/// (§4.1 "Hosts persist their assigned ID locally").
#[instrument(skip(config, dispatcher, status))]
pub async fn run(
    config: ClientConfig,
    host_id: HostId,
    dispatcher: Arc<Dispatcher>,
    status: Arc<dyn HostStatus>,
) -> HostResult<()> {
    let mut backoff = config.reconnect_initial_backoff;

    loop {
        let connected_at = tokio::time::Instant::now();
        if let Err(err) = connect_and_serve(&config, host_id, dispatcher.clone(), status.clone()).await {
            warn!(error = %err, "host connection ended");
        }

        if connected_at.elapsed() >= config.reconnect_reset_after {
            backoff = config.reconnect_initial_backoff;
        }
        info!(backoff_secs = backoff.as_secs(), "reconnecting to control plane");
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(config.reconnect_max_backoff);
    }
}

async fn connect_and_serve(
    config: &ClientConfig,
    host_id: HostId,
    dispatcher: Arc<Dispatcher>,
    status: Arc<dyn HostStatus>,
) -> HostResult<()> {
    let stream = TcpStream::connect(&config.control_plane_addr).await?;
    stream.set_nodelay(true).ok();
    handshake_and_serve(stream, config, host_id, dispatcher, status).await
}

async fn handshake_and_serve<IO>(
    mut io: IO,
    config: &ClientConfig,
    host_id: HostId,
    dispatcher: Arc<Dispatcher>,
    status: Arc<dyn HostStatus>,
) -> HostResult<()>
where
    IO: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    fluidsh_registry::handshake::write_bearer_token(&mut io, &config.bearer_token).await?;

    let (read_half, write_half) = tokio::io::split(io);
    let mut reader = FramedRead::new(read_half, codec());
    let writer = Arc::new(Mutex::new(FramedWrite::new(write_half, codec())));

    let registration = HostMessage {
        request_id: RequestId::generate(),
        payload: HostPayload::Registration {
            host_id: Some(host_id),
            hostname: config.hostname.clone(),
            version: config.version.clone(),
            advertised_images: config.advertised_images.clone(),
            source_vms: status.source_vm_names().await,
            resources: status.resources().await,
        },
    };
    send(&writer, &registration).await?;

    let frame = reader
        .next()
        .await
        .ok_or(HostError::HandshakeIncomplete)?
        .map_err(|e| HostError::Wire(e.into()))?;
    let ack: HostMessage = fluidsh_wire::decode_frame(&frame)?;
    let HostPayload::RegistrationAck { accepted, reason, .. } = ack.payload else {
        return Err(HostError::HandshakeIncomplete);
    };
    if !accepted {
        return Err(HostError::RegistrationRejected(reason.unwrap_or_default()));
    }
    info!(%host_id, "registered with control plane");

    let heartbeat_task = tokio::spawn(heartbeat_loop(writer.clone(), config.heartbeat_interval, status));
    let dispatch_result = dispatch_loop(reader, writer, dispatcher, config.handler_pool_size).await;
    heartbeat_task.abort();
    dispatch_result
}

type SharedWriter<W> = Arc<Mutex<FramedWrite<W, LengthDelimitedCodec>>>;

async fn send<W>(writer: &SharedWriter<W>, message: &HostMessage) -> HostResult<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = fluidsh_wire::encode_frame(message)?;
    writer.lock().await.send(Bytes::from(bytes)).await.map_err(|e| HostError::Wire(e.into()))
}

async fn heartbeat_loop<W>(writer: SharedWriter<W>, interval: Duration, status: Arc<dyn HostStatus>)
where
    W: AsyncWrite + Unpin,
{
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let snapshot = status.resources().await;
        let source_vm_count = status.source_vm_names().await.len() as u32;
        let message = HostMessage {
            request_id: RequestId::generate(),
            payload: HostPayload::Heartbeat {
                available_cpus: snapshot.available_cpus,
                active_sandboxes: snapshot.active_sandboxes,
                source_vm_count,
            },
        };
        if send(&writer, &message).await.is_err() {
            return;
        }
    }
}

/// Reads `ControlMessage`s until the stream closes, dispatching each
/// to the handler pool (bounded by `pool_size`, rejecting with an
/// immediate `ErrorReport` when the pool is saturated rather than
/// queuing unboundedly — §5 "bounded worker pool per host, backpressure
/// applied by rejecting rather than queuing without limit").
async fn dispatch_loop<R, W>(
    mut reader: FramedRead<R, LengthDelimitedCodec>,
    writer: SharedWriter<W>,
    dispatcher: Arc<Dispatcher>,
    pool_size: usize,
) -> HostResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let permits = Arc::new(Semaphore::new(pool_size.max(1)));
    loop {
        let frame = match reader.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(err)) => return Err(HostError::Wire(err.into())),
            None => return Ok(()),
        };
        let message: ControlMessage = fluidsh_wire::decode_frame(&frame)?;

        let Ok(permit) = permits.clone().try_acquire_owned() else {
            let reply = HostMessage {
                request_id: message.request_id,
                payload: HostPayload::ErrorReport {
                    kind: fluidsh_wire::ErrorKind::TransientTransport,
                    message: "handler pool saturated".to_string(),
                },
            };
            let _ = send(&writer, &reply).await;
            continue;
        };

        let dispatcher = dispatcher.clone();
        let writer = writer.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let payload = dispatcher.handle(message.payload).await;
            let reply = HostMessage {
                request_id: message.request_id,
                payload,
            };
            let _ = send(&writer, &reply).await;
        });
    }
}
