//! The in-memory index of connected hosts (§4.1 "Host Registry"):
//! registration, heartbeat bookkeeping, and the `SendAndWait` entry
//! point used by the orchestrator. Guarded by a single `RwLock` per
//! §5 ("The host registry map is guarded by a single reader-writer
//! mutex; lookups hold it in read mode only").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fluidsh_store::StateStore;
use fluidsh_types::{HostHealth, HostId, HostRecord, ResourceSnapshot};
use fluidsh_wire::{ControlPayload, HostPayload};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::connection::{self, ConnectedHost};
use crate::error::{RegistryError, RegistryResult};
use crate::handshake;

/// The host registry and stream multiplexer. One instance lives for
/// the control plane process's lifetime, held behind an `Arc` and
/// passed explicitly to the orchestrator and REST handlers — never a
/// package-scoped singleton (§9 redesign flag).
pub struct Registry {
    hosts: RwLock<HashMap<HostId, Arc<ConnectedHost>>>,
    store: Arc<dyn StateStore>,
}

impl Registry {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            hosts: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// Accepts a freshly connected host stream: reads the bearer
    /// token, performs the registration handshake, authenticates
    /// against the store, persists the `HostRecord`, and registers
    /// the live connection for placement and `SendAndWait` (§4.1
    /// "Registration protocol").
    #[instrument(skip(self, io))]
    pub async fn accept_host<IO>(self: &Arc<Self>, mut io: IO) -> RegistryResult<HostId>
    where
        IO: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let token = handshake::read_bearer_token(&mut io).await?;
        let store = self.store.clone();

        let (host, registration) = connection::accept(io, move |payload| {
            let store = store.clone();
            let token = token.clone();
            async move { authenticate_and_ack(&store, payload, &token).await }
        })
        .await?;

        let HostPayload::Registration {
            hostname,
            version,
            advertised_images,
            source_vms,
            resources,
            ..
        } = registration
        else {
            return Err(RegistryError::Handshake("first frame was not a Registration".to_string()));
        };

        let record = HostRecord {
            id: host.id(),
            hostname,
            version,
            advertised_images,
            source_vms,
            resources: ResourceSnapshot {
                available_cpus: resources.available_cpus,
                available_memory_mb: resources.available_memory_mb,
                active_sandboxes: resources.active_sandboxes,
            },
            last_heartbeat: Utc::now(),
            connected: true,
        };
        self.store.upsert_host(record).await?;

        self.hosts.write().await.insert(host.id(), host.clone());

        let registry = self.clone();
        let host_id = host.id();
        host.set_heartbeat_handler(move |available_cpus, active_sandboxes| {
            let registry = registry.clone();
            tokio::spawn(async move {
                if let Err(err) = registry.record_heartbeat(host_id, available_cpus, active_sandboxes).await {
                    warn!(%host_id, error = %err, "failed to record heartbeat");
                }
            });
        });

        info!(host_id = %host.id(), "host registered");
        Ok(host.id())
    }

    /// Records a heartbeat from an already-registered host (§4.1
    /// "Heartbeat"). Hosts whose heartbeat goes stale are not
    /// disconnected — they simply become ineligible for placement
    /// until their next heartbeat lands.
    pub async fn record_heartbeat(
        &self,
        host_id: HostId,
        available_cpus: u32,
        active_sandboxes: u32,
    ) -> RegistryResult<()> {
        let mut record = self.store.get_host(host_id).await?;
        record.resources.available_cpus = available_cpus;
        record.resources.active_sandboxes = active_sandboxes;
        record.last_heartbeat = Utc::now();
        record.connected = self.is_connected(host_id).await;
        self.store.upsert_host(record).await?;
        Ok(())
    }

    async fn is_connected(&self, host_id: HostId) -> bool {
        self.hosts
            .read()
            .await
            .get(&host_id)
            .is_some_and(|h| h.is_connected())
    }

    /// Sends a command to a connected host and blocks until the
    /// matching response arrives, the timeout fires, or the stream
    /// drops (§4.1 "Send-and-wait").
    pub async fn send_and_wait(
        &self,
        host_id: HostId,
        payload: ControlPayload,
        timeout: Duration,
    ) -> RegistryResult<HostPayload> {
        let host = {
            let hosts = self.hosts.read().await;
            hosts.get(&host_id).cloned()
        }
        .ok_or(RegistryError::HostNotConnected(host_id))?;

        if !host.is_connected() {
            self.hosts.write().await.remove(&host_id);
            return Err(RegistryError::HostNotConnected(host_id));
        }

        let message = fluidsh_wire::ControlMessage {
            request_id: fluidsh_types::RequestId::generate(),
            payload,
        };
        let response = host.send_and_wait(message, timeout).await?;
        Ok(response.payload)
    }

    /// All hosts known to the store, for placement and `GET
    /// /v1/hosts`. Placement itself additionally checks connectivity
    /// and heartbeat freshness (§4.1 "Placement").
    pub async fn list_hosts(&self) -> RegistryResult<Vec<HostRecord>> {
        let mut hosts = self.store.list_hosts().await?;
        let connected = self.hosts.read().await;
        for host in &mut hosts {
            host.connected = connected.get(&host.id).is_some_and(|h| h.is_connected());
        }
        Ok(hosts)
    }

    pub async fn get_host(&self, host_id: HostId) -> RegistryResult<HostRecord> {
        let mut record = self.store.get_host(host_id).await?;
        record.connected = self.is_connected(host_id).await;
        Ok(record)
    }

    /// Drops registry entries for hosts whose stream is no longer
    /// connected, so a future placement lookup doesn't find a stale
    /// `Arc<ConnectedHost>` whose reader loop has already exited.
    pub async fn reap_disconnected(&self) {
        let mut hosts = self.hosts.write().await;
        let before = hosts.len();
        hosts.retain(|_, host| host.is_connected());
        let reaped = before - hosts.len();
        if reaped > 0 {
            warn!(reaped, "removed disconnected hosts from the registry");
        }
    }
}

/// Authenticates a presented bearer token against the store, assigns
/// a `HostId` on first registration, and builds the `RegistrationAck`
/// (§4.1 "Registration protocol").
async fn authenticate_and_ack(
    store: &Arc<dyn StateStore>,
    payload: HostPayload,
    token: &str,
) -> RegistryResult<(HostId, HostPayload)> {
    let HostPayload::Registration { host_id, .. } = &payload else {
        return Err(RegistryError::Handshake("expected Registration as the first frame".to_string()));
    };

    let token_hash = handshake::hash_token(token);
    let assigned = match host_id {
        Some(id) => {
            if let Ok(existing) = store.get_host(*id).await {
                let _ = existing;
                if !store.verify_host_token(*id, &token_hash).await.unwrap_or(false) {
                    return Err(RegistryError::RegistrationRejected(
                        "bearer token does not match this host id".to_string(),
                    ));
                }
            }
            *id
        }
        None => HostId::generate(),
    };

    store.set_host_token_hash(assigned, token_hash).await?;

    Ok((
        assigned,
        HostPayload::RegistrationAck {
            accepted: true,
            assigned_host_id: Some(assigned),
            reason: None,
        },
    ))
}

/// `HostHealth` re-export for callers that only need the registry's
/// notion of healthy/unhealthy without depending on `fluidsh-types`
/// directly.
pub fn health_of(host: &HostRecord, now: chrono::DateTime<Utc>) -> HostHealth {
    host.health(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluidsh_store::InMemoryStore;
    use fluidsh_wire::ResourceSnapshotWire;
    use tokio::io::duplex;

    fn store() -> Arc<dyn StateStore> {
        Arc::new(InMemoryStore::new())
    }

    #[tokio::test]
    async fn accept_host_persists_a_host_record_and_registers_the_connection() {
        let registry = Arc::new(Registry::new(store()));
        let (mut client, server) = duplex(8192);

        let registry_clone = registry.clone();
        let accept_task = tokio::spawn(async move { registry_clone.accept_host(server).await });

        handshake::write_bearer_token(&mut client, "tok-1").await.unwrap();
        let registration = fluidsh_wire::HostMessage {
            request_id: fluidsh_types::RequestId::generate(),
            payload: HostPayload::Registration {
                host_id: None,
                hostname: "hv-1".to_string(),
                version: "0.3.0".to_string(),
                advertised_images: vec!["ubuntu-22.04".to_string()],
                source_vms: vec![],
                resources: ResourceSnapshotWire {
                    available_cpus: 4,
                    available_memory_mb: 4096,
                    active_sandboxes: 0,
                },
            },
        };
        let bytes = fluidsh_wire::encode_frame(&registration).unwrap();
        use bytes::Bytes;
        use futures::SinkExt;
        let mut framed = tokio_util::codec::FramedWrite::new(
            &mut client,
            tokio_util::codec::LengthDelimitedCodec::builder()
                .max_frame_length(fluidsh_wire::MAX_FRAME_LEN)
                .length_field_length(4)
                .new_codec(),
        );
        framed.send(Bytes::from(bytes)).await.unwrap();

        let host_id = accept_task.await.unwrap().unwrap();
        let record = registry.get_host(host_id).await.unwrap();
        assert_eq!(record.hostname, "hv-1");
        assert!(record.connected);
    }

    #[tokio::test]
    async fn inbound_heartbeat_frames_update_the_host_record() {
        let registry = Arc::new(Registry::new(store()));
        let (mut client, server) = duplex(8192);

        let registry_clone = registry.clone();
        let accept_task = tokio::spawn(async move { registry_clone.accept_host(server).await });

        handshake::write_bearer_token(&mut client, "tok-1").await.unwrap();
        let registration = fluidsh_wire::HostMessage {
            request_id: fluidsh_types::RequestId::generate(),
            payload: HostPayload::Registration {
                host_id: None,
                hostname: "hv-1".to_string(),
                version: "0.3.0".to_string(),
                advertised_images: vec!["ubuntu-22.04".to_string()],
                source_vms: vec![],
                resources: ResourceSnapshotWire {
                    available_cpus: 4,
                    available_memory_mb: 4096,
                    active_sandboxes: 0,
                },
            },
        };
        use bytes::Bytes;
        use futures::SinkExt;
        let mut framed = tokio_util::codec::FramedWrite::new(
            &mut client,
            tokio_util::codec::LengthDelimitedCodec::builder()
                .max_frame_length(fluidsh_wire::MAX_FRAME_LEN)
                .length_field_length(4)
                .new_codec(),
        );
        framed
            .send(Bytes::from(fluidsh_wire::encode_frame(&registration).unwrap()))
            .await
            .unwrap();

        let host_id = accept_task.await.unwrap().unwrap();

        let heartbeat = fluidsh_wire::HostMessage {
            request_id: fluidsh_types::RequestId::generate(),
            payload: HostPayload::Heartbeat {
                available_cpus: 2,
                active_sandboxes: 3,
                source_vm_count: 0,
            },
        };
        framed
            .send(Bytes::from(fluidsh_wire::encode_frame(&heartbeat).unwrap()))
            .await
            .unwrap();

        // The handler spawns its own task to call record_heartbeat; give
        // it a beat to land before asserting.
        for _ in 0..50 {
            let record = registry.get_host(host_id).await.unwrap();
            if record.resources.active_sandboxes == 3 {
                assert_eq!(record.resources.available_cpus, 2);
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("heartbeat was never applied to the host record");
    }
}
