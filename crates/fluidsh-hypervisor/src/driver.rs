//! The hypervisor capability-set interface (§9 redesign flag:
//! "dynamic polymorphism over hypervisor drivers ... capability-set
//! interface ... the driver is a runtime-selected variant, not a
//! subclass hierarchy").
//!
//! A driver is chosen once at host-daemon startup from configuration
//! and held behind `Arc<dyn HypervisorDriver>` for the daemon's
//! lifetime; adding microVM or Proxmox support later means a new
//! implementation of this trait, not a change to any caller.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::HypervisorResult;

/// Everything the Sandbox Lifecycle Manager needs to clone a new
/// domain (§4.2 Clone, steps 1-6).
#[derive(Debug, Clone)]
pub struct CloneSpec {
    /// Name of the source VM or base image to clone from.
    pub source: String,
    /// Name to give the new domain; also the cloud-init `instance-id`.
    pub new_name: String,
    pub vcpu: u32,
    pub memory_mb: u32,
    /// Libvirt network to attach the new interface to.
    pub network: String,
    /// Working directory this sandbox's overlay, seed ISO, and domain
    /// definition are written under.
    pub work_dir: std::path::PathBuf,
}

/// What a successful clone produced, handed back to the Sandbox
/// Lifecycle Manager for its metadata file (§ "Filesystem layout").
#[derive(Debug, Clone)]
pub struct ClonedDomain {
    pub domain_name: String,
    pub mac: String,
    pub tap_name: String,
    pub overlay_path: std::path::PathBuf,
}

/// Coarse domain power state, as reported by `GetState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainState {
    Running,
    ShutOff,
    Crashed,
    Unknown,
}

/// Host-wide resource snapshot used for placement reporting (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostResources {
    pub available_cpus: u32,
    pub available_memory_mb: u32,
}

/// The capability set every hypervisor backend must implement.
#[async_trait]
pub trait HypervisorDriver: Send + Sync {
    /// Clones a source into a fresh domain: overlay, cloud-init seed,
    /// rewritten domain definition, MAC/TAP assignment, define + start
    /// (§4.2 steps 1-6). Does not wait for IP or SSH reachability —
    /// that is the caller's job via [`crate::ip_discovery`].
    async fn clone_from_vm(&self, spec: CloneSpec) -> HypervisorResult<ClonedDomain>;

    /// Boots a previously-defined but stopped domain.
    async fn start(&self, domain_name: &str) -> HypervisorResult<()>;

    /// Gracefully shuts a domain down, escalating to a forced
    /// destroy after `grace_period` if it hasn't stopped.
    async fn stop(&self, domain_name: &str, force: bool, grace_period: Duration)
    -> HypervisorResult<()>;

    /// Tears a domain down completely: force-stop, undefine (with
    /// storage removal, falling back to plain undefine on older
    /// drivers), per §4.2 "Start/stop/destroy".
    async fn destroy(&self, domain_name: &str) -> HypervisorResult<()>;

    /// Takes an internal disk snapshot of a running or stopped
    /// domain.
    async fn snapshot(&self, domain_name: &str, snapshot_name: &str) -> HypervisorResult<()>;

    /// Returns the domain's current power state.
    async fn get_state(&self, domain_name: &str) -> HypervisorResult<DomainState>;

    /// Validates that `source` names a clonable VM or base image
    /// known to this hypervisor (used by `ValidateSourceCommand` and
    /// by placement's image-advertisement check).
    async fn validate(&self, source: &str) -> HypervisorResult<()>;

    /// Checks whether the host currently has at least `min_cpu`
    /// vCPUs and `min_memory_mb` free, for local admission control
    /// ahead of accepting a placement.
    async fn check_resources(&self, min_cpu: u32, min_memory_mb: u32) -> HypervisorResult<bool>;

    /// Reports the host's current free capacity, for heartbeats.
    async fn host_resources(&self) -> HypervisorResult<HostResources>;

    /// Removes a MAC's entry from the network's DHCP lease file, so a
    /// later sandbox reusing that MAC doesn't inherit a stale lease
    /// (§4.2 "Destroy").
    async fn forget_dhcp_lease(&self, network: &str, mac: &str) -> HypervisorResult<()>;
}
