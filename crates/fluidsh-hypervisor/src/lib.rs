//! Hypervisor driver abstraction: a capability-set trait so the
//! Sandbox Lifecycle Manager never depends on a specific hypervisor,
//! plus a libvirt/`virsh`-backed implementation and the IP discovery
//! fallback chain (DHCP lease -> guest agent -> ARP table).

mod cloud_init;
mod driver;
mod error;
mod ip_discovery;
mod libvirt;
mod mac;
mod xml;

pub use driver::{CloneSpec, ClonedDomain, DomainState, HostResources, HypervisorDriver};
pub use error::{HypervisorError, HypervisorResult};
pub use ip_discovery::{discover_ip, discover_ip_with_timeout};
pub use libvirt::LibvirtDriver;
pub use mac::random_qemu_mac;
