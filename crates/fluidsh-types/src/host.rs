use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::HostId;

/// Point-in-time resource snapshot a host reports at registration and on
/// every heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub available_cpus: u32,
    pub available_memory_mb: u32,
    pub active_sandboxes: u32,
}

/// Health classification derived from heartbeat age. A host older than
/// 90 seconds is unhealthy and ineligible for placement, but stays
/// registered — it rejoins automatically on its next heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostHealth {
    Healthy,
    Unhealthy,
}

/// A registered host, as tracked in the control plane's registry.
///
/// Created on first successful registration and never mutated by client
/// requests directly — only by registration, heartbeat, and resource
/// updates arriving over the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    pub id: HostId,
    pub hostname: String,
    pub version: String,
    pub advertised_images: Vec<String>,
    pub source_vms: Vec<String>,
    pub resources: ResourceSnapshot,
    pub last_heartbeat: DateTime<Utc>,
    pub connected: bool,
}

impl HostRecord {
    pub const UNHEALTHY_AFTER_SECONDS: i64 = 90;

    pub fn health(&self, now: DateTime<Utc>) -> HostHealth {
        let age = now - self.last_heartbeat;
        if age.num_seconds() > Self::UNHEALTHY_AFTER_SECONDS {
            HostHealth::Unhealthy
        } else {
            HostHealth::Healthy
        }
    }

    pub fn is_eligible_for(&self, image: &str, min_cpu: u32, min_memory_mb: u32, now: DateTime<Utc>) -> bool {
        self.connected
            && self.health(now) == HostHealth::Healthy
            && self.advertised_images.iter().any(|i| i == image)
            && self.resources.available_cpus >= min_cpu
            && self.resources.available_memory_mb >= min_memory_mb
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_with_heartbeat_age(seconds_ago: i64) -> HostRecord {
        HostRecord {
            id: HostId::generate(),
            hostname: "hv-01".into(),
            version: "0.3.0".into(),
            advertised_images: vec!["ubuntu-22.04".into()],
            source_vms: vec![],
            resources: ResourceSnapshot {
                available_cpus: 4,
                available_memory_mb: 4096,
                active_sandboxes: 0,
            },
            last_heartbeat: Utc::now() - chrono::Duration::seconds(seconds_ago),
            connected: true,
        }
    }

    #[test]
    fn host_becomes_unhealthy_past_90_seconds() {
        assert_eq!(host_with_heartbeat_age(89).health(Utc::now()), HostHealth::Healthy);
        assert_eq!(host_with_heartbeat_age(91).health(Utc::now()), HostHealth::Unhealthy);
    }

    #[test]
    fn eligibility_requires_image_cpu_and_memory() {
        let host = host_with_heartbeat_age(10);
        assert!(host.is_eligible_for("ubuntu-22.04", 1, 512, Utc::now()));
        assert!(!host.is_eligible_for("debian-12", 1, 512, Utc::now()));
        assert!(!host.is_eligible_for("ubuntu-22.04", 8, 512, Utc::now()));
    }
}
