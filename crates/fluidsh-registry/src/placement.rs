//! Placement (§4.1 "Placement"): choosing which connected, healthy
//! host should run a new sandbox.

use chrono::{DateTime, Utc};
use fluidsh_types::HostRecord;

use crate::error::RegistryError;

/// Filters to connected, healthy hosts advertising `image` with at
/// least `min_cpu`/`min_memory_mb` free, then picks the one with the
/// greatest available memory. Ties are broken by keeping the first
/// host encountered in `hosts`' order (its "stable iteration order"),
/// not the last, unlike `Iterator::max_by_key`.
pub fn select_for_image<'a>(
    hosts: &'a [HostRecord],
    image: &str,
    min_cpu: u32,
    min_memory_mb: u32,
    now: DateTime<Utc>,
) -> Result<&'a HostRecord, RegistryError> {
    let mut best: Option<&HostRecord> = None;
    for host in hosts {
        if !host.is_eligible_for(image, min_cpu, min_memory_mb, now) {
            continue;
        }
        match best {
            Some(current) if current.resources.available_memory_mb >= host.resources.available_memory_mb => {}
            _ => best = Some(host),
        }
    }
    best.ok_or_else(|| RegistryError::PlacementExhausted {
        image: image.to_string(),
    })
}

/// Selects the (unique, per the contract) host advertising a source
/// VM by name. The spec leaves "same name on multiple hosts" an
/// implementer's choice (§9 Open Questions); this implementation
/// iterates hosts sorted by `HostId` for determinism and logs the
/// first time a duplicate is observed, rather than silently picking
/// whichever host the caller happened to pass first.
pub fn select_for_source_vm<'a>(
    hosts: &'a [HostRecord],
    vm_name: &str,
) -> Result<&'a HostRecord, RegistryError> {
    let mut sorted: Vec<&HostRecord> = hosts
        .iter()
        .filter(|h| h.connected && h.source_vms.iter().any(|v| v == vm_name))
        .collect();
    sorted.sort_by_key(|h| h.id);

    if sorted.len() > 1 {
        tracing::warn!(
            vm_name,
            hosts = sorted.len(),
            "source vm name is advertised by more than one host; using lowest HostId"
        );
    }

    sorted
        .into_iter()
        .next()
        .ok_or_else(|| RegistryError::SourceVmNotPlaced(vm_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluidsh_types::{HostHealth, HostId, ResourceSnapshot};

    fn host(id_seed: u8, image: &str, cpu: u32, mem: u32, heartbeat_age_secs: i64) -> HostRecord {
        let _ = HostHealth::Healthy;
        HostRecord {
            id: HostId::from_uuid(uuid::Uuid::from_u128(id_seed as u128)),
            hostname: format!("hv-{id_seed}"),
            version: "0.3.0".into(),
            advertised_images: vec![image.to_string()],
            source_vms: vec![],
            resources: ResourceSnapshot {
                available_cpus: cpu,
                available_memory_mb: mem,
                active_sandboxes: 0,
            },
            last_heartbeat: Utc::now() - chrono::Duration::seconds(heartbeat_age_secs),
            connected: true,
        }
    }

    #[test]
    fn picks_most_free_memory_among_eligible_hosts() {
        let hosts = vec![
            host(1, "ubuntu-22.04", 4, 2048, 5),
            host(2, "ubuntu-22.04", 4, 4096, 5),
            host(3, "ubuntu-22.04", 4, 3072, 5),
        ];
        let chosen = select_for_image(&hosts, "ubuntu-22.04", 1, 512, Utc::now()).unwrap();
        assert_eq!(chosen.hostname, "hv-2");
    }

    #[test]
    fn skips_unhealthy_hosts() {
        let hosts = vec![host(1, "ubuntu-22.04", 4, 4096, 200)];
        let result = select_for_image(&hosts, "ubuntu-22.04", 1, 512, Utc::now());
        assert!(matches!(result, Err(RegistryError::PlacementExhausted { .. })));
    }

    #[test]
    fn rejects_hosts_below_resource_floor() {
        let hosts = vec![host(1, "ubuntu-22.04", 0, 256, 5)];
        let result = select_for_image(&hosts, "ubuntu-22.04", 1, 512, Utc::now());
        assert!(result.is_err());
    }

    #[test]
    fn ties_keep_the_first_host_in_iteration_order() {
        let hosts = vec![
            host(1, "ubuntu-22.04", 4, 4096, 5),
            host(2, "ubuntu-22.04", 4, 4096, 5),
        ];
        let chosen = select_for_image(&hosts, "ubuntu-22.04", 1, 512, Utc::now()).unwrap();
        assert_eq!(chosen.hostname, "hv-1");
    }

    #[test]
    fn source_vm_placement_prefers_lowest_host_id_on_collision() {
        let mut h1 = host(5, "ubuntu-22.04", 4, 4096, 5);
        h1.source_vms = vec!["prod-db".to_string()];
        let mut h2 = host(2, "ubuntu-22.04", 4, 4096, 5);
        h2.source_vms = vec!["prod-db".to_string()];

        let hosts = vec![h1, h2];
        let chosen = select_for_source_vm(&hosts, "prod-db").unwrap();
        assert_eq!(chosen.hostname, "hv-2");
    }
}
