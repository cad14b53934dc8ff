//! IP discovery for a just-started domain (§4.2 step 7): poll the DHCP
//! lease source, then the guest agent, then the host's ARP table,
//! with exponential-backoff polling capped at a 2-minute total budget.

use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio::time::sleep;

use crate::error::{HypervisorError, HypervisorResult};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const INITIAL_POLL_INTERVAL: Duration = Duration::from_millis(500);
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(8);

/// One IP-address source, tried in order for each poll attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    DhcpLease,
    Agent,
    ArpTable,
}

const SOURCES: [Source; 3] = [Source::DhcpLease, Source::Agent, Source::ArpTable];

/// Polls for `domain_name`'s IP address across all three sources until
/// one succeeds or `timeout` elapses.
pub async fn discover_ip(domain_name: &str, mac: &str) -> HypervisorResult<String> {
    discover_ip_with_timeout(domain_name, mac, DEFAULT_TIMEOUT).await
}

pub async fn discover_ip_with_timeout(
    domain_name: &str,
    mac: &str,
    timeout: Duration,
) -> HypervisorResult<String> {
    let deadline = Instant::now() + timeout;
    let mut interval = INITIAL_POLL_INTERVAL;

    loop {
        for source in SOURCES {
            if let Some(ip) = query_source(source, domain_name, mac).await {
                return Ok(ip);
            }
        }

        if Instant::now() >= deadline {
            return Err(HypervisorError::IpDiscoveryTimedOut(
                domain_name.to_string(),
                timeout,
            ));
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        sleep(interval.min(remaining)).await;
        interval = (interval * 2).min(MAX_POLL_INTERVAL);
    }
}

async fn query_source(source: Source, domain_name: &str, mac: &str) -> Option<String> {
    match source {
        Source::DhcpLease => dhcp_lease_ip(domain_name, mac).await,
        Source::Agent => agent_ip(domain_name).await,
        Source::ArpTable => arp_table_ip(mac).await,
    }
}

/// `virsh net-dhcp-leases default` output, grepped by MAC.
async fn dhcp_lease_ip(domain_name: &str, mac: &str) -> Option<String> {
    let _ = domain_name;
    let output = Command::new("virsh")
        .args(["net-dhcp-leases", "default"])
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_dhcp_leases(&stdout, mac)
}

fn parse_dhcp_leases(output: &str, mac: &str) -> Option<String> {
    output.lines().find_map(|line| {
        if !line.to_lowercase().contains(&mac.to_lowercase()) {
            return None;
        }
        line.split_whitespace()
            .find(|field| field.contains('/'))
            .and_then(|cidr| cidr.split('/').next())
            .map(str::to_string)
    })
}

/// `virsh domifaddr --source agent` — requires the guest agent channel
/// to already be responding.
async fn agent_ip(domain_name: &str) -> Option<String> {
    let output = Command::new("virsh")
        .args(["domifaddr", domain_name, "--source", "agent"])
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_domifaddr(&stdout)
}

fn parse_domifaddr(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        line.split_whitespace()
            .find(|field| field.contains('/') && field.contains('.'))
            .and_then(|cidr| cidr.split('/').next())
            .map(str::to_string)
    })
}

/// Last resort: scan the host's ARP/neighbor table for the MAC.
async fn arp_table_ip(mac: &str) -> Option<String> {
    let output = Command::new("ip").args(["neigh"]).output().await.ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_arp_table(&stdout, mac)
}

fn parse_arp_table(output: &str, mac: &str) -> Option<String> {
    let mac = mac.to_lowercase();
    output.lines().find_map(|line| {
        if !line.to_lowercase().contains(&mac) {
            return None;
        }
        line.split_whitespace().next().map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dhcp_lease_parsing_matches_case_insensitively_on_mac() {
        let output = "Expiry Time          MAC address        Protocol  IP address           Hostname  Client ID\n\
-------------------------------------------------------------------------------------------------------------\n\
2026-07-28 10:00:00  52:54:00:AA:BB:CC  ipv4      192.168.122.42/24    sbx-1     *\n";
        assert_eq!(
            parse_dhcp_leases(output, "52:54:00:aa:bb:cc"),
            Some("192.168.122.42".to_string())
        );
        assert_eq!(parse_dhcp_leases(output, "52:54:00:ff:ff:ff"), None);
    }

    #[test]
    fn domifaddr_parsing_extracts_the_first_ipv4_cidr() {
        let output = " Name       MAC address          Protocol     Address\n\
-------------------------------------------------------------------------------\n\
 vnet0      52:54:00:aa:bb:cc    ipv4         192.168.122.42/24\n";
        assert_eq!(parse_domifaddr(output), Some("192.168.122.42".to_string()));
        assert_eq!(parse_domifaddr(""), None);
    }

    #[test]
    fn arp_table_parsing_matches_mac_and_returns_leading_ip() {
        let output = "192.168.122.42 dev virbr0 lladdr 52:54:00:aa:bb:cc REACHABLE\n";
        assert_eq!(
            parse_arp_table(output, "52:54:00:AA:BB:CC"),
            Some("192.168.122.42".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn discover_ip_times_out_when_no_source_ever_resolves() {
        let result =
            discover_ip_with_timeout("sbx-missing", "52:54:00:00:00:00", Duration::from_secs(3))
                .await;
        assert!(matches!(result, Err(HypervisorError::IpDiscoveryTimedOut(_, _))));
    }
}
