//! The configuration schema itself.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration shared by `fluidsh-cp` and `fluidsh-host`.
///
/// Only the subset relevant to a given binary is read at startup; unused
/// sections are harmless (e.g. `host` fields are ignored by the control
/// plane binary).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FluidshConfig {
    pub project: ProjectSettings,
    pub stream: StreamSettings,
    pub host: HostSettings,
    pub ca: CaSettings,
    pub source: SourceSettings,
    pub rest: RestSettings,
    pub logging: LoggingSettings,
}

impl Default for FluidshConfig {
    fn default() -> Self {
        Self {
            project: ProjectSettings::default(),
            stream: StreamSettings::default(),
            host: HostSettings::default(),
            ca: CaSettings::default(),
            source: SourceSettings::default(),
            rest: RestSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSettings {
    pub name: String,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            name: "fluidsh".to_string(),
        }
    }
}

/// Host<->control-plane stream settings (§4.1, §5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Address a host daemon dials to reach the control plane.
    pub control_plane_addr: String,
    /// Address the control plane binds its host-facing stream
    /// listener to. Unused by the host binary.
    pub bind_address: String,
    /// Bearer token a host daemon presents at registration. In a real
    /// deployment this is minted per-host out of band; the in-tree
    /// default only suits a single-host local run.
    pub bearer_token: String,
    pub heartbeat_interval_secs: u64,
    pub unhealthy_after_secs: u64,
    pub reconnect_initial_backoff_secs: u64,
    pub reconnect_max_backoff_secs: u64,
    pub reconnect_reset_after_secs: u64,
    pub handler_pool_size: usize,
    pub send_and_wait_timeout_secs: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            control_plane_addr: "127.0.0.1:7700".to_string(),
            bind_address: "0.0.0.0:7700".to_string(),
            bearer_token: "development-only-token".to_string(),
            heartbeat_interval_secs: 30,
            unhealthy_after_secs: 90,
            reconnect_initial_backoff_secs: 1,
            reconnect_max_backoff_secs: 60,
            reconnect_reset_after_secs: 300,
            handler_pool_size: 64,
            send_and_wait_timeout_secs: 120,
        }
    }
}

/// Per-host sandbox lifecycle settings (§4.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    pub work_dir: PathBuf,
    pub default_ttl_secs: u64,
    pub janitor_interval_secs: u64,
    pub create_timeout_secs: u64,
    pub lifecycle_timeout_secs: u64,
    pub run_command_default_timeout_secs: u64,
    pub run_command_transport_slack_secs: u64,
    pub ip_discovery_timeout_secs: u64,
    pub ssh_connect_timeout_secs: u64,
    pub hypervisor_driver: String,
    /// Libvirt network every sandbox on this host is cloned onto. One
    /// host advertises one network; operators running multiple
    /// isolation tiers run multiple host daemons.
    pub default_network: String,
    /// Images this host advertises to the control plane at
    /// registration as clonable (§4.1 "Registration").
    pub advertised_images: Vec<String>,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/var/lib/fluidsh/sandboxes"),
            default_ttl_secs: 3600,
            janitor_interval_secs: 60,
            create_timeout_secs: 300,
            lifecycle_timeout_secs: 120,
            run_command_default_timeout_secs: 300,
            run_command_transport_slack_secs: 30,
            ip_discovery_timeout_secs: 120,
            ssh_connect_timeout_secs: 15,
            hypervisor_driver: "libvirt".to_string(),
            default_network: "fluidsh-sandboxes".to_string(),
            advertised_images: Vec::new(),
        }
    }
}

/// SSH certificate authority settings (§4.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaSettings {
    pub key_dir: PathBuf,
    pub default_ttl_secs: u64,
    pub min_ttl_secs: u64,
    pub max_ttl_secs: u64,
    pub not_before_backdate_secs: u64,
    pub refresh_margin_secs: u64,
}

impl Default for CaSettings {
    fn default() -> Self {
        Self {
            key_dir: PathBuf::from("/var/lib/fluidsh/ca"),
            default_ttl_secs: 30 * 60,
            min_ttl_secs: 60,
            max_ttl_secs: 60 * 60,
            not_before_backdate_secs: 60,
            refresh_margin_secs: 30,
        }
    }
}

/// A production VM this host advertises for read-only inspection,
/// named statically in configuration (source VMs are existing
/// infrastructure, not something the hypervisor driver creates).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownSourceVm {
    pub name: String,
    pub ip: String,
}

/// Read-only source VM enforcement settings (§4.4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    /// Admin user `Prepare` connects as to install the restricted
    /// shell, the `fluid-readonly` user, and the sshd directives.
    pub admin_user: String,
    /// Private key `Prepare`'s admin connection authenticates with.
    pub admin_key_path: PathBuf,
    pub connect_timeout_secs: u64,
    pub known_vms: Vec<KnownSourceVm>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            admin_user: "root".to_string(),
            admin_key_path: PathBuf::from("/etc/fluidsh/source-admin-key"),
            connect_timeout_secs: 15,
            known_vms: Vec::new(),
        }
    }
}

/// The control plane's REST boundary (§6) — bind address only; the
/// handlers themselves live in `fluidsh-cp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestSettings {
    pub bind_address: String,
}

impl Default for RestSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub json: bool,
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            json: false,
            filter: "info".to_string(),
        }
    }
}
