//! Host daemon binary: owns one hypervisor, its sandboxes, and the
//! stream back to the control plane.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use fluidsh_ca::{CertificateAuthority, CredentialCache};
use fluidsh_config::{ConfigLoader, FluidshConfig};
use fluidsh_host::{client, ClientConfig, Dispatcher, HostStatus, SourceVmService};
use fluidsh_hypervisor::{HypervisorDriver, LibvirtDriver};
use fluidsh_sandbox::SandboxManager;
use fluidsh_store::{InMemoryStore, StateStore};
use fluidsh_types::HostId;
use fluidsh_wire::ResourceSnapshotWire;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fluidsh-host")]
#[command(author, version, about = "Fluid.sh sandbox host daemon", long_about = None)]
struct Cli {
    /// Directory to look for `fluidsh.toml` / `fluidsh.local.toml` in.
    #[arg(long)]
    project_dir: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(dir) = &cli.project_dir {
        loader = loader.with_project_dir(dir);
    }
    let config = loader.load().context("loading configuration")?;

    init_tracing(&config);

    std::fs::create_dir_all(&config.host.work_dir)
        .with_context(|| format!("creating work dir {}", config.host.work_dir.display()))?;
    let host_id = load_or_generate_host_id(&config.host.work_dir)?;
    info!(%host_id, "starting host daemon");

    let driver: Arc<dyn HypervisorDriver> = Arc::new(LibvirtDriver::new());
    let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());

    let ca = Arc::new(
        CertificateAuthority::init(
            &config.ca.key_dir,
            Duration::from_secs(config.ca.min_ttl_secs),
            Duration::from_secs(config.ca.max_ttl_secs),
            Duration::from_secs(config.ca.default_ttl_secs),
            Duration::from_secs(config.ca.not_before_backdate_secs),
        )
        .await
        .context("initializing SSH certificate authority")?,
    );
    let credentials = Arc::new(CredentialCache::new(
        ca.clone(),
        config.ca.key_dir.join("credentials"),
        Duration::from_secs(config.ca.refresh_margin_secs),
    ));

    let manager = Arc::new(SandboxManager::new(
        host_id,
        driver.clone(),
        store.clone(),
        credentials.clone(),
        config.host.work_dir.clone(),
        Duration::from_secs(config.host.ssh_connect_timeout_secs),
        Duration::from_secs(config.host.ip_discovery_timeout_secs),
    ));

    let report = manager.recover().await.context("recovering sandboxes from a prior run")?;
    info!(
        recovered = report.recovered,
        skipped_dead = report.skipped_dead,
        skipped_unreadable = report.skipped_unreadable,
        "sandbox crash recovery complete"
    );

    let _janitor = fluidsh_sandbox::spawn_janitor(
        manager.clone(),
        config.host.default_ttl_secs,
        Duration::from_secs(config.host.janitor_interval_secs),
    );

    let source_vms = Arc::new(
        SourceVmService::new(
            store.clone(),
            credentials.clone(),
            ca.clone(),
            &config.source.known_vms,
            config.source.admin_user.clone(),
            config.source.admin_key_path.clone(),
            Duration::from_secs(config.source.connect_timeout_secs),
        )
        .await
        .context("initializing read-only source VM service")?,
    );

    let dispatcher = Arc::new(Dispatcher::new(
        host_id,
        manager.clone(),
        driver.clone(),
        source_vms.clone(),
        Duration::from_secs(config.host.run_command_transport_slack_secs),
        config.host.default_network.clone(),
    ));

    let status: Arc<dyn HostStatus> = Arc::new(LiveHostStatus {
        driver: driver.clone(),
        store: store.clone(),
        source_vms: source_vms.clone(),
        host_id,
    });

    let client_config = ClientConfig {
        control_plane_addr: config.stream.control_plane_addr.clone(),
        bearer_token: config.stream.bearer_token.clone(),
        hostname: hostname(host_id),
        version: env!("CARGO_PKG_VERSION").to_string(),
        advertised_images: config.host.advertised_images.clone(),
        heartbeat_interval: Duration::from_secs(config.stream.heartbeat_interval_secs),
        handler_pool_size: config.stream.handler_pool_size,
        reconnect_initial_backoff: Duration::from_secs(config.stream.reconnect_initial_backoff_secs),
        reconnect_max_backoff: Duration::from_secs(config.stream.reconnect_max_backoff_secs),
        reconnect_reset_after: Duration::from_secs(config.stream.reconnect_reset_after_secs),
    };

    client::run(client_config, host_id, dispatcher, status).await?;
    Ok(())
}

struct LiveHostStatus {
    driver: Arc<dyn HypervisorDriver>,
    store: Arc<dyn StateStore>,
    source_vms: Arc<SourceVmService>,
    host_id: HostId,
}

#[async_trait]
impl HostStatus for LiveHostStatus {
    async fn resources(&self) -> ResourceSnapshotWire {
        let active_sandboxes = self
            .store
            .list_active_sandboxes(Some(self.host_id))
            .await
            .map(|sandboxes| sandboxes.len() as u32)
            .unwrap_or(0);
        match self.driver.host_resources().await {
            Ok(resources) => ResourceSnapshotWire {
                available_cpus: resources.available_cpus,
                available_memory_mb: resources.available_memory_mb,
                active_sandboxes,
            },
            Err(_) => ResourceSnapshotWire {
                available_cpus: 0,
                available_memory_mb: 0,
                active_sandboxes,
            },
        }
    }

    async fn source_vm_names(&self) -> Vec<String> {
        self.source_vms.names().await
    }
}

fn load_or_generate_host_id(work_dir: &std::path::Path) -> Result<HostId> {
    let path = work_dir.join(".host_id");
    if let Ok(contents) = std::fs::read_to_string(&path) {
        if let Ok(uuid) = contents.trim().parse::<uuid::Uuid>() {
            return Ok(HostId::from_uuid(uuid));
        }
    }
    let id = HostId::generate();
    std::fs::write(&path, id.as_uuid().to_string()).with_context(|| format!("persisting host id to {}", path.display()))?;
    Ok(id)
}

fn hostname(host_id: HostId) -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("fluidsh-host-{}", host_id.as_uuid().simple()))
}

fn init_tracing(config: &FluidshConfig) {
    let filter = EnvFilter::try_new(&config.logging.filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
