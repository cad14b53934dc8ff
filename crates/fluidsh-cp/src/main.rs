//! Control plane binary: the host-facing stream listener and the
//! client-facing REST server, both backed by one [`Registry`] and one
//! [`StateStore`] (§2 "Control Plane (CP) — a single logical
//! service").

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use fluidsh_config::{ConfigLoader, FluidshConfig};
use fluidsh_cp::{http, Orchestrator, OrchestratorTimeouts};
use fluidsh_registry::Registry;
use fluidsh_store::{InMemoryStore, StateStore};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fluidsh-cp")]
#[command(author, version, about = "Fluid.sh control plane", long_about = None)]
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

    let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
    let registry = Arc::new(Registry::new(store.clone()));

    let timeouts = OrchestratorTimeouts {
        create: Duration::from_secs(config.host.create_timeout_secs),
        lifecycle: Duration::from_secs(config.host.lifecycle_timeout_secs),
        run_command_transport_slack: Duration::from_secs(config.host.run_command_transport_slack_secs),
        generic: Duration::from_secs(config.stream.send_and_wait_timeout_secs),
    };
    let orchestrator = Arc::new(Orchestrator::new(registry.clone(), store, timeouts));

    let stream_listener = TcpListener::bind(&config.stream.bind_address)
        .await
        .with_context(|| format!("binding host stream listener on {}", config.stream.bind_address))?;
    info!(addr = %config.stream.bind_address, "listening for host connections");
    let stream_task = tokio::spawn(accept_hosts(stream_listener, registry));

    let rest_listener = TcpListener::bind(&config.rest.bind_address)
        .await
        .with_context(|| format!("binding REST listener on {}", config.rest.bind_address))?;
    info!(addr = %config.rest.bind_address, "listening for REST clients");
    let app = http::router(orchestrator);

    tokio::select! {
        result = axum::serve(rest_listener, app) => {
            result.context("REST server exited")?;
        }
        result = stream_task => {
            result.context("host stream acceptor task panicked")?;
        }
    }

    Ok(())
}

/// Accepts host connections forever, handing each one to
/// [`Registry::accept_host`] on its own task so a slow or malicious
/// registration on one connection never blocks the listener (§4.1
/// "Registration protocol").
async fn accept_hosts(listener: TcpListener, registry: Arc<Registry>) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await.context("accepting host connection")?;
        stream.set_nodelay(true).ok();
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(err) = registry.accept_host(stream).await {
                warn!(%peer, error = %err, "host registration failed");
            }
        });
    }
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
