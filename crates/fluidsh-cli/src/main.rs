//! Fluid.sh administrative CLI.
//!
//! Talks to a control plane over its REST boundary (§6) to create and
//! drive sandboxes, inspect registered hosts, and exercise the
//! read-only source VM surface.
//!
//! # Quick start
//!
//! ```bash
//! fluidsh sandbox create <agent-id> --base-image ubuntu-22.04
//! fluidsh sandbox list
//! fluidsh sandbox run <sandbox-id> "uname -a"
//! ```

mod client;
mod commands;
mod style;

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use style::print_error;
use uuid::Uuid;

use crate::client::ApiClient;

/// Fluid.sh - multi-host sandbox orchestration for autonomous agents.
#[derive(Parser)]
#[command(name = "fluidsh")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Control plane REST address.
    #[arg(long, env = "FLUIDSH_CP_ADDR", default_value = "http://127.0.0.1:8080", global = true)]
    server: String,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sandbox lifecycle commands.
    #[command(subcommand)]
    Sandbox(SandboxCommands),

    /// Host registry inspection commands.
    #[command(subcommand)]
    Host(HostCommands),

    /// Read-only source VM commands.
    #[command(subcommand)]
    Source(SourceCommands),

    /// Generate shell completion scripts.
    Completions {
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum SandboxCommands {
    /// Create a sandbox from a base image or a source VM.
    Create {
        /// Agent that will own this sandbox.
        agent_id: Uuid,

        /// Base image to clone (mutually exclusive with `--source-vm`).
        #[arg(long)]
        base_image: Option<String>,

        /// Source VM to clone (mutually exclusive with `--base-image`).
        #[arg(long)]
        source_vm: Option<String>,

        /// Human-readable name, defaults to `sbx-<agent-id>`.
        #[arg(long)]
        name: Option<String>,

        #[arg(long, default_value_t = 2)]
        vcpu: u32,

        #[arg(long, default_value_t = 2048)]
        memory_mb: u32,

        #[arg(long, default_value_t = 3600)]
        ttl_seconds: u64,
    },

    /// List sandboxes, optionally filtered by host.
    List {
        #[arg(long)]
        host_id: Option<Uuid>,
    },

    /// Show one sandbox's full record.
    Get { id: Uuid },

    /// Start a stopped sandbox.
    Start { id: Uuid },

    /// Stop a running sandbox.
    Stop {
        id: Uuid,

        /// Force-stop rather than requesting a graceful shutdown.
        #[arg(long)]
        force: bool,
    },

    /// Destroy a sandbox (soft-delete; idempotent).
    Destroy { id: Uuid },

    /// Run a command inside a sandbox over SSH.
    Run {
        id: Uuid,
        command: String,

        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,
    },

    /// Take a disk snapshot of a sandbox.
    Snapshot { id: Uuid, snapshot_name: String },

    /// Print a sandbox's discovered IP address.
    Ip { id: Uuid },

    /// List a sandbox's command history.
    Commands { id: Uuid },
}

#[derive(Subcommand)]
enum HostCommands {
    /// List hosts registered with the control plane.
    List,

    /// Show one host's full record.
    Get { id: Uuid },
}

#[derive(Subcommand)]
enum SourceCommands {
    /// List source VMs advertised by connected hosts.
    List,

    /// Install the restricted read-only shell on a source VM.
    Prepare { vm: String },

    /// Check whether a command passes the client allowlist without running it.
    Validate { vm: String, command: String },

    /// Run an allowlisted read-only command against a source VM.
    Run {
        vm: String,
        command: String,

        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,
    },

    /// Read a file from a source VM.
    Read {
        vm: String,
        path: String,

        /// Write the file contents here instead of stdout.
        #[arg(long)]
        out: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .init();

    let cli = Cli::parse();
    style::set_no_color(cli.no_color || !console::colors_enabled());

    if let Commands::Completions { shell } = cli.command {
        commands::completions::run(shell);
        return Ok(());
    }

    let client = ApiClient::new(cli.server);

    let result = match cli.command {
        Commands::Sandbox(cmd) => run_sandbox(&client, cmd).await,
        Commands::Host(cmd) => run_host(&client, cmd).await,
        Commands::Source(cmd) => run_source(&client, cmd).await,
        Commands::Completions { .. } => unreachable!("handled above"),
    };

    if let Err(err) = &result {
        print_error(&format!("{err:#}"));
    }
    result
}

async fn run_sandbox(client: &ApiClient, cmd: SandboxCommands) -> Result<()> {
    match cmd {
        SandboxCommands::Create {
            agent_id,
            base_image,
            source_vm,
            name,
            vcpu,
            memory_mb,
            ttl_seconds,
        } => commands::sandbox::create(client, agent_id, base_image, source_vm, name, vcpu, memory_mb, ttl_seconds).await,
        SandboxCommands::List { host_id } => commands::sandbox::list(client, host_id).await,
        SandboxCommands::Get { id } => commands::sandbox::get(client, id).await,
        SandboxCommands::Start { id } => commands::sandbox::start(client, id).await,
        SandboxCommands::Stop { id, force } => commands::sandbox::stop(client, id, force).await,
        SandboxCommands::Destroy { id } => commands::sandbox::destroy(client, id).await,
        SandboxCommands::Run { id, command, timeout_secs } => commands::sandbox::run(client, id, command, timeout_secs).await,
        SandboxCommands::Snapshot { id, snapshot_name } => commands::sandbox::snapshot(client, id, snapshot_name).await,
        SandboxCommands::Ip { id } => commands::sandbox::ip(client, id).await,
        SandboxCommands::Commands { id } => commands::sandbox::commands(client, id).await,
    }
}

async fn run_host(client: &ApiClient, cmd: HostCommands) -> Result<()> {
    match cmd {
        HostCommands::List => commands::host::list(client).await,
        HostCommands::Get { id } => commands::host::get(client, id).await,
    }
}

async fn run_source(client: &ApiClient, cmd: SourceCommands) -> Result<()> {
    match cmd {
        SourceCommands::List => commands::source::list(client).await,
        SourceCommands::Prepare { vm } => commands::source::prepare(client, vm).await,
        SourceCommands::Validate { vm, command } => commands::source::validate(client, vm, command).await,
        SourceCommands::Run { vm, command, timeout_secs } => commands::source::run(client, vm, command, timeout_secs).await,
        SourceCommands::Read { vm, path, out } => commands::source::read(client, vm, path, out).await,
    }
}
