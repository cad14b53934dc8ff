//! `fluidsh sandbox ...` — create, inspect, and drive the lifecycle of
//! sandboxes through the control plane's REST surface.

use anyhow::Result;
use fluidsh::{Client, CreateSandboxRequest};
use fluidsh_types::{AgentId, SandboxId};
use uuid::Uuid;

use crate::style::{self, print_commands_table, print_sandbox_detail, print_sandboxes_table, print_success, SemanticStyle};

#[allow(clippy::too_many_arguments)]
pub async fn create(
    client: &Client,
    agent_id: Uuid,
    base_image: Option<String>,
    source_vm: Option<String>,
    name: Option<String>,
    vcpu: u32,
    memory_mb: u32,
    ttl_seconds: u64,
) -> Result<()> {
    let mut req = CreateSandboxRequest::new(AgentId::from_uuid(agent_id)).vcpu(vcpu).memory_mb(memory_mb).ttl_seconds(ttl_seconds);
    if let Some(image) = base_image {
        req = req.base_image(image);
    }
    if let Some(vm) = source_vm {
        req = req.source_vm(vm);
    }
    if let Some(name) = name {
        req = req.name(name);
    }

    let pb = style::create_spinner("placing sandbox on a host...");
    match client.create_sandbox(req).await {
        Ok(sandbox) => {
            style::finish_success(&pb, &format!("sandbox {} is running", sandbox.id.to_string().info()));
            print_sandbox_detail(&sandbox);
        }
        Err(err) => {
            style::finish_error(&pb, "placement failed");
            return Err(err.into());
        }
    }
    Ok(())
}

pub async fn list(client: &Client, host_id: Option<Uuid>) -> Result<()> {
    let sandboxes = client.list_sandboxes(host_id.map(fluidsh_types::HostId::from_uuid)).await?;
    if sandboxes.is_empty() {
        println!("{}", "no sandboxes".muted());
        return Ok(());
    }
    print_sandboxes_table(&sandboxes);
    Ok(())
}

pub async fn get(client: &Client, id: Uuid) -> Result<()> {
    let sandbox = client.get_sandbox(SandboxId::from_uuid(id)).await?;
    print_sandbox_detail(&sandbox);
    Ok(())
}

pub async fn start(client: &Client, id: Uuid) -> Result<()> {
    let sandbox = client.start_sandbox(SandboxId::from_uuid(id)).await?;
    print_success(&format!("sandbox {} started", sandbox.id));
    Ok(())
}

pub async fn stop(client: &Client, id: Uuid, force: bool) -> Result<()> {
    let sandbox = client.stop_sandbox(SandboxId::from_uuid(id), force).await?;
    print_success(&format!("sandbox {} stopped", sandbox.id));
    Ok(())
}

pub async fn destroy(client: &Client, id: Uuid) -> Result<()> {
    client.destroy_sandbox(SandboxId::from_uuid(id)).await?;
    print_success(&format!("sandbox {id} destroyed"));
    Ok(())
}

pub async fn run(client: &Client, id: Uuid, command: String, timeout_secs: u64) -> Result<()> {
    let pb = style::create_spinner("running command...");
    match client.run_command(SandboxId::from_uuid(id), command, timeout_secs).await {
        Ok(record) => {
            if record.is_transport_failure() {
                style::finish_error(&pb, "transport failure talking to the sandbox");
            } else {
                style::finish_success(&pb, &format!("exit code {}", record.exit_code));
            }
            if !record.stdout.is_empty() {
                println!("{}", record.stdout);
            }
            if !record.stderr.is_empty() {
                eprintln!("{}", record.stderr.warning());
            }
        }
        Err(err) => {
            style::finish_error(&pb, "command did not complete");
            return Err(err.into());
        }
    }
    Ok(())
}

pub async fn snapshot(client: &Client, id: Uuid, snapshot_name: String) -> Result<()> {
    let name = client.snapshot_sandbox(SandboxId::from_uuid(id), snapshot_name).await?;
    print_success(&format!("snapshot {name} created"));
    Ok(())
}

pub async fn ip(client: &Client, id: Uuid) -> Result<()> {
    let ip = client.get_ip(SandboxId::from_uuid(id)).await?;
    println!("{ip}");
    Ok(())
}

pub async fn commands(client: &Client, id: Uuid) -> Result<()> {
    let records = client.list_commands(SandboxId::from_uuid(id)).await?;
    if records.is_empty() {
        println!("{}", "no commands recorded".muted());
        return Ok(());
    }
    print_commands_table(&records);
    Ok(())
}
