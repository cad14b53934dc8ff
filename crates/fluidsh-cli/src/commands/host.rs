//! `fluidsh host ...` — inspect hosts registered with the control plane.

use anyhow::Result;
use fluidsh::Client;
use fluidsh_types::HostId;
use uuid::Uuid;

use crate::style::{print_hosts_table, SemanticStyle};

pub async fn list(client: &Client) -> Result<()> {
    let hosts = client.list_hosts().await?;
    if hosts.is_empty() {
        println!("{}", "no hosts registered".muted());
        return Ok(());
    }
    print_hosts_table(&hosts);
    Ok(())
}

pub async fn get(client: &Client, id: Uuid) -> Result<()> {
    let host = client.get_host(HostId::from_uuid(id)).await?;
    print_hosts_table(std::slice::from_ref(&host));
    println!();
    println!("{}", "advertised images:".header());
    for image in &host.advertised_images {
        println!("  {image}");
    }
    println!("{}", "source vms:".header());
    for vm in &host.source_vms {
        println!("  {vm}");
    }
    Ok(())
}
