//! `fluidsh source ...` — the read-only source VM surface: list what's
//! advertised, prepare a VM for inspection, and run allowlisted
//! read-only commands against it (§4.4).

use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;

use fluidsh::Client;

use crate::style::{self, print_success, SemanticStyle};

pub async fn list(client: &ApiClient) -> Result<()> {
    let vms = client.list_vms().await?;
    if vms.is_empty() {
        println!("{}", "no source vms advertised by any connected host".muted());
        return Ok(());
    }
    for vm in vms {
        println!("{vm}");
    }
    Ok(())
}

pub async fn prepare(client: &ApiClient, vm: String) -> Result<()> {
    let pb = style::create_spinner(&format!("preparing {vm}..."));
    match client.prepare_source_vm(&vm).await {
        Ok(source_vm) => {
            style::finish_success(&pb, &format!("{vm} prepared"));
            if let Some(ip) = &source_vm.ip {
                println!("  ip: {ip}");
            }
        }
        Err(err) => {
            style::finish_error(&pb, "prepare failed");
            return Err(err);
        }
    }
    Ok(())
}

pub async fn validate(client: &ApiClient, vm: String, command: String) -> Result<()> {
    client.validate_source_command(&vm, command).await?;
    print_success("command is allowed");
    Ok(())
}

pub async fn run(client: &ApiClient, vm: String, command: String, timeout_secs: u64) -> Result<()> {
    let pb = style::create_spinner("running read-only command...");
    match client.run_source_command(&vm, command, timeout_secs).await {
        Ok(outcome) => {
            style::finish_success(&pb, &format!("exit code {}", outcome.exit_code));
            if !outcome.stdout.is_empty() {
                println!("{}", outcome.stdout);
            }
            if !outcome.stderr.is_empty() {
                eprintln!("{}", outcome.stderr.warning());
            }
        }
        Err(err) => {
            style::finish_error(&pb, "command did not complete");
            return Err(err);
        }
    }
    Ok(())
}

pub async fn read(client: &ApiClient, vm: String, path: String, out: Option<PathBuf>) -> Result<()> {
    let contents = client.read_source_file(&vm, &path).await?;
    match out {
        Some(out_path) => {
            std::fs::write(&out_path, &contents)?;
            print_success(&format!("wrote {} bytes to {}", contents.len(), out_path.display()));
        }
        None => {
            std::io::stdout().write_all(&contents)?;
        }
    }
    Ok(())
}
