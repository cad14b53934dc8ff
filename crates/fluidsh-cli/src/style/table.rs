//! Table formatting using comfy-table.

use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};
use fluidsh_types::{CommandRecord, HostRecord, Sandbox};

fn new_table(columns: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = columns
        .iter()
        .map(|col| {
            if super::no_color() {
                Cell::new(col)
            } else {
                Cell::new(col).add_attribute(Attribute::Bold).fg(Color::Cyan)
            }
        })
        .collect();
    table.set_header(header_cells);
    table
}

pub fn print_sandboxes_table(sandboxes: &[Sandbox]) {
    let mut table = new_table(&["ID", "STATE", "HOST", "IMAGE", "IP", "VCPU", "MEM"]);
    for sbx in sandboxes {
        table.add_row(vec![
            sbx.id.to_string(),
            format!("{:?}", sbx.state),
            sbx.host_id.to_string(),
            sbx.source_vm.clone().unwrap_or_else(|| sbx.base_image.clone()),
            sbx.ip.clone().unwrap_or_else(|| "-".to_string()),
            sbx.vcpu.to_string(),
            format!("{}MB", sbx.memory_mb),
        ]);
    }
    println!("{table}");
}

pub fn print_sandbox_detail(sbx: &Sandbox) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let rows: &[(&str, String)] = &[
        ("ID", sbx.id.to_string()),
        ("Host", sbx.host_id.to_string()),
        ("Agent", sbx.agent_id.to_string()),
        ("State", format!("{:?}", sbx.state)),
        ("Base image", sbx.base_image.clone()),
        ("Source VM", sbx.source_vm.clone().unwrap_or_else(|| "-".to_string())),
        ("IP", sbx.ip.clone().unwrap_or_else(|| "-".to_string())),
        ("MAC", sbx.mac.clone()),
        ("Tap device", sbx.tap_name.clone()),
        ("vCPU", sbx.vcpu.to_string()),
        ("Memory", format!("{}MB", sbx.memory_mb)),
        ("TTL", format!("{}s", sbx.ttl_seconds)),
        ("Created", sbx.created_at.to_rfc3339()),
        ("Updated", sbx.updated_at.to_rfc3339()),
    ];
    for (key, value) in rows {
        let key_cell = if super::no_color() { Cell::new(key) } else { Cell::new(key).fg(Color::DarkGrey) };
        table.add_row(vec![key_cell, Cell::new(value)]);
    }
    println!("{table}");
}

pub fn print_hosts_table(hosts: &[HostRecord]) {
    let now = chrono::Utc::now();
    let mut table = new_table(&["ID", "HOSTNAME", "VERSION", "CONNECTED", "HEALTH", "CPU", "MEM", "SANDBOXES"]);
    for host in hosts {
        let health = if host.connected { format!("{:?}", host.health(now)) } else { "-".to_string() };
        table.add_row(vec![
            host.id.to_string(),
            host.hostname.clone(),
            host.version.clone(),
            host.connected.to_string(),
            health,
            host.resources.available_cpus.to_string(),
            format!("{}MB", host.resources.available_memory_mb),
            host.resources.active_sandboxes.to_string(),
        ]);
    }
    println!("{table}");
}

pub fn print_commands_table(commands: &[CommandRecord]) {
    let mut table = new_table(&["ID", "COMMAND", "EXIT", "DURATION", "STARTED"]);
    for cmd in commands {
        table.add_row(vec![
            cmd.id.to_string(),
            cmd.command.clone(),
            cmd.exit_code.to_string(),
            format!("{}ms", cmd.duration_ms),
            cmd.started_at.to_rfc3339(),
        ]);
    }
    println!("{table}");
}
