//! Minimal, targeted rewriting of a libvirt domain definition (§4.2
//! step 5). Domain XML is treated as text, not parsed into a DOM —
//! the rewrites are narrow, line-oriented substitutions, which keeps
//! this dependency-free and matches how `virsh` itself is driven
//! elsewhere in this crate (shell text in, shell text out).

use crate::error::{HypervisorError, HypervisorResult};

/// The edits applied to a source domain's dumped XML to produce a
/// clone's domain definition.
pub struct DomainRewrite<'a> {
    pub new_name: &'a str,
    pub overlay_path: &'a str,
    pub new_mac: &'a str,
    pub cloud_init_iso_path: &'a str,
}

/// Rewrites a dumped domain XML per §4.2 step 5: replace the `<name>`,
/// drop the `<uuid>` element (libvirt assigns a fresh one), point the
/// primary disk source at the overlay, replace the network interface
/// MAC, attach the cloud-init seed as a CDROM, and strip `<address>`
/// elements so libvirt reassigns bus addresses instead of colliding
/// with the source's.
pub fn rewrite_domain_xml(source_xml: &str, edit: &DomainRewrite<'_>) -> HypervisorResult<String> {
    if !source_xml.contains("<disk") {
        return Err(HypervisorError::MalformedDomainXml(edit.new_name.to_string()));
    }

    let mut xml = source_xml.to_string();

    xml = replace_element_body(&xml, "name", edit.new_name);
    xml = strip_element(&xml, "uuid");
    xml = strip_all_elements(&xml, "address");
    xml = rewrite_first_disk_source(&xml, edit.overlay_path)?;
    xml = rewrite_interface_mac(&xml, edit.new_mac);
    xml = append_cdrom(&xml, edit.cloud_init_iso_path);

    Ok(xml)
}

fn replace_element_body(xml: &str, tag: &str, new_body: &str) -> String {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    match (xml.find(&open), xml.find(&close)) {
        (Some(start), Some(end)) if start < end => {
            let mut out = String::with_capacity(xml.len());
            out.push_str(&xml[..start + open.len()]);
            out.push_str(new_body);
            out.push_str(&xml[end..]);
            out
        }
        _ => xml.to_string(),
    }
}

fn strip_element(xml: &str, tag: &str) -> String {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    match (xml.find(&open), xml.find(&close)) {
        (Some(start), Some(end)) if start < end => {
            let mut out = String::with_capacity(xml.len());
            out.push_str(&xml[..start]);
            out.push_str(&xml[end + close.len()..]);
            out
        }
        _ => xml.to_string(),
    }
}

fn strip_all_elements(xml: &str, tag: &str) -> String {
    let mut out = xml.to_string();
    let self_closed = format!("<{tag} ");
    while let Some(start) = out.find(&self_closed) {
        if let Some(rel_end) = out[start..].find("/>") {
            out.replace_range(start..start + rel_end + 2, "");
        } else {
            break;
        }
    }
    out
}

fn rewrite_first_disk_source(xml: &str, overlay_path: &str) -> HypervisorResult<String> {
    let disk_start = xml.find("<disk").ok_or(HypervisorError::MalformedDomainXml(
        "missing <disk> element".to_string(),
    ))?;
    let disk_end = xml[disk_start..]
        .find("</disk>")
        .map(|offset| disk_start + offset)
        .ok_or(HypervisorError::MalformedDomainXml(
            "unterminated <disk> element".to_string(),
        ))?;
    let disk_block = &xml[disk_start..disk_end];

    let source_tag_start = disk_block
        .find("<source")
        .ok_or(HypervisorError::MalformedDomainXml(
            "disk has no <source> element".to_string(),
        ))?;
    let source_tag_end = disk_block[source_tag_start..]
        .find('>')
        .map(|offset| source_tag_start + offset + 1)
        .ok_or(HypervisorError::MalformedDomainXml(
            "unterminated <source> element".to_string(),
        ))?;

    let rewritten_source = format!("<source file='{overlay_path}'/>");
    let mut new_disk_block = String::with_capacity(disk_block.len());
    new_disk_block.push_str(&disk_block[..source_tag_start]);
    new_disk_block.push_str(&rewritten_source);
    new_disk_block.push_str(&disk_block[source_tag_end..]);

    let mut out = String::with_capacity(xml.len());
    out.push_str(&xml[..disk_start]);
    out.push_str(&new_disk_block);
    out.push_str(&xml[disk_end..]);
    Ok(out)
}

fn rewrite_interface_mac(xml: &str, new_mac: &str) -> String {
    let Some(mac_start) = xml.find("<mac address='") else {
        return xml.to_string();
    };
    let value_start = mac_start + "<mac address='".len();
    let Some(value_end) = xml[value_start..].find('\'').map(|o| value_start + o) else {
        return xml.to_string();
    };
    let mut out = String::with_capacity(xml.len());
    out.push_str(&xml[..value_start]);
    out.push_str(new_mac);
    out.push_str(&xml[value_end..]);
    out
}

fn append_cdrom(xml: &str, iso_path: &str) -> String {
    let cdrom = format!(
        "<disk type='file' device='cdrom'><driver name='qemu' type='raw'/>\
<source file='{iso_path}'/><target dev='sdz' bus='sata'/><readonly/></disk>"
    );
    match xml.find("</devices>") {
        Some(idx) => {
            let mut out = String::with_capacity(xml.len() + cdrom.len());
            out.push_str(&xml[..idx]);
            out.push_str(&cdrom);
            out.push_str(&xml[idx..]);
            out
        }
        None => xml.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "<domain type='kvm'><name>source-vm</name><uuid>abc-123</uuid>\
<devices><disk type='file' device='disk'><driver name='qemu' type='qcow2'/>\
<source file='/var/lib/libvirt/images/source.qcow2'/><target dev='vda' bus='virtio'/>\
<address type='pci' domain='0x0000'/></disk>\
<interface type='bridge'><mac address='de:ad:be:ef:00:01'/>\
<source bridge='br0'/><address type='pci' domain='0x0000'/></interface>\
</devices></domain>";

    #[test]
    fn rewrite_replaces_name_drops_uuid_and_addresses() {
        let edit = DomainRewrite {
            new_name: "sbx-0001",
            overlay_path: "/var/lib/fluidsh/sandboxes/sbx-0001/overlay.qcow2",
            new_mac: "52:54:00:11:22:33",
            cloud_init_iso_path: "/var/lib/fluidsh/sandboxes/sbx-0001/seed.iso",
        };

        let rewritten = rewrite_domain_xml(SAMPLE, &edit).unwrap();

        assert!(rewritten.contains("<name>sbx-0001</name>"));
        assert!(!rewritten.contains("<uuid>"));
        assert!(!rewritten.contains("<address"));
        assert!(rewritten.contains("sbx-0001/overlay.qcow2"));
        assert!(rewritten.contains("52:54:00:11:22:33"));
        assert!(rewritten.contains("seed.iso"));
        assert!(!rewritten.contains("source.qcow2"));
    }

    #[test]
    fn rewrite_rejects_xml_with_no_disk_element() {
        let edit = DomainRewrite {
            new_name: "sbx-0001",
            overlay_path: "/tmp/overlay.qcow2",
            new_mac: "52:54:00:11:22:33",
            cloud_init_iso_path: "/tmp/seed.iso",
        };
        let err = rewrite_domain_xml("<domain></domain>", &edit).unwrap_err();
        assert!(matches!(err, HypervisorError::MalformedDomainXml(_)));
    }
}
