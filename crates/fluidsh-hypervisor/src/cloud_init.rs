//! Cloud-init NoCloud seed generation (§4.2 step 4): a small ISO9660
//! image carrying `meta-data`/`user-data`/`network-config`, built with
//! `genisoimage` the same way every other disk operation in this crate
//! shells out to an external CLI rather than linking an ISO-writing
//! library.

use std::path::Path;

use tokio::process::Command;

use crate::error::{HypervisorError, HypervisorResult};

/// NoCloud requires the ISO9660 volume label `cidata` exactly.
const VOLUME_LABEL: &str = "cidata";

fn meta_data(instance_id: &str) -> String {
    format!("instance-id: {instance_id}\nlocal-hostname: {instance_id}\n")
}

fn user_data() -> &'static str {
    "#cloud-config\n"
}

/// Enables DHCP on every virtio NIC the clone comes up with, regardless
/// of what the kernel names it (`eth0`, `enp1s0`, ...) — matched by
/// driver rather than by interface name.
fn network_config() -> &'static str {
    "version: 2\n\
ethernets:\n\
  virtio-nics:\n\
    match:\n\
      driver: virtio_net\n\
    dhcp4: true\n\
    dhcp6: false\n"
}

/// Stages `meta-data`/`user-data`/`network-config` under `staging_dir`
/// and packs them into a NoCloud seed ISO at `iso_path`, with
/// `instance-id` set to the new sandbox's name (§4.2 step 4).
pub async fn write_seed_iso(
    staging_dir: &Path,
    instance_id: &str,
    iso_path: &Path,
) -> HypervisorResult<()> {
    tokio::fs::create_dir_all(staging_dir).await?;

    let meta_data_path = staging_dir.join("meta-data");
    let user_data_path = staging_dir.join("user-data");
    let network_config_path = staging_dir.join("network-config");

    tokio::fs::write(&meta_data_path, meta_data(instance_id)).await?;
    tokio::fs::write(&user_data_path, user_data()).await?;
    tokio::fs::write(&network_config_path, network_config()).await?;

    let output = Command::new("genisoimage")
        .args(["-output", &iso_path.to_string_lossy(), "-volid", VOLUME_LABEL, "-joliet", "-rock"])
        .arg(&user_data_path)
        .arg(&meta_data_path)
        .arg(&network_config_path)
        .output()
        .await
        .map_err(|e| HypervisorError::CommandFailed(format!("spawn genisoimage: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(HypervisorError::CommandFailed(format!(
            "genisoimage exited {:?}: {stderr}",
            output.status.code()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_data_carries_the_sandbox_name_as_instance_id() {
        let rendered = meta_data("sbx-deadbeef");
        assert!(rendered.contains("instance-id: sbx-deadbeef"));
        assert!(rendered.contains("local-hostname: sbx-deadbeef"));
    }

    #[test]
    fn network_config_enables_dhcp_on_virtio_interfaces() {
        let rendered = network_config();
        assert!(rendered.contains("driver: virtio_net"));
        assert!(rendered.contains("dhcp4: true"));
    }

    #[tokio::test]
    async fn stages_all_three_seed_files_before_packing() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("cidata");
        tokio::fs::create_dir_all(&staging).await.unwrap();
        tokio::fs::write(staging.join("meta-data"), meta_data("sbx-0001")).await.unwrap();
        tokio::fs::write(staging.join("user-data"), user_data()).await.unwrap();
        tokio::fs::write(staging.join("network-config"), network_config()).await.unwrap();

        assert!(tokio::fs::try_exists(staging.join("meta-data")).await.unwrap());
        assert!(tokio::fs::try_exists(staging.join("user-data")).await.unwrap());
        assert!(tokio::fs::try_exists(staging.join("network-config")).await.unwrap());
    }
}
