//! TTL janitor (§4.2 "TTL janitor"): reaps sandboxes whose
//! `CreatedAt + max(TTL, defaultTTL)` has passed. Runs once immediately
//! at startup, then on a fixed interval for the life of the daemon.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::interval;
use tracing::{error, info, instrument, warn};

use crate::error::SandboxResult;
use crate::manager::SandboxManager;

/// Spawns the janitor as a background task and returns its handle, so
/// the host daemon can hold it and abort it on shutdown.
pub fn spawn(
    manager: Arc<SandboxManager>,
    default_ttl_seconds: u64,
    sweep_interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(sweep_interval);
        // The first tick fires immediately; §4.2 wants an immediate
        // sweep at startup before settling into the interval.
        loop {
            ticker.tick().await;
            if let Err(err) = sweep(&manager, default_ttl_seconds).await {
                error!(error = %err, "janitor sweep failed to list sandboxes");
            }
        }
    })
}

#[instrument(skip(manager))]
async fn sweep(manager: &SandboxManager, default_ttl_seconds: u64) -> SandboxResult<()> {
    let now = Utc::now();
    let sandboxes = manager.store().list_active_sandboxes(None).await?;

    let expired: Vec<_> = sandboxes
        .into_iter()
        .filter(|s| s.is_expired(default_ttl_seconds, now))
        .collect();

    if expired.is_empty() {
        return Ok(());
    }
    info!(count = expired.len(), "janitor reaping expired sandboxes");

    for sandbox in expired {
        if let Err(err) = manager.destroy(sandbox.id).await {
            warn!(id = %sandbox.id, error = %err, "janitor failed to destroy expired sandbox, will retry next sweep");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluidsh_types::{AgentId, HostId, Sandbox, SandboxId};

    fn expired_sandbox() -> Sandbox {
        Sandbox::new(
            SandboxId::generate(),
            HostId::generate(),
            AgentId::generate(),
            "ubuntu-22.04",
            None,
            "52:54:00:aa:bb:cc",
            "tap-sbx0",
            2,
            2048,
            1,
            Utc::now() - chrono::Duration::seconds(1000),
        )
    }

    #[test]
    fn filters_only_expired_sandboxes_given_default_ttl() {
        let now = Utc::now();
        let sbx = expired_sandbox();
        assert!(sbx.is_expired(60, now));

        let fresh = Sandbox::new(
            SandboxId::generate(),
            HostId::generate(),
            AgentId::generate(),
            "ubuntu-22.04",
            None,
            "52:54:00:aa:bb:cc",
            "tap-sbx1",
            2,
            2048,
            3600,
            now,
        );
        assert!(!fresh.is_expired(60, now));
    }
}
