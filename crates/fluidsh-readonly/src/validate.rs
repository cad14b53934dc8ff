//! Layer A: the client allowlist (§4.4).
//!
//! Run before any network I/O. Every pipeline segment's head token
//! must be in the allowlist; gated commands must also have an allowed
//! first argument. This is the documented contract — §9 open question
//! explicitly says callers should treat the restricted shell's
//! blocklist (Layer C) as defense-in-depth, not as the contract.

use crate::allowlist;
use crate::error::{ReadonlyError, ReadonlyResult};
use crate::pipeline::{split_pipeline, tokenize};
use crate::telemetry::Telemetry;

/// Validates `command` against the client allowlist for `vm_name`,
/// recording a telemetry event on rejection.
pub fn validate_command(vm_name: &str, command: &str, telemetry: &dyn Telemetry) -> ReadonlyResult<()> {
    match validate_inner(command) {
        Ok(()) => Ok(()),
        Err(e) => {
            telemetry.record_block(vm_name, command, &e.to_string());
            Err(e)
        }
    }
}

fn validate_inner(command: &str) -> ReadonlyResult<()> {
    let segments = split_pipeline(command)?;
    if segments.is_empty() {
        return Err(ReadonlyError::EmptyCommand);
    }

    for segment in &segments {
        let tokens = tokenize(segment)?;
        let Some(head) = tokens.first() else {
            return Err(ReadonlyError::EmptyCommand);
        };

        let Some(entry) = allowlist::find(head) else {
            return Err(ReadonlyError::Blocked(format!("command {head:?} is not in the allowlist")));
        };

        if let Some(allowed_subs) = entry.allowed_subcommands {
            let permitted = tokens
                .get(1)
                .is_some_and(|arg| allowed_subs.contains(&arg.as_str()));
            if !permitted {
                return Err(ReadonlyError::Blocked(format!(
                    "{head} requires its first argument to be one of {allowed_subs:?}"
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::RecordingTelemetry;

    #[test]
    fn admits_piped_inspection_commands() {
        assert!(validate_inner("dpkg -l | grep python").is_ok());
    }

    #[test]
    fn rejects_injection_naming_the_triggering_command() {
        let err = validate_inner("cat /etc/passwd; rm -rf /").unwrap_err();
        assert!(err.to_string().contains("rm"));
    }

    #[test]
    fn rejects_systemctl_mutation_verb() {
        assert!(validate_inner("systemctl restart sshd").is_err());
        assert!(validate_inner("systemctl status sshd").is_ok());
    }

    #[test]
    fn blocked_attempts_are_recorded_to_telemetry() {
        let telemetry = RecordingTelemetry::default();
        let result = validate_command("prod-db-1", "rm -rf /", &telemetry);
        assert!(result.is_err());
        assert_eq!(telemetry.blocks().len(), 1);
        assert_eq!(telemetry.blocks()[0].0, "prod-db-1");
    }

    #[test]
    fn accepted_commands_do_not_touch_telemetry() {
        let telemetry = RecordingTelemetry::default();
        let result = validate_command("prod-db-1", "uptime", &telemetry);
        assert!(result.is_ok());
        assert!(telemetry.blocks().is_empty());
    }
}
