//! The client allowlist (§4.4 Layer A, §6 "allowlist categories"):
//! roughly 70 inspection commands, some gated on their first argument.

/// One allowed command, optionally restricted to a closed set of
/// first-argument subcommands (§6 "subcommand gating").
pub struct AllowlistEntry {
    pub command: &'static str,
    pub allowed_subcommands: Option<&'static [&'static str]>,
}

const fn entry(command: &'static str) -> AllowlistEntry {
    AllowlistEntry {
        command,
        allowed_subcommands: None,
    }
}

const fn gated(command: &'static str, subcommands: &'static [&'static str]) -> AllowlistEntry {
    AllowlistEntry {
        command,
        allowed_subcommands: Some(subcommands),
    }
}

/// File inspection.
const FILE_INSPECTION: &[AllowlistEntry] = &[
    entry("cat"),
    entry("head"),
    entry("tail"),
    entry("less"),
    entry("more"),
    entry("file"),
    entry("stat"),
    entry("wc"),
    entry("find"),
    entry("readlink"),
    entry("realpath"),
    entry("basename"),
    entry("dirname"),
    entry("diff"),
    entry("md5sum"),
    entry("sha1sum"),
    entry("sha256sum"),
    entry("ls"),
    entry("tree"),
];

/// Process / system info.
const PROCESS_INFO: &[AllowlistEntry] = &[
    entry("ps"),
    entry("top"),
    entry("htop"),
    entry("pgrep"),
    entry("pstree"),
    entry("uptime"),
    entry("nproc"),
    entry("vmstat"),
    entry("iostat"),
    entry("lsof"),
];

/// Network info.
const NETWORK_INFO: &[AllowlistEntry] = &[
    entry("ip"),
    entry("ifconfig"),
    entry("netstat"),
    entry("ss"),
    entry("ping"),
    entry("traceroute"),
    entry("dig"),
    entry("nslookup"),
    entry("host"),
    entry("arp"),
];

/// Disk info.
const DISK_INFO: &[AllowlistEntry] = &[
    entry("df"),
    entry("du"),
    entry("lsblk"),
    entry("blkid"),
    entry("mount"),
    entry("free"),
];

/// Package queries — gated so only read verbs are reachable.
const PACKAGE_QUERIES: &[AllowlistEntry] = &[
    gated("dpkg", &["-l", "-L", "-s", "--status", "--listfiles", "--list"]),
    gated("rpm", &["-q", "-qa", "-qi", "-ql", "-qf"]),
    gated("apt", &["list", "search", "show", "policy"]),
    gated("apt-cache", &["show", "policy", "search", "depends"]),
    gated("pip", &["list", "show", "freeze", "check"]),
    gated("pip3", &["list", "show", "freeze", "check"]),
    gated("yum", &["list", "info", "search"]),
    gated("dnf", &["list", "info", "search"]),
];

/// System info.
const SYSTEM_INFO: &[AllowlistEntry] = &[
    entry("uname"),
    entry("hostnamectl"),
    entry("lsb_release"),
    entry("lscpu"),
    entry("dmesg"),
    entry("hostname"),
    gated("systemctl", &[
        "status",
        "show",
        "list-units",
        "list-unit-files",
        "is-active",
        "is-enabled",
        "is-failed",
        "cat",
    ]),
];

/// User info.
const USER_INFO: &[AllowlistEntry] = &[
    entry("whoami"),
    entry("id"),
    entry("groups"),
    entry("who"),
    entry("last"),
    entry("w"),
];

/// Miscellaneous.
const MISCELLANEOUS: &[AllowlistEntry] = &[
    entry("echo"),
    entry("printf"),
    entry("date"),
    entry("env"),
    entry("printenv"),
    entry("which"),
    entry("type"),
];

/// Commands permitted only as the receiving end of a pipe (§6 "pipe
/// targets") — text filters with no side effects of their own.
const PIPE_TARGETS: &[AllowlistEntry] = &[
    entry("grep"),
    entry("egrep"),
    entry("fgrep"),
    entry("awk"),
    entry("sort"),
    entry("uniq"),
    entry("cut"),
    entry("tr"),
    entry("column"),
    entry("jq"),
];

/// All allowlisted commands, in the order their category appears in
/// §6. Roughly 70 entries, per spec's "~70 inspection commands".
pub fn allowlist() -> impl Iterator<Item = &'static AllowlistEntry> {
    FILE_INSPECTION
        .iter()
        .chain(PROCESS_INFO)
        .chain(NETWORK_INFO)
        .chain(DISK_INFO)
        .chain(PACKAGE_QUERIES)
        .chain(SYSTEM_INFO)
        .chain(USER_INFO)
        .chain(MISCELLANEOUS)
        .chain(PIPE_TARGETS)
}

pub fn find(command: &str) -> Option<&'static AllowlistEntry> {
    allowlist().find(|e| e.command == command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowlist_has_no_duplicate_commands() {
        let mut seen = std::collections::HashSet::new();
        for e in allowlist() {
            assert!(seen.insert(e.command), "duplicate allowlist entry: {}", e.command);
        }
    }

    #[test]
    fn allowlist_covers_roughly_seventy_commands() {
        let count = allowlist().count();
        assert!(count >= 60, "allowlist only has {count} commands, expected ~70");
    }

    #[test]
    fn systemctl_is_gated_to_read_verbs() {
        let entry = find("systemctl").unwrap();
        let subs = entry.allowed_subcommands.unwrap();
        assert!(subs.contains(&"status"));
        assert!(!subs.contains(&"restart"));
        assert!(!subs.contains(&"stop"));
    }

    #[test]
    fn rm_is_not_in_the_allowlist() {
        assert!(find("rm").is_none());
    }
}
