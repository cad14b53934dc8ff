//! The restricted shell's blocklist (§4.4 Layer C, §6 "Restricted-shell
//! blocklist categories"): roughly 90 destructive patterns across the
//! categories enumerated in §6, rendered into the generated shell
//! script by [`crate::shell_script`].
//!
//! Per §9's open question, this blocklist is defense-in-depth and is
//! allowed to diverge from (and overlap imperfectly with) the client
//! allowlist in [`crate::allowlist`] — the allowlist remains the
//! documented contract.

/// One blocked pattern: either a bare command name, or a command
/// gated to specific first arguments that mutate state.
pub enum BlockPattern {
    Command(&'static str),
    CommandWithArgs(&'static str, &'static [&'static str]),
}

const fn cmd(name: &'static str) -> BlockPattern {
    BlockPattern::Command(name)
}

const fn cmd_args(name: &'static str, args: &'static [&'static str]) -> BlockPattern {
    BlockPattern::CommandWithArgs(name, args)
}

pub struct Category {
    pub name: &'static str,
    pub patterns: &'static [BlockPattern],
}

const PRIVILEGE_ESCALATION: &[BlockPattern] = &[cmd("sudo"), cmd("su"), cmd("doas"), cmd("pkexec")];

const FILE_MUTATION: &[BlockPattern] = &[
    cmd("rm"),
    cmd("mv"),
    cmd("cp"),
    cmd("truncate"),
    cmd("dd"),
    cmd("shred"),
    cmd("chmod"),
    cmd("chown"),
    cmd("chattr"),
    cmd("ln"),
    cmd("mkdir"),
    cmd("rmdir"),
    cmd("tee"),
    cmd("touch"),
    cmd("split"),
];

const PROCESS_CONTROL: &[BlockPattern] = &[
    cmd("kill"),
    cmd("killall"),
    cmd("pkill"),
    cmd("nice"),
    cmd("renice"),
    cmd("nohup"),
    cmd("xargs"),
];

const USER_MANAGEMENT: &[BlockPattern] = &[
    cmd("useradd"),
    cmd("userdel"),
    cmd("usermod"),
    cmd("passwd"),
    cmd("chpasswd"),
    cmd("groupadd"),
    cmd("groupdel"),
    cmd("groupmod"),
    cmd("visudo"),
];

const DISK_OPERATIONS: &[BlockPattern] = &[
    cmd("mkfs"),
    cmd("fdisk"),
    cmd("parted"),
    cmd("umount"),
    cmd("lvcreate"),
    cmd("lvremove"),
    cmd("vgcreate"),
    cmd("pvcreate"),
    cmd("wipefs"),
    cmd("mkswap"),
];

const NETWORK_TOOLS: &[BlockPattern] = &[
    cmd("iptables"),
    cmd("ip6tables"),
    cmd("nft"),
    cmd("ufw"),
    cmd("firewall-cmd"),
    cmd_args("ip", &["link", "addr", "route"]),
    cmd_args("ifconfig", &["up", "down"]),
];

const INTERPRETERS: &[BlockPattern] = &[
    cmd("bash"),
    cmd("sh"),
    cmd("zsh"),
    cmd("dash"),
    cmd("ksh"),
    cmd("python"),
    cmd("python3"),
    cmd("perl"),
    cmd("ruby"),
    cmd("node"),
    cmd("php"),
    cmd("lua"),
];

const EDITORS: &[BlockPattern] = &[
    cmd("vi"),
    cmd("vim"),
    cmd("nvim"),
    cmd("nano"),
    cmd("emacs"),
    cmd("ed"),
    cmd("pico"),
];

const BUILD_TOOLS: &[BlockPattern] = &[
    cmd("make"),
    cmd("gcc"),
    cmd("cc"),
    cmd("g++"),
    cmd("cargo"),
    cmd("go"),
    cmd("cmake"),
];

const PACKAGE_INSTALLATION: &[BlockPattern] = &[
    cmd_args("apt", &["install", "remove", "purge", "upgrade"]),
    cmd_args("apt-get", &["install", "remove", "purge", "upgrade"]),
    cmd_args("yum", &["install", "remove", "erase"]),
    cmd_args("dnf", &["install", "remove", "erase"]),
    cmd_args("dpkg", &["-i", "--install", "-r", "--remove"]),
    cmd_args("rpm", &["-i", "-U", "-e"]),
    cmd_args("pip", &["install", "uninstall"]),
    cmd_args("pip3", &["install", "uninstall"]),
    cmd("snap"),
];

const SERVICE_MUTATION: &[BlockPattern] = &[
    cmd_args(
        "systemctl",
        &["start", "stop", "restart", "reload", "enable", "disable", "mask", "kill"],
    ),
    cmd_args("service", &["start", "stop", "restart", "reload"]),
    cmd("initctl"),
];

const WRITE_TOOLS: &[BlockPattern] = &[
    cmd("tee"),
    cmd_args("sed", &["-i", "--in-place"]),
    cmd_args("perl", &["-i"]),
];

pub fn categories() -> &'static [Category] {
    &[
        Category { name: "privilege escalation", patterns: PRIVILEGE_ESCALATION },
        Category { name: "file mutation", patterns: FILE_MUTATION },
        Category { name: "process control", patterns: PROCESS_CONTROL },
        Category { name: "user management", patterns: USER_MANAGEMENT },
        Category { name: "disk operations", patterns: DISK_OPERATIONS },
        Category { name: "network tools", patterns: NETWORK_TOOLS },
        Category { name: "interpreters/shells", patterns: INTERPRETERS },
        Category { name: "editors", patterns: EDITORS },
        Category { name: "build tools", patterns: BUILD_TOOLS },
        Category { name: "package installation", patterns: PACKAGE_INSTALLATION },
        Category { name: "service mutation", patterns: SERVICE_MUTATION },
        Category { name: "write tools", patterns: WRITE_TOOLS },
    ]
}

pub fn total_pattern_count() -> usize {
    categories().iter().map(|c| c.patterns.len()).sum()
}

/// Checks a single head token + its arguments against the blocklist,
/// returning the matching category name if blocked.
pub fn check(head: &str, args: &[String]) -> Option<&'static str> {
    for category in categories() {
        for pattern in category.patterns {
            let hit = match pattern {
                BlockPattern::Command(name) => *name == head,
                BlockPattern::CommandWithArgs(name, gated_args) => {
                    *name == head && args.iter().any(|a| gated_args.contains(&a.as_str()))
                }
            };
            if hit {
                return Some(category.name);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_roughly_ninety_patterns_across_categories() {
        let count = total_pattern_count();
        assert!(count >= 70, "blocklist only has {count} patterns, expected ~90");
    }

    #[test]
    fn bare_destructive_commands_are_blocked() {
        assert_eq!(check("rm", &[]), Some("file mutation"));
        assert_eq!(check("sudo", &[]), Some("privilege escalation"));
    }

    #[test]
    fn gated_commands_only_block_their_mutating_arguments() {
        assert!(check("systemctl", &["status".to_string()]).is_none());
        assert_eq!(check("systemctl", &["restart".to_string()]), Some("service mutation"));
    }

    #[test]
    fn inspection_commands_are_not_blocked() {
        assert!(check("cat", &[]).is_none());
        assert!(check("grep", &[]).is_none());
    }
}
