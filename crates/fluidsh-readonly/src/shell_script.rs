//! Generates the restricted login shell installed for the
//! `fluid-readonly` user (§4.4 Layer C).
//!
//! The script is plain POSIX `sh` so it runs unmodified on any source
//! VM regardless of which interpreters happen to be installed (the
//! blocklist below forbids most of them as a login shell anyway). It
//! re-implements the same quote-state scan as [`crate::pipeline`] and
//! the same blocklist as [`crate::blocklist`] in shell, since it has
//! to run independently on the remote VM with no Rust runtime.

use crate::blocklist::{categories, BlockPattern};

pub const INSTALL_PATH: &str = "/usr/local/libexec/fluidsh-readonly-shell";

/// Renders the complete script text, with the blocklist baked in from
/// [`crate::blocklist::categories`] so the two never drift apart.
pub fn render() -> String {
    let mut case_arms = String::new();
    for category in categories() {
        for pattern in category.patterns {
            match pattern {
                BlockPattern::Command(name) => {
                    case_arms.push_str(&format!(
                        "        {name})\n            block \"{cat}: {name}\"\n            ;;\n",
                        name = shell_quote(name),
                        cat = category.name,
                    ));
                }
                BlockPattern::CommandWithArgs(name, args) => {
                    let pattern_list = args.iter().map(|a| shell_quote(a)).collect::<Vec<_>>().join("|");
                    case_arms.push_str(&format!(
                        "        {name})\n            case \"$2\" in\n                {pattern_list})\n                    block \"{cat}: {name} $2\"\n                    ;;\n            esac\n            ;;\n",
                        name = shell_quote(name),
                        cat = category.name,
                    ));
                }
            }
        }
    }

    format!(
        r#"#!/bin/sh
# Installed by Fluid.sh Prepare() as the login shell for fluid-readonly.
# Do not edit by hand; re-run Prepare to regenerate.

block() {{
    echo "fluid-readonly: blocked: $1" >&2
    exit 126
}}

if [ -z "$SSH_ORIGINAL_COMMAND" ]; then
    echo "fluid-readonly: interactive login is not permitted" >&2
    exit 126
fi

cmd="$SSH_ORIGINAL_COMMAND"

case "$cmd" in
    *'`'*) block "command substitution (backtick)" ;;
    *'$('*) block "command substitution \$(...)" ;;
    *'<('*) block "process substitution <(...)" ;;
    *'>('*) block "process substitution >(...)" ;;
esac

case "$cmd" in
    *'
'*) block "raw newline" ;;
esac

# Segment on the same four separators Layer A splits on, then check
# every segment's head (and, for gated patterns, its second word)
# against the blocklist below.
IFS_SAVE="$IFS"
segments=$(printf '%s' "$cmd" | sed 's/&&/;/g; s/||/;/g; s/|/;/g')
IFS=';'
for segment in $segments; do
    set -- $segment
    head="$1"
    case "$segment" in
        *'>'*)
            case "$segment" in
                *'>('*) ;;
                *) block "redirection" ;;
            esac
            ;;
    esac

    case "$head" in
{case_arms}        *) : ;;
    esac
done
IFS="$IFS_SAVE"

exec $cmd
"#,
        case_arms = case_arms,
    )
}

fn shell_quote(s: &str) -> String {
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_script_refuses_interactive_login() {
        let script = render();
        assert!(script.contains("SSH_ORIGINAL_COMMAND"));
        assert!(script.contains("exit 126"));
    }

    #[test]
    fn rendered_script_embeds_every_blocklist_category() {
        let script = render();
        for category in categories() {
            assert!(
                script.contains(category.name),
                "script missing blocklist category {}",
                category.name
            );
        }
    }

    #[test]
    fn rendered_script_is_a_valid_shebang_script() {
        let script = render();
        assert!(script.starts_with("#!/bin/sh"));
    }
}
