//! Target-name sanitization for filesystem paths (§3 invariant 6, §4.3
//! "Target-name sanitization").
//!
//! Any caller-provided name that ends up in a path component — a source
//! VM name, in particular — is passed through this before the path is
//! built, so a VM named `../../etc` or `foo; rm -rf` can't escape the
//! key directory or the sandbox working directory.

/// Replaces every character outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize_for_path(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_through_already_clean_names() {
        assert_eq!(sanitize_for_path("prod-db-1"), "prod-db-1");
        assert_eq!(sanitize_for_path("web_app_02"), "web_app_02");
    }

    #[test]
    fn replaces_path_traversal_and_shell_metacharacters() {
        assert_eq!(sanitize_for_path("../../etc/passwd"), "______etc_passwd");
        assert_eq!(sanitize_for_path("foo; rm -rf /"), "foo__rm_-rf__");
        assert_eq!(sanitize_for_path("a/b\\c"), "a_b_c");
    }

    #[test]
    fn empty_name_sanitizes_to_empty() {
        assert_eq!(sanitize_for_path(""), "");
    }
}
