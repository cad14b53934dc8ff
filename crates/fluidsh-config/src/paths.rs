//! Path utilities and XDG directory discovery.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::error::{ConfigError, ConfigResult};

/// XDG-compliant paths for Fluid.sh's own process configuration (not the
/// agent-facing YAML the web control plane owns).
pub struct Paths {
    project_dirs: Option<ProjectDirs>,
}

impl Paths {
    pub fn new() -> Self {
        Self {
            project_dirs: ProjectDirs::from("sh", "Fluid", "fluidsh"),
        }
    }

    /// `~/.config/fluidsh/`
    pub fn user_config_dir(&self) -> ConfigResult<PathBuf> {
        self.project_dirs
            .as_ref()
            .map(|p| p.config_dir().to_path_buf())
            .ok_or_else(|| ConfigError::Xdg("failed to determine user config directory".to_string()))
    }

    /// `~/.config/fluidsh/config.toml`
    pub fn user_config_file(&self) -> ConfigResult<PathBuf> {
        Ok(self.user_config_dir()?.join("config.toml"))
    }

    /// `<project_dir>/fluidsh.toml`
    pub fn project_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join("fluidsh.toml")
    }

    /// `<project_dir>/fluidsh.local.toml` — gitignored override.
    pub fn local_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join("fluidsh.local.toml")
    }

    pub fn is_initialized(project_dir: impl AsRef<Path>) -> bool {
        Self::project_config_file(project_dir).exists()
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn user_paths_mention_fluidsh() {
        let paths = Paths::new();
        if let Ok(dir) = paths.user_config_dir() {
            assert!(dir.to_string_lossy().contains("fluidsh"));
        }
    }

    #[test]
    fn project_paths_are_relative_to_project_dir() {
        let temp = tempdir().unwrap();
        let project_dir = temp.path();

        assert_eq!(
            Paths::project_config_file(project_dir),
            project_dir.join("fluidsh.toml")
        );
        assert_eq!(
            Paths::local_config_file(project_dir),
            project_dir.join("fluidsh.local.toml")
        );
        assert!(!Paths::is_initialized(project_dir));

        std::fs::write(Paths::project_config_file(project_dir), "").unwrap();
        assert!(Paths::is_initialized(project_dir));
    }
}
