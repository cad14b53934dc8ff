//! Configuration loader with multi-source merging.
//!
//! Precedence, lowest to highest: built-in defaults, user config
//! (`~/.config/fluidsh/config.toml`), project config (`fluidsh.toml`),
//! local override (`fluidsh.local.toml`, gitignored), `FLUIDSH_*`
//! environment variables.

use std::env;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, ConfigResult};
use crate::paths::Paths;
use crate::settings::FluidshConfig;

pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "FLUIDSH".to_string(),
        }
    }

    #[must_use]
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    #[must_use]
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn load(self) -> ConfigResult<FluidshConfig> {
        let mut builder = config::Config::builder();

        let defaults = FluidshConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        let paths = Paths::new();
        if let Ok(user_config_file) = paths.user_config_file() {
            if user_config_file.exists() {
                builder = builder.add_source(
                    config::File::from(user_config_file)
                        .required(false)
                        .format(config::FileFormat::Toml),
                );
            }
        }

        let project_config_file = Paths::project_config_file(&self.project_dir);
        if project_config_file.exists() {
            builder = builder.add_source(
                config::File::from(project_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        let local_config_file = Paths::local_config_file(&self.project_dir);
        if local_config_file.exists() {
            builder = builder.add_source(
                config::File::from(local_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .separator("_")
                .try_parsing(true),
        );

        let built = builder.build().map_err(ConfigError::Build)?;
        let fluidsh_config: FluidshConfig =
            built.try_deserialize().map_err(ConfigError::Build)?;

        Ok(fluidsh_config)
    }

    pub fn load_or_default(self) -> FluidshConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn loads_built_in_defaults_with_no_files_present() {
        let temp_dir = tempdir().unwrap();
        let config = ConfigLoader::new()
            .with_project_dir(temp_dir.path())
            .load()
            .unwrap();

        assert_eq!(config.stream.control_plane_addr, "127.0.0.1:7700");
        assert_eq!(config.ca.max_ttl_secs, 3600);
    }

    #[test]
    fn project_config_overrides_defaults() {
        let temp_dir = tempdir().unwrap();
        let project_dir = temp_dir.path();

        fs::write(
            project_dir.join("fluidsh.toml"),
            r#"
[project]
name = "acme-fleet"

[stream]
control_plane_addr = "10.0.0.5:7700"
"#,
        )
        .unwrap();

        let config = ConfigLoader::new()
            .with_project_dir(project_dir)
            .load()
            .unwrap();

        assert_eq!(config.project.name, "acme-fleet");
        assert_eq!(config.stream.control_plane_addr, "10.0.0.5:7700");
    }

    #[test]
    fn local_config_overrides_project_config() {
        let temp_dir = tempdir().unwrap();
        let project_dir = temp_dir.path();

        fs::write(
            project_dir.join("fluidsh.toml"),
            "[stream]\ncontrol_plane_addr = \"127.0.0.1:7700\"\n",
        )
        .unwrap();
        fs::write(
            project_dir.join("fluidsh.local.toml"),
            "[stream]\ncontrol_plane_addr = \"localhost:9999\"\n",
        )
        .unwrap();

        let config = ConfigLoader::new()
            .with_project_dir(project_dir)
            .load()
            .unwrap();

        assert_eq!(config.stream.control_plane_addr, "localhost:9999");
    }
}
