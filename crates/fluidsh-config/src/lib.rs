//! Layered TOML configuration for `fluidsh-cp` and `fluidsh-host`.

mod error;
mod loader;
mod paths;
mod settings;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use paths::Paths;
pub use settings::{
    CaSettings, FluidshConfig, HostSettings, KnownSourceVm, LoggingSettings, ProjectSettings,
    RestSettings, SourceSettings, StreamSettings,
};
