//! Configuration loading for CantinaOS.
//!
//! Configuration is split into two categories:
//!
//! - **Infrastructure** (`InfraConfig`): things that cannot change at
//!   runtime - paths, bind address, CORS allow-list.
//! - **Bootstrap** (`BootstrapConfig`): seed values the runtime treats as
//!   its source of truth after startup - timeouts, Web Bridge caps, DJ
//!   policy, the keyword map.
//!
//! # Config file locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/cantina-os/config.toml` (system)
//! 2. `~/.config/cantina-os/config.toml` (user)
//! 3. `./cantina-os.toml` (local override, or `--config <path>`)
//! 4. Environment variables (`CANTINA_OS_*`, plus `RUST_LOG`)
//!
//! External secrets (LLM/STT/TTS API keys, §6.5) never live in a config
//! file; see [`secrets::Secrets`].

pub mod bootstrap;
pub mod infra;
pub mod loader;
pub mod secrets;

pub use bootstrap::{BootstrapConfig, DjConfig, KeywordMap, TimeoutsConfig, WebBridgeConfig};
pub use infra::{BindConfig, InfraConfig, PathsConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};
pub use secrets::Secrets;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete CantinaOS configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CantinaConfig {
    #[serde(flatten)]
    pub infra: InfraConfig,

    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

impl CantinaConfig {
    /// Load configuration from all sources (compiled defaults, then the
    /// standard file locations, then environment variables).
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources_from(None).map(|(config, _)| config)
    }

    /// Load configuration, preferring `config_path` (typically `--config`)
    /// over the local `./cantina-os.toml` override.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        Self::load_with_sources_from(config_path).map(|(config, _)| config)
    }

    pub fn load_with_sources() -> Result<(Self, ConfigSources), ConfigError> {
        Self::load_with_sources_from(None)
    }

    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = CantinaConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            let file_config = loader::load_from_file(&path)?;
            config = loader::merge_configs(config, file_config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Render the resolved configuration as TOML, for `--show-config`.
    pub fn to_toml(&self) -> String {
        let mut out = String::new();
        out.push_str("# CantinaOS configuration (resolved)\n\n");

        out.push_str("[paths]\n");
        out.push_str(&format!("state_dir = \"{}\"\n", self.infra.paths.state_dir.display()));
        out.push_str(&format!(
            "memory_file = \"{}\"\n",
            self.infra.paths.memory_file.display()
        ));
        out.push_str(&format!("log_dir = \"{}\"\n", self.infra.paths.log_dir.display()));

        out.push_str("\n[bind]\n");
        out.push_str(&format!("http_port = {}\n", self.infra.bind.http_port));
        out.push_str(&format!(
            "cors_allowed_origins = {:?}\n",
            self.infra.bind.cors_allowed_origins
        ));

        out.push_str("\n[telemetry]\n");
        out.push_str(&format!("log_level = \"{}\"\n", self.infra.telemetry.log_level));
        out.push_str(&format!(
            "dedup_window_secs = {}\n",
            self.infra.telemetry.dedup_window_secs
        ));

        out.push_str("\n[bootstrap.timeouts]\n");
        out.push_str(&format!(
            "memory_wait_secs = {}\n",
            self.bootstrap.timeouts.memory_wait_secs
        ));
        out.push_str(&format!(
            "heartbeat_interval_secs = {}\n",
            self.bootstrap.timeouts.heartbeat_interval_secs
        ));

        out.push_str("\n[bootstrap.dj]\n");
        out.push_str(&format!(
            "track_ending_lead_secs = {}\n",
            self.bootstrap.dj.track_ending_lead_secs
        ));
        out.push_str(&format!("history_size = {}\n", self.bootstrap.dj.history_size));

        out
    }
}
