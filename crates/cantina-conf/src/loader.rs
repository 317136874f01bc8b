//! Config file discovery, loading, and environment variable overlay.

use crate::{BootstrapConfig, CantinaConfig, ConfigError, InfraConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from, surfaced by
/// `--show-config` (SPEC_FULL.md §C).
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub files: Vec<PathBuf>,
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations, in load order (later
/// wins): system, user, local/CLI override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/cantina-os/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("cantina-os/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("cantina-os.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

pub fn load_from_file(path: &Path) -> Result<CantinaConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_toml(&contents, path)
}

fn parse_toml(contents: &str, path: &Path) -> Result<CantinaConfig, ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let infra: InfraConfig = if table.contains_key("paths")
        || table.contains_key("bind")
        || table.contains_key("telemetry")
    {
        let value = toml::Value::Table(table.clone());
        value
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
    } else {
        InfraConfig::default()
    };

    let bootstrap: BootstrapConfig = if let Some(section) = table.get("bootstrap") {
        section
            .clone()
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
    } else {
        BootstrapConfig::default()
    };

    Ok(CantinaConfig { infra, bootstrap })
}

/// Merge two configs, with `overlay` taking precedence field-by-field.
/// Since every field in `InfraConfig`/`BootstrapConfig` carries its own
/// spec default, an overlay field equal to the compiled default is
/// treated as "unset" and the base value wins.
pub fn merge_configs(base: CantinaConfig, overlay: CantinaConfig) -> CantinaConfig {
    let default_infra = InfraConfig::default();
    let merged_infra = InfraConfig {
        paths: if overlay.infra.paths.state_dir != default_infra.paths.state_dir
            || overlay.infra.paths.memory_file != default_infra.paths.memory_file
            || overlay.infra.paths.log_dir != default_infra.paths.log_dir
        {
            overlay.infra.paths
        } else {
            base.infra.paths
        },
        bind: if overlay.infra.bind.http_port != default_infra.bind.http_port
            || overlay.infra.bind.cors_allowed_origins != default_infra.bind.cors_allowed_origins
        {
            overlay.infra.bind
        } else {
            base.infra.bind
        },
        telemetry: if overlay.infra.telemetry.log_level != default_infra.telemetry.log_level {
            overlay.infra.telemetry
        } else {
            base.infra.telemetry
        },
    };

    // Bootstrap fully replaces when a `[bootstrap]` section was present;
    // the loader only calls this with a parsed overlay, so this mirrors
    // the semantics documented in `CantinaConfig::load_with_sources_from`.
    CantinaConfig {
        infra: merged_infra,
        bootstrap: overlay.bootstrap,
    }
}

/// Apply `CANTINA_OS_*` environment variable overrides.
pub fn apply_env_overrides(config: &mut CantinaConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("CANTINA_OS_STATE_DIR") {
        config.infra.paths.state_dir = expand_path(&v);
        sources.env_overrides.push("CANTINA_OS_STATE_DIR".to_string());
    }
    if let Ok(v) = env::var("CANTINA_OS_MEMORY_FILE") {
        config.infra.paths.memory_file = expand_path(&v);
        sources.env_overrides.push("CANTINA_OS_MEMORY_FILE".to_string());
    }
    if let Ok(v) = env::var("CANTINA_OS_HTTP_PORT") {
        if let Ok(port) = v.parse() {
            config.infra.bind.http_port = port;
            sources.env_overrides.push("CANTINA_OS_HTTP_PORT".to_string());
        }
    }
    if let Ok(v) = env::var("CANTINA_OS_LOG_LEVEL") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("CANTINA_OS_LOG_LEVEL".to_string());
    }
    // Standard `RUST_LOG` takes precedence over the config-file value if set.
    if let Ok(v) = env::var("RUST_LOG") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

/// Expand `~` and a leading `$VAR` in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
        return PathBuf::from(path);
    }
    if let Some(stripped) = path.strip_prefix('$') {
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                return PathBuf::from(var_value).join(&stripped[slash_pos + 1..]);
            }
        } else if let Ok(var_value) = env::var(stripped) {
            return PathBuf::from(var_value);
        }
        return PathBuf::from(path);
    }
    PathBuf::from(path)
}
