//! Infrastructure configuration - cannot change at runtime.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem paths for CantinaOS state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Base directory for runtime state.
    /// Default: ~/.local/share/cantina-os
    #[serde(default = "PathsConfig::default_state_dir")]
    pub state_dir: PathBuf,

    /// Memory store persistence file (§4.4). Default: `<state_dir>/memory.json`.
    #[serde(default = "PathsConfig::default_memory_file")]
    pub memory_file: PathBuf,

    /// Session-stamped log directory for the logging pipeline (§4.10).
    #[serde(default = "PathsConfig::default_log_dir")]
    pub log_dir: PathBuf,
}

impl PathsConfig {
    fn default_state_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".local/share/cantina-os"))
            .unwrap_or_else(|| PathBuf::from(".local/share/cantina-os"))
    }

    fn default_memory_file() -> PathBuf {
        Self::default_state_dir().join("memory.json")
    }

    fn default_log_dir() -> PathBuf {
        Self::default_state_dir().join("logs")
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: Self::default_state_dir(),
            memory_file: Self::default_memory_file(),
            log_dir: Self::default_log_dir(),
        }
    }
}

/// Network bind configuration for the Web Bridge (§4.8, §6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindConfig {
    /// HTTP/WebSocket port for the Web Bridge and `/health`.
    #[serde(default = "BindConfig::default_http_port")]
    pub http_port: u16,

    /// CORS allow-list for the Web Bridge.
    #[serde(default = "BindConfig::default_cors_origins")]
    pub cors_allowed_origins: Vec<String>,
}

impl BindConfig {
    fn default_http_port() -> u16 {
        8000
    }

    fn default_cors_origins() -> Vec<String> {
        vec!["http://localhost:3000".to_string()]
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            http_port: Self::default_http_port(),
            cors_allowed_origins: Self::default_cors_origins(),
        }
    }
}

/// Logging pipeline settings (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level (trace, debug, info, warn, error), also overridable by
    /// `RUST_LOG`.
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,

    /// Rolling window for duplicate-message suppression, in seconds.
    #[serde(default = "TelemetryConfig::default_dedup_window_secs")]
    pub dedup_window_secs: u64,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }

    fn default_dedup_window_secs() -> u64 {
        30
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            dedup_window_secs: Self::default_dedup_window_secs(),
        }
    }
}

/// Infrastructure configuration - cannot change at runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InfraConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub bind: BindConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_default_under_state_dir() {
        let paths = PathsConfig::default();
        assert!(paths.memory_file.starts_with(&paths.state_dir));
        assert!(paths.log_dir.starts_with(&paths.state_dir));
    }

    #[test]
    fn bind_defaults() {
        let bind = BindConfig::default();
        assert_eq!(bind.http_port, 8000);
        assert!(!bind.cors_allowed_origins.is_empty());
    }

    #[test]
    fn telemetry_defaults() {
        let t = TelemetryConfig::default();
        assert_eq!(t.log_level, "info");
        assert_eq!(t.dedup_window_secs, 30);
    }
}
