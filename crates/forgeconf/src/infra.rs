//! Infrastructure configuration - things that cannot change at runtime.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem paths for meshforge data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root directory of the asset store. Every persisted asset lives
    /// directly under this directory.
    /// Default: ~/.local/share/meshforge/assets
    #[serde(default = "PathsConfig::default_asset_dir")]
    pub asset_dir: PathBuf,
}

impl PathsConfig {
    fn default_asset_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".local/share/meshforge/assets"))
            .unwrap_or_else(|| PathBuf::from(".meshforge/assets"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            asset_dir: Self::default_asset_dir(),
        }
    }
}

/// Network bind address for the HTTP surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindConfig {
    /// Default: 127.0.0.1
    #[serde(default = "BindConfig::default_host")]
    pub host: String,

    /// Default: 8090
    #[serde(default = "BindConfig::default_http_port")]
    pub http_port: u16,
}

impl BindConfig {
    fn default_host() -> String {
        "127.0.0.1".to_string()
    }

    fn default_http_port() -> u16 {
        8090
    }

    /// `host:port` string suitable for a TCP listener.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            http_port: Self::default_http_port(),
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint. When unset, logs only go to stderr.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otlp_endpoint: Option<String>,

    /// Log filter directive (trace, debug, info, warn, error, or a full
    /// `EnvFilter` expression).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            log_level: Self::default_log_level(),
        }
    }
}

/// All infrastructure sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfraConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub bind: BindConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}
