//! Configuration loading for meshforge.
//!
//! Sections:
//!
//! - **Infrastructure** (`InfraConfig`): paths, bind address, telemetry.
//! - **Backend** (`BackendConfig`, `RetryConfig`, `LimitsConfig`): which
//!   remote endpoints to drive and how hard to retry them.
//! - **Generation** (`GenerationConfig`): numeric defaults for every job,
//!   validated against their documented ranges at load time.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins, tables merge key by key):
//! 1. `/etc/meshforge/config.toml` (system)
//! 2. `~/.config/meshforge/config.toml` (user)
//! 3. `./meshforge.toml` or the `--config` path (local override)
//! 4. Environment variables (`MESHFORGE_*`, `HF_TOKEN`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! asset_dir = "~/meshforge/assets"
//!
//! [bind]
//! http_port = 8090
//!
//! [backend]
//! endpoint = "JeffreyXiang/TRELLIS"
//! image_endpoint = "black-forest-labs/FLUX.1-schnell"
//!
//! [generation]
//! steps = 30
//! guidance_scale = 5.0
//! octree_resolution = 384
//!
//! [retry]
//! max_retries = 5
//! initial_delay_ms = 1000
//! ```

pub mod backend;
pub mod generation;
pub mod infra;
pub mod loader;

pub use backend::{BackendConfig, LimitsConfig, RetryConfig};
pub use generation::{GenerationConfig, OCTREE_RESOLUTIONS};
pub use infra::{BindConfig, InfraConfig, PathsConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value for {field}: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Complete meshforge configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForgeConfig {
    #[serde(flatten)]
    pub infra: InfraConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub limits: LimitsConfig,
}

impl ForgeConfig {
    /// Load configuration from all standard sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, letting `config_path` replace the local
    /// `./meshforge.toml` override. System and user files still load first.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and env vars contributed.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::read_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config = loader::from_table(merged, Path::new("<merged>"))?;
        loader::apply_env_overrides(&mut config, &mut sources, |key| std::env::var(key).ok())?;
        config.validate()?;

        Ok((config, sources))
    }

    /// Check every cross-field and range constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.generation.validate()?;

        if self.backend.endpoint.trim().is_empty() {
            return Err(ConfigError::invalid("backend.endpoint", "must not be empty"));
        }
        if self.backend.image_endpoint.trim().is_empty() {
            return Err(ConfigError::invalid(
                "backend.image_endpoint",
                "must not be empty",
            ));
        }
        if self.backend.introspection_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "backend.introspection_timeout_secs",
                "must be at least 1",
            ));
        }
        if self.limits.requests_per_window == 0 || self.limits.window_secs == 0 {
            return Err(ConfigError::invalid(
                "limits",
                "requests_per_window and window_secs must be at least 1",
            ));
        }
        Ok(())
    }

    /// Serialize config to a TOML string. The auth token is never included.
    pub fn to_toml(&self) -> String {
        let body =
            toml::to_string_pretty(self).unwrap_or_else(|e| format!("# unrenderable: {e}\n"));
        format!("# meshforge configuration\n\n{body}")
    }
}
