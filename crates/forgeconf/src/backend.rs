//! Remote backend, retry and rate-limit configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where the remote pipelines live and how to talk to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Mesh backend identifier, `owner/name` or a full base URL.
    /// Default: tencent/Hunyuan3D-2
    #[serde(default = "BackendConfig::default_endpoint")]
    pub endpoint: String,

    /// Text-to-image backend used for the reference image stage.
    /// Default: black-forest-labs/FLUX.1-schnell
    #[serde(default = "BackendConfig::default_image_endpoint")]
    pub image_endpoint: String,

    /// Bearer token sent to both backends. Never written back by `to_toml`.
    #[serde(default, skip_serializing)]
    pub hf_token: Option<String>,

    /// Upper bound for the capability manifest request.
    #[serde(default = "BackendConfig::default_introspection_timeout_secs")]
    pub introspection_timeout_secs: u64,

    /// Upper bound for a single HTTP request to a backend.
    #[serde(default = "BackendConfig::default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl BackendConfig {
    fn default_endpoint() -> String {
        "tencent/Hunyuan3D-2".to_string()
    }

    fn default_image_endpoint() -> String {
        "black-forest-labs/FLUX.1-schnell".to_string()
    }

    fn default_introspection_timeout_secs() -> u64 {
        30
    }

    fn default_request_timeout_secs() -> u64 {
        600
    }

    pub fn introspection_timeout(&self) -> Duration {
        Duration::from_secs(self.introspection_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: Self::default_endpoint(),
            image_endpoint: Self::default_image_endpoint(),
            hf_token: None,
            introspection_timeout_secs: Self::default_introspection_timeout_secs(),
            request_timeout_secs: Self::default_request_timeout_secs(),
        }
    }
}

/// Retry budget for every remote call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt. Quota waits count against this too.
    #[serde(default = "RetryConfig::default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first generic retry; doubles on each further one.
    #[serde(default = "RetryConfig::default_initial_delay_ms")]
    pub initial_delay_ms: u64,
}

impl RetryConfig {
    fn default_max_retries() -> u32 {
        5
    }

    fn default_initial_delay_ms() -> u64 {
        1000
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: Self::default_max_retries(),
            initial_delay_ms: Self::default_initial_delay_ms(),
        }
    }
}

/// Fixed-window rate limit applied per client key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "LimitsConfig::default_requests_per_window")]
    pub requests_per_window: u32,

    #[serde(default = "LimitsConfig::default_window_secs")]
    pub window_secs: u64,
}

impl LimitsConfig {
    fn default_requests_per_window() -> u32 {
        30
    }

    fn default_window_secs() -> u64 {
        60
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            requests_per_window: Self::default_requests_per_window(),
            window_secs: Self::default_window_secs(),
        }
    }
}
