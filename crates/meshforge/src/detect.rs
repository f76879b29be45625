//! Backend capability detection.
//!
//! Resolves an opaque endpoint identifier to one [`BackendVariant`], once,
//! at startup. Order: name heuristic, live manifest introspection, name
//! heuristic over everything the manifest revealed. No match is fatal.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

use crate::backend::{ApiManifest, RemoteBackend};
use crate::error::ForgeError;

/// The closed set of remote pipelines meshforge can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendVariant {
    Trellis,
    Hunyuan3d,
    Hunyuan3dMini,
    Unknown,
}

impl BackendVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendVariant::Trellis => "trellis",
            BackendVariant::Hunyuan3d => "hunyuan3d",
            BackendVariant::Hunyuan3dMini => "hunyuan3d_mini",
            BackendVariant::Unknown => "unknown",
        }
    }
}

impl fmt::Display for BackendVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compound tokens precede their substrings.
const NAME_TOKENS: [(&str, BackendVariant); 5] = [
    ("hunyuan3d-2mini", BackendVariant::Hunyuan3dMini),
    ("hunyuan3d-mini", BackendVariant::Hunyuan3dMini),
    ("hunyuan3d", BackendVariant::Hunyuan3d),
    ("hunyuan", BackendVariant::Hunyuan3d),
    ("trellis", BackendVariant::Trellis),
];

const SIGNATURES: [(&str, BackendVariant); 4] = [
    ("/generation_all", BackendVariant::Hunyuan3d),
    ("/shape_generation", BackendVariant::Hunyuan3dMini),
    ("/extract_glb", BackendVariant::Trellis),
    ("/image_to_3d", BackendVariant::Trellis),
];

/// Evidence gathered while classifying one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityProbe {
    pub endpoint: String,
    pub manifest: Option<ApiManifest>,
}

impl CapabilityProbe {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            manifest: None,
        }
    }

    /// Every name the probe has seen: the endpoint, then manifest entries.
    pub fn evidence(&self) -> impl Iterator<Item = &str> {
        let manifest = self.manifest.iter().flat_map(|m| m.named.iter().chain(m.unnamed.iter()));
        std::iter::once(self.endpoint.as_str()).chain(manifest.map(String::as_str))
    }
}

/// Case-insensitive token match on a single name.
pub fn match_name(name: &str) -> Option<BackendVariant> {
    let lowered = name.to_lowercase();
    NAME_TOKENS
        .iter()
        .find(|(token, _)| lowered.contains(token))
        .map(|(_, variant)| *variant)
}

/// Signature match: named operations first, then unnamed labels.
pub fn match_manifest(manifest: &ApiManifest) -> Option<BackendVariant> {
    for (signature, variant) in SIGNATURES {
        if manifest.named.iter().any(|name| name == signature) {
            return Some(variant);
        }
    }

    for (signature, variant) in SIGNATURES {
        let bare = signature.trim_start_matches('/');
        if manifest.unnamed.iter().any(|label| label.contains(bare)) {
            return Some(variant);
        }
    }
    None
}

/// Classify `backend` into a variant.
///
/// The only side effect is the manifest request, which is abandoned after
/// `timeout`.
pub async fn detect(
    backend: &dyn RemoteBackend,
    timeout: Duration,
) -> Result<BackendVariant, ForgeError> {
    let mut probe = CapabilityProbe::new(backend.endpoint());

    if let Some(variant) = match_name(&probe.endpoint) {
        info!(endpoint = %probe.endpoint, %variant, "backend variant from name");
        return Ok(variant);
    }

    let manifest = match tokio::time::timeout(timeout, backend.manifest()).await {
        Ok(Ok(manifest)) => manifest,
        Ok(Err(e)) => {
            warn!(endpoint = %probe.endpoint, error = %e, "manifest request failed");
            return Err(ForgeError::DetectionFailure {
                endpoint: probe.endpoint,
                reason: format!("manifest request failed: {e}"),
            });
        }
        Err(_) => {
            warn!(endpoint = %probe.endpoint, ?timeout, "manifest request timed out");
            return Err(ForgeError::DetectionFailure {
                endpoint: probe.endpoint,
                reason: format!("manifest request timed out after {}s", timeout.as_secs()),
            });
        }
    };

    if let Some(variant) = match_manifest(&manifest) {
        info!(endpoint = %probe.endpoint, %variant, "backend variant from manifest");
        return Ok(variant);
    }
    probe.manifest = Some(manifest);

    if let Some(variant) = probe.evidence().find_map(match_name) {
        info!(endpoint = %probe.endpoint, %variant, "backend variant from manifest names");
        return Ok(variant);
    }

    Err(ForgeError::DetectionFailure {
        endpoint: probe.endpoint,
        reason: "no known variant token or operation signature".to_string(),
    })
}
