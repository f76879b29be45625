//! Tool operations on top of an explicit [`ForgeContext`].
//!
//! `main` builds one context and shares it by `Arc`; tests build their own
//! against scripted backends. Nothing here is a global.

use assetstore::{AssetRecord, AssetStore, StoredAsset};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

use crate::backend::RemoteBackend;
use crate::detect::BackendVariant;
use crate::error::ForgeError;
use crate::invoker::Invoker;
use crate::notify::ResourceNotifier;
use crate::operations::{
    Operation, OperationId, OperationStatus, OperationSummary, OperationTracker, TrackerStats,
};
use crate::pipeline::{stages, GenerationRequest, PipelineIo, PipelineRegistry};
use crate::ratelimit::RateLimiter;
use forgeconf::{ForgeConfig, GenerationConfig};

/// Origin tag for images produced by the standalone image tool.
const IMAGE_TOOL_ORIGIN: &str = "prompt";

/// Optional per-call overrides of the configured generation defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerationOverrides {
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub steps: Option<u32>,
    #[serde(default)]
    pub guidance_scale: Option<f64>,
    #[serde(default)]
    pub octree_resolution: Option<u32>,
    #[serde(default)]
    pub remove_background: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateImageRequest {
    pub prompt: String,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Generate3dRequest {
    pub prompt: String,
    #[serde(flatten)]
    pub overrides: GenerationOverrides,
}

/// Returned by `generate_3d_asset` before the pipeline runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub operation_id: OperationId,
    pub status: OperationStatus,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub backend_variant: BackendVariant,
    pub endpoint: String,
    pub operations: TrackerStats,
    pub listeners: usize,
}

/// Everything a running process owns.
pub struct ForgeContext {
    pub tracker: OperationTracker,
    pub store: AssetStore,
    pub notifier: ResourceNotifier,
    pub limiter: RateLimiter,
    pub registry: PipelineRegistry,
    pub mesh: Arc<dyn RemoteBackend>,
    pub image: Arc<dyn RemoteBackend>,
    pub variant: BackendVariant,
    pub invoker: Invoker,
    pub generation: GenerationConfig,
    pub started_at: Instant,
}

impl ForgeContext {
    pub fn new(
        config: &ForgeConfig,
        variant: BackendVariant,
        mesh: Arc<dyn RemoteBackend>,
        image: Arc<dyn RemoteBackend>,
        store: AssetStore,
    ) -> Self {
        Self {
            tracker: OperationTracker::new(),
            store,
            notifier: ResourceNotifier::default(),
            limiter: RateLimiter::from_config(&config.limits),
            registry: PipelineRegistry::standard(),
            mesh,
            image,
            variant,
            invoker: Invoker::from_config(&config.retry),
            generation: config.generation.clone(),
            started_at: Instant::now(),
        }
    }

    pub fn with_registry(mut self, registry: PipelineRegistry) -> Self {
        self.registry = registry;
        self
    }

    fn pipeline_io(&self, operation: Option<OperationId>) -> PipelineIo<'_> {
        PipelineIo {
            mesh: self.mesh.as_ref(),
            image: self.image.as_ref(),
            invoker: &self.invoker,
            store: &self.store,
            notifier: &self.notifier,
            tracker: &self.tracker,
            operation,
        }
    }

    /// Configured defaults with `overrides` applied, range-checked.
    pub fn build_request(
        &self,
        prompt: &str,
        overrides: &GenerationOverrides,
    ) -> Result<GenerationRequest, ForgeError> {
        let prompt = sanitize_prompt(prompt)?;

        let mut generation = self.generation.clone();
        if let Some(seed) = overrides.seed {
            generation.seed = seed;
        }
        generation.steps = overrides.steps.or(generation.steps);
        generation.guidance_scale = overrides.guidance_scale.or(generation.guidance_scale);
        generation.octree_resolution = overrides.octree_resolution.or(generation.octree_resolution);
        if let Some(remove_background) = overrides.remove_background {
            generation.remove_background = remove_background;
        }
        generation
            .validate()
            .map_err(|e| ForgeError::validation(e.to_string()))?;

        Ok(GenerationRequest {
            prompt,
            variant: self.variant,
            params: (&generation).into(),
            image: (&generation).into(),
        })
    }

    /// Generate and store a single image. Runs inline.
    pub async fn generate_image(
        &self,
        client: &str,
        request: GenerateImageRequest,
    ) -> Result<StoredAsset, ForgeError> {
        self.limiter.check(client)?;
        let overrides = GenerationOverrides {
            seed: request.seed,
            ..Default::default()
        };
        let request = self.build_request(&request.prompt, &overrides)?;

        let io = self.pipeline_io(None);
        let (stored, _) = stages::reference_image(&io, &request, IMAGE_TOOL_ORIGIN).await?;
        tracing::info!(uri = %stored.record.resource_uri, "🖼️ Image generated");
        Ok(stored)
    }

    /// Validate, start an operation and detach the pipeline. The returned
    /// acknowledgement is all the caller gets; progress and the final
    /// result are read back through [`ForgeContext::operation_status`].
    pub fn generate_3d_asset(
        self: &Arc<Self>,
        client: &str,
        request: Generate3dRequest,
    ) -> Result<Acknowledgement, ForgeError> {
        self.limiter.check(client)?;
        let request = self.build_request(&request.prompt, &request.overrides)?;
        if self.registry.get(self.variant).is_none() {
            return Err(ForgeError::UnsupportedBackend(self.variant));
        }

        let id = self.tracker.start(format!("generate_3d_asset:{}", self.variant));
        let ack = Acknowledgement {
            operation_id: id,
            status: OperationStatus::Started,
            message: format!(
                "3D generation started on {}; poll operation {id} for progress",
                self.variant
            ),
        };

        let span = tracing::info_span!(
            "generate_3d_asset",
            operation.id = id,
            backend.variant = %self.variant,
        );
        let ctx = Arc::clone(self);
        tokio::spawn(async move { ctx.run_generation(id, request).await }.instrument(span));

        Ok(ack)
    }

    async fn run_generation(&self, id: OperationId, request: GenerationRequest) {
        if let Err(e) = self.tracker.record(
            id,
            OperationStatus::Processing,
            format!("dispatching to {}", self.variant),
        ) {
            tracing::warn!(error = %e, "cannot record dispatch");
        }

        let io = self.pipeline_io(Some(id));
        let outcome = self.registry.dispatch(self.variant, &request, &io).await;

        let recorded = match outcome {
            Ok(output) => self
                .tracker
                .set_result(id, output.summary())
                .and_then(|_| {
                    self.tracker.record(
                        id,
                        OperationStatus::Completed,
                        format!("model stored at {}", output.primary.record.resource_uri),
                    )
                }),
            Err(e) => self.tracker.record(id, OperationStatus::Error, e.to_string()),
        };
        if let Err(e) = recorded {
            tracing::error!(error = %e, "cannot record final operation state");
        }
    }

    pub fn operation_status(&self, id: OperationId) -> Result<Operation, ForgeError> {
        self.tracker
            .get(id)
            .ok_or_else(|| ForgeError::NotFound(format!("operation {id}")))
    }

    pub fn list_operations(&self) -> Vec<OperationSummary> {
        self.tracker.list()
    }

    pub async fn list_assets(
        &self,
        type_filter: Option<&str>,
    ) -> Result<Vec<AssetRecord>, ForgeError> {
        Ok(self.store.list(type_filter).await?)
    }

    pub async fn read_asset(&self, uri: &str) -> Result<(AssetRecord, Vec<u8>), ForgeError> {
        Ok(self.store.read(uri).await?)
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            status: "healthy",
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs: self.started_at.elapsed().as_secs(),
            backend_variant: self.variant,
            endpoint: self.mesh.endpoint().to_string(),
            operations: self.tracker.stats(),
            listeners: self.notifier.listener_count(),
        }
    }
}

/// Trim, replace control characters with spaces, collapse whitespace runs.
/// An empty result is a validation error.
pub fn sanitize_prompt(prompt: &str) -> Result<String, ForgeError> {
    let cleaned = prompt
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    if cleaned.is_empty() {
        return Err(ForgeError::validation("prompt must not be empty"));
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_is_normalized() {
        assert_eq!(
            sanitize_prompt("  a\tred\u{0007} chair \n").unwrap(),
            "a red chair"
        );
    }

    #[test]
    fn blank_prompt_is_rejected() {
        for prompt in ["", "   ", "\n\t", "\u{0000}"] {
            assert!(matches!(
                sanitize_prompt(prompt),
                Err(ForgeError::Validation(_))
            ));
        }
    }

    #[test]
    fn overrides_deserialize_from_flat_request() {
        let request: Generate3dRequest =
            serde_json::from_str(r#"{"prompt": "a lamp", "steps": 40, "seed": 9}"#).unwrap();
        assert_eq!(request.overrides.steps, Some(40));
        assert_eq!(request.overrides.seed, Some(9));
        assert_eq!(request.overrides.guidance_scale, None);
    }
}
