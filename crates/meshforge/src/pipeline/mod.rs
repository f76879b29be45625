//! Workflow registry and per-variant pipelines.
//!
//! Dispatch on [`BackendVariant`] happens exactly once, in
//! [`PipelineRegistry::dispatch`]; pipeline code never branches on the
//! variant. Stages every pipeline shares live in [`stages`].

pub mod hunyuan;
pub mod hunyuan_mini;
pub mod stages;
pub mod trellis;

use assetstore::{AssetPayload, AssetStore, StoredAsset};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::RemoteBackend;
use crate::detect::BackendVariant;
use crate::error::ForgeError;
use crate::invoker::{Invoker, RetryNotice};
use crate::notify::ResourceNotifier;
use crate::operations::{OperationId, OperationStatus, OperationTracker};
use forgeconf::GenerationConfig;

/// Caller-facing mesh parameters, already range-checked. Unset sampler
/// settings are filled in by the pipeline that runs the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub steps: Option<u32>,
    pub guidance_scale: Option<f64>,
    pub seed: u64,
    pub octree_resolution: Option<u32>,
    pub remove_background: bool,
}

/// Reference image parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageParams {
    pub width: u32,
    pub height: u32,
    pub steps: u32,
}

impl From<&GenerationConfig> for GenerationParams {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            steps: config.steps,
            guidance_scale: config.guidance_scale,
            seed: config.seed,
            octree_resolution: config.octree_resolution,
            remove_background: config.remove_background,
        }
    }
}

impl From<&GenerationConfig> for ImageParams {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            width: config.image_width,
            height: config.image_height,
            steps: config.image_steps,
        }
    }
}

/// Everything one job needs; immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub variant: BackendVariant,
    pub params: GenerationParams,
    pub image: ImageParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    /// The final 3D model.
    pub primary: StoredAsset,
    /// Intermediate preview (white mesh or turntable video).
    pub secondary: Option<StoredAsset>,
    pub reference_image: StoredAsset,
}

impl PipelineOutput {
    /// Short JSON description used as the operation result.
    pub fn summary(&self) -> Value {
        serde_json::json!({
            "model_uri": self.primary.record.resource_uri,
            "preview_uri": self.secondary.as_ref().map(|s| s.record.resource_uri.clone()),
            "reference_image_uri": self.reference_image.record.resource_uri,
            "content_hash": self.primary.content_hash,
        })
    }
}

/// Borrowed handles a pipeline runs against.
pub struct PipelineIo<'a> {
    pub mesh: &'a dyn RemoteBackend,
    pub image: &'a dyn RemoteBackend,
    pub invoker: &'a Invoker,
    pub store: &'a AssetStore,
    pub notifier: &'a ResourceNotifier,
    pub tracker: &'a OperationTracker,
    /// Operation to report progress to; `None` for synchronous tools.
    pub operation: Option<OperationId>,
}

impl PipelineIo<'_> {
    /// Record a PROCESSING event for the current operation.
    pub fn progress(&self, details: impl Into<String>) {
        self.track(OperationStatus::Processing, details.into());
    }

    fn track(&self, status: OperationStatus, details: String) {
        if let Some(id) = self.operation {
            if let Err(e) = self.tracker.record(id, status, details) {
                tracing::warn!(operation.id = id, error = %e, "cannot record progress");
            }
        }
    }

    fn on_retry(&self, label: &str, notice: &RetryNotice) {
        let details = if notice.quota {
            format!(
                "{label}: quota exhausted, waiting {}s before attempt {}",
                notice.wait.as_secs(),
                notice.attempt + 1
            )
        } else {
            format!(
                "{label}: attempt {} failed, retrying in {}ms",
                notice.attempt,
                notice.wait.as_millis()
            )
        };
        self.track(OperationStatus::Waiting, details);
    }

    /// Call `api_name` on `backend` through the invoker.
    pub async fn call(
        &self,
        backend: &dyn RemoteBackend,
        api_name: &str,
        data: Vec<Value>,
    ) -> Result<Vec<Value>, ForgeError> {
        let result = self
            .invoker
            .invoke_observed(
                api_name,
                || backend.call(api_name, data.clone()),
                |notice| self.on_retry(api_name, notice),
            )
            .await?;
        Ok(result)
    }

    /// Upload `bytes` to the mesh backend through the invoker and return the
    /// `FileData` input referencing it.
    pub async fn upload(&self, bytes: &[u8], filename: &str) -> Result<Value, ForgeError> {
        let uploaded = self
            .invoker
            .invoke_observed(
                "upload",
                || self.mesh.upload(bytes.to_vec(), filename),
                |notice| self.on_retry("upload", notice),
            )
            .await?;
        Ok(uploaded.to_file_data())
    }

    /// Persist one remote output and announce it.
    pub async fn persist(
        &self,
        backend: &dyn RemoteBackend,
        output: &Value,
        prefix: &str,
        default_extension: &str,
        origin: &str,
    ) -> Result<StoredAsset, ForgeError> {
        let output = with_download_url(backend, output);
        let extension =
            stages::extension_hint(&output).unwrap_or_else(|| default_extension.to_string());
        self.persist_payload(AssetPayload::from_value(output), prefix, &extension, origin).await
    }

    /// Decode or download one remote output without storing it.
    pub async fn fetch(
        &self,
        backend: &dyn RemoteBackend,
        output: &Value,
    ) -> Result<Vec<u8>, ForgeError> {
        let payload = AssetPayload::from_value(with_download_url(backend, output));
        Ok(self.store.materialize(&payload).await?)
    }

    /// Persist an already-resolved payload and announce it.
    pub async fn persist_payload(
        &self,
        payload: AssetPayload,
        prefix: &str,
        extension: &str,
        origin: &str,
    ) -> Result<StoredAsset, ForgeError> {
        let stored = self.store.persist(payload, prefix, extension, origin).await?;
        self.notifier.notify_list_changed();
        self.progress(format!("stored {}", stored.record.resource_uri));
        Ok(stored)
    }
}

/// Gradio file outputs sometimes carry only a server path; give them a URL
/// so the store can fetch them.
fn with_download_url(backend: &dyn RemoteBackend, output: &Value) -> Value {
    match output {
        Value::Object(map) if map.get("url").and_then(Value::as_str).is_none() => {
            match map.get("path").and_then(Value::as_str) {
                Some(path) => {
                    let mut map = map.clone();
                    map.insert("url".to_string(), Value::String(backend.file_url(path)));
                    Value::Object(map)
                }
                None => output.clone(),
            }
        }
        _ => output.clone(),
    }
}

/// One multi-stage workflow for one backend variant.
#[async_trait]
pub trait Pipeline: Send + Sync {
    fn variant(&self) -> BackendVariant;

    fn name(&self) -> &'static str;

    async fn run(
        &self,
        request: &GenerationRequest,
        io: &PipelineIo<'_>,
    ) -> Result<PipelineOutput, ForgeError>;
}

/// Static mapping from variant to pipeline.
#[derive(Clone, Default)]
pub struct PipelineRegistry {
    pipelines: HashMap<BackendVariant, Arc<dyn Pipeline>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with one pipeline per known variant.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(trellis::TrellisPipeline::default()));
        registry.register(Arc::new(hunyuan::HunyuanPipeline::default()));
        registry.register(Arc::new(hunyuan_mini::HunyuanMiniPipeline::default()));
        registry
    }

    pub fn register(&mut self, pipeline: Arc<dyn Pipeline>) {
        self.pipelines.insert(pipeline.variant(), pipeline);
    }

    pub fn get(&self, variant: BackendVariant) -> Option<Arc<dyn Pipeline>> {
        self.pipelines.get(&variant).cloned()
    }

    pub fn variants(&self) -> Vec<BackendVariant> {
        let mut variants: Vec<_> = self.pipelines.keys().copied().collect();
        variants.sort_by_key(|v| v.as_str());
        variants
    }

    pub async fn dispatch(
        &self,
        variant: BackendVariant,
        request: &GenerationRequest,
        io: &PipelineIo<'_>,
    ) -> Result<PipelineOutput, ForgeError> {
        let pipeline = self
            .get(variant)
            .ok_or(ForgeError::UnsupportedBackend(variant))?;

        io.progress(format!("running {} pipeline", pipeline.name()));
        pipeline.run(request, io).await
    }
}
