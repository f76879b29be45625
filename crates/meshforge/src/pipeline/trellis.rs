//! TRELLIS: optional background removal, turntable preview, then GLB
//! extraction.
//!
//! The backend keeps per-session state between calls, so `/extract_glb`
//! works on whatever `/image_to_3d` produced last.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{stages, GenerationParams, GenerationRequest, Pipeline, PipelineIo, PipelineOutput};
use crate::detect::BackendVariant;
use crate::error::ForgeError;

pub const PREPROCESS_API: &str = "/preprocess_image";
pub const IMAGE_TO_3D_API: &str = "/image_to_3d";
pub const EXTRACT_GLB_API: &str = "/extract_glb";

/// Sampler settings for the two diffusion stages plus GLB export.
#[derive(Debug, Clone, PartialEq)]
pub struct TrellisSettings {
    pub sparse_steps: u32,
    pub sparse_guidance: f64,
    pub latent_steps: u32,
    pub latent_guidance: f64,
    pub mesh_simplify: f64,
    pub texture_size: u32,
}

impl Default for TrellisSettings {
    fn default() -> Self {
        Self {
            sparse_steps: 12,
            sparse_guidance: 7.5,
            latent_steps: 12,
            latent_guidance: 3.0,
            mesh_simplify: 0.95,
            texture_size: 1024,
        }
    }
}

impl TrellisSettings {
    /// Request steps and guidance, when given, drive the sparse-structure
    /// stage, clamped to what the sampler accepts. Everything else stays local.
    pub fn for_request(&self, params: &GenerationParams) -> Self {
        Self {
            sparse_steps: params.steps.unwrap_or(self.sparse_steps).clamp(1, 50),
            sparse_guidance: params
                .guidance_scale
                .unwrap_or(self.sparse_guidance)
                .clamp(0.0, 10.0),
            latent_steps: self.latent_steps.clamp(1, 50),
            latent_guidance: self.latent_guidance.clamp(0.0, 10.0),
            ..self.clone()
        }
    }
}

#[derive(Debug, Default)]
pub struct TrellisPipeline {
    settings: TrellisSettings,
}

impl TrellisPipeline {
    pub fn new(settings: TrellisSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Pipeline for TrellisPipeline {
    fn variant(&self) -> BackendVariant {
        BackendVariant::Trellis
    }

    fn name(&self) -> &'static str {
        "trellis"
    }

    async fn run(
        &self,
        request: &GenerationRequest,
        io: &PipelineIo<'_>,
    ) -> Result<PipelineOutput, ForgeError> {
        let origin = self.name();
        let settings = self.settings.for_request(&request.params);

        let (reference_image, bytes) = stages::reference_image(io, request, origin).await?;
        let uploaded = stages::upload_reference(io, &bytes).await?;

        let conditioning = if request.params.remove_background {
            io.progress("removing background");
            let outputs = io.call(io.mesh, PREPROCESS_API, vec![uploaded]).await?;
            let preprocessed = stages::output_at(&outputs, 0, PREPROCESS_API)?.clone();
            io.persist(io.mesh, &preprocessed, "image", "png", origin).await?;
            preprocessed
        } else {
            uploaded
        };

        io.progress(format!(
            "sampling structure ({} steps) and latents ({} steps)",
            settings.sparse_steps, settings.latent_steps
        ));
        let outputs = io
            .call(
                io.mesh,
                IMAGE_TO_3D_API,
                vec![
                    conditioning,
                    json!([]),
                    json!(request.params.seed),
                    json!(settings.sparse_guidance),
                    json!(settings.sparse_steps),
                    json!(settings.latent_guidance),
                    json!(settings.latent_steps),
                    json!("stochastic"),
                ],
            )
            .await?;
        let video = unwrap_video(stages::output_at(&outputs, 0, IMAGE_TO_3D_API)?);
        let preview = io.persist(io.mesh, video, "video", "mp4", origin).await?;

        io.progress("extracting glb");
        let outputs = io
            .call(
                io.mesh,
                EXTRACT_GLB_API,
                vec![json!(settings.mesh_simplify), json!(settings.texture_size)],
            )
            .await?;
        let model = stages::output_at(&outputs, 0, EXTRACT_GLB_API)?;
        let primary = io.persist(io.mesh, model, "3d_model", "glb", origin).await?;

        Ok(PipelineOutput {
            primary,
            secondary: Some(preview),
            reference_image,
        })
    }
}

/// Video components wrap their file as `{"video": FileData, "subtitles": ...}`.
fn unwrap_video(output: &Value) -> &Value {
    output.get("video").filter(|v| !v.is_null()).unwrap_or(output)
}
