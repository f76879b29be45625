//! Hunyuan3D-2: one combined call returns the white mesh and the textured mesh.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{stages, GenerationParams, GenerationRequest, Pipeline, PipelineIo, PipelineOutput};
use crate::detect::BackendVariant;
use crate::error::ForgeError;

pub const GENERATION_API: &str = "/generation_all";

#[derive(Debug, Clone, PartialEq)]
pub struct HunyuanSettings {
    pub steps: u32,
    pub guidance_scale: f64,
    pub octree_resolution: u32,
    pub num_chunks: u32,
}

impl Default for HunyuanSettings {
    fn default() -> Self {
        Self {
            steps: 30,
            guidance_scale: 5.0,
            octree_resolution: 256,
            num_chunks: 8000,
        }
    }
}

impl HunyuanSettings {
    pub fn for_request(&self, params: &GenerationParams) -> Self {
        let octree = params.octree_resolution.unwrap_or(self.octree_resolution);
        Self {
            steps: params.steps.unwrap_or(self.steps).clamp(1, 100),
            guidance_scale: params
                .guidance_scale
                .unwrap_or(self.guidance_scale)
                .clamp(0.0, 20.0),
            octree_resolution: stages::snap_octree(octree),
            num_chunks: self.num_chunks,
        }
    }
}

#[derive(Debug, Default)]
pub struct HunyuanPipeline {
    settings: HunyuanSettings,
}

impl HunyuanPipeline {
    pub fn new(settings: HunyuanSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Pipeline for HunyuanPipeline {
    fn variant(&self) -> BackendVariant {
        BackendVariant::Hunyuan3d
    }

    fn name(&self) -> &'static str {
        "hunyuan3d"
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

        io.progress(format!(
            "generating textured mesh ({} steps, octree {})",
            settings.steps, settings.octree_resolution
        ));
        let outputs = io
            .call(
                io.mesh,
                GENERATION_API,
                vec![
                    json!(request.prompt),
                    uploaded,
                    Value::Null,
                    Value::Null,
                    Value::Null,
                    Value::Null,
                    json!(settings.steps),
                    json!(settings.guidance_scale),
                    json!(request.params.seed),
                    json!(settings.octree_resolution),
                    json!(request.params.remove_background),
                    json!(settings.num_chunks),
                    json!(false),
                ],
            )
            .await?;

        let white_mesh = stages::output_at(&outputs, 0, GENERATION_API)?;
        let textured = stages::output_at(&outputs, 1, GENERATION_API)?;

        let preview = io
            .persist(io.mesh, white_mesh, "preview", "glb", origin)
            .await?;
        let primary = io
            .persist(io.mesh, textured, "3d_model", "glb", origin)
            .await?;

        Ok(PipelineOutput {
            primary,
            secondary: Some(preview),
            reference_image,
        })
    }
}
