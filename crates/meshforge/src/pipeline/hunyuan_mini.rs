//! Hunyuan3D-2mini: shape generation, then an explicit GLB export.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{stages, GenerationParams, GenerationRequest, Pipeline, PipelineIo, PipelineOutput};
use crate::detect::BackendVariant;
use crate::error::ForgeError;

pub const SHAPE_API: &str = "/shape_generation";
pub const EXPORT_API: &str = "/on_export_click";

#[derive(Debug, Clone, PartialEq)]
pub struct HunyuanMiniSettings {
    pub steps: u32,
    pub guidance_scale: f64,
    pub octree_resolution: u32,
    pub num_chunks: u32,
    pub target_face_count: u32,
}

impl Default for HunyuanMiniSettings {
    fn default() -> Self {
        Self {
            steps: 5,
            guidance_scale: 5.0,
            octree_resolution: 256,
            num_chunks: 8000,
            target_face_count: 10_000,
        }
    }
}

impl HunyuanMiniSettings {
    pub fn for_request(&self, params: &GenerationParams) -> Self {
        let octree = params.octree_resolution.unwrap_or(self.octree_resolution);
        Self {
            steps: params.steps.unwrap_or(self.steps).clamp(1, 50),
            guidance_scale: params
                .guidance_scale
                .unwrap_or(self.guidance_scale)
                .clamp(0.0, 20.0),
            octree_resolution: stages::snap_octree(octree),
            ..self.clone()
        }
    }
}

#[derive(Debug, Default)]
pub struct HunyuanMiniPipeline {
    settings: HunyuanMiniSettings,
}

impl HunyuanMiniPipeline {
    pub fn new(settings: HunyuanMiniSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Pipeline for HunyuanMiniPipeline {
    fn variant(&self) -> BackendVariant {
        BackendVariant::Hunyuan3dMini
    }

    fn name(&self) -> &'static str {
        "hunyuan3d_mini"
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

        io.progress(format!("generating shape ({} steps)", settings.steps));
        let outputs = io
            .call(
                io.mesh,
                SHAPE_API,
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
        let white_mesh = stages::output_at(&outputs, 0, SHAPE_API)?.clone();
        let preview = io
            .persist(io.mesh, &white_mesh, "preview", "glb", origin)
            .await?;

        io.progress("exporting glb");
        let outputs = io
            .call(
                io.mesh,
                EXPORT_API,
                vec![
                    white_mesh,
                    json!("glb"),
                    json!(true),
                    json!(false),
                    json!(settings.target_face_count),
                ],
            )
            .await?;
        let model = exported_file(&outputs)?;
        let primary = io.persist(io.mesh, model, "3d_model", "glb", origin).await?;

        Ok(PipelineOutput {
            primary,
            secondary: Some(preview),
            reference_image,
        })
    }
}

/// The export returns `[viewer_html, file]`; older builds return the file
/// alone, so fall back to the last non-null output.
fn exported_file(outputs: &[Value]) -> Result<&Value, ForgeError> {
    stages::output_at(outputs, 1, EXPORT_API).or_else(|_| {
        outputs
            .iter()
            .rev()
            .find(|v| !v.is_null())
            .ok_or_else(|| ForgeError::malformed(EXPORT_API, "export returned no file"))
    })
}
