//! Stages shared by every pipeline: reference image, validation, upload.

use assetstore::{AssetPayload, StoredAsset};
use serde_json::Value;

use super::{GenerationRequest, PipelineIo};
use crate::error::ForgeError;
use forgeconf::OCTREE_RESOLUTIONS;

pub const IMAGE_API: &str = "/infer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Webp => "webp",
        }
    }
}

/// Reject empty payloads and anything that is not PNG, JPEG or WEBP.
pub fn validate_image(bytes: &[u8]) -> Result<ImageFormat, ForgeError> {
    if bytes.is_empty() {
        return Err(ForgeError::validation("reference image is empty"));
    }
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        return Ok(ImageFormat::Png);
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Ok(ImageFormat::Jpeg);
    }
    if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Ok(ImageFormat::Webp);
    }
    Err(ForgeError::validation(format!(
        "reference image is not PNG, JPEG or WEBP ({} bytes)",
        bytes.len()
    )))
}

/// Generate the reference image, check it, store it, and hand back its
/// bytes. Nothing is stored or announced for a reply that is not an image.
pub async fn reference_image(
    io: &PipelineIo<'_>,
    request: &GenerationRequest,
    origin: &str,
) -> Result<(StoredAsset, Vec<u8>), ForgeError> {
    io.progress("generating reference image");
    let outputs = io
        .call(
            io.image,
            IMAGE_API,
            vec![
                Value::from(request.prompt.clone()),
                Value::from(request.params.seed),
                Value::from(false),
                Value::from(request.image.width),
                Value::from(request.image.height),
                Value::from(request.image.steps),
            ],
        )
        .await?;

    let image = output_at(&outputs, 0, IMAGE_API)?;
    let bytes = io.fetch(io.image, image).await?;
    let format = validate_image(&bytes)?;
    let stored = io
        .persist_payload(
            AssetPayload::Bytes(bytes.clone()),
            "image",
            format.extension(),
            origin,
        )
        .await?;
    Ok((stored, bytes))
}

/// Upload the reference image to the mesh backend.
pub async fn upload_reference(io: &PipelineIo<'_>, bytes: &[u8]) -> Result<Value, ForgeError> {
    let format = validate_image(bytes)?;
    io.progress("uploading reference image");
    io.upload(bytes, &format!("reference.{}", format.extension()))
        .await
}

/// Output `index` of a call, or a malformed-response error naming the call.
pub fn output_at<'v>(
    outputs: &'v [Value],
    index: usize,
    label: &str,
) -> Result<&'v Value, ForgeError> {
    outputs
        .get(index)
        .filter(|v| !v.is_null())
        .ok_or_else(|| {
            ForgeError::malformed(
                label,
                format!("expected output #{index}, got {} outputs", outputs.len()),
            )
        })
}

/// Nearest supported octree resolution; ties go to the smaller one.
pub fn snap_octree(resolution: u32) -> u32 {
    OCTREE_RESOLUTIONS
        .iter()
        .copied()
        .min_by_key(|r| r.abs_diff(resolution))
        .unwrap_or(resolution)
}

/// File extension suggested by an output value, if any.
pub fn extension_hint(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let mime = s.strip_prefix("data:")?.split([';', ',']).next()?;
            extension_for_mime(mime).map(str::to_string)
        }
        Value::Object(map) => ["orig_name", "url", "path"]
            .iter()
            .filter_map(|key| map.get(*key).and_then(Value::as_str))
            .find_map(extension_of),
        _ => None,
    }
}

fn extension_for_mime(mime: &str) -> Option<&'static str> {
    match mime {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/webp" => Some("webp"),
        "video/mp4" => Some("mp4"),
        "model/gltf-binary" => Some("glb"),
        "application/json" => Some("json"),
        _ => None,
    }
}

fn extension_of(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '=']).next()?;
    let (_, ext) = last.rsplit_once('.')?;
    let valid = !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| ext.to_ascii_lowercase())
}
