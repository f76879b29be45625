//! Asset filenames: `{prefix}_{origin}_{timestampMillis}_{randomHex16}.{ext}`.

use chrono::{DateTime, Utc};

/// Type prefixes `list` knows how to recognise.
pub const KNOWN_TYPES: [&str; 5] = ["3d_model", "preview", "image", "video", "debug"];

/// Build a fresh filename. The random suffix keeps concurrent persists with
/// identical prefix, origin and millisecond apart.
pub fn generate(prefix: &str, origin: &str, extension: &str, now: DateTime<Utc>) -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{prefix}_{origin}_{}_{}.{}",
        now.timestamp_millis(),
        &random[..16],
        extension.trim_start_matches('.')
    )
}

/// What a filename says about its asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    /// Filename without the extension.
    pub stem: String,
    pub extension: Option<String>,
    pub asset_type: Option<String>,
    pub origin: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Parse a filename produced by [`generate`]. Names that do not follow the
/// pattern still yield a stem and extension.
pub fn parse(filename: &str) -> ParsedName {
    let (stem, extension) = match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext.to_ascii_lowercase())),
        _ => (filename, None),
    };

    // Longest first so a future `image_*` family cannot shadow a longer one.
    let mut types = KNOWN_TYPES;
    types.sort_by_key(|t| std::cmp::Reverse(t.len()));
    let asset_type = types
        .iter()
        .find(|t| stem.starts_with(&format!("{t}_")))
        .map(|t| t.to_string());

    let (origin, created_at) = match &asset_type {
        Some(t) => parse_tail(&stem[t.len() + 1..]),
        None => (None, None),
    };

    ParsedName {
        stem: stem.to_string(),
        extension,
        asset_type,
        origin,
        created_at,
    }
}

/// `{origin}_{ts}_{hex}`, read from the right because origins may contain
/// underscores.
fn parse_tail(tail: &str) -> (Option<String>, Option<DateTime<Utc>>) {
    let mut parts = tail.rsplitn(3, '_');
    let _hex = parts.next();
    let ts = parts.next().and_then(|ts| ts.parse::<i64>().ok());
    let origin = parts.next().filter(|o| !o.is_empty()).map(str::to_string);

    match ts {
        Some(ms) => (origin, DateTime::from_timestamp_millis(ms)),
        None => (None, None),
    }
}

/// Closed extension to MIME mapping.
pub fn mime_for_extension(extension: Option<&str>) -> &'static str {
    let ext = extension.map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("glb") => "model/gltf-binary",
        Some("gltf") => "model/gltf+json",
        Some("obj") => "model/obj",
        Some("stl") => "model/stl",
        Some("ply") => "application/ply",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("json") => "application/json",
        Some("txt") | Some("log") => "text/plain",
        _ => "application/octet-stream",
    }
}
