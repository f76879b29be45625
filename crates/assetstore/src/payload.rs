//! The closed set of shapes a pipeline output can take.

use base64::Engine;
use serde_json::Value;

use crate::error::{snapshot, PersistenceError};

/// One output of a remote pipeline, classified once at the store boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum AssetPayload {
    /// Raw bytes, written as-is.
    Bytes(Vec<u8>),
    /// `data:<mime>;base64,<data>`; `data` is still base64 text.
    DataUri { mime: String, data: String },
    /// Written as UTF-8.
    Text(String),
    /// A file that lives on the remote side and has to be downloaded.
    RemoteRef { url: String },
    /// Anything else; written as pretty-printed JSON.
    Structured(Value),
}

impl AssetPayload {
    /// Classify a JSON value the way remote backends return outputs.
    ///
    /// Gradio hands files back as objects carrying a `url`, sometimes nested
    /// one level under `value` (update dicts).
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(s) => match split_data_uri(&s) {
                Some((mime, data)) => AssetPayload::DataUri {
                    mime: mime.to_string(),
                    data: data.to_string(),
                },
                None => AssetPayload::Text(s),
            },
            Value::Object(ref map) => {
                let url = map.get("url").and_then(Value::as_str).or_else(|| {
                    map.get("value")
                        .and_then(|v| v.get("url"))
                        .and_then(Value::as_str)
                });
                match url {
                    Some(url) => AssetPayload::RemoteRef {
                        url: url.to_string(),
                    },
                    None => AssetPayload::Structured(value),
                }
            }
            other => AssetPayload::Structured(other),
        }
    }

    /// Short name of the variant, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AssetPayload::Bytes(_) => "bytes",
            AssetPayload::DataUri { .. } => "data_uri",
            AssetPayload::Text(_) => "text",
            AssetPayload::RemoteRef { .. } => "remote_ref",
            AssetPayload::Structured(_) => "structured",
        }
    }

    /// Truncated debug rendering for error reports.
    pub fn snapshot(&self) -> String {
        snapshot(self)
    }

    /// Bytes for every shape that does not need the network.
    ///
    /// Returns `Ok(None)` for [`AssetPayload::RemoteRef`].
    pub fn local_bytes(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
        match self {
            AssetPayload::Bytes(bytes) => Ok(Some(bytes.clone())),
            AssetPayload::DataUri { data, .. } => base64::engine::general_purpose::STANDARD
                .decode(data.trim())
                .map(Some)
                .map_err(|e| PersistenceError::Decode {
                    message: format!("invalid base64 in data URI: {e}"),
                    snapshot: self.snapshot(),
                }),
            AssetPayload::Text(text) => Ok(Some(text.as_bytes().to_vec())),
            AssetPayload::Structured(value) => serde_json::to_vec_pretty(value)
                .map(Some)
                .map_err(|e| PersistenceError::Decode {
                    message: e.to_string(),
                    snapshot: self.snapshot(),
                }),
            AssetPayload::RemoteRef { .. } => Ok(None),
        }
    }
}

impl From<Vec<u8>> for AssetPayload {
    fn from(bytes: Vec<u8>) -> Self {
        AssetPayload::Bytes(bytes)
    }
}

/// Split `data:<mime>;base64,<data>` into its mime type and payload.
pub fn split_data_uri(s: &str) -> Option<(&str, &str)> {
    let rest = s.strip_prefix("data:")?;
    let (header, data) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    Some((mime, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn data_uri_strings_are_recognised() {
        let payload = AssetPayload::from_value(json!("data:image/png;base64,iVBORw0KGgo="));
        assert_eq!(
            payload,
            AssetPayload::DataUri {
                mime: "image/png".into(),
                data: "iVBORw0KGgo=".into()
            }
        );
    }

    #[test]
    fn plain_strings_are_text() {
        let payload = AssetPayload::from_value(json!("just words"));
        assert_eq!(payload, AssetPayload::Text("just words".into()));
    }

    #[test]
    fn gradio_file_objects_become_remote_refs() {
        let direct = AssetPayload::from_value(json!({
            "path": "/tmp/gradio/abc/model.glb",
            "url": "https://space.hf.space/gradio_api/file=/tmp/gradio/abc/model.glb"
        }));
        assert!(matches!(
            direct,
            AssetPayload::RemoteRef { ref url } if url.ends_with("model.glb")
        ));

        let nested = AssetPayload::from_value(json!({
            "__type__": "update",
            "value": {"url": "https://x/video.mp4"}
        }));
        assert_eq!(
            nested,
            AssetPayload::RemoteRef {
                url: "https://x/video.mp4".into()
            }
        );
    }

    #[test]
    fn other_values_are_structured() {
        assert!(matches!(
            AssetPayload::from_value(json!({"faces": 10000})),
            AssetPayload::Structured(_)
        ));
        assert!(matches!(
            AssetPayload::from_value(json!([1, 2, 3])),
            AssetPayload::Structured(_)
        ));
    }

    #[test]
    fn bad_base64_is_a_decode_error() {
        let payload = AssetPayload::DataUri {
            mime: "image/png".into(),
            data: "@@@not base64@@@".into(),
        };
        let err = payload.local_bytes().unwrap_err();
        match err {
            PersistenceError::Decode { snapshot, .. } => assert!(snapshot.contains("DataUri")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn data_uri_without_base64_marker_is_text() {
        let payload = AssetPayload::from_value(json!("data:text/plain,hello"));
        assert_eq!(payload, AssetPayload::Text("data:text/plain,hello".into()));
    }
}
