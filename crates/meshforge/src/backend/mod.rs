//! Remote compute backends.
//!
//! Pipelines and detection only ever see [`RemoteBackend`]; the Gradio HTTP
//! implementation lives in [`gradio`].

pub mod gradio;

pub use gradio::GradioClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Failure of a single remote call, already classified for the invoker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Worth retrying: overload, quota, dropped connection, 5xx.
    #[error("{0}")]
    Transient(String),
    /// Retrying cannot help: bad request, unknown operation, unusable reply.
    #[error("{0}")]
    Fatal(String),
}

impl RemoteError {
    pub fn message(&self) -> &str {
        match self {
            RemoteError::Transient(m) | RemoteError::Fatal(m) => m,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

/// What a backend says it can do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiManifest {
    /// Named operations, e.g. `/generation_all`.
    pub named: Vec<String>,
    /// Textual descriptions of anonymous operations.
    pub unnamed: Vec<String>,
}

/// A file accepted by the backend's upload endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Server-side path to pass back as an input.
    pub path: String,
    pub orig_name: String,
}

impl UploadedFile {
    /// Gradio `FileData` input value referencing this upload.
    pub fn to_file_data(&self) -> Value {
        serde_json::json!({
            "path": self.path,
            "orig_name": self.orig_name,
            "meta": {"_type": "gradio.FileData"},
        })
    }
}

#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// The identifier this backend was built from (`owner/name` or URL).
    fn endpoint(&self) -> &str;

    /// Fetch the capability manifest.
    async fn manifest(&self) -> Result<ApiManifest, RemoteError>;

    /// Run one named operation and return its output values.
    async fn call(&self, api_name: &str, data: Vec<Value>) -> Result<Vec<Value>, RemoteError>;

    /// Upload a file so later calls can reference it.
    async fn upload(&self, bytes: Vec<u8>, filename: &str) -> Result<UploadedFile, RemoteError>;

    /// Download URL for a server-side path returned by a call.
    fn file_url(&self, path: &str) -> String;
}
