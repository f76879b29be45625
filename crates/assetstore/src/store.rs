//! AssetStore: a flat directory of uniquely named generated assets.

use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PersistenceError;
use crate::fetch::RemoteFetcher;
use crate::naming;
use crate::payload::AssetPayload;
use crate::uri::AssetUri;

/// Everything known about one stored asset. Built at persist time and
/// rebuilt from the filename when listing; never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    /// Filename without its extension.
    pub id: String,
    pub asset_type: Option<String>,
    pub origin: Option<String>,
    pub mime_type: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub storage_path: PathBuf,
    pub resource_uri: String,
}

impl AssetRecord {
    pub fn filename(&self) -> Option<&str> {
        self.storage_path.file_name().and_then(|n| n.to_str())
    }
}

/// Result of a successful persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAsset {
    #[serde(flatten)]
    pub record: AssetRecord,
    /// BLAKE3 truncated to 128 bits, 32 hex chars.
    pub content_hash: String,
}

/// Filesystem-backed asset store rooted at a single directory.
#[derive(Clone)]
pub struct AssetStore {
    root: PathBuf,
    fetcher: Option<Arc<dyn RemoteFetcher>>,
}

impl std::fmt::Debug for AssetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetStore")
            .field("root", &self.root)
            .field("fetcher", &self.fetcher.is_some())
            .finish()
    }
}

impl AssetStore {
    /// Open (and create if needed) a store at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| PersistenceError::io(&root, e))?;
        let absolute = std::path::absolute(&root).map_err(|e| PersistenceError::io(&root, e))?;

        Ok(Self {
            root: normalize(&absolute),
            fetcher: None,
        })
    }

    /// Attach the fetcher used for [`AssetPayload::RemoteRef`] payloads.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `payload` under a fresh filename and describe the result.
    ///
    /// Nothing is written when the generated name would land outside the
    /// root directory.
    pub async fn persist(
        &self,
        payload: AssetPayload,
        prefix: &str,
        extension: &str,
        origin: &str,
    ) -> Result<StoredAsset, PersistenceError> {
        match self.persist_inner(&payload, prefix, extension, origin).await {
            Ok(stored) => {
                debug!(
                    uri = %stored.record.resource_uri,
                    kind = payload.kind(),
                    size = stored.record.size_bytes,
                    hash = %stored.content_hash,
                    "asset persisted"
                );
                Ok(stored)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    prefix,
                    origin,
                    kind = payload.kind(),
                    payload = %payload.snapshot(),
                    "failed to persist asset"
                );
                Err(e)
            }
        }
    }

    async fn persist_inner(
        &self,
        payload: &AssetPayload,
        prefix: &str,
        extension: &str,
        origin: &str,
    ) -> Result<StoredAsset, PersistenceError> {
        let created_at = Utc::now();
        let filename = naming::generate(prefix, origin, extension, created_at);
        let path = self.resolve(&filename)?;

        let data = self.materialize(payload).await?;

        let content_hash = content_hash(&data);
        let size_bytes = data.len() as u64;
        write_new(path.clone(), data).await?;

        let record = self.describe_parsed(&filename, path, size_bytes, created_at);
        Ok(StoredAsset {
            record,
            content_hash,
        })
    }

    /// Resolve a payload to its bytes without writing anything, downloading
    /// remote references through the configured fetcher.
    pub async fn materialize(&self, payload: &AssetPayload) -> Result<Vec<u8>, PersistenceError> {
        match payload.local_bytes()? {
            Some(bytes) => Ok(bytes),
            None => self.fetch_remote(payload).await,
        }
    }

    async fn fetch_remote(&self, payload: &AssetPayload) -> Result<Vec<u8>, PersistenceError> {
        let AssetPayload::RemoteRef { url } = payload else {
            return Err(PersistenceError::Decode {
                message: "payload has no local bytes".to_string(),
                snapshot: payload.snapshot(),
            });
        };

        let fetcher = self.fetcher.as_ref().ok_or_else(|| PersistenceError::Fetch {
            url: url.clone(),
            message: "no remote fetcher configured".to_string(),
            snapshot: payload.snapshot(),
        })?;

        fetcher
            .fetch(url)
            .await
            .map_err(|e| PersistenceError::Fetch {
                url: url.clone(),
                message: e.to_string(),
                snapshot: payload.snapshot(),
            })
    }

    /// Enumerate stored assets, newest first, optionally keeping only one type.
    pub async fn list(
        &self,
        type_filter: Option<&str>,
    ) -> Result<Vec<AssetRecord>, PersistenceError> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| PersistenceError::io(&self.root, e))?;

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PersistenceError::io(&self.root, e))?
        {
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if !file_type.is_file() {
                continue;
            }
            let Some(filename) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if filename.starts_with('.') {
                continue;
            }

            let Some(record) = self.describe_listed(&filename, entry.path()).await? else {
                continue;
            };
            if let Some(wanted) = type_filter {
                if record.asset_type.as_deref() != Some(wanted) {
                    continue;
                }
            }
            records.push(record);
        }

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(records)
    }

    /// Read an asset by resource URI. Both URI forms resolve by filename.
    pub async fn read(&self, uri: &str) -> Result<(AssetRecord, Vec<u8>), PersistenceError> {
        let parsed = AssetUri::parse(uri)?;
        let path = self.resolve(&parsed.filename)?;

        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PersistenceError::NotFound(uri.to_string()));
            }
            Err(e) => return Err(PersistenceError::io(&path, e)),
        };

        let record = self.describe(&parsed.filename, path).await?;
        Ok((record, data))
    }

    /// Map a filename to its path, refusing anything that is not a plain
    /// file directly under the root.
    fn resolve(&self, filename: &str) -> Result<PathBuf, PersistenceError> {
        let candidate = self.root.join(filename);
        let resolved = normalize(&candidate);

        let single_component = matches!(
            Path::new(filename).components().collect::<Vec<_>>().as_slice(),
            [Component::Normal(_)]
        );

        if !single_component || resolved.parent() != Some(self.root.as_path()) {
            return Err(PersistenceError::PathEscape {
                path: resolved,
                root: self.root.clone(),
            });
        }
        Ok(resolved)
    }

    /// Like [`Self::describe`], but a file removed after the directory scan
    /// saw it yields `None`.
    async fn describe_listed(
        &self,
        filename: &str,
        path: PathBuf,
    ) -> Result<Option<AssetRecord>, PersistenceError> {
        match self.describe(filename, path).await {
            Ok(record) => Ok(Some(record)),
            Err(PersistenceError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn describe(
        &self,
        filename: &str,
        path: PathBuf,
    ) -> Result<AssetRecord, PersistenceError> {
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| PersistenceError::io(&path, e))?;
        let modified: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(self.describe_parsed(filename, path, metadata.len(), modified))
    }

    fn describe_parsed(
        &self,
        filename: &str,
        path: PathBuf,
        size_bytes: u64,
        fallback_time: DateTime<Utc>,
    ) -> AssetRecord {
        let parsed = naming::parse(filename);
        let uri = AssetUri::new(parsed.asset_type.as_deref(), filename);

        AssetRecord {
            id: parsed.stem,
            mime_type: naming::mime_for_extension(parsed.extension.as_deref()).to_string(),
            created_at: parsed.created_at.unwrap_or(fallback_time),
            asset_type: parsed.asset_type,
            origin: parsed.origin,
            size_bytes,
            storage_path: path,
            resource_uri: uri.to_string(),
        }
    }
}

/// BLAKE3 of `data`, truncated to 16 bytes.
pub fn content_hash(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    hex::encode(&hash.as_bytes()[..16])
}

/// Resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Create-only write on the blocking pool, so the descriptor is closed
/// before the future resolves.
async fn write_new(path: PathBuf, data: Vec<u8>) -> Result<(), PersistenceError> {
    let target = path.clone();
    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)?;
        file.write_all(&data)?;
        file.flush()
    })
    .await
    .map_err(|e| PersistenceError::io(&path, std::io::Error::other(e)))?
    .map_err(|e| PersistenceError::io(&path, e))
}
