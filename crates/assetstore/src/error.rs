use std::path::PathBuf;
use thiserror::Error;

/// Longest payload snapshot carried by an error or a log line.
pub const SNAPSHOT_LIMIT: usize = 200;

/// Everything that can go wrong turning a payload into a stored asset.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("path {} escapes asset root {}", .path.display(), .root.display())]
    PathEscape { path: PathBuf, root: PathBuf },

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot decode payload: {message} (payload: {snapshot})")]
    Decode { message: String, snapshot: String },

    #[error("cannot fetch {url}: {message} (payload: {snapshot})")]
    Fetch {
        url: String,
        message: String,
        snapshot: String,
    },

    #[error("unsupported resource URI: {0}")]
    UnsupportedUri(String),

    #[error("asset not found: {0}")]
    NotFound(String),
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Debug rendering of `value`, cut to [`SNAPSHOT_LIMIT`] characters.
pub fn snapshot<T: std::fmt::Debug + ?Sized>(value: &T) -> String {
    let rendered = format!("{value:?}");
    match rendered.char_indices().nth(SNAPSHOT_LIMIT) {
        Some((cut, _)) => format!("{}...", &rendered[..cut]),
        None => rendered,
    }
}
