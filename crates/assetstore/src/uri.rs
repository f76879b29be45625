//! `asset://` resource URIs.

use std::fmt;

use crate::error::PersistenceError;

pub const SCHEME: &str = "asset://";

/// A parsed resource URI. The type segment is informational; lookups go by
/// filename alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetUri {
    pub asset_type: Option<String>,
    pub filename: String,
}

impl AssetUri {
    pub fn new(asset_type: Option<&str>, filename: impl Into<String>) -> Self {
        Self {
            asset_type: asset_type.map(str::to_string),
            filename: filename.into(),
        }
    }

    /// Accepts `asset://{type}/{filename}` and `asset://{filename}`.
    pub fn parse(uri: &str) -> Result<Self, PersistenceError> {
        let rest = uri
            .strip_prefix(SCHEME)
            .ok_or_else(|| PersistenceError::UnsupportedUri(uri.to_string()))?;

        let (asset_type, filename) = match rest.split_once('/') {
            Some((t, f)) => (Some(t), f),
            None => (None, rest),
        };

        if filename.is_empty() || filename.contains('/') || filename.contains('\\') {
            return Err(PersistenceError::UnsupportedUri(uri.to_string()));
        }
        if asset_type.is_some_and(str::is_empty) {
            return Err(PersistenceError::UnsupportedUri(uri.to_string()));
        }

        Ok(Self::new(asset_type, filename))
    }
}

impl fmt::Display for AssetUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.asset_type {
            Some(t) => write!(f, "{SCHEME}{t}/{}", self.filename),
            None => write!(f, "{SCHEME}{}", self.filename),
        }
    }
}
