//! Downloading remote file references.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Resolves a [`crate::AssetPayload::RemoteRef`] into bytes.
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Plain HTTP(S) fetcher, optionally authenticated with a bearer token
/// (private Spaces serve their files behind the same token as their API).
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    token: Option<String>,
}

impl HttpFetcher {
    pub fn new(token: Option<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, token })
    }

    pub fn with_client(client: reqwest::Client, token: Option<String>) -> Self {
        Self { client, token }
    }
}

#[async_trait]
impl RemoteFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(FetchError::UnsupportedScheme(url.to_string()));
        }

        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}
