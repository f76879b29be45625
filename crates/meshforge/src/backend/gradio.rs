//! Gradio HTTP API client.
//!
//! A call is two requests: `POST /gradio_api/call/{name}` queues the job and
//! returns an `event_id`, then `GET /gradio_api/call/{name}/{event_id}`
//! streams server-sent events until a `complete` or `error` event arrives.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{ApiManifest, RemoteBackend, RemoteError, UploadedFile};

/// Client for one hosted Gradio application.
#[derive(Debug, Clone)]
pub struct GradioClient {
    endpoint: String,
    base_url: String,
    client: Client,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueuedCall {
    event_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct ApiInfo {
    #[serde(default)]
    named_endpoints: serde_json::Map<String, Value>,
    #[serde(default)]
    unnamed_endpoints: serde_json::Map<String, Value>,
}

impl GradioClient {
    /// Build a client for `endpoint`, either `owner/name` or a full URL.
    pub fn new(
        endpoint: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Fatal(format!("cannot build HTTP client: {e}")))?;
        Self::with_client(endpoint, client, token)
    }

    pub fn with_client(
        endpoint: &str,
        client: Client,
        token: Option<String>,
    ) -> Result<Self, RemoteError> {
        Ok(Self {
            endpoint: endpoint.to_string(),
            base_url: resolve_base_url(endpoint)?,
            client,
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn checked(
        &self,
        what: &str,
        request: RequestBuilder,
    ) -> Result<reqwest::Response, RemoteError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| RemoteError::Transient(format!("{what}: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(what, status, &body))
    }
}

/// Map an endpoint identifier to the application's base URL.
///
/// `owner/name` becomes `https://{owner}-{name}.hf.space`, lower-cased with
/// `.` and `_` replaced by `-`. Full URLs pass through minus trailing slashes.
pub fn resolve_base_url(endpoint: &str) -> Result<String, RemoteError> {
    let endpoint = endpoint.trim();
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return Ok(endpoint.trim_end_matches('/').to_string());
    }

    match endpoint.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            let subdomain = format!("{owner}-{name}")
                .to_lowercase()
                .replace(['.', '_'], "-");
            Ok(format!("https://{subdomain}.hf.space"))
        }
        _ => Err(RemoteError::Fatal(format!(
            "endpoint {endpoint:?} is neither owner/name nor a URL"
        ))),
    }
}

/// 429 and 5xx are worth retrying; any other failure status is final.
fn classify_status(what: &str, status: StatusCode, body: &str) -> RemoteError {
    let body = body.trim();
    let message = if body.is_empty() {
        format!("{what}: HTTP {status}")
    } else {
        format!("{what}: HTTP {status}: {body}")
    };

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        RemoteError::Transient(message)
    } else {
        RemoteError::Fatal(message)
    }
}

#[async_trait]
impl RemoteBackend for GradioClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn manifest(&self) -> Result<ApiManifest, RemoteError> {
        let url = format!("{}/gradio_api/info", self.base_url);
        let response = self.checked("api info", self.client.get(&url)).await?;
        let info: ApiInfo = response
            .json()
            .await
            .map_err(|e| RemoteError::Fatal(format!("api info is not valid JSON: {e}")))?;

        let manifest = ApiManifest {
            named: info.named_endpoints.keys().cloned().collect(),
            unnamed: info
                .unnamed_endpoints
                .iter()
                .map(|(index, spec)| format!("{index}: {spec}"))
                .collect(),
        };
        debug!(named = ?manifest.named, unnamed = manifest.unnamed.len(), "manifest fetched");
        Ok(manifest)
    }

    #[instrument(skip(self, data), fields(endpoint = %self.endpoint))]
    async fn call(&self, api_name: &str, data: Vec<Value>) -> Result<Vec<Value>, RemoteError> {
        let name = api_name.trim_start_matches('/');
        let queue_url = format!("{}/gradio_api/call/{name}", self.base_url);

        let request = self
            .client
            .post(&queue_url)
            .json(&serde_json::json!({ "data": data }));
        let queued: QueuedCall = self
            .checked(api_name, request)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::Fatal(format!("{api_name}: no event id in reply: {e}")))?;

        debug!(event_id = %queued.event_id, "call queued");

        let result_url = format!("{queue_url}/{}", queued.event_id);
        let response = self.checked(api_name, self.client.get(&result_url)).await?;

        let mut parser = EventStreamParser::default();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| RemoteError::Transient(format!("{api_name}: {e}")))?;
            for event in parser.push(&chunk) {
                if let Some(outcome) = event.outcome(api_name) {
                    return outcome;
                }
            }
        }
        for event in parser.finish() {
            if let Some(outcome) = event.outcome(api_name) {
                return outcome;
            }
        }

        Err(RemoteError::Transient(format!(
            "{api_name}: event stream ended without a result"
        )))
    }

    #[instrument(skip(self, bytes), fields(endpoint = %self.endpoint, size = bytes.len()))]
    async fn upload(&self, bytes: Vec<u8>, filename: &str) -> Result<UploadedFile, RemoteError> {
        let url = format!("{}/gradio_api/upload", self.base_url);
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("files", part);

        let paths: Vec<String> = self
            .checked("upload", self.client.post(&url).multipart(form))
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::Fatal(format!("upload reply is not a path list: {e}")))?;

        let path = paths
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::Fatal("upload reply contained no paths".to_string()))?;

        Ok(UploadedFile {
            path,
            orig_name: filename.to_string(),
        })
    }

    fn file_url(&self, path: &str) -> String {
        format!("{}/gradio_api/file={path}", self.base_url)
    }
}

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub event: String,
    pub data: String,
}

impl StreamEvent {
    /// Terminal events resolve the call; everything else is progress.
    fn outcome(&self, api_name: &str) -> Option<Result<Vec<Value>, RemoteError>> {
        match self.event.as_str() {
            "complete" => Some(serde_json::from_str::<Vec<Value>>(&self.data).map_err(|e| {
                RemoteError::Fatal(format!("{api_name}: result is not a JSON array: {e}"))
            })),
            "error" => Some(Err(RemoteError::Transient(error_message(api_name, &self.data)))),
            _ => None,
        }
    }
}

fn error_message(api_name: &str, data: &str) -> String {
    let text = match serde_json::from_str::<Value>(data) {
        Ok(Value::String(s)) => s,
        Ok(Value::Null) | Err(_) if data.trim().is_empty() || data.trim() == "null" => {
            "remote reported an error without details".to_string()
        }
        Ok(Value::Object(map)) => map
            .get("message")
            .or_else(|| map.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| data.to_string()),
        _ => data.to_string(),
    };
    format!("{api_name}: {text}")
}

/// Incremental `text/event-stream` parser. Chunk boundaries may fall
/// anywhere, including inside a UTF-8 sequence.
#[derive(Debug, Default)]
pub struct EventStreamParser {
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl EventStreamParser {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(event) = self.line(line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing event that was not followed by a blank line.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string();
            if let Some(event) = self.line(&line) {
                events.push(event);
            }
        }
        if let Some(event) = self.dispatch() {
            events.push(event);
        }
        events
    }

    fn line(&mut self, line: &str) -> Option<StreamEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<StreamEvent> {
        if self.event.is_none() && self.data.is_empty() {
            return None;
        }
        let event = StreamEvent {
            event: self.event.take().unwrap_or_else(|| "message".to_string()),
            data: std::mem::take(&mut self.data).join("\n"),
        };
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_name_maps_to_space_subdomain() {
        assert_eq!(
            resolve_base_url("tencent/Hunyuan3D-2").unwrap(),
            "https://tencent-hunyuan3d-2.hf.space"
        );
        assert_eq!(
            resolve_base_url("black-forest-labs/FLUX.1-schnell").unwrap(),
            "https://black-forest-labs-flux-1-schnell.hf.space"
        );
        assert_eq!(
            resolve_base_url("someone/my_space").unwrap(),
            "https://someone-my-space.hf.space"
        );
    }

    #[test]
    fn urls_pass_through() {
        assert_eq!(
            resolve_base_url("http://127.0.0.1:7860/").unwrap(),
            "http://127.0.0.1:7860"
        );
    }

    #[test]
    fn bare_names_are_rejected() {
        assert!(matches!(resolve_base_url("trellis"), Err(RemoteError::Fatal(_))));
        assert!(resolve_base_url("a/b/c").is_err());
    }

    #[test]
    fn status_classification() {
        assert!(classify_status("x", StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify_status("x", StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(!classify_status("x", StatusCode::NOT_FOUND, "").is_transient());
        assert!(!classify_status("x", StatusCode::UNPROCESSABLE_ENTITY, "").is_transient());
    }

    #[test]
    fn parser_handles_split_chunks() {
        let mut parser = EventStreamParser::default();
        assert!(parser.push(b"event: gener").is_empty());
        assert!(parser.push(b"ating\ndata: null\n").is_empty());
        let events = parser.push(b"\nevent: complete\ndata: [\"a\", 1]\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "generating");
        assert_eq!(events[1].event, "complete");
        assert_eq!(
            events[1].outcome("/x"),
            Some(Ok(vec![Value::from("a"), Value::from(1)]))
        );
    }

    #[test]
    fn error_events_are_transient_and_keep_the_message() {
        let event = StreamEvent {
            event: "error".into(),
            data: "\"You have exceeded your GPU quota. Please retry in 0:01:30\"".into(),
        };
        match event.outcome("/generation_all") {
            Some(Err(RemoteError::Transient(msg))) => {
                assert!(msg.contains("retry in 0:01:30"));
                assert!(msg.starts_with("/generation_all"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn null_error_payload_gets_a_message() {
        assert_eq!(
            error_message("/infer", "null"),
            "/infer: remote reported an error without details"
        );
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut parser = EventStreamParser::default();
        assert!(parser.push(b"event: complete\ndata: []").is_empty());
        let events = parser.finish();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "[]");
    }
}
