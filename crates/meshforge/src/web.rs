//! HTTP surface for meshforge.
//!
//! Tool calls, operation status, asset resources and a server-sent event
//! stream of resource-list changes, all backed by one [`ForgeContext`].

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, info};

use crate::error::ForgeError;
use crate::operations::OperationId;
use crate::service::{ForgeContext, Generate3dRequest, GenerateImageRequest};

/// Header naming the caller for rate limiting.
pub const CLIENT_HEADER: &str = "x-client-id";
const ANONYMOUS: &str = "anonymous";

pub fn router(ctx: Arc<ForgeContext>) -> Router {
    Router::new()
        .route("/", get(serve_root))
        .route("/health", get(health))
        .route("/tools/generate_image", post(generate_image))
        .route("/tools/generate_3d_asset", post(generate_3d_asset))
        .route("/operations", get(list_operations))
        .route("/operations/{id}", get(operation_status))
        .route("/resources", get(list_resources))
        .route("/resources/read", get(read_resource))
        .route("/resources/events", get(resource_events))
        .with_state(ctx)
}

impl IntoResponse for ForgeError {
    fn into_response(self) -> Response {
        let code = self.code();
        let status = match code {
            "validation_error" => StatusCode::BAD_REQUEST,
            "not_found" => StatusCode::NOT_FOUND,
            "rate_limited" => StatusCode::TOO_MANY_REQUESTS,
            "transient_remote_error" | "quota_exceeded" | "remote_error" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, code, "Request failed");
        }

        let retry_after = match &self {
            ForgeError::RateLimited {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        };
        let body = Json(serde_json::json!({
            "error": {"code": code, "message": self.to_string()}
        }));

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

fn client_key(headers: &HeaderMap) -> String {
    headers
        .get(CLIENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS)
        .to_string()
}

async fn serve_root() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "meshforge",
        "version": env!("CARGO_PKG_VERSION"),
        "links": {
            "health": "/health",
            "generate_image": "/tools/generate_image",
            "generate_3d_asset": "/tools/generate_3d_asset",
            "operations": "/operations",
            "resources": "/resources",
            "events": "/resources/events",
        }
    }))
}

async fn health(State(ctx): State<Arc<ForgeContext>>) -> impl IntoResponse {
    Json(ctx.status())
}

async fn generate_image(
    State(ctx): State<Arc<ForgeContext>>,
    headers: HeaderMap,
    Json(request): Json<GenerateImageRequest>,
) -> Result<Response, ForgeError> {
    let stored = ctx.generate_image(&client_key(&headers), request).await?;
    Ok(Json(stored).into_response())
}

async fn generate_3d_asset(
    State(ctx): State<Arc<ForgeContext>>,
    headers: HeaderMap,
    Json(request): Json<Generate3dRequest>,
) -> Result<Response, ForgeError> {
    let ack = ctx.generate_3d_asset(&client_key(&headers), request)?;
    Ok((StatusCode::ACCEPTED, Json(ack)).into_response())
}

async fn list_operations(State(ctx): State<Arc<ForgeContext>>) -> impl IntoResponse {
    Json(ctx.list_operations())
}

async fn operation_status(
    State(ctx): State<Arc<ForgeContext>>,
    Path(id): Path<String>,
) -> Result<Response, ForgeError> {
    let id: OperationId = id
        .parse()
        .map_err(|_| ForgeError::validation(format!("invalid operation id: {id}")))?;
    Ok(Json(ctx.operation_status(id)?).into_response())
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(rename = "type")]
    asset_type: Option<String>,
}

async fn list_resources(
    State(ctx): State<Arc<ForgeContext>>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ForgeError> {
    let records = ctx.list_assets(query.asset_type.as_deref()).await?;
    Ok(Json(records).into_response())
}

#[derive(Debug, Deserialize)]
struct ReadQuery {
    uri: String,
}

async fn read_resource(
    State(ctx): State<Arc<ForgeContext>>,
    Query(query): Query<ReadQuery>,
) -> Result<Response, ForgeError> {
    let (record, bytes) = ctx.read_asset(&query.uri).await?;
    Ok(([(header::CONTENT_TYPE, record.mime_type)], bytes).into_response())
}

/// One SSE stream per listener, each with its own broadcast receiver.
async fn resource_events(
    State(ctx): State<Arc<ForgeContext>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("SSE listener connected");

    let stream = BroadcastStream::new(ctx.notifier.subscribe()).filter_map(|result| {
        match result {
            Ok(event) => Some(Ok(Event::default().event(event.name()).data("{}"))),
            Err(e) => {
                debug!("Notification receive error: {}", e);
                None
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("ping"),
    )
}
