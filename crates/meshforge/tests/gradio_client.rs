use meshforge::backend::{GradioClient, RemoteBackend, RemoteError};
use meshforge::detect::{detect, BackendVariant};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer, token: Option<&str>) -> GradioClient {
    GradioClient::new(
        &server.uri(),
        token.map(str::to_string),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn event_stream(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/event-stream")
}

#[tokio::test]
async fn manifest_lists_named_and_unnamed_operations() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gradio_api/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "named_endpoints": {
                "/generation_all": {"parameters": []},
                "/on_gen_mode_change": {"parameters": []}
            },
            "unnamed_endpoints": {
                "3": {"fn": "shape_generation"}
            }
        })))
        .mount(&server)
        .await;

    let manifest = client(&server, None).manifest().await.unwrap();
    assert!(manifest.named.contains(&"/generation_all".to_string()));
    assert_eq!(manifest.unnamed.len(), 1);
    assert!(manifest.unnamed[0].starts_with("3: "));
    assert!(manifest.unnamed[0].contains("shape_generation"));
}

#[tokio::test]
async fn opaque_url_is_detected_from_live_manifest() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gradio_api/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "named_endpoints": {"/image_to_3d": {}, "/extract_glb": {}},
            "unnamed_endpoints": {}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = client(&server, None);
    let variant = detect(&backend, Duration::from_secs(5)).await.unwrap();
    assert_eq!(variant, BackendVariant::Trellis);
}

#[tokio::test]
async fn call_queues_then_reads_the_event_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/gradio_api/call/generation_all"))
        .and(body_json(json!({"data": ["a chair", 30]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"event_id": "abc123"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gradio_api/call/generation_all/abc123"))
        .respond_with(event_stream(
            "event: generating\ndata: null\n\n\
             event: heartbeat\ndata: null\n\n\
             event: complete\n\
             data: [{\"path\": \"/tmp/white.glb\"}, {\"path\": \"/tmp/textured.glb\"}]\n\n",
        ))
        .mount(&server)
        .await;

    let outputs = client(&server, None)
        .call("/generation_all", vec![json!("a chair"), json!(30)])
        .await
        .unwrap();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[1]["path"], "/tmp/textured.glb");
}

#[tokio::test]
async fn error_event_is_transient_and_keeps_quota_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/gradio_api/call/infer"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"event_id": "e1"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gradio_api/call/infer/e1"))
        .respond_with(event_stream(
            "event: error\ndata: \"You have exceeded your GPU quota. Please retry in 0:01:30\"\n\n",
        ))
        .mount(&server)
        .await;

    let err = client(&server, None)
        .call("/infer", vec![json!("x")])
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert!(err.message().contains("retry in 0:01:30"), "{}", err.message());
}

#[tokio::test]
async fn status_codes_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/gradio_api/call/busy"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/gradio_api/call/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/gradio_api/call/crashed"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let backend = client(&server, None);
    let busy = backend.call("/busy", vec![]).await.unwrap_err();
    assert!(matches!(busy, RemoteError::Transient(ref m) if m.contains("slow down")));
    assert!(!backend.call("/missing", vec![]).await.unwrap_err().is_transient());
    assert!(backend.call("/crashed", vec![]).await.unwrap_err().is_transient());
}

#[tokio::test]
async fn upload_sends_bearer_token_and_returns_server_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/gradio_api/upload"))
        .and(header("authorization", "Bearer hf_test"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!(["/tmp/gradio/123/reference.png"])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let backend = client(&server, Some("hf_test"));
    let uploaded = backend
        .upload(b"\x89PNG\r\n\x1a\n".to_vec(), "reference.png")
        .await
        .unwrap();
    assert_eq!(uploaded.path, "/tmp/gradio/123/reference.png");
    assert_eq!(uploaded.to_file_data()["meta"]["_type"], "gradio.FileData");
    assert_eq!(
        backend.file_url(&uploaded.path),
        format!("{}/gradio_api/file=/tmp/gradio/123/reference.png", server.uri())
    );
}

#[tokio::test]
async fn stream_without_result_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/gradio_api/call/shape_generation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"event_id": "e9"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gradio_api/call/shape_generation/e9"))
        .respond_with(event_stream("event: heartbeat\ndata: null\n\n"))
        .mount(&server)
        .await;

    let err = client(&server, None)
        .call("/shape_generation", vec![])
        .await
        .unwrap_err();
    assert!(err.is_transient());
}
