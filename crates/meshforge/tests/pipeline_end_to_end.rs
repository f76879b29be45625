mod common;

use common::*;
use meshforge::backend::RemoteError;
use meshforge::operations::OperationStatus;
use meshforge::pipeline::{PipelineIo, PipelineRegistry};
use meshforge::service::{Generate3dRequest, GenerateImageRequest, GenerationOverrides};
use meshforge::{BackendVariant, ForgeError};
use serde_json::json;
use tokio::sync::broadcast::error::TryRecvError;

fn request(prompt: &str) -> Generate3dRequest {
    Generate3dRequest {
        prompt: prompt.to_string(),
        overrides: GenerationOverrides::default(),
    }
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<meshforge::notify::ResourceEvent>) -> usize {
    let mut count = 0;
    loop {
        match rx.try_recv() {
            Ok(_) => count += 1,
            Err(TryRecvError::Lagged(n)) => count += n as usize,
            Err(TryRecvError::Empty | TryRecvError::Closed) => return count,
        }
    }
}

#[tokio::test]
async fn trellis_job_completes_with_four_assets() {
    let mesh = ScriptedBackend::new("JeffreyXiang/TRELLIS");
    mesh.respond("/preprocess_image", Ok(vec![json!(PNG_URI)]))
        .respond(
            "/image_to_3d",
            Ok(vec![json!({"video": MP4_URI, "subtitles": null})]),
        )
        .respond("/extract_glb", Ok(vec![json!(GLB_URI), json!(GLB_URI)]));
    let h = harness(BackendVariant::Trellis, mesh);
    let mut events = h.ctx.notifier.subscribe();

    let ack = h.ctx.generate_3d_asset("tester", request("a wooden chair")).unwrap();
    assert_eq!(ack.status, OperationStatus::Started);

    let op = wait_terminal(&h.ctx, ack.operation_id).await;
    assert_eq!(op.status, OperationStatus::Completed, "events: {:?}", op.events);
    assert_eq!(
        h.mesh.calls(),
        vec!["/preprocess_image", "/image_to_3d", "/extract_glb"]
    );
    assert_eq!(h.mesh.uploads(), vec!["reference.png"]);
    assert_eq!(drain(&mut events), 4);

    let sampling = h.mesh.data_for("/image_to_3d").unwrap();
    assert_eq!(sampling[3], json!(7.5));
    assert_eq!(sampling[4], json!(12));

    let models = h.ctx.list_assets(Some("3d_model")).await.unwrap();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].origin.as_deref(), Some("trellis"));
    assert_eq!(h.ctx.list_assets(Some("video")).await.unwrap().len(), 1);
    assert_eq!(h.ctx.list_assets(Some("image")).await.unwrap().len(), 2);

    let result = op.result.unwrap();
    let (_, bytes) = h
        .ctx
        .read_asset(result["model_uri"].as_str().unwrap())
        .await
        .unwrap();
    assert_eq!(bytes, b"glTF");
}

#[tokio::test]
async fn trellis_skips_preprocessing_without_background_removal() {
    let mesh = ScriptedBackend::new("JeffreyXiang/TRELLIS");
    mesh.respond(
        "/image_to_3d",
        Ok(vec![json!({"video": MP4_URI, "subtitles": null})]),
    )
    .respond("/extract_glb", Ok(vec![json!(GLB_URI)]));
    let h = harness(BackendVariant::Trellis, mesh);
    let mut events = h.ctx.notifier.subscribe();

    let ack = h
        .ctx
        .generate_3d_asset(
            "tester",
            Generate3dRequest {
                prompt: "a stone bench".into(),
                overrides: GenerationOverrides {
                    remove_background: Some(false),
                    ..Default::default()
                },
            },
        )
        .unwrap();
    let op = wait_terminal(&h.ctx, ack.operation_id).await;

    assert_eq!(op.status, OperationStatus::Completed, "events: {:?}", op.events);
    assert_eq!(h.mesh.calls(), vec!["/image_to_3d", "/extract_glb"]);
    let sampling = h.mesh.data_for("/image_to_3d").unwrap();
    assert_eq!(sampling[0]["path"], json!("/tmp/gradio/reference.png"));
    assert_eq!(h.ctx.list_assets(Some("image")).await.unwrap().len(), 1);
    assert_eq!(drain(&mut events), 3);
}

#[tokio::test]
async fn hunyuan_default_request_uses_pipeline_settings() {
    let mesh = ScriptedBackend::new("tencent/Hunyuan3D-2");
    mesh.respond("/generation_all", Ok(vec![json!(GLB_URI), json!(GLB_URI)]));
    let h = harness(BackendVariant::Hunyuan3d, mesh);

    let ack = h.ctx.generate_3d_asset("tester", request("a drum")).unwrap();
    let op = wait_terminal(&h.ctx, ack.operation_id).await;

    assert_eq!(op.status, OperationStatus::Completed, "events: {:?}", op.events);
    let data = h.mesh.data_for("/generation_all").unwrap();
    assert_eq!(data[6], json!(30));
    assert_eq!(data[7], json!(5.0));
    assert_eq!(data[9], json!(256));
}

#[tokio::test]
async fn configured_steps_replace_pipeline_defaults() {
    let mut config = test_config();
    config.generation.steps = Some(20);
    let mesh = ScriptedBackend::new("tencent/Hunyuan3D-2mini-Turbo");
    mesh.respond("/shape_generation", Ok(vec![json!(GLB_URI)]))
        .respond("/on_export_click", Ok(vec![json!("<html>"), json!(GLB_URI)]));
    let h = harness_with(config, BackendVariant::Hunyuan3dMini, mesh);

    let ack = h.ctx.generate_3d_asset("tester", request("a kettle")).unwrap();
    let op = wait_terminal(&h.ctx, ack.operation_id).await;

    assert_eq!(op.status, OperationStatus::Completed, "events: {:?}", op.events);
    assert_eq!(h.mesh.data_for("/shape_generation").unwrap()[6], json!(20));
}

#[tokio::test]
async fn hunyuan_job_passes_request_parameters() {
    let mesh = ScriptedBackend::new("tencent/Hunyuan3D-2");
    mesh.respond(
        "/generation_all",
        Ok(vec![json!(GLB_URI), json!(GLB_URI), json!("<html>")]),
    );
    let h = harness(BackendVariant::Hunyuan3d, mesh);
    let mut events = h.ctx.notifier.subscribe();

    let ack = h
        .ctx
        .generate_3d_asset(
            "tester",
            Generate3dRequest {
                prompt: "a   red\tlamp".into(),
                overrides: GenerationOverrides {
                    steps: Some(40),
                    seed: Some(99),
                    octree_resolution: Some(384),
                    ..Default::default()
                },
            },
        )
        .unwrap();

    let op = wait_terminal(&h.ctx, ack.operation_id).await;
    assert_eq!(op.status, OperationStatus::Completed, "events: {:?}", op.events);
    assert_eq!(drain(&mut events), 3);

    let data = h.mesh.data_for("/generation_all").unwrap();
    assert_eq!(data[0], json!("a red lamp"));
    assert_eq!(data[1]["path"], json!("/tmp/gradio/reference.png"));
    assert_eq!(data[6], json!(40));
    assert_eq!(data[8], json!(99));
    assert_eq!(data[9], json!(384));
    assert_eq!(data[11], json!(8000));

    let image_data = h.image.data_for("/infer").unwrap();
    assert_eq!(image_data[1], json!(99));

    assert_eq!(h.ctx.list_assets(Some("preview")).await.unwrap().len(), 1);
    assert!(op.result.unwrap()["preview_uri"]
        .as_str()
        .unwrap()
        .starts_with("asset://preview/"));
}

#[tokio::test]
async fn hunyuan_mini_job_exports_after_shape() {
    let mesh = ScriptedBackend::new("tencent/Hunyuan3D-2mini-Turbo");
    mesh.respond("/shape_generation", Ok(vec![json!(GLB_URI), json!("<html>")]))
        .respond("/on_export_click", Ok(vec![json!("<html>"), json!(GLB_URI)]));
    let h = harness(BackendVariant::Hunyuan3dMini, mesh);
    let mut events = h.ctx.notifier.subscribe();

    let ack = h.ctx.generate_3d_asset("tester", request("a mug")).unwrap();
    let op = wait_terminal(&h.ctx, ack.operation_id).await;

    assert_eq!(op.status, OperationStatus::Completed, "events: {:?}", op.events);
    assert_eq!(h.mesh.calls(), vec!["/shape_generation", "/on_export_click"]);
    let export = h.mesh.data_for("/on_export_click").unwrap();
    assert_eq!(export[0], json!(GLB_URI));
    assert_eq!(export[4], json!(10_000));
    let shape = h.mesh.data_for("/shape_generation").unwrap();
    assert_eq!(shape[6], json!(5));
    assert_eq!(shape[7], json!(5.0));
    assert_eq!(drain(&mut events), 3);
}

#[tokio::test]
async fn fatal_backend_error_ends_in_error() {
    let mesh = ScriptedBackend::new("tencent/Hunyuan3D-2");
    mesh.respond(
        "/generation_all",
        Err(RemoteError::Fatal("CUDA out of memory".into())),
    );
    let h = harness(BackendVariant::Hunyuan3d, mesh);

    let ack = h.ctx.generate_3d_asset("tester", request("a boat")).unwrap();
    let op = wait_terminal(&h.ctx, ack.operation_id).await;

    assert_eq!(op.status, OperationStatus::Error);
    let last = op.events.back().unwrap();
    assert!(last.details.contains("CUDA out of memory"), "{}", last.details);
    assert!(op.result.is_none());
    assert_eq!(h.mesh.calls().len(), 1);
}

#[tokio::test]
async fn transient_failures_are_retried_then_surface() {
    let mesh = ScriptedBackend::new("tencent/Hunyuan3D-2");
    for _ in 0..3 {
        mesh.respond(
            "/generation_all",
            Err(RemoteError::Transient("GPU busy".into())),
        );
    }
    let h = harness(BackendVariant::Hunyuan3d, mesh);

    let ack = h.ctx.generate_3d_asset("tester", request("a tree")).unwrap();
    let op = wait_terminal(&h.ctx, ack.operation_id).await;

    assert_eq!(op.status, OperationStatus::Error);
    assert_eq!(h.mesh.calls().len(), 3);
    let waits = op
        .events
        .iter()
        .filter(|e| e.status == OperationStatus::Waiting)
        .count();
    assert_eq!(waits, 2);
    assert!(op.events.back().unwrap().details.contains("GPU busy"));
}

#[tokio::test]
async fn transient_failure_then_success_completes() {
    let mesh = ScriptedBackend::new("tencent/Hunyuan3D-2");
    mesh.respond(
        "/generation_all",
        Err(RemoteError::Transient("connection reset".into())),
    )
    .respond("/generation_all", Ok(vec![json!(GLB_URI), json!(GLB_URI)]));
    let h = harness(BackendVariant::Hunyuan3d, mesh);

    let ack = h.ctx.generate_3d_asset("tester", request("a rock")).unwrap();
    let op = wait_terminal(&h.ctx, ack.operation_id).await;

    assert_eq!(op.status, OperationStatus::Completed);
    assert_eq!(h.mesh.calls().len(), 2);
}

#[tokio::test]
async fn missing_output_is_malformed() {
    let mesh = ScriptedBackend::new("tencent/Hunyuan3D-2");
    mesh.respond("/generation_all", Ok(vec![json!(GLB_URI)]));
    let h = harness(BackendVariant::Hunyuan3d, mesh);

    let ack = h.ctx.generate_3d_asset("tester", request("a cat")).unwrap();
    let op = wait_terminal(&h.ctx, ack.operation_id).await;

    assert_eq!(op.status, OperationStatus::Error);
    assert!(op
        .events
        .back()
        .unwrap()
        .details
        .contains("unexpected response"));
}

#[tokio::test]
async fn unknown_variant_is_rejected_before_starting() {
    let h = harness(BackendVariant::Unknown, ScriptedBackend::new("someone/thing"));

    let err = h.ctx.generate_3d_asset("tester", request("a cube")).unwrap_err();
    assert!(matches!(
        err,
        ForgeError::UnsupportedBackend(BackendVariant::Unknown)
    ));
    assert!(h.ctx.list_operations().is_empty());
}

#[tokio::test]
async fn empty_registry_dispatch_is_unsupported() {
    let h = harness(BackendVariant::Trellis, ScriptedBackend::new("JeffreyXiang/TRELLIS"));
    let request = h
        .ctx
        .build_request("a vase", &GenerationOverrides::default())
        .unwrap();
    let io = PipelineIo {
        mesh: h.mesh.as_ref(),
        image: h.image.as_ref(),
        invoker: &h.ctx.invoker,
        store: &h.ctx.store,
        notifier: &h.ctx.notifier,
        tracker: &h.ctx.tracker,
        operation: None,
    };

    let err = PipelineRegistry::new()
        .dispatch(BackendVariant::Trellis, &request, &io)
        .await
        .unwrap_err();
    assert!(matches!(err, ForgeError::UnsupportedBackend(_)));
    assert!(h.mesh.calls().is_empty());
}

#[tokio::test]
async fn out_of_range_overrides_are_validation_errors() {
    let h = harness(BackendVariant::Hunyuan3d, ScriptedBackend::new("tencent/Hunyuan3D-2"));
    let err = h
        .ctx
        .generate_3d_asset(
            "tester",
            Generate3dRequest {
                prompt: "a car".into(),
                overrides: GenerationOverrides {
                    octree_resolution: Some(1000),
                    ..Default::default()
                },
            },
        )
        .unwrap_err();
    assert!(matches!(err, ForgeError::Validation(_)));
    assert!(h.ctx.list_operations().is_empty());
}

#[tokio::test]
async fn image_tool_stores_a_validated_image() {
    let h = harness(BackendVariant::Hunyuan3d, ScriptedBackend::new("tencent/Hunyuan3D-2"));
    let stored = h
        .ctx
        .generate_image(
            "tester",
            GenerateImageRequest {
                prompt: "a sunset".into(),
                seed: Some(5),
            },
        )
        .await
        .unwrap();

    assert_eq!(stored.record.asset_type.as_deref(), Some("image"));
    assert_eq!(stored.record.mime_type, "image/png");
    assert!(h.ctx.list_operations().is_empty());
    assert!(h.mesh.calls().is_empty());
}

#[tokio::test]
async fn image_tool_rejects_non_image_output() {
    let h = harness(BackendVariant::Hunyuan3d, ScriptedBackend::new("tencent/Hunyuan3D-2"));
    // Replace the canned PNG replies with a text payload.
    let image = ScriptedBackend::new("flux");
    image.respond("/infer", Ok(vec![json!("not an image")]));
    let ctx = meshforge::ForgeContext::new(
        &test_config(),
        BackendVariant::Hunyuan3d,
        h.mesh.clone(),
        std::sync::Arc::new(image),
        h.ctx.store.clone(),
    );
    let mut events = ctx.notifier.subscribe();

    let err = ctx
        .generate_image(
            "tester",
            GenerateImageRequest {
                prompt: "a sunset".into(),
                seed: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ForgeError::Validation(_)), "{err:?}");
    assert!(ctx.list_assets(None).await.unwrap().is_empty());
    assert_eq!(drain(&mut events), 0);
}
