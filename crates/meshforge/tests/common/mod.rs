#![allow(dead_code)]

use assetstore::AssetStore;
use async_trait::async_trait;
use forgeconf::ForgeConfig;
use meshforge::backend::{ApiManifest, RemoteBackend, RemoteError, UploadedFile};
use meshforge::operations::{Operation, OperationId};
use meshforge::{BackendVariant, ForgeContext};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// `\x89PNG\r\n\x1a\n`
pub const PNG_URI: &str = "data:image/png;base64,iVBORw0KGgo=";
/// `glTF`
pub const GLB_URI: &str = "data:model/gltf-binary;base64,Z2xURg==";
/// `ftyp`
pub const MP4_URI: &str = "data:video/mp4;base64,ZnR5cA==";

/// A backend that replays queued responses per operation and logs calls.
pub struct ScriptedBackend {
    endpoint: String,
    responses: Mutex<HashMap<String, VecDeque<Result<Vec<Value>, RemoteError>>>>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
    uploads: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            responses: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(&self, api_name: &str, result: Result<Vec<Value>, RemoteError>) -> &Self {
        self.responses
            .lock()
            .unwrap()
            .entry(api_name.to_string())
            .or_default()
            .push_back(result);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn data_for(&self, api_name: &str) -> Option<Vec<Value>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|(name, _)| name == api_name)
            .map(|(_, data)| data.clone())
    }

    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteBackend for ScriptedBackend {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn manifest(&self) -> Result<ApiManifest, RemoteError> {
        Ok(ApiManifest::default())
    }

    async fn call(&self, api_name: &str, data: Vec<Value>) -> Result<Vec<Value>, RemoteError> {
        self.calls
            .lock()
            .unwrap()
            .push((api_name.to_string(), data));
        self.responses
            .lock()
            .unwrap()
            .get_mut(api_name)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(RemoteError::Fatal(format!("no scripted reply for {api_name}"))))
    }

    async fn upload(&self, _bytes: Vec<u8>, filename: &str) -> Result<UploadedFile, RemoteError> {
        self.uploads.lock().unwrap().push(filename.to_string());
        Ok(UploadedFile {
            path: format!("/tmp/gradio/{filename}"),
            orig_name: filename.to_string(),
        })
    }

    fn file_url(&self, path: &str) -> String {
        format!("https://scripted.invalid/gradio_api/file={path}")
    }
}

/// Image backend that always returns a tiny PNG.
pub fn image_backend() -> Arc<ScriptedBackend> {
    let image = Arc::new(ScriptedBackend::new("black-forest-labs/FLUX.1-schnell"));
    for _ in 0..8 {
        image.respond("/infer", Ok(vec![json!(PNG_URI), json!(1234)]));
    }
    image
}

pub fn test_config() -> ForgeConfig {
    let mut config = ForgeConfig::default();
    config.retry.max_retries = 2;
    config.retry.initial_delay_ms = 1;
    config
}

pub struct Harness {
    pub ctx: Arc<ForgeContext>,
    pub mesh: Arc<ScriptedBackend>,
    pub image: Arc<ScriptedBackend>,
    _dir: TempDir,
}

pub fn harness(variant: BackendVariant, mesh: ScriptedBackend) -> Harness {
    harness_with(test_config(), variant, mesh)
}

pub fn harness_with(
    config: ForgeConfig,
    variant: BackendVariant,
    mesh: ScriptedBackend,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let store = AssetStore::open(dir.path().join("assets")).unwrap();
    let mesh = Arc::new(mesh);
    let image = image_backend();
    let ctx = ForgeContext::new(
        &config,
        variant,
        mesh.clone() as Arc<dyn RemoteBackend>,
        image.clone() as Arc<dyn RemoteBackend>,
        store,
    );
    Harness {
        ctx: Arc::new(ctx),
        mesh,
        image,
        _dir: dir,
    }
}

/// Poll until the operation reaches COMPLETED or ERROR.
pub async fn wait_terminal(ctx: &ForgeContext, id: OperationId) -> Operation {
    for _ in 0..500 {
        if let Ok(op) = ctx.operation_status(id) {
            if op.status.is_terminal() {
                return op;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("operation {id} never finished: {:?}", ctx.operation_status(id));
}
