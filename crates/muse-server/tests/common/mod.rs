//! Shared helpers for the Muse server integration tests
//!
//! Builds the full router over the in-memory backends with a running ingest
//! orchestrator, so tests exercise the same wiring as `main`.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use muse_server::{
    api,
    config::{Config, PipelineConfig, UploadConfig},
    features::FeatureState,
    ingest::{IngestOrchestrator, PipelineContext},
    objects::MemoryObjectStore,
    repository::Repository,
    search::MemorySearchIndexer,
    table::MemoryItemStore,
};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tower::ServiceExt;
use uuid::Uuid;

pub struct TestApp {
    pub router: Router,
    pub repo: Repository,
    pub objects: MemoryObjectStore,
    pub indexer: MemorySearchIndexer,
}

/// Pipeline settings tuned for tests: short backoff, small pool.
pub fn fast_pipeline() -> PipelineConfig {
    PipelineConfig {
        host_timeout_secs: 10,
        stage_timeout_secs: 2,
        max_attempts: 3,
        retry_base_ms: 1,
        workers: 2,
        queue_depth: 16,
    }
}

impl TestApp {
    pub fn spawn() -> Self {
        let repo = Repository::new(Arc::new(MemoryItemStore::new()));
        let objects = MemoryObjectStore::default();
        let indexer = MemorySearchIndexer::new();

        let ctx = PipelineContext::new(
            repo.clone(),
            Arc::new(objects.clone()),
            Arc::new(indexer.clone()),
            fast_pipeline(),
        );
        let orchestrator = Arc::new(IngestOrchestrator::new(ctx));
        let (pipeline, _task) = orchestrator.start();

        let state = FeatureState {
            repo: repo.clone(),
            objects: Arc::new(objects.clone()),
            pipeline,
            uploads: UploadConfig::default(),
        };
        let router = api::create_router(state, &Config::default().cors);

        Self {
            router,
            repo,
            objects,
            indexer,
        }
    }

    /// Send a request as `owner` and return the status with the parsed body.
    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        owner: Option<Uuid>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(owner) = owner {
            builder = builder
                .header("x-user-id", owner.to_string())
                .header("x-user-email", format!("{}@example.com", owner.simple()));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    /// Presign, place the payload where the client would PUT it, and
    /// confirm. Returns the upload id.
    pub async fn upload(&self, owner: Uuid, file_name: &str, bytes: Vec<u8>) -> String {
        let (status, body) = self
            .send(
                "POST",
                "/api/v1/uploads/presign",
                Some(owner),
                Some(serde_json::json!({
                    "file_name": file_name,
                    "file_size": bytes.len(),
                    "content_type": "audio/wav",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        let upload_id = body["data"]["upload_id"].as_str().unwrap().to_string();

        let key = format!("uploads/{}/{}/{}", owner, upload_id, file_name);
        self.objects.insert(&key, bytes, "audio/wav").await;

        let (status, body) = self
            .send(
                "POST",
                &format!("/api/v1/uploads/{}/confirm", upload_id),
                Some(owner),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        upload_id
    }

    /// Poll the status endpoint until the upload is terminal.
    pub async fn wait_terminal(&self, owner: Uuid, upload_id: &str) -> Value {
        for _ in 0..300 {
            let (status, body) = self
                .send(
                    "GET",
                    &format!("/api/v1/uploads/{}", upload_id),
                    Some(owner),
                    None,
                )
                .await;
            assert_eq!(status, StatusCode::OK);
            let data = body["data"].clone();
            if matches!(data["status"].as_str(), Some("completed" | "failed")) {
                return data;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("upload {} never finished", upload_id);
    }
}

/// Minimal mono PCM WAV payload of the given length.
pub fn wav_bytes(seconds: u32) -> Vec<u8> {
    const SAMPLE_RATE: u32 = 8_000;
    const BLOCK_ALIGN: u16 = 2;
    let data_len = SAMPLE_RATE * u32::from(BLOCK_ALIGN) * seconds;

    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVEfmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    out.extend_from_slice(&(SAMPLE_RATE * u32::from(BLOCK_ALIGN)).to_le_bytes());
    out.extend_from_slice(&BLOCK_ALIGN.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.resize(44 + data_len as usize, 0);
    out
}
