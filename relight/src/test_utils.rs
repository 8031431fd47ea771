//! Test doubles and builders shared by unit tests.

use async_trait::async_trait;
use axum_test::TestServer;
use bytes::Bytes;
use prometheus::Registry;
use serde_json::Value;
use std::{
    collections::HashMap,
    io,
    sync::{
        Arc, Mutex, Once,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use crate::{
    AppState,
    config::{Config, StorageConfig},
    metrics::PipelineMetrics,
    pipeline::Pipeline,
    storage::{ObjectStore, StorageError, key_from_url, public_url},
    vendor::{GenerationClient, GenerationRequest, GenerationResult, PollPolicy, VendorError},
};

/// reqwest is built without a default crypto provider
pub fn install_crypto_provider() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

pub fn create_test_config() -> Config {
    Config {
        stability_key: Some("sk-test".to_string()),
        storage: StorageConfig {
            bucket: Some("bucket".to_string()),
            ..Default::default()
        },
        enable_metrics: false,
        ..Default::default()
    }
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    pub data: Bytes,
}

/// JSON log lines written by a scoped subscriber, one object per event.
///
/// Each event carries its enclosing span under `span`, with the span's fields flattened next to
/// its `name`.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CapturedLogs {
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + 'static {
        let writer = self.clone();
        tracing_subscriber::fmt()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || writer.clone())
            .finish()
    }

    pub fn events(&self) -> Vec<Value> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8_lossy(&bytes)
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    /// Events whose message or any field mentions `needle`
    pub fn mentioning(&self, needle: &str) -> Vec<Value> {
        self.events()
            .into_iter()
            .filter(|event| event["fields"].to_string().contains(needle))
            .collect()
    }
}

/// Object store keyed by URL path. Results are addressed as `https://{bucket}.example/{key}`.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashMap<String, Bytes>>,
    writes: Mutex<Vec<StoredObject>>,
    fail_uploads: AtomicBool,
}

impl InMemoryObjectStore {
    pub fn insert(&self, key: &str, data: impl Into<Bytes>) {
        self.objects.lock().unwrap().insert(key.to_string(), data.into());
    }

    pub fn fail_uploads(&self) {
        self.fail_uploads.store(true, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<StoredObject> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn fetch(&self, url: &str) -> Result<Bytes, StorageError> {
        let key = key_from_url(url)?;
        self.objects
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or(StorageError::NotFound {
                bucket: "bucket".to_string(),
                key,
            })
    }

    async fn store(&self, bytes: Bytes, bucket: &str, key: &str) -> Result<String, StorageError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StorageError::Put {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: "access denied".to_string(),
            });
        }
        self.writes.lock().unwrap().push(StoredObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            data: bytes,
        });
        Ok(public_url(bucket, "example", key))
    }
}

#[derive(Clone)]
pub enum StubOutcome {
    Finished(GenerationResult),
    TimedOut,
    Panic,
}

/// Vendor double that records each call and answers with a fixed outcome.
pub struct StubGenerationClient {
    outcome: StubOutcome,
    requests: Mutex<Vec<(String, GenerationRequest)>>,
}

impl StubGenerationClient {
    pub fn new(outcome: StubOutcome) -> Self {
        Self {
            outcome,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn finished(status: u16, finish_reason: Option<&str>, body: &[u8]) -> Self {
        Self::new(StubOutcome::Finished(GenerationResult {
            image: Bytes::copy_from_slice(body),
            status,
            finish_reason: finish_reason.map(str::to_string),
        }))
    }

    pub fn timed_out() -> Self {
        Self::new(StubOutcome::TimedOut)
    }

    pub fn panicking() -> Self {
        Self::new(StubOutcome::Panic)
    }

    pub fn requests(&self) -> Vec<(String, GenerationRequest)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationClient for StubGenerationClient {
    async fn submit_and_wait(
        &self,
        endpoint: &str,
        request: GenerationRequest,
        policy: PollPolicy,
    ) -> Result<GenerationResult, VendorError> {
        self.requests.lock().unwrap().push((endpoint.to_string(), request));
        match &self.outcome {
            StubOutcome::Finished(result) => Ok(result.clone()),
            StubOutcome::TimedOut => Err(VendorError::Timeout {
                elapsed: policy.timeout + Duration::from_secs(1),
            }),
            StubOutcome::Panic => panic!("stub vendor panicked"),
        }
    }
}

/// A pipeline wired to in-memory doubles and a fresh metrics registry.
pub struct TestHarness {
    pub store: Arc<InMemoryObjectStore>,
    pub vendor: Arc<StubGenerationClient>,
    pub metrics: PipelineMetrics,
}

impl TestHarness {
    pub fn new(vendor: StubGenerationClient) -> Self {
        let registry = Registry::new();
        Self {
            store: Arc::new(InMemoryObjectStore::default()),
            vendor: Arc::new(vendor),
            metrics: PipelineMetrics::new(&registry).expect("Failed to create metrics"),
        }
    }

    /// Vendor returns 200 with body `edited` and finish reason `SUCCESS`
    pub fn succeeding() -> Self {
        Self::new(StubGenerationClient::finished(200, Some("SUCCESS"), b"edited"))
    }

    pub fn with_vendor_result(status: u16, finish_reason: Option<&str>, body: &[u8]) -> Self {
        Self::new(StubGenerationClient::finished(status, finish_reason, body))
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::builder()
            .store(self.store.clone())
            .vendor(self.vendor.clone())
            .metrics(Arc::new(self.metrics.clone()))
            .bucket("bucket")
            .build()
    }

    pub fn state(&self, config: Config) -> AppState {
        AppState::builder()
            .config(config)
            .pipeline(Arc::new(self.pipeline()))
            .metrics(Arc::new(self.metrics.clone()))
            .registry(self.metrics.registry().clone())
            .build()
    }

    pub fn server(&self) -> TestServer {
        let router = crate::build_router(&self.state(create_test_config())).expect("Failed to build router");
        TestServer::new(router).expect("Failed to create test server")
    }
}

/// Test server backed by a succeeding vendor stub and an empty store
pub fn create_test_server() -> (TestServer, TestHarness) {
    let harness = TestHarness::succeeding();
    (harness.server(), harness)
}
