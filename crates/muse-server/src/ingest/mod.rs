//! Upload ingestion pipeline
//!
//! A confirmed upload runs through six stages in order: metadata, cover art,
//! track record, relocation, indexing, finalization. Each stage is an
//! idempotent step keyed by `(owner, upload)`:
//!
//! - a stage whose completion flag is already set is skipped
//! - a stage whose prerequisites are missing is rejected
//! - a stage's outputs and its flag land in one conditional upload write
//!
//! The [`IngestOrchestrator`] drives uploads through the stages on a bounded
//! worker pool, retrying transient failures and recording a terminal
//! `Failed` state with a reason once retries run out.

use std::sync::Arc;

use crate::{
    config::PipelineConfig, objects::SharedObjects, repository::Repository,
    search::SharedIndexer,
};

pub mod metadata;
pub mod orchestrator;
pub mod stages;
pub mod types;

pub use metadata::{CoverArt, ExtractError, ExtractedAudio, LoftyExtractor, MetadataExtractor};
pub use orchestrator::{EnqueueError, IngestOrchestrator, OrchestratorHandle};
pub use stages::invoke_stage;
pub use types::{PipelineStage, StageError, StageOutcome, UploadRef, RETRIES_EXHAUSTED};

/// Collaborators shared by every stage invocation
#[derive(Clone)]
pub struct PipelineContext {
    pub repo: Repository,
    pub objects: SharedObjects,
    pub indexer: SharedIndexer,
    pub extractor: Arc<dyn MetadataExtractor>,
    pub config: PipelineConfig,
}

impl PipelineContext {
    pub fn new(
        repo: Repository,
        objects: SharedObjects,
        indexer: SharedIndexer,
        config: PipelineConfig,
    ) -> Self {
        Self {
            repo,
            objects,
            indexer,
            extractor: Arc::new(LoftyExtractor),
            config,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn MetadataExtractor>) -> Self {
        self.extractor = extractor;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod test_support {
    use super::*;
    use crate::{
        models::{keys, PipelineState, Principal, Role, Upload, Versioned},
        objects::MemoryObjectStore,
        repository::test_support::repo,
        retry::RetryPolicy,
        search::MemorySearchIndexer,
        table::{
            Condition, Item, ItemKey, ItemStore, MemoryItemStore, Page, QueryRequest, StoreError,
            StoreResult, WriteOp,
        },
    };
    use async_trait::async_trait;
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    };
    use uuid::Uuid;

    /// Memory table whose track reads can be switched to fail as throttled.
    #[derive(Clone, Default)]
    pub struct ThrottlingStore {
        inner: MemoryItemStore,
        throttle_tracks: Arc<AtomicBool>,
    }

    impl ThrottlingStore {
        pub fn throttle_tracks(&self, on: bool) {
            self.throttle_tracks.store(on, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ItemStore for ThrottlingStore {
        async fn get(&self, key: &ItemKey) -> StoreResult<Item> {
            if self.throttle_tracks.load(Ordering::SeqCst) && key.sk.starts_with(keys::TRACK_PREFIX) {
                return Err(StoreError::Throttled(format!("read of {}", key)));
            }
            self.inner.get(key).await
        }

        async fn put(&self, item: Item, condition: Condition) -> StoreResult<u64> {
            self.inner.put(item, condition).await
        }

        async fn delete(&self, key: &ItemKey, condition: Condition) -> StoreResult<()> {
            self.inner.delete(key, condition).await
        }

        async fn query(&self, request: QueryRequest) -> StoreResult<Page<Item>> {
            self.inner.query(request).await
        }

        async fn transact(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
            self.inner.transact(ops).await
        }
    }

    /// Decodes like [`LoftyExtractor`] and reports a PNG cover on every file.
    pub struct CoverExtractor;

    impl MetadataExtractor for CoverExtractor {
        fn extract(&self, bytes: &[u8], file_name: &str) -> Result<ExtractedAudio, ExtractError> {
            let mut extracted = LoftyExtractor.extract(bytes, file_name)?;
            extracted.metadata.has_cover_art = true;
            extracted.cover = Some(CoverArt {
                data: vec![0x89, b'P', b'N', b'G', 0, 1, 2, 3],
                mime_type: "image/png".to_string(),
            });
            Ok(extracted)
        }
    }

    pub struct Harness {
        pub ctx: PipelineContext,
        pub objects: MemoryObjectStore,
        pub indexer: MemorySearchIndexer,
    }

    pub fn fast_config() -> PipelineConfig {
        PipelineConfig {
            host_timeout_secs: 10,
            stage_timeout_secs: 2,
            max_attempts: 3,
            retry_base_ms: 1,
            workers: 2,
            queue_depth: 16,
        }
    }

    pub fn harness() -> Harness {
        harness_on(repo())
    }

    /// A harness whose repository reads and writes through `store`.
    pub fn harness_with_store(store: Arc<dyn ItemStore>) -> Harness {
        harness_on(
            Repository::new(store).with_retry(RetryPolicy::new(10, Duration::from_millis(1))),
        )
    }

    fn harness_on(repo: Repository) -> Harness {
        let objects = MemoryObjectStore::default();
        let indexer = MemorySearchIndexer::new();
        let ctx = PipelineContext::new(
            repo,
            Arc::new(objects.clone()),
            Arc::new(indexer.clone()),
            fast_config(),
        );
        Harness {
            ctx,
            objects,
            indexer,
        }
    }

    impl Harness {
        /// Record a confirmed upload and place its payload in staging.
        pub async fn confirmed_upload(&self, file_name: &str, bytes: Vec<u8>) -> Versioned<Upload> {
            let owner = Uuid::new_v4();
            let mut upload = Upload::new(owner, file_name, bytes.len() as u64, "audio/wav");
            upload.state = PipelineState::Confirmed;
            self.objects
                .insert(&upload.object_key, bytes, "audio/wav")
                .await;
            self.ctx
                .repo
                .create_upload(&Principal::new(owner, Role::Subscriber), upload)
                .await
                .unwrap()
        }

        pub async fn reload(&self, upload: &Upload) -> Versioned<Upload> {
            self.ctx
                .repo
                .load_upload(&upload.owner_id, &upload.id)
                .await
                .unwrap()
        }
    }
}
