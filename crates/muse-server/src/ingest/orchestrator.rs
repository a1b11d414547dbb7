//! Upload orchestrator
//!
//! Confirmed uploads are queued on a bounded channel and driven through the
//! stages by a fixed number of concurrent runs. Each stage is retried on
//! transient failure; an upload whose stage fails for good, or whose whole
//! run overruns the host budget, is marked `Failed` with a reason.

use chrono::Utc;
use muse_common::{error::Classify, ids::parse_uuid, ErrorKind};
use std::sync::Arc;
use thiserror::Error;
use tokio::{
    sync::{mpsc, Semaphore},
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, error, info, instrument, warn};

use super::{
    invoke_stage,
    types::{PipelineStage, StageError, UploadRef},
    PipelineContext,
};
use crate::{
    models::{keys, IndexOutcome, PipelineState, ProcessingStep, Upload, UploadStatus},
    repository::{RepoError, RepoResult},
    retry::{retry_with_backoff, RetryPolicy},
};

/// Page size used when scanning for interrupted uploads
const RESUME_PAGE_SIZE: usize = 100;

#[derive(Error, Debug)]
pub enum EnqueueError {
    #[error("Pipeline is shutting down")]
    Closed,
}

impl Classify for EnqueueError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Transient
    }
}

/// Submits uploads to a running orchestrator. Cheap to clone.
#[derive(Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<UploadRef>,
}

impl OrchestratorHandle {
    /// Queue an upload, waiting for space when the queue is full.
    pub async fn enqueue(&self, upload: UploadRef) -> Result<(), EnqueueError> {
        self.tx.send(upload).await.map_err(|_| EnqueueError::Closed)
    }

    /// A handle with no orchestrator behind it; the receiver sees what was
    /// queued.
    #[cfg(test)]
    pub(crate) fn detached(capacity: usize) -> (Self, mpsc::Receiver<UploadRef>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

pub struct IngestOrchestrator {
    ctx: Arc<PipelineContext>,
}

impl IngestOrchestrator {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Start the dispatch loop in the background.
    ///
    /// The loop ends once every handle is dropped, after in-flight runs
    /// finish.
    pub fn start(self: Arc<Self>) -> (OrchestratorHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<UploadRef>(self.ctx.config.queue_depth);
        let permits = Arc::new(Semaphore::new(self.ctx.config.workers));

        let task = tokio::spawn(async move {
            info!(
                workers = self.ctx.config.workers,
                queue_depth = self.ctx.config.queue_depth,
                "Ingest orchestrator started"
            );
            let mut running = JoinSet::new();

            while let Some(upload) = rx.recv().await {
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                let orchestrator = self.clone();
                running.spawn(async move {
                    orchestrator.run_upload(&upload).await;
                    drop(permit);
                });
                while let Some(finished) = running.try_join_next() {
                    if let Err(e) = finished {
                        error!(error = %e, "Upload run panicked");
                    }
                }
            }

            while let Some(finished) = running.join_next().await {
                if let Err(e) = finished {
                    error!(error = %e, "Upload run panicked");
                }
            }
            info!("Ingest orchestrator stopped");
        });

        (OrchestratorHandle { tx }, task)
    }

    /// Drive one upload through every stage.
    ///
    /// Never returns an error: the outcome is recorded on the upload.
    #[instrument(skip(self), fields(upload = %upload))]
    pub async fn run_upload(&self, upload: &UploadRef) {
        let ctx = &*self.ctx;
        let policy = RetryPolicy::new(ctx.config.max_attempts, ctx.config.retry_base());

        let stages = async {
            for kind in PipelineStage::ALL {
                let result =
                    retry_with_backoff(policy, kind.as_str(), || invoke_stage(ctx, *kind, upload))
                        .await;
                match result {
                    Ok(_) => {}
                    Err(e) if *kind == PipelineStage::Indexing => {
                        warn!(error = %e, "Indexing failed, continuing without search");
                        self.record_index_failure(upload)
                            .await
                            .map_err(|e| (*kind, StageError::from(e)))?;
                    }
                    Err(e) => return Err((*kind, e)),
                }
            }
            Ok::<_, (PipelineStage, StageError)>(())
        };

        let reason = match tokio::time::timeout(ctx.config.host_timeout(), stages).await {
            Ok(Ok(())) => {
                info!("Upload processed");
                return;
            }
            Ok(Err((stage, e))) => {
                warn!(stage = %stage, error = %e, "Stage failed");
                format!("{}: {}", stage, e.user_reason())
            }
            Err(_) => {
                warn!(timeout = ?ctx.config.host_timeout(), "Upload run timed out");
                "pipeline: timed out".to_string()
            }
        };

        if let Err(e) = self.fail_upload(upload, &reason).await {
            error!(error = %e, reason = %reason, "Failed to record upload failure");
        }
    }

    /// Mark an upload `Failed` unless it already reached a terminal state.
    pub async fn fail_upload(&self, upload: &UploadRef, reason: &str) -> RepoResult<()> {
        let owner_id = parse_uuid("owner_id", &upload.owner_id)?;
        let upload_id = parse_uuid("upload_id", &upload.upload_id)?;
        let repo = &self.ctx.repo;
        let (owner_id, upload_id) = (&owner_id, &upload_id);

        retry_with_backoff(repo.retry_policy(), "fail_upload", || async move {
            let current = repo.load_upload(owner_id, upload_id).await?;
            if current.state.is_terminal() {
                debug!(state = %current.state, "Upload already terminal");
                return Ok::<_, RepoError>(());
            }
            let version = current.version;
            let mut failed: Upload = current.value;
            failed.state = PipelineState::Failed;
            failed.error_reason = Some(reason.to_string());
            failed.completed_at = Some(Utc::now());
            repo.save_upload(version, failed).await?;
            info!(reason, "Upload marked failed");
            Ok(())
        })
        .await
    }

    /// Record the indexing step as done with `IndexFailed`.
    ///
    /// Search is best-effort: when the stage itself cannot complete, the
    /// upload still moves on to finalization.
    async fn record_index_failure(&self, upload: &UploadRef) -> RepoResult<()> {
        let owner_id = parse_uuid("owner_id", &upload.owner_id)?;
        let upload_id = parse_uuid("upload_id", &upload.upload_id)?;
        let repo = &self.ctx.repo;
        let (owner_id, upload_id) = (&owner_id, &upload_id);

        retry_with_backoff(repo.retry_policy(), "record_index_failure", || async move {
            let current = repo.load_upload(owner_id, upload_id).await?;
            let ready = PipelineStage::Indexing
                .prerequisites()
                .iter()
                .all(|step| current.steps.is_done(*step));
            if current.state.is_terminal() || current.steps.indexed || !ready {
                return Ok::<_, RepoError>(());
            }
            let version = current.version;
            let mut upload: Upload = current.value;
            upload.steps.mark(ProcessingStep::Indexed);
            upload.state = PipelineStage::Indexing.reached_state();
            upload.index_outcome = Some(IndexOutcome::IndexFailed);
            repo.save_upload(version, upload).await?;
            Ok(())
        })
        .await
    }

    /// Re-queue every upload left mid-pipeline by a previous process.
    ///
    /// Completed stages are skipped on the second run, so this is safe for
    /// uploads another process is still working on.
    pub async fn resume_pending(&self, handle: &OrchestratorHandle) -> anyhow::Result<usize> {
        let mut cursor = None;
        let mut resumed = 0;
        loop {
            let page = self
                .ctx
                .repo
                .list_uploads_by_status(UploadStatus::Processing, cursor, RESUME_PAGE_SIZE)
                .await?;
            for upload in &page.items {
                debug!(key = %keys::upload(&upload.owner_id, &upload.id), "Resuming upload");
                handle
                    .enqueue(UploadRef::new(upload.owner_id, upload.id))
                    .await?;
                resumed += 1;
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        if resumed > 0 {
            info!(resumed, "Resumed interrupted uploads");
        }
        Ok(resumed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::{
        ingest::{
            metadata::wav_bytes,
            test_support::{harness, harness_with_store, ThrottlingStore},
            ExtractError, ExtractedAudio, LoftyExtractor, MetadataExtractor, RETRIES_EXHAUSTED,
        },
        models::{Principal, Role, Versioned},
    };
    use std::time::Duration;

    async fn wait_terminal(orchestrator: &IngestOrchestrator, upload: &Upload) -> Upload {
        for _ in 0..200 {
            let current = orchestrator
                .context()
                .repo
                .load_upload(&upload.owner_id, &upload.id)
                .await
                .unwrap();
            if current.state.is_terminal() {
                return current.value;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("upload {} never reached a terminal state", upload.id);
    }

    #[tokio::test]
    async fn test_queue_drives_uploads_to_completion() {
        let h = harness();
        let mut uploads = Vec::new();
        for name in ["one.wav", "two.wav", "three.wav"] {
            uploads.push(h.confirmed_upload(name, wav_bytes(1)).await.value);
        }

        let orchestrator = Arc::new(IngestOrchestrator::new(h.ctx.clone()));
        let (handle, task) = orchestrator.clone().start();
        for upload in &uploads {
            handle
                .enqueue(UploadRef::new(upload.owner_id, upload.id))
                .await
                .unwrap();
        }

        for upload in &uploads {
            let done = wait_terminal(&orchestrator, upload).await;
            assert_eq!(done.state, PipelineState::Completed);
            assert_eq!(done.index_outcome, Some(IndexOutcome::Indexed));
        }

        drop(handle);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_dropping_handles_drains_in_flight_runs() {
        let h = harness();
        let upload = h.confirmed_upload("last.wav", wav_bytes(1)).await;
        let orchestrator = Arc::new(IngestOrchestrator::new(h.ctx.clone()));
        let (handle, task) = orchestrator.clone().start();
        handle
            .enqueue(UploadRef::new(upload.owner_id, upload.id))
            .await
            .unwrap();
        drop(handle);

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("dispatcher did not drain")
            .unwrap();
        assert_eq!(h.reload(&upload).await.state, PipelineState::Completed);
    }

    #[tokio::test]
    async fn test_corrupt_upload_fails_with_reason() {
        let h = harness();
        let upload = h.confirmed_upload("bad.mp3", b"garbage".to_vec()).await;
        let orchestrator = IngestOrchestrator::new(h.ctx.clone());

        orchestrator
            .run_upload(&UploadRef::new(upload.owner_id, upload.id))
            .await;

        let failed = h.reload(&upload).await;
        assert_eq!(failed.state, PipelineState::Failed);
        assert_eq!(
            failed.error_reason.as_deref(),
            Some("metadata: unsupported or corrupt audio file")
        );
        assert!(failed.track_id.is_none());
    }

    #[tokio::test]
    async fn test_transient_failures_exhaust_retries() {
        let h = harness();
        let upload = h.confirmed_upload("flaky.wav", wav_bytes(1)).await;
        h.objects.fail_next(h.ctx.config.max_attempts);
        let orchestrator = IngestOrchestrator::new(h.ctx.clone());

        orchestrator
            .run_upload(&UploadRef::new(upload.owner_id, upload.id))
            .await;

        let failed = h.reload(&upload).await;
        assert_eq!(failed.state, PipelineState::Failed);
        assert_eq!(
            failed.error_reason,
            Some(format!("metadata: {}", RETRIES_EXHAUSTED))
        );
    }

    #[tokio::test]
    async fn test_transient_failure_recovers_within_budget() {
        let h = harness();
        let upload = h.confirmed_upload("flaky.wav", wav_bytes(1)).await;
        h.objects.fail_next(1);
        let orchestrator = IngestOrchestrator::new(h.ctx.clone());

        orchestrator
            .run_upload(&UploadRef::new(upload.owner_id, upload.id))
            .await;

        assert_eq!(h.reload(&upload).await.state, PipelineState::Completed);
    }

    #[tokio::test]
    async fn test_fail_upload_leaves_terminal_alone() {
        let h = harness();
        let upload = h.confirmed_upload("done.wav", wav_bytes(1)).await;
        let orchestrator = IngestOrchestrator::new(h.ctx.clone());
        let upload_ref = UploadRef::new(upload.owner_id, upload.id);
        orchestrator.run_upload(&upload_ref).await;

        orchestrator.fail_upload(&upload_ref, "late failure").await.unwrap();
        let done = h.reload(&upload).await;
        assert_eq!(done.state, PipelineState::Completed);
        assert!(done.error_reason.is_none());
    }

    #[tokio::test]
    async fn test_throttled_track_reads_do_not_fail_indexing() {
        let store = ThrottlingStore::default();
        let h = harness_with_store(Arc::new(store.clone()));
        let upload = h.confirmed_upload("busy.wav", wav_bytes(1)).await;
        let upload_ref = UploadRef::new(upload.owner_id, upload.id);
        for kind in &PipelineStage::ALL[..4] {
            invoke_stage(&h.ctx, *kind, &upload_ref).await.unwrap();
        }

        store.throttle_tracks(true);
        IngestOrchestrator::new(h.ctx.clone())
            .run_upload(&upload_ref)
            .await;

        let done = h.reload(&upload).await;
        assert_eq!(done.state, PipelineState::Completed);
        assert!(done.steps.indexed);
        assert_eq!(done.index_outcome, Some(IndexOutcome::IndexFailed));
        assert!(done.error_reason.is_none());
        assert!(h.indexer.documents().await.is_empty());
    }

    #[tokio::test]
    async fn test_indexing_stage_error_still_finalizes() {
        let h = harness();
        let upload = h.confirmed_upload("orphan.wav", wav_bytes(1)).await;
        let upload_ref = UploadRef::new(upload.owner_id, upload.id);
        for kind in &PipelineStage::ALL[..4] {
            invoke_stage(&h.ctx, *kind, &upload_ref).await.unwrap();
        }

        // Indexing rejects an upload without a track id outright
        let Versioned { value: mut broken, version } = h.reload(&upload).await;
        broken.track_id = None;
        h.ctx.repo.save_upload(version, broken).await.unwrap();

        IngestOrchestrator::new(h.ctx.clone())
            .run_upload(&upload_ref)
            .await;

        let done = h.reload(&upload).await;
        assert_eq!(done.state, PipelineState::Completed);
        assert_eq!(done.index_outcome, Some(IndexOutcome::IndexFailed));
    }

    #[tokio::test]
    async fn test_failure_before_indexing_is_still_fatal() {
        let h = harness();
        let upload = h.confirmed_upload("early.wav", wav_bytes(1)).await;
        let upload_ref = UploadRef::new(upload.owner_id, upload.id);
        invoke_stage(&h.ctx, PipelineStage::Metadata, &upload_ref)
            .await
            .unwrap();
        invoke_stage(&h.ctx, PipelineStage::CoverArt, &upload_ref)
            .await
            .unwrap();

        let Versioned { value: mut broken, version } = h.reload(&upload).await;
        broken.metadata = None;
        h.ctx.repo.save_upload(version, broken).await.unwrap();

        IngestOrchestrator::new(h.ctx.clone())
            .run_upload(&upload_ref)
            .await;

        let failed = h.reload(&upload).await;
        assert_eq!(failed.state, PipelineState::Failed);
        assert!(failed.error_reason.as_ref().unwrap().starts_with("track: "));
        assert!(!failed.steps.indexed);
    }

    #[tokio::test]
    async fn test_reprocess_after_track_reuses_it() {
        let h = harness();
        let upload = h.confirmed_upload("again.wav", wav_bytes(2)).await;
        let owner = Principal::new(upload.owner_id, Role::Subscriber);
        h.ctx
            .repo
            .get_or_create_owner(&owner, "again@example.com", None)
            .await
            .unwrap();
        let orchestrator = IngestOrchestrator::new(h.ctx.clone());
        let upload_ref = UploadRef::new(upload.owner_id, upload.id);
        for kind in &PipelineStage::ALL[..4] {
            invoke_stage(&h.ctx, *kind, &upload_ref).await.unwrap();
        }
        orchestrator
            .fail_upload(&upload_ref, "indexing: temporarily unavailable")
            .await
            .unwrap();
        let failed = h.reload(&upload).await;
        let track_id = failed.track_id.unwrap();

        let attempt = h
            .ctx
            .repo
            .create_upload(&owner, failed.retry_attempt(ProcessingStep::MetadataExtracted))
            .await
            .unwrap();
        orchestrator
            .run_upload(&UploadRef::new(attempt.owner_id, attempt.id))
            .await;

        let second = h.reload(&attempt).await;
        assert_eq!(second.state, PipelineState::Completed);
        assert_eq!(second.track_id, Some(track_id));

        let tracks = h
            .ctx
            .repo
            .list_tracks(&owner, &owner.owner_id, None, 10)
            .await
            .unwrap();
        assert_eq!(tracks.items.len(), 1);
        assert!(h.objects.contains(&tracks.items[0].object_key).await);

        let account = h.ctx.repo.get_owner(&owner, &owner.owner_id).await.unwrap();
        assert_eq!(account.track_count, 1);
        assert_eq!(account.storage_used, upload.file_size);
    }

    /// Decodes like [`LoftyExtractor`] but reports a tab inside the artist.
    struct TabbedArtist;

    impl MetadataExtractor for TabbedArtist {
        fn extract(&self, bytes: &[u8], file_name: &str) -> Result<ExtractedAudio, ExtractError> {
            let mut extracted = LoftyExtractor.extract(bytes, file_name)?;
            extracted.metadata.artist = "Simon\tGarfunkel".to_string();
            extracted.metadata.album = Some("Bookends".to_string());
            Ok(extracted)
        }
    }

    #[tokio::test]
    async fn test_control_characters_in_artist_do_not_fail_upload() {
        let mut h = harness();
        h.ctx = h.ctx.clone().with_extractor(Arc::new(TabbedArtist));
        let upload = h.confirmed_upload("mrs-robinson.wav", wav_bytes(1)).await;
        let owner = Principal::new(upload.owner_id, Role::Subscriber);

        IngestOrchestrator::new(h.ctx.clone())
            .run_upload(&UploadRef::new(upload.owner_id, upload.id))
            .await;

        let done = h.reload(&upload).await;
        assert_eq!(done.state, PipelineState::Completed, "{:?}", done.error_reason);

        let repo = &h.ctx.repo;
        let by_artist = repo
            .list_tracks_by_artist(&owner, &owner.owner_id, "simon  garfunkel", None, 10)
            .await
            .unwrap();
        assert_eq!(by_artist.items.len(), 1);
        assert_eq!(by_artist.items[0].artist, "Simon\tGarfunkel");

        let albums = repo
            .list_albums_by_artist(&owner, &owner.owner_id, "Simon\tGarfunkel", None, 10)
            .await
            .unwrap();
        assert_eq!(albums.items.len(), 1);
        assert_eq!(albums.items[0].track_count, 1);

        let artists = repo
            .list_artists(&owner, &owner.owner_id, None, 10)
            .await
            .unwrap();
        assert_eq!(artists.items.len(), 1);
        assert_eq!(artists.items[0].track_count, 1);
    }

    #[tokio::test]
    async fn test_resume_requeues_processing_uploads() {
        let h = harness();
        let upload = h.confirmed_upload("resume.wav", wav_bytes(1)).await;
        let orchestrator = Arc::new(IngestOrchestrator::new(h.ctx.clone()));
        let (handle, task) = orchestrator.clone().start();

        let resumed = orchestrator.resume_pending(&handle).await.unwrap();
        assert_eq!(resumed, 1);
        let done = wait_terminal(&orchestrator, &upload).await;
        assert_eq!(done.state, PipelineState::Completed);

        drop(handle);
        task.await.unwrap();
    }
}
