//! Upload records and the ingestion state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::track::AudioFormat;

/// Fine-grained pipeline state stored on the upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Pending,
    Confirmed,
    MetadataDone,
    CoverDone,
    TrackCreated,
    Relocated,
    Indexed,
    Completed,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Pending => "PENDING",
            PipelineState::Confirmed => "CONFIRMED",
            PipelineState::MetadataDone => "METADATA_DONE",
            PipelineState::CoverDone => "COVER_DONE",
            PipelineState::TrackCreated => "TRACK_CREATED",
            PipelineState::Relocated => "RELOCATED",
            PipelineState::Indexed => "INDEXED",
            PipelineState::Completed => "COMPLETED",
            PipelineState::Failed => "FAILED",
        }
    }

    /// Position along the happy path. `Failed` sits past every non-terminal
    /// state.
    fn rank(self) -> u8 {
        match self {
            PipelineState::Pending => 0,
            PipelineState::Confirmed => 1,
            PipelineState::MetadataDone => 2,
            PipelineState::CoverDone => 3,
            PipelineState::TrackCreated => 4,
            PipelineState::Relocated => 5,
            PipelineState::Indexed => 6,
            PipelineState::Completed | PipelineState::Failed => 7,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Failed)
    }

    /// Forward-only: staying put is allowed, moving back never is, and
    /// terminal states are final.
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next == PipelineState::Failed || next.rank() > self.rank()
    }

    /// Collapse into the four client-visible buckets.
    pub fn status(self) -> UploadStatus {
        match self {
            PipelineState::Pending => UploadStatus::Pending,
            PipelineState::Completed => UploadStatus::Completed,
            PipelineState::Failed => UploadStatus::Failed,
            _ => UploadStatus::Processing,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client-visible upload status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Processing => "processing",
            UploadStatus::Completed => "completed",
            UploadStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline steps that carry a completion flag, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStep {
    MetadataExtracted,
    CoverArtExtracted,
    TrackCreated,
    FileMoved,
    Indexed,
}

impl ProcessingStep {
    pub const ALL: &'static [ProcessingStep] = &[
        ProcessingStep::MetadataExtracted,
        ProcessingStep::CoverArtExtracted,
        ProcessingStep::TrackCreated,
        ProcessingStep::FileMoved,
        ProcessingStep::Indexed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStep::MetadataExtracted => "metadata_extracted",
            ProcessingStep::CoverArtExtracted => "cover_art_extracted",
            ProcessingStep::TrackCreated => "track_created",
            ProcessingStep::FileMoved => "file_moved",
            ProcessingStep::Indexed => "indexed",
        }
    }

    /// State the upload reaches once this step is recorded
    pub fn reached_state(self) -> PipelineState {
        match self {
            ProcessingStep::MetadataExtracted => PipelineState::MetadataDone,
            ProcessingStep::CoverArtExtracted => PipelineState::CoverDone,
            ProcessingStep::TrackCreated => PipelineState::TrackCreated,
            ProcessingStep::FileMoved => PipelineState::Relocated,
            ProcessingStep::Indexed => PipelineState::Indexed,
        }
    }

    /// Steps that must be recorded before this one may run
    pub fn prerequisites(self) -> &'static [ProcessingStep] {
        let index = Self::ALL.iter().position(|s| *s == self).unwrap_or(0);
        &Self::ALL[..index]
    }
}

impl fmt::Display for ProcessingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-step completion flags; the resumption point after a crash
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepMap {
    pub metadata_extracted: bool,
    pub cover_art_extracted: bool,
    pub track_created: bool,
    pub file_moved: bool,
    pub indexed: bool,
}

impl StepMap {
    pub fn is_done(&self, step: ProcessingStep) -> bool {
        match step {
            ProcessingStep::MetadataExtracted => self.metadata_extracted,
            ProcessingStep::CoverArtExtracted => self.cover_art_extracted,
            ProcessingStep::TrackCreated => self.track_created,
            ProcessingStep::FileMoved => self.file_moved,
            ProcessingStep::Indexed => self.indexed,
        }
    }

    pub fn mark(&mut self, step: ProcessingStep) {
        match step {
            ProcessingStep::MetadataExtracted => self.metadata_extracted = true,
            ProcessingStep::CoverArtExtracted => self.cover_art_extracted = true,
            ProcessingStep::TrackCreated => self.track_created = true,
            ProcessingStep::FileMoved => self.file_moved = true,
            ProcessingStep::Indexed => self.indexed = true,
        }
    }

    pub fn completed(&self) -> Vec<ProcessingStep> {
        ProcessingStep::ALL
            .iter()
            .copied()
            .filter(|step| self.is_done(*step))
            .collect()
    }
}

/// Tag metadata decoded from the audio payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioMetadata {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub genre: Option<String>,
    pub year: Option<u32>,
    pub track_number: Option<u32>,
    pub disc_number: Option<u32>,
    pub duration_secs: u32,
    pub bitrate: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
    pub format: AudioFormat,
    pub has_cover_art: bool,
}

/// What happened when the track was pushed to the search collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOutcome {
    Indexed,
    SearchDisabled,
    IndexRejected,
    IndexFailed,
    MissingTrack,
}

/// One ingestion attempt. Never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Upload {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub file_name: String,
    pub file_size: u64,
    pub content_type: String,
    /// Staging key; cleared of meaning once the file is relocated
    pub object_key: String,
    pub state: PipelineState,
    #[serde(default)]
    pub steps: StepMap,
    pub metadata: Option<AudioMetadata>,
    pub cover_art_key: Option<String>,
    /// Assigned before the track is written so re-runs reuse it
    pub track_id: Option<Uuid>,
    pub index_outcome: Option<IndexOutcome>,
    pub error_reason: Option<String>,
    /// Set on attempts created by reprocessing
    pub retry_of: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Upload {
    pub fn new(
        owner_id: Uuid,
        file_name: &str,
        file_size: u64,
        content_type: &str,
    ) -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        Self {
            id,
            owner_id,
            file_name: file_name.to_string(),
            file_size,
            content_type: content_type.to_string(),
            object_key: staging_key(&owner_id, &id, file_name),
            state: PipelineState::Pending,
            steps: StepMap::default(),
            metadata: None,
            cover_art_key: None,
            track_id: None,
            index_outcome: None,
            error_reason: None,
            retry_of: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn status(&self) -> UploadStatus {
        self.state.status()
    }

    /// Build a fresh attempt that keeps the outputs of every step before
    /// `from_step`.
    ///
    /// The track id is always carried over, so a re-run of the track step
    /// targets the record this upload already produced instead of minting
    /// a second one.
    pub fn retry_attempt(&self, from_step: ProcessingStep) -> Self {
        let mut next = Upload::new(self.owner_id, &self.file_name, self.file_size, &self.content_type);
        next.object_key = self.object_key.clone();
        next.retry_of = Some(self.id);
        next.state = PipelineState::Confirmed;
        next.track_id = self.track_id;

        for step in from_step.prerequisites() {
            if !self.steps.is_done(*step) {
                break;
            }
            next.steps.mark(*step);
            next.state = step.reached_state();
            match step {
                ProcessingStep::MetadataExtracted => next.metadata = self.metadata.clone(),
                ProcessingStep::CoverArtExtracted => next.cover_art_key = self.cover_art_key.clone(),
                ProcessingStep::TrackCreated
                | ProcessingStep::FileMoved
                | ProcessingStep::Indexed => {}
            }
        }
        next
    }
}

/// `uploads/{owner}/{upload}/{file_name}`
pub fn staging_key(owner_id: &Uuid, upload_id: &Uuid, file_name: &str) -> String {
    format!("uploads/{}/{}/{}", owner_id, upload_id, file_name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const ORDER: [PipelineState; 8] = [
        PipelineState::Pending,
        PipelineState::Confirmed,
        PipelineState::MetadataDone,
        PipelineState::CoverDone,
        PipelineState::TrackCreated,
        PipelineState::Relocated,
        PipelineState::Indexed,
        PipelineState::Completed,
    ];

    #[test]
    fn test_transitions_are_forward_only() {
        for (i, from) in ORDER.iter().enumerate() {
            for (j, to) in ORDER.iter().enumerate() {
                assert_eq!(
                    from.can_transition_to(*to),
                    j >= i,
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_failed_reachable_from_non_terminal_only() {
        for state in &ORDER[..7] {
            assert!(state.can_transition_to(PipelineState::Failed));
        }
        assert!(!PipelineState::Completed.can_transition_to(PipelineState::Failed));
        assert!(!PipelineState::Failed.can_transition_to(PipelineState::Completed));
        assert!(!PipelineState::Failed.can_transition_to(PipelineState::Pending));
    }

    #[test]
    fn test_status_buckets() {
        assert_eq!(PipelineState::Pending.status(), UploadStatus::Pending);
        assert_eq!(PipelineState::Confirmed.status(), UploadStatus::Processing);
        assert_eq!(PipelineState::Indexed.status(), UploadStatus::Processing);
        assert_eq!(PipelineState::Completed.status(), UploadStatus::Completed);
        assert_eq!(PipelineState::Failed.status(), UploadStatus::Failed);
    }

    #[test]
    fn test_step_map() {
        let mut steps = StepMap::default();
        assert!(steps.completed().is_empty());
        steps.mark(ProcessingStep::MetadataExtracted);
        steps.mark(ProcessingStep::TrackCreated);
        assert_eq!(
            steps.completed(),
            vec![ProcessingStep::MetadataExtracted, ProcessingStep::TrackCreated]
        );
        assert!(ProcessingStep::MetadataExtracted.prerequisites().is_empty());
        assert_eq!(ProcessingStep::Indexed.prerequisites().len(), 4);
    }

    #[test]
    fn test_retry_attempt_carries_prior_outputs() {
        let owner = Uuid::new_v4();
        let mut failed = Upload::new(owner, "song.mp3", 1024, "audio/mpeg");
        failed.steps.mark(ProcessingStep::MetadataExtracted);
        failed.steps.mark(ProcessingStep::CoverArtExtracted);
        failed.cover_art_key = Some("covers/x.jpg".to_string());
        failed.state = PipelineState::Failed;

        let retry = failed.retry_attempt(ProcessingStep::TrackCreated);
        assert_ne!(retry.id, failed.id);
        assert_eq!(retry.retry_of, Some(failed.id));
        assert_eq!(retry.object_key, failed.object_key);
        assert_eq!(retry.state, PipelineState::CoverDone);
        assert!(retry.steps.cover_art_extracted);
        assert!(!retry.steps.track_created);
        assert_eq!(retry.cover_art_key.as_deref(), Some("covers/x.jpg"));

        let from_scratch = failed.retry_attempt(ProcessingStep::MetadataExtracted);
        assert_eq!(from_scratch.state, PipelineState::Confirmed);
        assert_eq!(from_scratch.steps, StepMap::default());
    }

    #[test]
    fn test_retry_attempt_keeps_track_id_when_rerunning_track_step() {
        let mut failed = Upload::new(Uuid::new_v4(), "song.mp3", 1024, "audio/mpeg");
        for step in ProcessingStep::Indexed.prerequisites() {
            failed.steps.mark(*step);
        }
        failed.track_id = Some(Uuid::new_v4());
        failed.state = PipelineState::Failed;

        let retry = failed.retry_attempt(ProcessingStep::MetadataExtracted);
        assert!(!retry.steps.track_created);
        assert_eq!(retry.track_id, failed.track_id);
    }
}
