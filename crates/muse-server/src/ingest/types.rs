use muse_common::{error::Classify, ErrorKind, MuseError};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::{
    models::{PipelineState, ProcessingStep},
    objects::ObjectStoreError,
    repository::RepoError,
};

/// Reason stored on the upload when retries run out
pub const RETRIES_EXHAUSTED: &str = "temporarily unavailable, retries exhausted";

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Metadata,
    CoverArt,
    TrackRecord,
    Relocation,
    Indexing,
    Finalization,
}

impl PipelineStage {
    pub const ALL: &'static [PipelineStage] = &[
        PipelineStage::Metadata,
        PipelineStage::CoverArt,
        PipelineStage::TrackRecord,
        PipelineStage::Relocation,
        PipelineStage::Indexing,
        PipelineStage::Finalization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Metadata => "metadata",
            PipelineStage::CoverArt => "cover_art",
            PipelineStage::TrackRecord => "track",
            PipelineStage::Relocation => "relocation",
            PipelineStage::Indexing => "indexing",
            PipelineStage::Finalization => "finalization",
        }
    }

    /// Completion flag written by this stage. Finalization has none; the
    /// terminal state is its record.
    pub fn flag(self) -> Option<ProcessingStep> {
        match self {
            PipelineStage::Metadata => Some(ProcessingStep::MetadataExtracted),
            PipelineStage::CoverArt => Some(ProcessingStep::CoverArtExtracted),
            PipelineStage::TrackRecord => Some(ProcessingStep::TrackCreated),
            PipelineStage::Relocation => Some(ProcessingStep::FileMoved),
            PipelineStage::Indexing => Some(ProcessingStep::Indexed),
            PipelineStage::Finalization => None,
        }
    }

    pub fn reached_state(self) -> PipelineState {
        self.flag()
            .map(ProcessingStep::reached_state)
            .unwrap_or(PipelineState::Completed)
    }

    /// Flags that must be set before this stage may run
    pub fn prerequisites(self) -> &'static [ProcessingStep] {
        match self.flag() {
            Some(step) => step.prerequisites(),
            None => ProcessingStep::ALL,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one upload as handed to the pipeline.
///
/// Ids are kept as received and validated by each stage before any backend
/// call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadRef {
    pub owner_id: String,
    pub upload_id: String,
}

impl UploadRef {
    pub fn new(owner_id: impl ToString, upload_id: impl ToString) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            upload_id: upload_id.to_string(),
        }
    }
}

impl fmt::Display for UploadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner_id, self.upload_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    /// Flag already set, or the upload is terminal
    Skipped,
}

#[derive(Error, Debug)]
pub enum StageError {
    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Objects(#[from] ObjectStoreError),

    #[error("Stage {0} timed out")]
    TimedOut(PipelineStage),

    #[error("unsupported or corrupt audio file: {0}")]
    CorruptPayload(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<MuseError> for StageError {
    fn from(err: MuseError) -> Self {
        StageError::Invalid(err.to_string())
    }
}

impl Classify for StageError {
    fn kind(&self) -> ErrorKind {
        match self {
            StageError::Invalid(_) | StageError::CorruptPayload(_) => ErrorKind::Validation,
            StageError::Repo(e) => e.kind(),
            StageError::Objects(e) => e.kind(),
            StageError::TimedOut(_) => ErrorKind::Transient,
            StageError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl StageError {
    /// Human-readable reason stored on a failed upload.
    pub fn user_reason(&self) -> String {
        match self {
            StageError::CorruptPayload(_) => "unsupported or corrupt audio file".to_string(),
            StageError::Invalid(message) => message.clone(),
            StageError::Objects(ObjectStoreError::NotFound(_)) => {
                "file not found in upload location".to_string()
            }
            StageError::Internal(_) => "internal error".to_string(),
            other if other.kind().is_retryable() => RETRIES_EXHAUSTED.to_string(),
            other if other.kind() == ErrorKind::NotFound => "referenced record is missing".to_string(),
            other => other.to_string(),
        }
    }
}
