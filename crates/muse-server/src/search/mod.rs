//! Search indexer collaborator
//!
//! The pipeline pushes one flattened document per track. The indexer is
//! optional: every failure here is classified `UpstreamUnavailable` and
//! callers record it instead of propagating it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use muse_common::{error::Classify, ErrorKind};
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::Track;

pub mod http;

pub use http::HttpSearchIndexer;

pub type SharedIndexer = Arc<dyn SearchIndexer>;

/// Flattened track document sent to the indexer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDocument {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub year: Option<u32>,
    pub tags: Vec<String>,
    pub duration: u32,
    pub file_name: String,
    pub indexed_at: DateTime<Utc>,
}

impl SearchDocument {
    pub fn from_track(track: &Track) -> Self {
        Self {
            id: track.id,
            owner_id: track.owner_id,
            title: track.title.clone(),
            artist: track.artist.clone(),
            album: track.album.clone(),
            genre: track.genre.clone(),
            year: track.year,
            tags: track.tags.clone(),
            duration: track.duration_secs,
            file_name: track.file_name.clone(),
            indexed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexAck {
    Accepted,
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Search indexing is disabled")]
    Disabled,

    #[error("Search indexer unavailable: {0}")]
    Unavailable(String),

    #[error("Unexpected indexer response: {0}")]
    Protocol(String),
}

impl Classify for IndexError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::UpstreamUnavailable
    }
}

#[async_trait]
pub trait SearchIndexer: Send + Sync {
    async fn index(&self, document: &SearchDocument) -> Result<IndexAck, IndexError>;
}

/// Used when `SEARCH_ENABLED=false`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledIndexer;

#[async_trait]
impl SearchIndexer for DisabledIndexer {
    async fn index(&self, _document: &SearchDocument) -> Result<IndexAck, IndexError> {
        Err(IndexError::Disabled)
    }
}

/// Records documents in memory. Can be switched off to simulate an outage.
#[derive(Clone)]
pub struct MemorySearchIndexer {
    documents: Arc<Mutex<Vec<SearchDocument>>>,
    available: Arc<AtomicBool>,
}

impl Default for MemorySearchIndexer {
    fn default() -> Self {
        Self {
            documents: Arc::new(Mutex::new(Vec::new())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl MemorySearchIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub async fn documents(&self) -> Vec<SearchDocument> {
        self.documents.lock().await.clone()
    }
}

#[async_trait]
impl SearchIndexer for MemorySearchIndexer {
    async fn index(&self, document: &SearchDocument) -> Result<IndexAck, IndexError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(IndexError::Unavailable("connection refused".to_string()));
        }
        let mut documents = self.documents.lock().await;
        documents.retain(|d| d.id != document.id);
        documents.push(document.clone());
        Ok(IndexAck::Accepted)
    }
}
