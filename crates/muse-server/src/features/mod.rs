//! Feature modules implementing the Muse API
//!
//! Each feature is a vertical slice with its own commands, queries, and
//! routes:
//!
//! - **uploads**: presign, confirm, status, list, and reprocess of uploads
//! - **tracks**: the owner's library and the public catalogue
//! - **tags**: tag management and tag-scoped listings
//! - **playlists**: ordered track collections
//!
//! Commands validate their input before touching storage and surface a
//! per-command error enum that classifies into [`muse_common::ErrorKind`].

pub mod playlists;
pub mod shared;
pub mod tags;
pub mod tracks;
pub mod uploads;

use axum::Router;

use crate::{
    config::UploadConfig, ingest::OrchestratorHandle, objects::SharedObjects,
    repository::Repository,
};

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    pub repo: Repository,
    pub objects: SharedObjects,
    /// Queue feeding the ingest orchestrator
    pub pipeline: OrchestratorHandle,
    pub uploads: UploadConfig,
}

/// Creates the API router with all feature routes mounted
///
/// - `/uploads` - upload lifecycle
/// - `/tracks/public` - public catalogue
/// - `/owners/:owner_id/tracks` - owner library
/// - `/owners/:owner_id/tags` - tags
/// - `/owners/:owner_id/playlists` - playlists
pub fn router(state: FeatureState) -> Router<()> {
    Router::new()
        .nest("/uploads", uploads::uploads_routes())
        .nest("/tracks", tracks::public_routes())
        .nest("/owners/:owner_id/tracks", tracks::tracks_routes())
        .nest("/owners/:owner_id/tags", tags::tags_routes())
        .nest("/owners/:owner_id/playlists", playlists::playlists_routes())
        .with_state(state)
}
