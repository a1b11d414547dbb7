//! Track library
//!
//! Owner-scoped reads and edits of tracks produced by the ingest pipeline,
//! plus the public catalogue.

pub mod commands;
pub mod queries;
pub mod routes;
pub mod types;

pub use commands::{
    DeleteTrackCommand, DeleteTrackError, SetVisibilityCommand, SetVisibilityError,
    TagTrackCommand, TagTrackError, UntagTrackCommand, UpdateTrackCommand, UpdateTrackError,
};
pub use queries::{
    DownloadTrackError, DownloadTrackQuery, DownloadTrackResponse, GetTrackQuery,
    ListTracksByTagQuery, ListTracksQuery, TrackFilter,
};
pub use routes::{public_routes, tracks_routes};
pub use types::TrackResponse;
