//! Playlists
//!
//! Entry changes are applied by the repository in one transaction with the
//! playlist's counters; these handlers validate input and shape responses.

pub mod commands;
pub mod queries;
pub mod routes;
pub mod types;

pub use commands::{
    ChangeEntriesCommand, CreatePlaylistCommand, DeletePlaylistCommand, EntryChange,
    PlaylistCommandError,
};
pub use queries::GetPlaylistQuery;
pub use routes::playlists_routes;
pub use types::PlaylistResponse;
