use serde::{Deserialize, Serialize};

use crate::models::{Playlist, PlaylistEntry, Versioned};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistResponse {
    #[serde(flatten)]
    pub playlist: Playlist,
    pub version: u64,
    /// Ordered by position; omitted from listings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<PlaylistEntry>>,
}

impl PlaylistResponse {
    pub fn new(playlist: Versioned<Playlist>, entries: Option<Vec<PlaylistEntry>>) -> Self {
        Self {
            version: playlist.version,
            playlist: playlist.value,
            entries,
        }
    }
}
