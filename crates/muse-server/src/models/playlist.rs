use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::track::Visibility;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
    /// Always equals the number of entry rows
    pub track_count: u32,
    pub total_duration_secs: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Playlist {
    pub fn new(owner_id: Uuid, name: &str, description: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            name: name.trim().to_string(),
            description,
            visibility: Visibility::Private,
            track_count: 0,
            total_duration_secs: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One (playlist, position) row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub owner_id: Uuid,
    pub playlist_id: Uuid,
    pub position: u32,
    pub track_id: Uuid,
    /// Snapshot taken when the track was added
    pub duration_secs: u32,
    pub added_at: DateTime<Utc>,
}
