use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_TAG_LEN: usize = 50;

/// Tags are compared case-insensitively and stored lowercase.
pub fn normalise_tag(name: &str) -> String {
    name.trim().to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub owner_id: Uuid,
    pub name: String,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Track ↔ tag membership row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackTag {
    pub owner_id: Uuid,
    pub track_id: Uuid,
    pub tag_name: String,
    pub added_at: DateTime<Utc>,
}
