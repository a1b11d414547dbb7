//! Derived aggregates: albums and artists
//!
//! Ids are content-derived so that concurrent get-or-create calls for the
//! same name converge on a single key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

fn normalise(value: &str) -> String {
    value.trim().to_lowercase()
}

fn derive_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(normalise(part).as_bytes());
    }
    hex::encode(&hasher.finalize()[..16])
}

pub fn album_id(name: &str, artist: &str) -> String {
    derive_id(&[name, artist])
}

pub fn artist_id(name: &str) -> String {
    derive_id(&[name])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub owner_id: Uuid,
    pub name: String,
    pub artist: String,
    pub year: Option<u32>,
    pub genre: Option<String>,
    pub cover_art_key: Option<String>,
    pub track_count: u32,
    pub total_duration_secs: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Album {
    pub fn new(owner_id: Uuid, name: &str, artist: &str, year: Option<u32>) -> Self {
        let now = Utc::now();
        Self {
            id: album_id(name, artist),
            owner_id,
            name: name.trim().to_string(),
            artist: artist.trim().to_string(),
            year,
            genre: None,
            cover_art_key: None,
            track_count: 0,
            total_duration_secs: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub owner_id: Uuid,
    pub name: String,
    pub track_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Artist {
    pub fn new(owner_id: Uuid, name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: artist_id(name),
            owner_id,
            name: name.trim().to_string(),
            track_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
