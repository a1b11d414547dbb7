use serde::{Deserialize, Serialize};

use crate::models::{Track, Versioned};

/// A track together with the version a later update must name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackResponse {
    #[serde(flatten)]
    pub track: Track,
    pub version: u64,
}

impl From<Versioned<Track>> for TrackResponse {
    fn from(versioned: Versioned<Track>) -> Self {
        Self {
            version: versioned.version,
            track: versioned.value,
        }
    }
}
