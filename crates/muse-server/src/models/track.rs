use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{path::Path, str::FromStr};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Unlisted,
    Public,
}

impl Visibility {
    /// Reachable by anyone who holds a direct link.
    pub fn is_publicly_accessible(self) -> bool {
        matches!(self, Visibility::Public | Visibility::Unlisted)
    }

    /// Listed in the public index.
    pub fn is_discoverable(self) -> bool {
        matches!(self, Visibility::Public)
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "private" => Ok(Visibility::Private),
            "unlisted" => Ok(Visibility::Unlisted),
            "public" => Ok(Visibility::Public),
            other => Err(format!("unknown visibility: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AudioFormat {
    Mp3,
    Flac,
    Wav,
    Aac,
    Ogg,
    M4a,
}

impl AudioFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_lowercase().as_str() {
            "mp3" => Some(AudioFormat::Mp3),
            "flac" => Some(AudioFormat::Flac),
            "wav" | "wave" => Some(AudioFormat::Wav),
            "aac" => Some(AudioFormat::Aac),
            "ogg" | "oga" | "opus" => Some(AudioFormat::Ogg),
            "m4a" | "mp4" => Some(AudioFormat::M4a),
            _ => None,
        }
    }

    pub fn from_file_name(file_name: &str) -> Option<Self> {
        Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    pub fn from_content_type(content_type: &str) -> Option<Self> {
        match content_type {
            "audio/mpeg" => Some(AudioFormat::Mp3),
            "audio/flac" | "audio/x-flac" => Some(AudioFormat::Flac),
            "audio/wav" | "audio/x-wav" => Some(AudioFormat::Wav),
            "audio/aac" => Some(AudioFormat::Aac),
            "audio/ogg" => Some(AudioFormat::Ogg),
            "audio/mp4" => Some(AudioFormat::M4a),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => ".mp3",
            AudioFormat::Flac => ".flac",
            AudioFormat::Wav => ".wav",
            AudioFormat::Aac => ".aac",
            AudioFormat::Ogg => ".ogg",
            AudioFormat::M4a => ".m4a",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub album_id: Option<String>,
    pub album_artist: Option<String>,
    pub genre: Option<String>,
    pub year: Option<u32>,
    pub track_number: Option<u32>,
    pub disc_number: Option<u32>,
    pub duration_secs: u32,
    pub format: AudioFormat,
    pub bitrate: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
    pub file_size: u64,
    pub file_name: String,
    pub object_key: String,
    pub cover_art_key: Option<String>,
    /// Tempo from the analysis collaborator
    pub bpm: Option<f32>,
    pub musical_key: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
    /// Mirror of the TrackTag join rows
    #[serde(default)]
    pub tags: Vec<String>,
    pub upload_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Track {
    /// The artist aggregate this track counts towards.
    pub fn credited_artist(&self) -> &str {
        self.album_artist
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.artist)
    }
}

/// Owner-editable subset of a track
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackPatch {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub year: Option<u32>,
    pub bpm: Option<f32>,
    pub musical_key: Option<String>,
}

impl TrackPatch {
    pub fn is_empty(&self) -> bool {
        self == &TrackPatch::default()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("patch has no fields".to_string());
        }
        for (field, value) in [("title", &self.title), ("artist", &self.artist)] {
            if let Some(value) = value {
                if value.trim().is_empty() {
                    return Err(format!("{} cannot be empty", field));
                }
                if value.len() > 500 {
                    return Err(format!("{} too long (max 500 chars)", field));
                }
            }
        }
        if let Some(bpm) = self.bpm {
            if !(1.0..=400.0).contains(&bpm) {
                return Err("bpm must be between 1 and 400".to_string());
            }
        }
        if let Some(year) = self.year {
            if !(1000..=9999).contains(&year) {
                return Err("year must have four digits".to_string());
            }
        }
        Ok(())
    }

    pub fn apply(&self, track: &mut Track) {
        if let Some(title) = &self.title {
            track.title = title.trim().to_string();
        }
        if let Some(artist) = &self.artist {
            track.artist = artist.trim().to_string();
        }
        if let Some(album) = &self.album {
            track.album = Some(album.trim().to_string()).filter(|a| !a.is_empty());
        }
        if let Some(genre) = &self.genre {
            track.genre = Some(genre.trim().to_string()).filter(|g| !g.is_empty());
        }
        if self.year.is_some() {
            track.year = self.year;
        }
        if self.bpm.is_some() {
            track.bpm = self.bpm;
        }
        if let Some(key) = &self.musical_key {
            track.musical_key = Some(key.clone());
        }
        track.updated_at = Utc::now();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_semantics() {
        assert!(Visibility::Public.is_discoverable());
        assert!(!Visibility::Unlisted.is_discoverable());
        assert!(Visibility::Unlisted.is_publicly_accessible());
        assert!(!Visibility::Private.is_publicly_accessible());
        assert_eq!(Visibility::default(), Visibility::Private);
    }

    #[test]
    fn test_audio_format_detection() {
        assert_eq!(AudioFormat::from_file_name("song.FLAC"), Some(AudioFormat::Flac));
        assert_eq!(AudioFormat::from_file_name("noext"), None);
        assert_eq!(AudioFormat::from_content_type("audio/x-wav"), Some(AudioFormat::Wav));
        assert_eq!(AudioFormat::M4a.extension(), ".m4a");
    }

    #[test]
    fn test_patch_validation() {
        assert!(TrackPatch::default().validate().is_err());

        let patch = TrackPatch {
            title: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(patch.validate().is_err());

        let patch = TrackPatch {
            bpm: Some(900.0),
            ..Default::default()
        };
        assert!(patch.validate().is_err());

        let patch = TrackPatch {
            title: Some("New Title".to_string()),
            bpm: Some(128.0),
            ..Default::default()
        };
        assert!(patch.validate().is_ok());
    }
}
