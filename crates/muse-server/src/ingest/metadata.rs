//! Audio tag extraction
//!
//! Decodes tags, stream properties and the first embedded picture from an
//! in-memory payload. Parsing is CPU bound; callers run it on the blocking
//! pool.

use lofty::{
    file::{AudioFile, FileType, TaggedFile, TaggedFileExt},
    prelude::Accessor,
    probe::Probe,
    tag::{ItemKey, Tag},
};
use std::{io::Cursor, path::Path};
use thiserror::Error;
use tracing::debug;

use crate::models::{AudioFormat, AudioMetadata};

/// Artist recorded when the payload carries none
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("Unsupported audio format: {0}")]
    Unsupported(String),

    #[error("Corrupt audio payload: {0}")]
    Corrupt(String),
}

/// Embedded artwork
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverArt {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl CoverArt {
    /// File extension for the stored image, `.jpg` when the type is unknown.
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/png" => ".png",
            "image/gif" => ".gif",
            "image/webp" => ".webp",
            _ => ".jpg",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedAudio {
    pub metadata: AudioMetadata,
    pub cover: Option<CoverArt>,
}

pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], file_name: &str) -> Result<ExtractedAudio, ExtractError>;
}

/// Extractor backed by `lofty`
#[derive(Debug, Clone, Copy, Default)]
pub struct LoftyExtractor;

impl MetadataExtractor for LoftyExtractor {
    fn extract(&self, bytes: &[u8], file_name: &str) -> Result<ExtractedAudio, ExtractError> {
        let tagged = Probe::new(Cursor::new(bytes))
            .guess_file_type()
            .map_err(|e| ExtractError::Corrupt(e.to_string()))?
            .read()
            .map_err(|e| ExtractError::Corrupt(e.to_string()))?;

        let format = format_of(tagged.file_type())
            .or_else(|| AudioFormat::from_file_name(file_name))
            .ok_or_else(|| ExtractError::Unsupported(format!("{:?}", tagged.file_type())))?;

        let metadata = read_metadata(&tagged, format, file_name);
        let cover = first_picture(&tagged);
        debug!(
            title = %metadata.title,
            duration = metadata.duration_secs,
            cover = cover.is_some(),
            "Extracted audio metadata"
        );
        Ok(ExtractedAudio { metadata, cover })
    }
}

fn format_of(file_type: FileType) -> Option<AudioFormat> {
    match file_type {
        FileType::Mpeg => Some(AudioFormat::Mp3),
        FileType::Flac => Some(AudioFormat::Flac),
        FileType::Wav => Some(AudioFormat::Wav),
        FileType::Aac => Some(AudioFormat::Aac),
        FileType::Vorbis | FileType::Opus => Some(AudioFormat::Ogg),
        FileType::Mp4 => Some(AudioFormat::M4a),
        _ => None,
    }
}

/// First non-blank value, primary tag first.
fn first_value<F>(tagged: &TaggedFile, extractor: F) -> Option<String>
where
    F: Fn(&Tag) -> Option<String>,
{
    tagged
        .primary_tag()
        .into_iter()
        .chain(tagged.tags())
        .filter_map(&extractor)
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

/// Leading four digits of a date such as `1998-04-20`.
fn year_of(date: &str) -> Option<u32> {
    let digits: String = date.trim().chars().take(4).collect();
    if digits.len() == 4 && digits.chars().all(|c| c.is_ascii_digit()) {
        digits.parse().ok()
    } else {
        None
    }
}

fn file_stem(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.trim().is_empty())
        .unwrap_or(file_name)
        .to_string()
}

fn read_metadata(tagged: &TaggedFile, format: AudioFormat, file_name: &str) -> AudioMetadata {
    let properties = tagged.properties();

    let title = first_value(tagged, |tag| tag.title().map(|v| v.into_owned()))
        .unwrap_or_else(|| file_stem(file_name));
    let artist = first_value(tagged, |tag| tag.artist().map(|v| v.into_owned()))
        .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());
    let year = first_value(tagged, |tag| {
        tag.get_string(&ItemKey::Year)
            .or_else(|| tag.get_string(&ItemKey::RecordingDate))
            .map(str::to_string)
    })
    .as_deref()
    .and_then(year_of);

    AudioMetadata {
        title,
        artist,
        album: first_value(tagged, |tag| tag.album().map(|v| v.into_owned())),
        album_artist: first_value(tagged, |tag| {
            tag.get_string(&ItemKey::AlbumArtist).map(str::to_string)
        }),
        genre: first_value(tagged, |tag| tag.genre().map(|v| v.into_owned())),
        year,
        track_number: tagged.primary_tag().and_then(|tag| tag.track()),
        disc_number: tagged.primary_tag().and_then(|tag| tag.disk()),
        duration_secs: u32::try_from(properties.duration().as_secs()).unwrap_or(u32::MAX),
        bitrate: properties.audio_bitrate(),
        sample_rate: properties.sample_rate(),
        channels: properties.channels(),
        format,
        has_cover_art: tagged.tags().iter().any(|tag| !tag.pictures().is_empty()),
    }
}

fn first_picture(tagged: &TaggedFile) -> Option<CoverArt> {
    let picture = tagged
        .primary_tag()
        .into_iter()
        .chain(tagged.tags())
        .find_map(|tag| tag.pictures().first())?;
    Some(CoverArt {
        data: picture.data().to_vec(),
        mime_type: picture
            .mime_type()
            .map(|mime| mime.as_str().to_string())
            .unwrap_or_else(|| "image/jpeg".to_string()),
    })
}

/// Minimal PCM WAV payload, for tests that need decodable audio.
#[cfg(test)]
pub(crate) fn wav_bytes(seconds: u32) -> Vec<u8> {
    const SAMPLE_RATE: u32 = 8_000;
    const BLOCK_ALIGN: u16 = 2;
    let data_len = SAMPLE_RATE * u32::from(BLOCK_ALIGN) * seconds;

    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    out.extend_from_slice(&(SAMPLE_RATE * u32::from(BLOCK_ALIGN)).to_le_bytes());
    out.extend_from_slice(&BLOCK_ALIGN.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.resize(44 + data_len as usize, 0);
    out
}
