//! Opaque pagination cursors
//!
//! A cursor is the serialized position of the last key a range scan
//! examined. Callers hand it back unmodified; absence means "start of range".

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{MuseError, Result};

/// Cursors larger than this are rejected before decoding.
const MAX_CURSOR_LEN: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    /// Encode a position as URL-safe base64 JSON.
    pub fn encode<T: Serialize>(position: &T) -> Result<Self> {
        let json = serde_json::to_vec(position)?;
        Ok(Self(URL_SAFE_NO_PAD.encode(json)))
    }

    /// Decode back into the position type that produced it.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        if self.0.is_empty() || self.0.len() > MAX_CURSOR_LEN {
            return Err(MuseError::MalformedCursor);
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(self.0.as_bytes())
            .map_err(|_| MuseError::MalformedCursor)?;
        serde_json::from_slice(&bytes).map_err(|_| MuseError::MalformedCursor)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Cursor {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
