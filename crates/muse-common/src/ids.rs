//! Identifier and key-component validation
//!
//! Stages validate identifiers at their boundary before touching any
//! backend, so a malformed id fails fast as [`ErrorKind::Validation`].
//!
//! [`ErrorKind::Validation`]: crate::ErrorKind::Validation

use uuid::Uuid;

use crate::error::{MuseError, Result};

/// Maximum byte length of a single key component or object key.
pub const MAX_KEY_LEN: usize = 1024;

/// Delimiter used when composing table keys.
pub const KEY_DELIMITER: char = '#';

/// Parse a hyphenated UUID, rejecting anything else.
pub fn parse_uuid(field: &'static str, value: &str) -> Result<Uuid> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(MuseError::InvalidId {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    Uuid::try_parse(trimmed).map_err(|e| MuseError::InvalidId {
        field,
        reason: e.to_string(),
    })
}

/// Validate an object-store key: relative, bounded, printable.
pub fn validate_object_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(MuseError::InvalidObjectKey("key is empty".to_string()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(MuseError::InvalidObjectKey(format!(
            "key exceeds {} bytes",
            MAX_KEY_LEN
        )));
    }
    if key.starts_with('/') {
        return Err(MuseError::InvalidObjectKey("key must be relative".to_string()));
    }
    if key.chars().any(char::is_control) {
        return Err(MuseError::InvalidObjectKey(
            "key contains control characters".to_string(),
        ));
    }
    if key.split('/').any(|segment| segment == "..") {
        return Err(MuseError::InvalidObjectKey(
            "key contains a parent segment".to_string(),
        ));
    }
    Ok(())
}

/// Validate free text that will be embedded in a table key
/// (tag names).
pub fn validate_key_part(field: &'static str, value: &str) -> Result<()> {
    let reason = if value.trim().is_empty() {
        Some("must not be empty".to_string())
    } else if value.len() > MAX_KEY_LEN {
        Some(format!("exceeds {} bytes", MAX_KEY_LEN))
    } else if value.contains(KEY_DELIMITER) {
        Some(format!("must not contain '{}'", KEY_DELIMITER))
    } else if value.chars().any(char::is_control) {
        Some("contains control characters".to_string())
    } else {
        None
    };

    match reason {
        Some(reason) => Err(MuseError::InvalidKeyPart { field, reason }),
        None => Ok(()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_uuid_accepts_v4() {
        let id = Uuid::new_v4();
        assert_eq!(parse_uuid("upload_id", &id.to_string()).unwrap(), id);
    }

    #[test]
    fn test_parse_uuid_rejects_garbage() {
        assert!(parse_uuid("upload_id", "").is_err());
        assert!(parse_uuid("upload_id", "not-a-uuid").is_err());
        assert!(parse_uuid("owner_id", "USER#123").is_err());
    }

    #[test]
    fn test_validate_object_key() {
        assert!(validate_object_key("uploads/u/1/song.mp3").is_ok());
        assert!(validate_object_key("").is_err());
        assert!(validate_object_key("/abs/path").is_err());
        assert!(validate_object_key("uploads/../secrets").is_err());
        assert!(validate_object_key("bad\nkey").is_err());
        assert!(validate_object_key(&"k".repeat(MAX_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_key_part() {
        assert!(validate_key_part("artist", "Boards of Canada").is_ok());
        assert!(validate_key_part("artist", "AC#DC").is_err());
        assert!(validate_key_part("tag", "   ").is_err());
    }

    proptest! {
        #[test]
        fn prop_key_part_without_delimiter_is_valid(s in "[a-zA-Z0-9 _.-]{1,64}") {
            prop_assume!(!s.trim().is_empty());
            prop_assert!(validate_key_part("tag", &s).is_ok());
        }

        #[test]
        fn prop_key_part_with_delimiter_is_rejected(a in "[a-z]{0,8}", b in "[a-z]{0,8}") {
            let value = format!("{}#{}", a, b);
            prop_assert!(validate_key_part("tag", &value).is_err());
        }
    }
}
