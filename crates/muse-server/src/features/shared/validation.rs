//! Input validation utilities

use thiserror::Error;

/// Longest accepted display name or file name
pub const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("{0} is required and cannot be empty")]
    Required(&'static str),
    #[error("{0} must not exceed {MAX_NAME_LEN} characters")]
    TooLong(&'static str),
}

/// Non-blank and at most [`MAX_NAME_LEN`] characters.
pub fn validate_name(field: &'static str, value: &str) -> Result<(), NameError> {
    if value.trim().is_empty() {
        return Err(NameError::Required(field));
    }
    if value.chars().count() > MAX_NAME_LEN {
        return Err(NameError::TooLong(field));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("name", "Road Trip").is_ok());
        assert_eq!(validate_name("name", "   "), Err(NameError::Required("name")));
        assert_eq!(
            validate_name("name", &"x".repeat(256)),
            Err(NameError::TooLong("name"))
        );
        assert!(validate_name("name", &"é".repeat(255)).is_ok());
    }
}
