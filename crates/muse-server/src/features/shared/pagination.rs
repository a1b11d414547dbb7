//! Cursor pagination parameters
//!
//! Listings accept `?cursor=...&limit=...`. The cursor is whatever the
//! previous page returned as `next_cursor` and is never interpreted here.

use muse_common::Cursor;
use serde::{Deserialize, Serialize};

use crate::repository::page_size;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageParams {
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

impl PageParams {
    pub fn cursor(&self) -> Option<Cursor> {
        self.cursor
            .as_deref()
            .filter(|raw| !raw.is_empty())
            .map(|raw| Cursor::from(raw.to_string()))
    }

    /// Requested page size, clamped to the store's limits.
    pub fn limit(&self) -> usize {
        page_size(self.limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::DEFAULT_PAGE_SIZE;

    #[test]
    fn test_defaults() {
        let params = PageParams::default();
        assert!(params.cursor().is_none());
        assert_eq!(params.limit(), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_empty_cursor_is_first_page() {
        let params = PageParams {
            cursor: Some(String::new()),
            limit: Some(0),
        };
        assert!(params.cursor().is_none());
        assert_eq!(params.limit(), 1);
    }
}
