//! Muse Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the Muse workspace.
//!
//! # Overview
//!
//! - **Error Handling**: the cross-layer [`ErrorKind`] taxonomy and [`MuseError`]
//! - **Identifiers**: validation of upload/owner ids and object keys
//! - **Cursors**: the opaque pagination token handed to clients
//! - **Logging**: `tracing` subscriber bootstrap shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use muse_common::{ids, Result};
//!
//! fn check(upload_id: &str) -> Result<()> {
//!     let id = ids::parse_uuid("upload_id", upload_id)?;
//!     tracing::info!(upload_id = %id, "upload id accepted");
//!     Ok(())
//! }
//! ```

pub mod cursor;
pub mod error;
pub mod ids;
pub mod logging;

// Re-export commonly used types
pub use cursor::Cursor;
pub use error::{ErrorKind, MuseError, Result};
