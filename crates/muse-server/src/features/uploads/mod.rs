//! Upload lifecycle
//!
//! `presign` records a pending upload and returns a write URL, the client
//! puts the bytes, `confirm` verifies them and queues the upload for
//! ingestion. Status reads and reprocessing of failed uploads round it out.

pub mod commands;
pub mod queries;
pub mod routes;

pub use commands::{
    ConfirmUploadCommand, ConfirmUploadError, ConfirmUploadResponse, PresignUploadCommand,
    PresignUploadError, PresignUploadResponse, ReprocessUploadCommand, ReprocessUploadError,
    ReprocessUploadResponse,
};
pub use queries::{GetUploadQuery, ListUploadsQuery, UploadStatusResponse};
pub use routes::uploads_routes;
