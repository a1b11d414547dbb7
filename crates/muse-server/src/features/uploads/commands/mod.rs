pub mod confirm;
pub mod presign;
pub mod reprocess;

pub use confirm::{ConfirmUploadCommand, ConfirmUploadError, ConfirmUploadResponse};
pub use presign::{PresignUploadCommand, PresignUploadError, PresignUploadResponse};
pub use reprocess::{ReprocessUploadCommand, ReprocessUploadError, ReprocessUploadResponse};
