pub mod list;
pub mod status;

pub use list::ListUploadsQuery;
pub use status::{GetUploadQuery, UploadStatusResponse};
