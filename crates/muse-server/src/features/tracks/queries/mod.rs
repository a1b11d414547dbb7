pub mod download;
pub mod get;
pub mod list;

pub use download::{DownloadTrackError, DownloadTrackQuery, DownloadTrackResponse};
pub use get::GetTrackQuery;
pub use list::{ListTracksByTagQuery, ListTracksQuery, TrackFilter};
