pub mod delete;
pub mod tag;
pub mod update;
pub mod visibility;

pub use delete::{DeleteTrackCommand, DeleteTrackError};
pub use tag::{TagTrackCommand, TagTrackError, UntagTrackCommand};
pub use update::{UpdateTrackCommand, UpdateTrackError};
pub use visibility::{SetVisibilityCommand, SetVisibilityError};
