//! Owner-defined tags and tag-scoped track listings

pub mod commands;
pub mod queries;
pub mod routes;

pub use commands::{CreateTagCommand, DeleteTagCommand, DeleteTagResponse, TagCommandError};
pub use routes::tags_routes;
