//! Shared utilities and types for feature modules
//!
//! - **pagination**: cursor query parameters
//! - **validation**: input validation helpers

pub mod pagination;
pub mod validation;

pub use pagination::PageParams;
pub use validation::{validate_name, NameError};
