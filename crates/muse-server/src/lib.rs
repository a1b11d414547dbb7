//! Muse Server Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Media library backend: turns uploaded audio files into indexed library
//! entries and serves the library over HTTP.
//!
//! # Overview
//!
//! - **Storage**: one logical item table with two secondary indexes, backed
//!   by memory or PostgreSQL ([`table`]), and typed access patterns on top
//!   of it ([`repository`])
//! - **Objects**: presigned uploads and downloads against S3-compatible
//!   storage ([`objects`])
//! - **Ingestion**: a staged, resumable pipeline per confirmed upload
//!   ([`ingest`])
//! - **Search**: a best-effort indexing collaborator ([`search`])
//! - **API**: axum routes organised as feature slices ([`features`])
//!
//! # Architecture
//!
//! Writes are optimistic: every item carries a version and every mutation
//! is conditioned on the version it read. Uniqueness comes from conditional
//! creates, and multi-item changes go through one `transact` call. No
//! in-process lock spans more than one request.
//!
//! Commands (POST, PUT, PATCH, DELETE) validate their input, call the
//! repository, and report a per-command error that classifies into
//! [`muse_common::ErrorKind`]. [`AppError`] turns that kind into a status
//! code.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use muse_server::{repository::Repository, table::MemoryItemStore};
//!
//! let repo = Repository::new(Arc::new(MemoryItemStore::new()));
//! # let _ = repo;
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod features;
pub mod ingest;
pub mod middleware;
pub mod models;
pub mod objects;
pub mod repository;
pub mod retry;
pub mod search;
pub mod table;

pub use error::{ApiResult, AppError};
