//! # repovault core
//!
//! Shared, I/O-free logic for repovault: the data model, lexical path
//! arithmetic, the extension→language table, the line-aligned chunking
//! engine, the search-index abstraction (with an in-memory backend), and
//! the embedding-provider trait.
//!
//! This crate contains no tokio, sqlx, process spawning, or filesystem I/O.
//! The `repovault` application crate supplies the git-backed file store,
//! the SQLite index backend, and the HTTP embedding providers.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod index;
pub mod language;
pub mod models;
pub mod paths;
pub mod search;

pub use error::{Error, Result};
