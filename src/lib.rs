//! # repovault
//!
//! A git-backed versioned file store with an eventually consistent code
//! search index.
//!
//! Every file or folder mutation lands in a repository working tree and is
//! recorded as one git commit. A change event follows each commit; the
//! index side consumes those events and keeps a searchable projection of
//! every code file (chunked, optionally embedded) in step with the store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  commit  ┌─────────┐
//! │  File store  │─────────▶│   git   │
//! │ (resolver)   │          └─────────┘
//! └──────┬───────┘
//!        │ ChangeEvent
//!        ▼
//! ┌──────────────┐   ┌──────────────────┐   ┌──────────────┐
//! │   Consumer   │──▶│ Ingest: classify │──▶│ Search index │
//! │              │   │ chunk + embed    │   │ SQLite/memory│
//! └──────────────┘   └──────────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rv init                                   # create the index database
//! rv repo init demo                         # new working tree + git init
//! rv file add --repo demo src/App.java --content 'class App {}'
//! rv index repo --repo demo                 # full rebuild
//! rv search "App" --repo demo
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`resolver`] | Repository roots and bounds-checked paths |
//! | [`vcs`] | Git adapter |
//! | [`file_store`] | Versioned file and folder operations |
//! | [`events`] | Change events and publishers |
//! | [`ingest`] | Single-file ingestion |
//! | [`ingest_repo`] | Full-repository ingestion |
//! | [`consumer`] | Event-driven index maintenance |
//! | [`sqlite_index`] | SQLite FTS5 search index |
//! | [`embedding`] | HTTP embedding providers |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//!
//! Pure logic (data model, chunking, language table, the index trait) lives
//! in the `repovault-core` crate, re-exported here.

pub mod config;
pub mod consumer;
pub mod db;
pub mod embedding;
pub mod events;
pub mod file_store;
pub mod ingest;
pub mod ingest_repo;
pub mod migrate;
pub mod progress;
pub mod resolver;
pub mod search;
pub mod sqlite_index;
pub mod stats;
pub mod vcs;

pub use repovault_core;
pub use repovault_core::{Error, Result};
