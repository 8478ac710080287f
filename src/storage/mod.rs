//! Persistence for projects, accounts, videos and uploads
//!
//! The engine talks to storage only through the traits in [`repository`];
//! [`SqliteStore`] is the production backend and [`MemoryStore`] backs
//! tests and embedding.

pub mod repository;
pub mod sqlite;

use std::sync::Arc;

pub use repository::{
    AccountRepository, MemoryStore, ProjectRepository, Store, UploadFilter, UploadRepository,
    VideoFilter, VideoRepository,
};
pub use sqlite::SqliteStore;

/// Shared handle to the whole store
pub type SharedStore = Arc<dyn Store>;

/// Shared handle to project persistence (used by the quota ledger)
pub type SharedProjectRepository = Arc<dyn ProjectRepository>;
