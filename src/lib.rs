//! shortcast - Multi-account YouTube Shorts upload scheduler
//!
//! Schedules short videos across many publishing accounts and uploads them
//! on time while staying inside each API project's daily quota.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`models`] - Projects, accounts, videos, uploads
//! - [`storage`] - Repository traits, SQLite and in-memory stores
//! - [`quota`] - Daily quota ledger and project rotation
//! - [`scheduler`] - Planner, upload state machine, dispatcher and worker
//! - [`service`] - Scheduling operations for dashboards and the CLI
//! - [`transport`] - Upload transport and credential seams
//! - [`metrics`] - Prometheus metrics
//! - [`ops`] - Health, metrics and status HTTP endpoints
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use shortcast::scheduler::SchedulePlanner;
//! use shortcast::service::{SchedulingService, ServiceConfig};
//! use shortcast::storage::SqliteStore;
//!
//! fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(SqliteStore::new("data/shortcast.db")?);
//!     let service = SchedulingService::new(store, SchedulePlanner::default(), ServiceConfig::default())?;
//!     let project = service.create_project("main", Some(10_000))?;
//!     println!("{} uploads left today", service.quota_status()?.uploads_remaining);
//!     # let _ = project;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod ops;
pub mod quota;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod transport;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, Result, ShortcastErrorTrait};
    pub use crate::models::{Account, ApiProject, Cadence, Upload, UploadStatus, Video};
    pub use crate::quota::QuotaLedger;
    pub use crate::scheduler::{Dispatcher, SchedulePlanner, Worker};
    pub use crate::service::SchedulingService;
    pub use crate::storage::{MemoryStore, SqliteStore, Store};
}

// Direct re-exports for convenience
pub use models::{Account, ApiProject, Cadence, Upload, UploadStatus, Video};
