//! Upload scheduling and dispatch
//!
//! # Overview
//!
//! Scheduling happens in two phases. At request time the [`planner`] turns a
//! batch of videos into collision-free, jittered timestamps for one account.
//! At run time the [`worker`] wakes up every poll interval, rolls over daily
//! quota windows and asks the [`dispatcher`] to push due uploads through the
//! transport. Every status change goes through the [`state`] machine.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐       ┌─────────────────────────────────────┐
//! │   SchedulePlanner    │       │               Worker                │
//! │  (ChaCha8 jitter,    │       │  interval tick ─► reset_due ─► run  │
//! │   collision rule)    │       └─────────────────┬───────────────────┘
//! └──────────┬───────────┘                         │
//!            │ scheduled uploads                   ▼
//!            ▼                       ┌──────────────────────────────┐
//!     ┌─────────────┐  due uploads   │          Dispatcher          │
//!     │    Store    │ ─────────────► │ token ─► rotation+reserve ─► │
//!     └─────────────┘ ◄───────────── │ claim ─► transport ─► outcome│
//!                      CAS updates   └──────────────┬───────────────┘
//!                                                   │
//!                                         ┌─────────▼─────────┐
//!                                         │ UploadStateMachine│
//!                                         └───────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`planner`] - Timestamp assignment with jitter and collision avoidance
//! - [`state`] - Upload lifecycle transition function
//! - [`dispatcher`] - One poll cycle
//! - [`worker`] - Periodic loop, quota resets, graceful shutdown
//!
//! # Defaults
//!
//! | Setting | Default | Description |
//! |---------|---------|-------------|
//! | `jitter_minutes` | 30 | Random offset window around each slot |
//! | `batch_size` | 5 | Uploads attempted per cycle |
//! | `max_retries` | 3 | Retryable failures before `failed` |
//! | `transport_timeout` | 300s | Bound on one transport call |
//! | `poll_interval` | 60s | Time between cycles |

pub mod dispatcher;
pub mod planner;
pub mod state;
pub mod worker;

pub use dispatcher::{CycleReport, Dispatcher, DispatcherConfig};
pub use planner::{
    parse_start, PlannedSlot, SchedulePlanner, DEFAULT_JITTER_MINUTES, MAX_PLAN_ITEMS,
};
pub use state::{UploadEvent, UploadStateMachine, DEFAULT_MAX_RETRIES};
pub use worker::{Worker, WorkerConfig, WorkerEvent};
