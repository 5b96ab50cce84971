// SPDX-License-Identifier: MIT

//! Tasks and their lifecycle
//!
//! This module provides:
//! - `XTask` - a named, checksummed applet tree with at most one run in progress
//! - `TaskManager` - the set of enabled tasks, pausing and snapshot retention
//! - `EventRouter` - matches event batches against task triggers
//! - `TaskSnapshot` - bounded per-task execution history

pub mod manager;
pub mod router;
pub mod snapshot;
pub mod xtask;

pub use manager::{PauseListener, TaskManager};
pub use router::EventRouter;
pub use snapshot::{RunOutcome, SnapshotHistory, SnapshotRecorder, TaskSnapshot};
pub use xtask::{compute_checksum, TaskMetadata, TaskStateListener, TaskType, XTask};
