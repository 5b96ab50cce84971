// SPDX-License-Identifier: MIT

//! Execution runtime
//!
//! This module provides:
//! - `Event` - externally observed events fed to the router
//! - `TaskRuntime` / `RuntimePool` - pooled per-run context and its free-list
//! - `RunControl` - cancellation and suspension handle of one run
//! - `Evaluator` - the interpreter walking an `AppletTree`
//! - `GlobalValues` - process-wide scoped values

pub mod control;
pub mod evaluator;
pub mod event;
pub mod globals;
pub mod pool;
mod referents;
pub mod task_runtime;

pub use control::{RunControl, RunState};
pub use evaluator::{Evaluator, Outcome};
pub use event::{dedup_events, ComponentInfo, Event, EventType};
pub use globals::{GlobalValues, Scope, ScopedKey};
pub use pool::{PooledRuntime, RuntimePool};
pub use task_runtime::{RuntimeObserver, Target, TargetSupplier, TaskRuntime};
