// SPDX-License-Identifier: MIT

//! Applet interpretation engine
//!
//! - `applet` - node model, tree arena, registry and persisted shape
//! - `runtime` - events, pooled run context and the evaluator
//! - `task` - tasks, the task manager and the event router

pub mod applet;
pub mod config;
pub mod context;
pub mod error;
pub mod runtime;
pub mod task;

pub use config::EngineConfig;
pub use context::EngineContext;
pub use error::{EngineError, StaticError, StaticErrorCode};
