// SPDX-License-Identifier: MIT

//! Application layer: built-in applets and file loading

pub mod applets;
pub mod loader;

pub use loader::{EventBatch, TaskFile, TaskLoader};
