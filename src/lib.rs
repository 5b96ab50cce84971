// SPDX-License-Identifier: MIT

pub mod engine;
pub mod tasker;
