// SPDX-License-Identifier: MIT

//! Bounded free-list of task runtimes

use super::{Event, RunControl, TaskRuntime};
use crate::engine::task::XTask;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

pub struct RuntimePool {
    free: Mutex<Vec<TaskRuntime>>,
    capacity: usize,
}

impl RuntimePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Take a clean runtime bound to `task` and `events`
    ///
    /// Allocates when the free-list is empty. The runtime goes back to the
    /// pool when the returned guard is dropped, on every exit path.
    pub fn acquire(
        &self,
        task: Option<Arc<XTask>>,
        events: Vec<Event>,
        control: Arc<RunControl>,
    ) -> PooledRuntime<'_> {
        let recycled = self.free.lock().unwrap_or_else(|p| p.into_inner()).pop();
        let mut runtime = recycled.unwrap_or_else(|| {
            log::debug!("Runtime pool exhausted, allocating");
            TaskRuntime::new()
        });
        runtime.bind(task, events, control);
        PooledRuntime {
            runtime: Some(runtime),
            pool: self,
        }
    }

    /// Reset `runtime` and keep it if there is room
    pub fn release(&self, mut runtime: TaskRuntime) {
        runtime.reset();
        let mut free = self.free.lock().unwrap_or_else(|p| p.into_inner());
        if free.len() < self.capacity {
            free.push(runtime);
        }
    }

    pub fn available(&self) -> usize {
        self.free.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn drain(&self) {
        self.free.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}

/// A runtime on loan from a `RuntimePool`
pub struct PooledRuntime<'a> {
    runtime: Option<TaskRuntime>,
    pool: &'a RuntimePool,
}

impl Deref for PooledRuntime<'_> {
    type Target = TaskRuntime;

    fn deref(&self) -> &TaskRuntime {
        // Only `Drop` takes the runtime out
        self.runtime.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledRuntime<'_> {
    fn deref_mut(&mut self) -> &mut TaskRuntime {
        self.runtime.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledRuntime<'_> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            self.pool.release(runtime);
        }
    }
}
