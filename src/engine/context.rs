// SPDX-License-Identifier: MIT

//! Process-scoped engine context
//!
//! Holds everything runs share: configuration, the applet registry, both
//! pools, global values and the optional target supplier. Build one per
//! process, share it through `Arc` and call `shutdown` on teardown.

use crate::engine::applet::{AppletRegistry, AppletTree, ResultPool};
use crate::engine::config::EngineConfig;
use crate::engine::error::StaticError;
use crate::engine::runtime::{GlobalValues, RuntimePool, TargetSupplier};
use std::sync::Arc;

pub struct EngineContext {
    config: EngineConfig,
    registry: AppletRegistry,
    runtimes: RuntimePool,
    results: ResultPool,
    globals: GlobalValues,
    targets: Option<Arc<dyn TargetSupplier>>,
}

impl EngineContext {
    pub fn new(config: EngineConfig, registry: AppletRegistry) -> Self {
        Self {
            runtimes: RuntimePool::new(config.runtime_pool_size),
            results: ResultPool::new(config.result_pool_size),
            globals: GlobalValues::new(),
            targets: None,
            registry,
            config,
        }
    }

    pub fn with_target_supplier(mut self, supplier: Arc<dyn TargetSupplier>) -> Self {
        self.targets = Some(supplier);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &AppletRegistry {
        &self.registry
    }

    pub fn runtimes(&self) -> &RuntimePool {
        &self.runtimes
    }

    pub fn results(&self) -> &ResultPool {
        &self.results
    }

    pub fn globals(&self) -> &GlobalValues {
        &self.globals
    }

    pub fn target_supplier(&self) -> Option<&Arc<dyn TargetSupplier>> {
        self.targets.as_ref()
    }

    /// Run the static checks with the configured depth limit
    pub fn finalize(&self, tree: &mut AppletTree) -> Result<(), StaticError> {
        tree.finalize(&self.registry, self.config.max_flow_depth)
    }

    /// Drop pooled objects
    pub fn shutdown(&self) {
        self.runtimes.drain();
        self.results.drain();
        log::info!("Engine context shut down");
    }
}
