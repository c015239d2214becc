// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

use crate::availability::DataAvailability;
use crate::config_tree::ConfigNode;
use crate::error::Error;
use crate::module::{ModuleId, ModuleStatus};
use crate::registry::attributes;
use crate::reset::ResetPropagator;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// State shared between the mainloop and its handles
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) availability: Arc<DataAvailability>,
    pub(crate) propagator: ResetPropagator,
    /// Configuration root carrying the mainloop `running` attribute
    pub(crate) root: ConfigNode,
    /// Mirror of the root `running` attribute
    pub(crate) running: AtomicBool,
    pub(crate) running_sync: Mutex<()>,
    pub(crate) shutdown: AtomicBool,
    pub(crate) cycle: AtomicU64,
}

impl Shared {
    pub(crate) fn new(availability: Arc<DataAvailability>, root: ConfigNode, running: bool) -> Self {
        Self {
            availability,
            propagator: ResetPropagator::default(),
            root,
            running: AtomicBool::new(running),
            running_sync: Mutex::new(()),
            shutdown: AtomicBool::new(false),
            cycle: AtomicU64::new(0),
        }
    }

    /// Mirror the root `running` attribute, read back under `running_sync` so that
    /// out-of-order notifications settle on the stored value
    pub(crate) fn sync_running(&self) {
        let _sync = self.running_sync.lock().unwrap_or_else(PoisonError::into_inner);
        if let Ok(running) = self.root.get_bool(attributes::RUNNING) {
            self.running.store(running, Ordering::Release);
        }
    }
}

/// Control handle of a mainloop, usable from any thread
#[derive(Debug, Clone)]
pub struct MainloopHandle {
    shared: Arc<Shared>,
}

impl MainloopHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn availability(&self) -> &Arc<DataAvailability> {
        &self.shared.availability
    }

    /// Snapshot of the data availability count
    pub fn query(&self) -> usize {
        self.shared.availability.query()
    }

    pub fn reset_propagator(&self) -> &ResetPropagator {
        &self.shared.propagator
    }

    pub fn reset_inputs(&self, source: ModuleId) -> usize {
        self.shared.propagator.reset_inputs(source)
    }

    pub fn reset_outputs(&self, source: ModuleId) -> usize {
        self.shared.propagator.reset_outputs(source)
    }

    pub fn reset_processors(&self, source: ModuleId) -> usize {
        self.shared.propagator.reset_processors(source)
    }

    pub fn reset_output_rev_deps(&self, source: ModuleId) -> usize {
        self.shared.propagator.reset_output_rev_deps(source)
    }

    pub fn status(&self, id: ModuleId) -> Option<ModuleStatus> {
        self.shared
            .propagator
            .read()
            .modules
            .get(&id)
            .map(|control| control.status())
    }

    /// Execution order as of the last cycle boundary
    pub fn execution_order(&self) -> Vec<ModuleId> {
        self.shared.propagator.read().order.clone()
    }

    /// Request a module start or stop at the next cycle boundary
    pub fn set_module_running(&self, id: ModuleId, running: bool) -> Result<(), Error> {
        let node = self
            .shared
            .propagator
            .read()
            .modules
            .get(&id)
            .map(|control| control.node.clone())
            .ok_or(Error::UnknownModule(id))?;
        node.put(attributes::RUNNING, running)
    }

    /// Stop all modules and pause the mainloop, or restart it, at the next cycle boundary.
    ///
    /// Sets the `running` attribute of the configuration root.
    pub fn set_running(&self, running: bool) -> Result<(), Error> {
        self.shared.root.put(attributes::RUNNING, running)
    }

    /// Whether the mainloop is asked to run its modules
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Completed cycles
    pub fn cycle(&self) -> u64 {
        self.shared.cycle.load(Ordering::Relaxed)
    }

    /// Ask [run](super::Mainloop::run) to shut down and return after the current cycle
    pub fn request_shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }
}
