// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Reset propagation to classes of running modules

use crate::module::{ModuleControl, ModuleId, ModuleKind, ModuleStatus};
use evflow_log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Pending reset request of one module.
///
/// Holds the id of the module whose reset triggered the request. A new request overwrites
/// a pending one; taking the request clears it.
#[derive(Debug, Default)]
pub(crate) struct ResetSlot(AtomicU32);

impl ResetSlot {
    const NONE: u32 = 0;

    pub(crate) fn store(&self, source: ModuleId) {
        self.0.store(u32::from(source.get()) + 1, Ordering::Release);
    }

    pub(crate) fn take(&self) -> Option<ModuleId> {
        match self.0.swap(Self::NONE, Ordering::AcqRel) {
            Self::NONE => None,
            value => u16::try_from(value - 1).ok().map(ModuleId::from),
        }
    }

    #[cfg(test)]
    pub(crate) fn peek(&self) -> Option<ModuleId> {
        match self.0.load(Ordering::Acquire) {
            Self::NONE => None,
            value => u16::try_from(value - 1).ok().map(ModuleId::from),
        }
    }
}

/// Snapshot of the built pipeline shared with control threads
#[derive(Debug, Default)]
pub(crate) struct Topology {
    pub(crate) modules: BTreeMap<ModuleId, Arc<ModuleControl>>,
    /// Current execution order
    pub(crate) order: Vec<ModuleId>,
    /// Direct consumers of each module's streams
    pub(crate) downstream: BTreeMap<ModuleId, BTreeSet<ModuleId>>,
}

/// Signals reset requests to running modules.
///
/// Safe to use from any thread. The lock is only contended while the mainloop publishes a
/// rebuilt graph; cycles never take it.
#[derive(Debug, Clone, Default)]
pub struct ResetPropagator {
    topology: Arc<RwLock<Topology>>,
}

impl ResetPropagator {
    #[cfg(test)]
    fn new(topology: Arc<RwLock<Topology>>) -> Self {
        Self { topology }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Topology> {
        self.topology.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Topology> {
        self.topology.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Request a reset of all running input modules. Returns the number of modules signalled.
    pub fn reset_inputs(&self, source: ModuleId) -> usize {
        self.signal_kind(source, ModuleKind::Input)
    }

    /// Request a reset of all running output modules. Returns the number of modules signalled.
    pub fn reset_outputs(&self, source: ModuleId) -> usize {
        self.signal_kind(source, ModuleKind::Output)
    }

    /// Request a reset of all running processors. Returns the number of modules signalled.
    pub fn reset_processors(&self, source: ModuleId) -> usize {
        self.signal_kind(source, ModuleKind::Processor)
    }

    /// Request a reset of the running direct consumers of `source`'s streams
    pub fn reset_output_rev_deps(&self, source: ModuleId) -> usize {
        let topology = self.read();
        let Some(consumers) = topology.downstream.get(&source) else {
            return 0;
        };
        Self::signal(&topology, source, |control| consumers.contains(&control.id))
    }

    fn signal_kind(&self, source: ModuleId, kind: ModuleKind) -> usize {
        Self::signal(&self.read(), source, |control| control.kind == kind)
    }

    fn signal(
        topology: &Topology,
        source: ModuleId,
        filter: impl Fn(&ModuleControl) -> bool,
    ) -> usize {
        let mut count = 0;
        for id in &topology.order {
            let Some(control) = topology.modules.get(id) else {
                continue;
            };
            if filter(control) && control.status() == ModuleStatus::Running {
                control.reset.store(source);
                count += 1;
            }
        }
        debug!("Reset requested by {source}, signalled {count} modules");
        count
    }
}
