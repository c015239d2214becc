// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Module and related structs and traits

use crate::availability::DataAvailability;
use crate::config_tree::ConfigNode;
use crate::error::ModuleError;
use crate::event::{EventContainer, OutputCollector};
use crate::reset::ResetSlot;
use evflow_log::{level_filter_from_u8, Level};
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

/// Identifies a module within one pipeline run
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ModuleId(u16);

impl ModuleId {
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u16 {
        self.0
    }
}

impl From<u16> for ModuleId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<ModuleId> for u16 {
    fn from(value: ModuleId) -> Self {
        value.0
    }
}

impl From<&ModuleId> for u16 {
    fn from(value: &ModuleId) -> Self {
        value.0
    }
}

impl Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "M{}", self.0)
    }
}

/// Role of a module in the dataflow graph
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum ModuleKind {
    /// Creates data, consumes no streams
    Input,
    /// Consumes streams and creates or modifies data
    Processor,
    /// Consumes streams without modifying them
    Output,
}

impl Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModuleKind::Input => "input",
            ModuleKind::Processor => "processor",
            ModuleKind::Output => "output",
        };
        f.write_str(name)
    }
}

/// Lifecycle status of a module.
///
/// A run of a module moves `Stopped -> Running -> Stopping -> Stopped`.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
#[repr(u8)]
pub enum ModuleStatus {
    Stopped = 0,
    Running = 1,
    Stopping = 2,
}

impl ModuleStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ModuleStatus::Running,
            2 => ModuleStatus::Stopping,
            _ => ModuleStatus::Stopped,
        }
    }

    /// Whether `self -> next` is a legal step of the lifecycle
    pub fn can_transition_to(self, next: ModuleStatus) -> bool {
        matches!(
            (self, next),
            (ModuleStatus::Stopped, ModuleStatus::Running)
                | (ModuleStatus::Running, ModuleStatus::Stopping)
                | (ModuleStatus::Stopping, ModuleStatus::Stopped)
        )
    }
}

impl Display for ModuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModuleStatus::Stopped => "stopped",
            ModuleStatus::Running => "running",
            ModuleStatus::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Module trait, to be implemented by any processing unit run by the mainloop.
///
/// All callbacks are invoked on the mainloop thread. Failures are reported through
/// [ModuleError] and never by panicking.
pub trait Module {
    /// Called when the module is started. Allocate state and create configuration attributes.
    fn init(&mut self, _ctx: &ModuleContext) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Called once per cycle with the inputs visible to this module.
    ///
    /// Must not block. Having no new data is not a failure: return `Ok` without output.
    fn run(
        &mut self,
        ctx: &ModuleContext,
        input: &mut EventContainer,
        output: &mut OutputCollector,
    ) -> Result<(), ModuleError>;

    /// Called before the next run after an attribute of the module's node changed.
    /// Reload every setting from the node.
    fn config(&mut self, _ctx: &ModuleContext) {}

    /// Called after a run if a reset request was not consumed by the module itself
    fn reset(&mut self, _ctx: &ModuleContext, _source: ModuleId) {}

    /// Called when the module is stopped. Release state and drop subscriptions.
    fn exit(&mut self, _ctx: &ModuleContext) {}
}

/// Module factory trait.
///
/// A factory is kept for the lifetime of the registry entry and creates a fresh module
/// instance every time the module is started. Instances are created on the mainloop
/// thread, so modules need not implement `Send`.
pub trait ModuleFactory: Fn(ModuleId) -> Box<dyn Module> + Send {}

impl<T: Fn(ModuleId) -> Box<dyn Module> + Send> ModuleFactory for T {}

/// Per-module state shared between the mainloop and control threads.
///
/// Every field is accessed atomically; no lock is taken on the mainloop's hot path. Only
/// attribute listeners take `attribute_sync`, to apply node values in write order.
#[derive(Debug)]
pub(crate) struct ModuleControl {
    pub(crate) id: ModuleId,
    pub(crate) kind: ModuleKind,
    pub(crate) node: ConfigNode,
    status: AtomicU8,
    run_requested: AtomicBool,
    config_pending: AtomicBool,
    log_level: AtomicU8,
    pub(crate) reset: ResetSlot,
    pub(crate) attribute_sync: Mutex<()>,
}

impl ModuleControl {
    pub(crate) fn new(id: ModuleId, kind: ModuleKind, node: ConfigNode, log_level: u8) -> Self {
        Self {
            id,
            kind,
            node,
            status: AtomicU8::new(ModuleStatus::Stopped as u8),
            run_requested: AtomicBool::new(false),
            config_pending: AtomicBool::new(false),
            log_level: AtomicU8::new(log_level),
            reset: ResetSlot::default(),
            attribute_sync: Mutex::new(()),
        }
    }

    pub(crate) fn status(&self) -> ModuleStatus {
        ModuleStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn store_status(&self, status: ModuleStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub(crate) fn run_requested(&self) -> bool {
        self.run_requested.load(Ordering::Acquire)
    }

    pub(crate) fn request_run(&self, run: bool) {
        self.run_requested.store(run, Ordering::Release);
    }

    pub(crate) fn mark_config_pending(&self) {
        self.config_pending.store(true, Ordering::Release);
    }

    pub(crate) fn take_config_pending(&self) -> bool {
        self.config_pending.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn set_log_level(&self, level: u8) {
        self.log_level.store(level, Ordering::Relaxed);
    }

    pub(crate) fn log_level(&self) -> u8 {
        self.log_level.load(Ordering::Relaxed)
    }
}

/// Everything a module may access from its callbacks
pub struct ModuleContext {
    name: Arc<str>,
    control: Arc<ModuleControl>,
    availability: Arc<DataAvailability>,
}

impl ModuleContext {
    pub(crate) fn new(
        name: Arc<str>,
        control: Arc<ModuleControl>,
        availability: Arc<DataAvailability>,
    ) -> Self {
        Self {
            name,
            control,
            availability,
        }
    }

    pub fn id(&self) -> ModuleId {
        self.control.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ModuleKind {
        self.control.kind
    }

    /// Configuration node of this module, the authoritative source of its settings
    pub fn node(&self) -> &ConfigNode {
        &self.control.node
    }

    /// Take the pending reset request, if any.
    ///
    /// Returns the id of the module that triggered the reset. The request is cleared.
    pub fn take_reset(&self) -> Option<ModuleId> {
        self.control.reset.take()
    }

    /// The pipeline-wide data availability signal
    pub fn availability(&self) -> &Arc<DataAvailability> {
        &self.availability
    }

    /// Check the module-specific log level
    pub fn log_enabled(&self, level: Level) -> bool {
        level <= level_filter_from_u8(self.control.log_level())
    }

    /// Log with the module name as target, filtered by the module's `logLevel` attribute
    pub fn log(&self, level: Level, args: std::fmt::Arguments) {
        if self.log_enabled(level) {
            evflow_log::log!(target: self.name(), level, "{}", args);
        }
    }
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("id", &self.control.id)
            .field("name", &self.name)
            .finish()
    }
}
