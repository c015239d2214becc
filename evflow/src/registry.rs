// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Module registry

use crate::availability::DataAvailability;
use crate::config_tree::{AttributeEvent, AttributeEventKind, Bounds, ConfigNode, Flags, Subscription};
use crate::error::{Error, ModuleError};
use crate::event::{EventContainer, OutputCollector};
use crate::module::{
    Module, ModuleContext, ModuleControl, ModuleFactory, ModuleId, ModuleKind, ModuleStatus,
};
use crate::stream::StreamContract;
use evflow_log::{debug, info};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError};
use tracing::{span, Level};

/// Attribute names every module node carries
pub mod attributes {
    pub const MODULE_ID: &str = "moduleId";
    pub const RUNNING: &str = "running";
    pub const RUN_AT_STARTUP: &str = "runAtStartup";
    pub const LOG_LEVEL: &str = "logLevel";
}

/// Default module log level (info)
pub const DEFAULT_LOG_LEVEL: u8 = 3;
const MAX_LOG_LEVEL: i64 = 5;

/// Registration data of a module
#[derive(Debug, Clone)]
pub struct ModuleSpec {
    /// Requested id, allocated by the registry if `None`
    pub id: Option<ModuleId>,
    /// Unique name, also the name of the module's configuration node
    pub name: String,
    pub kind: ModuleKind,
    pub contract: StreamContract,
}

impl ModuleSpec {
    pub fn new(name: impl Into<String>, kind: ModuleKind) -> Self {
        Self {
            id: None,
            name: name.into(),
            kind,
            contract: StreamContract::default(),
        }
    }

    pub fn id(mut self, id: impl Into<ModuleId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn contract(mut self, contract: StreamContract) -> Self {
        self.contract = contract;
        self
    }
}

/// Registry entry of one module
pub struct ModuleRecord {
    name: Arc<str>,
    contract: Arc<StreamContract>,
    control: Arc<ModuleControl>,
    context: ModuleContext,
    factory: Box<dyn ModuleFactory>,
    instance: Option<Box<dyn Module>>,
    _subscription: Subscription,
}

impl ModuleRecord {
    pub fn id(&self) -> ModuleId {
        self.control.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ModuleKind {
        self.control.kind
    }

    pub fn contract(&self) -> &StreamContract {
        &self.contract
    }

    pub fn status(&self) -> ModuleStatus {
        self.control.status()
    }

    pub fn node(&self) -> &ConfigNode {
        &self.control.node
    }

    pub(crate) fn contract_arc(&self) -> Arc<StreamContract> {
        self.contract.clone()
    }

    pub(crate) fn set_contract(&mut self, contract: StreamContract) {
        self.contract = Arc::new(contract);
    }

    pub(crate) fn control(&self) -> &Arc<ModuleControl> {
        &self.control
    }

    /// Create a fresh instance and initialize it
    pub(crate) fn start(&mut self) -> Result<(), ModuleError> {
        let id = self.id();
        let _span = span!(Level::INFO, "Init", id = %id).entered();
        let mut instance = (self.factory)(id);
        // A reset or config change requested before start is covered by init
        self.control.reset.take();
        self.control.take_config_pending();
        instance.init(&self.context)?;
        self.instance = Some(instance);
        Ok(())
    }

    /// Run the instance once, delivering a pending config change before and an unconsumed
    /// reset request after the run
    pub(crate) fn run(
        &mut self,
        input: &mut EventContainer,
        output: &mut OutputCollector,
    ) -> Result<(), ModuleError> {
        let id = self.control.id;
        let Some(instance) = self.instance.as_mut() else {
            return Err(ModuleError::new("module has no instance"));
        };

        if self.control.take_config_pending() {
            let _span = span!(Level::INFO, "Config", id = %id).entered();
            instance.config(&self.context);
        }

        {
            let _span = span!(Level::DEBUG, "Run", id = %id).entered();
            instance.run(&self.context, input, output)?;
        }

        if let Some(source) = self.control.reset.take() {
            let _span = span!(Level::INFO, "Reset", id = %id, source = %source).entered();
            instance.reset(&self.context, source);
        }
        Ok(())
    }

    /// Deliver a config change right away
    pub(crate) fn configure(&mut self) {
        let id = self.control.id;
        if let Some(instance) = self.instance.as_mut() {
            self.control.take_config_pending();
            let _span = span!(Level::INFO, "Config", id = %id).entered();
            instance.config(&self.context);
        }
    }

    /// Exit and drop the instance
    pub(crate) fn stop(&mut self) {
        let id = self.control.id;
        if let Some(mut instance) = self.instance.take() {
            let _span = span!(Level::INFO, "Exit", id = %id).entered();
            instance.exit(&self.context);
        }
    }
}

impl std::fmt::Debug for ModuleRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRecord")
            .field("id", &self.control.id)
            .field("name", &self.name)
            .field("kind", &self.control.kind)
            .field("status", &self.control.status())
            .field("contract", &self.contract)
            .finish()
    }
}

/// Table of all registered modules, keyed by id.
///
/// The registry only keeps records; it never invokes module callbacks on its own.
#[derive(Debug)]
pub struct ModuleRegistry {
    modules: BTreeMap<ModuleId, ModuleRecord>,
    root: ConfigNode,
    availability: Arc<DataAvailability>,
}

impl ModuleRegistry {
    pub fn new(root: ConfigNode, availability: Arc<DataAvailability>) -> Self {
        Self {
            modules: BTreeMap::new(),
            root,
            availability,
        }
    }

    pub fn root(&self) -> &ConfigNode {
        &self.root
    }

    /// Register a module in status `Stopped`.
    ///
    /// Creates the module's node `/<name>/` with its standard attributes.
    pub fn register(
        &mut self,
        spec: ModuleSpec,
        factory: Box<dyn ModuleFactory>,
    ) -> Result<ModuleId, Error> {
        let ModuleSpec {
            id,
            name,
            kind,
            contract,
        } = spec;

        let id = match id {
            Some(id) if self.modules.contains_key(&id) => return Err(Error::DuplicateContract(id)),
            Some(id) => id,
            None => self.free_id()?,
        };
        contract.validate(id, kind)?;
        if self.modules.values().any(|r| *r.name == name) {
            return Err(Error::DuplicateName(name));
        }

        let node = self.root.child(&name)?;
        let run_at_startup = create_standard_attributes(&node, id)?;
        let log_level = node
            .get_int(attributes::LOG_LEVEL)
            .map(|level| level.clamp(0, MAX_LOG_LEVEL) as u8)?;

        let control = Arc::new(ModuleControl::new(id, kind, node.clone(), log_level));
        control.request_run(run_at_startup);
        let subscription = {
            let control = Arc::downgrade(&control);
            node.subscribe(move |event| {
                if let Some(control) = control.upgrade() {
                    on_attribute_event(&control, event);
                }
            })
        };

        let name: Arc<str> = name.into();
        let context = ModuleContext::new(name.clone(), control.clone(), self.availability.clone());
        let record = ModuleRecord {
            name,
            contract: Arc::new(contract),
            control,
            context,
            factory,
            instance: None,
            _subscription: subscription,
        };
        info!("Registered {kind} module {id} '{}'", record.name);
        self.modules.insert(id, record);
        Ok(id)
    }

    fn free_id(&self) -> Result<ModuleId, Error> {
        (1..=u16::MAX)
            .map(ModuleId::from)
            .find(|id| !self.modules.contains_key(id))
            .ok_or(Error::Logic("module ids exhausted"))
    }

    pub fn lookup(&self, id: ModuleId) -> Result<&ModuleRecord, Error> {
        self.modules.get(&id).ok_or(Error::UnknownModule(id))
    }

    pub fn lookup_mut(&mut self, id: ModuleId) -> Result<&mut ModuleRecord, Error> {
        self.modules.get_mut(&id).ok_or(Error::UnknownModule(id))
    }

    pub fn lookup_name(&self, name: &str) -> Option<&ModuleRecord> {
        self.modules.values().find(|r| r.name() == name)
    }

    /// Advance the lifecycle of a module by one step
    pub fn set_status(&mut self, id: ModuleId, status: ModuleStatus) -> Result<(), Error> {
        let record = self.lookup(id)?;
        let from = record.status();
        if !from.can_transition_to(status) {
            return Err(Error::InvalidTransition {
                module: id,
                from,
                to: status,
            });
        }
        debug!("Module {id}: {from} -> {status}");
        record.control.store_status(status);
        Ok(())
    }

    /// Remove a stopped module
    pub fn unregister(&mut self, id: ModuleId) -> Result<(), Error> {
        let status = self.lookup(id)?.status();
        if status != ModuleStatus::Stopped {
            return Err(Error::ModuleBusy { module: id, status });
        }
        if let Some(record) = self.modules.remove(&id) {
            info!("Unregistered module {id} '{}'", record.name);
        }
        Ok(())
    }

    pub fn contains(&self, id: ModuleId) -> bool {
        self.modules.contains_key(&id)
    }

    /// Registered ids in ascending order
    pub fn ids(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.modules.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleRecord> {
        self.modules.values()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Create `moduleId`, `runAtStartup`, `running` and `logLevel`. Returns `runAtStartup`.
fn create_standard_attributes(node: &ConfigNode, id: ModuleId) -> Result<bool, Error> {
    node.create(
        attributes::MODULE_ID,
        i64::from(id.get()),
        Bounds::Int {
            min: 1,
            max: i64::from(u16::MAX),
        },
        Flags::READ_ONLY,
        "Module ID",
    )?;
    node.update_read_only(attributes::MODULE_ID, i64::from(id.get()))?;
    node.create(
        attributes::RUN_AT_STARTUP,
        true,
        Bounds::Unbounded,
        Flags::NORMAL,
        "Start this module when the mainloop starts",
    )?;
    let run_at_startup = node.get_bool(attributes::RUN_AT_STARTUP)?;
    node.create(
        attributes::RUNNING,
        run_at_startup,
        Bounds::Unbounded,
        Flags::NO_EXPORT,
        "Start or stop this module",
    )?;
    node.put(attributes::RUNNING, run_at_startup)?;
    node.create(
        attributes::LOG_LEVEL,
        i64::from(DEFAULT_LOG_LEVEL),
        Bounds::Int {
            min: 0,
            max: MAX_LOG_LEVEL,
        },
        Flags::NORMAL,
        "Module-specific log level, 0 (off) to 5 (trace)",
    )?;
    Ok(run_at_startup)
}

/// Apply an attribute change to the control block.
///
/// Listeners run after the node is unlocked, so notifications of concurrent writes may arrive
/// out of order. The current value is read back from the node under `attribute_sync`, so the
/// last listener to run stores the latest value.
fn on_attribute_event(control: &ModuleControl, event: &AttributeEvent) {
    if event.kind != AttributeEventKind::Modified {
        return;
    }
    let _sync = control
        .attribute_sync
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    match event.key.as_str() {
        attributes::RUNNING => {
            if let Ok(run) = control.node.get_bool(attributes::RUNNING) {
                control.request_run(run);
            }
        }
        attributes::LOG_LEVEL => {
            if let Ok(level) = control.node.get_int(attributes::LOG_LEVEL) {
                control.set_log_level(level.clamp(0, MAX_LOG_LEVEL) as u8);
            }
        }
        attributes::MODULE_ID | attributes::RUN_AT_STARTUP => {}
        _ => control.mark_config_pending(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ModuleError;
    use crate::stream::{EventType, InputStream, OutputStream};

    struct Idle;

    impl Module for Idle {
        fn run(
            &mut self,
            _ctx: &ModuleContext,
            _input: &mut EventContainer,
            _output: &mut OutputCollector,
        ) -> Result<(), ModuleError> {
            Ok(())
        }
    }

    fn idle() -> Box<dyn ModuleFactory> {
        Box::new(|_| Box::new(Idle) as Box<dyn Module>)
    }

    fn camera() -> ModuleSpec {
        ModuleSpec::new("camera", ModuleKind::Input)
            .contract(StreamContract::new().output(OutputStream::new(EventType::POLARITY)))
    }

    fn registry() -> ModuleRegistry {
        ModuleRegistry::new(ConfigNode::root(), Arc::new(DataAvailability::new()))
    }

    #[test]
    fn register_allocates_ids_and_creates_node() {
        let mut registry = registry();
        let first = registry.register(camera(), idle()).expect("registered");
        assert_eq!(first, ModuleId::from(1));

        let record = registry.lookup(first).expect("present");
        assert_eq!(record.status(), ModuleStatus::Stopped);
        assert_eq!(record.node().path(), "/camera/");
        assert_eq!(record.node().get_int(attributes::MODULE_ID).ok(), Some(1));
        assert_eq!(record.node().get_bool(attributes::RUNNING).ok(), Some(true));

        let filter = ModuleSpec::new("filter", ModuleKind::Processor).contract(
            StreamContract::new()
                .input(InputStream::new(1, EventType::POLARITY))
                .output(OutputStream::new(EventType::from("filtered"))),
        );
        assert_eq!(registry.register(filter, idle()).ok(), Some(ModuleId::from(2)));
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut registry = registry();
        registry.register(camera().id(7), idle()).expect("registered");
        assert!(matches!(
            registry.register(camera().id(7), idle()),
            Err(Error::DuplicateContract(id)) if id == ModuleId::from(7)
        ));
        assert!(matches!(
            registry.register(camera().id(8), idle()),
            Err(Error::DuplicateName(_))
        ));
        assert!(matches!(
            registry.register(ModuleSpec::new("bad", ModuleKind::Input), idle()),
            Err(Error::InvalidContract { .. })
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn lookup_unknown() {
        let registry = registry();
        assert!(matches!(
            registry.lookup(ModuleId::from(3)),
            Err(Error::UnknownModule(_))
        ));
    }

    #[test]
    fn status_follows_lifecycle() {
        let mut registry = registry();
        let id = registry.register(camera(), idle()).expect("registered");

        assert!(matches!(
            registry.set_status(id, ModuleStatus::Stopping),
            Err(Error::InvalidTransition { .. })
        ));
        registry.set_status(id, ModuleStatus::Running).expect("start");
        registry.set_status(id, ModuleStatus::Stopping).expect("stop");
        assert!(matches!(
            registry.set_status(id, ModuleStatus::Running),
            Err(Error::InvalidTransition { .. })
        ));
        registry.set_status(id, ModuleStatus::Stopped).expect("stopped");
    }

    #[test]
    fn unregister_requires_stopped() {
        let mut registry = registry();
        let before: Vec<_> = registry.ids().collect();
        let id = registry.register(camera(), idle()).expect("registered");

        registry.set_status(id, ModuleStatus::Running).expect("start");
        assert!(matches!(
            registry.unregister(id),
            Err(Error::ModuleBusy { status: ModuleStatus::Running, .. })
        ));
        registry.set_status(id, ModuleStatus::Stopping).expect("stop");
        registry.set_status(id, ModuleStatus::Stopped).expect("stopped");
        registry.unregister(id).expect("unregistered");

        assert_eq!(registry.ids().collect::<Vec<_>>(), before);
        assert!(registry.lookup_name("camera").is_none());
        assert!(matches!(registry.unregister(id), Err(Error::UnknownModule(_))));
        // Name and id are free again
        assert_eq!(registry.register(camera(), idle()).ok(), Some(id));
    }

    #[test]
    fn attribute_changes_reach_the_control_block() {
        let mut registry = registry();
        let id = registry.register(camera(), idle()).expect("registered");
        let record = registry.lookup(id).expect("present");
        let control = record.control().clone();
        let node = record.node().clone();

        node.put(attributes::RUNNING, false).expect("put");
        assert!(!control.run_requested());

        node.put(attributes::LOG_LEVEL, 5i64).expect("put");
        assert_eq!(control.log_level(), 5);
        assert!(!control.take_config_pending());

        node.create("gain", 1.0, Bounds::Unbounded, Flags::NORMAL, "")
            .expect("created");
        assert!(!control.take_config_pending());
        node.put("gain", 2.0).expect("put");
        assert!(control.take_config_pending());
    }

    #[test]
    fn concurrent_running_writes_settle_on_the_stored_value() {
        let mut registry = registry();
        let id = registry.register(camera(), idle()).expect("registered");
        let record = registry.lookup(id).expect("present");
        let control = record.control().clone();
        let node = record.node().clone();

        let writers: Vec<_> = [true, false]
            .into_iter()
            .map(|run| {
                let node = node.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        node.put(attributes::RUNNING, run).expect("put");
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().expect("writer panicked");
        }

        // The last notification may belong to an earlier write, the control block still
        // follows the attribute
        let stored = node.get_bool(attributes::RUNNING).expect("bool");
        assert_eq!(control.run_requested(), stored);
    }

    #[test]
    fn run_at_startup_from_config() {
        let root = ConfigNode::root();
        root.node_at("camera")
            .and_then(|n| n.put_from_str(attributes::RUN_AT_STARTUP, "bool", "false"))
            .expect("override");
        let mut registry = ModuleRegistry::new(root, Arc::new(DataAvailability::new()));
        let id = registry.register(camera(), idle()).expect("registered");
        let record = registry.lookup(id).expect("present");
        assert!(!record.control().run_requested());
        assert_eq!(record.node().get_bool(attributes::RUNNING).ok(), Some(false));
    }
}
