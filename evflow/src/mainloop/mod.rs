// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! The mainloop scheduler.
//!
//! One thread owns the [Mainloop] and drives it cycle by cycle. Each cycle first applies
//! pending lifecycle changes (start requests, stop requests, draining of stopping modules),
//! then runs every running module once in execution order. Outputs of a module are visible
//! to all modules later in the same cycle. Every producer precedes its consumers, so a
//! consumer always sees the data of the current cycle or nothing; packets are never carried
//! over into the next cycle.
//!
//! Control threads interact through a [MainloopHandle]. The `running` attribute of the
//! configuration root pauses the whole pipeline: setting it to `false` stops all modules,
//! consumers first, and setting it back to `true` starts them again.

mod handle;
mod pool;

pub use handle::MainloopHandle;

use crate::availability::DataAvailability;
use crate::config_tree::{AttributeEventKind, Bounds, ConfigNode, Flags, Subscription};
use crate::error::{Error, ModuleError};
use crate::event::OutputCollector;
use crate::graph::{build_graph, resolve, Graph};
use crate::module::{ModuleFactory, ModuleId, ModuleKind, ModuleStatus};
use crate::registry::{attributes, ModuleRegistry, ModuleSpec};
use crate::reset::ResetPropagator;
use crate::stream::{EventType, StreamContract};
use evflow_log::{debug, error, info, trace, warn};
use handle::Shared;
use pool::StreamPool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Mainloop configuration, usually assembled by [configuration::mainloop::Builder](crate::configuration::mainloop::Builder)
pub struct MainloopConfig {
    /// Target duration of one cycle
    pub cycle_time: Duration,

    /// Sleep between cycles while no module is running
    pub idle_sleep: Duration,

    /// Configuration root holding the module nodes
    pub root: ConfigNode,

    /// Modules to register
    pub modules: Vec<(ModuleSpec, Box<dyn ModuleFactory>)>,
}

/// Outcome of one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Cycle number, starting at 1
    pub cycle: u64,
    /// Modules that ran successfully, in execution order
    pub executed: Vec<ModuleId>,
    /// Modules that failed and are stopping
    pub failed: Vec<ModuleId>,
}

/// Module scheduler owning the registry and the resolved graph
pub struct Mainloop {
    cycle_time: Duration,
    idle_sleep: Duration,
    registry: ModuleRegistry,
    graph: Graph,
    /// Running modules in execution order
    order: Vec<ModuleId>,
    pool: StreamPool,
    shared: Arc<Shared>,
    started: bool,
    _running: Subscription,
}

impl Mainloop {
    /// Register all modules and resolve the graph. Fails if the pipeline cannot be built.
    pub fn new(config: MainloopConfig) -> Result<Self, Error> {
        let MainloopConfig {
            cycle_time,
            idle_sleep,
            root,
            modules,
        } = config;

        root.create(
            attributes::RUNNING,
            true,
            Bounds::Unbounded,
            Flags::NO_EXPORT,
            "Stop or restart all modules",
        )?;
        let running = root.get_bool(attributes::RUNNING)?;

        let availability = Arc::new(DataAvailability::new());
        let shared = Arc::new(Shared::new(availability.clone(), root.clone(), running));
        let weak = Arc::downgrade(&shared);
        let running_subscription = root.subscribe(move |event| {
            if event.kind != AttributeEventKind::Modified || event.key != attributes::RUNNING {
                return;
            }
            if let Some(shared) = weak.upgrade() {
                shared.sync_running();
            }
        });

        let mut registry = ModuleRegistry::new(root, availability);
        for (spec, factory) in modules {
            registry.register(spec, factory)?;
        }
        let graph = build_graph(&registry)
            .inspect_err(|e| error!("Failed to build pipeline: {e}"))?;
        info!(
            "Pipeline of {} modules, execution order {}",
            registry.len(),
            graph.order()
        );

        let mut mainloop = Self {
            cycle_time,
            idle_sleep,
            registry,
            graph,
            order: Vec::new(),
            pool: StreamPool::default(),
            shared,
            started: false,
            _running: running_subscription,
        };
        mainloop.publish_topology();
        Ok(mainloop)
    }

    /// Handle for control threads
    pub fn handle(&self) -> MainloopHandle {
        MainloopHandle::new(self.shared.clone())
    }

    pub fn availability(&self) -> &Arc<DataAvailability> {
        &self.shared.availability
    }

    pub fn reset_propagator(&self) -> &ResetPropagator {
        &self.shared.propagator
    }

    /// Start all modules requested to run
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        info!("Starting mainloop");
        self.apply_lifecycle();
        self.started = true;
    }

    /// Run cycles paced by the cycle time until shutdown is requested, then shut down.
    ///
    /// While the `running` attribute of the configuration root is `false`, all modules are
    /// stopped and no cycles run.
    pub fn run(&mut self) {
        while !self.shared.shutdown.load(Ordering::Acquire) {
            if !self.shared.running.load(Ordering::Acquire) {
                if self.started {
                    info!("Mainloop stopped by its running attribute");
                    self.shutdown();
                }
                thread::sleep(self.idle_sleep);
                continue;
            }
            self.start();

            let cycle_start = Instant::now();
            let report = self.run_cycle();

            if self.order.is_empty() && report.executed.is_empty() {
                thread::sleep(self.idle_sleep);
                continue;
            }

            let cycle_duration = cycle_start.elapsed();
            let time_left = self.cycle_time.saturating_sub(cycle_duration);
            if time_left.is_zero() {
                error!(
                    "Finished cycle {} after {cycle_duration:?}. Expected to be less than {:?}",
                    report.cycle, self.cycle_time
                );
            } else {
                trace!(
                    "Finished cycle {} after {cycle_duration:?}. Sleeping for {time_left:?}",
                    report.cycle
                );
                thread::sleep(time_left);
            }
        }

        if self.started {
            self.shutdown();
        }
    }

    /// Run one cycle: apply lifecycle changes, then run each running module in order
    pub fn run_cycle(&mut self) -> CycleReport {
        self.apply_lifecycle();
        self.pool.clear();

        let cycle = self.shared.cycle.load(Ordering::Relaxed) + 1;
        let mut report = CycleReport {
            cycle,
            ..Default::default()
        };
        trace!("Starting cycle {cycle}");

        for index in 0..self.order.len() {
            let id = self.order[index];
            match self.dispatch(id) {
                Ok(()) => report.executed.push(id),
                Err(e) => {
                    error!("Module {id} failed in cycle {cycle}: {e}");
                    self.transition(id, ModuleStatus::Stopping);
                    self.clear_run_request(id);
                    report.failed.push(id);
                }
            }
        }

        if !report.failed.is_empty() {
            self.publish_topology();
        }
        self.shared.cycle.store(cycle, Ordering::Relaxed);
        report
    }

    fn dispatch(&mut self, id: ModuleId) -> Result<(), ModuleError> {
        let record = self.registry.lookup_mut(id)?;
        let contract = record.contract_arc();
        let mut input = self.pool.gather(&contract.inputs);
        let mut output = OutputCollector::new(id, &contract.outputs);

        record.run(&mut input, &mut output)?;

        self.pool.publish(self.graph.streams(), output.into_packets());
        self.pool.write_back(id, input);
        Ok(())
    }

    /// Stop all modules, consumers before producers, and wait for their exit
    pub fn shutdown(&mut self) {
        info!("Shutting down mainloop");
        let order: Vec<ModuleId> = self.graph.order().iter().rev().collect();
        for id in &order {
            if self.status(*id) == Some(ModuleStatus::Running) {
                self.transition(*id, ModuleStatus::Stopping);
            }
        }
        for id in &order {
            if self.status(*id) == Some(ModuleStatus::Stopping) {
                self.drain(*id);
            }
        }
        self.started = false;
        self.publish_topology();
    }

    /// Honour start and stop requests. Stops run in reverse execution order, starts in
    /// execution order. Returns whether any module changed its status.
    fn apply_lifecycle(&mut self) -> bool {
        let order: Vec<ModuleId> = self.graph.order().iter().collect();
        let mut changed = false;

        for id in order.iter().rev() {
            let Ok(record) = self.registry.lookup(*id) else {
                continue;
            };
            match (record.status(), record.control().run_requested()) {
                (ModuleStatus::Running, false) => {
                    self.transition(*id, ModuleStatus::Stopping);
                    self.drain(*id);
                    changed = true;
                }
                (ModuleStatus::Stopping, _) => {
                    self.drain(*id);
                    changed = true;
                }
                _ => {}
            }
        }

        for id in &order {
            let Ok(record) = self.registry.lookup_mut(*id) else {
                continue;
            };
            if record.status() != ModuleStatus::Stopped || !record.control().run_requested() {
                continue;
            }
            changed = true;
            match record.start() {
                Ok(()) => {
                    info!("Started module {id} '{}'", record.name());
                    self.transition(*id, ModuleStatus::Running);
                }
                Err(e) => {
                    error!("Module {id} failed to initialize: {e}");
                    self.clear_run_request(*id);
                }
            }
        }

        if changed {
            self.publish_topology();
        }
        changed
    }

    /// Exit a stopping module and mark it stopped
    fn drain(&mut self, id: ModuleId) {
        if let Ok(record) = self.registry.lookup_mut(id) {
            record.stop();
            info!("Stopped module {id} '{}'", record.name());
        }
        self.transition(id, ModuleStatus::Stopped);
    }

    fn transition(&mut self, id: ModuleId, status: ModuleStatus) {
        if let Err(e) = self.registry.set_status(id, status) {
            error!("Failed to set status of module {id}: {e}");
        }
    }

    /// Clear the run request of a module, keeping its `running` attribute in sync
    fn clear_run_request(&self, id: ModuleId) {
        let Ok(record) = self.registry.lookup(id) else {
            return;
        };
        record.control().request_run(false);
        if let Err(e) = record.node().put(attributes::RUNNING, false) {
            warn!("Failed to clear running flag of module {id}: {e}");
        }
    }

    /// Recompute the execution order of running modules and share it with control threads
    fn publish_topology(&mut self) {
        self.order = self
            .graph
            .order()
            .iter()
            .filter(|id| self.status(*id) == Some(ModuleStatus::Running))
            .collect();
        debug!("Execution order {:?}", self.order);

        let mut topology = self.shared.propagator.write();
        topology.modules = self
            .registry
            .iter()
            .map(|record| (record.id(), record.control().clone()))
            .collect();
        topology.order = self.order.clone();
        topology.downstream = self.graph.downstream().clone();
    }

    /// Register a module at runtime. It starts at the next cycle boundary if `runAtStartup`
    /// is set. If the graph cannot be resolved, the module is not added.
    pub fn add_module(
        &mut self,
        spec: ModuleSpec,
        factory: Box<dyn ModuleFactory>,
    ) -> Result<ModuleId, Error> {
        let id = self.registry.register(spec, factory)?;
        match build_graph(&self.registry) {
            Ok(graph) => {
                self.graph = graph;
                self.publish_topology();
                Ok(id)
            }
            Err(e) => {
                if let Err(rollback) = self.registry.unregister(id) {
                    error!("Failed to roll back registration of module {id}: {rollback}");
                }
                Err(e)
            }
        }
    }

    /// Stop and unregister a module. Fails without effect if other modules depend on it.
    pub fn remove_module(&mut self, id: ModuleId) -> Result<(), Error> {
        self.registry.lookup(id)?;
        let graph = resolve(
            self.registry
                .iter()
                .filter(|record| record.id() != id)
                .map(|record| (record.id(), record.kind(), record.contract())),
        )?;

        if self.status(id) == Some(ModuleStatus::Running) {
            self.transition(id, ModuleStatus::Stopping);
        }
        if self.status(id) == Some(ModuleStatus::Stopping) {
            self.drain(id);
        }
        self.registry.unregister(id)?;

        self.graph = graph;
        self.publish_topology();
        Ok(())
    }

    /// Replace the stream contract of a module. Fails without effect if the contract is
    /// invalid or the resulting graph cannot be resolved.
    pub fn update_contract(&mut self, id: ModuleId, contract: StreamContract) -> Result<(), Error> {
        let kind = self.registry.lookup(id)?.kind();
        contract.validate(id, kind)?;
        let graph = resolve(self.registry.iter().map(|record| {
            if record.id() == id {
                (id, kind, &contract)
            } else {
                (record.id(), record.kind(), record.contract())
            }
        }))?;

        self.registry.lookup_mut(id)?.set_contract(contract);
        self.graph = graph;
        self.publish_topology();
        Ok(())
    }

    /// Invoke the config callback of a running module right away
    pub fn deliver_config(&mut self, id: ModuleId) -> Result<(), Error> {
        let record = self.registry.lookup_mut(id)?;
        if record.status() == ModuleStatus::Running {
            record.configure();
        }
        Ok(())
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Running modules in execution order
    pub fn execution_order(&self) -> &[ModuleId] {
        &self.order
    }

    pub fn cycle(&self) -> u64 {
        self.shared.cycle.load(Ordering::Relaxed)
    }

    pub fn status(&self, id: ModuleId) -> Option<ModuleStatus> {
        self.registry.lookup(id).ok().map(|record| record.status())
    }

    pub fn stream_exists(&self, source: ModuleId, event_type: &EventType) -> bool {
        self.graph.stream_exists(source, event_type)
    }

    pub fn module_exists(&self, id: ModuleId) -> bool {
        self.registry.contains(id)
    }

    pub fn module_kind(&self, id: ModuleId) -> Result<ModuleKind, Error> {
        self.registry.lookup(id).map(|record| record.kind())
    }

    /// Modules `id` directly depends on
    pub fn input_deps(&self, id: ModuleId) -> Result<Vec<ModuleId>, Error> {
        self.registry.lookup(id)?;
        Ok(self.graph.input_deps(id))
    }

    /// Modules directly depending on `id`
    pub fn output_rev_deps(&self, id: ModuleId) -> Result<Vec<ModuleId>, Error> {
        self.registry.lookup(id)?;
        Ok(self.graph.output_rev_deps(id))
    }

    pub fn config_node(&self, id: ModuleId) -> Result<ConfigNode, Error> {
        self.registry.lookup(id).map(|record| record.node().clone())
    }
}
