// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! evflow is a runtime for pipelines of event processing modules, such as the processing
//! chain behind an event camera.
//!
//! # Modules and Streams
//!
//! [Modules](crate::module::Module) are the units of computation. Input modules produce
//! event streams, processors consume and produce them, output modules only consume. Each
//! module declares the streams it reads and writes in a [StreamContract](crate::stream::StreamContract).
//!
//! # Execution Order
//!
//! The [graph](crate::graph) resolver derives a single deterministic execution order from the
//! declared contracts: producers always run before their consumers, ties are broken by
//! ascending module id.
//!
//! # Execution of Modules
//!
//! The [mainloop](crate::mainloop) runs every running module once per cycle in execution order.
//! Control threads start and stop modules, request resets and observe data availability
//! through a [MainloopHandle](crate::mainloop::MainloopHandle). Module parameters live in the
//! hierarchical [configuration tree](crate::config_tree).

pub mod availability;
pub mod config_tree;
pub mod configuration;
pub mod error;
pub mod event;
pub mod graph;
pub mod mainloop;
pub mod module;
pub mod registry;
pub mod reset;
pub mod stream;

/// Re-export the public API
pub mod prelude {
    pub use crate::availability::DataAvailability;
    pub use crate::config_tree::{Bounds, ConfigNode, Flags, Value};
    pub use crate::error::{Error, ModuleError};
    pub use crate::event::{EventContainer, EventPacket, OutputCollector};
    pub use crate::mainloop::{Mainloop, MainloopHandle};
    pub use crate::module::{Module, ModuleContext, ModuleFactory, ModuleId, ModuleKind, ModuleStatus};
    pub use crate::registry::ModuleSpec;
    pub use crate::stream::{Cardinality, EventType, InputStream, OutputStream, StreamContract};
    pub use crate::configuration;
}
