// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Mainloop builder

use crate::config_tree::ConfigNode;
use crate::error::Error;
use crate::mainloop::{Mainloop, MainloopConfig};
use crate::module::ModuleFactory;
use crate::registry::ModuleSpec;
use std::time::Duration;

pub const DEFAULT_CYCLE_TIME: Duration = Duration::from_millis(10);
pub const DEFAULT_IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Mainloop configuration.
///
/// The builder is `Send`; module instances are only created once the built mainloop starts
/// them, on the thread driving it.
#[derive(Default)]
pub struct Builder {
    pub cycle_time: Option<Duration>,
    pub idle_sleep: Option<Duration>,
    pub root: Option<ConfigNode>,
    pub modules: Vec<(ModuleSpec, Box<dyn ModuleFactory>)>,
}

impl Builder {
    /// Set the target cycle duration
    pub fn cycle_time(mut self, cycle_time: Duration) -> Self {
        self.cycle_time = Some(cycle_time);
        self
    }

    /// Set the sleep duration while no module is running
    pub fn idle_sleep(mut self, idle_sleep: Duration) -> Self {
        self.idle_sleep = Some(idle_sleep);
        self
    }

    /// Set the configuration root. A fresh tree is created if none is set.
    pub fn root(mut self, root: ConfigNode) -> Self {
        self.root = Some(root);
        self
    }

    /// Add a module with its factory
    pub fn module(mut self, spec: ModuleSpec, factory: Box<dyn ModuleFactory>) -> Self {
        self.modules.push((spec, factory));
        self
    }

    pub fn build(self) -> Result<Mainloop, Error> {
        let configuration = MainloopConfig {
            cycle_time: self.cycle_time.unwrap_or(DEFAULT_CYCLE_TIME),
            idle_sleep: self.idle_sleep.unwrap_or(DEFAULT_IDLE_SLEEP),
            root: self.root.unwrap_or_else(ConfigNode::root),
            modules: self.modules,
        };

        Mainloop::new(configuration)
    }
}
