// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Event types, stream declarations and stream contracts

use crate::error::Error;
use crate::module::{ModuleId, ModuleKind};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt::Display;

/// System-wide tag of an event type, e.g. `polarity` or `frame`
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventType(Cow<'static, str>);

impl EventType {
    pub const SPECIAL: EventType = EventType::from_static("special");
    pub const POLARITY: EventType = EventType::from_static("polarity");
    pub const FRAME: EventType = EventType::from_static("frame");
    pub const IMU6: EventType = EventType::from_static("imu6");
    pub const IMU9: EventType = EventType::from_static("imu9");
    pub const POINT2D: EventType = EventType::from_static("point2d");

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for EventType {
    fn from(value: &'static str) -> Self {
        Self::from_static(value)
    }
}

impl Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Number of events per packet on a stream
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum Cardinality {
    Any,
    Exactly(u16),
}

impl Cardinality {
    /// Whether an input declaring `self` can consume a stream declared as `declared`
    pub fn accepts(self, declared: Cardinality) -> bool {
        match self {
            Cardinality::Any => true,
            Cardinality::Exactly(_) => self == declared,
        }
    }

    /// Whether a packet with `count` events conforms to this declaration
    pub fn admits(self, count: usize) -> bool {
        match self {
            Cardinality::Any => true,
            Cardinality::Exactly(n) => usize::from(n) == count,
        }
    }
}

impl Display for Cardinality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cardinality::Any => f.write_str("any"),
            Cardinality::Exactly(n) => write!(f, "{n}"),
        }
    }
}

/// A stream flowing in the built graph, identified by its source module and event type
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ActiveStream {
    pub source: ModuleId,
    pub event_type: EventType,
}

impl ActiveStream {
    pub fn new(source: ModuleId, event_type: EventType) -> Self {
        Self { source, event_type }
    }
}

impl Display for ActiveStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.source, self.event_type)
    }
}

/// Declared input of a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputStream {
    pub source: ModuleId,
    pub event_type: EventType,
    pub cardinality: Cardinality,
    /// Read-only inputs are never modified by the consuming module
    pub read_only: bool,
    /// Consume the version of the stream produced after this processor modified it
    pub after: Option<ModuleId>,
}

impl InputStream {
    /// Read-only input accepting any number of events per packet
    pub fn new(source: impl Into<ModuleId>, event_type: EventType) -> Self {
        Self {
            source: source.into(),
            event_type,
            cardinality: Cardinality::Any,
            read_only: true,
            after: None,
        }
    }

    /// Request a private, modifiable copy of the stream
    pub fn writable(mut self) -> Self {
        self.read_only = false;
        self
    }

    pub fn exactly(mut self, events: u16) -> Self {
        self.cardinality = Cardinality::Exactly(events);
        self
    }

    pub fn after(mut self, processor: impl Into<ModuleId>) -> Self {
        self.after = Some(processor.into());
        self
    }

    pub fn stream(&self) -> ActiveStream {
        ActiveStream::new(self.source, self.event_type.clone())
    }
}

/// Declared output of a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputStream {
    pub event_type: EventType,
    pub cardinality: Cardinality,
    /// Publish the stream under another source id instead of the declaring module's
    pub on_behalf_of: Option<ModuleId>,
}

impl OutputStream {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            cardinality: Cardinality::Any,
            on_behalf_of: None,
        }
    }

    pub fn exactly(mut self, events: u16) -> Self {
        self.cardinality = Cardinality::Exactly(events);
        self
    }

    pub fn on_behalf_of(mut self, source: impl Into<ModuleId>) -> Self {
        self.on_behalf_of = Some(source.into());
        self
    }

    /// The stream this declaration produces when declared by `owner`
    pub fn stream(&self, owner: ModuleId) -> ActiveStream {
        ActiveStream::new(self.on_behalf_of.unwrap_or(owner), self.event_type.clone())
    }
}

/// The set of streams a module consumes and produces
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamContract {
    pub inputs: Vec<InputStream>,
    pub outputs: Vec<OutputStream>,
}

impl StreamContract {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, input: InputStream) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn output(mut self, output: OutputStream) -> Self {
        self.outputs.push(output);
        self
    }

    /// Check the contract of module `id` of the given kind for internal consistency
    pub fn validate(&self, id: ModuleId, kind: ModuleKind) -> Result<(), Error> {
        let invalid = |reason| Error::InvalidContract { module: id, reason };

        if id.get() == 0 {
            return Err(invalid("module id 0 is reserved"));
        }

        match kind {
            ModuleKind::Input => {
                if !self.inputs.is_empty() {
                    return Err(invalid("input module declares input streams"));
                }
                if self.outputs.is_empty() {
                    return Err(invalid("input module declares no output streams"));
                }
            }
            ModuleKind::Output => {
                if !self.outputs.is_empty() {
                    return Err(invalid("output module declares output streams"));
                }
                if self.inputs.is_empty() {
                    return Err(invalid("output module declares no input streams"));
                }
                if self.inputs.iter().any(|i| !i.read_only) {
                    return Err(invalid("output module declares a modifiable input"));
                }
            }
            ModuleKind::Processor => {
                if self.inputs.is_empty() {
                    return Err(invalid("processor declares no input streams"));
                }
                if self.outputs.is_empty() && self.inputs.iter().all(|i| i.read_only) {
                    return Err(invalid(
                        "processor neither produces nor modifies any stream",
                    ));
                }
            }
        }

        let mut seen = BTreeSet::new();
        for input in &self.inputs {
            if input.cardinality == Cardinality::Exactly(0) {
                return Err(invalid("input expects zero events per packet"));
            }
            if !seen.insert(input.stream()) {
                return Err(invalid("duplicate input stream"));
            }
        }

        let mut seen = BTreeSet::new();
        for output in &self.outputs {
            if output.cardinality == Cardinality::Exactly(0) {
                return Err(invalid("output declares zero events per packet"));
            }
            if !seen.insert(output.stream(id)) {
                return Err(invalid("duplicate output stream"));
            }
        }

        Ok(())
    }
}
