// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Pipeline description from the configuration tree.
//!
//! Every child of the root carrying a `moduleId` and a `moduleLibrary` attribute describes
//! one module. The library name selects a [LibraryInfo] from a [ModuleCatalog]; the
//! `moduleInput` and `moduleOutput` attributes connect the module:
//!
//! ```text
//! /camera/     moduleId = 1, moduleLibrary = "camera"
//! /filter/     moduleId = 2, moduleLibrary = "noise_filter", moduleInput = "1[polarity]"
//! /stats/      moduleId = 3, moduleLibrary = "statistics",   moduleInput = "2[filtered] 1[polarity@2]"
//! ```
//!
//! `1[polarity@2]` reads the polarity stream of module 1 after processor 2 modified it.

use super::mainloop::Builder;
use crate::config_tree::{ConfigNode, Value};
use crate::error::Error;
use crate::module::{Module, ModuleId, ModuleKind};
use crate::registry::{attributes, ModuleSpec};
use crate::stream::{Cardinality, EventType, InputStream, OutputStream, StreamContract};
use evflow_log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub const MODULE_LIBRARY: &str = "moduleLibrary";
pub const MODULE_INPUT: &str = "moduleInput";
pub const MODULE_OUTPUT: &str = "moduleOutput";

/// Shared module constructor of a library
pub type LibraryFactory = Arc<dyn Fn(ModuleId) -> Box<dyn Module> + Send + Sync>;

/// One accepted input of a library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDecl {
    /// Accepted event type, `None` accepts any type
    pub event_type: Option<EventType>,
    /// Number of connected streams of this type
    pub streams: Cardinality,
    /// Events per packet required on each connected stream
    pub events: Cardinality,
    pub read_only: bool,
}

impl InputDecl {
    /// Any number of read-only streams of `event_type`
    pub fn of(event_type: EventType) -> Self {
        Self {
            event_type: Some(event_type),
            streams: Cardinality::Any,
            events: Cardinality::Any,
            read_only: true,
        }
    }

    /// Any number of read-only streams of any type. Must be the only declaration.
    pub fn any_type() -> Self {
        Self {
            event_type: None,
            ..Self::of(EventType::SPECIAL)
        }
    }

    pub fn streams(mut self, streams: u16) -> Self {
        self.streams = Cardinality::Exactly(streams);
        self
    }

    pub fn events(mut self, events: u16) -> Self {
        self.events = Cardinality::Exactly(events);
        self
    }

    pub fn writable(mut self) -> Self {
        self.read_only = false;
        self
    }

    fn accepts(&self, event_type: &EventType) -> bool {
        self.event_type.as_ref().map_or(true, |t| t == event_type)
    }
}

/// Outputs of a library
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputDecl {
    /// Outputs known up front
    Fixed(Vec<OutputStream>),
    /// Outputs named by the `moduleOutput` attribute
    Dynamic,
}

/// Kind, stream declarations and constructor of a module library
#[derive(Clone)]
pub struct LibraryInfo {
    pub kind: ModuleKind,
    pub inputs: Vec<InputDecl>,
    pub outputs: OutputDecl,
    pub factory: LibraryFactory,
}

impl LibraryInfo {
    pub fn new<F>(kind: ModuleKind, factory: F) -> Self
    where
        F: Fn(ModuleId) -> Box<dyn Module> + Send + Sync + 'static,
    {
        Self {
            kind,
            inputs: Vec::new(),
            outputs: OutputDecl::Fixed(Vec::new()),
            factory: Arc::new(factory),
        }
    }

    pub fn input(mut self, input: InputDecl) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn output(mut self, output: OutputStream) -> Self {
        match &mut self.outputs {
            OutputDecl::Fixed(outputs) => outputs.push(output),
            OutputDecl::Dynamic => self.outputs = OutputDecl::Fixed(vec![output]),
        }
        self
    }

    pub fn dynamic_outputs(mut self) -> Self {
        self.outputs = OutputDecl::Dynamic;
        self
    }
}

impl std::fmt::Debug for LibraryInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryInfo")
            .field("kind", &self.kind)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

/// Module libraries by name
#[derive(Debug, Clone, Default)]
pub struct ModuleCatalog {
    libraries: BTreeMap<String, LibraryInfo>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn library(mut self, name: impl Into<String>, info: LibraryInfo) -> Self {
        self.libraries.insert(name.into(), info);
        self
    }

    pub fn get(&self, name: &str) -> Option<&LibraryInfo> {
        self.libraries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.libraries.keys().map(String::as_str)
    }
}

/// One entry of a `moduleInput` string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputEntry {
    pub source: ModuleId,
    pub event_type: EventType,
    pub after: Option<ModuleId>,
}

fn parse_error(input: &str, reason: &'static str) -> Error {
    Error::Parse {
        input: input.to_owned(),
        reason,
    }
}

fn parse_module_id(input: &str) -> Result<ModuleId, Error> {
    let id: u16 = input
        .parse()
        .map_err(|_| parse_error(input, "invalid module id"))?;
    Ok(ModuleId::from(id))
}

fn is_word(input: &str) -> bool {
    !input.is_empty()
        && input
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parse a `moduleInput` string such as `1[polarity,frame] 3[filtered@4]`
pub fn parse_module_input(input: &str) -> Result<Vec<InputEntry>, Error> {
    let mut entries = Vec::new();
    let mut sources = BTreeSet::new();

    for definition in input.split_whitespace() {
        let (source, types) = definition
            .strip_suffix(']')
            .and_then(|d| d.split_once('['))
            .ok_or_else(|| parse_error(definition, "expected SOURCE[type,...]"))?;
        let source = parse_module_id(source)?;
        if !sources.insert(source) {
            return Err(parse_error(definition, "duplicate source module"));
        }

        let mut types_seen = BTreeSet::new();
        for item in types.split(',') {
            let (name, after) = match item.split_once('@') {
                Some((name, after)) => (name, Some(parse_module_id(after)?)),
                None => (item, None),
            };
            if !is_word(name) {
                return Err(parse_error(definition, "invalid event type"));
            }
            if !types_seen.insert(name) {
                return Err(parse_error(definition, "duplicate event type"));
            }
            entries.push(InputEntry {
                source,
                event_type: EventType::new(name),
                after,
            });
        }
    }

    if entries.is_empty() {
        return Err(parse_error(input, "no input streams"));
    }
    Ok(entries)
}

/// Parse a `moduleOutput` string such as `polarity,frame`
pub fn parse_module_output(input: &str) -> Result<Vec<EventType>, Error> {
    let mut types = Vec::new();
    for name in input.split(',').map(str::trim) {
        if !is_word(name) {
            return Err(parse_error(input, "invalid event type"));
        }
        let event_type = EventType::new(name);
        if types.contains(&event_type) {
            return Err(parse_error(input, "duplicate event type"));
        }
        types.push(event_type);
    }
    Ok(types)
}

/// Build a mainloop builder from the module nodes below `root`
pub fn from_config(root: &ConfigNode, catalog: &ModuleCatalog) -> Result<Builder, Error> {
    let mut builder = Builder::default().root(root.clone());

    for node in root.children() {
        let (Some(Value::Int(id)), Some(Value::Str(library))) = (
            node.get(attributes::MODULE_ID),
            node.get(MODULE_LIBRARY),
        ) else {
            debug!("Skipping node {} without module description", node.path());
            continue;
        };
        let config_error = |key: &str, reason| Error::Config {
            path: node.path().to_owned(),
            key: key.to_owned(),
            reason,
        };

        let id = u16::try_from(id)
            .ok()
            .filter(|id| *id != 0)
            .map(ModuleId::from)
            .ok_or_else(|| config_error(attributes::MODULE_ID, "module id out of range"))?;
        let info = catalog
            .get(&library)
            .ok_or_else(|| config_error(MODULE_LIBRARY, "unknown module library"))?;

        let contract = contract_from_node(&node, info)?;
        let spec = ModuleSpec::new(node.name(), info.kind)
            .id(id)
            .contract(contract);
        let factory = info.factory.clone();
        builder = builder.module(spec, Box::new(move |id: ModuleId| factory(id)));
        debug!("Configured module {id} '{}' from library '{library}'", node.name());
    }

    Ok(builder)
}

fn contract_from_node(node: &ConfigNode, info: &LibraryInfo) -> Result<StreamContract, Error> {
    let config_error = |key: &str, reason| Error::Config {
        path: node.path().to_owned(),
        key: key.to_owned(),
        reason,
    };
    let input = node.get(MODULE_INPUT);
    let output = node.get(MODULE_OUTPUT);
    let mut contract = StreamContract::new();

    match (info.kind, input) {
        (ModuleKind::Input, Some(_)) => {
            return Err(config_error(MODULE_INPUT, "input modules take no input"));
        }
        (ModuleKind::Input, None) => {}
        (_, Some(Value::Str(input))) => {
            let entries = parse_module_input(&input)?;
            check_connections(&info.inputs, &entries)
                .map_err(|reason| config_error(MODULE_INPUT, reason))?;
            for entry in entries {
                contract = contract.input(input_stream(&info.inputs, entry));
            }
        }
        (_, Some(_)) => return Err(config_error(MODULE_INPUT, "expected a string")),
        (_, None) => {
            return Err(config_error(MODULE_INPUT, "processor and output modules need input"));
        }
    }

    match (info.kind, &info.outputs, output) {
        (ModuleKind::Output, _, Some(_)) => {
            return Err(config_error(MODULE_OUTPUT, "output modules take no output"));
        }
        (_, OutputDecl::Fixed(_), Some(_)) => {
            return Err(config_error(MODULE_OUTPUT, "library declares its outputs"));
        }
        (_, OutputDecl::Fixed(outputs), None) => {
            for output in outputs {
                contract = contract.output(output.clone());
            }
        }
        (_, OutputDecl::Dynamic, Some(Value::Str(output))) => {
            for event_type in parse_module_output(&output)? {
                contract = contract.output(OutputStream::new(event_type));
            }
        }
        (_, OutputDecl::Dynamic, Some(_)) => {
            return Err(config_error(MODULE_OUTPUT, "expected a string"));
        }
        (_, OutputDecl::Dynamic, None) => {
            return Err(config_error(MODULE_OUTPUT, "library requires declared outputs"));
        }
    }

    Ok(contract)
}

/// Check the connected streams against the library's input declarations
fn check_connections(decls: &[InputDecl], entries: &[InputEntry]) -> Result<(), &'static str> {
    if let [decl] = decls {
        if decl.event_type.is_none() {
            if !decl.streams.admits(entries.len()) {
                return Err("wrong number of connected streams");
            }
            return Ok(());
        }
    }
    if decls.iter().any(|decl| decl.event_type.is_none()) {
        return Err("library mixes any-type and typed inputs");
    }

    let mut counts: BTreeMap<&EventType, usize> = BTreeMap::new();
    for entry in entries {
        if !decls.iter().any(|decl| decl.accepts(&entry.event_type)) {
            return Err("event type not accepted by library");
        }
        *counts.entry(&entry.event_type).or_default() += 1;
    }
    for decl in decls {
        let count = decl
            .event_type
            .as_ref()
            .and_then(|t| counts.get(t))
            .copied()
            .unwrap_or_default();
        if count == 0 || !decl.streams.admits(count) {
            return Err("wrong number of connected streams");
        }
    }
    Ok(())
}

fn input_stream(decls: &[InputDecl], entry: InputEntry) -> InputStream {
    let mut stream = InputStream::new(entry.source, entry.event_type);
    if let Some(decl) = decls.iter().find(|decl| decl.accepts(&stream.event_type)) {
        stream.read_only = decl.read_only;
        stream.cardinality = decl.events;
    }
    stream.after = entry.after;
    stream
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ModuleError;
    use crate::event::{EventContainer, OutputCollector};
    use crate::module::{ModuleContext, ModuleStatus};

    const FILTERED: EventType = EventType::from_static("filtered");

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

    fn idle(_: ModuleId) -> Box<dyn Module> {
        Box::new(Idle)
    }

    fn catalog() -> ModuleCatalog {
        ModuleCatalog::new()
            .library(
                "camera",
                LibraryInfo::new(ModuleKind::Input, idle)
                    .output(OutputStream::new(EventType::POLARITY))
                    .output(OutputStream::new(EventType::IMU6)),
            )
            .library(
                "noise_filter",
                LibraryInfo::new(ModuleKind::Processor, idle)
                    .input(InputDecl::of(EventType::POLARITY).streams(1))
                    .output(OutputStream::new(FILTERED)),
            )
            .library(
                "denoise_in_place",
                LibraryInfo::new(ModuleKind::Processor, idle)
                    .input(InputDecl::of(EventType::POLARITY).streams(1).writable()),
            )
            .library(
                "converter",
                LibraryInfo::new(ModuleKind::Processor, idle)
                    .input(InputDecl::any_type())
                    .dynamic_outputs(),
            )
            .library(
                "statistics",
                LibraryInfo::new(ModuleKind::Output, idle).input(InputDecl::any_type()),
            )
    }

    fn module(root: &ConfigNode, name: &str, id: i64, library: &str) -> ConfigNode {
        let node = root.child(name).expect("valid name");
        node.put_from_str(attributes::MODULE_ID, "int", &id.to_string())
            .expect("valid value");
        node.put_from_str(MODULE_LIBRARY, "string", library)
            .expect("valid value");
        node
    }

    fn set(node: &ConfigNode, key: &str, value: &str) {
        node.put_from_str(key, "string", value).expect("valid value");
    }

    #[test]
    fn parses_inputs_with_taps() {
        let entries = parse_module_input(" 1[polarity,frame]  3[filtered@4] ").expect("valid input");
        assert_eq!(
            entries,
            vec![
                InputEntry {
                    source: ModuleId::from(1),
                    event_type: EventType::POLARITY,
                    after: None,
                },
                InputEntry {
                    source: ModuleId::from(1),
                    event_type: EventType::FRAME,
                    after: None,
                },
                InputEntry {
                    source: ModuleId::from(3),
                    event_type: FILTERED,
                    after: Some(ModuleId::from(4)),
                },
            ]
        );
    }

    #[test]
    fn rejects_malformed_inputs() {
        for input in [
            "",
            "   ",
            "1",
            "1[]",
            "1[polarity",
            "x[polarity]",
            "70000[polarity]",
            "1[polarity@]",
            "1[pol arity]",
            "1[polarity,polarity]",
            "1[polarity] 1[frame]",
        ] {
            assert!(
                matches!(parse_module_input(input), Err(Error::Parse { .. })),
                "{input:?} must be rejected"
            );
        }
    }

    #[test]
    fn parses_outputs() {
        assert_eq!(
            parse_module_output("polarity, frame").ok(),
            Some(vec![EventType::POLARITY, EventType::FRAME])
        );
        assert!(parse_module_output("polarity,polarity").is_err());
        assert!(parse_module_output("").is_err());
    }

    #[test]
    fn builds_pipeline_from_json() {
        let root = ConfigNode::root();
        root.import_json_str(
            r#"{
                "camera": { "moduleId": 1, "moduleLibrary": "camera" },
                "filter": { "moduleId": 2, "moduleLibrary": "noise_filter", "moduleInput": "1[polarity]" },
                "converter": {
                    "moduleId": 4,
                    "moduleLibrary": "converter",
                    "moduleInput": "2[filtered]",
                    "moduleOutput": "frame"
                },
                "stats": { "moduleId": 3, "moduleLibrary": "statistics", "moduleInput": "4[frame] 1[imu6]" },
                "system": { "version": "1" }
            }"#,
        )
        .expect("valid json");

        let mut mainloop = from_config(&root, &catalog())
            .and_then(|builder| builder.build())
            .expect("valid pipeline");
        let order: Vec<u16> = mainloop.graph().order().iter().map(u16::from).collect();
        assert_eq!(order, vec![1, 2, 4, 3]);
        assert!(mainloop.stream_exists(ModuleId::from(4), &EventType::FRAME));
        assert_eq!(mainloop.registry().len(), 4);

        let report = mainloop.run_cycle();
        assert_eq!(report.executed.len(), 4);
        assert_eq!(
            mainloop.status(ModuleId::from(3)),
            Some(ModuleStatus::Running)
        );
    }

    #[test]
    fn writable_and_tapped_inputs() {
        let root = ConfigNode::root();
        module(&root, "camera", 1, "camera");
        let denoise = module(&root, "denoise", 2, "denoise_in_place");
        set(&denoise, MODULE_INPUT, "1[polarity]");
        let stats = module(&root, "stats", 3, "statistics");
        set(&stats, MODULE_INPUT, "1[polarity@2]");

        let mainloop = from_config(&root, &catalog())
            .and_then(|builder| builder.build())
            .expect("valid pipeline");
        let denoise = mainloop.registry().lookup(ModuleId::from(2)).expect("registered");
        assert!(!denoise.contract().inputs[0].read_only);
        let stats = mainloop.registry().lookup(ModuleId::from(3)).expect("registered");
        assert_eq!(stats.contract().inputs[0].after, Some(ModuleId::from(2)));
        assert!(stats.contract().inputs[0].read_only);
    }

    #[test]
    fn attribute_rules() {
        let catalog = catalog();
        let key_of = |root: &ConfigNode| match from_config(root, &catalog) {
            Err(Error::Config { key, .. }) => key,
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("configuration must be rejected"),
        };

        // Input modules take no input
        let root = ConfigNode::root();
        let camera = module(&root, "camera", 1, "camera");
        set(&camera, MODULE_INPUT, "2[polarity]");
        assert_eq!(key_of(&root), MODULE_INPUT);

        // Processors need input
        let root = ConfigNode::root();
        module(&root, "filter", 2, "noise_filter");
        assert_eq!(key_of(&root), MODULE_INPUT);

        // Fixed outputs cannot be overridden
        let root = ConfigNode::root();
        let camera = module(&root, "camera", 1, "camera");
        set(&camera, MODULE_OUTPUT, "frame");
        assert_eq!(key_of(&root), MODULE_OUTPUT);

        // Dynamic outputs must be named
        let root = ConfigNode::root();
        let converter = module(&root, "converter", 4, "converter");
        set(&converter, MODULE_INPUT, "1[polarity]");
        assert_eq!(key_of(&root), MODULE_OUTPUT);

        // Output modules take no output
        let root = ConfigNode::root();
        let stats = module(&root, "stats", 3, "statistics");
        set(&stats, MODULE_INPUT, "1[polarity]");
        set(&stats, MODULE_OUTPUT, "frame");
        assert_eq!(key_of(&root), MODULE_OUTPUT);

        // Unknown library and invalid id
        let root = ConfigNode::root();
        module(&root, "mystery", 5, "mystery");
        assert_eq!(key_of(&root), MODULE_LIBRARY);
        let root = ConfigNode::root();
        module(&root, "camera", 0, "camera");
        assert_eq!(key_of(&root), attributes::MODULE_ID);
        let root = ConfigNode::root();
        module(&root, "camera", 65536, "camera");
        assert_eq!(key_of(&root), attributes::MODULE_ID);
    }

    #[test]
    fn connection_counts() {
        let catalog = catalog();
        let build = |input: &str| {
            let root = ConfigNode::root();
            module(&root, "camera", 1, "camera");
            module(&root, "other", 5, "camera");
            let filter = module(&root, "filter", 2, "noise_filter");
            set(&filter, MODULE_INPUT, input);
            from_config(&root, &catalog).map(|_| ())
        };

        assert!(build("1[polarity]").is_ok());
        // Exactly one polarity stream
        assert!(matches!(
            build("1[polarity] 5[polarity]"),
            Err(Error::Config { .. })
        ));
        // Type not accepted
        assert!(matches!(build("1[imu6]"), Err(Error::Config { .. })));
        assert!(matches!(build("1[polarity,imu6]"), Err(Error::Config { .. })));
    }
}
