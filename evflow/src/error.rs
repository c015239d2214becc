// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! evflow Error implementation

use crate::module::{ModuleId, ModuleStatus};
use crate::stream::{ActiveStream, Cardinality};

/// evflow Error type
///
/// Registry errors (`UnknownModule` to `InvalidContract`) concern a single operation and can be
/// retried. Graph errors (`DanglingInput` to `Cycle`) prevent a pipeline from being built.
/// `Logic` reports misuse of a shared primitive by the caller.
#[non_exhaustive]
#[derive(Debug)]
pub enum Error {
    UnknownModule(ModuleId),
    DuplicateContract(ModuleId),
    DuplicateName(String),
    InvalidTransition {
        module: ModuleId,
        from: ModuleStatus,
        to: ModuleStatus,
    },
    ModuleBusy {
        module: ModuleId,
        status: ModuleStatus,
    },
    InvalidContract {
        module: ModuleId,
        reason: &'static str,
    },
    DanglingInput {
        module: ModuleId,
        stream: ActiveStream,
    },
    AmbiguousSource {
        stream: ActiveStream,
        producers: (ModuleId, ModuleId),
    },
    TypeMismatch {
        module: ModuleId,
        stream: ActiveStream,
        expected: Cardinality,
        declared: Cardinality,
    },
    InvalidTap {
        module: ModuleId,
        stream: ActiveStream,
        after: ModuleId,
    },
    Cycle(Vec<ModuleId>),
    Logic(&'static str),
    Config {
        path: String,
        key: String,
        reason: &'static str,
    },
    Parse {
        input: String,
        reason: &'static str,
    },
    Io((std::io::Error, &'static str)),
}

impl Error {
    /// Whether this error prevents building a runnable pipeline
    pub fn is_graph_error(&self) -> bool {
        matches!(
            self,
            Error::DanglingInput { .. }
                | Error::AmbiguousSource { .. }
                | Error::TypeMismatch { .. }
                | Error::InvalidTap { .. }
                | Error::Cycle(_)
        )
    }
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::UnknownModule(id) => write!(f, "Unknown module {id}"),
            Error::DuplicateContract(id) => write!(f, "Module {id} is already registered"),
            Error::DuplicateName(name) => write!(f, "Module name '{name}' is already in use"),
            Error::InvalidTransition { module, from, to } => {
                write!(f, "Module {module}: invalid transition {from} -> {to}")
            }
            Error::ModuleBusy { module, status } => {
                write!(f, "Module {module} is busy (status {status})")
            }
            Error::InvalidContract { module, reason } => {
                write!(f, "Module {module}: invalid stream contract, {reason}")
            }
            Error::DanglingInput { module, stream } => {
                write!(f, "Module {module}: no producer for input stream {stream}")
            }
            Error::AmbiguousSource { stream, producers } => write!(
                f,
                "Stream {stream} is produced by both {} and {}",
                producers.0, producers.1
            ),
            Error::TypeMismatch {
                module,
                stream,
                expected,
                declared,
            } => write!(
                f,
                "Module {module}: input stream {stream} expects {expected} events per packet, producer declares {declared}"
            ),
            Error::InvalidTap {
                module,
                stream,
                after,
            } => write!(
                f,
                "Module {module}: module {after} is not a modifying processor of stream {stream}"
            ),
            Error::Cycle(modules) => {
                write!(f, "Dependency cycle between modules")?;
                for id in modules {
                    write!(f, " {id}")?;
                }
                Ok(())
            }
            Error::Logic(description) => write!(f, "Logic error, {description}"),
            Error::Config { path, key, reason } => {
                write!(f, "Config error at {path}{key}: {reason}")
            }
            Error::Parse { input, reason } => write!(f, "Parse error in '{input}': {reason}"),
            Error::Io((e, description)) => write!(f, "Io error: {}, {}", description, e),
        }
    }
}

/// Failure reported by a module callback.
///
/// This is the only error type crossing the module boundary. A module converts its internal
/// failures into a `ModuleError`; the mainloop then stops that module and keeps running all others.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleError {
    message: String,
}

impl ModuleError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for ModuleError {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ModuleError {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<Error> for ModuleError {
    fn from(value: Error) -> Self {
        Self::new(value.to_string())
    }
}

impl std::error::Error for ModuleError {}

impl std::fmt::Display for ModuleError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}
