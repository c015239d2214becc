// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Hierarchical configuration store.
//!
//! Nodes hold typed attributes with bounds and flags and notify subscribed listeners of
//! changes. Modules read their settings from their own node; the node is the only
//! authoritative source of current settings.

mod json;
mod node;
mod value;

pub use node::{AttributeEvent, AttributeEventKind, ConfigNode, Subscription};
pub use value::{Attribute, Bounds, Flags, Value, ValueType};
