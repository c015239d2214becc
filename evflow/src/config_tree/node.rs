// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

use super::value::{Attribute, Bounds, Flags, Value, ValueType};
use crate::error::Error;
use evflow_log::trace;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Kind of change reported to listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeEventKind {
    Added,
    Modified,
    Removed,
}

/// Change of one attribute of a node
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeEvent {
    pub kind: AttributeEventKind,
    pub key: String,
    pub value: Value,
}

type Listener = Arc<dyn Fn(&AttributeEvent) + Send + Sync>;

#[derive(Default)]
struct NodeState {
    attributes: BTreeMap<String, Attribute>,
    children: BTreeMap<String, ConfigNode>,
    listeners: Vec<(u64, Listener)>,
    next_listener: u64,
}

struct NodeInner {
    path: String,
    state: Mutex<NodeState>,
}

/// Handle to a node of the hierarchical configuration tree.
///
/// Cloning the handle is cheap; all clones refer to the same node. Paths are absolute and
/// end with a slash, e.g. `/camera/bias/`.
#[derive(Clone)]
pub struct ConfigNode(Arc<NodeInner>);

impl ConfigNode {
    /// Create the root of a new tree
    pub fn root() -> Self {
        Self::with_path("/".to_owned())
    }

    fn with_path(path: String) -> Self {
        Self(Arc::new(NodeInner {
            path,
            state: Mutex::new(NodeState::default()),
        }))
    }

    fn state(&self) -> MutexGuard<'_, NodeState> {
        self.0.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path(&self) -> &str {
        &self.0.path
    }

    /// Last path component, empty for the root
    pub fn name(&self) -> &str {
        let trimmed = self.0.path.trim_end_matches('/');
        trimmed.rsplit('/').next().unwrap_or_default()
    }

    fn config_error(&self, key: &str, reason: &'static str) -> Error {
        Error::Config {
            path: self.0.path.clone(),
            key: key.to_owned(),
            reason,
        }
    }

    /// Get the child `name`, creating it if absent
    pub fn child(&self, name: &str) -> Result<ConfigNode, Error> {
        if name.is_empty() || name.contains('/') {
            return Err(self.config_error(name, "invalid node name"));
        }
        let mut state = self.state();
        let child = state
            .children
            .entry(name.to_owned())
            .or_insert_with(|| ConfigNode::with_path(format!("{}{name}/", self.0.path)));
        Ok(child.clone())
    }

    pub fn get_child(&self, name: &str) -> Option<ConfigNode> {
        self.state().children.get(name).cloned()
    }

    pub fn children(&self) -> Vec<ConfigNode> {
        self.state().children.values().cloned().collect()
    }

    /// Remove the child `name` with its whole subtree
    pub fn remove_child(&self, name: &str) -> bool {
        self.state().children.remove(name).is_some()
    }

    /// Get the node at `path` below this node, creating missing nodes.
    ///
    /// Leading and trailing slashes are ignored, so `a/b`, `/a/b/` and `a/b/` are equivalent.
    pub fn node_at(&self, path: &str) -> Result<ConfigNode, Error> {
        path.split('/')
            .filter(|c| !c.is_empty())
            .try_fold(self.clone(), |node, name| node.child(name))
    }

    /// Whether the node at `path` below this node exists. Nothing is created.
    pub fn exists(&self, path: &str) -> bool {
        path.split('/')
            .filter(|c| !c.is_empty())
            .try_fold(self.clone(), |node, name| node.get_child(name))
            .is_some()
    }

    /// Create the attribute `key` if absent.
    ///
    /// An existing attribute of the same type keeps its value and gets the new metadata; if
    /// the kept value violates the new bounds, it is replaced by `default`.
    pub fn create(
        &self,
        key: &str,
        default: impl Into<Value>,
        bounds: Bounds,
        flags: Flags,
        description: &str,
    ) -> Result<(), Error> {
        let default = default.into();
        if key.is_empty() {
            return Err(self.config_error(key, "empty attribute key"));
        }
        if !bounds.contains(&default) {
            return Err(self.config_error(key, "default value out of bounds"));
        }

        let event = {
            let mut state = self.state();
            match state.attributes.get_mut(key) {
                Some(existing) if existing.value.value_type() != default.value_type() => {
                    return Err(self.config_error(key, "attribute exists with another type"));
                }
                Some(existing) => {
                    existing.bounds = bounds;
                    existing.flags = flags;
                    existing.description = description.to_owned();
                    if bounds.contains(&existing.value) {
                        None
                    } else {
                        existing.value = default.clone();
                        Some(AttributeEventKind::Modified)
                    }
                }
                None => {
                    state.attributes.insert(
                        key.to_owned(),
                        Attribute {
                            value: default.clone(),
                            bounds,
                            flags,
                            description: description.to_owned(),
                        },
                    );
                    Some(AttributeEventKind::Added)
                }
            }
        };

        if let Some(kind) = event {
            self.notify(kind, key, default);
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.state().attributes.get(key).map(|a| a.value.clone())
    }

    pub fn attribute(&self, key: &str) -> Option<Attribute> {
        self.state().attributes.get(key).cloned()
    }

    fn get_typed<T>(&self, key: &str, f: impl FnOnce(&Value) -> Option<T>) -> Result<T, Error> {
        let value = self
            .get(key)
            .ok_or_else(|| self.config_error(key, "no such attribute"))?;
        f(&value).ok_or_else(|| self.config_error(key, "attribute has another type"))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, Error> {
        self.get_typed(key, Value::as_bool)
    }

    pub fn get_int(&self, key: &str) -> Result<i64, Error> {
        self.get_typed(key, Value::as_int)
    }

    pub fn get_float(&self, key: &str) -> Result<f64, Error> {
        self.get_typed(key, Value::as_float)
    }

    pub fn get_string(&self, key: &str) -> Result<String, Error> {
        self.get_typed(key, |v| v.as_str().map(str::to_owned))
    }

    /// Set an existing attribute. The type must match and the value must lie within bounds.
    pub fn put(&self, key: &str, value: impl Into<Value>) -> Result<(), Error> {
        self.write(key, value.into(), false)
    }

    /// Set an existing attribute, ignoring its read-only flag
    pub fn update_read_only(&self, key: &str, value: impl Into<Value>) -> Result<(), Error> {
        self.write(key, value.into(), true)
    }

    fn write(&self, key: &str, value: Value, force: bool) -> Result<(), Error> {
        {
            let mut state = self.state();
            let attribute = state
                .attributes
                .get_mut(key)
                .ok_or_else(|| self.config_error(key, "no such attribute"))?;
            if attribute.value.value_type() != value.value_type() {
                return Err(self.config_error(key, "attribute has another type"));
            }
            if attribute.flags.read_only && !force {
                return Err(self.config_error(key, "attribute is read-only"));
            }
            if !attribute.bounds.contains(&value) {
                return Err(self.config_error(key, "value out of bounds"));
            }
            if attribute.value == value {
                return Ok(());
            }
            attribute.value = value.clone();
        }

        trace!("Config {}{key} = {value}", self.0.path);
        self.notify(AttributeEventKind::Modified, key, value);
        Ok(())
    }

    /// Set `key` from its string form, creating the attribute if absent.
    ///
    /// `value_type` is one of `bool`, `int`, `float` or `string`.
    pub fn put_from_str(&self, key: &str, value_type: &str, value: &str) -> Result<(), Error> {
        let value = Value::parse(value_type.parse()?, value)?;
        if self.get(key).is_some() {
            self.put(key, value)
        } else {
            self.create(key, value, Bounds::Unbounded, Flags::NORMAL, "")
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        let removed = self.state().attributes.remove(key);
        match removed {
            Some(attribute) => {
                self.notify(AttributeEventKind::Removed, key, attribute.value);
                true
            }
            None => false,
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.state().attributes.keys().cloned().collect()
    }

    pub fn value_type(&self, key: &str) -> Option<ValueType> {
        self.state()
            .attributes
            .get(key)
            .map(|a| a.value.value_type())
    }

    /// Register a change listener for the attributes of this node.
    ///
    /// The listener runs on the thread making the change, after the node is unlocked.
    /// It is removed when the returned [Subscription] is dropped.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&AttributeEvent) + Send + Sync + 'static,
    {
        let mut state = self.state();
        let id = state.next_listener;
        state.next_listener += 1;
        state.listeners.push((id, Arc::new(listener)));
        Subscription {
            node: Arc::downgrade(&self.0),
            id,
        }
    }

    fn notify(&self, kind: AttributeEventKind, key: &str, value: Value) {
        let listeners: Vec<Listener> = self
            .state()
            .listeners
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        if listeners.is_empty() {
            return;
        }
        let event = AttributeEvent {
            kind,
            key: key.to_owned(),
            value,
        };
        for listener in listeners {
            listener(&event);
        }
    }

    pub(crate) fn attributes(&self) -> Vec<(String, Attribute)> {
        self.state()
            .attributes
            .iter()
            .map(|(k, a)| (k.clone(), a.clone()))
            .collect()
    }
}

impl std::fmt::Debug for ConfigNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ConfigNode").field(&self.0.path).finish()
    }
}

/// Listener registration, removed on drop
#[must_use = "the listener is removed when the subscription is dropped"]
#[derive(Debug)]
pub struct Subscription {
    node: Weak<NodeInner>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(node) = self.node.upgrade() {
            let mut state = node.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex;

    fn recorder(node: &ConfigNode) -> (Subscription, Arc<Mutex<Vec<AttributeEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let subscription = node.subscribe(move |event| {
            sink.lock().expect("poisoned").push(event.clone());
        });
        (subscription, events)
    }

    #[test]
    fn paths_and_children() {
        let root = ConfigNode::root();
        let bias = root.node_at("/camera/bias/").expect("valid path");
        assert_eq!(bias.path(), "/camera/bias/");
        assert_eq!(bias.name(), "bias");
        assert_eq!(root.name(), "");
        assert!(root.exists("camera/bias"));
        assert!(!root.exists("camera/aps"));
        assert!(!root.exists("camera/aps"), "exists must not create nodes");
        assert!(root.child("a/b").is_err());

        let again = root.child("camera").and_then(|c| c.child("bias"));
        assert_eq!(again.expect("valid").path(), bias.path());
        assert!(root.remove_child("camera"));
        assert!(!root.exists("camera"));
    }

    #[test]
    fn create_keeps_existing_value() {
        let node = ConfigNode::root();
        node.create("rate", 10i64, Bounds::Int { min: 1, max: 100 }, Flags::NORMAL, "")
            .expect("created");
        node.put("rate", 42i64).expect("in bounds");
        node.create("rate", 10i64, Bounds::Int { min: 1, max: 100 }, Flags::NORMAL, "rate")
            .expect("recreated");
        assert_eq!(node.get_int("rate").ok(), Some(42));
        assert_eq!(
            node.attribute("rate").map(|a| a.description().to_owned()),
            Some("rate".to_owned())
        );

        // Narrowed bounds reset the value to the default
        node.create("rate", 5i64, Bounds::Int { min: 1, max: 10 }, Flags::NORMAL, "")
            .expect("recreated");
        assert_eq!(node.get_int("rate").ok(), Some(5));

        assert!(node
            .create("rate", true, Bounds::Unbounded, Flags::NORMAL, "")
            .is_err());
        assert!(node
            .create("limit", 500i64, Bounds::Int { min: 1, max: 100 }, Flags::NORMAL, "")
            .is_err());
    }

    #[test]
    fn put_checks_type_bounds_and_flags() {
        let node = ConfigNode::root();
        node.create("level", 3i64, Bounds::Int { min: 0, max: 5 }, Flags::NORMAL, "")
            .expect("created");
        node.create("id", 1i64, Bounds::Unbounded, Flags::READ_ONLY, "")
            .expect("created");

        assert!(node.put("level", 6i64).is_err());
        assert!(node.put("level", "high").is_err());
        assert!(node.put("missing", 1i64).is_err());
        assert!(node.put("id", 2i64).is_err());
        assert!(node.update_read_only("id", 2i64).is_ok());
        assert_eq!(node.get_int("id").ok(), Some(2));
        assert!(node.get_bool("level").is_err());
    }

    #[test]
    fn listeners_see_changes_until_unsubscribed() {
        let node = ConfigNode::root();
        let (subscription, events) = recorder(&node);

        node.create("enabled", true, Bounds::Unbounded, Flags::NORMAL, "")
            .expect("created");
        node.put("enabled", true).expect("unchanged put");
        node.put("enabled", false).expect("changed put");
        node.remove("enabled");

        let kinds: Vec<_> = events
            .lock()
            .expect("poisoned")
            .iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                AttributeEventKind::Added,
                AttributeEventKind::Modified,
                AttributeEventKind::Removed
            ]
        );

        drop(subscription);
        node.create("enabled", true, Bounds::Unbounded, Flags::NORMAL, "")
            .expect("created");
        assert_eq!(events.lock().expect("poisoned").len(), 3);
    }

    #[test]
    fn listener_may_access_the_node() {
        let node = ConfigNode::root();
        node.create("a", 1i64, Bounds::Unbounded, Flags::NORMAL, "")
            .expect("created");
        node.create("b", 0i64, Bounds::Unbounded, Flags::NORMAL, "")
            .expect("created");
        let mirror = node.clone();
        let _subscription = node.subscribe(move |event| {
            if event.key == "a" {
                if let Value::Int(v) = event.value {
                    mirror.put("b", v * 2).expect("mirror");
                }
            }
        });
        node.put("a", 21i64).expect("put");
        assert_eq!(node.get_int("b").ok(), Some(42));
    }

    #[test]
    fn string_overrides() {
        let node = ConfigNode::root();
        node.put_from_str("gain", "float", "1.5").expect("created");
        assert_eq!(node.get_float("gain").ok(), Some(1.5));
        node.put_from_str("gain", "float", "2.5").expect("modified");
        assert_eq!(node.get_float("gain").ok(), Some(2.5));
        assert!(node.put_from_str("gain", "int", "2").is_err());
        assert!(node.put_from_str("gain", "double", "2").is_err());
    }
}
