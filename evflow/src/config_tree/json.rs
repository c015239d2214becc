// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! JSON import and export of configuration subtrees.
//!
//! A node maps to a JSON object: attributes become scalar members, children become nested
//! objects. Integers and floats are told apart by their JSON number representation.

use super::node::ConfigNode;
use super::value::{Bounds, Flags, Value, ValueType};
use crate::error::Error;
use evflow_log::warn;
use serde_json::{Map, Number};

impl ConfigNode {
    /// Export this node and its subtree, skipping attributes flagged `no_export`
    pub fn export_json(&self) -> serde_json::Value {
        let mut object = Map::new();
        for (key, attribute) in self.attributes() {
            if attribute.flags().no_export {
                continue;
            }
            let value = match attribute.value() {
                Value::Bool(v) => serde_json::Value::Bool(*v),
                Value::Int(v) => serde_json::Value::Number(Number::from(*v)),
                // Non-finite floats have no JSON representation
                Value::Float(v) => match Number::from_f64(*v) {
                    Some(n) => serde_json::Value::Number(n),
                    None => continue,
                },
                Value::Str(v) => serde_json::Value::String(v.clone()),
            };
            object.insert(key, value);
        }
        for child in self.children() {
            object.insert(child.name().to_owned(), child.export_json());
        }
        serde_json::Value::Object(object)
    }

    pub fn export_json_string(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(&self.export_json()).map_err(|e| Error::Io((e.into(), "json export")))
    }

    /// Import attributes and children from a JSON object.
    ///
    /// Missing attributes are created without bounds. Existing attributes are updated through
    /// `put`, so bounds and types are checked; read-only attributes are skipped.
    pub fn import_json(&self, json: &serde_json::Value) -> Result<(), Error> {
        let serde_json::Value::Object(object) = json else {
            return Err(Error::Parse {
                input: json.to_string(),
                reason: "expected a JSON object",
            });
        };

        for (key, member) in object {
            let value = match member {
                serde_json::Value::Object(_) => {
                    self.child(key)?.import_json(member)?;
                    continue;
                }
                serde_json::Value::Bool(v) => Value::Bool(*v),
                serde_json::Value::String(v) => Value::Str(v.clone()),
                serde_json::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                    // An integral number may still target a float attribute
                    (Some(v), _) if self.value_type(key) != Some(ValueType::Float) => Value::Int(v),
                    (_, Some(v)) => Value::Float(v),
                    _ => {
                        return Err(Error::Parse {
                            input: n.to_string(),
                            reason: "number out of range",
                        })
                    }
                },
                serde_json::Value::Null | serde_json::Value::Array(_) => {
                    return Err(Error::Parse {
                        input: member.to_string(),
                        reason: "expected a scalar or an object",
                    })
                }
            };

            match self.attribute(key) {
                Some(attribute) if attribute.flags().read_only => {
                    warn!("Skipping import of read-only attribute {}{key}", self.path());
                }
                Some(_) => self.put(key, value)?,
                None => self.create(key, value, Bounds::Unbounded, Flags::NORMAL, "")?,
            }
        }
        Ok(())
    }

    pub fn import_json_str(&self, json: &str) -> Result<(), Error> {
        let json: serde_json::Value = serde_json::from_str(json).map_err(|e| Error::Parse {
            input: e.to_string(),
            reason: "invalid JSON",
        })?;
        self.import_json(&json)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn export_skips_no_export_attributes() {
        let root = ConfigNode::root();
        let camera = root.child("camera").expect("valid");
        camera
            .create("moduleId", 1i64, Bounds::Unbounded, Flags::READ_ONLY, "")
            .expect("created");
        camera
            .create("running", true, Bounds::Unbounded, Flags::NO_EXPORT, "")
            .expect("created");
        camera
            .create("gain", 0.5, Bounds::Unbounded, Flags::NORMAL, "")
            .expect("created");

        assert_eq!(
            root.export_json(),
            json!({ "camera": { "moduleId": 1, "gain": 0.5 } })
        );
    }

    #[test]
    fn import_creates_and_updates() {
        let root = ConfigNode::root();
        let filter = root.child("filter").expect("valid");
        filter
            .create("threshold", 1.0, Bounds::Float { min: 0.0, max: 10.0 }, Flags::NORMAL, "")
            .expect("created");
        filter
            .create("moduleId", 2i64, Bounds::Unbounded, Flags::READ_ONLY, "")
            .expect("created");

        root.import_json_str(
            r#"{ "filter": { "threshold": 3, "moduleId": 9, "moduleInput": "1[polarity]" },
                 "camera": { "enabled": true } }"#,
        )
        .expect("import");

        assert_eq!(filter.get_float("threshold").ok(), Some(3.0));
        assert_eq!(filter.get_int("moduleId").ok(), Some(2));
        assert_eq!(
            filter.get_string("moduleInput").ok().as_deref(),
            Some("1[polarity]")
        );
        assert_eq!(
            root.node_at("camera").and_then(|c| c.get_bool("enabled")).ok(),
            Some(true)
        );

        assert!(root
            .import_json(&json!({ "filter": { "threshold": 11.0 } }))
            .is_err());
        assert!(root.import_json(&json!([1, 2])).is_err());
    }
}
