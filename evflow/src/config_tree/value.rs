// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

use crate::error::Error;
use std::fmt::Display;
use std::str::FromStr;

/// Type of a configuration attribute
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum ValueType {
    Bool,
    Int,
    Float,
    Str,
}

impl FromStr for ValueType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bool" => Ok(ValueType::Bool),
            "int" => Ok(ValueType::Int),
            "float" => Ok(ValueType::Float),
            "string" => Ok(ValueType::Str),
            _ => Err(Error::Parse {
                input: s.to_owned(),
                reason: "unknown attribute type",
            }),
        }
    }
}

impl Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Str => "string",
        };
        f.write_str(name)
    }
}

/// Value of a configuration attribute
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::Str(_) => ValueType::Str,
        }
    }

    /// Parse `input` as a value of type `value_type`
    pub fn parse(value_type: ValueType, input: &str) -> Result<Value, Error> {
        let parse_error = |reason| Error::Parse {
            input: input.to_owned(),
            reason,
        };
        match value_type {
            ValueType::Bool => match input {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                _ => Err(parse_error("expected true or false")),
            },
            ValueType::Int => input
                .parse()
                .map(Value::Int)
                .map_err(|_| parse_error("expected an integer")),
            ValueType::Float => input
                .parse()
                .map(Value::Float)
                .map_err(|_| parse_error("expected a floating point number")),
            ValueType::Str => Ok(Value::Str(input.to_owned())),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(v) => f.write_str(v),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

/// Allowed range of an attribute value
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Bounds {
    #[default]
    Unbounded,
    Int {
        min: i64,
        max: i64,
    },
    Float {
        min: f64,
        max: f64,
    },
    /// String length in bytes
    StrLen {
        min: usize,
        max: usize,
    },
}

impl Bounds {
    /// Whether `value` lies within the bounds. Bounds of another type than the value do not apply.
    pub fn contains(&self, value: &Value) -> bool {
        match (self, value) {
            (Bounds::Int { min, max }, Value::Int(v)) => (min..=max).contains(&v),
            (Bounds::Float { min, max }, Value::Float(v)) => *min <= *v && *v <= *max,
            (Bounds::StrLen { min, max }, Value::Str(v)) => (min..=max).contains(&&v.len()),
            _ => true,
        }
    }
}

/// Attribute flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags {
    /// Only the owner may change the value, through `update_read_only`
    pub read_only: bool,
    /// Skipped on export
    pub no_export: bool,
}

impl Flags {
    pub const NORMAL: Flags = Flags {
        read_only: false,
        no_export: false,
    };
    pub const READ_ONLY: Flags = Flags {
        read_only: true,
        no_export: false,
    };
    pub const NO_EXPORT: Flags = Flags {
        read_only: false,
        no_export: true,
    };
}

/// A typed configuration attribute with metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub(crate) value: Value,
    pub(crate) bounds: Bounds,
    pub(crate) flags: Flags,
    pub(crate) description: String,
}

impl Attribute {
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_by_type() {
        let int: ValueType = "int".parse().expect("valid type");
        assert_eq!(Value::parse(int, "-12").ok(), Some(Value::Int(-12)));
        assert!(Value::parse(int, "1.5").is_err());
        assert_eq!(
            Value::parse(ValueType::Bool, "true").ok(),
            Some(Value::Bool(true))
        );
        assert_eq!(
            Value::parse(ValueType::Float, "0.25").ok(),
            Some(Value::Float(0.25))
        );
        assert_eq!(
            Value::parse(ValueType::Str, "a b").ok(),
            Some(Value::from("a b"))
        );
        assert!("double".parse::<ValueType>().is_err());
    }

    #[test]
    fn bounds_apply_to_matching_type() {
        let bounds = Bounds::Int { min: 0, max: 5 };
        assert!(bounds.contains(&Value::Int(5)));
        assert!(!bounds.contains(&Value::Int(6)));
        assert!(bounds.contains(&Value::Bool(true)));

        let bounds = Bounds::StrLen { min: 1, max: 3 };
        assert!(!bounds.contains(&Value::from("")));
        assert!(bounds.contains(&Value::from("abc")));
    }
}
