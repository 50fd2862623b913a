//! Compiled-template persistence.
//!
//! A parsed [`Template`] can be flattened to bytes and reloaded so a host
//! application can skip re-parsing. The byte form is a serde_json
//! encoding of the statement tree: every node carries its kind, its
//! kind-specific payload, and its source byte offset. Callables never
//! occur in a parsed tree, and the value encoder refuses them
//! defensively.

use std::rc::Rc;

use indexmap::IndexMap;
use serde::de::Deserializer;
use serde::ser::{Error as _, Serializer};
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Location};
use crate::value::Value;
use crate::Template;

impl Template {
    /// Flatten the parsed tree to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(&self.root).map_err(|e| {
            Error::new(
                ErrorKind::Type,
                format!("cannot serialize template: {}", e),
            )
        })
    }

    /// Reload a tree produced by [`Template::to_bytes`]. Locations come
    /// back as bare offsets (the source text is not stored), so
    /// diagnostics from a reloaded template carry no snippet.
    pub fn from_bytes(bytes: &[u8]) -> Result<Template, Error> {
        let root = serde_json::from_slice(bytes).map_err(|e| {
            Error::new(
                ErrorKind::Value,
                format!("cannot deserialize template: {}", e),
            )
        })?;
        Ok(Template { root })
    }
}

impl Serialize for Location {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.offset as u64)
    }
}

impl<'de> Deserialize<'de> for Location {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let offset = u64::deserialize(deserializer)? as usize;
        Ok(Location::new(Rc::new(String::new()), offset))
    }
}

/// Serializable mirror of the data variants of [`Value`].
#[derive(Serialize, Deserialize)]
enum ValueRepr {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<ValueRepr>),
    Object(IndexMap<String, ValueRepr>),
}

fn to_repr(value: &Value) -> Result<ValueRepr, String> {
    Ok(match value {
        Value::Null => ValueRepr::Null,
        Value::Bool(b) => ValueRepr::Bool(*b),
        Value::Int(n) => ValueRepr::Int(*n),
        Value::Float(n) => ValueRepr::Float(*n),
        Value::Str(s) => ValueRepr::Str(s.clone()),
        Value::Array(items) => {
            ValueRepr::Array(items.borrow().iter().map(to_repr).collect::<Result<_, _>>()?)
        }
        Value::Object(map) => ValueRepr::Object(
            map.borrow()
                .iter()
                .map(|(k, v)| Ok((k.clone(), to_repr(v)?)))
                .collect::<Result<_, String>>()?,
        ),
        Value::Callable(c) => return Err(format!("cannot serialize callable {}", c.name)),
    })
}

fn from_repr(repr: ValueRepr) -> Value {
    match repr {
        ValueRepr::Null => Value::Null,
        ValueRepr::Bool(b) => Value::Bool(b),
        ValueRepr::Int(n) => Value::Int(n),
        ValueRepr::Float(n) => Value::Float(n),
        ValueRepr::Str(s) => Value::Str(s),
        ValueRepr::Array(items) => Value::array(items.into_iter().map(from_repr).collect()),
        ValueRepr::Object(map) => {
            Value::object(map.into_iter().map(|(k, v)| (k, from_repr(v))).collect())
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        to_repr(self).map_err(S::Error::custom)?.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        ValueRepr::deserialize(deserializer).map(from_repr)
    }
}
