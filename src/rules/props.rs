//! Defensive lookups into a resource's free-form property bag.
//!
//! Templates routinely carry intrinsic functions (`{"Ref": ..}`, `{"Fn::GetAtt": ..}`) where a
//! literal would normally sit. Those values are only known at deploy time, so lookups report
//! them as [`Prop::Unresolved`] and rules treat them as "cannot judge".

use serde_json::{Map, Value};

use crate::core::Resource;
use crate::error::RuleError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Prop<T> {
    Missing,
    Unresolved,
    Present(T),
}

impl<T> Prop<T> {
    pub fn is_missing(&self) -> bool {
        matches!(self, Prop::Missing)
    }

    pub fn present(self) -> Option<T> {
        match self {
            Prop::Present(v) => Some(v),
            _ => None,
        }
    }

    fn map<U>(self, f: impl FnOnce(T) -> U) -> Prop<U> {
        match self {
            Prop::Missing => Prop::Missing,
            Prop::Unresolved => Prop::Unresolved,
            Prop::Present(v) => Prop::Present(f(v)),
        }
    }
}

pub type Lookup<T> = Result<Prop<T>, RuleError>;

pub fn is_intrinsic(value: &Value) -> bool {
    match value {
        Value::Object(map) => is_intrinsic_map(map),
        _ => false,
    }
}

fn is_intrinsic_map(map: &Map<String, Value>) -> bool {
    map.len() == 1
        && map
            .keys()
            .next()
            .is_some_and(|k| k == "Ref" || k.starts_with("Fn::"))
}

pub fn value<'a>(resource: &'a Resource, path: &[&str]) -> Lookup<&'a Value> {
    value_in(&resource.properties, path)
}

pub fn value_in<'a>(root: &'a Map<String, Value>, path: &[&str]) -> Lookup<&'a Value> {
    let mut map = root;
    let mut found: Option<&Value> = None;
    for (i, key) in path.iter().enumerate() {
        if let Some(prev) = found {
            match prev {
                Value::Object(m) if is_intrinsic_map(m) => return Ok(Prop::Unresolved),
                Value::Object(m) => map = m,
                _ => return Err(RuleError::shape(path[..i].join("."), "object")),
            }
        }
        match map.get(*key) {
            None | Some(Value::Null) => return Ok(Prop::Missing),
            Some(v) => found = Some(v),
        }
    }
    match found {
        None => Ok(Prop::Missing),
        Some(v) if is_intrinsic(v) => Ok(Prop::Unresolved),
        Some(v) => Ok(Prop::Present(v)),
    }
}

pub fn string<'a>(resource: &'a Resource, path: &[&str]) -> Lookup<&'a str> {
    string_in(&resource.properties, path)
}

pub fn string_in<'a>(root: &'a Map<String, Value>, path: &[&str]) -> Lookup<&'a str> {
    match value_in(root, path)? {
        Prop::Present(Value::String(s)) => Ok(Prop::Present(s.as_str())),
        Prop::Present(_) => Err(RuleError::shape(path.join("."), "string")),
        other => Ok(other.map(|_| "")),
    }
}

pub fn boolean(resource: &Resource, path: &[&str]) -> Lookup<bool> {
    boolean_in(&resource.properties, path)
}

pub fn boolean_in(root: &Map<String, Value>, path: &[&str]) -> Lookup<bool> {
    match value_in(root, path)? {
        Prop::Present(Value::Bool(b)) => Ok(Prop::Present(*b)),
        Prop::Present(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Prop::Present(true)),
            "false" => Ok(Prop::Present(false)),
            _ => Err(RuleError::shape(path.join("."), "boolean")),
        },
        Prop::Present(_) => Err(RuleError::shape(path.join("."), "boolean")),
        other => Ok(other.map(|_| false)),
    }
}

pub fn number(resource: &Resource, path: &[&str]) -> Lookup<f64> {
    number_in(&resource.properties, path)
}

pub fn number_in(root: &Map<String, Value>, path: &[&str]) -> Lookup<f64> {
    match value_in(root, path)? {
        Prop::Present(Value::Number(n)) => n
            .as_f64()
            .map(Prop::Present)
            .ok_or_else(|| RuleError::shape(path.join("."), "number")),
        Prop::Present(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Prop::Present)
            .map_err(|_| RuleError::shape(path.join("."), "number")),
        Prop::Present(_) => Err(RuleError::shape(path.join("."), "number")),
        other => Ok(other.map(|_| 0.0)),
    }
}

pub fn array<'a>(resource: &'a Resource, path: &[&str]) -> Lookup<&'a [Value]> {
    match value(resource, path)? {
        Prop::Present(Value::Array(items)) => Ok(Prop::Present(items.as_slice())),
        Prop::Present(_) => Err(RuleError::shape(path.join("."), "list")),
        other => Ok(other.map(|_| &[][..])),
    }
}

pub fn one_or_many(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

/// Best-effort literal for a string that may be wrapped in `Fn::Join`; unresolved parts
/// contribute nothing.
pub fn flatten_literal(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => {
            let parts = map.get("Fn::Join")?.as_array()?;
            let sep = parts.first()?.as_str()?;
            let items = parts.get(1)?.as_array()?;
            let flattened: Vec<String> = items
                .iter()
                .map(|v| flatten_literal(v).unwrap_or_default())
                .collect();
            Some(flattened.join(sep))
        }
        _ => None,
    }
}
