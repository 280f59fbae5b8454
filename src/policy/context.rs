//! Flattened view of a job context.
//!
//! The agent service encodes context data with type tags: `{"t":1,"a":[..]}` arrays,
//! `{"t":2,"d":[{"k":..,"v":..}]}` dictionaries (`t` 5 when case sensitive),
//! `{"t":3,"b":..}` booleans, `{"t":4,"n":..}` numbers and bare strings. Plain JSON is
//! accepted too. Every leaf ends up under its dotted path, array items as `.N`.
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

const ARRAY_TAG: u64 = 1;
const DICTIONARY_TAG: u64 = 2;
const BOOLEAN_TAG: u64 = 3;
const NUMBER_TAG: u64 = 4;
const CASE_SENSITIVE_DICTIONARY_TAG: u64 = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl Display for Scalar {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Null => f.write_str("null"),
            Scalar::Bool(value) => write!(f, "{value}"),
            Scalar::Number(value) => write!(f, "{value}"),
            Scalar::String(value) => write!(f, "'{value}'"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobContext {
    leaves: BTreeMap<String, Scalar>,
    containers: BTreeSet<String>,
}

impl JobContext {
    pub fn flatten(data: &Value) -> Self {
        let mut context = Self::default();
        context.visit(String::new(), data);
        context
    }

    /// Value at `path`; null when absent or not a leaf.
    pub fn get(&self, path: &str) -> Scalar {
        self.leaves.get(path).cloned().unwrap_or(Scalar::Null)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.leaves.contains_key(path) || self.containers.contains(path)
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    fn visit(&mut self, path: String, value: &Value) {
        match value {
            Value::Null => self.leaf(path, Scalar::Null),
            Value::Bool(value) => self.leaf(path, Scalar::Bool(*value)),
            Value::Number(value) => {
                self.leaf(path, value.as_f64().map_or(Scalar::Null, Scalar::Number))
            }
            Value::String(value) => self.leaf(path, Scalar::String(value.clone())),
            Value::Array(items) => self.visit_items(path, items),
            Value::Object(object) => match tag(object) {
                Some(ARRAY_TAG) => match object.get("a") {
                    Some(Value::Array(items)) => self.visit_items(path, items),
                    _ => self.visit_items(path, &[]),
                },
                Some(DICTIONARY_TAG | CASE_SENSITIVE_DICTIONARY_TAG) => {
                    self.container(&path);
                    let entries = object.get("d").and_then(Value::as_array);
                    for entry in entries.into_iter().flatten() {
                        if let Some(key) = entry.get("k").and_then(Value::as_str) {
                            let value = entry.get("v").unwrap_or(&Value::Null);
                            self.visit(join(&path, key), value);
                        }
                    }
                }
                Some(BOOLEAN_TAG) => {
                    let value = object.get("b").and_then(Value::as_bool).unwrap_or_default();
                    self.leaf(path, Scalar::Bool(value))
                }
                Some(NUMBER_TAG) => {
                    let value = object.get("n").and_then(Value::as_f64).unwrap_or_default();
                    self.leaf(path, Scalar::Number(value))
                }
                _ => {
                    self.container(&path);
                    for (key, value) in object {
                        self.visit(join(&path, key), value);
                    }
                }
            },
        }
    }

    fn visit_items(&mut self, path: String, items: &[Value]) {
        self.container(&path);
        for (index, item) in items.iter().enumerate() {
            self.visit(join(&path, &index.to_string()), item);
        }
    }

    fn leaf(&mut self, path: String, value: Scalar) {
        if !path.is_empty() {
            self.leaves.insert(path, value);
        }
    }

    fn container(&mut self, path: &str) {
        if !path.is_empty() {
            self.containers.insert(path.to_string());
        }
    }
}

/// Type tag of an encoded context value. Plain objects happening to have a `t` key are
/// only taken as tagged when every other key belongs to the encoding.
fn tag(object: &Map<String, Value>) -> Option<u64> {
    let tag = object.get("t")?.as_u64()?;
    object
        .keys()
        .all(|key| matches!(key.as_str(), "t" | "a" | "d" | "b" | "n" | "s"))
        .then_some(tag)
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}
