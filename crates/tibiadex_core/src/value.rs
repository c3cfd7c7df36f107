use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};

/// Schema-less attribute blob stored per record. Keys are infobox group names
/// or field labels; values nest arbitrarily.
pub type Attributes = BTreeMap<String, AttrValue>;

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<AttrValue>),
    Map(Attributes),
    Range {
        base: Option<i64>,
        min: i64,
        max: i64,
    },
}

impl AttrValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    pub fn as_map(&self) -> Option<&Attributes> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[AttrValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Self::String(value) => value.trim().is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Map(map) => map.is_empty(),
            _ => false,
        }
    }

    /// All text reachable from this value, space-joined. Used for keyword
    /// scans that do not care about structure.
    pub fn flatten_text(&self) -> String {
        match self {
            Self::String(value) => value.clone(),
            Self::Int(value) => value.to_string(),
            Self::Float(value) => value.to_string(),
            Self::Bool(value) => value.to_string(),
            Self::List(items) => items
                .iter()
                .map(AttrValue::flatten_text)
                .collect::<Vec<_>>()
                .join(" "),
            Self::Map(map) => map
                .iter()
                .map(|(key, value)| format!("{key} {}", value.flatten_text()))
                .collect::<Vec<_>>()
                .join(" "),
            Self::Range { base, min, max } => match base {
                Some(base) => format!("{base} ({min}-{max})"),
                None => format!("{min}-{max}"),
            },
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::String(value) => Value::String(value.clone()),
            Self::Int(value) => Value::Number((*value).into()),
            Self::Float(value) => Number::from_f64(*value)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Bool(value) => Value::Bool(*value),
            Self::List(items) => Value::Array(items.iter().map(AttrValue::to_json).collect()),
            Self::Map(map) => Value::Object(attributes_to_json_map(map)),
            Self::Range { base, min, max } => {
                let mut object = Map::new();
                if let Some(base) = base {
                    object.insert("base".to_string(), Value::Number((*base).into()));
                }
                object.insert("min".to_string(), Value::Number((*min).into()));
                object.insert("max".to_string(), Value::Number((*max).into()));
                Value::Object(object)
            }
        }
    }

    /// Decodes JSON without guessing at ranges: objects always become `Map`,
    /// so plain mappings survive a round trip untouched.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => Self::String(String::new()),
            Value::Bool(value) => Self::Bool(value),
            Value::Number(number) => match number.as_i64() {
                Some(value) => Self::Int(value),
                None => Self::Float(number.as_f64().unwrap_or_default()),
            },
            Value::String(value) => Self::String(value),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from_json).collect()),
            Value::Object(object) => Self::Map(
                object
                    .into_iter()
                    .map(|(key, value)| (key, Self::from_json(value)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Attributes> for AttrValue {
    fn from(value: Attributes) -> Self {
        Self::Map(value)
    }
}

impl Serialize for AttrValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AttrValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from_json)
    }
}

fn attributes_to_json_map(attributes: &Attributes) -> Map<String, Value> {
    attributes
        .iter()
        .map(|(key, value)| (key.clone(), value.to_json()))
        .collect()
}

pub fn attributes_to_json(attributes: &Attributes) -> Value {
    Value::Object(attributes_to_json_map(attributes))
}

pub fn encode_attributes(attributes: &Attributes) -> Result<String> {
    serde_json::to_string(&attributes_to_json(attributes)).context("failed to encode attributes")
}

pub fn decode_attributes(raw: &str) -> Result<Attributes> {
    let value: Value = serde_json::from_str(raw).context("failed to parse attribute JSON")?;
    match AttrValue::from_json(value) {
        AttrValue::Map(map) => Ok(map),
        _ => bail!("attribute JSON must be an object"),
    }
}

/// Follows `path` through nested maps.
pub fn lookup<'a>(attributes: &'a Attributes, path: &[&str]) -> Option<&'a AttrValue> {
    let (first, rest) = path.split_first()?;
    let mut current = attributes.get(*first)?;
    for key in rest {
        current = current.as_map()?.get(*key)?;
    }
    Some(current)
}
