//! Typed attribute maps
//!
//! Entities, edges and episodes carry free-form attributes. At the storage
//! boundary they are a tagged union keyed by validated names, so the fixed
//! record fields can never be shadowed by user data.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};

/// Names reserved for the fixed record fields
pub const RESERVED_KEYS: &[&str] = &[
    "id",
    "name",
    "type",
    "from_id",
    "to_id",
    "created_at",
    "valid_at",
    "invalid_at",
    "invalidated_by",
    "confidence",
    "embedding",
];

/// A single attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    List(Vec<AttributeValue>),
    Map(BTreeMap<String, AttributeValue>),
}

impl AttributeValue {
    /// Borrow as text if this is a `Text` value
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Convert to a JSON value
    ///
    /// Timestamps become RFC 3339 strings.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Text(s) => Value::String(s.clone()),
            Self::Timestamp(t) => Value::String(t.to_rfc3339()),
            Self::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl TryFrom<serde_json::Value> for AttributeValue {
    type Error = MemoryError;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        use serde_json::Value;
        Ok(match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if n.is_u64() {
                    return Err(MemoryError::invalid_attribute(format!(
                        "integer {} does not fit in i64",
                        n
                    )));
                } else {
                    match n.as_f64() {
                        Some(f) => Self::Float(f),
                        None => {
                            return Err(MemoryError::invalid_attribute(format!(
                                "unrepresentable number {}",
                                n
                            )))
                        }
                    }
                }
            }
            Value::String(s) => Self::Text(s),
            Value::Array(items) => Self::List(
                items
                    .into_iter()
                    .map(Self::try_from)
                    .collect::<Result<Vec<_>>>()?,
            ),
            Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| Ok((k, Self::try_from(v)?)))
                    .collect::<Result<BTreeMap<_, _>>>()?,
            ),
        })
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for AttributeValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<DateTime<Utc>> for AttributeValue {
    fn from(t: DateTime<Utc>) -> Self {
        Self::Timestamp(t)
    }
}

/// How attributes from a new mention combine with stored ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Incoming values overwrite stored values of the same name
    #[default]
    PreferNew,
    /// Stored values win; incoming values only fill gaps
    PreferExisting,
}

/// Validated attribute map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attributes(BTreeMap<String, AttributeValue>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a key against the naming rules
    pub fn validate_key(key: &str) -> Result<()> {
        if key.trim().is_empty() {
            return Err(MemoryError::invalid_attribute("attribute name is empty"));
        }
        if RESERVED_KEYS.contains(&key) {
            return Err(MemoryError::invalid_attribute(format!(
                "'{}' is a reserved field name",
                key
            )));
        }
        Ok(())
    }

    /// Insert a value, rejecting reserved or empty keys
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Result<Option<AttributeValue>> {
        let key = key.into();
        Self::validate_key(&key)?;
        Ok(self.0.insert(key, value.into()))
    }

    /// Chaining variant of [`Attributes::insert`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Result<Self> {
        self.insert(key, value)?;
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.0.iter()
    }

    /// Fold `incoming` into `self` according to `policy`
    ///
    /// Keys absent from `incoming` are always preserved.
    pub fn merge(&mut self, incoming: &Attributes, policy: MergePolicy) {
        for (key, value) in incoming.iter() {
            match policy {
                MergePolicy::PreferNew => {
                    self.0.insert(key.clone(), value.clone());
                }
                MergePolicy::PreferExisting => {
                    self.0.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
        }
    }

    /// Build from a JSON object, validating every key
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Object(map) => {
                let mut attrs = Self::new();
                for (key, v) in map {
                    attrs.insert(key, AttributeValue::try_from(v)?)?;
                }
                Ok(attrs)
            }
            serde_json::Value::Null => Ok(Self::new()),
            other => Err(MemoryError::invalid_attribute(format!(
                "expected a JSON object, got {}",
                other
            ))),
        }
    }

    /// Render as a JSON object
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}
