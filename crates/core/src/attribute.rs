//! Typed, case-normalized attribute values attached to events and used by
//! trigger conditions.
//!
//! Names and string values are lowercased on construction *and* on
//! deserialization, so every comparison downstream is case-insensitive on
//! text while staying strict on the declared type.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single typed value. Equality is structural: the type tag takes part in
/// it, so `Bool(true)` never equals `String("true")`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "value",
    rename_all = "snake_case",
    from = "RawAttributeValue"
)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    /// Milliseconds since the Unix epoch.
    Time(i64),
    String(String),
}

#[derive(Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
enum RawAttributeValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    Time(i64),
    String(String),
}

impl From<RawAttributeValue> for AttributeValue {
    fn from(raw: RawAttributeValue) -> Self {
        match raw {
            RawAttributeValue::Bool(v) => Self::Bool(v),
            RawAttributeValue::Int(v) => Self::Int(v),
            RawAttributeValue::Double(v) => Self::Double(v),
            RawAttributeValue::Time(v) => Self::Time(v),
            RawAttributeValue::String(v) => Self::string(v),
        }
    }
}

/// Discriminant of an [`AttributeValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    Bool,
    Int,
    Double,
    Time,
    String,
}

impl AttributeValue {
    /// String value, lowercased.
    pub fn string(value: impl AsRef<str>) -> Self {
        Self::String(value.as_ref().to_lowercase())
    }

    pub fn time(at: DateTime<Utc>) -> Self {
        Self::Time(at.timestamp_millis())
    }

    pub fn value_type(&self) -> AttributeType {
        match self {
            Self::Bool(_) => AttributeType::Bool,
            Self::Int(_) => AttributeType::Int,
            Self::Double(_) => AttributeType::Double,
            Self::Time(_) => AttributeType::Time,
            Self::String(_) => AttributeType::String,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Double(_) | Self::Time(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Orders two values of the same numeric type. Mixed tags and
    /// non-numeric values have no ordering.
    pub fn numeric_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) | (Self::Time(a), Self::Time(b)) => Some(a.cmp(b)),
            (Self::Double(a), Self::Double(b)) => a.partial_cmp(b),
            _ => None,
        }
    }

    /// Infers a value from a bare JSON scalar. Integers become `Int`, other
    /// numbers `Double`; arrays, objects and null are rejected.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Double)),
            serde_json::Value::String(s) => Some(Self::string(s)),
            serde_json::Value::Object(_) => serde_json::from_value(value.clone()).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Time(v) => write!(f, "{v}ms"),
            Self::String(v) => write!(f, "{v:?}"),
        }
    }
}

/// A named attribute. Two attributes are equal iff name, type and value are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawAttribute")]
pub struct Attribute {
    pub name: String,
    pub value: AttributeValue,
}

#[derive(Deserialize)]
struct RawAttribute {
    name: String,
    value: AttributeValue,
}

impl From<RawAttribute> for Attribute {
    fn from(raw: RawAttribute) -> Self {
        Self::new(raw.name, raw.value)
    }
}

impl Attribute {
    pub fn new(name: impl AsRef<str>, value: AttributeValue) -> Self {
        Self {
            name: normalize_name(name.as_ref()),
            value,
        }
    }
}

pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Ordered set of attributes keyed by normalized name. Inserting an existing
/// name replaces its value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, AttributeValue>")]
pub struct Attributes(BTreeMap<String, AttributeValue>);

impl From<BTreeMap<String, AttributeValue>> for Attributes {
    fn from(raw: BTreeMap<String, AttributeValue>) -> Self {
        raw.into_iter().collect()
    }
}

impl FromIterator<(String, AttributeValue)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (String, AttributeValue)>>(iter: I) -> Self {
        let mut attrs = Self::default();
        for (name, value) in iter {
            attrs.insert(Attribute::new(name, value));
        }
        attrs
    }
}

impl FromIterator<Attribute> for Attributes {
    fn from_iter<I: IntoIterator<Item = Attribute>>(iter: I) -> Self {
        let mut attrs = Self::default();
        for attr in iter {
            attrs.insert(attr);
        }
        attrs
    }
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, attribute: Attribute) {
        self.0.insert(attribute.name, attribute.value);
    }

    /// Looks up by name; the name is normalized before lookup.
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.0.get(&normalize_name(name))
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
}
