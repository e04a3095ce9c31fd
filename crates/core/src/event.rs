//! Analytics-like events submitted by the host application.

use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::attribute::{normalize_name, Attribute, AttributeValue, Attributes};

/// Name of the attribute carried by `viewAppeared` events.
pub const VIEW_IDENTIFIER_ATTRIBUTE: &str = "viewIdentifier";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    AppStart,
    LoginSuccessful,
    PurchaseSuccessful,
    Custom,
    ViewAppeared,
    /// Unrecognized or unparsable payload. Never matches a trigger.
    Invalid,
}

impl EventType {
    /// Lenient parse: case, `_` and `-` are ignored. Anything unknown is
    /// `Invalid`.
    pub fn parse(raw: &str) -> Self {
        let folded: String = raw
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        match folded.as_str() {
            "appstart" => Self::AppStart,
            "loginsuccessful" => Self::LoginSuccessful,
            "purchasesuccessful" => Self::PurchaseSuccessful,
            "custom" => Self::Custom,
            "viewappeared" => Self::ViewAppeared,
            _ => Self::Invalid,
        }
    }
}

/// Identity of an event: its type and normalized name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventKey {
    pub event_type: EventType,
    pub name: String,
}

impl EventKey {
    pub fn new(event_type: EventType, name: impl AsRef<str>) -> Self {
        Self {
            event_type,
            name: normalize_name(name.as_ref()),
        }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.event_type, self.name)
    }
}

/// An event. Equality and hashing use only `(event_type, name)`; attribute
/// values are consulted during matching but are not part of identity.
///
/// Inbound JSON goes through [`Event::from_payload`] so that normalization
/// always applies.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub event_type: EventType,
    pub name: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    attributes: Option<Attributes>,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.event_type == other.event_type && self.name == other.name
    }
}

impl Eq for Event {}

impl Hash for Event {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.event_type.hash(state);
        self.name.hash(state);
    }
}

impl Event {
    /// Base event without custom attributes, stamped with the current time.
    pub fn new(event_type: EventType, name: impl AsRef<str>) -> Self {
        Self {
            event_type,
            name: normalize_name(name.as_ref()),
            timestamp: Utc::now().timestamp_millis(),
            attributes: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Attaches custom attributes. An empty set is kept as `Some(empty)`.
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = Some(attributes);
        self
    }

    pub fn with_attribute(mut self, name: &str, value: AttributeValue) -> Self {
        self.attributes
            .get_or_insert_with(Attributes::new)
            .insert(Attribute::new(name, value));
        self
    }

    pub fn invalid(name: impl AsRef<str>) -> Self {
        Self::new(EventType::Invalid, name)
    }

    /// `viewAppeared` event for a surface, named after the surface and
    /// carrying its identifier as `viewIdentifier`.
    pub fn view_appeared(view_identifier: &str) -> Self {
        Self::new(EventType::ViewAppeared, view_identifier).with_attribute(
            VIEW_IDENTIFIER_ATTRIBUTE,
            AttributeValue::string(view_identifier),
        )
    }

    pub fn key(&self) -> EventKey {
        EventKey {
            event_type: self.event_type,
            name: self.name.clone(),
        }
    }

    pub fn is_invalid(&self) -> bool {
        self.event_type == EventType::Invalid
    }

    /// `None` for a base event, `Some` (possibly empty) once custom
    /// attributes were attached.
    pub fn attribute_map(&self) -> Option<&Attributes> {
        self.attributes.as_ref()
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.as_ref().and_then(|attrs| attrs.get(name))
    }

    /// Parses an inbound payload of the form
    /// `{"type": "custom", "name": "...", "timestamp": 123, "attributes": {...}}`.
    ///
    /// Never fails: a payload that cannot be understood becomes an
    /// `Invalid` event. Attribute values may be bare JSON scalars or tagged
    /// `{"type": "time", "value": ...}` objects; unusable values are skipped.
    pub fn from_payload(payload: &serde_json::Value) -> Self {
        let Some(obj) = payload.as_object() else {
            return Self::invalid("");
        };
        let name = obj.get("name").and_then(|v| v.as_str()).unwrap_or_default();
        let event_type = obj
            .get("type")
            .and_then(|v| v.as_str())
            .map(EventType::parse)
            .unwrap_or(EventType::Invalid);
        if name.trim().is_empty() && event_type != EventType::AppStart {
            return Self::invalid(name);
        }

        let mut event = Self::new(event_type, name);
        if let Some(ts) = obj.get("timestamp").and_then(|v| v.as_i64()) {
            event.timestamp = ts;
        }
        match obj.get("attributes") {
            Some(serde_json::Value::Object(raw)) => {
                let attributes = raw
                    .iter()
                    .filter_map(|(k, v)| AttributeValue::from_json(v).map(|v| (k.clone(), v)))
                    .collect();
                event.attributes = Some(attributes);
            }
            Some(serde_json::Value::Null) | None => {}
            Some(_) => return Self::invalid(name),
        }
        event
    }
}
