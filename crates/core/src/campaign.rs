//! Remotely configured campaigns and the triggers that make them eligible.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attribute::{normalize_name, AttributeValue, Attributes};
use crate::error::{CampaignError, CampaignResult};
use crate::event::{EventKey, EventType};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CampaignId(String);

impl CampaignId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CampaignId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Contains,
    StartsWith,
    IsSet,
    IsNotSet,
}

impl ConditionOperator {
    /// Evaluates `actual <op> expected`. A missing attribute only satisfies
    /// `IsNotSet`. Type mismatches are `false` for every operator except
    /// `NotEquals`, ordering needs the same numeric tag on both sides and the
    /// text operators need strings on both sides.
    pub fn evaluate(self, actual: Option<&AttributeValue>, expected: &AttributeValue) -> bool {
        use std::cmp::Ordering;

        let Some(actual) = actual else {
            return self == Self::IsNotSet;
        };
        match self {
            Self::Equals => actual == expected,
            Self::NotEquals => actual.value_type() == expected.value_type() && actual != expected,
            Self::GreaterThan => actual.numeric_cmp(expected) == Some(Ordering::Greater),
            Self::GreaterThanOrEqual => matches!(
                actual.numeric_cmp(expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::LessThan => actual.numeric_cmp(expected) == Some(Ordering::Less),
            Self::LessThanOrEqual => matches!(
                actual.numeric_cmp(expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Self::Contains => actual
                .as_str()
                .zip(expected.as_str())
                .is_some_and(|(a, e)| a.contains(e)),
            Self::StartsWith => actual
                .as_str()
                .zip(expected.as_str())
                .is_some_and(|(a, e)| a.starts_with(e)),
            Self::IsSet => true,
            Self::IsNotSet => false,
        }
    }
}

/// One attribute predicate of a trigger. The declared type is the type tag
/// of `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawCondition")]
pub struct AttributeCondition {
    pub name: String,
    pub operator: ConditionOperator,
    pub value: AttributeValue,
}

#[derive(Deserialize)]
struct RawCondition {
    name: String,
    operator: ConditionOperator,
    value: AttributeValue,
}

impl From<RawCondition> for AttributeCondition {
    fn from(raw: RawCondition) -> Self {
        Self::new(raw.name, raw.operator, raw.value)
    }
}

impl AttributeCondition {
    pub fn new(name: impl AsRef<str>, operator: ConditionOperator, value: AttributeValue) -> Self {
        Self {
            name: normalize_name(name.as_ref()),
            operator,
            value,
        }
    }

    pub fn evaluate(&self, attributes: Option<&Attributes>) -> bool {
        let actual = attributes.and_then(|attrs| attrs.get(&self.name));
        self.operator.evaluate(actual, &self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawTrigger")]
pub struct Trigger {
    pub event_type: EventType,
    pub event_name: String,
    pub conditions: Vec<AttributeCondition>,
}

#[derive(Deserialize)]
struct RawTrigger {
    event_type: EventType,
    #[serde(default)]
    event_name: String,
    #[serde(default)]
    conditions: Vec<AttributeCondition>,
}

impl From<RawTrigger> for Trigger {
    fn from(raw: RawTrigger) -> Self {
        Self {
            event_type: raw.event_type,
            event_name: normalize_name(&raw.event_name),
            conditions: raw.conditions,
        }
    }
}

impl Trigger {
    pub fn new(event_type: EventType, event_name: impl AsRef<str>) -> Self {
        Self {
            event_type,
            event_name: normalize_name(event_name.as_ref()),
            conditions: Vec::new(),
        }
    }

    pub fn with_condition(mut self, condition: AttributeCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn event_key(&self) -> EventKey {
        EventKey {
            event_type: self.event_type,
            name: self.event_name.clone(),
        }
    }

    /// True iff every condition holds against `attributes`. Triggers on
    /// `Invalid` events are never satisfied.
    pub fn conditions_hold(&self, attributes: Option<&Attributes>) -> bool {
        self.event_type != EventType::Invalid
            && self.conditions.iter().all(|c| c.evaluate(attributes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CampaignKind {
    Regular,
    Tooltip {
        /// Identifier of the surface the tooltip anchors to.
        target_view: String,
        /// May be marked for display again after dismissal.
        #[serde(default)]
        repeatable: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayRules {
    #[serde(default)]
    pub max_impressions: Option<u32>,
    #[serde(default)]
    pub opt_out_capable: bool,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    /// Ping the backend for a rollout decision before displaying.
    #[serde(default = "default_confirm_before_display")]
    pub confirm_before_display: bool,
}

fn default_confirm_before_display() -> bool {
    true
}

impl Default for DisplayRules {
    fn default() -> Self {
        Self {
            max_impressions: None,
            opt_out_capable: false,
            starts_at: None,
            ends_at: None,
            confirm_before_display: default_confirm_before_display(),
        }
    }
}

impl DisplayRules {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.starts_at.map_or(true, |start| now >= start)
            && self.ends_at.map_or(true, |end| now < end)
    }
}

/// A campaign as delivered by the remote configuration. Immutable once
/// fetched; identity is `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    #[serde(default)]
    pub priority: u8,
    pub triggers: Vec<Trigger>,
    pub kind: CampaignKind,
    #[serde(default)]
    pub rules: DisplayRules,
    #[serde(default)]
    pub content: serde_json::Value,
}

impl Campaign {
    pub fn regular(id: impl Into<String>, triggers: Vec<Trigger>) -> Self {
        Self {
            id: CampaignId::new(id),
            priority: 0,
            triggers,
            kind: CampaignKind::Regular,
            rules: DisplayRules::default(),
            content: serde_json::json!({}),
        }
    }

    pub fn tooltip(
        id: impl Into<String>,
        target_view: impl Into<String>,
        triggers: Vec<Trigger>,
    ) -> Self {
        Self {
            kind: CampaignKind::Tooltip {
                target_view: target_view.into(),
                repeatable: false,
            },
            ..Self::regular(id, triggers)
        }
    }

    pub fn is_tooltip(&self) -> bool {
        matches!(self.kind, CampaignKind::Tooltip { .. })
    }

    pub fn tooltip_target(&self) -> Option<&str> {
        match &self.kind {
            CampaignKind::Tooltip { target_view, .. } => Some(target_view),
            CampaignKind::Regular => None,
        }
    }

    /// Structural checks on the fetched payload.
    pub fn check_well_formed(&self) -> CampaignResult<()> {
        if self.id.as_str().trim().is_empty() {
            return Err(CampaignError::InvalidCampaign("empty campaign id".into()));
        }
        if self.triggers.is_empty() {
            return Err(CampaignError::InvalidCampaign(format!(
                "campaign {} has no triggers",
                self.id
            )));
        }
        if self.content.is_null() {
            return Err(CampaignError::InvalidCampaign(format!(
                "campaign {} has no content",
                self.id
            )));
        }
        if self.tooltip_target().is_some_and(|t| t.trim().is_empty()) {
            return Err(CampaignError::InvalidCampaign(format!(
                "tooltip {} has an empty target view",
                self.id
            )));
        }
        if let (Some(start), Some(end)) = (self.rules.starts_at, self.rules.ends_at) {
            if start > end {
                return Err(CampaignError::InvalidCampaign(format!(
                    "campaign {} window starts after it ends",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

/// Reads a JSON array of campaigns, as served by the remote configuration.
pub fn load_campaigns(path: &Path) -> CampaignResult<Vec<Campaign>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}
