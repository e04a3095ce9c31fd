//! Shared model for the in-app campaign engine: typed attributes, events,
//! triggers, campaigns, configuration and the common error type.

pub mod attribute;
pub mod campaign;
pub mod config;
pub mod error;
pub mod event;

pub use attribute::{Attribute, AttributeType, AttributeValue, Attributes};
pub use campaign::{
    AttributeCondition, Campaign, CampaignId, CampaignKind, ConditionOperator, DisplayRules,
    Trigger,
};
pub use config::EngineConfig;
pub use error::{CampaignError, CampaignResult};
pub use event::{Event, EventKey, EventType};
