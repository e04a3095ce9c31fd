//! Outbound network contract: rollout ping and impression reporting.
//!
//! Transport (TLS, wire format) lives in the host application; the engine
//! only sees the classified outcome of each call.

use async_trait::async_trait;
use campaign_core::CampaignId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("request timed out")]
    Timeout,

    #[error("server error (HTTP {0})")]
    Server(u16),

    #[error("too many requests (HTTP 429)")]
    TooManyRequests,

    #[error("request rejected (HTTP {0})")]
    Client(u16),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl BackendError {
    /// Classifies an HTTP status. `None` for success codes.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            429 => Some(Self::TooManyRequests),
            500..=599 => Some(Self::Server(status)),
            _ => Some(Self::Client(status)),
        }
    }

    /// Timeouts, 5xx and 429 are transient; everything else is fatal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Server(_) | Self::TooManyRequests)
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::TooManyRequests)
    }
}

/// Response of the eligibility ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutDecision {
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpressionType {
    Impression,
    Exit,
    ClickContent,
    OptOut,
}

#[async_trait]
pub trait DeliveryBackend: Send + Sync {
    async fn ping(&self) -> Result<RolloutDecision, BackendError>;

    async fn report_impression(
        &self,
        campaign_id: &CampaignId,
        impression_type: ImpressionType,
    ) -> Result<(), BackendError>;
}
