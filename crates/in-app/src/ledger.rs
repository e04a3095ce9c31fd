//! Per-campaign display history consulted by the validator.

use campaign_core::CampaignId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Impression counts and opt-outs, kept for the lifetime of the process.
#[derive(Debug, Default)]
pub struct ImpressionLedger {
    impressions: DashMap<CampaignId, u32>,
    opted_out: DashMap<CampaignId, DateTime<Utc>>,
}

impl ImpressionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one display and returns the new total.
    pub fn record_impression(&self, campaign_id: &CampaignId) -> u32 {
        let mut count = self.impressions.entry(campaign_id.clone()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub fn impressions(&self, campaign_id: &CampaignId) -> u32 {
        self.impressions.get(campaign_id).map(|c| *c).unwrap_or(0)
    }

    pub fn record_opt_out(&self, campaign_id: &CampaignId) {
        self.opted_out
            .entry(campaign_id.clone())
            .or_insert_with(Utc::now);
    }

    pub fn is_opted_out(&self, campaign_id: &CampaignId) -> bool {
        self.opted_out.contains_key(campaign_id)
    }
}
