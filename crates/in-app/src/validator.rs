//! Display-eligibility filtering. No event matching happens here.

use std::fmt;
use std::sync::Arc;

use campaign_core::Campaign;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::ledger::ImpressionLedger;

/// Why a campaign was filtered out. Not an error: the campaign is simply
/// not a candidate this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Malformed(String),
    OutsideWindow,
    ImpressionCapReached { shown: u32, max: u32 },
    OptedOut,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(reason) => write!(f, "malformed: {reason}"),
            Self::OutsideWindow => f.write_str("outside active window"),
            Self::ImpressionCapReached { shown, max } => {
                write!(f, "impression cap reached ({shown}/{max})")
            }
            Self::OptedOut => f.write_str("user opted out"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CampaignsValidator {
    ledger: Arc<ImpressionLedger>,
}

impl CampaignsValidator {
    pub fn new(ledger: Arc<ImpressionLedger>) -> Self {
        Self { ledger }
    }

    /// Keeps the candidates that pass every eligibility rule at `now`.
    pub fn validate(&self, candidates: &[Arc<Campaign>], now: DateTime<Utc>) -> Vec<Arc<Campaign>> {
        candidates
            .iter()
            .filter(|campaign| match self.check(campaign, now) {
                Ok(()) => true,
                Err(rejection) => {
                    debug!(campaign_id = %campaign.id, %rejection, "Campaign not eligible");
                    false
                }
            })
            .cloned()
            .collect()
    }

    pub fn check(&self, campaign: &Campaign, now: DateTime<Utc>) -> Result<(), Rejection> {
        campaign
            .check_well_formed()
            .map_err(|e| Rejection::Malformed(e.to_string()))?;

        if !campaign.rules.is_active_at(now) {
            return Err(Rejection::OutsideWindow);
        }

        if let Some(max) = campaign.rules.max_impressions {
            let shown = self.ledger.impressions(&campaign.id);
            if shown >= max {
                return Err(Rejection::ImpressionCapReached { shown, max });
            }
        }

        if self.ledger.is_opted_out(&campaign.id) {
            return Err(Rejection::OptedOut);
        }

        Ok(())
    }
}
