//! The current remote campaign list.

use std::collections::HashMap;
use std::sync::Arc;

use campaign_core::{Campaign, CampaignId};
use parking_lot::RwLock;
use tracing::{info, warn};

/// Campaigns from the latest configuration refresh. A refresh replaces the
/// whole list; campaigns themselves are never mutated.
#[derive(Debug, Default)]
pub struct CampaignCatalog {
    campaigns: RwLock<HashMap<CampaignId, Arc<Campaign>>>,
}

impl CampaignCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the list and returns how many campaigns were kept. When an
    /// id appears twice the later entry wins.
    pub fn replace(&self, campaigns: Vec<Campaign>) -> usize {
        let received = campaigns.len();
        let mut next = HashMap::with_capacity(received);
        for campaign in campaigns {
            if let Some(previous) = next.insert(campaign.id.clone(), Arc::new(campaign)) {
                warn!(
                    campaign_id = %previous.id,
                    "Duplicate campaign id in refresh, keeping the later one"
                );
            }
        }
        let kept = next.len();
        *self.campaigns.write() = next;
        info!(received, kept, "Campaign list refreshed");
        kept
    }

    pub fn get(&self, id: &CampaignId) -> Option<Arc<Campaign>> {
        self.campaigns.read().get(id).cloned()
    }

    pub fn snapshot(&self) -> Vec<Arc<Campaign>> {
        self.campaigns.read().values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<CampaignId> {
        self.campaigns.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.campaigns.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.campaigns.read().is_empty()
    }
}
