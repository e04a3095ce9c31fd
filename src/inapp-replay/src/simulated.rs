//! Stand-in host collaborators that log what the engine asks of them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use campaign_core::{Campaign, CampaignId};
use campaign_in_app::{
    BackendError, CampaignPresenter, DeliveryBackend, DisplayOutcome, ImpressionType,
    RolloutDecision, Surface, TooltipPresenter, ViewListener,
};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Default, Clone, Serialize)]
pub struct HostLog {
    pub displayed: Vec<CampaignId>,
    pub tooltips: Vec<(CampaignId, String)>,
    pub reports: BTreeMap<String, Vec<ImpressionType>>,
    pub pings: u32,
}

pub struct SimulatedHost {
    outcome: DisplayOutcome,
    display_time: Duration,
    rollout_enabled: bool,
    surfaces: Mutex<BTreeMap<String, bool>>,
    log: Mutex<HostLog>,
}

impl SimulatedHost {
    pub fn new(
        outcome: DisplayOutcome,
        display_time: Duration,
        rollout_enabled: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            display_time,
            rollout_enabled,
            surfaces: Mutex::new(BTreeMap::new()),
            log: Mutex::new(HostLog::default()),
        })
    }

    pub fn set_surface(&self, identifier: &str, visible: bool) -> Surface {
        self.surfaces.lock().insert(identifier.to_string(), visible);
        Surface {
            identifier: Some(identifier.to_string()),
            visible,
        }
    }

    pub fn log(&self) -> HostLog {
        self.log.lock().clone()
    }
}

#[async_trait]
impl DeliveryBackend for SimulatedHost {
    async fn ping(&self) -> Result<RolloutDecision, BackendError> {
        self.log.lock().pings += 1;
        Ok(RolloutDecision {
            enabled: self.rollout_enabled,
        })
    }

    async fn report_impression(
        &self,
        campaign_id: &CampaignId,
        impression_type: ImpressionType,
    ) -> Result<(), BackendError> {
        info!(campaign_id = %campaign_id, ?impression_type, "Impression reported");
        self.log
            .lock()
            .reports
            .entry(campaign_id.to_string())
            .or_default()
            .push(impression_type);
        Ok(())
    }
}

#[async_trait]
impl CampaignPresenter for SimulatedHost {
    async fn display(&self, campaign: Arc<Campaign>) -> DisplayOutcome {
        info!(campaign_id = %campaign.id, outcome = ?self.outcome, "Displaying");
        tokio::time::sleep(self.display_time).await;
        if self.outcome != DisplayOutcome::Failed {
            self.log.lock().displayed.push(campaign.id.clone());
        }
        self.outcome
    }
}

impl ViewListener for SimulatedHost {
    fn visible_surfaces(&self) -> Vec<Surface> {
        self.surfaces
            .lock()
            .iter()
            .filter(|(_, visible)| **visible)
            .map(|(id, _)| Surface::visible(id.clone()))
            .collect()
    }
}

impl TooltipPresenter for SimulatedHost {
    fn present(&self, campaign: &Campaign, surface: &Surface) {
        let target = surface.identifier.clone().unwrap_or_default();
        info!(campaign_id = %campaign.id, surface = %target, "Tooltip presented");
        self.log.lock().tooltips.push((campaign.id.clone(), target));
    }
}
