//! Campaign trigger agent: turns recorded events into queued displays.

use std::sync::Arc;

use campaign_core::{Campaign, Event};
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::catalog::CampaignCatalog;
use crate::dispatcher::ReadyCampaignDispatcher;
use crate::matcher::{EventMatcher, MatcherError};
use crate::tooltip::{EventSink, TooltipHandle};
use crate::validator::CampaignsValidator;

/// What one trigger cycle did. Returned for logging and tests only; the
/// cycle itself never fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub candidates: usize,
    pub queued: usize,
    pub tooltips: usize,
}

pub struct CampaignTriggerAgent {
    catalog: Arc<CampaignCatalog>,
    validator: CampaignsValidator,
    matcher: Arc<EventMatcher>,
    dispatcher: Arc<ReadyCampaignDispatcher>,
    tooltips: TooltipHandle,
    cycle_lock: Mutex<()>,
}

impl CampaignTriggerAgent {
    pub fn new(
        catalog: Arc<CampaignCatalog>,
        validator: CampaignsValidator,
        matcher: Arc<EventMatcher>,
        dispatcher: Arc<ReadyCampaignDispatcher>,
        tooltips: TooltipHandle,
    ) -> Self {
        Self {
            catalog,
            validator,
            matcher,
            dispatcher,
            tooltips,
            cycle_lock: Mutex::new(()),
        }
    }

    /// Records the event, then runs a cycle.
    pub fn handle_event(&self, event: &Event) -> CycleSummary {
        if event.is_invalid() {
            debug!(name = %event.name, "Dropping invalid event");
            metrics::counter!("inapp.events.invalid").increment(1);
            return CycleSummary::default();
        }
        metrics::counter!("inapp.events.received").increment(1);
        self.matcher.match_and_store(event);
        self.validate_and_trigger_campaigns()
    }

    /// One serialized pass over the catalog: validate, match, route.
    /// Concurrent callers wait for the running cycle to finish.
    pub fn validate_and_trigger_campaigns(&self) -> CycleSummary {
        let _cycle = self.cycle_lock.lock();
        let cycle_id = Uuid::new_v4();

        let mut candidates = self.validator.validate(&self.catalog.snapshot(), Utc::now());
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));

        let mut summary = CycleSummary {
            candidates: candidates.len(),
            ..CycleSummary::default()
        };
        for campaign in candidates {
            // Matching consumes the event set, so leave it for a later cycle
            // when the display queue has no room.
            if !campaign.is_tooltip() && !self.dispatcher.can_accept(&campaign.id) {
                debug!(
                    %cycle_id,
                    campaign_id = %campaign.id,
                    "Display queue full, deferring campaign"
                );
                continue;
            }
            match self.matcher.matched_events(&campaign) {
                Ok(()) => self.route(campaign, &mut summary),
                Err(MatcherError::TriggersNotSatisfied(_)) => {}
                Err(err) => {
                    debug!(
                        %cycle_id,
                        campaign_id = %campaign.id,
                        error = %err,
                        "Campaign not triggered"
                    );
                }
            }
        }

        if summary.tooltips > 0 {
            self.tooltips.campaign_list_updated();
        }
        if summary.queued > 0 || summary.tooltips > 0 {
            info!(
                %cycle_id,
                candidates = summary.candidates,
                queued = summary.queued,
                tooltips = summary.tooltips,
                "Trigger cycle complete"
            );
        }
        summary
    }

    fn route(&self, campaign: Arc<Campaign>, summary: &mut CycleSummary) {
        metrics::counter!("inapp.campaigns.triggered").increment(1);
        if campaign.is_tooltip() {
            debug!(campaign_id = %campaign.id, "Tooltip triggered");
            self.tooltips.mark_needs_display(campaign);
            summary.tooltips += 1;
        } else if self.dispatcher.add_to_queue(campaign.id.clone()) {
            summary.queued += 1;
        }
    }
}

impl EventSink for CampaignTriggerAgent {
    fn deliver(&self, event: Event) {
        self.handle_event(&event);
    }
}
