//! The owning context. Built once per session and handed to UI callbacks;
//! every component reaches its collaborators through it.

use std::collections::HashSet;
use std::sync::Arc;

use campaign_core::config::EngineConfig;
use campaign_core::{Campaign, CampaignId, Event};
use tracing::info;

use crate::agent::{CampaignTriggerAgent, CycleSummary};
use crate::backend::{DeliveryBackend, ImpressionType};
use crate::catalog::CampaignCatalog;
use crate::dispatcher::{DispatchQueueEntry, ReadyCampaignDispatcher};
use crate::ledger::ImpressionLedger;
use crate::matcher::EventMatcher;
use crate::presenter::{
    CampaignPresenter, Surface, SurfaceChange, TooltipPresenter, ViewListener,
};
use crate::tooltip::{TooltipCommand, TooltipDispatcher, TooltipHandle, TooltipManager};
use crate::validator::CampaignsValidator;

/// Host-provided implementations of the engine's outbound interfaces.
#[derive(Clone)]
pub struct Collaborators {
    pub backend: Arc<dyn DeliveryBackend>,
    pub presenter: Arc<dyn CampaignPresenter>,
    pub view_listener: Arc<dyn ViewListener>,
    pub tooltip_presenter: Arc<dyn TooltipPresenter>,
}

pub struct InAppContext {
    catalog: Arc<CampaignCatalog>,
    ledger: Arc<ImpressionLedger>,
    matcher: Arc<EventMatcher>,
    agent: Arc<CampaignTriggerAgent>,
    dispatcher: Arc<ReadyCampaignDispatcher>,
    tooltips: TooltipHandle,
    tooltip_manager: TooltipManager,
}

impl InAppContext {
    /// Wires every component and starts the background tasks. Must be
    /// called inside a Tokio runtime.
    pub fn new(config: &EngineConfig, collaborators: Collaborators) -> Self {
        let catalog = Arc::new(CampaignCatalog::new());
        let ledger = Arc::new(ImpressionLedger::new());
        let matcher = Arc::new(EventMatcher::new());

        let dispatcher = Arc::new(ReadyCampaignDispatcher::new(
            config,
            catalog.clone(),
            ledger.clone(),
            collaborators.backend,
            collaborators.presenter,
        ));

        let (tooltips, inbox) = TooltipManager::channel();
        let agent = Arc::new(CampaignTriggerAgent::new(
            catalog.clone(),
            CampaignsValidator::new(ledger.clone()),
            matcher.clone(),
            dispatcher.clone(),
            tooltips.clone(),
        ));
        let tooltip_manager = TooltipManager::spawn(
            TooltipDispatcher::new(
                collaborators.view_listener,
                collaborators.tooltip_presenter,
                ledger.clone(),
            ),
            inbox,
            agent.clone(),
        );
        dispatcher.start();

        info!(
            queue_capacity = config.dispatcher.queue_capacity,
            max_attempts = config.backoff.max_attempts,
            "In-app engine initialized"
        );

        Self {
            catalog,
            ledger,
            matcher,
            agent,
            dispatcher,
            tooltips,
            tooltip_manager,
        }
    }

    /// Records an event and runs a trigger cycle on the calling thread.
    /// Never fails; invalid events are dropped.
    pub fn submit_event(&self, event: Event) -> CycleSummary {
        self.agent.handle_event(&event)
    }

    /// Like [`submit_event`](Self::submit_event) for a raw JSON payload.
    pub fn submit_payload(&self, payload: &serde_json::Value) -> CycleSummary {
        self.submit_event(Event::from_payload(payload))
    }

    /// Installs a new campaign list, drops waiting tooltips that left it,
    /// then re-evaluates against the events recorded so far.
    pub fn refresh_campaigns(&self, campaigns: Vec<Campaign>) -> CycleSummary {
        self.catalog.replace(campaigns);
        let ids: HashSet<CampaignId> = self.catalog.ids().into_iter().collect();
        self.tooltips.send(TooltipCommand::RetainCampaigns(ids));
        let summary = self.agent.validate_and_trigger_campaigns();
        self.tooltips.campaign_list_updated();
        summary
    }

    pub fn view_did_change_superview(&self, surface: Surface) {
        self.tooltips.surface_changed(surface, SurfaceChange::Superview);
    }

    pub fn view_did_move_to_window(&self, surface: Surface) {
        self.tooltips.surface_changed(surface, SurfaceChange::Window);
    }

    pub fn view_did_update_identifier(&self, surface: Surface) {
        self.tooltips.surface_changed(surface, SurfaceChange::Identifier);
    }

    /// Reports a click or opt-out coming from the UI.
    pub fn report_interaction(
        &self,
        campaign_id: CampaignId,
        impression_type: ImpressionType,
    ) -> bool {
        self.dispatcher.report_interaction(campaign_id, impression_type)
    }

    /// Makes a dismissed repeatable tooltip eligible for its surface again.
    pub fn requeue_tooltip(&self, campaign_id: &CampaignId) -> bool {
        match self.catalog.get(campaign_id) {
            Some(campaign) if campaign.is_tooltip() => {
                self.tooltips.send(TooltipCommand::Requeue(campaign));
                self.tooltips.campaign_list_updated();
                true
            }
            _ => false,
        }
    }

    /// Forgets every recorded event, e.g. on logout. Impressions and
    /// opt-outs are kept.
    pub fn reset_events(&self) {
        self.matcher.reset();
        info!("Recorded events cleared");
    }

    pub async fn pending_tooltips(&self) -> Vec<CampaignId> {
        self.tooltips.pending().await
    }

    pub fn queued_campaigns(&self) -> Vec<DispatchQueueEntry> {
        self.dispatcher.queued()
    }

    pub fn catalog(&self) -> &CampaignCatalog {
        &self.catalog
    }

    pub fn ledger(&self) -> &ImpressionLedger {
        &self.ledger
    }

    pub fn dispatcher(&self) -> &ReadyCampaignDispatcher {
        &self.dispatcher
    }

    /// Stops background work. Queued campaigns are discarded.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
        self.tooltip_manager.shutdown();
    }
}

impl Drop for InAppContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
