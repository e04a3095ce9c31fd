//! Tooltip delivery. A tooltip waits in the needs-display set until its
//! target surface is visible, then is presented once and announced with a
//! `viewAppeared` event. A presented tooltip is not marked again until it is
//! explicitly requeued.
//!
//! [`TooltipDispatcher`] is plain synchronous state. [`TooltipManager`] owns
//! it inside one task and accepts commands over a channel, so surface
//! callbacks from any thread are applied in arrival order. Emitted events go
//! to an [`EventSink`], normally the trigger agent.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use campaign_core::{Campaign, CampaignId, CampaignKind, Event};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ledger::ImpressionLedger;
use crate::presenter::{Surface, SurfaceChange, TooltipPresenter, ViewListener};

pub struct TooltipDispatcher {
    needs_display: BTreeMap<CampaignId, Arc<Campaign>>,
    presented: HashSet<CampaignId>,
    view_listener: Arc<dyn ViewListener>,
    presenter: Arc<dyn TooltipPresenter>,
    ledger: Arc<ImpressionLedger>,
}

impl TooltipDispatcher {
    pub fn new(
        view_listener: Arc<dyn ViewListener>,
        presenter: Arc<dyn TooltipPresenter>,
        ledger: Arc<ImpressionLedger>,
    ) -> Self {
        Self {
            needs_display: BTreeMap::new(),
            presented: HashSet::new(),
            view_listener,
            presenter,
            ledger,
        }
    }

    /// Adds a tooltip campaign to the needs-display set. Regular campaigns,
    /// ids already waiting and tooltips presented since their last requeue
    /// are ignored.
    pub fn mark_needs_display(&mut self, campaign: Arc<Campaign>) -> bool {
        if !campaign.is_tooltip() || self.needs_display.contains_key(&campaign.id) {
            return false;
        }
        if self.presented.contains(&campaign.id) {
            debug!(campaign_id = %campaign.id, "Tooltip already presented, not marked again");
            return false;
        }
        debug!(
            campaign_id = %campaign.id,
            target = ?campaign.tooltip_target(),
            "Tooltip needs display"
        );
        self.needs_display.insert(campaign.id.clone(), campaign);
        true
    }

    /// Puts a presented tooltip back, if it is marked repeatable.
    pub fn requeue(&mut self, campaign: Arc<Campaign>) -> bool {
        match campaign.kind {
            CampaignKind::Tooltip {
                repeatable: true, ..
            } => {
                self.presented.remove(&campaign.id);
                self.mark_needs_display(campaign)
            }
            _ => {
                debug!(campaign_id = %campaign.id, "Tooltip is not repeatable, not requeued");
                false
            }
        }
    }

    /// Forgets waiting tooltips that are no longer in the campaign list.
    pub fn retain_campaigns(&mut self, ids: &HashSet<CampaignId>) {
        let before = self.needs_display.len();
        self.needs_display.retain(|id, _| ids.contains(id));
        let removed = before - self.needs_display.len();
        if removed > 0 {
            debug!(removed, "Dropped tooltips missing from the refreshed list");
        }
    }

    /// Scans every visible surface reported by the view listener.
    pub fn did_update_campaign_list(&mut self) -> Vec<Event> {
        if self.needs_display.is_empty() {
            return Vec::new();
        }
        self.view_listener
            .visible_surfaces()
            .iter()
            .filter_map(|surface| self.present_on(surface))
            .collect()
    }

    /// Checks a single surface after one of its lifecycle callbacks.
    pub fn surface_changed(&mut self, surface: &Surface) -> Option<Event> {
        self.present_on(surface)
    }

    pub fn pending(&self) -> Vec<CampaignId> {
        self.needs_display.keys().cloned().collect()
    }

    /// Presents the highest-priority tooltip targeting `surface`, lowest id
    /// on ties. At most one tooltip per surface per call.
    fn present_on(&mut self, surface: &Surface) -> Option<Event> {
        let identifier = surface.visible_identifier()?;
        let campaign_id = self
            .needs_display
            .values()
            .filter(|c| {
                c.tooltip_target()
                    .is_some_and(|target| target.eq_ignore_ascii_case(identifier))
            })
            .fold(None::<&Arc<Campaign>>, |best, c| match best {
                Some(b) if b.priority >= c.priority => Some(b),
                _ => Some(c),
            })?
            .id
            .clone();
        let campaign = self.needs_display.remove(&campaign_id)?;

        let impressions = self.ledger.record_impression(&campaign.id);
        self.presented.insert(campaign.id.clone());
        info!(
            campaign_id = %campaign.id,
            surface = identifier,
            impressions,
            "Presenting tooltip"
        );
        metrics::counter!("inapp.tooltip.presented").increment(1);
        self.presenter.present(&campaign, surface);
        Some(Event::view_appeared(identifier))
    }
}

#[derive(Debug)]
pub enum TooltipCommand {
    MarkNeedsDisplay(Arc<Campaign>),
    Requeue(Arc<Campaign>),
    RetainCampaigns(HashSet<CampaignId>),
    CampaignListUpdated,
    SurfaceChanged(Surface, SurfaceChange),
    Pending(oneshot::Sender<Vec<CampaignId>>),
}

/// Cloneable sender side of the tooltip actor. Sends never block; commands
/// sent after the actor stopped are dropped.
#[derive(Debug, Clone)]
pub struct TooltipHandle {
    commands: mpsc::UnboundedSender<TooltipCommand>,
}

impl TooltipHandle {
    pub fn send(&self, command: TooltipCommand) {
        if self.commands.send(command).is_err() {
            debug!("Tooltip manager stopped, command dropped");
        }
    }

    pub fn mark_needs_display(&self, campaign: Arc<Campaign>) {
        self.send(TooltipCommand::MarkNeedsDisplay(campaign));
    }

    pub fn campaign_list_updated(&self) {
        self.send(TooltipCommand::CampaignListUpdated);
    }

    pub fn surface_changed(&self, surface: Surface, change: SurfaceChange) {
        self.send(TooltipCommand::SurfaceChanged(surface, change));
    }

    /// Ids waiting for their surface. Answered after every command sent
    /// before it, so it doubles as a barrier.
    pub async fn pending(&self) -> Vec<CampaignId> {
        let (tx, rx) = oneshot::channel();
        self.send(TooltipCommand::Pending(tx));
        rx.await.unwrap_or_default()
    }
}

/// Receives the `viewAppeared` events a tooltip presentation emits.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: Event);
}

impl EventSink for mpsc::UnboundedSender<Event> {
    fn deliver(&self, event: Event) {
        if self.send(event).is_err() {
            warn!("Event receiver closed, viewAppeared event lost");
        }
    }
}

/// Receiving side of the command channel, handed to [`TooltipManager::spawn`].
pub struct TooltipInbox(mpsc::UnboundedReceiver<TooltipCommand>);

pub struct TooltipManager {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TooltipManager {
    /// Creates the command channel. The handle can be given to producers
    /// before the actor exists.
    pub fn channel() -> (TooltipHandle, TooltipInbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TooltipHandle { commands: tx }, TooltipInbox(rx))
    }

    /// Moves `dispatcher` into a new task that drains `inbox`. Every emitted
    /// event is delivered to `sink` before the next command is read.
    pub fn spawn(
        dispatcher: TooltipDispatcher,
        inbox: TooltipInbox,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let task = tokio::spawn(run(dispatcher, inbox.0, sink));
        Self {
            task: Mutex::new(Some(task)),
        }
    }

    pub fn shutdown(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            info!("Tooltip manager stopped");
        }
    }
}

async fn run(
    mut dispatcher: TooltipDispatcher,
    mut commands: mpsc::UnboundedReceiver<TooltipCommand>,
    sink: Arc<dyn EventSink>,
) {
    while let Some(command) = commands.recv().await {
        let emitted = match command {
            TooltipCommand::MarkNeedsDisplay(campaign) => {
                dispatcher.mark_needs_display(campaign);
                Vec::new()
            }
            TooltipCommand::Requeue(campaign) => {
                dispatcher.requeue(campaign);
                Vec::new()
            }
            TooltipCommand::RetainCampaigns(ids) => {
                dispatcher.retain_campaigns(&ids);
                Vec::new()
            }
            TooltipCommand::CampaignListUpdated => dispatcher.did_update_campaign_list(),
            TooltipCommand::SurfaceChanged(surface, change) => {
                debug!(surface = ?surface.identifier, ?change, "Surface changed");
                dispatcher.surface_changed(&surface).into_iter().collect()
            }
            TooltipCommand::Pending(reply) => {
                let _ = reply.send(dispatcher.pending());
                Vec::new()
            }
        };
        for event in emitted {
            sink.deliver(event);
        }
    }
    debug!("Tooltip manager exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_core::event::VIEW_IDENTIFIER_ATTRIBUTE;
    use campaign_core::{AttributeValue, EventType, Trigger};

    struct FixedSurfaces(Vec<Surface>);

    impl ViewListener for FixedSurfaces {
        fn visible_surfaces(&self) -> Vec<Surface> {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct RecordingTooltips(Mutex<Vec<(CampaignId, Option<String>)>>);

    impl TooltipPresenter for RecordingTooltips {
        fn present(&self, campaign: &Campaign, surface: &Surface) {
            self.0.lock().push((campaign.id.clone(), surface.identifier.clone()));
        }
    }

    fn tooltip(id: &str, target: &str) -> Arc<Campaign> {
        Arc::new(Campaign::tooltip(id, target, vec![Trigger::new(EventType::AppStart, "")]))
    }

    fn dispatcher(
        surfaces: Vec<Surface>,
    ) -> (TooltipDispatcher, Arc<RecordingTooltips>, Arc<ImpressionLedger>) {
        let presenter = Arc::new(RecordingTooltips::default());
        let ledger = Arc::new(ImpressionLedger::new());
        (
            TooltipDispatcher::new(
                Arc::new(FixedSurfaces(surfaces)),
                presenter.clone(),
                ledger.clone(),
            ),
            presenter,
            ledger,
        )
    }

    fn repeatable_tooltip(id: &str, target: &str) -> Arc<Campaign> {
        let mut campaign =
            Campaign::tooltip(id, target, vec![Trigger::new(EventType::AppStart, "")]);
        campaign.kind = CampaignKind::Tooltip {
            target_view: target.into(),
            repeatable: true,
        };
        Arc::new(campaign)
    }

    #[test]
    fn test_targets_only_matching_surface() {
        let (mut d, presenter, _) = dispatcher(vec![Surface::visible("A"), Surface::visible("B")]);
        d.mark_needs_display(tooltip("tip", "A"));

        let events = d.did_update_campaign_list();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::ViewAppeared);
        assert_eq!(
            events[0].attribute(VIEW_IDENTIFIER_ATTRIBUTE),
            Some(&AttributeValue::string("A"))
        );
        assert_eq!(
            presenter.0.lock().as_slice(),
            &[(CampaignId::from("tip"), Some("A".to_string()))]
        );
        assert!(d.pending().is_empty());

        // Presented once; a second scan finds nothing.
        assert!(d.did_update_campaign_list().is_empty());
    }

    #[test]
    fn test_hidden_and_unnamed_surfaces_are_skipped() {
        let (mut d, _, _) = dispatcher(vec![
            Surface::hidden("A"),
            Surface {
                identifier: None,
                visible: true,
            },
        ]);
        d.mark_needs_display(tooltip("tip", "A"));
        assert!(d.did_update_campaign_list().is_empty());
        assert_eq!(d.pending(), vec![CampaignId::from("tip")]);
    }

    #[test]
    fn test_surface_changed_checks_only_that_surface() {
        let (mut d, _, _) = dispatcher(vec![]);
        d.mark_needs_display(tooltip("tip-a", "A"));
        d.mark_needs_display(tooltip("tip-b", "B"));

        let event = d.surface_changed(&Surface::visible("b")).map(|e| e.name);
        assert_eq!(event.as_deref(), Some("b"));
        assert_eq!(d.pending(), vec![CampaignId::from("tip-a")]);
    }

    #[test]
    fn test_one_tooltip_per_surface_by_priority() {
        let (mut d, presenter, _) = dispatcher(vec![Surface::visible("A")]);
        let mut high =
            Campaign::tooltip("high", "A", vec![Trigger::new(EventType::AppStart, "")]);
        high.priority = 9;
        d.mark_needs_display(tooltip("low", "A"));
        d.mark_needs_display(Arc::new(high));

        assert_eq!(d.did_update_campaign_list().len(), 1);
        assert_eq!(presenter.0.lock()[0].0, CampaignId::from("high"));
        assert_eq!(d.pending(), vec![CampaignId::from("low")]);
    }

    #[test]
    fn test_requeue_only_repeatable() {
        let (mut d, _, _) = dispatcher(vec![]);
        assert!(!d.requeue(tooltip("once", "A")));

        assert!(d.requeue(repeatable_tooltip("again", "A")));
        assert_eq!(d.pending(), vec![CampaignId::from("again")]);
    }

    #[test]
    fn test_presented_tooltip_is_recorded_and_not_marked_again() {
        let (mut d, presenter, ledger) = dispatcher(vec![Surface::visible("A")]);
        let once = tooltip("once", "A");

        assert!(d.mark_needs_display(once.clone()));
        assert_eq!(d.did_update_campaign_list().len(), 1);
        assert_eq!(ledger.impressions(&once.id), 1);

        // A fresh trigger match does not bring it back.
        assert!(!d.mark_needs_display(once.clone()));
        assert!(d.did_update_campaign_list().is_empty());
        assert!(!d.requeue(once.clone()));
        assert_eq!(presenter.0.lock().len(), 1);
        assert_eq!(ledger.impressions(&once.id), 1);
    }

    #[test]
    fn test_requeued_repeatable_tooltip_is_presented_again() {
        let (mut d, presenter, ledger) = dispatcher(vec![Surface::visible("A")]);
        let again = repeatable_tooltip("again", "A");

        d.mark_needs_display(again.clone());
        assert_eq!(d.did_update_campaign_list().len(), 1);
        assert!(!d.mark_needs_display(again.clone()));

        assert!(d.requeue(again.clone()));
        assert_eq!(d.did_update_campaign_list().len(), 1);
        assert_eq!(presenter.0.lock().len(), 2);
        assert_eq!(ledger.impressions(&again.id), 2);
    }

    #[test]
    fn test_regular_campaigns_are_not_marked() {
        let (mut d, _, _) = dispatcher(vec![]);
        let regular = Arc::new(Campaign::regular(
            "r",
            vec![Trigger::new(EventType::AppStart, "")],
        ));
        assert!(!d.mark_needs_display(regular));
        assert!(d.pending().is_empty());
    }

    #[test]
    fn test_retain_campaigns() {
        let (mut d, _, _) = dispatcher(vec![]);
        d.mark_needs_display(tooltip("keep", "A"));
        d.mark_needs_display(tooltip("drop", "B"));
        d.retain_campaigns(&HashSet::from([CampaignId::from("keep")]));
        assert_eq!(d.pending(), vec![CampaignId::from("keep")]);
    }

    #[tokio::test]
    async fn test_manager_forwards_view_appeared_events() {
        let (d, _, _) = dispatcher(vec![Surface::visible("A"), Surface::visible("B")]);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (handle, inbox) = TooltipManager::channel();
        let manager = TooltipManager::spawn(d, inbox, Arc::new(events_tx));

        handle.mark_needs_display(tooltip("tip", "A"));
        handle.campaign_list_updated();
        assert!(handle.pending().await.is_empty());

        let event = events_rx.recv().await.expect("viewAppeared event");
        assert_eq!(event.name, "a");
        assert!(events_rx.try_recv().is_err());

        manager.shutdown();
        assert!(handle.pending().await.is_empty());
    }
}
