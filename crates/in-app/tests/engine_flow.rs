//! End-to-end flow through `InAppContext` with scripted collaborators.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use campaign_core::config::EngineConfig;
use campaign_core::event::VIEW_IDENTIFIER_ATTRIBUTE;
use campaign_core::{
    AttributeCondition, AttributeValue, Campaign, CampaignId, CampaignKind, ConditionOperator,
    Event, EventType, Trigger,
};
use campaign_in_app::{
    BackendError, CampaignPresenter, Collaborators, DeliveryBackend, DisplayOutcome, ImpressionType,
    InAppContext, RolloutDecision, Surface, TooltipPresenter, ViewListener,
};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;

#[derive(Default)]
struct Host {
    surfaces: Mutex<Vec<Surface>>,
    reports: Mutex<Vec<(CampaignId, ImpressionType)>>,
    tooltips: Mutex<Vec<(CampaignId, String)>>,
    ping_failures: Mutex<u32>,
    displayed: Mutex<Option<mpsc::UnboundedSender<CampaignId>>>,
}

#[async_trait]
impl DeliveryBackend for Host {
    async fn ping(&self) -> Result<RolloutDecision, BackendError> {
        let mut failures = self.ping_failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(BackendError::TooManyRequests);
        }
        Ok(RolloutDecision { enabled: true })
    }

    async fn report_impression(
        &self,
        campaign_id: &CampaignId,
        impression_type: ImpressionType,
    ) -> Result<(), BackendError> {
        self.reports.lock().push((campaign_id.clone(), impression_type));
        Ok(())
    }
}

#[async_trait]
impl CampaignPresenter for Host {
    async fn display(&self, campaign: Arc<Campaign>) -> DisplayOutcome {
        if let Some(tx) = self.displayed.lock().as_ref() {
            let _ = tx.send(campaign.id.clone());
        }
        DisplayOutcome::Dismissed
    }
}

impl ViewListener for Host {
    fn visible_surfaces(&self) -> Vec<Surface> {
        self.surfaces.lock().clone()
    }
}

impl TooltipPresenter for Host {
    fn present(&self, campaign: &Campaign, surface: &Surface) {
        self.tooltips
            .lock()
            .push((campaign.id.clone(), surface.identifier.clone().unwrap_or_default()));
    }
}

fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.backoff.initial_delay_ms = 1;
    config.backoff.too_many_requests_lower_bound_secs = 0;
    config.backoff.too_many_requests_upper_bound_secs = 0;
    config
}

fn start(host: &Arc<Host>) -> (InAppContext, mpsc::UnboundedReceiver<CampaignId>) {
    let (tx, rx) = mpsc::unbounded_channel();
    *host.displayed.lock() = Some(tx);
    let ctx = InAppContext::new(
        &fast_config(),
        Collaborators {
            backend: host.clone(),
            presenter: host.clone(),
            view_listener: host.clone(),
            tooltip_presenter: host.clone(),
        },
    );
    (ctx, rx)
}

async fn settle(ctx: &InAppContext) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            ctx.pending_tooltips().await;
            ctx.pending_tooltips().await;
            if ctx.queued_campaigns().is_empty() && ctx.dispatcher().in_flight().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("engine did not settle");
}

#[tokio::test]
async fn test_purchase_over_threshold_displays_once_and_reports() {
    let host = Arc::new(Host::default());
    *host.ping_failures.lock() = 2;
    let (ctx, mut displayed) = start(&host);

    let over_100 = AttributeCondition::new(
        "total",
        ConditionOperator::GreaterThanOrEqual,
        AttributeValue::Double(100.0),
    );
    ctx.refresh_campaigns(vec![Campaign::regular(
        "upsell",
        vec![Trigger::new(EventType::PurchaseSuccessful, "order").with_condition(over_100)],
    )]);

    ctx.submit_payload(&json!({
        "type": "purchaseSuccessful",
        "name": "Order",
        "attributes": {"total": 42.5}
    }));
    ctx.submit_payload(&json!({
        "type": "purchaseSuccessful",
        "name": "ORDER",
        "attributes": {"total": 120.0}
    }));
    // Nothing new happened; the consumed event set does not fire again.
    ctx.submit_payload(&json!({"type": "custom", "name": "scrolled"}));

    assert_eq!(displayed.recv().await, Some(CampaignId::from("upsell")));
    settle(&ctx).await;

    assert!(displayed.try_recv().is_err());
    assert_eq!(
        host.reports.lock().clone(),
        vec![
            (CampaignId::from("upsell"), ImpressionType::Impression),
            (CampaignId::from("upsell"), ImpressionType::Exit),
        ]
    );
    assert_eq!(ctx.ledger().impressions(&CampaignId::from("upsell")), 1);
}

#[tokio::test]
async fn test_tooltip_targets_only_its_surface_and_feeds_view_appeared_back() {
    let host = Arc::new(Host::default());
    *host.surfaces.lock() = vec![Surface::visible("A"), Surface::visible("B")];
    let (ctx, mut displayed) = start(&host);

    let tip = Campaign::tooltip("tip", "A", vec![Trigger::new(EventType::AppStart, "")]);
    let on_a = AttributeCondition::new(
        VIEW_IDENTIFIER_ATTRIBUTE,
        ConditionOperator::Equals,
        AttributeValue::string("A"),
    );
    let follow_up = Campaign::regular(
        "after-tip",
        vec![Trigger::new(EventType::ViewAppeared, "a").with_condition(on_a)],
    );
    ctx.refresh_campaigns(vec![tip, follow_up]);
    ctx.submit_payload(&json!({"type": "appStart"}));

    assert_eq!(displayed.recv().await, Some(CampaignId::from("after-tip")));
    settle(&ctx).await;

    assert_eq!(host.tooltips.lock().clone(), vec![(CampaignId::from("tip"), "A".to_string())]);
    assert!(ctx.pending_tooltips().await.is_empty());
}

#[tokio::test]
async fn test_capped_tooltip_is_presented_once_across_triggers() {
    let host = Arc::new(Host::default());
    *host.surfaces.lock() = vec![Surface::visible("A")];
    let (ctx, _displayed) = start(&host);

    let mut tip = Campaign::tooltip("tip", "A", vec![Trigger::new(EventType::AppStart, "")]);
    tip.rules.max_impressions = Some(1);
    ctx.refresh_campaigns(vec![tip]);

    for _ in 0..3 {
        ctx.submit_event(Event::new(EventType::AppStart, ""));
        settle(&ctx).await;
    }

    assert_eq!(host.tooltips.lock().len(), 1);
    assert_eq!(ctx.ledger().impressions(&CampaignId::from("tip")), 1);
    assert!(ctx.pending_tooltips().await.is_empty());
}

#[tokio::test]
async fn test_tooltip_waits_for_surface_callback() {
    let host = Arc::new(Host::default());
    let (ctx, _displayed) = start(&host);

    let mut tip = Campaign::tooltip("tip", "checkout", vec![Trigger::new(EventType::AppStart, "")]);
    tip.kind = CampaignKind::Tooltip {
        target_view: "checkout".into(),
        repeatable: true,
    };
    ctx.refresh_campaigns(vec![tip]);
    ctx.submit_event(Event::new(EventType::AppStart, ""));
    assert_eq!(ctx.pending_tooltips().await, vec![CampaignId::from("tip")]);

    ctx.view_did_move_to_window(Surface::hidden("checkout"));
    ctx.view_did_update_identifier(Surface::visible("cart"));
    assert_eq!(ctx.pending_tooltips().await.len(), 1);

    ctx.view_did_change_superview(Surface::visible("Checkout"));
    assert!(ctx.pending_tooltips().await.is_empty());
    assert_eq!(host.tooltips.lock().len(), 1);

    assert!(ctx.requeue_tooltip(&CampaignId::from("tip")));
    assert_eq!(ctx.pending_tooltips().await, vec![CampaignId::from("tip")]);
}

#[tokio::test]
async fn test_opt_out_blocks_future_displays() {
    let host = Arc::new(Host::default());
    let (ctx, mut displayed) = start(&host);

    let mut promo = Campaign::regular("promo", vec![Trigger::new(EventType::AppStart, "")]);
    promo.rules.opt_out_capable = true;
    ctx.refresh_campaigns(vec![promo]);

    ctx.submit_payload(&json!({"type": "appStart"}));
    assert_eq!(displayed.recv().await, Some(CampaignId::from("promo")));
    settle(&ctx).await;

    assert!(ctx.report_interaction(CampaignId::from("promo"), ImpressionType::OptOut));
    ctx.submit_payload(&json!({"type": "appStart"}));
    settle(&ctx).await;
    assert!(displayed.try_recv().is_err());
}

#[tokio::test]
async fn test_shutdown_discards_queued_campaigns() {
    let host = Arc::new(Host::default());
    let (ctx, _displayed) = start(&host);
    ctx.shutdown();

    let late = Campaign::regular("late", vec![Trigger::new(EventType::AppStart, "")]);
    ctx.refresh_campaigns(vec![late]);
    ctx.submit_payload(&json!({"type": "appStart"}));
    assert!(ctx.queued_campaigns().is_empty());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(host.reports.lock().is_empty());
}
