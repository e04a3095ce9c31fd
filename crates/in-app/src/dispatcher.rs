//! Ready-campaign dispatcher: serialized display of regular campaigns.
//!
//! A single worker task owns presentation. It pops the head of the queue,
//! confirms eligibility with the backend, waits for the presenter to reach a
//! terminal outcome and reports impressions, before looking at the next
//! entry. Backend calls retry with backoff inside the worker, so event
//! delivery is never blocked by a wait.

use std::collections::VecDeque;
use std::sync::Arc;

use campaign_core::config::EngineConfig;
use campaign_core::{Campaign, CampaignId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{DeliveryBackend, ImpressionType};
use crate::backoff::{retry_with_backoff, BackoffCalculator, RetryPolicy};
use crate::catalog::CampaignCatalog;
use crate::ledger::ImpressionLedger;
use crate::presenter::{CampaignPresenter, DisplayOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchQueueEntry {
    pub campaign_id: CampaignId,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct DispatchState {
    queue: VecDeque<DispatchQueueEntry>,
    in_flight: Option<CampaignId>,
    closed: bool,
}

impl DispatchState {
    fn holds(&self, id: &CampaignId) -> bool {
        self.in_flight.as_ref() == Some(id) || self.queue.iter().any(|e| &e.campaign_id == id)
    }
}

enum Next {
    Entry(DispatchQueueEntry),
    Idle,
    Closed,
}

struct DispatchShared {
    state: Mutex<DispatchState>,
    wakeup: Notify,
    catalog: Arc<CampaignCatalog>,
    ledger: Arc<ImpressionLedger>,
    backend: Arc<dyn DeliveryBackend>,
    presenter: Arc<dyn CampaignPresenter>,
    retry: RetryPolicy,
    backoff: BackoffCalculator,
    capacity: usize,
}

pub struct ReadyCampaignDispatcher {
    shared: Arc<DispatchShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    reports: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ReadyCampaignDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ReadyCampaignDispatcher")
            .field("queued", &state.queue.len())
            .field("in_flight", &state.in_flight)
            .field("closed", &state.closed)
            .finish()
    }
}

impl ReadyCampaignDispatcher {
    /// Builds an idle dispatcher. Nothing is displayed until [`start`](Self::start).
    pub fn new(
        config: &EngineConfig,
        catalog: Arc<CampaignCatalog>,
        ledger: Arc<ImpressionLedger>,
        backend: Arc<dyn DeliveryBackend>,
        presenter: Arc<dyn CampaignPresenter>,
    ) -> Self {
        Self {
            shared: Arc::new(DispatchShared {
                state: Mutex::new(DispatchState::default()),
                wakeup: Notify::new(),
                catalog,
                ledger,
                backend,
                presenter,
                retry: RetryPolicy::from_config(&config.backoff),
                backoff: BackoffCalculator::from_config(&config.backoff),
                capacity: config.dispatcher.queue_capacity,
            }),
            worker: Mutex::new(None),
            reports: Mutex::new(Vec::new()),
        }
    }

    /// Spawns the worker task. Must run inside a Tokio runtime; a second
    /// call is a no-op.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() || self.shared.state.lock().closed {
            return;
        }
        let shared = self.shared.clone();
        *worker = Some(tokio::spawn(async move { shared.run().await }));
        info!("Ready-campaign dispatcher started");
    }

    /// Queues a campaign for display. Returns `false` without changing
    /// anything when the id is already queued or being displayed, the queue
    /// is full, or the dispatcher was shut down.
    pub fn add_to_queue(&self, campaign_id: CampaignId) -> bool {
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                return false;
            }
            if state.holds(&campaign_id) {
                debug!(campaign_id = %campaign_id, "Campaign already pending, not queued again");
                return false;
            }
            if state.queue.len() >= self.shared.capacity {
                warn!(
                    campaign_id = %campaign_id,
                    capacity = self.shared.capacity,
                    "Display queue full, dropping campaign"
                );
                metrics::counter!("inapp.dispatch.dropped").increment(1);
                return false;
            }
            debug!(campaign_id = %campaign_id, "Campaign queued for display");
            state.queue.push_back(DispatchQueueEntry {
                campaign_id,
                enqueued_at: Utc::now(),
            });
        }
        metrics::counter!("inapp.dispatch.enqueued").increment(1);
        self.shared.wakeup.notify_one();
        true
    }

    /// Whether [`add_to_queue`](Self::add_to_queue) has room for this id.
    /// An id that is already held counts as accepted.
    pub fn can_accept(&self, campaign_id: &CampaignId) -> bool {
        let state = self.shared.state.lock();
        !state.closed && (state.holds(campaign_id) || state.queue.len() < self.shared.capacity)
    }

    pub fn queued(&self) -> Vec<DispatchQueueEntry> {
        self.shared.state.lock().queue.iter().cloned().collect()
    }

    pub fn queue_len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn in_flight(&self) -> Option<CampaignId> {
        self.shared.state.lock().in_flight.clone()
    }

    /// Reports a UI-originated interaction (click, opt-out) in the
    /// background. Opt-outs are recorded in the ledger first and are refused
    /// for campaigns that do not allow them.
    pub fn report_interaction(
        &self,
        campaign_id: CampaignId,
        impression_type: ImpressionType,
    ) -> bool {
        if self.shared.state.lock().closed {
            return false;
        }
        if impression_type == ImpressionType::OptOut {
            let allowed = self
                .shared
                .catalog
                .get(&campaign_id)
                .is_some_and(|c| c.rules.opt_out_capable);
            if !allowed {
                warn!(
                    campaign_id = %campaign_id,
                    "Opt-out requested for a campaign that does not allow it"
                );
                return false;
            }
            self.shared.ledger.record_opt_out(&campaign_id);
        }

        let shared = self.shared.clone();
        let handle = tokio::spawn(async move {
            shared.report(&campaign_id, impression_type).await;
        });
        let mut reports = self.reports.lock();
        reports.retain(|h| !h.is_finished());
        reports.push(handle);
        true
    }

    /// Stops the worker and pending reports and discards the queue. Whatever
    /// was in flight is abandoned without further reports.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let discarded = state.queue.len();
            state.queue.clear();
            state.in_flight = None;
            info!(discarded, "Ready-campaign dispatcher shutting down");
        }
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
        for report in self.reports.lock().drain(..) {
            report.abort();
        }
        self.shared.wakeup.notify_one();
    }
}

impl DispatchShared {
    async fn run(self: Arc<Self>) {
        loop {
            match self.begin_next() {
                Next::Entry(entry) => {
                    self.process(&entry).await;
                    self.finish(&entry.campaign_id);
                }
                Next::Idle => self.wakeup.notified().await,
                Next::Closed => break,
            }
        }
        debug!("Ready-campaign dispatcher worker exited");
    }

    fn begin_next(&self) -> Next {
        let mut state = self.state.lock();
        if state.closed {
            return Next::Closed;
        }
        match state.queue.pop_front() {
            Some(entry) => {
                state.in_flight = Some(entry.campaign_id.clone());
                Next::Entry(entry)
            }
            None => Next::Idle,
        }
    }

    fn finish(&self, campaign_id: &CampaignId) {
        let mut state = self.state.lock();
        if state.in_flight.as_ref() == Some(campaign_id) {
            state.in_flight = None;
        }
    }

    async fn process(&self, entry: &DispatchQueueEntry) {
        let Some(campaign) = self.catalog.get(&entry.campaign_id) else {
            warn!(
                campaign_id = %entry.campaign_id,
                "Campaign left the catalog before display, dropping"
            );
            metrics::counter!("inapp.dispatch.dropped").increment(1);
            return;
        };

        if campaign.rules.confirm_before_display && !self.confirm(&campaign).await {
            metrics::counter!("inapp.dispatch.dropped").increment(1);
            return;
        }

        let waited_ms = (Utc::now() - entry.enqueued_at).num_milliseconds();
        info!(campaign_id = %campaign.id, waited_ms, "Displaying campaign");
        let outcome = self.presenter.display(campaign.clone()).await;
        if self.state.lock().closed {
            debug!(
                campaign_id = %campaign.id,
                ?outcome,
                "Dispatcher closed during display, not recorded"
            );
            return;
        }

        match outcome {
            DisplayOutcome::Shown | DisplayOutcome::Dismissed => {
                let total = self.ledger.record_impression(&campaign.id);
                metrics::counter!("inapp.dispatch.displayed").increment(1);
                info!(
                    campaign_id = %campaign.id,
                    ?outcome,
                    impressions = total,
                    "Campaign displayed"
                );
                self.report(&campaign.id, ImpressionType::Impression).await;
                if outcome == DisplayOutcome::Dismissed {
                    self.report(&campaign.id, ImpressionType::Exit).await;
                }
            }
            DisplayOutcome::Failed => {
                warn!(campaign_id = %campaign.id, "Presenter failed to display campaign");
                metrics::counter!("inapp.dispatch.dropped").increment(1);
            }
        }
    }

    /// Asks the backend whether display is rolled out. Any failure, including
    /// exhausted retries, means no.
    async fn confirm(&self, campaign: &Campaign) -> bool {
        match retry_with_backoff("ping", &self.retry, &self.backoff, || self.backend.ping()).await {
            Ok(decision) if decision.enabled => true,
            Ok(_) => {
                info!(campaign_id = %campaign.id, "Rollout disabled, dropping campaign");
                false
            }
            Err(err) => {
                warn!(
                    campaign_id = %campaign.id,
                    error = %err,
                    "Eligibility ping failed, dropping campaign"
                );
                false
            }
        }
    }

    async fn report(&self, campaign_id: &CampaignId, impression_type: ImpressionType) {
        let result = retry_with_backoff("report_impression", &self.retry, &self.backoff, || {
            self.backend.report_impression(campaign_id, impression_type)
        })
        .await;
        if let Err(err) = result {
            warn!(
                campaign_id = %campaign_id,
                ?impression_type,
                error = %err,
                "Impression report failed"
            );
            metrics::counter!("inapp.report.failed").increment(1);
        }
    }
}
