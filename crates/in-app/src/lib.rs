//! In-app campaign trigger and delivery engine.
//!
//! Events recorded by the host are matched against the triggers of the
//! current campaign list. Matched regular campaigns are displayed one at a
//! time by the [`ReadyCampaignDispatcher`] after an eligibility ping; matched
//! tooltips wait in the [`TooltipManager`] until their target surface is
//! visible. Backend calls retry with exponential backoff.
//!
//! [`InAppContext`] builds and owns all of it.

pub mod agent;
pub mod backend;
pub mod backoff;
pub mod catalog;
pub mod context;
pub mod dispatcher;
pub mod ledger;
pub mod matcher;
pub mod presenter;
pub mod tooltip;
pub mod validator;

pub use agent::{CampaignTriggerAgent, CycleSummary};
pub use backend::{BackendError, DeliveryBackend, ImpressionType, RolloutDecision};
pub use backoff::{retry_with_backoff, BackoffCalculator, RetryPolicy};
pub use catalog::CampaignCatalog;
pub use context::{Collaborators, InAppContext};
pub use dispatcher::{DispatchQueueEntry, ReadyCampaignDispatcher};
pub use ledger::ImpressionLedger;
pub use matcher::{EventMatcher, MatcherError, TriggerSetHash};
pub use presenter::{
    CampaignPresenter, DisplayOutcome, Surface, SurfaceChange, TooltipPresenter, ViewListener,
};
pub use tooltip::{EventSink, TooltipCommand, TooltipDispatcher, TooltipHandle, TooltipManager};
pub use validator::{CampaignsValidator, Rejection};
