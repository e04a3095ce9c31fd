//! inapp-replay: runs an event script against a campaign list through the
//! in-app engine with simulated host collaborators, then prints what was
//! displayed and reported.

mod simulated;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use campaign_core::campaign::load_campaigns;
use campaign_core::config::EngineConfig;
use campaign_core::CampaignId;
use campaign_in_app::{Collaborators, DisplayOutcome, ImpressionType, InAppContext};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::simulated::{HostLog, SimulatedHost};

#[derive(Parser, Debug)]
#[command(name = "inapp-replay")]
#[command(about = "Replay an event script against in-app campaigns")]
#[command(version)]
struct Cli {
    /// JSON file with the campaign list
    #[arg(long)]
    campaigns: PathBuf,

    /// JSON file with the event script
    #[arg(long)]
    events: PathBuf,

    /// Optional engine config file (environment still applies)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Surfaces visible from the start, comma separated
    #[arg(long, value_delimiter = ',')]
    surfaces: Vec<String>,

    /// How the simulated presenter ends every display
    #[arg(long, value_enum, default_value_t = Outcome::Shown)]
    outcome: Outcome,

    /// Simulated time each display stays on screen
    #[arg(long, default_value_t = 10)]
    display_ms: u64,

    /// Answer eligibility pings with a disabled rollout
    #[arg(long, default_value_t = false)]
    rollout_disabled: bool,

    /// Maximum time to wait for queued displays after the script
    #[arg(long, default_value_t = 2_000)]
    settle_ms: u64,

    /// Backend attempts per call (overrides config)
    #[arg(long, env = "INAPP_ENGINE__BACKOFF__MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// Display queue capacity (overrides config)
    #[arg(long, env = "INAPP_ENGINE__DISPATCHER__QUEUE_CAPACITY")]
    queue_capacity: Option<usize>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Outcome {
    Shown,
    Dismissed,
    Failed,
}

impl From<Outcome> for DisplayOutcome {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Shown => DisplayOutcome::Shown,
            Outcome::Dismissed => DisplayOutcome::Dismissed,
            Outcome::Failed => DisplayOutcome::Failed,
        }
    }
}

/// One script entry. Anything that is not a directive is an event payload.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Step {
    Surface {
        surface: String,
        #[serde(default = "default_visible")]
        visible: bool,
    },
    OptOut {
        opt_out: String,
    },
    Click {
        click: String,
    },
    Wait {
        wait_ms: u64,
    },
    Event(serde_json::Value),
}

fn default_visible() -> bool {
    true
}

#[derive(Debug, Default, Serialize)]
struct Summary {
    campaigns_loaded: usize,
    events_submitted: usize,
    campaigns_queued: usize,
    tooltips_marked: usize,
    pending_tooltips: Vec<CampaignId>,
    undisplayed: Vec<CampaignId>,
    impressions: BTreeMap<String, u32>,
    host: HostLog,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inapp_replay=info,campaign_in_app=info".into()),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = EngineConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        EngineConfig::default()
    });
    if let Some(max_attempts) = cli.max_attempts {
        config.backoff.max_attempts = max_attempts;
    }
    if let Some(capacity) = cli.queue_capacity {
        config.dispatcher.queue_capacity = capacity;
    }
    info!(
        max_attempts = config.backoff.max_attempts,
        queue_capacity = config.dispatcher.queue_capacity,
        "Configuration loaded"
    );

    let campaigns = load_campaigns(&cli.campaigns)
        .with_context(|| format!("loading campaigns from {}", cli.campaigns.display()))?;
    let script: Vec<Step> = serde_json::from_str(
        &std::fs::read_to_string(&cli.events)
            .with_context(|| format!("reading event script {}", cli.events.display()))?,
    )
    .context("parsing event script")?;

    let host = SimulatedHost::new(
        cli.outcome.into(),
        Duration::from_millis(cli.display_ms),
        !cli.rollout_disabled,
    );
    for surface in &cli.surfaces {
        host.set_surface(surface, true);
    }

    let ctx = InAppContext::new(
        &config,
        Collaborators {
            backend: host.clone(),
            presenter: host.clone(),
            view_listener: host.clone(),
            tooltip_presenter: host.clone(),
        },
    );

    let mut summary = Summary {
        campaigns_loaded: campaigns.len(),
        ..Summary::default()
    };
    let ids: Vec<CampaignId> = campaigns.iter().map(|c| c.id.clone()).collect();
    let cycle = ctx.refresh_campaigns(campaigns);
    summary.campaigns_queued += cycle.queued;
    summary.tooltips_marked += cycle.tooltips;

    for step in script {
        match step {
            Step::Surface { surface, visible } => {
                let surface = host.set_surface(&surface, visible);
                ctx.view_did_move_to_window(surface);
            }
            Step::OptOut { opt_out } => {
                let campaign_id = CampaignId::new(opt_out.clone());
                if !ctx.report_interaction(campaign_id, ImpressionType::OptOut) {
                    warn!(campaign_id = %opt_out, "Opt-out refused");
                }
            }
            Step::Click { click } => {
                ctx.report_interaction(CampaignId::new(click), ImpressionType::ClickContent);
            }
            Step::Wait { wait_ms } => tokio::time::sleep(Duration::from_millis(wait_ms)).await,
            Step::Event(payload) => {
                let cycle = ctx.submit_payload(&payload);
                summary.events_submitted += 1;
                summary.campaigns_queued += cycle.queued;
                summary.tooltips_marked += cycle.tooltips;
            }
        }
    }

    settle(&ctx, Duration::from_millis(cli.settle_ms)).await;

    summary.pending_tooltips = ctx.pending_tooltips().await;
    summary.undisplayed = ctx.queued_campaigns().into_iter().map(|e| e.campaign_id).collect();
    summary.impressions = ids
        .iter()
        .map(|id| (id.to_string(), ctx.ledger().impressions(id)))
        .filter(|(_, n)| *n > 0)
        .collect();
    ctx.shutdown();
    summary.host = host.log();

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Waits until the display queue drains or `limit` elapses.
async fn settle(ctx: &InAppContext, limit: Duration) {
    let deadline = Instant::now() + limit;
    loop {
        ctx.pending_tooltips().await;
        let idle = ctx.queued_campaigns().is_empty() && ctx.dispatcher().in_flight().is_none();
        if idle {
            return;
        }
        if Instant::now() >= deadline {
            warn!(
                queued = ctx.queued_campaigns().len(),
                "Settle time elapsed with displays pending"
            );
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
