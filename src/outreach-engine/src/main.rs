//! OutreachExpress: multi-channel campaign dispatch and engagement
//! tracking engine.
//!
//! Entry point wiring the in-memory collaborators together and driving a
//! small end-to-end run: create a campaign, dispatch it in batches,
//! record an open and a click, and report realtime metrics.

use std::sync::Arc;

use clap::Parser;
use outreach_audience::{Condition, ConditionOperator, FilterEvaluator, FilterGroup};
use outreach_campaign::{AudienceDescriptor, CampaignService, CampaignSpec, CampaignState};
use outreach_core::collaborators::{
    CaptureTransport, InMemoryAudience, StaticRenderer, TransportRegistry,
};
use outreach_core::config::AppConfig;
use outreach_core::types::{Channel, Recipient, SendState};
use outreach_core::SendStore;
use outreach_dispatch::{CycleOutcome, DispatchWorker};
use outreach_metrics::MetricsService;
use outreach_tracking::{email_statistics, TrackingService};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "outreach-engine")]
#[command(about = "Multi-channel campaign dispatch and engagement tracking engine")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "OUTREACH__NODE_ID")]
    node_id: Option<String>,

    /// Number of demo recipients to generate
    #[arg(long, default_value_t = 25)]
    recipients: usize,

    /// WhatsApp batch size (overrides config)
    #[arg(long, env = "OUTREACH__DISPATCH__DEFAULT_BATCH_SIZE_WHATSAPP")]
    whatsapp_batch: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "outreach=info,outreach_engine=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(batch) = cli.whatsapp_batch {
        config.dispatch.default_batch_size_whatsapp = batch;
    }
    // Keep the demo quick regardless of production pacing defaults.
    config.dispatch.default_min_delay_ms = 10;
    config.dispatch.default_max_delay_ms = 50;

    info!(node_id = %config.node_id, "OutreachExpress starting up");

    let pool = demo_pool(cli.recipients);
    let sends = Arc::new(SendStore::new());
    let metrics = Arc::new(MetricsService::new(sends.clone(), config.metrics.ttl_secs));
    let service = Arc::new(CampaignService::new(
        sends.clone(),
        Arc::new(InMemoryAudience::new(pool)),
        FilterEvaluator::default(),
        metrics.clone(),
        config.dispatch.clone(),
    ));
    let transport = Arc::new(CaptureTransport::new());
    let worker = DispatchWorker::new(
        service.clone(),
        sends.clone(),
        TransportRegistry::uniform(transport.clone()),
        Arc::new(StaticRenderer::new(
            "Your July offer is here",
            "Hi! Check out this month's offers",
        )),
        metrics.clone(),
        config.dispatch.clone(),
    );
    let tracking = TrackingService::new(sends.clone(), metrics.clone());

    let campaign = service.create(CampaignSpec {
        name: "Demo blast".to_string(),
        channels: vec![Channel::Email, Channel::WhatsApp],
        audience: Some(AudienceDescriptor::Manual {
            filter: FilterGroup::all(vec![Condition::new(
                "active",
                ConditionOperator::Equals,
                json!(true),
            )]),
        }),
        templates: [
            (Channel::Email, Uuid::new_v4()),
            (Channel::WhatsApp, Uuid::new_v4()),
        ]
        .into_iter()
        .collect(),
        settings: Default::default(),
        scheduled_at: None,
    })?;

    service.start(campaign.id)?;
    info!(campaign_id = %campaign.id, pending = sends.pending_count(campaign.id), "Dispatching");

    loop {
        match worker.run_cycle(campaign.id).await? {
            CycleOutcome::Requeue { dispatched } => {
                info!(dispatched, remaining = sends.pending_count(campaign.id), "Cycle done");
            }
            outcome => {
                info!(?outcome, "Dispatch finished");
                break;
            }
        }
    }

    // Simulate one recipient opening and clicking.
    if let Some(tid) = sends
        .for_campaign(campaign.id)
        .into_iter()
        .filter(|s| s.state == SendState::Sent)
        .find_map(|s| s.tracking_id)
    {
        let ctx = Default::default();
        tracking.track_open(&tid, &ctx)?;
        let encoded = {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD.encode("https://example.com/offers")
        };
        let url = tracking.track_click(&tid, &encoded, &ctx)?;
        info!(url = %url, "Simulated open + click");
    }

    let realtime = metrics.realtime(campaign.id);
    info!(
        total_sends = realtime.metric.total_sends,
        sent = realtime.metric.sent,
        opened = realtime.metric.opened,
        clicked = realtime.metric.clicked,
        failed = realtime.metric.failed,
        eta = ?realtime.eta,
        "Realtime metrics"
    );

    let stats = email_statistics(&sends, campaign.id);
    info!(
        open_rate = stats.open_rate,
        click_rate = stats.click_rate,
        state = ?service.get(campaign.id)?.state,
        "Email statistics"
    );
    debug_assert_eq!(service.get(campaign.id)?.state, CampaignState::Completed);

    Ok(())
}

fn demo_pool(n: usize) -> Vec<Recipient> {
    (0..n)
        .map(|i| Recipient {
            id: Uuid::new_v4(),
            attributes: [
                ("active".to_string(), json!(i % 5 != 0)),
                ("city".to_string(), json!(["CDMX", "GDL", "MTY"][i % 3])),
            ]
            .into_iter()
            .collect(),
            email: Some(format!("user{i}@example.com")),
            phone: (i % 2 == 0).then(|| format!("+5215550{i:04}")),
            group_jid: None,
        })
        .collect()
}
