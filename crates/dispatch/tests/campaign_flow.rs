//! End-to-end flow: create a two-channel campaign, dispatch it in bounded
//! batches, track engagement on a delivered email, and read back metrics.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use outreach_audience::{Condition, ConditionOperator, FilterEvaluator, FilterGroup};
use outreach_campaign::{
    AudienceDescriptor, CampaignService, CampaignSpec, CampaignState, ChannelSettings,
};
use outreach_core::collaborators::{
    CaptureTransport, InMemoryAudience, StaticRenderer, TransportRegistry,
};
use outreach_core::config::DispatchConfig;
use outreach_core::types::{Channel, Recipient, SendState};
use outreach_core::SendStore;
use outreach_dispatch::{CycleOutcome, DispatchWorker};
use outreach_metrics::{Eta, MetricsService};
use outreach_tracking::{email_statistics, TrackingService};
use serde_json::json;
use uuid::Uuid;

struct Harness {
    sends: Arc<SendStore>,
    metrics: Arc<MetricsService>,
    service: Arc<CampaignService>,
    worker: DispatchWorker,
    tracking: TrackingService,
    transport: Arc<CaptureTransport>,
}

fn make_harness(pool: Vec<Recipient>) -> Harness {
    let sends = Arc::new(SendStore::new());
    let metrics = Arc::new(MetricsService::new(sends.clone(), 60));
    let service = Arc::new(CampaignService::new(
        sends.clone(),
        Arc::new(InMemoryAudience::new(pool)),
        FilterEvaluator::default(),
        metrics.clone(),
        DispatchConfig::default(),
    ));
    let transport = Arc::new(CaptureTransport::new());
    let worker = DispatchWorker::new(
        service.clone(),
        sends.clone(),
        TransportRegistry::uniform(transport.clone()),
        Arc::new(StaticRenderer::new("Offers inside", "Hello!")),
        metrics.clone(),
        DispatchConfig::default(),
    );
    let tracking = TrackingService::new(sends.clone(), metrics.clone());
    Harness {
        sends,
        metrics,
        service,
        worker,
        tracking,
        transport,
    }
}

fn pool(n: usize) -> Vec<Recipient> {
    (0..n)
        .map(|i| Recipient {
            id: Uuid::new_v4(),
            attributes: [("active".to_string(), json!(true))].into_iter().collect(),
            email: Some(format!("user{i}@example.com")),
            phone: Some(format!("+5215550{i:04}")),
            group_jid: None,
        })
        .collect()
}

fn two_channel_spec() -> CampaignSpec {
    let mut settings = HashMap::new();
    settings.insert(
        Channel::WhatsApp,
        ChannelSettings {
            batch_size: 3,
            min_delay_ms: 1,
            max_delay_ms: 2,
        },
    );
    CampaignSpec {
        name: "Launch announcement".to_string(),
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
        settings,
        scheduled_at: None,
    }
}

#[tokio::test(start_paused = true)]
async fn full_campaign_lifecycle() {
    let harness = make_harness(pool(4));
    let campaign = harness.service.create(two_channel_spec()).unwrap();
    harness.service.start(campaign.id).unwrap();

    // 4 email rows + 4 whatsapp rows materialized.
    assert_eq!(harness.sends.pending_count(campaign.id), 8);

    // Drive dispatch to completion.
    let mut cycles = 0;
    loop {
        cycles += 1;
        match harness.worker.run_cycle(campaign.id).await.unwrap() {
            CycleOutcome::Completed => break,
            CycleOutcome::Requeue { .. } => continue,
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    // WhatsApp batch size 3 over 4 rows forces at least two cycles.
    assert!(cycles >= 2);
    assert_eq!(harness.transport.sent_count(), 8);
    assert_eq!(
        harness.service.get(campaign.id).unwrap().state,
        CampaignState::Completed
    );

    // Engage with one email send.
    let tracked = harness
        .sends
        .for_campaign(campaign.id)
        .into_iter()
        .find(|s| s.channel == Channel::Email)
        .unwrap();
    let tid = tracked.tracking_id.unwrap();
    let ctx = Default::default();
    harness.tracking.track_open(&tid, &ctx).unwrap();
    let encoded = STANDARD.encode("https://example.com/launch");
    let url = harness.tracking.track_click(&tid, &encoded, &ctx).unwrap();
    assert_eq!(url, "https://example.com/launch");

    // Metrics reflect the engagement and report completion.
    let realtime = harness.metrics.realtime(campaign.id);
    assert_eq!(realtime.metric.total_sends, 8);
    assert_eq!(realtime.metric.clicked, 1);
    assert_eq!(realtime.metric.pending, 0);
    assert_eq!(realtime.eta, Eta::Completed);
    assert_eq!(realtime.sends_last_hour, 8);

    let stats = email_statistics(&harness.sends, campaign.id);
    assert_eq!(stats.total, 4);
    assert_eq!(stats.clicked, 1);
    assert_eq!(stats.top_clicked_urls[0].url, "https://example.com/launch");
}

#[tokio::test(start_paused = true)]
async fn pause_takes_effect_between_batches() {
    let harness = make_harness(pool(6));
    let mut spec = two_channel_spec();
    spec.channels = vec![Channel::WhatsApp];
    spec.templates.remove(&Channel::Email);
    let campaign = harness.service.create(spec).unwrap();
    harness.service.start(campaign.id).unwrap();

    // First batch goes out, then the campaign is paused.
    let first = harness.worker.run_cycle(campaign.id).await.unwrap();
    assert_eq!(first, CycleOutcome::Requeue { dispatched: 3 });
    harness.service.pause(campaign.id).unwrap();

    assert_eq!(
        harness.worker.run_cycle(campaign.id).await.unwrap(),
        CycleOutcome::NotSending
    );
    assert_eq!(harness.sends.pending_count(campaign.id), 3);

    // Resume finishes the remainder.
    harness.service.resume(campaign.id).unwrap();
    assert_eq!(
        harness.worker.run_cycle(campaign.id).await.unwrap(),
        CycleOutcome::Completed
    );
    assert_eq!(harness.transport.sent_count(), 6);
}

#[tokio::test(start_paused = true)]
async fn cancel_mid_flight_fails_only_pending() {
    let harness = make_harness(pool(6));
    let mut spec = two_channel_spec();
    spec.channels = vec![Channel::WhatsApp];
    spec.templates.remove(&Channel::Email);
    let campaign = harness.service.create(spec).unwrap();
    harness.service.start(campaign.id).unwrap();

    harness.worker.run_cycle(campaign.id).await.unwrap();
    harness.service.cancel(campaign.id).unwrap();

    assert_eq!(
        harness.sends.count_in_state(campaign.id, SendState::Sent),
        3
    );
    assert_eq!(
        harness.sends.count_in_state(campaign.id, SendState::Failed),
        3
    );
    // A cancelled campaign is never picked up again.
    assert_eq!(
        harness.worker.run_cycle(campaign.id).await.unwrap(),
        CycleOutcome::NotSending
    );
    assert_eq!(
        harness.service.get(campaign.id).unwrap().state,
        CampaignState::Cancelled
    );
}

#[tokio::test(start_paused = true)]
async fn compare_against_prior_completed_campaigns() {
    let harness = make_harness(pool(3));

    // Run two identical campaigns to completion.
    let mut ids = Vec::new();
    for _ in 0..2 {
        let campaign = harness.service.create(two_channel_spec()).unwrap();
        harness.service.start(campaign.id).unwrap();
        while harness.worker.run_cycle(campaign.id).await.unwrap() != CycleOutcome::Completed {}
        ids.push(campaign.id);
    }

    let report = harness.service.compare(ids[1]).unwrap().unwrap();
    assert_eq!(report.baseline_campaigns, 1);
    // Both runs delivered everything; the delta is zero.
    assert!(report.delivery_rate_delta.abs() < 1e-9);
}
