//! Campaign metric aggregation: full recompute from send rows with a
//! TTL'd snapshot cache and explicit invalidation.
//!
//! Snapshots are always rebuilt from scratch rather than incrementally
//! maintained, so a missed invalidation costs freshness, never accuracy.
//! Cache replacement is whole-snapshot, which keeps concurrent readers
//! free of partial-update races.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use outreach_core::types::{CampaignSend, Channel, SendState};
use outreach_core::SendStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Denormalized aggregate owned 1:1 by a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignMetric {
    pub campaign_id: Uuid,
    /// Audience-size snapshot taken at create/update time (recipients,
    /// not sends).
    pub total_recipients: u64,
    pub total_sends: u64,
    pub pending: u64,
    pub sent: u64,
    pub opened: u64,
    pub clicked: u64,
    pub failed: u64,
    /// Delivered / total sends. Delivered means the row got past the
    /// provider: sent, opened, or clicked.
    pub delivery_rate: f64,
    /// Opened-or-beyond / delivered.
    pub open_rate: f64,
    /// Clicked / delivered.
    pub click_rate: f64,
    pub channels: Vec<ChannelBreakdown>,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelBreakdown {
    pub channel: Channel,
    pub total: u64,
    pub pending: u64,
    pub sent: u64,
    pub opened: u64,
    pub clicked: u64,
    pub failed: u64,
}

/// Remaining-work estimate derived from trailing 5-minute throughput.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "status", content = "minutes")]
pub enum Eta {
    Completed,
    Calculating,
    Minutes(f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeMetrics {
    pub metric: CampaignMetric,
    pub sends_last_hour: u64,
    pub opens_last_hour: u64,
    pub clicks_last_hour: u64,
    pub eta: Eta,
}

/// Delta report against the average of prior completed campaigns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub campaign_id: Uuid,
    pub baseline_campaigns: usize,
    pub delivery_rate: f64,
    pub open_rate: f64,
    pub click_rate: f64,
    pub baseline_delivery_rate: f64,
    pub baseline_open_rate: f64,
    pub baseline_click_rate: f64,
    pub delivery_rate_delta: f64,
    pub open_rate_delta: f64,
    pub click_rate_delta: f64,
}

struct CachedMetric {
    metric: CampaignMetric,
    cached_at: Instant,
}

pub struct MetricsService {
    sends: Arc<SendStore>,
    cache: DashMap<Uuid, CachedMetric>,
    /// total_recipients snapshots seeded at campaign create/update.
    seeds: DashMap<Uuid, u64>,
    ttl: Duration,
}

impl MetricsService {
    pub fn new(sends: Arc<SendStore>, ttl_secs: u64) -> Self {
        Self {
            sends,
            cache: DashMap::new(),
            seeds: DashMap::new(),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    /// Record the audience-size snapshot taken when a campaign is created
    /// or its audience changes.
    pub fn seed_total_recipients(&self, campaign_id: Uuid, total: u64) {
        self.seeds.insert(campaign_id, total);
        self.invalidate(campaign_id);
    }

    /// Drop the cached snapshot. Called on every send mutation.
    pub fn invalidate(&self, campaign_id: Uuid) {
        self.cache.remove(&campaign_id);
    }

    /// Cached snapshot if still fresh, otherwise a full recompute.
    pub fn get(&self, campaign_id: Uuid) -> CampaignMetric {
        if let Some(entry) = self.cache.get(&campaign_id) {
            if entry.cached_at.elapsed() <= self.ttl {
                return entry.metric.clone();
            }
        }
        self.refresh(campaign_id)
    }

    /// Fully recompute the aggregate from current send rows and replace
    /// the cached snapshot.
    pub fn refresh(&self, campaign_id: Uuid) -> CampaignMetric {
        let rows = self.sends.for_campaign(campaign_id);
        let metric = compute_metric(
            campaign_id,
            self.seeds.get(&campaign_id).map(|s| *s).unwrap_or(0),
            &rows,
        );
        debug!(
            campaign_id = %campaign_id,
            total_sends = metric.total_sends,
            pending = metric.pending,
            "Refreshed campaign metric"
        );
        self.cache.insert(
            campaign_id,
            CachedMetric {
                metric: metric.clone(),
                cached_at: Instant::now(),
            },
        );
        metric
    }

    /// Refresh plus trailing-hour throughput and a pending-work ETA.
    pub fn realtime(&self, campaign_id: Uuid) -> RealtimeMetrics {
        let metric = self.refresh(campaign_id);
        let rows = self.sends.for_campaign(campaign_id);
        let now = Utc::now();
        let hour_ago = now - ChronoDuration::minutes(60);
        let five_min_ago = now - ChronoDuration::minutes(5);

        let sends_last_hour = rows
            .iter()
            .filter(|r| r.sent_at.map(|t| t >= hour_ago).unwrap_or(false))
            .count() as u64;
        let opens_last_hour = rows
            .iter()
            .flat_map(|r| r.device_history.iter())
            .filter(|e| e.occurred_at >= hour_ago)
            .count() as u64;
        let clicks_last_hour = rows
            .iter()
            .flat_map(|r| r.click_history.iter())
            .filter(|e| e.occurred_at >= hour_ago)
            .count() as u64;

        let sends_last_5_min = rows
            .iter()
            .filter(|r| r.sent_at.map(|t| t >= five_min_ago).unwrap_or(false))
            .count() as f64;

        let eta = if metric.pending == 0 {
            Eta::Completed
        } else if sends_last_5_min == 0.0 {
            Eta::Calculating
        } else {
            Eta::Minutes(metric.pending as f64 / (sends_last_5_min / 5.0))
        };

        RealtimeMetrics {
            metric,
            sends_last_hour,
            opens_last_hour,
            clicks_last_hour,
            eta,
        }
    }

    /// Compare a campaign's rates against the average of up to 5 prior
    /// completed campaigns (caller selects the comparable set). Returns
    /// `None` when there is nothing to compare against.
    pub fn compare(&self, campaign_id: Uuid, prior: &[Uuid]) -> Option<ComparisonReport> {
        let baseline: Vec<CampaignMetric> =
            prior.iter().take(5).map(|id| self.refresh(*id)).collect();
        if baseline.is_empty() {
            return None;
        }

        let n = baseline.len() as f64;
        let baseline_delivery_rate = baseline.iter().map(|m| m.delivery_rate).sum::<f64>() / n;
        let baseline_open_rate = baseline.iter().map(|m| m.open_rate).sum::<f64>() / n;
        let baseline_click_rate = baseline.iter().map(|m| m.click_rate).sum::<f64>() / n;

        let current = self.refresh(campaign_id);
        Some(ComparisonReport {
            campaign_id,
            baseline_campaigns: baseline.len(),
            delivery_rate: current.delivery_rate,
            open_rate: current.open_rate,
            click_rate: current.click_rate,
            baseline_delivery_rate,
            baseline_open_rate,
            baseline_click_rate,
            delivery_rate_delta: current.delivery_rate - baseline_delivery_rate,
            open_rate_delta: current.open_rate - baseline_open_rate,
            click_rate_delta: current.click_rate - baseline_click_rate,
        })
    }
}

fn compute_metric(campaign_id: Uuid, total_recipients: u64, rows: &[CampaignSend]) -> CampaignMetric {
    let count_state =
        |state: SendState| rows.iter().filter(|r| r.state == state).count() as u64;

    let pending = count_state(SendState::Pending);
    let sent = count_state(SendState::Sent);
    let opened = count_state(SendState::Opened);
    let clicked = count_state(SendState::Clicked);
    let failed = count_state(SendState::Failed);
    let total_sends = rows.len() as u64;
    let delivered = sent + opened + clicked;

    let channels = Channel::ALL
        .iter()
        .filter_map(|&channel| {
            let channel_rows: Vec<&CampaignSend> =
                rows.iter().filter(|r| r.channel == channel).collect();
            if channel_rows.is_empty() {
                return None;
            }
            let by_state = |state: SendState| {
                channel_rows.iter().filter(|r| r.state == state).count() as u64
            };
            Some(ChannelBreakdown {
                channel,
                total: channel_rows.len() as u64,
                pending: by_state(SendState::Pending),
                sent: by_state(SendState::Sent),
                opened: by_state(SendState::Opened),
                clicked: by_state(SendState::Clicked),
                failed: by_state(SendState::Failed),
            })
        })
        .collect();

    CampaignMetric {
        campaign_id,
        total_recipients,
        total_sends,
        pending,
        sent,
        opened,
        clicked,
        failed,
        delivery_rate: ratio(delivered, total_sends),
        open_rate: ratio(opened + clicked, delivered),
        click_rate: ratio(clicked, delivered),
        channels,
        computed_at: Utc::now(),
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
