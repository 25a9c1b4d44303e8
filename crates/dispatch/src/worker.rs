//! Batch dispatch worker: claims bounded batches of pending sends per
//! channel, invokes the transport with a hard timeout, applies WhatsApp
//! pacing, and self-requeues instead of looping in one execution context
//! so pause/cancel take effect between batches.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use outreach_campaign::{CampaignService, CampaignState};
use outreach_core::collaborators::{Renderer, TransportRegistry};
use outreach_core::config::DispatchConfig;
use outreach_core::types::{Channel, Recipient, SendOutcome, SendState};
use outreach_core::{OutreachError, OutreachResult, SendStore};
use outreach_metrics::MetricsService;
use rand::Rng;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

/// Result of one bounded batch pass over a campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Campaign is no longer `sending`; exited without marking completed.
    NotSending,
    /// Another dispatch run already holds this campaign.
    AlreadyRunning,
    /// No pending sends remain anywhere; campaign marked completed.
    Completed,
    /// Batch exhausted with pending sends left; caller should requeue.
    Requeue { dispatched: usize },
}

pub struct DispatchWorker {
    service: Arc<CampaignService>,
    sends: Arc<SendStore>,
    transports: TransportRegistry,
    renderer: Arc<dyn Renderer>,
    metrics: Arc<MetricsService>,
    config: DispatchConfig,
    /// At most one active dispatch run per campaign.
    active: DashMap<Uuid, ()>,
    queue: mpsc::Sender<Uuid>,
    inbox: Mutex<Option<mpsc::Receiver<Uuid>>>,
}

impl DispatchWorker {
    pub fn new(
        service: Arc<CampaignService>,
        sends: Arc<SendStore>,
        transports: TransportRegistry,
        renderer: Arc<dyn Renderer>,
        metrics: Arc<MetricsService>,
        config: DispatchConfig,
    ) -> Self {
        let (queue, inbox) = mpsc::channel(1024);
        Self {
            service,
            sends,
            transports,
            renderer,
            metrics,
            config,
            active: DashMap::new(),
            queue,
            inbox: Mutex::new(Some(inbox)),
        }
    }

    /// Queue a campaign for its next batch pass.
    pub async fn enqueue(&self, campaign_id: Uuid) -> OutreachResult<()> {
        self.queue
            .send(campaign_id)
            .await
            .map_err(|_| OutreachError::Internal(anyhow::anyhow!("dispatch queue closed")))
    }

    /// Drive the queue until it closes. `CycleOutcome::Requeue` puts the
    /// campaign back on the queue rather than looping here, which bounds
    /// how long one pass holds the campaign.
    pub async fn run(&self) {
        let mut inbox = match self.inbox.lock().await.take() {
            Some(inbox) => inbox,
            None => {
                warn!("Dispatch worker run() invoked twice; ignoring");
                return;
            }
        };
        while let Some(campaign_id) = inbox.recv().await {
            match self.run_cycle(campaign_id).await {
                Ok(CycleOutcome::Requeue { .. }) => {
                    if self.enqueue(campaign_id).await.is_err() {
                        return;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(campaign_id = %campaign_id, error = %e, "Dispatch cycle failed");
                }
            }
        }
    }

    /// One bounded batch pass: per enabled channel, claim up to the
    /// channel's batch size of pending rows (FIFO) and dispatch each with
    /// a single transport attempt. Campaign state is checked once at the
    /// start; a campaign paused or cancelled mid-cycle stops being
    /// processed on the next pass.
    pub async fn run_cycle(&self, campaign_id: Uuid) -> OutreachResult<CycleOutcome> {
        let campaign = self.service.get(campaign_id)?;
        if campaign.state != CampaignState::Sending {
            return Ok(CycleOutcome::NotSending);
        }

        let _guard = match RunGuard::claim(&self.active, campaign_id) {
            Some(guard) => guard,
            None => return Ok(CycleOutcome::AlreadyRunning),
        };

        // Resolve once per cycle so the renderer sees recipient records.
        // Rows whose recipient has since left the audience still dispatch
        // against a bare record carrying the stored destination.
        let recipients: HashMap<Uuid, Recipient> = self
            .service
            .resolve_audience(&campaign)?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();

        let mut dispatched = 0usize;
        for &channel in &campaign.channels {
            let settings = campaign.settings_for(channel, &self.config);
            let batch = self
                .sends
                .pending_batch(campaign_id, channel, settings.batch_size);

            for (index, key) in batch.iter().enumerate() {
                if paced_channel(channel) && index > 0 {
                    let delay = self.sample_delay(settings.min_delay_ms, settings.max_delay_ms);
                    tokio::time::sleep(delay).await;
                }
                self.dispatch_one(key, channel, &recipients).await;
                dispatched += 1;
            }
        }

        if dispatched > 0 {
            self.metrics.invalidate(campaign_id);
        }

        if self.sends.pending_count(campaign_id) == 0 {
            match self.service.mark_completed(campaign_id) {
                Ok(_) => Ok(CycleOutcome::Completed),
                // Raced with a concurrent pause/cancel; leave state alone.
                Err(OutreachError::InvalidState(_)) => Ok(CycleOutcome::NotSending),
                Err(e) => Err(e),
            }
        } else {
            info!(
                campaign_id = %campaign_id,
                dispatched,
                remaining = self.sends.pending_count(campaign_id),
                "Batch exhausted, requeueing"
            );
            Ok(CycleOutcome::Requeue { dispatched })
        }
    }

    /// Single send: render, one transport attempt under a hard timeout,
    /// then one atomic row write. Per-recipient failures are recorded as
    /// terminal and never abort the batch.
    async fn dispatch_one(
        &self,
        key: &outreach_core::SendKey,
        channel: Channel,
        recipients: &HashMap<Uuid, Recipient>,
    ) {
        let Some(row) = self.sends.get(key) else {
            return;
        };
        // A cancel between the batch claim and this attempt already
        // failed the row; leave it alone.
        if row.state != SendState::Pending {
            return;
        }

        let recipient = recipients.get(&key.recipient_id).cloned().unwrap_or_else(|| {
            let mut bare = Recipient {
                id: key.recipient_id,
                attributes: HashMap::new(),
                email: None,
                phone: None,
                group_jid: None,
            };
            match channel {
                Channel::Email => bare.email = Some(row.destination.clone()),
                Channel::WhatsApp => bare.phone = Some(row.destination.clone()),
                Channel::WhatsAppGroup => bare.group_jid = Some(row.destination.clone()),
            }
            bare
        });

        let content = match self.renderer.render(channel, &recipient) {
            Ok(content) => content,
            Err(e) => {
                self.record_failure(key, channel, &format!("render failed: {e}"));
                return;
            }
        };

        let transport = self.transports.for_channel(channel);
        let attempt = tokio::time::timeout(
            Duration::from_millis(self.config.send_timeout_ms),
            transport.send(&row.destination, &content),
        )
        .await;

        match attempt {
            Ok(SendOutcome::Accepted { .. }) => {
                // Only a still-pending row moves to sent; a cancel that
                // landed while the transport call was in flight keeps the
                // row failed.
                let result = self.sends.update(key, |s| {
                    if s.state == SendState::Pending {
                        s.state = SendState::Sent;
                        s.sent_at = Some(Utc::now());
                    }
                });
                if matches!(result, Ok(ref updated) if updated.state == SendState::Sent) {
                    metrics::counter!("dispatch.sends", "channel" => channel.as_str())
                        .increment(1);
                }
            }
            Ok(SendOutcome::Rejected { reason }) => {
                self.record_failure(key, channel, &reason);
            }
            Err(_) => {
                self.record_failure(key, channel, "transport send timed out");
            }
        }
    }

    fn record_failure(&self, key: &outreach_core::SendKey, channel: Channel, reason: &str) {
        warn!(
            campaign_id = %key.campaign_id,
            recipient_id = %key.recipient_id,
            channel = channel.as_str(),
            reason,
            "Send failed"
        );
        let _ = self.sends.update(key, |s| {
            if s.state == SendState::Pending {
                s.state = SendState::Failed;
                s.failure_reason = Some(reason.to_string());
            }
        });
        metrics::counter!("dispatch.failures", "channel" => channel.as_str()).increment(1);
    }

    fn sample_delay(&self, min_ms: u64, max_ms: u64) -> Duration {
        let (lo, hi) = if min_ms <= max_ms {
            (min_ms, max_ms)
        } else {
            (max_ms, min_ms)
        };
        let ms = if lo == hi {
            lo
        } else {
            rand::thread_rng().gen_range(lo..=hi)
        };
        Duration::from_millis(ms)
    }
}

/// Randomized human-pacing applies to WhatsApp channels only.
fn paced_channel(channel: Channel) -> bool {
    matches!(channel, Channel::WhatsApp | Channel::WhatsAppGroup)
}

/// Claim marker keeping dispatch runs exclusive per campaign. Dropped at
/// the end of the cycle, including on early error returns.
struct RunGuard<'a> {
    active: &'a DashMap<Uuid, ()>,
    campaign_id: Uuid,
}

impl<'a> RunGuard<'a> {
    fn claim(active: &'a DashMap<Uuid, ()>, campaign_id: Uuid) -> Option<Self> {
        match active.entry(campaign_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                Some(Self {
                    active,
                    campaign_id,
                })
            }
        }
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.campaign_id);
    }
}
