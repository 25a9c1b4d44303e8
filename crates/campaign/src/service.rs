//! Campaign lifecycle orchestration: validation, audience resolution,
//! idempotent send materialization, and the pause/resume/cancel flows.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use outreach_audience::FilterEvaluator;
use outreach_core::collaborators::AudienceSource;
use outreach_core::config::DispatchConfig;
use outreach_core::types::{CampaignSend, Channel, Recipient};
use outreach_core::{OutreachError, OutreachResult, SendStore};
use outreach_metrics::{ComparisonReport, MetricsService};
use tracing::{info, warn};
use uuid::Uuid;

use crate::model::{AudienceDescriptor, Campaign, CampaignSpec, CampaignState, ChannelSettings};
use crate::state_machine::CampaignStateMachine;

pub struct CampaignService {
    campaigns: DashMap<Uuid, Campaign>,
    sends: Arc<SendStore>,
    audience: Arc<dyn AudienceSource>,
    evaluator: FilterEvaluator,
    metrics: Arc<MetricsService>,
    machine: CampaignStateMachine,
    dispatch_defaults: DispatchConfig,
}

impl CampaignService {
    pub fn new(
        sends: Arc<SendStore>,
        audience: Arc<dyn AudienceSource>,
        evaluator: FilterEvaluator,
        metrics: Arc<MetricsService>,
        dispatch_defaults: DispatchConfig,
    ) -> Self {
        Self {
            campaigns: DashMap::new(),
            sends,
            audience,
            evaluator,
            metrics,
            machine: CampaignStateMachine::new(),
            dispatch_defaults,
        }
    }

    pub fn get(&self, id: Uuid) -> OutreachResult<Campaign> {
        self.campaigns
            .get(&id)
            .map(|c| c.clone())
            .ok_or_else(|| OutreachError::NotFound(format!("campaign {id}")))
    }

    pub fn list(&self) -> Vec<Campaign> {
        let mut campaigns: Vec<Campaign> =
            self.campaigns.iter().map(|c| c.value().clone()).collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        campaigns
    }

    /// Create a draft campaign. When any channel is enabled the spec must
    /// carry an audience descriptor and a template per enabled channel.
    /// A bound audience seeds the `total_recipients` metric snapshot.
    pub fn create(&self, spec: CampaignSpec) -> OutreachResult<Campaign> {
        self.validate_spec(&spec)?;

        let now = Utc::now();
        let mut settings = spec.settings;
        for &channel in &spec.channels {
            settings
                .entry(channel)
                .or_insert_with(|| ChannelSettings::defaults_for(channel, &self.dispatch_defaults));
        }

        let campaign = Campaign {
            id: Uuid::new_v4(),
            name: spec.name,
            state: CampaignState::Draft,
            channels: spec.channels,
            audience: spec.audience,
            templates: spec.templates,
            settings,
            scheduled_at: spec.scheduled_at,
            created_at: now,
            updated_at: now,
        };

        self.seed_audience_snapshot(&campaign);
        info!(campaign_id = %campaign.id, name = %campaign.name, "Campaign created");
        self.campaigns.insert(campaign.id, campaign.clone());
        Ok(campaign)
    }

    /// Update campaign configuration. Only permitted in draft, scheduled,
    /// or paused; a changed audience descriptor recomputes the
    /// recipient-count snapshot.
    pub fn update(&self, id: Uuid, spec: CampaignSpec) -> OutreachResult<Campaign> {
        self.validate_spec(&spec)?;

        let mut entry = self
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| OutreachError::NotFound(format!("campaign {id}")))?;
        let campaign = entry.value_mut();
        if !matches!(
            campaign.state,
            CampaignState::Draft | CampaignState::Scheduled | CampaignState::Paused
        ) {
            return Err(OutreachError::InvalidState(format!(
                "campaign {id} cannot be edited while {:?}",
                campaign.state
            )));
        }

        let audience_changed = serde_json::to_value(&campaign.audience)?
            != serde_json::to_value(&spec.audience)?;

        campaign.name = spec.name;
        campaign.channels = spec.channels;
        campaign.audience = spec.audience;
        campaign.templates = spec.templates;
        for &channel in &campaign.channels {
            let configured = spec.settings.get(&channel).copied();
            campaign.settings.insert(
                channel,
                configured.unwrap_or_else(|| {
                    ChannelSettings::defaults_for(channel, &self.dispatch_defaults)
                }),
            );
        }
        campaign.scheduled_at = spec.scheduled_at;
        campaign.updated_at = Utc::now();

        let updated = campaign.clone();
        drop(entry);

        if audience_changed {
            self.seed_audience_snapshot(&updated);
        }
        Ok(updated)
    }

    /// Move a draft campaign onto the schedule.
    pub fn schedule(&self, id: Uuid, at: DateTime<Utc>) -> OutreachResult<Campaign> {
        self.with_campaign(id, |campaign, machine| {
            campaign.state = machine.transition(campaign.state, CampaignState::Scheduled)?;
            campaign.scheduled_at = Some(at);
            Ok(())
        })
    }

    /// Start dispatching: precondition checks, audience resolution, and
    /// idempotent materialization of one send row per (recipient, enabled
    /// channel) with a destination. Returns the sending campaign; the
    /// caller enqueues the dispatch worker.
    ///
    /// Re-invoking start on a campaign already `sending` (e.g. after a
    /// crash mid-materialization) re-runs the upsert without duplicating
    /// rows and without a state transition.
    pub fn start(&self, id: Uuid) -> OutreachResult<Campaign> {
        let campaign = self.get(id)?;

        if campaign.channels.is_empty() {
            return Err(OutreachError::Validation(format!(
                "campaign {id} has no enabled channel"
            )));
        }
        for &channel in &campaign.channels {
            if !campaign.templates.contains_key(&channel) {
                return Err(OutreachError::Validation(format!(
                    "campaign {id} has no template for channel {}",
                    channel.as_str()
                )));
            }
        }

        let recipients = self.resolve_audience(&campaign)?;
        if recipients.is_empty() {
            return Err(OutreachError::Validation(format!(
                "campaign {id} resolves to an empty audience"
            )));
        }

        if campaign.state != CampaignState::Sending {
            self.with_campaign(id, |c, machine| {
                c.state = machine.transition(c.state, CampaignState::Sending)?;
                Ok(())
            })?;
        }

        let mut materialized = 0usize;
        let mut skipped = 0usize;
        for recipient in &recipients {
            for &channel in &campaign.channels {
                let Some(destination) = recipient.destination(channel) else {
                    skipped += 1;
                    continue;
                };
                let tracking_id = match channel {
                    Channel::Email => Some(Uuid::new_v4().simple().to_string()),
                    _ => None,
                };
                let send = CampaignSend::new(
                    id,
                    recipient.id,
                    channel,
                    destination.to_string(),
                    tracking_id,
                );
                if self.sends.insert_if_absent(send) {
                    materialized += 1;
                }
            }
        }

        self.metrics.seed_total_recipients(id, recipients.len() as u64);
        info!(
            campaign_id = %id,
            recipients = recipients.len(),
            materialized,
            skipped,
            "Campaign started"
        );
        self.get(id)
    }

    pub fn pause(&self, id: Uuid) -> OutreachResult<Campaign> {
        let paused = self.with_campaign(id, |campaign, machine| {
            campaign.state = machine.transition(campaign.state, CampaignState::Paused)?;
            Ok(())
        })?;
        info!(campaign_id = %id, "Campaign paused");
        Ok(paused)
    }

    /// Resume a paused campaign. The caller re-enqueues the dispatch
    /// worker afterwards.
    pub fn resume(&self, id: Uuid) -> OutreachResult<Campaign> {
        let resumed = self.with_campaign(id, |campaign, machine| {
            campaign.state = machine.transition(campaign.state, CampaignState::Sending)?;
            Ok(())
        })?;
        info!(campaign_id = %id, "Campaign resumed");
        Ok(resumed)
    }

    /// Cancel from any non-terminal state. Still-pending sends become
    /// terminal failures with reason "cancelled"; rows already
    /// sent/opened/clicked are untouched.
    pub fn cancel(&self, id: Uuid) -> OutreachResult<Campaign> {
        let cancelled = self.with_campaign(id, |campaign, machine| {
            campaign.state = machine.transition(campaign.state, CampaignState::Cancelled)?;
            Ok(())
        })?;
        let failed = self.sends.fail_pending(id, "cancelled");
        self.metrics.invalidate(id);
        info!(campaign_id = %id, failed_pending = failed, "Campaign cancelled");
        Ok(cancelled)
    }

    /// Called by the dispatch worker when no pending sends remain.
    pub fn mark_completed(&self, id: Uuid) -> OutreachResult<Campaign> {
        let completed = self.with_campaign(id, |campaign, machine| {
            campaign.state = machine.transition(campaign.state, CampaignState::Completed)?;
            Ok(())
        })?;
        info!(campaign_id = %id, "Campaign completed");
        Ok(completed)
    }

    /// New draft copying configuration only: no send rows, no metric
    /// history beyond a freshly computed `total_recipients`.
    pub fn duplicate(&self, id: Uuid) -> OutreachResult<Campaign> {
        let source = self.get(id)?;
        let now = Utc::now();
        let copy = Campaign {
            id: Uuid::new_v4(),
            name: format!("{} (copy)", source.name),
            state: CampaignState::Draft,
            channels: source.channels.clone(),
            audience: source.audience.clone(),
            templates: source.templates.clone(),
            settings: source.settings.clone(),
            scheduled_at: None,
            created_at: now,
            updated_at: now,
        };
        self.seed_audience_snapshot(&copy);
        info!(campaign_id = %copy.id, source_id = %id, "Campaign duplicated");
        self.campaigns.insert(copy.id, copy.clone());
        Ok(copy)
    }

    /// Resolve the campaign's audience to concrete recipients.
    pub fn resolve_audience(&self, campaign: &Campaign) -> OutreachResult<Vec<Recipient>> {
        match &campaign.audience {
            None => Ok(Vec::new()),
            Some(AudienceDescriptor::Segment { segment_id }) => {
                Ok(self.audience.segment_members(*segment_id))
            }
            Some(AudienceDescriptor::Manual { filter }) => {
                let pool = self.audience.all_recipients();
                Ok(self.evaluator.evaluate(&pool, filter))
            }
        }
    }

    /// Audience-size preview without materializing records.
    pub fn audience_preview_count(&self, descriptor: &AudienceDescriptor) -> usize {
        match descriptor {
            AudienceDescriptor::Segment { segment_id } => {
                self.audience.segment_members(*segment_id).len()
            }
            AudienceDescriptor::Manual { filter } => {
                let pool = self.audience.all_recipients();
                self.evaluator.count(&pool, filter)
            }
        }
    }

    /// Rate comparison against up to 5 prior completed campaigns sharing
    /// this campaign's enabled-channel set.
    pub fn compare(&self, id: Uuid) -> OutreachResult<Option<ComparisonReport>> {
        let campaign = self.get(id)?;
        let mut channel_set: Vec<Channel> = campaign.channels.clone();
        channel_set.sort_by_key(|c| c.as_str());

        let mut prior: Vec<Campaign> = self
            .campaigns
            .iter()
            .filter(|c| {
                let candidate = c.value();
                if candidate.id == id || candidate.state != CampaignState::Completed {
                    return false;
                }
                let mut candidate_channels = candidate.channels.clone();
                candidate_channels.sort_by_key(|c| c.as_str());
                candidate_channels == channel_set
            })
            .map(|c| c.value().clone())
            .collect();
        prior.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let prior_ids: Vec<Uuid> = prior.iter().take(5).map(|c| c.id).collect();

        Ok(self.metrics.compare(id, &prior_ids))
    }

    fn validate_spec(&self, spec: &CampaignSpec) -> OutreachResult<()> {
        if spec.name.trim().is_empty() {
            return Err(OutreachError::Validation("campaign name is empty".into()));
        }
        if !spec.channels.is_empty() {
            if spec.audience.is_none() {
                return Err(OutreachError::Validation(
                    "an audience (segment or filter) is required when a channel is enabled".into(),
                ));
            }
            for &channel in &spec.channels {
                if !spec.templates.contains_key(&channel) {
                    return Err(OutreachError::Validation(format!(
                        "missing template for enabled channel {}",
                        channel.as_str()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Snapshot `total_recipients` for a bound audience: a segment
    /// reference, or a manual filter with at least one condition.
    fn seed_audience_snapshot(&self, campaign: &Campaign) {
        let descriptor = match &campaign.audience {
            Some(d @ AudienceDescriptor::Segment { .. }) => d,
            Some(d @ AudienceDescriptor::Manual { filter }) if !filter.is_empty() => d,
            _ => return,
        };
        let count = self.audience_preview_count(descriptor);
        if count == 0 {
            warn!(campaign_id = %campaign.id, "Audience currently resolves to zero recipients");
        }
        self.metrics
            .seed_total_recipients(campaign.id, count as u64);
    }

    fn with_campaign<F>(&self, id: Uuid, f: F) -> OutreachResult<Campaign>
    where
        F: FnOnce(&mut Campaign, &CampaignStateMachine) -> OutreachResult<()>,
    {
        let mut entry = self
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| OutreachError::NotFound(format!("campaign {id}")))?;
        let campaign = entry.value_mut();
        f(campaign, &self.machine)?;
        campaign.updated_at = Utc::now();
        Ok(campaign.clone())
    }
}
