//! Campaign aggregate types: lifecycle state, audience descriptor, and
//! per-channel dispatch settings.

use chrono::{DateTime, Utc};
use outreach_audience::FilterGroup;
use outreach_core::config::DispatchConfig;
use outreach_core::types::Channel;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CampaignState {
    Draft,
    Scheduled,
    Sending,
    Paused,
    Completed,
    Cancelled,
}

impl CampaignState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CampaignState::Completed | CampaignState::Cancelled)
    }
}

/// Exactly one of: a static segment reference, or a user-authored filter
/// tree over the recipient pool. The enum makes the XOR structural.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum AudienceDescriptor {
    Segment { segment_id: Uuid },
    Manual { filter: FilterGroup },
}

/// Per-channel batch size and pacing bounds. Delay bounds only apply to
/// WhatsApp channels; email ignores them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChannelSettings {
    pub batch_size: usize,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl ChannelSettings {
    pub fn defaults_for(channel: Channel, config: &DispatchConfig) -> Self {
        let batch_size = match channel {
            Channel::Email => config.default_batch_size_email,
            Channel::WhatsApp => config.default_batch_size_whatsapp,
            Channel::WhatsAppGroup => config.default_batch_size_whatsapp_group,
        };
        Self {
            batch_size,
            min_delay_ms: config.default_min_delay_ms,
            max_delay_ms: config.default_max_delay_ms,
        }
    }
}

/// A configured outbound messaging run across one or more channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    pub state: CampaignState,
    pub channels: Vec<Channel>,
    pub audience: Option<AudienceDescriptor>,
    /// Template reference per enabled channel. The renderer resolves
    /// these; the core never inspects template contents.
    pub templates: HashMap<Channel, Uuid>,
    pub settings: HashMap<Channel, ChannelSettings>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn settings_for(&self, channel: Channel, config: &DispatchConfig) -> ChannelSettings {
        self.settings
            .get(&channel)
            .copied()
            .unwrap_or_else(|| ChannelSettings::defaults_for(channel, config))
    }
}

/// Create/update request for a campaign.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignSpec {
    pub name: String,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub audience: Option<AudienceDescriptor>,
    #[serde(default)]
    pub templates: HashMap<Channel, Uuid>,
    /// Per-channel overrides; unset channels fall back to config defaults.
    #[serde(default)]
    pub settings: HashMap<Channel, ChannelSettings>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}
