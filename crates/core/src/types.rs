//! Shared domain types: channels, recipients, send rows, engagement metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Messaging medium a campaign can dispatch over.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Channel {
    #[serde(rename = "email")]
    Email,
    #[serde(rename = "whatsapp")]
    WhatsApp,
    #[serde(rename = "whatsapp_group")]
    WhatsAppGroup,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Email, Channel::WhatsApp, Channel::WhatsAppGroup];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::WhatsApp => "whatsapp",
            Channel::WhatsAppGroup => "whatsapp_group",
        }
    }
}

/// A resolved audience member. Attributes back the filter evaluator; the
/// optional destinations decide which channels a recipient can receive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub id: Uuid,
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub group_jid: Option<String>,
}

impl Recipient {
    /// The delivery address for a channel, if the recipient has one.
    /// Empty strings count as missing.
    pub fn destination(&self, channel: Channel) -> Option<&str> {
        let dest = match channel {
            Channel::Email => self.email.as_deref(),
            Channel::WhatsApp => self.phone.as_deref(),
            Channel::WhatsAppGroup => self.group_jid.as_deref(),
        };
        dest.filter(|d| !d.is_empty())
    }
}

/// Rendered content handed to a transport. Subject is set for email,
/// absent for WhatsApp text messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub subject: Option<String>,
    pub body: String,
}

/// Outcome of a single transport attempt. The core makes exactly one
/// attempt per send; retries are the provider's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum SendOutcome {
    Accepted {
        provider_message_id: Option<String>,
    },
    Rejected {
        reason: String,
    },
}

/// WhatsApp group metadata, refreshed on demand from the transport.
/// Informational only; never authoritative beyond existence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub jid: String,
    pub name: String,
    pub participant_count: u32,
}

/// Per-send lifecycle state. Forward-only along
/// pending -> sent -> opened -> clicked; `Failed` is terminal and only
/// reachable from `Pending` (dispatch failure or campaign cancellation).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SendState {
    Pending,
    Sent,
    Opened,
    Clicked,
    Failed,
}

impl SendState {
    /// Position along the engagement progression. `Failed` sits outside
    /// the progression and compares as terminal.
    pub fn rank(&self) -> u8 {
        match self {
            SendState::Pending => 0,
            SendState::Sent => 1,
            SendState::Opened => 2,
            SendState::Clicked => 3,
            SendState::Failed => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SendState::Clicked | SendState::Failed)
    }
}

/// Caller context captured from an inbound tracking request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

/// One recorded open event (pixel hit).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementEvent {
    pub occurred_at: DateTime<Utc>,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

/// One recorded click event with the decoded target URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickEvent {
    pub occurred_at: DateTime<Utc>,
    pub url: String,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

/// One delivery unit: a (campaign, recipient, channel) row and its
/// engagement lifecycle. Created at campaign start, mutated by the
/// dispatch worker and the tracking service, never deleted individually.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignSend {
    pub campaign_id: Uuid,
    pub recipient_id: Uuid,
    pub channel: Channel,
    pub destination: String,
    pub state: SendState,
    /// Opaque id embedded in outbound email content; email channel only.
    pub tracking_id: Option<String>,
    pub open_count: u64,
    pub click_count: u64,
    pub sent_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub first_click_at: Option<DateTime<Utc>>,
    pub last_click_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    /// First device/IP ever seen on an open.
    pub canonical_device: Option<EngagementEvent>,
    pub device_history: Vec<EngagementEvent>,
    pub click_history: Vec<ClickEvent>,
    pub created_at: DateTime<Utc>,
}

impl CampaignSend {
    pub fn new(
        campaign_id: Uuid,
        recipient_id: Uuid,
        channel: Channel,
        destination: String,
        tracking_id: Option<String>,
    ) -> Self {
        Self {
            campaign_id,
            recipient_id,
            channel,
            destination,
            state: SendState::Pending,
            tracking_id,
            open_count: 0,
            click_count: 0,
            sent_at: None,
            opened_at: None,
            first_click_at: None,
            last_click_at: None,
            failure_reason: None,
            canonical_device: None,
            device_history: Vec::new(),
            click_history: Vec::new(),
            created_at: Utc::now(),
        }
    }
}
