//! Collaborator seams the engine depends on: transports, the template
//! renderer, and audience sources. Each trait ships with an in-memory
//! fake usable from tests and the demo binary.

use crate::error::{OutreachError, OutreachResult};
use crate::types::{Channel, Group, Recipient, RenderedMessage, SendOutcome};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Outbound delivery provider for one channel. The core makes exactly one
/// `send` attempt per row; retries, backoff, and idempotency keys are the
/// provider's concern.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, destination: &str, content: &RenderedMessage) -> SendOutcome;

    /// Group metadata lookup for group-capable transports. Default: none.
    async fn fetch_group(&self, _jid: &str) -> Option<Group> {
        None
    }
}

/// Black-box template renderer: `render(recipient) -> content`. The core
/// never inspects template internals.
pub trait Renderer: Send + Sync {
    fn render(&self, channel: Channel, recipient: &Recipient) -> OutreachResult<RenderedMessage>;
}

/// Resolves audiences: static segments by id, or the full recipient pool
/// for filter-tree evaluation.
pub trait AudienceSource: Send + Sync {
    fn segment_members(&self, segment_id: Uuid) -> Vec<Recipient>;
    fn all_recipients(&self) -> Vec<Recipient>;
}

/// One transport per channel.
#[derive(Clone)]
pub struct TransportRegistry {
    email: Arc<dyn Transport>,
    whatsapp: Arc<dyn Transport>,
    whatsapp_group: Arc<dyn Transport>,
}

impl TransportRegistry {
    pub fn new(
        email: Arc<dyn Transport>,
        whatsapp: Arc<dyn Transport>,
        whatsapp_group: Arc<dyn Transport>,
    ) -> Self {
        Self {
            email,
            whatsapp,
            whatsapp_group,
        }
    }

    /// A registry routing every channel to the same transport. Handy for
    /// tests and the demo binary.
    pub fn uniform(transport: Arc<dyn Transport>) -> Self {
        Self {
            email: transport.clone(),
            whatsapp: transport.clone(),
            whatsapp_group: transport,
        }
    }

    pub fn for_channel(&self, channel: Channel) -> Arc<dyn Transport> {
        match channel {
            Channel::Email => self.email.clone(),
            Channel::WhatsApp => self.whatsapp.clone(),
            Channel::WhatsAppGroup => self.whatsapp_group.clone(),
        }
    }
}

/// Record of one delivery attempt observed by [`CaptureTransport`].
#[derive(Debug, Clone)]
pub struct CapturedSend {
    pub destination: String,
    pub content: RenderedMessage,
}

/// In-memory transport that records every send for assertions.
/// Destinations registered via [`fail_destination`](Self::fail_destination)
/// are rejected with the given reason.
#[derive(Default)]
pub struct CaptureTransport {
    sent: Mutex<Vec<CapturedSend>>,
    failing: Mutex<HashSet<String>>,
    failure_reason: Mutex<String>,
    groups: DashMap<String, Group>,
}

impl CaptureTransport {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            failure_reason: Mutex::new("provider rejected".to_string()),
            groups: DashMap::new(),
        }
    }

    pub fn fail_destination(&self, destination: &str, reason: &str) {
        self.failing
            .lock()
            .expect("capture transport mutex poisoned")
            .insert(destination.to_string());
        *self
            .failure_reason
            .lock()
            .expect("capture transport mutex poisoned") = reason.to_string();
    }

    pub fn register_group(&self, group: Group) {
        self.groups.insert(group.jid.clone(), group);
    }

    pub fn sent(&self) -> Vec<CapturedSend> {
        self.sent
            .lock()
            .expect("capture transport mutex poisoned")
            .clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent
            .lock()
            .expect("capture transport mutex poisoned")
            .len()
    }
}

#[async_trait]
impl Transport for CaptureTransport {
    async fn send(&self, destination: &str, content: &RenderedMessage) -> SendOutcome {
        let rejected = self
            .failing
            .lock()
            .expect("capture transport mutex poisoned")
            .contains(destination);
        if rejected {
            let reason = self
                .failure_reason
                .lock()
                .expect("capture transport mutex poisoned")
                .clone();
            return SendOutcome::Rejected { reason };
        }
        self.sent
            .lock()
            .expect("capture transport mutex poisoned")
            .push(CapturedSend {
                destination: destination.to_string(),
                content: content.clone(),
            });
        SendOutcome::Accepted {
            provider_message_id: Some(Uuid::new_v4().to_string()),
        }
    }

    async fn fetch_group(&self, jid: &str) -> Option<Group> {
        self.groups.get(jid).map(|g| g.clone())
    }
}

/// Renderer that returns a fixed message per channel, with the recipient
/// id stamped into the body so tests can tell renders apart.
pub struct StaticRenderer {
    pub email_subject: String,
    pub body: String,
}

impl StaticRenderer {
    pub fn new(email_subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            email_subject: email_subject.into(),
            body: body.into(),
        }
    }
}

impl Renderer for StaticRenderer {
    fn render(&self, channel: Channel, recipient: &Recipient) -> OutreachResult<RenderedMessage> {
        let subject = match channel {
            Channel::Email => Some(self.email_subject.clone()),
            Channel::WhatsApp | Channel::WhatsAppGroup => None,
        };
        Ok(RenderedMessage {
            subject,
            body: format!("{} [{}]", self.body, recipient.id),
        })
    }
}

/// Renderer that fails for every recipient, for exercising per-row error
/// handling in dispatch tests.
pub struct FailingRenderer;

impl Renderer for FailingRenderer {
    fn render(&self, _channel: Channel, recipient: &Recipient) -> OutreachResult<RenderedMessage> {
        Err(OutreachError::Validation(format!(
            "no template for recipient {}",
            recipient.id
        )))
    }
}

/// In-memory audience source: a flat recipient pool plus named segments.
#[derive(Default)]
pub struct InMemoryAudience {
    pool: Mutex<Vec<Recipient>>,
    segments: DashMap<Uuid, Vec<Recipient>>,
}

impl InMemoryAudience {
    pub fn new(pool: Vec<Recipient>) -> Self {
        Self {
            pool: Mutex::new(pool),
            segments: DashMap::new(),
        }
    }

    pub fn add_segment(&self, segment_id: Uuid, members: Vec<Recipient>) {
        self.segments.insert(segment_id, members);
    }
}

impl AudienceSource for InMemoryAudience {
    fn segment_members(&self, segment_id: Uuid) -> Vec<Recipient> {
        self.segments
            .get(&segment_id)
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    fn all_recipients(&self) -> Vec<Recipient> {
        self.pool
            .lock()
            .expect("audience pool mutex poisoned")
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_recipient() -> Recipient {
        Recipient {
            id: Uuid::new_v4(),
            attributes: Default::default(),
            email: Some("r@example.com".to_string()),
            phone: None,
            group_jid: None,
        }
    }

    #[tokio::test]
    async fn test_capture_transport_records_and_fails() {
        let transport = CaptureTransport::new();
        transport.fail_destination("blocked@example.com", "hard bounce");
        let message = RenderedMessage {
            subject: None,
            body: "hello".to_string(),
        };

        let ok = transport.send("r@example.com", &message).await;
        assert!(matches!(ok, SendOutcome::Accepted { .. }));

        let rejected = transport.send("blocked@example.com", &message).await;
        match rejected {
            SendOutcome::Rejected { reason } => assert_eq!(reason, "hard bounce"),
            other => panic!("expected rejection, got {other:?}"),
        }

        assert_eq!(transport.sent_count(), 1);
        assert_eq!(transport.sent()[0].destination, "r@example.com");
    }

    #[tokio::test]
    async fn test_group_lookup() {
        let transport = CaptureTransport::new();
        transport.register_group(Group {
            jid: "12036304@g.us".to_string(),
            name: "Leads".to_string(),
            participant_count: 57,
        });

        let group = transport.fetch_group("12036304@g.us").await.unwrap();
        assert_eq!(group.participant_count, 57);
        assert!(transport.fetch_group("missing@g.us").await.is_none());
    }

    #[test]
    fn test_static_renderer_subject_per_channel() {
        let renderer = StaticRenderer::new("July offers", "Hi there");
        let recipient = make_recipient();

        let email = renderer.render(Channel::Email, &recipient).unwrap();
        assert_eq!(email.subject.as_deref(), Some("July offers"));

        let wa = renderer.render(Channel::WhatsApp, &recipient).unwrap();
        assert!(wa.subject.is_none());
        assert!(wa.body.contains(&recipient.id.to_string()));
    }
}
