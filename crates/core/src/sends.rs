//! In-memory store for `CampaignSend` rows backed by DashMap.
//!
//! Production: replace with PostgreSQL (sqlx) or similar ACID store. The
//! API surface is the same for development and testing: every mutation
//! goes through a single-row read-modify-write under the entry lock, so
//! concurrent writers to the same row are serialized while independent
//! rows stay parallel.

use crate::error::{OutreachError, OutreachResult};
use crate::types::{CampaignSend, Channel, SendState};
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

/// Identity of a send row: one per (campaign, recipient, channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SendKey {
    pub campaign_id: Uuid,
    pub recipient_id: Uuid,
    pub channel: Channel,
}

impl SendKey {
    pub fn of(send: &CampaignSend) -> Self {
        Self {
            campaign_id: send.campaign_id,
            recipient_id: send.recipient_id,
            channel: send.channel,
        }
    }
}

/// Thread-safe store for send rows with a tracking-id lookup index.
pub struct SendStore {
    sends: DashMap<SendKey, CampaignSend>,
    tracking_index: DashMap<String, SendKey>,
}

impl SendStore {
    pub fn new() -> Self {
        Self {
            sends: DashMap::new(),
            tracking_index: DashMap::new(),
        }
    }

    /// Insert a row unless one already exists for the same
    /// (campaign, recipient, channel). Returns `true` if inserted.
    ///
    /// This is the uniqueness guard that makes campaign start idempotent:
    /// re-materializing after a crash never duplicates rows.
    pub fn insert_if_absent(&self, send: CampaignSend) -> bool {
        let key = SendKey::of(&send);
        match self.sends.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                if let Some(tid) = &send.tracking_id {
                    self.tracking_index.insert(tid.clone(), key);
                }
                slot.insert(send);
                true
            }
        }
    }

    pub fn get(&self, key: &SendKey) -> Option<CampaignSend> {
        self.sends.get(key).map(|r| r.value().clone())
    }

    /// Apply a single atomic read-modify-write to one row. The closure
    /// runs under the entry lock; the updated row is returned.
    pub fn update<F>(&self, key: &SendKey, f: F) -> OutreachResult<CampaignSend>
    where
        F: FnOnce(&mut CampaignSend),
    {
        let mut entry = self.sends.get_mut(key).ok_or_else(|| {
            OutreachError::NotFound(format!(
                "send ({}, {}, {})",
                key.campaign_id,
                key.recipient_id,
                key.channel.as_str()
            ))
        })?;
        f(entry.value_mut());
        Ok(entry.value().clone())
    }

    /// Resolve a tracking id and atomically update the row it points to.
    pub fn update_by_tracking_id<F>(&self, tracking_id: &str, f: F) -> OutreachResult<CampaignSend>
    where
        F: FnOnce(&mut CampaignSend),
    {
        let key = *self
            .tracking_index
            .get(tracking_id)
            .ok_or_else(|| OutreachError::NotFound(format!("tracking id {tracking_id}")))?;
        self.update(&key, f)
    }

    /// Up to `limit` pending rows for one campaign channel, FIFO by
    /// creation time. Returns keys; the caller finalizes each row through
    /// [`update`](Self::update).
    pub fn pending_batch(&self, campaign_id: Uuid, channel: Channel, limit: usize) -> Vec<SendKey> {
        let mut batch: Vec<(chrono::DateTime<chrono::Utc>, SendKey)> = self
            .sends
            .iter()
            .filter(|r| {
                let s = r.value();
                s.campaign_id == campaign_id
                    && s.channel == channel
                    && s.state == SendState::Pending
            })
            .map(|r| (r.value().created_at, *r.key()))
            .collect();
        batch.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.recipient_id.cmp(&b.1.recipient_id)));
        batch.truncate(limit);
        batch.into_iter().map(|(_, k)| k).collect()
    }

    /// All rows for a campaign, in no particular order.
    pub fn for_campaign(&self, campaign_id: Uuid) -> Vec<CampaignSend> {
        self.sends
            .iter()
            .filter(|r| r.value().campaign_id == campaign_id)
            .map(|r| r.value().clone())
            .collect()
    }

    pub fn pending_count(&self, campaign_id: Uuid) -> usize {
        self.count_in_state(campaign_id, SendState::Pending)
    }

    pub fn count_in_state(&self, campaign_id: Uuid, state: SendState) -> usize {
        self.sends
            .iter()
            .filter(|r| r.value().campaign_id == campaign_id && r.value().state == state)
            .count()
    }

    /// Bulk-fail every still-pending row of a campaign. Used by cancel;
    /// rows already sent/opened/clicked are untouched. Returns the number
    /// of rows failed.
    pub fn fail_pending(&self, campaign_id: Uuid, reason: &str) -> usize {
        let mut failed = 0;
        for mut entry in self.sends.iter_mut() {
            let send = entry.value_mut();
            if send.campaign_id == campaign_id && send.state == SendState::Pending {
                send.state = SendState::Failed;
                send.failure_reason = Some(reason.to_string());
                failed += 1;
            }
        }
        debug!(campaign_id = %campaign_id, failed, reason, "Bulk-failed pending sends");
        failed
    }

    /// Bulk-remove every row of a campaign, including tracking index
    /// entries. Rows are never deleted individually; this is the
    /// retention-window cleanup path.
    pub fn purge_campaign(&self, campaign_id: Uuid) -> usize {
        self.tracking_index
            .retain(|_, key| key.campaign_id != campaign_id);
        let before = self.sends.len();
        self.sends.retain(|_, send| send.campaign_id != campaign_id);
        before - self.sends.len()
    }

    pub fn len(&self) -> usize {
        self.sends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sends.is_empty()
    }
}

impl Default for SendStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_send(campaign: Uuid, recipient: Uuid, channel: Channel) -> CampaignSend {
        CampaignSend::new(
            campaign,
            recipient,
            channel,
            "dest@example.com".to_string(),
            Some(format!("tid-{recipient}")),
        )
    }

    #[test]
    fn test_insert_if_absent_is_idempotent() {
        let store = SendStore::new();
        let campaign = Uuid::new_v4();
        let recipient = Uuid::new_v4();

        assert!(store.insert_if_absent(make_send(campaign, recipient, Channel::Email)));
        assert!(!store.insert_if_absent(make_send(campaign, recipient, Channel::Email)));
        // Same recipient on a different channel is a distinct row.
        assert!(store.insert_if_absent(make_send(campaign, recipient, Channel::WhatsApp)));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_pending_batch_fifo_and_limit() {
        let store = SendStore::new();
        let campaign = Uuid::new_v4();
        let mut created = Vec::new();
        for _ in 0..5 {
            let recipient = Uuid::new_v4();
            let mut send = make_send(campaign, recipient, Channel::WhatsApp);
            send.tracking_id = None;
            created.push(send.created_at);
            store.insert_if_absent(send);
        }

        let batch = store.pending_batch(campaign, Channel::WhatsApp, 2);
        assert_eq!(batch.len(), 2);

        // Marking a batch sent shrinks the next claim.
        for key in &batch {
            store
                .update(key, |s| s.state = SendState::Sent)
                .unwrap();
        }
        assert_eq!(store.pending_batch(campaign, Channel::WhatsApp, 10).len(), 3);
        assert_eq!(store.pending_count(campaign), 3);
    }

    #[test]
    fn test_update_by_tracking_id() {
        let store = SendStore::new();
        let campaign = Uuid::new_v4();
        let recipient = Uuid::new_v4();
        store.insert_if_absent(make_send(campaign, recipient, Channel::Email));

        let updated = store
            .update_by_tracking_id(&format!("tid-{recipient}"), |s| s.open_count += 1)
            .unwrap();
        assert_eq!(updated.open_count, 1);

        let missing = store.update_by_tracking_id("tid-unknown", |_| {});
        assert!(matches!(missing, Err(OutreachError::NotFound(_))));
    }

    #[test]
    fn test_fail_pending_leaves_sent_rows() {
        let store = SendStore::new();
        let campaign = Uuid::new_v4();
        let mut keys = Vec::new();
        for _ in 0..5 {
            let send = make_send(campaign, Uuid::new_v4(), Channel::WhatsApp);
            keys.push(SendKey::of(&send));
            store.insert_if_absent(send);
        }
        for key in keys.iter().take(2) {
            store.update(key, |s| s.state = SendState::Sent).unwrap();
        }

        let failed = store.fail_pending(campaign, "cancelled");
        assert_eq!(failed, 3);
        assert_eq!(store.count_in_state(campaign, SendState::Sent), 2);
        assert_eq!(store.count_in_state(campaign, SendState::Failed), 3);
        let failed_row = store
            .for_campaign(campaign)
            .into_iter()
            .find(|s| s.state == SendState::Failed)
            .unwrap();
        assert_eq!(failed_row.failure_reason.as_deref(), Some("cancelled"));
    }

    #[test]
    fn test_purge_campaign_clears_index() {
        let store = SendStore::new();
        let campaign = Uuid::new_v4();
        let recipient = Uuid::new_v4();
        store.insert_if_absent(make_send(campaign, recipient, Channel::Email));

        assert_eq!(store.purge_campaign(campaign), 1);
        assert!(store.is_empty());
        assert!(store
            .update_by_tracking_id(&format!("tid-{recipient}"), |_| {})
            .is_err());
    }
}
