//! Engagement tracking: open-pixel and click-redirect event processing.
//!
//! Events arrive from email clients and browsers, possibly duplicated and
//! out of order (prefetching proxies hit the pixel repeatedly). Each
//! handler therefore performs exactly one atomic read-modify-write on the
//! send row, and the merge only ever moves state forward.

use std::sync::Arc;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::Utc;
use outreach_core::types::{ClickEvent, EngagementEvent, RequestContext, SendState};
use outreach_core::{OutreachError, OutreachResult, SendStore};
use outreach_metrics::MetricsService;
use tracing::debug;

/// 1x1 transparent GIF served on every pixel request, resolvable
/// tracking id or not.
pub const TRACKING_PIXEL: [u8; 43] = [
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

pub struct TrackingService {
    sends: Arc<SendStore>,
    metrics: Arc<MetricsService>,
}

impl TrackingService {
    pub fn new(sends: Arc<SendStore>, metrics: Arc<MetricsService>) -> Self {
        Self { sends, metrics }
    }

    /// The pixel bytes. The HTTP layer serves these regardless of whether
    /// the tracking id resolved.
    pub fn pixel() -> &'static [u8] {
        &TRACKING_PIXEL
    }

    /// Record an open event. Duplicate hits keep incrementing
    /// `open_count` (real clients prefetch); `opened_at` and the
    /// canonical device are first-write-wins, and state only advances
    /// from pending/sent, never down from clicked.
    ///
    /// `NotFound` is for the caller to log; tracking must still degrade
    /// to serving the pixel.
    pub fn track_open(&self, tracking_id: &str, ctx: &RequestContext) -> OutreachResult<()> {
        let now = Utc::now();
        let updated = self.sends.update_by_tracking_id(tracking_id, |send| {
            send.open_count += 1;
            let event = EngagementEvent {
                occurred_at: now,
                user_agent: ctx.user_agent.clone(),
                ip: ctx.ip.clone(),
            };
            if send.canonical_device.is_none() {
                send.canonical_device = Some(event.clone());
            }
            send.device_history.push(event);
            if send.opened_at.is_none() {
                send.opened_at = Some(now);
            }
            if SendState::Opened.rank() > send.state.rank() {
                send.state = SendState::Opened;
            }
        })?;

        metrics::counter!("tracking.opens").increment(1);
        debug!(
            campaign_id = %updated.campaign_id,
            recipient_id = %updated.recipient_id,
            open_count = updated.open_count,
            "Open tracked"
        );
        self.metrics.invalidate(updated.campaign_id);
        Ok(())
    }

    /// Record a click and return the decoded redirect target. Decoding
    /// happens before any mutation: a malformed payload returns
    /// `InvalidUrl` and leaves the row untouched. A click implies an
    /// open, so `opened_at` is backfilled when no open was recorded.
    pub fn track_click(
        &self,
        tracking_id: &str,
        encoded_url: &str,
        ctx: &RequestContext,
    ) -> OutreachResult<String> {
        let url = decode_target_url(encoded_url)?;

        let now = Utc::now();
        let updated = self.sends.update_by_tracking_id(tracking_id, |send| {
            send.click_count += 1;
            send.first_click_at.get_or_insert(now);
            send.last_click_at = Some(now);
            if send.opened_at.is_none() {
                send.opened_at = Some(now);
            }
            if !send.state.is_terminal() {
                send.state = SendState::Clicked;
            }
            send.click_history.push(ClickEvent {
                occurred_at: now,
                url: url.clone(),
                user_agent: ctx.user_agent.clone(),
                ip: ctx.ip.clone(),
            });
        })?;

        metrics::counter!("tracking.clicks").increment(1);
        debug!(
            campaign_id = %updated.campaign_id,
            recipient_id = %updated.recipient_id,
            url = %url,
            "Click tracked"
        );
        self.metrics.invalidate(updated.campaign_id);
        Ok(url)
    }
}

fn decode_target_url(encoded: &str) -> OutreachResult<String> {
    let bytes = STANDARD
        .decode(encoded)
        .or_else(|_| URL_SAFE_NO_PAD.decode(encoded))
        .map_err(|_| OutreachError::InvalidUrl(format!("undecodable payload: {encoded}")))?;
    String::from_utf8(bytes)
        .map_err(|_| OutreachError::InvalidUrl("payload is not valid UTF-8".to_string()))
}
