//! On-demand email engagement statistics computed from send rows.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Timelike;
use outreach_core::types::{Channel, SendState};
use outreach_core::SendStore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlCount {
    pub url: String,
    pub clicks: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailStatistics {
    pub campaign_id: Uuid,
    pub total: u64,
    pub pending: u64,
    pub sent: u64,
    pub opened: u64,
    pub clicked: u64,
    pub failed: u64,
    pub open_rate: f64,
    pub click_rate: f64,
    pub click_to_open_rate: f64,
    /// Most-clicked target URLs, descending, capped at 10.
    pub top_clicked_urls: Vec<UrlCount>,
    /// Open events bucketed by UTC hour of day.
    pub hourly_opens: [u64; 24],
}

/// Pure read over all email-channel rows of a campaign.
pub fn email_statistics(sends: &Arc<SendStore>, campaign_id: Uuid) -> EmailStatistics {
    let rows: Vec<_> = sends
        .for_campaign(campaign_id)
        .into_iter()
        .filter(|s| s.channel == Channel::Email)
        .collect();

    let count = |state: SendState| rows.iter().filter(|r| r.state == state).count() as u64;
    let pending = count(SendState::Pending);
    let sent = count(SendState::Sent);
    let opened = count(SendState::Opened);
    let clicked = count(SendState::Clicked);
    let failed = count(SendState::Failed);
    let delivered = sent + opened + clicked;
    let opened_or_beyond = opened + clicked;

    let mut url_counts: HashMap<String, u64> = HashMap::new();
    let mut hourly_opens = [0u64; 24];
    for row in &rows {
        for click in &row.click_history {
            *url_counts.entry(click.url.clone()).or_default() += 1;
        }
        for open in &row.device_history {
            hourly_opens[open.occurred_at.hour() as usize] += 1;
        }
    }
    let mut top_clicked_urls: Vec<UrlCount> = url_counts
        .into_iter()
        .map(|(url, clicks)| UrlCount { url, clicks })
        .collect();
    top_clicked_urls.sort_by(|a, b| b.clicks.cmp(&a.clicks).then(a.url.cmp(&b.url)));
    top_clicked_urls.truncate(10);

    let ratio = |n: u64, d: u64| if d == 0 { 0.0 } else { n as f64 / d as f64 };

    EmailStatistics {
        campaign_id,
        total: rows.len() as u64,
        pending,
        sent,
        opened,
        clicked,
        failed,
        open_rate: ratio(opened_or_beyond, delivered),
        click_rate: ratio(clicked, delivered),
        click_to_open_rate: ratio(clicked, opened_or_beyond),
        top_clicked_urls,
        hourly_opens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use outreach_core::types::{CampaignSend, ClickEvent, EngagementEvent};
    use outreach_core::SendKey;

    fn add_row(sends: &Arc<SendStore>, campaign: Uuid, channel: Channel, state: SendState) -> SendKey {
        let send = CampaignSend::new(
            campaign,
            Uuid::new_v4(),
            channel,
            "r@example.com".to_string(),
            None,
        );
        let key = SendKey::of(&send);
        sends.insert_if_absent(send);
        sends.update(&key, |s| s.state = state).unwrap();
        key
    }

    #[test]
    fn test_statistics_rates_and_rollups() {
        let sends = Arc::new(SendStore::new());
        let campaign = Uuid::new_v4();

        add_row(&sends, campaign, Channel::Email, SendState::Sent);
        add_row(&sends, campaign, Channel::Email, SendState::Opened);
        let clicked = add_row(&sends, campaign, Channel::Email, SendState::Clicked);
        add_row(&sends, campaign, Channel::Email, SendState::Failed);
        // Non-email rows are excluded from email statistics.
        add_row(&sends, campaign, Channel::WhatsApp, SendState::Sent);

        let ten_am = Utc.with_ymd_and_hms(2026, 7, 14, 10, 30, 0).unwrap();
        sends
            .update(&clicked, |s| {
                s.device_history.push(EngagementEvent {
                    occurred_at: ten_am,
                    user_agent: None,
                    ip: None,
                });
                for url in ["https://a.example", "https://a.example", "https://b.example"] {
                    s.click_history.push(ClickEvent {
                        occurred_at: ten_am,
                        url: url.to_string(),
                        user_agent: None,
                        ip: None,
                    });
                }
            })
            .unwrap();

        let stats = email_statistics(&sends, campaign);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.opened, 1);
        assert_eq!(stats.clicked, 1);
        assert_eq!(stats.failed, 1);
        // 3 delivered, 2 opened-or-beyond, 1 clicked.
        assert!((stats.open_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((stats.click_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((stats.click_to_open_rate - 0.5).abs() < 1e-9);

        assert_eq!(stats.top_clicked_urls[0].url, "https://a.example");
        assert_eq!(stats.top_clicked_urls[0].clicks, 2);
        assert_eq!(stats.hourly_opens[10], 1);
        assert_eq!(stats.hourly_opens.iter().sum::<u64>(), 1);
    }

    #[test]
    fn test_empty_campaign_statistics() {
        let sends = Arc::new(SendStore::new());
        let stats = email_statistics(&sends, Uuid::new_v4());
        assert_eq!(stats.total, 0);
        assert_eq!(stats.open_rate, 0.0);
        assert!(stats.top_clicked_urls.is_empty());
    }
}
