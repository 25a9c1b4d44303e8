//! Engagement tracking for email sends: open pixel, click redirect, and
//! on-demand statistics.

pub mod statistics;
pub mod tracking;

pub use statistics::{email_statistics, EmailStatistics, UrlCount};
pub use tracking::{TrackingService, TRACKING_PIXEL};
