//! Metric aggregation for campaigns: full-recompute snapshots, realtime
//! throughput/ETA, and cross-campaign comparison.

pub mod aggregate;

pub use aggregate::{
    CampaignMetric, ChannelBreakdown, ComparisonReport, Eta, MetricsService, RealtimeMetrics,
};
