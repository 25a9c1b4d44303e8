use serde::Deserialize;

use crate::{OutreachError, OutreachResult};

/// Root application configuration. Loaded from environment variables
/// with the prefix `OUTREACH__` and optional config files.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub metrics: MetricsCacheConfig,
}

/// Dispatch worker defaults. Campaigns may override batch sizes and delay
/// bounds per channel; unset campaign settings fall back to these.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_batch_size_email")]
    pub default_batch_size_email: usize,
    #[serde(default = "default_batch_size_whatsapp")]
    pub default_batch_size_whatsapp: usize,
    #[serde(default = "default_batch_size_whatsapp_group")]
    pub default_batch_size_whatsapp_group: usize,
    /// Inter-message delay bounds for WhatsApp pacing, milliseconds.
    #[serde(default = "default_min_delay_ms")]
    pub default_min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub default_max_delay_ms: u64,
    /// Hard timeout on a single transport attempt. A timeout is recorded
    /// as a terminal send failure, not retried.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsCacheConfig {
    /// How long a computed metric snapshot stays fresh without an
    /// explicit invalidation.
    #[serde(default = "default_metrics_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_batch_size_email() -> usize {
    500
}
fn default_batch_size_whatsapp() -> usize {
    30
}
fn default_batch_size_whatsapp_group() -> usize {
    10
}
fn default_min_delay_ms() -> u64 {
    3000
}
fn default_max_delay_ms() -> u64 {
    8000
}
fn default_send_timeout_ms() -> u64 {
    15_000
}
fn default_metrics_ttl_secs() -> u64 {
    60
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_batch_size_email: default_batch_size_email(),
            default_batch_size_whatsapp: default_batch_size_whatsapp(),
            default_batch_size_whatsapp_group: default_batch_size_whatsapp_group(),
            default_min_delay_ms: default_min_delay_ms(),
            default_max_delay_ms: default_max_delay_ms(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

impl Default for MetricsCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_metrics_ttl_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            dispatch: DispatchConfig::default(),
            metrics: MetricsCacheConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> OutreachResult<Self> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("OUTREACH")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder
            .build()
            .map_err(|e| OutreachError::Config(e.to_string()))?;
        config
            .try_deserialize()
            .map_err(|e| OutreachError::Config(e.to_string()))
    }
}
