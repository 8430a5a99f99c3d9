//! Application configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::NetworkQuality;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Lines to track at startup.
    #[serde(default)]
    pub lines: Vec<String>,

    /// Intermunicipal (DETRO) upstream.
    #[serde(default)]
    pub detro: DetroConfig,

    /// Municipal upstream and its edge proxy.
    #[serde(default)]
    pub rio: RioConfig,

    /// Cache windows and persistence.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Retry policy for upstream calls.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Poll intervals per network quality.
    #[serde(default)]
    pub polling: PollingConfig,

    /// Static resource overrides.
    #[serde(default)]
    pub catalog: CatalogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetroConfig {
    #[serde(default = "default_detro_base_url")]
    pub base_url: String,

    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RioConfig {
    /// Edge proxy accepting `?linha=a,b,c`.
    #[serde(default = "default_rio_proxy_url")]
    pub base_url: String,

    /// Unfiltered all-lines feed used for the global snapshot.
    #[serde(default = "default_rio_snapshot_url")]
    pub snapshot_url: String,

    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,

    /// The unfiltered feed is large and slow; it gets its own timeout.
    #[serde(default = "default_snapshot_timeout")]
    pub snapshot_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Age under which cached data is served without a refresh.
    #[serde(default = "default_fresh_window")]
    pub fresh_window_secs: u64,

    /// Age beyond which cached data is discarded.
    #[serde(default = "default_stale_window")]
    pub stale_window_secs: u64,

    /// Directory for the per-provider disk cache files.
    #[serde(default = "default_cache_dir")]
    pub dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after failed attempt n is `n * base_delay_ms`.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_retryable_statuses")]
    pub retryable_statuses: Vec<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_wifi_interval")]
    pub wifi_interval_secs: u64,

    #[serde(default = "default_cellular_good_interval")]
    pub cellular_good_interval_secs: u64,

    #[serde(default = "default_cellular_poor_interval")]
    pub cellular_poor_interval_secs: u64,

    #[serde(default = "default_offline_interval")]
    pub offline_interval_secs: u64,

    /// Pin the network quality instead of deriving it from cycle latency.
    #[serde(default)]
    pub network_quality: Option<NetworkQuality>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Line catalog JSON; the bundled copy is used when unset.
    #[serde(default)]
    pub path: Option<String>,

    /// Route shapes JSON; the bundled copy is used when unset.
    #[serde(default)]
    pub route_shapes_path: Option<String>,
}

impl CacheConfig {
    pub fn fresh_window(&self) -> Duration {
        Duration::from_secs(self.fresh_window_secs)
    }

    pub fn stale_window(&self) -> Duration {
        Duration::from_secs(self.stale_window_secs)
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

// ── Defaults ──────────────────────────────────────────────────────────

fn default_detro_base_url() -> String {
    "https://appbus.exall-host.com.br".into()
}
fn default_rio_proxy_url() -> String {
    "https://busapp.thiago-info-2c9.workers.dev".into()
}
fn default_rio_snapshot_url() -> String {
    "https://dados.mobilidade.rio/gps/sppo".into()
}
fn default_request_timeout() -> u64 {
    15
}
fn default_snapshot_timeout() -> u64 {
    90
}

fn default_fresh_window() -> u64 {
    30
}
fn default_stale_window() -> u64 {
    300
}
fn default_cache_dir() -> String {
    "cache/bus_data".into()
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_retryable_statuses() -> Vec<u16> {
    vec![502, 503]
}

fn default_wifi_interval() -> u64 {
    8
}
fn default_cellular_good_interval() -> u64 {
    10
}
fn default_cellular_poor_interval() -> u64 {
    20
}
fn default_offline_interval() -> u64 {
    60
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            lines: Vec::new(),
            detro: DetroConfig::default(),
            rio: RioConfig::default(),
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
            polling: PollingConfig::default(),
            catalog: CatalogConfig::default(),
        }
    }
}

impl Default for DetroConfig {
    fn default() -> Self {
        Self {
            base_url: default_detro_base_url(),
            timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for RioConfig {
    fn default() -> Self {
        Self {
            base_url: default_rio_proxy_url(),
            snapshot_url: default_rio_snapshot_url(),
            timeout_secs: default_request_timeout(),
            snapshot_timeout_secs: default_snapshot_timeout(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fresh_window_secs: default_fresh_window(),
            stale_window_secs: default_stale_window(),
            dir: default_cache_dir(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            retryable_statuses: default_retryable_statuses(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            wifi_interval_secs: default_wifi_interval(),
            cellular_good_interval_secs: default_cellular_good_interval(),
            cellular_poor_interval_secs: default_cellular_poor_interval(),
            offline_interval_secs: default_offline_interval(),
            network_quality: None,
        }
    }
}
