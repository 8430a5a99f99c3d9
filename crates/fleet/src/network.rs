//! Network quality sampling and the poll interval it selects.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use common::config::PollingConfig;
use common::NetworkQuality;
use tracing::info;

/// Consecutive degraded, empty cycles before the link is treated as offline.
const OFFLINE_STREAK: u32 = 3;
const WIFI_LATENCY: Duration = Duration::from_millis(1500);
const CELLULAR_GOOD_LATENCY: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    pub wifi: Duration,
    pub cellular_good: Duration,
    pub cellular_poor: Duration,
    pub offline: Duration,
}

impl PollIntervals {
    pub fn from_config(config: &PollingConfig) -> Self {
        Self {
            wifi: Duration::from_secs(config.wifi_interval_secs),
            cellular_good: Duration::from_secs(config.cellular_good_interval_secs),
            cellular_poor: Duration::from_secs(config.cellular_poor_interval_secs),
            offline: Duration::from_secs(config.offline_interval_secs),
        }
    }

    pub fn for_quality(&self, quality: NetworkQuality) -> Duration {
        match quality {
            NetworkQuality::Wifi => self.wifi,
            NetworkQuality::CellularGood => self.cellular_good,
            NetworkQuality::CellularPoor => self.cellular_poor,
            NetworkQuality::Offline => self.offline,
        }
    }
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self::from_config(&PollingConfig::default())
    }
}

/// What one fetch cycle looked like from the network's point of view.
#[derive(Debug, Clone, Copy)]
pub struct CycleSignal {
    pub latency: Duration,
    /// At least one provider exhausted its retries.
    pub degraded: bool,
    pub vehicles: usize,
}

pub trait NetworkProbe: Send + Sync + 'static {
    fn quality(&self) -> NetworkQuality;

    /// Called after every completed cycle.
    fn observe(&self, _signal: &CycleSignal) {}
}

/// Always reports the same quality.
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe(pub NetworkQuality);

impl NetworkProbe for FixedProbe {
    fn quality(&self) -> NetworkQuality {
        self.0
    }
}

/// Derives quality from cycle latency and upstream failures.
#[derive(Debug)]
pub struct AdaptiveProbe {
    state: Mutex<AdaptiveState>,
}

#[derive(Debug)]
struct AdaptiveState {
    quality: NetworkQuality,
    degraded_streak: u32,
}

impl AdaptiveProbe {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AdaptiveState {
                quality: NetworkQuality::CellularGood,
                degraded_streak: 0,
            }),
        }
    }
}

impl Default for AdaptiveProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkProbe for AdaptiveProbe {
    fn quality(&self) -> NetworkQuality {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).quality
    }

    fn observe(&self, signal: &CycleSignal) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if signal.degraded && signal.vehicles == 0 {
            state.degraded_streak += 1;
        } else {
            state.degraded_streak = 0;
        }

        let quality = if state.degraded_streak >= OFFLINE_STREAK {
            NetworkQuality::Offline
        } else if signal.degraded {
            NetworkQuality::CellularPoor
        } else if signal.latency < WIFI_LATENCY {
            NetworkQuality::Wifi
        } else if signal.latency < CELLULAR_GOOD_LATENCY {
            NetworkQuality::CellularGood
        } else {
            NetworkQuality::CellularPoor
        };

        if quality != state.quality {
            info!(from = ?state.quality, to = ?quality, "Network quality changed");
            state.quality = quality;
        }
    }
}

/// Fixed probe when the config pins a quality, adaptive otherwise.
pub fn probe_from_config(config: &PollingConfig) -> Arc<dyn NetworkProbe> {
    match config.network_quality {
        Some(quality) => Arc::new(FixedProbe(quality)),
        None => Arc::new(AdaptiveProbe::new()),
    }
}
