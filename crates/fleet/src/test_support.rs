//! Fake providers with call counters.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::config::RetryConfig;
use common::{
    now_millis, DetroParams, Direction, Error, ProviderKind, VehicleClass, VehiclePosition,
};
use rio_client::{filter_records, RioRecord};

use crate::cache::{CacheManager, CacheWindows};
use crate::catalog::LineCatalog;
use crate::orchestrator::FleetOrchestrator;
use crate::provider::{DetroSource, RioSource};
use crate::retry::RetryPolicy;

fn unavailable(provider: ProviderKind) -> Error {
    Error::Transient {
        provider,
        status: Some(503),
        message: "Service Unavailable".into(),
    }
}

/// Returns one vehicle per (line, direction) call.
#[derive(Default)]
pub struct FakeDetro {
    pub calls: AtomicUsize,
    pub failing: AtomicBool,
}

#[async_trait]
impl DetroSource for FakeDetro {
    async fn fetch_direction(
        &self,
        line_id: &str,
        _params: &DetroParams,
        direction: Direction,
    ) -> Result<Vec<VehiclePosition>, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(unavailable(ProviderKind::Detro));
        }

        let sentido = f64::from(direction.sentido());
        Ok(vec![VehiclePosition {
            id: format!("{}-{}", line_id, direction.label()),
            line_id: line_id.to_string(),
            lat: -22.88 - 0.01 * sentido,
            lng: -43.11,
            speed_kmh: 35.0,
            vehicle_class: VehicleClass::Intermunicipal,
            direction: Some(direction),
            observed_at: now_millis(),
        }])
    }
}

/// Serves a fixed feed, filtering line requests the way the edge proxy does.
#[derive(Default)]
pub struct FakeRio {
    pub line_calls: AtomicUsize,
    pub all_calls: AtomicUsize,
    pub failing: AtomicBool,
    /// Fails only the all-lines feed.
    pub global_failing: AtomicBool,
    /// Number of upcoming line calls to fail before recovering.
    pub fail_next: AtomicUsize,
    records: Vec<RioRecord>,
    requested: Mutex<Vec<Vec<String>>>,
}

impl FakeRio {
    pub fn with_records(records: Vec<RioRecord>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }

    pub fn requested(&self) -> Vec<Vec<String>> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl RioSource for FakeRio {
    async fn fetch_lines(&self, lines: &[String]) -> Result<Vec<RioRecord>, Error> {
        self.line_calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push(lines.to_vec());
        let fail_once = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail_once || self.failing.load(Ordering::SeqCst) {
            return Err(unavailable(ProviderKind::Rio));
        }
        Ok(filter_records(&self.records, lines))
    }

    async fn fetch_all(&self) -> Result<Vec<RioRecord>, Error> {
        self.all_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) || self.global_failing.load(Ordering::SeqCst) {
            return Err(unavailable(ProviderKind::Rio));
        }
        Ok(self.records.clone())
    }
}

pub fn rio_record(id: &str, line: &str, lat: f64, lng: f64) -> RioRecord {
    RioRecord {
        id: id.into(),
        line: line.into(),
        lat,
        lng,
        speed_kmh: 18.0,
    }
}

/// Bundled catalog, memory-only cache, retries without delay.
pub fn orchestrator(
    detro: Arc<FakeDetro>,
    rio: Arc<FakeRio>,
    windows: CacheWindows,
) -> FleetOrchestrator<FakeDetro, FakeRio> {
    orchestrator_with_backoff(detro, rio, windows, 0)
}

pub fn orchestrator_with_backoff(
    detro: Arc<FakeDetro>,
    rio: Arc<FakeRio>,
    windows: CacheWindows,
    base_delay_ms: u64,
) -> FleetOrchestrator<FakeDetro, FakeRio> {
    let retry = RetryPolicy::new(&RetryConfig {
        base_delay_ms,
        ..RetryConfig::default()
    });
    FleetOrchestrator::new(
        Arc::new(LineCatalog::bundled()),
        Arc::new(CacheManager::new(windows, None)),
        detro,
        rio,
        retry,
    )
}
