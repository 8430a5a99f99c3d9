//! Fetch orchestration across both providers.
//!
//! One cycle partitions the requested lines by provider, answers each side
//! from cache when possible, fetches the rest concurrently through the retry
//! policy, and merges DETRO results ahead of Rio results before overlap
//! resolution. Cache writes happen only after all calls of a side have
//! joined, so an aborted cycle never persists partial data.

use std::sync::Arc;
use std::time::Instant;

use common::{
    DetroParams, Direction, LineSet, ProviderKind, ProviderParams, VehiclePosition,
};
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::cache::{CacheManager, CacheTier, LineLookup};
use crate::catalog::LineCatalog;
use crate::overlap;
use crate::provider::{DetroSource, RioSource};
use crate::retry::{RetryOutcome, RetryPolicy};

/// How one provider's share of a cycle was answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceReport {
    /// No requested line belongs to this provider.
    NotRequested,
    Cached { tier: CacheTier, vehicles: usize },
    /// Network fetch; `failed_calls` counts calls that exhausted their retries.
    Fetched { vehicles: usize, failed_calls: usize },
}

impl SourceReport {
    pub fn vehicles(&self) -> usize {
        match self {
            SourceReport::NotRequested => 0,
            SourceReport::Cached { vehicles, .. } | SourceReport::Fetched { vehicles, .. } => {
                *vehicles
            }
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, SourceReport::Fetched { failed_calls, .. } if *failed_calls > 0)
    }
}

#[derive(Debug, Clone)]
pub struct FetchCycle {
    pub positions: Vec<VehiclePosition>,
    /// Some upstream call failed after all retries.
    pub degraded: bool,
    pub detro: SourceReport,
    pub rio: SourceReport,
}

impl FetchCycle {
    fn empty() -> Self {
        Self {
            positions: Vec::new(),
            degraded: false,
            detro: SourceReport::NotRequested,
            rio: SourceReport::NotRequested,
        }
    }
}

#[derive(Debug, Default)]
struct Targets {
    detro: Vec<(String, DetroParams)>,
    rio: Vec<String>,
}

pub struct FleetOrchestrator<D, R> {
    catalog: Arc<LineCatalog>,
    cache: Arc<CacheManager>,
    detro: Arc<D>,
    rio: Arc<R>,
    retry: RetryPolicy,
}

impl<D: DetroSource, R: RioSource> FleetOrchestrator<D, R> {
    pub fn new(
        catalog: Arc<LineCatalog>,
        cache: Arc<CacheManager>,
        detro: Arc<D>,
        rio: Arc<R>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            catalog,
            cache,
            detro,
            rio,
            retry,
        }
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn catalog(&self) -> &LineCatalog {
        &self.catalog
    }

    /// Merged, overlap-resolved positions for `lines`.
    pub async fn fetch(&self, lines: &LineSet) -> Vec<VehiclePosition> {
        self.fetch_cycle(lines).await.positions
    }

    pub async fn fetch_cycle(&self, lines: &LineSet) -> FetchCycle {
        if lines.is_empty() {
            return FetchCycle::empty();
        }

        let started = Instant::now();
        let targets = self.partition(lines);

        let ((detro_positions, detro), (rio_positions, rio)) = tokio::join!(
            self.fetch_detro(&targets.detro),
            self.fetch_rio(&targets.rio)
        );

        let mut merged = detro_positions;
        merged.extend(rio_positions);
        let positions = overlap::resolve(merged);
        let degraded = detro.is_degraded() || rio.is_degraded();

        info!(
            lines = lines.len(),
            vehicles = positions.len(),
            detro = ?detro,
            rio = ?rio,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fetch cycle complete"
        );

        FetchCycle {
            positions,
            degraded,
            detro,
            rio,
        }
    }

    /// Download the full Rio feed into the global snapshot. Returns whether a
    /// snapshot was stored.
    pub async fn prefetch_global(&self) -> bool {
        let started = Instant::now();
        match self.retry.execute("rio global", || self.rio.fetch_all()).await {
            RetryOutcome::Succeeded { value, .. } => {
                let count = value.len();
                let stored = self.cache.store_global(value);
                info!(
                    records = count,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Global snapshot prefetch finished"
                );
                stored
            }
            RetryOutcome::Exhausted { last_error, .. } => {
                warn!("Global snapshot prefetch failed: {}", last_error);
                false
            }
        }
    }

    pub fn shutdown(&self) {
        self.cache.shutdown();
    }

    /// Lines missing from the catalog go to Rio.
    fn partition(&self, lines: &LineSet) -> Targets {
        let mut targets = Targets::default();
        for line in lines {
            match self.catalog.resolve(line).map(|cfg| &cfg.params) {
                Ok(ProviderParams::Detro(params)) => {
                    targets.detro.push((line.clone(), params.clone()));
                }
                Ok(ProviderParams::Rio(_)) => targets.rio.push(line.clone()),
                Err(_) => {
                    debug!(line = %line, "Line not in catalog, assuming Rio");
                    targets.rio.push(line.clone());
                }
            }
        }
        targets
    }

    async fn fetch_detro(&self, targets: &[(String, DetroParams)]) -> (Vec<VehiclePosition>, SourceReport) {
        if targets.is_empty() {
            return (Vec::new(), SourceReport::NotRequested);
        }

        let lines: LineSet = targets.iter().map(|(line, _)| line.clone()).collect();
        if let LineLookup::Hit { tier, entry } = self.cache.lookup_lines(ProviderKind::Detro, &lines).await {
            debug!(tier = ?tier, vehicles = entry.positions.len(), "DETRO served from cache");
            let vehicles = entry.positions.len();
            return (entry.positions.as_ref().clone(), SourceReport::Cached { tier, vehicles });
        }

        let calls = targets.iter().flat_map(|(line, params)| {
            Direction::BOTH.into_iter().map(move |direction| {
                let label = format!("detro {} {}", line, direction.label());
                async move {
                    self.retry
                        .execute(&label, || self.detro.fetch_direction(line, params, direction))
                        .await
                }
            })
        });
        let outcomes = join_all(calls).await;

        let mut positions = Vec::new();
        let mut failed_calls = 0;
        for outcome in outcomes {
            match outcome.ok() {
                Some(batch) => positions.extend(batch),
                None => failed_calls += 1,
            }
        }

        if failed_calls > 0 {
            warn!(failed_calls, lines = lines.len(), "Some DETRO calls failed");
        }
        let vehicles = positions.len();
        self.cache
            .store_lines(ProviderKind::Detro, positions.clone(), lines)
            .await;

        (positions, SourceReport::Fetched { vehicles, failed_calls })
    }

    async fn fetch_rio(&self, lines: &[String]) -> (Vec<VehiclePosition>, SourceReport) {
        if lines.is_empty() {
            return (Vec::new(), SourceReport::NotRequested);
        }

        let line_set: LineSet = lines.iter().cloned().collect();

        match self.cache.lookup_global(&line_set) {
            Some(global) => {
                if global.needs_refresh {
                    debug!(age_secs = global.age.as_secs(), "Global snapshot aging, refreshing in background");
                    self.refresh_global_in_background();
                }
                let vehicles = global.positions.len();
                return (
                    global.positions,
                    SourceReport::Cached {
                        tier: CacheTier::GlobalSnapshot,
                        vehicles,
                    },
                );
            }
            // Missing or expired: rebuild it alongside this line fetch.
            None => self.refresh_global_in_background(),
        }

        if let LineLookup::Hit { tier, entry } = self.cache.lookup_lines(ProviderKind::Rio, &line_set).await {
            debug!(tier = ?tier, vehicles = entry.positions.len(), "Rio served from cache");
            let vehicles = entry.positions.len();
            return (entry.positions.as_ref().clone(), SourceReport::Cached { tier, vehicles });
        }

        let outcome = self
            .retry
            .execute("rio lines", || self.rio.fetch_lines(lines))
            .await;

        match outcome {
            RetryOutcome::Succeeded { value, .. } => {
                let positions = rio_client::to_positions(&value);
                let vehicles = positions.len();
                self.cache
                    .store_lines(ProviderKind::Rio, positions.clone(), line_set)
                    .await;
                (positions, SourceReport::Fetched { vehicles, failed_calls: 0 })
            }
            RetryOutcome::Exhausted { last_error, attempts } => {
                warn!(attempts, "Rio fetch failed: {}", last_error);
                (Vec::new(), SourceReport::Fetched { vehicles: 0, failed_calls: 1 })
            }
        }
    }

    fn refresh_global_in_background(&self) {
        let rio = Arc::clone(&self.rio);
        let retry = self.retry.clone();
        self.cache.spawn_global_refresh(async move {
            match retry.execute("rio global", || rio.fetch_all()).await {
                RetryOutcome::Succeeded { value, .. } => Ok(value),
                RetryOutcome::Exhausted { last_error, .. } => Err(last_error),
            }
        });
    }
}
