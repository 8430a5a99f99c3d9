//! Three-tier position cache.
//!
//! - **Global snapshot** (Rio only): the unfiltered all-lines feed, valid for
//!   the stale window and filtered per request.
//! - **Memory**: one entry per provider, valid for the fresh window and only
//!   for the exact line set it was captured for.
//! - **Disk**: one JSON file per provider, read once per process to seed
//!   memory and rewritten after every successful refresh.
//!
//! Entries are `Arc`s replaced wholesale, so readers never see a half-written
//! entry.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::config::CacheConfig;
use common::{now_millis, Error, LineSet, ProviderKind, VehiclePosition};
use dashmap::{DashMap, DashSet};
use rio_client::{filter_records, RioRecord};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheWindows {
    /// Served without refresh below this age.
    pub fresh: Duration,
    /// Discarded at or beyond this age.
    pub stale: Duration,
}

impl CacheWindows {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            fresh: config.fresh_window(),
            stale: config.stale_window(),
        }
    }
}

impl Default for CacheWindows {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

/// Positions captured for one exact line set.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub positions: Arc<Vec<VehiclePosition>>,
    pub captured_at: DateTime<Utc>,
    pub line_set: LineSet,
}

impl CacheEntry {
    pub fn new(positions: Vec<VehiclePosition>, line_set: LineSet) -> Self {
        Self {
            positions: Arc::new(positions),
            captured_at: now_millis(),
            line_set,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        age_since(self.captured_at, now)
    }
}

/// On-disk form of a [`CacheEntry`].
#[derive(Debug, Serialize, Deserialize)]
struct DiskEntry {
    data: Vec<VehiclePosition>,
    /// Capture time, epoch milliseconds.
    timestamp: i64,
    lines: Vec<String>,
}

impl From<&CacheEntry> for DiskEntry {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            data: entry.positions.as_ref().clone(),
            timestamp: entry.captured_at.timestamp_millis(),
            lines: entry.line_set.iter().cloned().collect(),
        }
    }
}

impl DiskEntry {
    fn into_entry(self) -> Option<CacheEntry> {
        Some(CacheEntry {
            positions: Arc::new(self.data),
            captured_at: DateTime::from_timestamp_millis(self.timestamp)?,
            line_set: self.lines.into_iter().collect(),
        })
    }
}

/// Unfiltered capture of the whole Rio feed.
#[derive(Debug, Clone)]
pub struct GlobalSnapshot {
    pub records: Arc<Vec<RioRecord>>,
    pub captured_at: DateTime<Utc>,
}

impl GlobalSnapshot {
    pub fn new(records: Vec<RioRecord>) -> Self {
        Self {
            records: Arc::new(records),
            captured_at: now_millis(),
        }
    }

    /// Positions for `lines`, stamped with the capture time.
    pub fn filter(&self, lines: &LineSet) -> Vec<VehiclePosition> {
        filter_records(&self.records, lines)
            .iter()
            .map(|r| r.to_position(self.captured_at))
            .collect()
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        age_since(self.captured_at, now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    GlobalSnapshot,
    Memory,
    Disk,
}

#[derive(Debug, Clone)]
pub enum LineLookup {
    Hit { tier: CacheTier, entry: Arc<CacheEntry> },
    Miss,
}

/// A global-snapshot answer for one request.
#[derive(Debug, Clone)]
pub struct GlobalLookup {
    pub positions: Vec<VehiclePosition>,
    pub age: Duration,
    /// Older than the fresh window; the caller should start a background refresh.
    pub needs_refresh: bool,
}

pub struct CacheManager {
    windows: CacheWindows,
    dir: Option<PathBuf>,
    memory: DashMap<ProviderKind, Arc<CacheEntry>>,
    disk_seeded: DashSet<ProviderKind>,
    global: RwLock<Option<Arc<GlobalSnapshot>>>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
    refresh_in_flight: AtomicBool,
    refreshes: watch::Sender<u64>,
}

impl CacheManager {
    /// `dir: None` disables the disk tier.
    pub fn new(windows: CacheWindows, dir: Option<PathBuf>) -> Self {
        let (refreshes, _) = watch::channel(0);
        Self {
            windows,
            dir,
            memory: DashMap::new(),
            disk_seeded: DashSet::new(),
            global: RwLock::new(None),
            refresh_task: Mutex::new(None),
            refresh_in_flight: AtomicBool::new(false),
            refreshes,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        let dir = (!config.dir.trim().is_empty()).then(|| PathBuf::from(&config.dir));
        Self::new(CacheWindows::from_config(config), dir)
    }

    pub fn windows(&self) -> CacheWindows {
        self.windows
    }

    // ── Line-scoped tiers ─────────────────────────────────────────────

    /// Memory first, then (once per process, only while memory is empty) disk.
    pub async fn lookup_lines(&self, provider: ProviderKind, lines: &LineSet) -> LineLookup {
        let now = Utc::now();

        if let Some(entry) = self.memory_entry(provider) {
            if &entry.line_set == lines && entry.age(now) < self.windows.fresh {
                return LineLookup::Hit {
                    tier: CacheTier::Memory,
                    entry,
                };
            }
            return LineLookup::Miss;
        }

        if !self.disk_seeded.insert(provider) {
            return LineLookup::Miss;
        }

        let Some(entry) = self.read_disk(provider).await else {
            return LineLookup::Miss;
        };
        if entry.age(now) >= self.windows.stale {
            debug!(provider = %provider, "Disk cache older than stale window, ignoring");
            return LineLookup::Miss;
        }

        let entry = Arc::new(entry);
        // Keep the original capture time so the next lookup refreshes.
        self.install_entry(provider, Arc::clone(&entry));
        info!(
            provider = %provider,
            vehicles = entry.positions.len(),
            "Seeded memory cache from disk"
        );

        if &entry.line_set == lines {
            LineLookup::Hit {
                tier: CacheTier::Disk,
                entry,
            }
        } else {
            LineLookup::Miss
        }
    }

    /// Replace the provider's memory entry and persist it. Empty results are
    /// never stored.
    pub async fn store_lines(
        &self,
        provider: ProviderKind,
        positions: Vec<VehiclePosition>,
        lines: LineSet,
    ) -> Option<Arc<CacheEntry>> {
        if positions.is_empty() {
            debug!(provider = %provider, "Not caching empty result");
            return None;
        }

        let entry = Arc::new(CacheEntry::new(positions, lines));
        self.install_entry(provider, Arc::clone(&entry));
        self.disk_seeded.insert(provider);

        if let Err(e) = self.write_disk(provider, &entry).await {
            warn!(provider = %provider, "Disk cache write failed: {}", e);
        }
        Some(entry)
    }

    pub fn install_entry(&self, provider: ProviderKind, entry: Arc<CacheEntry>) {
        self.memory.insert(provider, entry);
    }

    pub fn memory_entry(&self, provider: ProviderKind) -> Option<Arc<CacheEntry>> {
        self.memory.get(&provider).map(|e| Arc::clone(e.value()))
    }

    fn disk_path(&self, provider: ProviderKind) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("{}_bus_cache.json", provider.as_str())))
    }

    async fn read_disk(&self, provider: ProviderKind) -> Option<CacheEntry> {
        let path = self.disk_path(provider)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No disk cache");
                return None;
            }
            Err(e) => {
                warn!(path = %path.display(), "Disk cache unreadable: {}", e);
                return None;
            }
        };

        match serde_json::from_slice::<DiskEntry>(&bytes) {
            Ok(disk) => match disk.into_entry() {
                Some(entry) if entry.captured_at > Utc::now() => {
                    warn!(path = %path.display(), "Disk cache timestamp is in the future, ignoring");
                    None
                }
                Some(entry) => Some(entry),
                None => {
                    warn!(path = %path.display(), "Disk cache has an invalid timestamp");
                    None
                }
            },
            Err(e) => {
                warn!(path = %path.display(), "Disk cache corrupt, ignoring: {}", e);
                None
            }
        }
    }

    async fn write_disk(&self, provider: ProviderKind, entry: &CacheEntry) -> Result<(), Error> {
        let Some(path) = self.disk_path(provider) else {
            return Ok(());
        };
        let bytes = serde_json::to_vec(&DiskEntry::from(entry))?;
        write_atomic(&path, &bytes)
            .await
            .map_err(|e| Error::DiskCache(format!("{}: {}", path.display(), e)))?;
        debug!(path = %path.display(), vehicles = entry.positions.len(), "Disk cache written");
        Ok(())
    }

    // ── Global snapshot ───────────────────────────────────────────────

    /// Filtered answer from the global snapshot, if one exists inside the
    /// stale window.
    pub fn lookup_global(&self, lines: &LineSet) -> Option<GlobalLookup> {
        let snapshot = self.global_snapshot()?;
        let age = snapshot.age(Utc::now());
        if age >= self.windows.stale {
            return None;
        }
        Some(GlobalLookup {
            positions: snapshot.filter(lines),
            age,
            needs_refresh: age >= self.windows.fresh,
        })
    }

    /// Replace the global snapshot. Empty feeds are ignored.
    pub fn store_global(&self, records: Vec<RioRecord>) -> bool {
        if records.is_empty() {
            return false;
        }
        self.install_global(GlobalSnapshot::new(records));
        true
    }

    pub fn install_global(&self, snapshot: GlobalSnapshot) {
        let mut guard = self.global.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(Arc::new(snapshot));
    }

    pub fn global_snapshot(&self) -> Option<Arc<GlobalSnapshot>> {
        self.global
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run `fetch` in a detached task and store its result as the global
    /// snapshot. Returns `false` if a refresh is already running.
    pub fn spawn_global_refresh<F>(self: &Arc<Self>, fetch: F) -> bool
    where
        F: Future<Output = Result<Vec<RioRecord>, Error>> + Send + 'static,
    {
        if self.refresh_in_flight.swap(true, Ordering::AcqRel) {
            debug!("Global refresh already in flight");
            return false;
        }

        let cache = Arc::clone(self);
        let handle = tokio::spawn(async move {
            match fetch.await {
                Ok(records) => {
                    let count = records.len();
                    if cache.store_global(records) {
                        info!(records = count, "Global snapshot refreshed");
                    } else {
                        warn!("Global refresh returned no vehicles, keeping previous snapshot");
                    }
                }
                Err(e) => warn!("Global refresh failed: {}", e),
            }
            cache.refresh_in_flight.store(false, Ordering::Release);
            cache.refreshes.send_modify(|n| *n += 1);
        });

        *self
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        true
    }

    /// Counter bumped after every background refresh completes.
    pub fn subscribe_refreshes(&self) -> watch::Receiver<u64> {
        self.refreshes.subscribe()
    }

    /// Abort a pending background refresh. A later refresh may start again.
    pub fn shutdown(&self) {
        if let Some(handle) = self
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        self.refresh_in_flight.store(false, Ordering::Release);
    }
}

fn age_since(captured_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - captured_at).to_std().unwrap_or(Duration::ZERO)
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{line_set, VehicleClass};
    use tempfile::TempDir;

    fn position(id: &str, line: &str) -> VehiclePosition {
        VehiclePosition {
            id: id.into(),
            line_id: line.into(),
            lat: -22.903_512_345,
            lng: -43.174_021_987,
            speed_kmh: 27.5,
            vehicle_class: VehicleClass::Municipal,
            direction: None,
            observed_at: now_millis(),
        }
    }

    fn record(id: &str, line: &str) -> RioRecord {
        RioRecord {
            id: id.into(),
            line: line.into(),
            lat: -22.9,
            lng: -43.1,
            speed_kmh: 0.0,
        }
    }

    fn manager(dir: &TempDir) -> CacheManager {
        CacheManager::new(CacheWindows::default(), Some(dir.path().to_path_buf()))
    }

    #[tokio::test]
    async fn test_line_set_must_match_exactly() {
        let dir = TempDir::new().unwrap();
        let cache = manager(&dir);
        cache
            .store_lines(
                ProviderKind::Rio,
                vec![position("A1", "100"), position("B2", "200")],
                line_set(["100", "200"]),
            )
            .await
            .unwrap();

        assert!(matches!(
            cache.lookup_lines(ProviderKind::Rio, &line_set(["100"])).await,
            LineLookup::Miss
        ));
        assert!(matches!(
            cache.lookup_lines(ProviderKind::Rio, &line_set(["200", "100"])).await,
            LineLookup::Hit { tier: CacheTier::Memory, .. }
        ));
    }

    #[tokio::test]
    async fn test_disk_round_trip_seeds_new_manager() {
        let dir = TempDir::new().unwrap();
        let lines = line_set(["SP455"]);
        let stored = manager(&dir)
            .store_lines(ProviderKind::Detro, vec![position("RJ-101", "SP455")], lines.clone())
            .await
            .unwrap();
        assert!(dir.path().join("detro_bus_cache.json").exists());

        let restarted = manager(&dir);
        match restarted.lookup_lines(ProviderKind::Detro, &lines).await {
            LineLookup::Hit { tier, entry } => {
                assert_eq!(tier, CacheTier::Disk);
                assert_eq!(*entry, *stored);
            }
            LineLookup::Miss => panic!("expected disk hit"),
        }

        // Seeded into memory with the original capture time.
        let seeded = restarted.memory_entry(ProviderKind::Detro).unwrap();
        assert_eq!(seeded.captured_at, stored.captured_at);
    }

    #[tokio::test]
    async fn test_corrupt_or_stale_disk_is_a_miss() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("rio_bus_cache.json"), b"{\"data\": [").unwrap();

        let old = DiskEntry {
            data: vec![position("RJ-101", "SP455")],
            timestamp: (Utc::now() - chrono::Duration::minutes(10)).timestamp_millis(),
            lines: vec!["SP455".into()],
        };
        std::fs::write(
            dir.path().join("detro_bus_cache.json"),
            serde_json::to_vec(&old).unwrap(),
        )
        .unwrap();

        let cache = manager(&dir);
        assert!(matches!(
            cache.lookup_lines(ProviderKind::Rio, &line_set(["343"])).await,
            LineLookup::Miss
        ));
        assert!(matches!(
            cache.lookup_lines(ProviderKind::Detro, &line_set(["SP455"])).await,
            LineLookup::Miss
        ));
        assert!(cache.memory_entry(ProviderKind::Detro).is_none());
    }

    #[tokio::test]
    async fn test_future_disk_timestamp_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let skewed = DiskEntry {
            data: vec![position("RJ-101", "SP455")],
            timestamp: (Utc::now() + chrono::Duration::minutes(10)).timestamp_millis(),
            lines: vec!["SP455".into()],
        };
        std::fs::write(
            dir.path().join("detro_bus_cache.json"),
            serde_json::to_vec(&skewed).unwrap(),
        )
        .unwrap();

        let cache = manager(&dir);
        assert!(matches!(
            cache.lookup_lines(ProviderKind::Detro, &line_set(["SP455"])).await,
            LineLookup::Miss
        ));
        assert!(cache.memory_entry(ProviderKind::Detro).is_none());
    }

    #[tokio::test]
    async fn test_shutdown_allows_a_new_refresh() {
        let cache = Arc::new(CacheManager::new(CacheWindows::default(), None));
        assert!(cache.spawn_global_refresh(std::future::pending::<Result<Vec<RioRecord>, Error>>()));
        assert!(!cache.spawn_global_refresh(async { Ok(vec![record("B1", "343")]) }));

        cache.shutdown();

        let mut refreshes = cache.subscribe_refreshes();
        assert!(cache.spawn_global_refresh(async { Ok(vec![record("C1", "343")]) }));
        refreshes.changed().await.unwrap();
        assert_eq!(cache.global_snapshot().unwrap().records[0].id, "C1");
    }

    #[tokio::test]
    async fn test_empty_result_is_not_stored() {
        let dir = TempDir::new().unwrap();
        let cache = manager(&dir);
        cache
            .store_lines(ProviderKind::Rio, vec![position("A1", "343")], line_set(["343"]))
            .await
            .unwrap();

        assert!(cache
            .store_lines(ProviderKind::Rio, Vec::new(), line_set(["343"]))
            .await
            .is_none());
        assert_eq!(
            cache.memory_entry(ProviderKind::Rio).unwrap().positions.len(),
            1
        );
    }

    #[tokio::test]
    async fn test_memory_entry_expires_after_fresh_window() {
        let cache = CacheManager::new(
            CacheWindows {
                fresh: Duration::from_secs(30),
                stale: Duration::from_secs(300),
            },
            None,
        );
        let lines = line_set(["343"]);
        let mut entry = CacheEntry::new(vec![position("A1", "343")], lines.clone());
        entry.captured_at = now_millis() - chrono::Duration::seconds(31);
        cache.install_entry(ProviderKind::Rio, Arc::new(entry));

        assert!(matches!(
            cache.lookup_lines(ProviderKind::Rio, &lines).await,
            LineLookup::Miss
        ));
    }

    #[tokio::test]
    async fn test_stale_global_answers_and_refreshes_once() {
        let cache = Arc::new(CacheManager::new(CacheWindows::default(), None));
        cache.install_global(GlobalSnapshot {
            records: Arc::new(vec![record("A1", "343"), record("A2", "343A"), record("B1", "100")]),
            captured_at: now_millis() - chrono::Duration::seconds(60),
        });

        let answer = cache.lookup_global(&line_set(["343"])).unwrap();
        assert_eq!(answer.positions.len(), 2);
        assert!(answer.needs_refresh);

        let mut refreshes = cache.subscribe_refreshes();
        assert!(cache.spawn_global_refresh(async { Ok(vec![record("C1", "343")]) }));
        assert!(!cache.spawn_global_refresh(async { Ok(vec![record("D1", "343")]) }));

        refreshes.changed().await.unwrap();
        assert_eq!(*refreshes.borrow(), 1);

        let answer = cache.lookup_global(&line_set(["343"])).unwrap();
        assert!(!answer.needs_refresh);
        assert_eq!(answer.positions[0].id, "C1");
    }

    #[tokio::test]
    async fn test_global_beyond_stale_window_is_ignored() {
        let cache = CacheManager::new(CacheWindows::default(), None);
        cache.install_global(GlobalSnapshot {
            records: Arc::new(vec![record("A1", "343")]),
            captured_at: now_millis() - chrono::Duration::minutes(6),
        });
        assert!(cache.lookup_global(&line_set(["343"])).is_none());
        assert!(!cache.store_global(Vec::new()));
    }
}
