//! Periodic fetch loop with pause/resume.
//!
//! `Idle -> Running -> Paused -> Running -> Stopped`. Every line-set change
//! or pause aborts the running loop task outright; cache writes happen only
//! after a cycle's calls have joined, so nothing partial is persisted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{LineSet, VehiclePosition};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::bearing::BearingTracker;
use crate::network::{CycleSignal, NetworkProbe, PollIntervals};
use crate::orchestrator::FleetOrchestrator;
use crate::provider::{DetroSource, RioSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Running,
    Paused,
    Stopped,
}

/// What the display layer sees.
#[derive(Debug, Clone)]
pub struct PublishedSnapshot {
    pub positions: Arc<Vec<VehiclePosition>>,
    pub lines: LineSet,
    pub published_at: DateTime<Utc>,
    /// Cycle number that produced this snapshot; 0 before the first one.
    pub cycle: u64,
}

impl PublishedSnapshot {
    fn empty(cycle: u64) -> Self {
        Self {
            positions: Arc::new(Vec::new()),
            lines: LineSet::new(),
            published_at: Utc::now(),
            cycle,
        }
    }
}

struct Shared<D, R> {
    orchestrator: Arc<FleetOrchestrator<D, R>>,
    probe: Arc<dyn NetworkProbe>,
    intervals: PollIntervals,
    bearings: BearingTracker,
    snapshots: watch::Sender<PublishedSnapshot>,
    cycles: AtomicU64,
    interval_ms: AtomicU64,
}

struct Control {
    state: PollState,
    lines: LineSet,
    task: Option<JoinHandle<()>>,
}

pub struct PollingController<D, R> {
    shared: Arc<Shared<D, R>>,
    control: Mutex<Control>,
}

impl<D: DetroSource, R: RioSource> PollingController<D, R> {
    pub fn new(
        orchestrator: Arc<FleetOrchestrator<D, R>>,
        probe: Arc<dyn NetworkProbe>,
        intervals: PollIntervals,
    ) -> Self {
        let (snapshots, _) = watch::channel(PublishedSnapshot::empty(0));
        let initial = intervals.for_quality(probe.quality());
        Self {
            shared: Arc::new(Shared {
                orchestrator,
                probe,
                intervals,
                bearings: BearingTracker::new(),
                snapshots,
                cycles: AtomicU64::new(0),
                interval_ms: AtomicU64::new(initial.as_millis() as u64),
            }),
            control: Mutex::new(Control {
                state: PollState::Idle,
                lines: LineSet::new(),
                task: None,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PublishedSnapshot> {
        self.shared.snapshots.subscribe()
    }

    pub fn latest(&self) -> PublishedSnapshot {
        self.shared.snapshots.borrow().clone()
    }

    pub fn state(&self) -> PollState {
        self.control().state
    }

    pub fn lines(&self) -> LineSet {
        self.control().lines.clone()
    }

    /// Completed cycles, including those that published nothing.
    pub fn cycles(&self) -> u64 {
        self.shared.cycles.load(Ordering::Acquire)
    }

    /// Wait chosen after the most recent cycle.
    pub fn current_interval(&self) -> Duration {
        Duration::from_millis(self.shared.interval_ms.load(Ordering::Acquire))
    }

    /// Heading for a vehicle from the latest snapshot.
    pub fn bearing_for(&self, pos: &VehiclePosition) -> f64 {
        self.shared.bearings.bearing_for(pos)
    }

    /// Replace the tracked lines. While running, the current wait is cancelled
    /// and a fetch for the new set starts immediately. An empty set clears the
    /// display and returns to `Idle`.
    pub fn set_lines(&self, lines: LineSet) {
        let mut control = self.control();
        if control.state == PollState::Stopped {
            warn!("set_lines ignored, controller is stopped");
            return;
        }

        abort(&mut control.task);
        control.lines = lines;

        if control.lines.is_empty() {
            info!("No lines selected, clearing display");
            self.shared.bearings.clear();
            self.shared
                .snapshots
                .send_replace(PublishedSnapshot::empty(self.cycles()));
            control.state = PollState::Idle;
            return;
        }

        if control.state == PollState::Paused {
            debug!(lines = control.lines.len(), "Lines updated while paused");
            return;
        }

        self.start(&mut control);
    }

    /// Cancel the loop. Caches are left as they are.
    pub fn pause(&self) {
        let mut control = self.control();
        match control.state {
            PollState::Running | PollState::Idle => {
                abort(&mut control.task);
                control.state = PollState::Paused;
                info!("Polling paused");
            }
            PollState::Paused | PollState::Stopped => {}
        }
    }

    /// Restart the loop if there is anything to poll.
    pub fn resume(&self) {
        let mut control = self.control();
        if control.state != PollState::Paused {
            return;
        }
        if control.lines.is_empty() {
            control.state = PollState::Idle;
            return;
        }
        info!(lines = control.lines.len(), "Polling resumed");
        self.start(&mut control);
    }

    /// Terminal.
    pub fn stop(&self) {
        let mut control = self.control();
        abort(&mut control.task);
        control.state = PollState::Stopped;
        info!("Polling stopped");
    }

    fn start(&self, control: &mut Control) {
        let shared = Arc::clone(&self.shared);
        let lines = control.lines.clone();
        info!(lines = ?lines, "Polling started");
        control.task = Some(tokio::spawn(run_loop(shared, lines)));
        control.state = PollState::Running;
    }

    fn control(&self) -> std::sync::MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<D, R> Drop for PollingController<D, R> {
    fn drop(&mut self) {
        let control = self.control.get_mut().unwrap_or_else(PoisonError::into_inner);
        abort(&mut control.task);
    }
}

fn abort(task: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = task.take() {
        handle.abort();
    }
}

async fn run_loop<D: DetroSource, R: RioSource>(shared: Arc<Shared<D, R>>, lines: LineSet) {
    loop {
        let started = Instant::now();
        let cycle = shared.orchestrator.fetch_cycle(&lines).await;

        shared.probe.observe(&CycleSignal {
            latency: started.elapsed(),
            degraded: cycle.degraded,
            vehicles: cycle.positions.len(),
        });
        let number = shared.cycles.fetch_add(1, Ordering::AcqRel) + 1;

        if cycle.positions.is_empty() {
            debug!(cycle = number, "Empty cycle, keeping previous snapshot");
        } else {
            shared.bearings.prune(&cycle.positions);
            shared.snapshots.send_replace(PublishedSnapshot {
                positions: Arc::new(cycle.positions),
                lines: lines.clone(),
                published_at: Utc::now(),
                cycle: number,
            });
        }

        let quality = shared.probe.quality();
        let interval = shared.intervals.for_quality(quality);
        shared
            .interval_ms
            .store(interval.as_millis() as u64, Ordering::Release);
        debug!(?quality, interval_secs = interval.as_secs(), "Next poll scheduled");

        sleep(interval).await;
    }
}
