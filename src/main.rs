//! linewatch: live bus positions for Rio de Janeiro lines.
//!
//! Single-binary Tokio application that:
//! 1. Loads the line catalog and warms the global Rio snapshot
//! 2. Polls DETRO and Rio for the selected lines
//! 3. Publishes merged, overlap-spread snapshots with bearings

mod config;

use std::{path::Path, sync::Arc, time::Duration};

use chrono::Utc;
use clap::Parser;
use serde_json::json;
use tracing::{debug, error, info, warn};

use common::{line_set, LineSet};
use detro_client::DetroClient;
use fleet::{
    probe_from_config, CacheManager, FleetOrchestrator, LineCatalog, PollIntervals,
    PollingController, RetryPolicy, RouteShapes,
};
use rio_client::RioClient;

/// Live bus position aggregator
#[derive(Parser)]
#[command(name = "linewatch", about = "Live bus position aggregator for Rio lines")]
struct Cli {
    /// Line to track; repeatable. Overrides configured lines.
    #[arg(long = "line", value_name = "ID")]
    lines: Vec<String>,

    /// Run a single fetch cycle, print a summary, and exit.
    #[arg(long)]
    once: bool,

    /// Skip warming the global Rio snapshot at startup.
    #[arg(long)]
    no_prefetch: bool,
}

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

type Orchestrator = FleetOrchestrator<DetroClient, RioClient>;
type Controller = PollingController<DetroClient, RioClient>;

#[tokio::main]
async fn main() {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "linewatch=info,fleet=info,detro_client=info,rio_client=info".into()
            }),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    info!("🚌 linewatch starting up...");

    // Load configuration.
    let cfg = match config::load_config() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let lines: LineSet = if cli.lines.is_empty() {
        line_set(&cfg.lines)
    } else {
        line_set(&cli.lines)
    };
    info!("Lines: {:?}", lines);
    info!(
        "Cache: fresh={}s stale={}s dir={}",
        cfg.cache.fresh_window_secs, cfg.cache.stale_window_secs, cfg.cache.dir
    );
    info!(
        "Polling: wifi={}s good={}s poor={}s offline={}s quality={}",
        cfg.polling.wifi_interval_secs,
        cfg.polling.cellular_good_interval_secs,
        cfg.polling.cellular_poor_interval_secs,
        cfg.polling.offline_interval_secs,
        cfg.polling
            .network_quality
            .map(|q| format!("{:?}", q))
            .unwrap_or_else(|| "adaptive".into()),
    );

    // ── Wiring ───────────────────────────────────────────────────────
    let catalog = Arc::new(LineCatalog::load(cfg.catalog.path.as_deref().map(Path::new)));
    if let Some(meta) = catalog.metadata() {
        info!(
            "Catalog: {} lines (detro={}, rio={}, generated {})",
            catalog.len(),
            meta.detro_count,
            meta.rio_count,
            meta.generated_at
        );
    }
    let shapes = RouteShapes::load(cfg.catalog.route_shapes_path.as_deref().map(Path::new));
    for line in &lines {
        match shapes.shape_for(line) {
            Some(points) => debug!("Route shape for {}: {} points", line, points.len()),
            None => debug!("No route shape for {}", line),
        }
    }

    let cache = Arc::new(CacheManager::from_config(&cfg.cache));
    let orchestrator: Arc<Orchestrator> = Arc::new(FleetOrchestrator::new(
        catalog,
        cache,
        Arc::new(DetroClient::new(&cfg.detro)),
        Arc::new(RioClient::new(&cfg.rio)),
        RetryPolicy::new(&cfg.retry),
    ));

    if cli.once {
        run_once(&orchestrator, &lines, !cli.no_prefetch).await;
        orchestrator.shutdown();
        return;
    }

    // Task 1: Global snapshot warm-up
    if !cli.no_prefetch {
        let warm = orchestrator.clone();
        tokio::spawn(async move {
            warm.prefetch_global().await;
        });
    }

    // Task 2: Polling loop
    let controller = Arc::new(PollingController::new(
        orchestrator.clone(),
        probe_from_config(&cfg.polling),
        PollIntervals::from_config(&cfg.polling),
    ));
    controller.set_lines(lines);

    // Task 3: Snapshot consumer
    let consumer_ctrl = controller.clone();
    let consumer_handle = tokio::spawn(async move {
        let mut rx = consumer_ctrl.subscribe();
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update().clone();
            if snapshot.positions.is_empty() {
                info!("Display cleared");
                continue;
            }
            let now = Utc::now();
            for pos in snapshot.positions.iter() {
                let bearing = consumer_ctrl.bearing_for(pos);
                debug!(
                    "{} line={} at ({:.5}, {:.5}) {:.0} km/h heading {:.0}° freshness={:?}",
                    pos.id,
                    pos.line_id,
                    pos.lat,
                    pos.lng,
                    pos.speed_kmh,
                    bearing,
                    pos.freshness(now)
                );
            }
            info!(
                "Snapshot #{}: {} vehicles on {} lines",
                snapshot.cycle,
                snapshot.positions.len(),
                snapshot.lines.len()
            );
        }
    });

    // Task 4: Pause/resume on SIGUSR1/SIGUSR2
    #[cfg(unix)]
    spawn_signal_controls(controller.clone());

    // Task 5: Heartbeat
    let hb_ctrl = controller.clone();
    let heartbeat_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let latest = hb_ctrl.latest();
            info!(
                "HEARTBEAT: state={:?} lines={} vehicles={} cycles={} interval={}s",
                hb_ctrl.state(),
                hb_ctrl.lines().len(),
                latest.positions.len(),
                hb_ctrl.cycles(),
                hb_ctrl.current_interval().as_secs()
            );
        }
    });

    // ── Wait for shutdown ────────────────────────────────────────────
    info!("🚀 linewatch is running. Press Ctrl+C to stop.");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        r = consumer_handle => {
            error!("Snapshot consumer exited: {:?}", r);
        }
        r = heartbeat_handle => {
            error!("Heartbeat task exited: {:?}", r);
        }
    }

    controller.stop();
    orchestrator.shutdown();
    info!("linewatch shut down.");
}

async fn run_once(orchestrator: &Orchestrator, lines: &LineSet, prefetch: bool) {
    if lines.is_empty() {
        warn!("No lines selected; pass --line or set LINEWATCH_LINES");
        return;
    }
    if prefetch {
        orchestrator.prefetch_global().await;
    }

    let cycle = orchestrator.fetch_cycle(lines).await;
    let summary = json!({
        "ts": Utc::now().to_rfc3339(),
        "lines": lines,
        "vehicles": cycle.positions.len(),
        "degraded": cycle.degraded,
        "detro": format!("{:?}", cycle.detro),
        "rio": format!("{:?}", cycle.rio),
        "positions": cycle.positions,
    });
    match serde_json::to_string_pretty(&summary) {
        Ok(text) => println!("{}", text),
        Err(e) => error!("Failed to render summary: {}", e),
    }
}

#[cfg(unix)]
fn spawn_signal_controls(controller: Arc<Controller>) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut pause, mut resume) = match (
        signal(SignalKind::user_defined1()),
        signal(SignalKind::user_defined2()),
    ) {
        (Ok(p), Ok(r)) => (p, r),
        (Err(e), _) | (_, Err(e)) => {
            warn!("Pause/resume signals unavailable: {}", e);
            return;
        }
    };

    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(()) = pause.recv() => controller.pause(),
                Some(()) = resume.recv() => controller.resume(),
                else => break,
            }
        }
    });
}
