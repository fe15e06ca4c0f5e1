//! fusiond - detection + depth fusion daemon
//!
//! This daemon:
//! 1. Loads configuration (FUSION_CONFIG file, then environment overrides)
//! 2. Opens the configured capture session and loads the detection model
//! 3. Runs the fusion pipeline until Ctrl-C or the optional duration elapses
//! 4. Logs every published snapshot and a spoken summary when it changes
//! 5. Logs pipeline health periodically

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::time::{Duration, Instant};

use fusion_kernel::{describe, Announcer, FusionConfig, FusionCoordinator, LabelFilter};

const HEALTH_INTERVAL: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(author, version, about = "Real-time object detection fused with depth")]
struct Args {
    /// Start with detection disabled (display and depth only).
    #[arg(long)]
    no_detection: bool,

    /// Only report objects matching this phrase (e.g., "find me a chair").
    #[arg(long, env = "FUSION_KEYWORD")]
    keyword: Option<String>,

    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Minimum seconds before an unchanged summary is spoken again.
    #[arg(long, default_value_t = 3)]
    repeat_secs: u64,

    /// Re-check the device list this often (seconds, 0 disables).
    #[arg(long, default_value_t = 5)]
    device_poll_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = FusionConfig::load().context("loading configuration")?;
    log::info!(
        "fusiond {} starting: device={}, backend={}, publish_hz={}",
        env!("CARGO_PKG_VERSION"),
        config.capture.device,
        config.model.backend,
        config.publish.max_hz
    );

    let coordinator = FusionCoordinator::from_config(&config)?;
    if let Some(error) = coordinator.last_error() {
        log::warn!("{}", error);
    }
    if args.no_detection {
        coordinator.set_detection_enabled(false);
    }
    if let Some(phrase) = &args.keyword {
        match LabelFilter::from_phrase(phrase) {
            Some(filter) => coordinator.set_label_filter(Some(filter)),
            None => log::warn!("keyword '{}' contains no object words, ignoring", phrase),
        }
    }

    let snapshots = coordinator.subscribe();
    let status = coordinator.subscribe_status();

    let device = coordinator
        .start_session()
        .map_err(|e| anyhow!("{}: {}", e.user_message(), e))?;
    log::info!("fusiond running on {} ({})", device.name, device.id);

    let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("installing Ctrl-C handler")?;

    let started = Instant::now();
    let deadline = args.duration_secs.map(|secs| started + Duration::from_secs(secs));
    let device_poll = Duration::from_secs(args.device_poll_secs);
    let mut announcer = Announcer::new(Duration::from_secs(args.repeat_secs));
    let mut last_health_log = Instant::now();
    let mut last_device_poll = Instant::now();

    loop {
        if stop_rx.try_recv().is_ok() {
            log::info!("shutdown signal received");
            break;
        }
        if deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
            log::info!("duration elapsed");
            break;
        }

        if let Some(snapshot) = snapshots.recv_timeout(POLL_INTERVAL) {
            log::debug!(
                "snapshot {}: {} objects, closest={:?}, center={:?}",
                snapshot.sequence,
                snapshot.objects.len(),
                snapshot.closest_depth,
                snapshot.center_depth
            );
            if let Some(sentence) = announcer.announce(&snapshot, Instant::now()) {
                log::info!("say: {}", sentence);
            }
        }

        for event in status.drain() {
            log::info!("status: {:?}", event);
        }

        if !device_poll.is_zero() && last_device_poll.elapsed() >= device_poll {
            last_device_poll = Instant::now();
            if let Err(err) = coordinator.refresh_device() {
                log::warn!("device check: {}", err.user_message());
            }
        }

        if last_health_log.elapsed() >= HEALTH_INTERVAL {
            let stats = coordinator.stats();
            log::info!(
                "health: color={} depth={} passes={} dropped={} failures={} published={} stale={}",
                stats.color_frames,
                stats.depth_frames,
                stats.inference.passes,
                stats.inference.dropped,
                stats.inference.failures,
                stats.snapshots_published,
                stats.stale_results
            );
            last_health_log = Instant::now();
        }
    }

    let last = coordinator.current();
    if let Some(summary) = describe(&last) {
        log::info!("last scene: {}", summary);
    }
    coordinator.stop_session();
    log::info!(
        "fusiond stopped after {:.1}s ({} snapshots)",
        started.elapsed().as_secs_f32(),
        coordinator.stats().snapshots_published
    );
    Ok(())
}
