//! workspace_monitor - Publish the intrusion state of a robot workcell over MQTT.
//!
//! 1. Opens the configured frame source (recorded media or a live room track)
//! 2. Runs the detector on every frame and keeps the tracked classes
//! 3. Publishes each workspace state to the MQTT topic as `{"value": {...}}`
//!
//! Settings come from `MONITOR_CONFIG` (TOML or JSON), then the environment,
//! then the flags below.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use workspace_monitor::config::{split_csv, MonitorConfig, SourceKind};
use workspace_monitor::pipeline::{self, SnapshotSink};
use workspace_monitor::{open_source, DetectorRegistry, MqttStatePublisher, WorkspaceMonitor};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Publish workcell intrusion state from a camera feed to MQTT"
)]
struct Args {
    /// Configuration file (.toml, or JSON otherwise).
    #[arg(long, env = "MONITOR_CONFIG")]
    config: Option<PathBuf>,

    /// Frame source: 'live' or 'recorded'.
    #[arg(long)]
    source: Option<SourceKind>,

    /// Recorded media path (or stub:// location) for a recorded source.
    #[arg(long)]
    video_path: Option<String>,

    /// MQTT broker address, e.g. broker.local:1883 or mqtts://broker:8883.
    #[arg(long)]
    mqtt_broker: Option<String>,

    /// Topic workspace states are published to.
    #[arg(long)]
    mqtt_topic: Option<String>,

    /// Comma-separated classes treated as intrusions (e.g. "person,forklift").
    #[arg(long)]
    tracked_objects: Option<String>,

    /// Detector backend name.
    #[arg(long)]
    detector: Option<String>,

    /// Also write the latest published frame to this JPEG file.
    #[arg(long)]
    debug_snapshot: Option<PathBuf>,

    /// List the available detectors and exit.
    #[arg(long)]
    list_detectors: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let registry = DetectorRegistry::with_builtin();
    if args.list_detectors {
        for name in registry.list() {
            println!("{}", name);
        }
        return Ok(());
    }

    let mut cfg = MonitorConfig::layered(args.config.as_deref())?;
    apply_args(&mut cfg, &args);
    cfg.validate()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
        })
        .context("error setting Ctrl-C handler")?;
    }

    let detector = registry.build(&cfg.monitor.detector)?;
    let mut monitor = WorkspaceMonitor::new(cfg.monitor.tracked_objects.clone(), detector)?;

    let mut publisher = MqttStatePublisher::new(cfg.publisher_config()?)?;
    publisher.connect(cfg.mqtt.connect_timeout)?;

    let mut source = open_source(cfg.source_spec())?;
    log::info!("Opened {}", source.describe());

    let outcome = match &cfg.debug_snapshot_path {
        Some(path) => {
            log::info!("Writing debug snapshots to {}", path.display());
            let mut sink = SnapshotSink::new(&mut publisher, path);
            pipeline::run(source.as_mut(), &mut monitor, &mut sink, &shutdown)
        }
        None => pipeline::run(source.as_mut(), &mut monitor, &mut publisher, &shutdown),
    };

    if let Err(err) = publisher.disconnect() {
        log::warn!("MQTT disconnect failed: {:#}", err);
    }
    let summary = outcome?;
    log::info!(
        "Done: {} frames processed, {} skipped, {} states published ({} failed), {} intrusions",
        summary.frames_processed,
        summary.frames_skipped,
        summary.states_published,
        summary.publish_failures,
        summary.intrusions_seen
    );
    Ok(())
}

fn apply_args(cfg: &mut MonitorConfig, args: &Args) {
    if let Some(kind) = args.source {
        cfg.source.kind = kind;
    }
    if let Some(path) = &args.video_path {
        cfg.source.path = Some(path.clone());
    }
    if let Some(broker) = &args.mqtt_broker {
        cfg.mqtt.broker = broker.clone();
    }
    if let Some(topic) = &args.mqtt_topic {
        cfg.mqtt.topic = topic.clone();
    }
    if let Some(objects) = &args.tracked_objects {
        cfg.monitor.tracked_objects = split_csv(objects);
    }
    if let Some(detector) = &args.detector {
        cfg.monitor.detector = detector.clone();
    }
    if let Some(path) = &args.debug_snapshot {
        cfg.debug_snapshot_path = Some(path.clone());
    }
}
