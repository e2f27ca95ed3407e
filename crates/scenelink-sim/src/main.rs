//! SceneLink Sim - Drives the bridge from a small animated scene
//!
//! A robot circles around a map item while its transform is broadcast, its
//! snapshot is published every second, and a crate follows a pose topic.

use anyhow::Result;
use clap::Parser;
use scenelink_bridge::{
    load_config, FrameBroadcaster, ImageEmitter, MarkerBatchBuilder, PositionController,
    SignalEmitter,
};
use scenelink_core::{
    Grabbable, LocalBus, Movable, PoseRecord, Record, SceneItem, ScenePoint, TrackedItem,
    Transport,
};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const POSE_TOPIC: &str = "crate_pose";
const READY_TOPIC: &str = "ready";
const TICK: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(name = "scenelink")]
#[command(about = "Animated scene streamed through the SceneLink bridge")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "scenelink.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Seconds to run before shutting down
    #[arg(short, long, default_value_t = 5)]
    duration_secs: u64,

    /// Print every published record as a JSON line
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("SceneLink v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;
    info!(
        period_ms = config.broadcaster.period_ms,
        scale = config.broadcaster.pixels_per_meter,
        capacity = config.bus.capacity,
        "Configuration loaded"
    );

    let bus = Arc::new(LocalBus::with_capacity(config.bus.capacity));
    let transport: Arc<dyn Transport> = bus.clone();

    let printers: Vec<_> = [
        config.broadcaster.topic.as_str(),
        config.image.topic.as_str(),
        config.markers.topic.as_str(),
        READY_TOPIC,
    ]
    .into_iter()
    .map(|topic| spawn_printer(&bus, topic, args.json))
    .collect();

    // Scene
    let scale = config.broadcaster.pixels_per_meter;
    let map = Arc::new(SceneItem::new("map", 400, 400).with_position(200.0, 200.0));
    let robot = Arc::new(
        SceneItem::new("robot", 32, 32)
            .with_fill([200, 40, 40, 255])
            .with_polygon(vec![
                ScenePoint::new(0.0, 0.0),
                ScenePoint::new(32.0, 0.0),
                ScenePoint::new(32.0, 32.0),
                ScenePoint::new(0.0, 32.0),
            ]),
    );
    let crate_item = Arc::new(
        SceneItem::new("crate", 20, 20)
            .with_fill([140, 100, 40, 255])
            .with_polygon(vec![
                ScenePoint::new(0.0, 0.0),
                ScenePoint::new(20.0, 0.0),
                ScenePoint::new(10.0, 20.0),
            ]),
    );

    // Bridge components
    let mut broadcaster = FrameBroadcaster::new(transport.clone(), &config.broadcaster);
    broadcaster.set_parent_frame("map");
    broadcaster.set_child_frame("robot");
    broadcaster.set_reference(Some(Arc::downgrade(&map) as Weak<dyn TrackedItem>));
    broadcaster.set_target(Arc::downgrade(&robot) as Weak<dyn TrackedItem>)?;

    let emitter = ImageEmitter::new(transport.clone(), &config.image);
    emitter.set_frame("robot");
    emitter.set_target(Arc::downgrade(&robot) as Weak<dyn Grabbable>);

    let markers = MarkerBatchBuilder::new(transport.clone(), &config.markers);
    markers.publish_targets(&[
        Arc::downgrade(&robot) as Weak<dyn TrackedItem>,
        Arc::downgrade(&crate_item) as Weak<dyn TrackedItem>,
    ]);

    let mut follower = PositionController::new(
        transport.clone(),
        Arc::downgrade(&crate_item) as Weak<dyn Movable>,
    );
    follower.set_scale(scale)?;
    follower.set_origin(Some(Arc::downgrade(&map) as Weak<dyn TrackedItem>));
    follower.set_topic(POSE_TOPIC)?;

    let mut ready = SignalEmitter::new(transport.clone());
    ready.set_topic(READY_TOPIC);
    ready.signal()?;

    // Animate until the duration elapses or Ctrl-C
    let deadline = tokio::time::sleep(Duration::from_secs(args.duration_secs));
    tokio::pin!(deadline);
    let mut ticker = tokio::time::interval(TICK);
    let mut tick: u64 = 0;

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = ticker.tick() => {
                tick += 1;
                let t = tick as f64 * TICK.as_secs_f64();
                let center = map.position();

                robot.set_position(ScenePoint::new(
                    center.x + 120.0 * t.cos(),
                    center.y + 120.0 * t.sin(),
                ));
                robot.set_rotation((t.to_degrees() + 90.0) % 360.0);

                // The crate trails half a meter behind the robot in world space
                let pose = PoseRecord::new(t.cos() * 0.5, -t.sin() * 0.5, 0.0);
                bus.send(POSE_TOPIC, Record::Pose(pose));

                if tick % 20 == 0 {
                    if let Err(e) = emitter.publish() {
                        warn!(error = %e, "Snapshot failed");
                    }
                }
            }
        }
    }

    broadcaster.shutdown();
    emitter.drain().await;
    drop(follower);

    info!(
        iterations = broadcaster.iterations(),
        transforms = broadcaster.emitted(),
        "Broadcaster stopped"
    );
    for topic in bus.topics() {
        info!(topic = %topic, sent = bus.sent(&topic), "Topic summary");
    }

    for printer in printers {
        printer.abort();
    }

    Ok(())
}

/// Log or print every record published on `topic`
fn spawn_printer(bus: &Arc<LocalBus>, topic: &str, json: bool) -> tokio::task::JoinHandle<()> {
    let mut rx = bus.subscribe(topic);
    let topic = topic.to_string();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(record) => {
                    if json {
                        match serde_json::to_string(&record) {
                            Ok(line) => println!("{}", line),
                            Err(e) => warn!(topic = %topic, error = %e, "Failed to encode record"),
                        }
                    } else {
                        debug!(topic = %topic, kind = record.kind(), "{:?}", record);
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!(topic = %topic, skipped = n, "Printer lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
