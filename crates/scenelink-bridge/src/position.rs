//! Drive a scene item from an external pose source
//!
//! Poses arrive in meters on a topic and are converted back into scene space,
//! optionally relative to an origin item.

use scenelink_core::units::{is_valid_scale, to_scene};
use scenelink_core::{Movable, PoseRecord, Record, ScenePoint, TrackedItem, Transport};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{broadcast::error::RecvError, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::BridgeError;

struct Shared {
    target: Weak<dyn Movable>,
    origin: Mutex<Option<Weak<dyn TrackedItem>>>,
    scale: AtomicU64,
    changed: watch::Sender<Option<ScenePoint>>,
}

impl Shared {
    fn apply(&self, pose: &PoseRecord) -> Option<ScenePoint> {
        let origin = match self
            .origin
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            Some(weak) => match weak.upgrade() {
                Some(item) => Some(item.position()),
                None => {
                    debug!("Position origin is gone, ignoring pose");
                    return None;
                }
            },
            None => None,
        };

        let Some(target) = self.target.upgrade() else {
            debug!("Position target is gone, ignoring pose");
            return None;
        };

        let scale = f64::from_bits(self.scale.load(Ordering::Relaxed));
        let (x, y) = to_scene(pose.position[0], pose.position[1], scale, origin);
        let position = ScenePoint::new(x, y);
        target.set_position(position);
        self.changed.send_replace(Some(position));
        trace!(x, y, "Moved item from pose");
        Some(position)
    }
}

/// Moves one scene item to the poses published on a topic
pub struct PositionController {
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    topic: Option<String>,
    task: Option<JoinHandle<()>>,
}

impl PositionController {
    pub fn new(transport: Arc<dyn Transport>, target: Weak<dyn Movable>) -> Self {
        let (changed, _) = watch::channel(None);
        Self {
            transport,
            shared: Arc::new(Shared {
                target,
                origin: Mutex::new(None),
                scale: AtomicU64::new(1.0f64.to_bits()),
                changed,
            }),
            topic: None,
            task: None,
        }
    }

    /// Item whose position is the scene-space origin of incoming poses
    pub fn set_origin(&self, origin: Option<Weak<dyn TrackedItem>>) {
        *self.shared.origin.lock().unwrap_or_else(|e| e.into_inner()) = origin;
    }

    pub fn set_scale(&self, pixels_per_meter: f64) -> Result<(), BridgeError> {
        if !is_valid_scale(pixels_per_meter) {
            return Err(BridgeError::InvalidScale(pixels_per_meter));
        }
        self.shared
            .scale
            .store(pixels_per_meter.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    /// Receive the scene position after every applied pose
    pub fn subscribe(&self) -> watch::Receiver<Option<ScenePoint>> {
        self.shared.changed.subscribe()
    }

    /// Apply one pose immediately, bypassing the subscription
    pub fn update(&self, pose: &PoseRecord) -> Option<ScenePoint> {
        self.shared.apply(pose)
    }

    /// Follow poses published on `topic`, replacing any previous subscription.
    ///
    /// Outside a Tokio runtime this fails and the current subscription is
    /// kept.
    pub fn set_topic(&mut self, topic: &str) -> Result<(), BridgeError> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(topic = %topic, "Pose subscription requested outside a Tokio runtime");
            return Err(BridgeError::NoRuntime);
        };

        if let Some(task) = self.task.take() {
            task.abort();
        }

        let mut rx = self.transport.subscribe(topic);
        let shared = self.shared.clone();
        let name = topic.to_string();
        self.task = Some(runtime.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(Record::Pose(pose)) => {
                        shared.apply(&pose);
                    }
                    Ok(other) => {
                        trace!(topic = %name, kind = other.kind(), "Ignoring non-pose record");
                    }
                    Err(RecvError::Lagged(n)) => {
                        debug!(topic = %name, skipped = n, "Pose subscription lagged");
                        // Continue - only the latest pose matters
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!(topic = %name, "Pose subscription ended");
        }));

        info!(topic = %topic, "Following poses");
        self.topic = Some(topic.to_string());
        Ok(())
    }
}

impl Drop for PositionController {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
