//! Periodic transform broadcasting for one tracked scene item
//!
//! A [`FrameBroadcaster`] relates a child frame to a parent frame. The child
//! frame follows a target item; the parent frame is either a reference item
//! or the world origin. Once a target is assigned, a background thread samples
//! the target at a fixed period and publishes one [`TransformRecord`] per
//! cycle while the broadcaster is both initialized (both frame names set) and
//! active.
//!
//! Item geometry is read directly from the scene without taking any lock;
//! see [`scenelink_core::item`] for the tearing this allows.

use chrono::Utc;
use scenelink_core::units::{is_valid_scale, to_world, yaw, yaw_quaternion};
use scenelink_core::{Publisher, Record, TrackedItem, TransformRecord, Transport, WorldPoint};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

use crate::config::BroadcasterConfig;
use crate::error::BridgeError;

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

/// Lifecycle of the background loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// No target assigned yet
    Idle,
    /// Background thread is sampling
    Running,
    /// Torn down; never restarts
    Stopped,
}

#[derive(Default)]
struct Frames {
    child: String,
    parent: String,
}

/// State shared between the owner and the background thread
struct Shared {
    state: AtomicU8,
    active: AtomicBool,
    initialized: AtomicBool,
    scale: AtomicU64,
    z_offset: AtomicU64,
    frames: Mutex<Frames>,
    target: Mutex<Option<Weak<dyn TrackedItem>>>,
    reference: Mutex<Option<Weak<dyn TrackedItem>>>,
    iterations: AtomicU64,
    emitted: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    fn state(&self) -> LoopState {
        match self.state.load(Ordering::Acquire) {
            IDLE => LoopState::Idle,
            RUNNING => LoopState::Running,
            _ => LoopState::Stopped,
        }
    }

    fn scale(&self) -> f64 {
        f64::from_bits(self.scale.load(Ordering::Relaxed))
    }

    fn z_offset(&self) -> f64 {
        f64::from_bits(self.z_offset.load(Ordering::Relaxed))
    }

    /// Build the record for this cycle, or `None` if nothing should be sent
    fn sample(&self) -> Option<TransformRecord> {
        if !self.initialized.load(Ordering::Acquire) || !self.active.load(Ordering::Acquire) {
            return None;
        }

        let Some(target) = lock(&self.target).as_ref().and_then(Weak::upgrade) else {
            debug!("Broadcaster target is gone, skipping cycle");
            return None;
        };

        let reference = match lock(&self.reference).as_ref() {
            Some(weak) => match weak.upgrade() {
                Some(item) => Some(item),
                None => {
                    debug!("Broadcaster reference is gone, skipping cycle");
                    return None;
                }
            },
            None => None,
        };

        let (parent_frame, child_frame) = {
            let frames = lock(&self.frames);
            (frames.parent.clone(), frames.child.clone())
        };

        let position = target.position();
        let rotation = target.rotation();
        let (offset, reference_rotation) = match reference {
            Some(reference) => (position - reference.position(), Some(reference.rotation())),
            None => (position, None),
        };

        let (x, y) = to_world(offset.x, offset.y, self.scale(), None);

        Some(TransformRecord {
            translation: WorldPoint::new(x, y, self.z_offset()).to_array(),
            rotation: yaw_quaternion(yaw(rotation, reference_rotation)),
            parent_frame,
            child_frame,
            stamp: Utc::now(),
        })
    }
}

/// Publishes the pose of one scene item as a stamped transform
pub struct FrameBroadcaster {
    shared: Arc<Shared>,
    publisher: Publisher,
    period: Duration,
    thread: Option<JoinHandle<()>>,
}

impl FrameBroadcaster {
    /// Create an inert broadcaster. Nothing runs until a target is assigned.
    pub fn new(transport: Arc<dyn Transport>, config: &BroadcasterConfig) -> Self {
        let scale = if is_valid_scale(config.pixels_per_meter) {
            config.pixels_per_meter
        } else {
            debug!(scale = config.pixels_per_meter, "Ignoring invalid configured scale");
            1.0
        };

        Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(IDLE),
                active: AtomicBool::new(true),
                initialized: AtomicBool::new(false),
                scale: AtomicU64::new(scale.to_bits()),
                z_offset: AtomicU64::new(config.z_offset.to_bits()),
                frames: Mutex::new(Frames::default()),
                target: Mutex::new(None),
                reference: Mutex::new(None),
                iterations: AtomicU64::new(0),
                emitted: AtomicU64::new(0),
            }),
            publisher: Publisher::new(transport, &config.topic),
            period: config.period(),
            thread: None,
        }
    }

    /// Assign the tracked item.
    ///
    /// The first assignment starts the background loop. Later assignments
    /// only change which item is sampled. After teardown this has no effect
    /// on emission.
    pub fn set_target(&mut self, target: Weak<dyn TrackedItem>) -> Result<(), BridgeError> {
        *lock(&self.shared.target) = Some(target);

        if self
            .shared
            .state
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let name = {
            let frames = lock(&self.shared.frames);
            if frames.child.is_empty() {
                "tf-broadcaster".to_string()
            } else {
                format!("tf-{}", frames.child)
            }
        };

        let shared = self.shared.clone();
        let publisher = self.publisher.clone();
        let period = self.period;
        match thread::Builder::new()
            .name(name)
            .spawn(move || run(shared, publisher, period))
        {
            Ok(handle) => {
                self.thread = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.state.store(IDLE, Ordering::Release);
                Err(BridgeError::Spawn(e))
            }
        }
    }

    /// Item whose position and rotation act as the origin, or `None` for the
    /// world origin
    pub fn set_reference(&self, reference: Option<Weak<dyn TrackedItem>>) {
        *lock(&self.shared.reference) = reference;
    }

    pub fn set_child_frame(&self, name: &str) {
        let mut frames = lock(&self.shared.frames);
        frames.child = name.to_string();
        self.update_initialized(&frames);
    }

    pub fn set_parent_frame(&self, name: &str) {
        let mut frames = lock(&self.shared.frames);
        frames.parent = name.to_string();
        self.update_initialized(&frames);
    }

    fn update_initialized(&self, frames: &Frames) {
        let initialized = !frames.child.is_empty() && !frames.parent.is_empty();
        self.shared.initialized.store(initialized, Ordering::Release);
    }

    /// Gate emission without stopping the loop
    pub fn set_active(&self, active: bool) {
        self.shared.active.store(active, Ordering::Release);
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

    pub fn set_z_offset(&self, z_offset: f64) {
        self.shared
            .z_offset
            .store(z_offset.to_bits(), Ordering::Relaxed);
    }

    pub fn child_frame(&self) -> String {
        lock(&self.shared.frames).child.clone()
    }

    pub fn parent_frame(&self) -> String {
        lock(&self.shared.frames).parent.clone()
    }

    /// Both frame names are set
    pub fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    pub fn state(&self) -> LoopState {
        self.shared.state()
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Loop cycles run so far, emitting or not
    pub fn iterations(&self) -> u64 {
        self.shared.iterations.load(Ordering::Relaxed)
    }

    /// Records published so far
    pub fn emitted(&self) -> u64 {
        self.shared.emitted.load(Ordering::Relaxed)
    }

    /// Stop the loop and wait for the background thread to exit.
    ///
    /// Once this returns, no further records are published by this
    /// broadcaster.
    pub fn shutdown(&mut self) {
        let previous = self.shared.state.swap(STOPPED, Ordering::AcqRel);
        if let Some(handle) = self.thread.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                debug!("Broadcaster thread panicked");
            }
        }
        if previous == RUNNING {
            info!(
                child = %self.child_frame(),
                emitted = self.emitted(),
                "Frame broadcaster stopped"
            );
        }
    }
}

impl Drop for FrameBroadcaster {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(shared: Arc<Shared>, publisher: Publisher, period: Duration) {
    info!(
        topic = %publisher.topic(),
        period_ms = period.as_millis() as u64,
        "Frame broadcaster started"
    );

    let mut next = Instant::now();
    'outer: while shared.state() == LoopState::Running {
        shared.iterations.fetch_add(1, Ordering::Relaxed);

        if let Some(record) = shared.sample() {
            trace!(
                child = %record.child_frame,
                parent = %record.parent_frame,
                x = record.translation[0],
                y = record.translation[1],
                "Broadcasting transform"
            );
            publisher.publish(Record::Transform(record));
            shared.emitted.fetch_add(1, Ordering::Relaxed);
        }

        next += period;
        let now = Instant::now();
        if next < now {
            // Fell behind; resume the cadence from here rather than bursting
            next = now;
        }

        loop {
            if shared.state() != LoopState::Running {
                break 'outer;
            }
            let now = Instant::now();
            if now >= next {
                break;
            }
            thread::park_timeout(next - now);
        }
    }
}
