//! Snapshot-then-publish image pipeline
//!
//! [`ImageEmitter::publish`] asks the target item for a raster and returns
//! immediately. The raster is converted and published later, when the item
//! delivers it. Completions hold only a weak reference to the emitter, so an
//! emitter dropped while snapshots are outstanding simply discards them.

use chrono::Utc;
use image::DynamicImage;
use scenelink_core::records::RGBA8;
use scenelink_core::{GrabSize, Grabbable, ImageRecord, Publisher, Record, Transport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::config::ImageConfig;
use crate::error::BridgeError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct Inner {
    transport: Arc<dyn Transport>,
    publisher: Mutex<Publisher>,
    target: Mutex<Option<Weak<dyn Grabbable>>>,
    frame: Mutex<String>,
    size: Mutex<GrabSize>,
    active: AtomicBool,
    in_flight: watch::Sender<usize>,
}

impl Inner {
    fn complete(&self, raster: DynamicImage) {
        if !self.active.load(Ordering::Acquire) {
            trace!("Image emitter inactive, dropping snapshot");
            return;
        }

        let rgba = raster.into_rgba8();
        let (width, height) = rgba.dimensions();
        let Ok(step) = u32::try_from(rgba.sample_layout().height_stride) else {
            warn!(width, height, "Snapshot row stride does not fit an image record");
            return;
        };
        let record = ImageRecord {
            frame: lock(&self.frame).clone(),
            width,
            height,
            step,
            encoding: RGBA8.to_string(),
            data: rgba.into_raw(),
            stamp: Utc::now(),
        };

        let publisher = lock(&self.publisher).clone();
        debug!(
            topic = %publisher.topic(),
            frame = %record.frame,
            width,
            height,
            "Publishing snapshot"
        );
        publisher.publish(Record::Image(record));
    }
}

/// Publishes raster snapshots of one scene item on demand
pub struct ImageEmitter {
    inner: Arc<Inner>,
}

impl ImageEmitter {
    pub fn new(transport: Arc<dyn Transport>, config: &ImageConfig) -> Self {
        let publisher = Publisher::new(transport.clone(), &config.topic);
        let (in_flight, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                transport,
                publisher: Mutex::new(publisher),
                target: Mutex::new(None),
                frame: Mutex::new(String::new()),
                size: Mutex::new(GrabSize::new(config.width, config.height)),
                active: AtomicBool::new(true),
                in_flight,
            }),
        }
    }

    pub fn set_target(&self, target: Weak<dyn Grabbable>) {
        *lock(&self.inner.target) = Some(target);
    }

    pub fn set_frame(&self, frame: &str) {
        *lock(&self.inner.frame) = frame.to_string();
    }

    /// Rebind the output topic. Snapshots still in flight publish on the new
    /// topic.
    pub fn set_topic(&self, topic: &str) {
        *lock(&self.inner.publisher) = Publisher::new(self.inner.transport.clone(), topic);
    }

    /// Fixed snapshot size; zero in either dimension uses the natural size
    pub fn set_size(&self, width: u32, height: u32) {
        *lock(&self.inner.size) = GrabSize::new(width, height);
    }

    /// Checked when a snapshot completes, not when it is requested
    pub fn set_active(&self, active: bool) {
        self.inner.active.store(active, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    pub fn topic(&self) -> String {
        lock(&self.inner.publisher).topic().to_string()
    }

    pub fn frame(&self) -> String {
        lock(&self.inner.frame).clone()
    }

    /// Snapshots requested but not yet completed
    pub fn in_flight(&self) -> usize {
        *self.inner.in_flight.borrow()
    }

    /// Request a snapshot of the target and publish it once ready.
    ///
    /// Returns without waiting. Fails with [`BridgeError::NoRuntime`] when
    /// called outside a Tokio runtime.
    pub fn publish(&self) -> Result<(), BridgeError> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("Snapshot requested outside a Tokio runtime");
            return Err(BridgeError::NoRuntime);
        };

        let target = lock(&self.inner.target).as_ref().and_then(Weak::upgrade);
        let Some(target) = target else {
            warn!("Snapshot requested without a live target");
            return Err(BridgeError::NoTarget);
        };

        let size = *lock(&self.inner.size);
        let pending = target.grab_to_image(size);
        self.inner.in_flight.send_modify(|n| *n += 1);
        trace!(width = size.width, height = size.height, "Snapshot requested");

        let weak = Arc::downgrade(&self.inner);
        runtime.spawn(async move {
            let result = pending.await;
            let Some(inner) = weak.upgrade() else {
                debug!("Image emitter dropped before snapshot completed");
                return;
            };

            match result {
                Ok(raster) => inner.complete(raster),
                Err(_) => debug!("Snapshot request abandoned by the scene"),
            }
            inner.in_flight.send_modify(|n| *n = n.saturating_sub(1));
        });

        Ok(())
    }

    /// Wait until every outstanding snapshot has completed or been abandoned
    pub async fn drain(&self) {
        let mut rx = self.inner.in_flight.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;
    use scenelink_core::{LocalBus, SceneItem};
    use std::time::Duration;
    use tokio::sync::{broadcast, oneshot};
    use tokio::time::timeout;

    /// Grabbable whose snapshots complete only when the test says so
    #[derive(Default)]
    struct ManualGrab {
        pending: Mutex<Vec<oneshot::Sender<DynamicImage>>>,
    }

    impl ManualGrab {
        fn complete(&self, index: usize, width: u32, height: u32) {
            let tx = lock(&self.pending).remove(index);
            let _ = tx.send(DynamicImage::ImageRgba8(RgbaImage::new(width, height)));
        }

        fn abandon_all(&self) {
            lock(&self.pending).clear();
        }

        fn pending(&self) -> usize {
            lock(&self.pending).len()
        }
    }

    impl Grabbable for ManualGrab {
        fn grab_to_image(&self, _size: GrabSize) -> oneshot::Receiver<DynamicImage> {
            let (tx, rx) = oneshot::channel();
            lock(&self.pending).push(tx);
            rx
        }
    }

    async fn next_image(rx: &mut broadcast::Receiver<Record>) -> ImageRecord {
        match timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Ok(Record::Image(image))) => image,
            other => panic!("expected image record, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publishes_rgba_snapshot() {
        let bus = Arc::new(LocalBus::new());
        let mut rx = bus.subscribe("image");
        let emitter = ImageEmitter::new(bus, &ImageConfig::default());
        let item = Arc::new(SceneItem::new("camera", 3, 2).with_fill([10, 20, 30, 255]));

        emitter.set_target(Arc::downgrade(&item) as Weak<dyn Grabbable>);
        emitter.set_frame("camera_link");
        emitter.publish().unwrap();

        let image = next_image(&mut rx).await;
        assert_eq!(image.frame, "camera_link");
        assert_eq!((image.width, image.height), (3, 2));
        assert_eq!(image.step, 12);
        assert_eq!(image.encoding, "rgba8");
        assert_eq!(image.data.len(), 24);
        assert_eq!(&image.data[..4], &[10, 20, 30, 255]);
    }

    #[tokio::test]
    async fn test_fixed_size_and_format_conversion() {
        let bus = Arc::new(LocalBus::new());
        let mut rx = bus.subscribe("image");
        let emitter = ImageEmitter::new(bus, &ImageConfig::default());
        let item = Arc::new(SceneItem::new("camera", 4, 4));
        item.paint(DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            4,
            4,
            image::Rgb([1, 2, 3]),
        )));

        emitter.set_target(Arc::downgrade(&item) as Weak<dyn Grabbable>);
        emitter.set_size(8, 2);
        emitter.publish().unwrap();

        let image = next_image(&mut rx).await;
        assert_eq!((image.width, image.height, image.step), (8, 2, 32));
        assert_eq!(&image.data[..4], &[1, 2, 3, 255]);
    }

    #[tokio::test]
    async fn test_inactive_at_completion_drops_record() {
        let bus = Arc::new(LocalBus::new());
        let emitter = ImageEmitter::new(bus.clone(), &ImageConfig::default());
        let grab = Arc::new(ManualGrab::default());

        emitter.set_target(Arc::downgrade(&grab) as Weak<dyn Grabbable>);
        emitter.publish().unwrap();
        assert_eq!(emitter.in_flight(), 1);

        emitter.set_active(false);
        grab.complete(0, 2, 2);
        timeout(Duration::from_secs(2), emitter.drain()).await.unwrap();

        assert_eq!(emitter.in_flight(), 0);
        assert_eq!(bus.sent("image"), 0);
    }

    #[tokio::test]
    async fn test_completions_publish_in_completion_order() {
        let bus = Arc::new(LocalBus::new());
        let mut rx = bus.subscribe("image");
        let emitter = ImageEmitter::new(bus, &ImageConfig::default());
        let grab = Arc::new(ManualGrab::default());

        emitter.set_target(Arc::downgrade(&grab) as Weak<dyn Grabbable>);
        emitter.publish().unwrap();
        emitter.publish().unwrap();
        assert_eq!(grab.pending(), 2);

        grab.complete(1, 5, 1);
        assert_eq!(next_image(&mut rx).await.width, 5);
        grab.complete(0, 7, 1);
        assert_eq!(next_image(&mut rx).await.width, 7);

        timeout(Duration::from_secs(2), emitter.drain()).await.unwrap();
    }

    #[tokio::test]
    async fn test_topic_rebind_applies_to_in_flight() {
        let bus = Arc::new(LocalBus::new());
        let mut moved = bus.subscribe("overview");
        let emitter = ImageEmitter::new(bus.clone(), &ImageConfig::default());
        let grab = Arc::new(ManualGrab::default());

        emitter.set_target(Arc::downgrade(&grab) as Weak<dyn Grabbable>);
        emitter.publish().unwrap();
        emitter.set_topic("overview");
        assert_eq!(emitter.topic(), "overview");

        grab.complete(0, 1, 1);
        next_image(&mut moved).await;
        assert_eq!(bus.sent("image"), 0);
    }

    #[tokio::test]
    async fn test_abandoned_snapshot_is_dropped() {
        let bus = Arc::new(LocalBus::new());
        let emitter = ImageEmitter::new(bus.clone(), &ImageConfig::default());
        let grab = Arc::new(ManualGrab::default());

        emitter.set_target(Arc::downgrade(&grab) as Weak<dyn Grabbable>);
        emitter.publish().unwrap();
        grab.abandon_all();

        timeout(Duration::from_secs(2), emitter.drain()).await.unwrap();
        assert_eq!(bus.sent("image"), 0);
    }

    #[tokio::test]
    async fn test_emitter_dropped_before_completion() {
        let bus = Arc::new(LocalBus::new());
        let grab = Arc::new(ManualGrab::default());
        {
            let emitter = ImageEmitter::new(bus.clone(), &ImageConfig::default());
            emitter.set_target(Arc::downgrade(&grab) as Weak<dyn Grabbable>);
            emitter.publish().unwrap();
        }

        grab.complete(0, 1, 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(bus.sent("image"), 0);
    }

    #[tokio::test]
    async fn test_publish_without_target() {
        let bus = Arc::new(LocalBus::new());
        let emitter = ImageEmitter::new(bus, &ImageConfig::default());

        assert!(matches!(emitter.publish(), Err(BridgeError::NoTarget)));

        let gone = Arc::new(SceneItem::new("gone", 1, 1));
        emitter.set_target(Arc::downgrade(&gone) as Weak<dyn Grabbable>);
        drop(gone);
        assert!(matches!(emitter.publish(), Err(BridgeError::NoTarget)));
        assert_eq!(emitter.in_flight(), 0);
    }

    #[test]
    fn test_publish_outside_runtime() {
        let bus = Arc::new(LocalBus::new());
        let emitter = ImageEmitter::new(bus.clone(), &ImageConfig::default());
        let grab = Arc::new(ManualGrab::default());
        emitter.set_target(Arc::downgrade(&grab) as Weak<dyn Grabbable>);

        assert!(matches!(emitter.publish(), Err(BridgeError::NoRuntime)));
        assert_eq!(grab.pending(), 0);
        assert_eq!(emitter.in_flight(), 0);
        assert_eq!(bus.sent("image"), 0);
    }

    #[test]
    fn test_defaults() {
        let bus = Arc::new(LocalBus::new());
        let emitter = ImageEmitter::new(bus, &ImageConfig::default());
        assert!(emitter.is_active());
        assert_eq!(emitter.topic(), "image");
        assert_eq!(emitter.frame(), "");
    }
}
