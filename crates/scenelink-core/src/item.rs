//! Scene item query surface
//!
//! The bridge never owns scene items. It holds `Weak` handles to objects that
//! implement the traits below and treats an expired handle as an invalid
//! item. [`SceneItem`] is an in-memory implementation used by hosts that do
//! not bring their own scene graph, and by tests.
//!
//! Geometry is read from other threads without locks. Each field is an
//! independent atomic, so a reader can observe a position from one update and
//! a rotation from the next. At the sampling rates involved this is accepted.

use image::{imageops::FilterType, DynamicImage, Rgba, RgbaImage};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::oneshot;

use crate::units::ScenePoint;

/// Value returned by a named property lookup
#[derive(Clone)]
pub enum Property {
    Text(String),
    Number(f64),
    Points(Vec<ScenePoint>),
    Object(Arc<dyn PropertySource>),
}

impl Property {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Property::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Property::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_points(&self) -> Option<&[ScenePoint]> {
        match self {
            Property::Points(points) => Some(points.as_slice()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Arc<dyn PropertySource>> {
        match self {
            Property::Object(obj) => Some(obj),
            _ => None,
        }
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Property::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Property::Number(n) => f.debug_tuple("Number").field(n).finish(),
            Property::Points(p) => f.debug_tuple("Points").field(p).finish(),
            Property::Object(_) => f.write_str("Object(..)"),
        }
    }
}

/// Anything that answers named property lookups
pub trait PropertySource: Send + Sync {
    fn property(&self, key: &str) -> Option<Property>;
}

/// A scene entity with a world-space position and a rotation
pub trait TrackedItem: PropertySource {
    /// Position in scene pixels, Y down
    fn position(&self) -> ScenePoint;

    /// Rotation in degrees, clockwise positive
    fn rotation(&self) -> f64;
}

/// Requested raster size. A zero in either dimension means natural size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GrabSize {
    pub width: u32,
    pub height: u32,
}

impl GrabSize {
    pub const NATURAL: GrabSize = GrabSize { width: 0, height: 0 };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_natural(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Asynchronous rasterization.
///
/// The returned receiver resolves once the raster is ready. Dropping the
/// sender without sending abandons the request.
pub trait Grabbable: Send + Sync {
    fn grab_to_image(&self, size: GrabSize) -> oneshot::Receiver<DynamicImage>;
}

/// Items whose position can be driven from outside the UI
pub trait Movable: Send + Sync {
    fn set_position(&self, position: ScenePoint);
}

/// `f64` stored in an `AtomicU64`
#[derive(Debug, Default)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed)
    }
}

/// Property bag usable as a nested property object
#[derive(Default)]
pub struct PropertyMap {
    values: RwLock<HashMap<String, Property>>,
}

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &str, value: Property) {
        if let Ok(mut values) = self.values.write() {
            values.insert(key.to_string(), value);
        }
    }

    pub fn remove(&self, key: &str) {
        if let Ok(mut values) = self.values.write() {
            values.remove(key);
        }
    }
}

impl PropertySource for PropertyMap {
    fn property(&self, key: &str) -> Option<Property> {
        self.values.read().ok()?.get(key).cloned()
    }
}

/// In-memory scene item
pub struct SceneItem {
    x: AtomicF64,
    y: AtomicF64,
    rotation: AtomicF64,
    width: u32,
    height: u32,
    fill: Rgba<u8>,
    properties: PropertyMap,
    surface: RwLock<Option<DynamicImage>>,
}

impl SceneItem {
    /// Create an item with a natural size in pixels
    pub fn new(name: &str, width: u32, height: u32) -> Self {
        let properties = PropertyMap::new();
        properties.set("name", Property::Text(name.to_string()));
        Self {
            x: AtomicF64::new(0.0),
            y: AtomicF64::new(0.0),
            rotation: AtomicF64::new(0.0),
            width,
            height,
            fill: Rgba([0, 0, 0, 0]),
            properties,
            surface: RwLock::new(None),
        }
    }

    pub fn with_position(self, x: f64, y: f64) -> Self {
        self.set_position(ScenePoint::new(x, y));
        self
    }

    pub fn with_rotation(self, degrees: f64) -> Self {
        self.set_rotation(degrees);
        self
    }

    /// Color used when rasterizing without a painted surface
    pub fn with_fill(mut self, fill: [u8; 4]) -> Self {
        self.fill = Rgba(fill);
        self
    }

    /// Attach a footprint polygon in item-local pixels
    pub fn with_polygon(self, vertices: Vec<ScenePoint>) -> Self {
        self.set_polygon(vertices);
        self
    }

    pub fn name(&self) -> String {
        self.properties
            .property("name")
            .and_then(|p| p.as_text().map(str::to_string))
            .unwrap_or_default()
    }

    pub fn natural_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn set_rotation(&self, degrees: f64) {
        self.rotation.store(degrees);
    }

    pub fn set_property(&self, key: &str, value: Property) {
        self.properties.set(key, value);
    }

    /// Replace the footprint polygon, exposed as `boundingbox.vertices`
    pub fn set_polygon(&self, vertices: Vec<ScenePoint>) {
        let boundingbox = PropertyMap::new();
        boundingbox.set("vertices", Property::Points(vertices));
        self.properties
            .set("boundingbox", Property::Object(Arc::new(boundingbox)));
    }

    /// Replace what a snapshot of this item shows
    pub fn paint(&self, surface: DynamicImage) {
        if let Ok(mut current) = self.surface.write() {
            *current = Some(surface);
        }
    }

    fn render(&self, size: GrabSize) -> DynamicImage {
        let (width, height) = if size.is_natural() {
            self.natural_size()
        } else {
            (size.width, size.height)
        };

        let surface = self.surface.read().ok().and_then(|s| s.clone());
        match surface {
            Some(img) if img.width() == width && img.height() == height => img,
            Some(img) => img.resize_exact(width, height, FilterType::Nearest),
            None => DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, self.fill)),
        }
    }
}

impl PropertySource for SceneItem {
    fn property(&self, key: &str) -> Option<Property> {
        self.properties.property(key)
    }
}

impl TrackedItem for SceneItem {
    fn position(&self) -> ScenePoint {
        ScenePoint::new(self.x.load(), self.y.load())
    }

    fn rotation(&self) -> f64 {
        self.rotation.load()
    }
}

impl Movable for SceneItem {
    fn set_position(&self, position: ScenePoint) {
        self.x.store(position.x);
        self.y.store(position.y);
    }
}

impl Grabbable for SceneItem {
    fn grab_to_image(&self, size: GrabSize) -> oneshot::Receiver<DynamicImage> {
        let (tx, rx) = oneshot::channel();
        let raster = self.render(size);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                // Completion is delivered on a later poll, never inline
                handle.spawn(async move {
                    tokio::task::yield_now().await;
                    let _ = tx.send(raster);
                });
            }
            Err(_) => {
                let _ = tx.send(raster);
            }
        }
        rx
    }
}
