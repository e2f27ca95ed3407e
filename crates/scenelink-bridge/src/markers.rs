//! Footprint markers for scene items
//!
//! Each item exposes a `name` and a `boundingbox` object whose `vertices`
//! property is a polygon in item-local pixels. Every valid item becomes one
//! closed line strip in meters, centered on the polygon's centroid.

use chrono::{DateTime, Utc};
use scenelink_core::records::{FOOTPRINT_LINE_WIDTH, FOOTPRINT_NAMESPACE};
use scenelink_core::units::{is_valid_scale, to_world};
use scenelink_core::{
    Color, MarkerAction, MarkerBatch, MarkerKind, MarkerRecord, Publisher, Record, TrackedItem,
    Transport, WorldPoint,
};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use crate::config::MarkersConfig;
use crate::error::BridgeError;

/// Builds and publishes footprint marker batches
pub struct MarkerBatchBuilder {
    scale: f64,
    publisher: Publisher,
}

impl MarkerBatchBuilder {
    pub fn new(transport: Arc<dyn Transport>, config: &MarkersConfig) -> Self {
        let scale = if is_valid_scale(config.pixels_per_meter) {
            config.pixels_per_meter
        } else {
            debug!(scale = config.pixels_per_meter, "Ignoring invalid configured scale");
            1.0
        };
        Self {
            scale,
            publisher: Publisher::new(transport, &config.topic),
        }
    }

    pub fn set_scale(&mut self, pixels_per_meter: f64) -> Result<(), BridgeError> {
        if !is_valid_scale(pixels_per_meter) {
            return Err(BridgeError::InvalidScale(pixels_per_meter));
        }
        self.scale = pixels_per_meter;
        Ok(())
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Build one marker per valid item, in input order.
    ///
    /// Invalid items are skipped and do not consume an id, so the ids of a
    /// batch are always `0..len`.
    pub fn build_batch(&self, items: &[Weak<dyn TrackedItem>]) -> MarkerBatch {
        let stamp = Utc::now();
        let mut batch = MarkerBatch::with_capacity(items.len());

        for (index, handle) in items.iter().enumerate() {
            let Some(item) = handle.upgrade() else {
                warn!(index, "Footprint target does not exist, skipping it");
                continue;
            };

            let id = batch.len() as u32;
            match build_marker(item.as_ref(), id, self.scale, stamp) {
                Ok(marker) => batch.push(marker),
                Err(e) => warn!(index, error = %e, "Skipping footprint target"),
            }
        }

        batch
    }

    /// Build a batch and publish it as a single record.
    ///
    /// The published batch replaces whatever was visualized before.
    pub fn publish_targets(&self, items: &[Weak<dyn TrackedItem>]) -> MarkerBatch {
        let batch = self.build_batch(items);
        info!(
            requested = items.len(),
            published = batch.len(),
            topic = %self.publisher.topic(),
            "Publishing footprints"
        );
        self.publisher.publish(Record::Markers(batch.clone()));
        batch
    }
}

fn build_marker(
    item: &dyn TrackedItem,
    id: u32,
    scale: f64,
    stamp: DateTime<Utc>,
) -> Result<MarkerRecord, BridgeError> {
    let name = item
        .property("name")
        .and_then(|p| p.as_text().map(str::to_string))
        .ok_or_else(|| BridgeError::InvalidItem("missing name".to_string()))?;

    let boundingbox = item
        .property("boundingbox")
        .and_then(|p| p.as_object().cloned())
        .ok_or_else(|| BridgeError::InvalidItem(format!("{} has no boundingbox", name)))?;

    let vertices = boundingbox
        .property("vertices")
        .and_then(|p| p.as_points().map(<[_]>::to_vec))
        .ok_or_else(|| BridgeError::InvalidItem(format!("{} has no vertices", name)))?;

    if vertices.is_empty() {
        return Err(BridgeError::EmptyPolygon(name));
    }

    let mut points = Vec::with_capacity(vertices.len() + 1);
    let (mut sum_x, mut sum_y) = (0.0, 0.0);
    for vertex in &vertices {
        let (x, y) = to_world(vertex.x, vertex.y, scale, None);
        sum_x += x;
        sum_y += y;
        points.push(WorldPoint::new(x, y, 0.0));
    }
    points.push(points[0]);

    let count = vertices.len() as f64;
    let (center_x, center_y) = (sum_x / count, sum_y / count);
    for p in &mut points {
        p.x -= center_x;
        p.y -= center_y;
    }

    debug!(item = %name, id, vertices = vertices.len(), "Built footprint marker");

    Ok(MarkerRecord {
        namespace: FOOTPRINT_NAMESPACE.to_string(),
        id,
        frame: format!("/{}", name),
        kind: MarkerKind::LineStrip,
        action: MarkerAction::Add,
        orientation: glam::DQuat::IDENTITY,
        line_width: FOOTPRINT_LINE_WIDTH,
        color: Color::BLUE,
        points,
        stamp,
    })
}
