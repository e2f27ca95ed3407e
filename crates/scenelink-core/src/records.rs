//! Records handed to the transport

use chrono::{DateTime, Utc};
use glam::DQuat;
use serde::{Deserialize, Serialize};

use crate::units::WorldPoint;

/// Pixel encoding tag carried by every [`ImageRecord`]
pub const RGBA8: &str = "rgba8";

/// Namespace shared by all footprint markers
pub const FOOTPRINT_NAMESPACE: &str = "scene_items_footprints";

/// Width of the footprint line strip, in meters
pub const FOOTPRINT_LINE_WIDTH: f64 = 0.005;

/// A stamped transform relating a child frame to its parent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformRecord {
    /// Translation in meters
    pub translation: [f64; 3],
    /// Unit rotation, yaw only
    pub rotation: DQuat,
    pub parent_frame: String,
    pub child_frame: String,
    pub stamp: DateTime<Utc>,
}

impl TransformRecord {
    /// Yaw angle about +Z in radians
    pub fn yaw(&self) -> f64 {
        let (_, _, yaw) = self.rotation.to_euler(glam::EulerRot::XYZ);
        yaw
    }
}

/// A raster snapshot of a scene item
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub frame: String,
    pub width: u32,
    pub height: u32,
    /// Row stride in bytes
    pub step: u32,
    pub encoding: String,
    pub data: Vec<u8>,
    pub stamp: DateTime<Utc>,
}

impl std::fmt::Debug for ImageRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageRecord")
            .field("frame", &self.frame)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("step", &self.step)
            .field("encoding", &self.encoding)
            .field("bytes", &self.data.len())
            .field("stamp", &self.stamp)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    LineStrip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerAction {
    Add,
}

/// RGBA color with components in `0.0..=1.0`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLUE: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 1.0,
        a: 1.0,
    };
}

/// A closed polyline outlining one scene item, centered on its centroid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerRecord {
    pub namespace: String,
    /// Unique within one batch; reassigned on every batch
    pub id: u32,
    pub frame: String,
    pub kind: MarkerKind,
    pub action: MarkerAction,
    pub orientation: DQuat,
    pub line_width: f64,
    pub color: Color,
    /// First point repeated at the end
    pub points: Vec<WorldPoint>,
    pub stamp: DateTime<Utc>,
}

/// Markers published together, replacing any previous batch
pub type MarkerBatch = Vec<MarkerRecord>;

/// Position reported by an external pose source, in meters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseRecord {
    pub position: [f64; 3],
    pub stamp: DateTime<Utc>,
}

impl PoseRecord {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            position: [x, y, z],
            stamp: Utc::now(),
        }
    }
}

/// Everything that travels over a [`crate::Transport`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Record {
    #[serde(rename = "transform")]
    Transform(TransformRecord),
    #[serde(rename = "image")]
    Image(ImageRecord),
    #[serde(rename = "markers")]
    Markers(MarkerBatch),
    #[serde(rename = "pose")]
    Pose(PoseRecord),
    #[serde(rename = "signal")]
    Signal,
}

impl Record {
    /// Short name of the record kind, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Record::Transform(_) => "transform",
            Record::Image(_) => "image",
            Record::Markers(_) => "markers",
            Record::Pose(_) => "pose",
            Record::Signal => "signal",
        }
    }
}
