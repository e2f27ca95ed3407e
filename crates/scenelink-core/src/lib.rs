//! SceneLink Core - Shared types for the scene-to-stream bridge
//!
//! This crate provides the foundational pieces used by the bridge:
//! - Unit and orientation conversion between scene and world space
//! - Record types handed to the transport (transforms, images, markers, poses)
//! - Scene item traits and an in-memory scene item
//! - The transport trait and an in-process broadcast bus

pub mod item;
pub mod records;
pub mod transport;
pub mod units;

pub use item::{
    GrabSize, Grabbable, Movable, Property, PropertyMap, PropertySource, SceneItem, TrackedItem,
};
pub use records::{
    Color, ImageRecord, MarkerAction, MarkerBatch, MarkerKind, MarkerRecord, PoseRecord, Record,
    TransformRecord,
};
pub use transport::{LocalBus, Publisher, Transport};
pub use units::{ScenePoint, WorldPoint};
