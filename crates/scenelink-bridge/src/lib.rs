//! SceneLink Bridge - Streams scene item state onto a transport
//!
//! This crate connects items living in a 2D scene to world-space consumers:
//! - Periodic frame broadcasting of an item's pose relative to a reference
//! - On-demand raster snapshots of an item
//! - Footprint marker batches built from item polygons
//! - Empty signals and pose-driven item placement
//! - TOML configuration for all of the above

pub mod broadcaster;
pub mod config;
pub mod error;
pub mod markers;
pub mod position;
pub mod signal;
pub mod snapshot;

pub use broadcaster::{FrameBroadcaster, LoopState};
pub use config::{load_config, save_default_config, BridgeConfig, ConfigError};
pub use error::BridgeError;
pub use markers::MarkerBatchBuilder;
pub use position::PositionController;
pub use signal::SignalEmitter;
pub use snapshot::ImageEmitter;
