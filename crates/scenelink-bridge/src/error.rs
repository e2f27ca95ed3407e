//! Errors reported by bridge components

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("No target item configured")]
    NoTarget,
    #[error("No topic configured")]
    NoTopic,
    #[error("Invalid scale: {0} (must be finite and positive)")]
    InvalidScale(f64),
    #[error("Invalid item: {0}")]
    InvalidItem(String),
    #[error("Item {0} has an empty polygon")]
    EmptyPolygon(String),
    #[error("No Tokio runtime on the calling thread")]
    NoRuntime,
    #[error("Failed to spawn broadcaster thread: {0}")]
    Spawn(#[from] std::io::Error),
}
