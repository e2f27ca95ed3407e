//! Unit and orientation conversion between scene and world space
//!
//! Scene space is what the UI draws in: pixels, Y pointing down, rotations in
//! degrees with clockwise positive. World space is what consumers expect:
//! meters, right-handed with Y and Z up, rotations in radians with
//! counter-clockwise positive.
//!
//! `scale` is always expressed in pixels per meter.

use glam::DQuat;
use serde::{Deserialize, Serialize};

/// A point in scene space (pixels, Y down)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenePoint {
    pub x: f64,
    pub y: f64,
}

impl ScenePoint {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<(f64, f64)> for ScenePoint {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

impl std::ops::Sub for ScenePoint {
    type Output = ScenePoint;

    fn sub(self, rhs: ScenePoint) -> ScenePoint {
        ScenePoint::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// A point in world space (meters, Y up, Z up)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl WorldPoint {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn to_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

/// Convert a scene-space offset to world coordinates.
///
/// `x = px / scale + origin.x`, `y = -py / scale + origin.y`. The origin is a
/// world-space offset added after scaling; `None` means the world origin.
pub fn to_world(px: f64, py: f64, scale: f64, origin: Option<WorldPoint>) -> (f64, f64) {
    let x = px / scale;
    let y = -py / scale;
    match origin {
        Some(o) => (x + o.x, y + o.y),
        None => (x, y),
    }
}

/// Convert world coordinates back into scene space.
///
/// Inverse of [`to_world`] where the origin is a scene-space position, e.g.
/// the position of a reference item the pose is expressed against.
pub fn to_scene(x: f64, y: f64, scale: f64, origin: Option<ScenePoint>) -> (f64, f64) {
    let px = x * scale;
    let py = -y * scale;
    match origin {
        Some(o) => (px + o.x, py + o.y),
        None => (px, py),
    }
}

/// Yaw angle in radians for a scene rotation, optionally relative to a
/// reference rotation. The sign flip turns clockwise-positive into
/// counter-clockwise-positive.
pub fn yaw(rotation_deg: f64, reference_deg: Option<f64>) -> f64 {
    -(rotation_deg - reference_deg.unwrap_or(0.0)).to_radians()
}

/// Unit rotation about the vertical (Z) axis
pub fn yaw_quaternion(theta: f64) -> DQuat {
    DQuat::from_rotation_z(theta)
}

/// Check that a scale can be divided by
pub fn is_valid_scale(scale: f64) -> bool {
    scale.is_finite() && scale > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, PI};

    const EPS: f64 = 1e-12;

    #[test]
    fn test_to_world_with_origin() {
        let (x, y) = to_world(100.0, 50.0, 2.0, Some(WorldPoint::new(10.0, 10.0, 0.0)));
        assert!((x - 60.0).abs() < EPS);
        assert!((y + 15.0).abs() < EPS);
    }

    #[test]
    fn test_world_point_array_order() {
        let p = WorldPoint::new(1.0, -2.0, 0.5);
        assert_eq!(p.to_array(), [1.0, -2.0, 0.5]);
    }

    #[test]
    fn test_to_world_flips_vertical_axis() {
        let (x, y) = to_world(3.0, 4.0, 1.0, None);
        assert_eq!((x, y), (3.0, -4.0));
    }

    #[test]
    fn test_to_scene_inverts_to_world() {
        let (px, py) = to_scene(1.5, -2.0, 100.0, Some(ScenePoint::new(20.0, 40.0)));
        assert!((px - 170.0).abs() < EPS);
        assert!((py - 240.0).abs() < EPS);

        let (x, y) = to_world(px - 20.0, py - 40.0, 100.0, None);
        assert!((x - 1.5).abs() < EPS);
        assert!((y + 2.0).abs() < EPS);
    }

    #[test]
    fn test_yaw() {
        assert!((yaw(90.0, None) + FRAC_PI_2).abs() < EPS);
        assert!((yaw(90.0, Some(30.0)) + 60.0 * PI / 180.0).abs() < EPS);
        assert_eq!(yaw(0.0, None), 0.0);
    }

    #[test]
    fn test_yaw_quaternion_is_about_z() {
        let q = yaw_quaternion(-FRAC_PI_2);
        assert!(q.is_normalized());
        assert!(q.x.abs() < EPS && q.y.abs() < EPS);
        assert!((q.z + (FRAC_PI_2 / 2.0).sin()).abs() < EPS);
        assert!((q.w - (FRAC_PI_2 / 2.0).cos()).abs() < EPS);
    }

    #[test]
    fn test_scale_validation() {
        assert!(is_valid_scale(1.0));
        assert!(!is_valid_scale(0.0));
        assert!(!is_valid_scale(-3.0));
        assert!(!is_valid_scale(f64::NAN));
    }
}
