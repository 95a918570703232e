//! Shared geometric and identifier types

use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Neg, Sub};

/// Index of a body in the forward-kinematics model
pub type BodyId = usize;

/// 3D vector in world (or root-relative) coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0, z: 0.0 };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn length_sq(self) -> f64 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }

    pub fn length(self) -> f64 {
        self.length_sq().sqrt()
    }

    pub fn normalize(self) -> Self {
        let len = self.length();
        if len < 1e-12 {
            return Self::ZERO;
        }
        self.scale(1.0 / len)
    }

    pub fn distance(self, other: Self) -> f64 {
        (self - other).length()
    }

    pub fn scale(self, s: f64) -> Self {
        Self { x: self.x * s, y: self.y * s, z: self.z * s }
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

impl From<[f64; 3]> for Vec3 {
    fn from(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

impl Add for Vec3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self { x: self.x + rhs.x, y: self.y + rhs.y, z: self.z + rhs.z }
    }
}

impl Sub for Vec3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self { x: self.x - rhs.x, y: self.y - rhs.y, z: self.z - rhs.z }
    }
}

impl Mul<f64> for Vec3 {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self {
        self.scale(rhs)
    }
}

impl Neg for Vec3 {
    type Output = Self;
    fn neg(self) -> Self {
        Self { x: -self.x, y: -self.y, z: -self.z }
    }
}

/// Frame a positional target is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetFrame {
    /// Absolute world position of the tracked body
    World,
    /// Offset of the tracked body from the root body
    RelativeToRoot,
}

/// Positional goal for a tracked body point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Target {
    pub point: Vec3,
    pub frame: TargetFrame,
}

impl Target {
    pub const fn world(point: Vec3) -> Self {
        Self { point, frame: TargetFrame::World }
    }

    pub const fn relative(offset: Vec3) -> Self {
        Self { point: offset, frame: TargetFrame::RelativeToRoot }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec3_arithmetic() {
        let a = Vec3::new(1.0, 2.0, 3.0);
        let b = Vec3::new(4.0, 5.0, 6.0);
        assert_eq!(a + b, Vec3::new(5.0, 7.0, 9.0));
        assert_eq!(b - a, Vec3::new(3.0, 3.0, 3.0));
        assert_eq!(-a, Vec3::new(-1.0, -2.0, -3.0));
        assert_eq!(a * 2.0, Vec3::new(2.0, 4.0, 6.0));
    }

    #[test]
    fn test_vec3_length_and_distance() {
        let v = Vec3::new(3.0, 4.0, 0.0);
        assert!((v.length() - 5.0).abs() < 1e-12);
        assert!((Vec3::ZERO.distance(v) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_vec3_normalize_zero_is_zero() {
        assert_eq!(Vec3::ZERO.normalize(), Vec3::ZERO);
        let n = Vec3::new(0.0, 0.0, 2.0).normalize();
        assert!((n.z - 1.0).abs() < 1e-12);
    }
}
