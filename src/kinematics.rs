//! Forward kinematics
//!
//! [`ForwardKinematics`] is the seam to the physics engine: feed it a
//! configuration vector, read back world positions of bodies.
//! [`SerialChain`] is a small reference engine (free-floating base plus a
//! chain of revolute joints) used by the binary and by tests.

use crate::types::{BodyId, Vec3};

/// Computes world positions of bodies from a configuration vector
pub trait ForwardKinematics {
    /// Length of the configuration vector the engine expects
    fn coordinate_count(&self) -> usize;

    /// Number of bodies that can be queried
    fn body_count(&self) -> usize;

    /// Recompute body positions for `qpos`
    fn forward(&mut self, qpos: &[f64]);

    /// World position of `body` from the last `forward` call.
    /// Unknown bodies report the origin.
    fn body_position(&self, body: BodyId) -> Vec3;
}

/// Row-major 3x3 rotation
#[derive(Debug, Clone, Copy, PartialEq)]
struct Mat3([[f64; 3]; 3]);

impl Mat3 {
    const IDENTITY: Self = Self([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);

    /// Rodrigues' rotation about a unit `axis`
    fn from_axis_angle(axis: Vec3, theta: f64) -> Self {
        let k = axis.normalize();
        let (s, c) = theta.sin_cos();
        let t = 1.0 - c;
        Self([
            [t * k.x * k.x + c, t * k.x * k.y - s * k.z, t * k.x * k.z + s * k.y],
            [t * k.x * k.y + s * k.z, t * k.y * k.y + c, t * k.y * k.z - s * k.x],
            [t * k.x * k.z - s * k.y, t * k.y * k.z + s * k.x, t * k.z * k.z + c],
        ])
    }

    fn mul(&self, rhs: &Self) -> Self {
        let mut out = [[0.0; 3]; 3];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = (0..3).map(|k| self.0[i][k] * rhs.0[k][j]).sum();
            }
        }
        Self(out)
    }

    fn apply(&self, v: Vec3) -> Vec3 {
        let m = &self.0;
        Vec3::new(
            m[0][0] * v.x + m[0][1] * v.y + m[0][2] * v.z,
            m[1][0] * v.x + m[1][1] * v.y + m[1][2] * v.z,
            m[2][0] * v.x + m[2][1] * v.y + m[2][2] * v.z,
        )
    }
}

/// Revolute joint driven by one configuration coordinate
#[derive(Debug, Clone, Copy)]
pub struct ChainJoint {
    /// Index into the configuration vector
    pub coordinate: usize,
    /// Rotation axis in the parent link frame
    pub axis: Vec3,
    /// Offset from this joint to the next body, in the rotated frame
    pub link: Vec3,
}

/// Free-floating base followed by a serial chain of revolute joints.
///
/// Body 0 is the fixed world origin, body 1 the root placed by the first
/// three coordinates, and body `k + 2` the tip of joint `k`.
#[derive(Debug, Clone)]
pub struct SerialChain {
    coordinate_count: usize,
    joints: Vec<ChainJoint>,
    positions: Vec<Vec3>,
}

impl SerialChain {
    pub fn new(coordinate_count: usize) -> Self {
        Self { coordinate_count, joints: Vec::new(), positions: vec![Vec3::ZERO; 2] }
    }

    pub fn with_joint(mut self, coordinate: usize, axis: Vec3, link: Vec3) -> Self {
        self.joints.push(ChainJoint { coordinate, axis, link });
        self.positions.push(Vec3::ZERO);
        self
    }

    /// Reference model: one joint per tunable coordinate `first..count`,
    /// axes cycling x/y/z, hanging down from the root
    pub fn reference(first_joint: usize, coordinate_count: usize, link_length: f64) -> Self {
        let axes = [Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.0, 0.0, 1.0)];
        (first_joint..coordinate_count)
            .enumerate()
            .fold(Self::new(coordinate_count), |chain, (k, coord)| {
                chain.with_joint(coord, axes[k % 3], Vec3::new(0.0, 0.0, -link_length))
            })
    }

    #[cfg(test)]
    pub fn joints(&self) -> &[ChainJoint] {
        &self.joints
    }

    /// Body at the end of the chain
    pub fn tip(&self) -> BodyId {
        self.positions.len() - 1
    }
}

impl ForwardKinematics for SerialChain {
    fn coordinate_count(&self) -> usize {
        self.coordinate_count
    }

    fn body_count(&self) -> usize {
        self.positions.len()
    }

    fn forward(&mut self, q: &[f64]) {
        let coord = |i: usize| q.get(i).copied().unwrap_or(0.0);

        let mut pos = Vec3::new(coord(0), coord(1), coord(2));
        let mut rot = Mat3::IDENTITY;
        self.positions[0] = Vec3::ZERO;
        self.positions[1] = pos;

        for (k, joint) in self.joints.iter().enumerate() {
            rot = rot.mul(&Mat3::from_axis_angle(joint.axis, coord(joint.coordinate)));
            pos = pos + rot.apply(joint.link);
            self.positions[k + 2] = pos;
        }
    }

    fn body_position(&self, body: BodyId) -> Vec3 {
        self.positions.get(body).copied().unwrap_or(Vec3::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn two_link() -> SerialChain {
        SerialChain::new(5)
            .with_joint(3, Vec3::new(0.0, 0.0, 1.0), Vec3::new(1.0, 0.0, 0.0))
            .with_joint(4, Vec3::new(0.0, 0.0, 1.0), Vec3::new(1.0, 0.0, 0.0))
    }

    fn close(a: Vec3, b: Vec3) -> bool {
        a.distance(b) < 1e-9
    }

    #[test]
    fn test_zero_configuration_is_straight() {
        let mut chain = two_link();
        chain.forward(&[0.0; 5]);
        assert_eq!(chain.body_count(), 4);
        assert!(close(chain.body_position(2), Vec3::new(1.0, 0.0, 0.0)));
        assert!(close(chain.body_position(chain.tip()), Vec3::new(2.0, 0.0, 0.0)));
    }

    #[test]
    fn test_root_translation_moves_every_body() {
        let mut chain = two_link();
        chain.forward(&[1.0, 2.0, 3.0, 0.0, 0.0]);
        assert!(close(chain.body_position(1), Vec3::new(1.0, 2.0, 3.0)));
        assert!(close(chain.body_position(3), Vec3::new(3.0, 2.0, 3.0)));
        assert!(close(chain.body_position(0), Vec3::ZERO));
    }

    #[test]
    fn test_rotations_accumulate() {
        let mut chain = two_link();
        chain.forward(&[0.0, 0.0, 0.0, FRAC_PI_2, FRAC_PI_2]);
        assert!(close(chain.body_position(2), Vec3::new(0.0, 1.0, 0.0)));
        assert!(close(chain.body_position(3), Vec3::new(-1.0, 1.0, 0.0)));
    }

    #[test]
    fn test_unknown_body_reports_origin() {
        let mut chain = two_link();
        chain.forward(&[1.0; 5]);
        assert_eq!(chain.body_position(99), Vec3::ZERO);
    }

    #[test]
    fn test_reference_chain_layout() {
        let chain = SerialChain::reference(15, 35, 0.05);
        assert_eq!(chain.coordinate_count(), 35);
        assert_eq!(chain.joints().len(), 20);
        assert_eq!(chain.joints()[0].coordinate, 15);
        assert_eq!(chain.tip(), 21);
    }
}
