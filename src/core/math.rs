// Math utilities and helper functions

use glam::Vec2;
use rapier2d::prelude::{point, vector, Isometry, Point, Real, Vector};
use rapier2d::na as nalgebra;

/// Position and rotation of a visual object in world space
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform2D {
    /// World position of the object's origin
    pub position: Vec2,

    /// Rotation in radians, counter-clockwise
    pub rotation: f32,
}

impl Transform2D {
    pub fn new(position: Vec2, rotation: f32) -> Self {
        Self { position, rotation }
    }

    /// Transform at `position` with no rotation
    pub fn from_position(position: Vec2) -> Self {
        Self::new(position, 0.0)
    }

    /// Map a point from this transform's local frame into world space
    pub fn transform_point(&self, local: Vec2) -> Vec2 {
        self.position + Vec2::from_angle(self.rotation).rotate(local)
    }

    /// Map a world-space point into this transform's local frame
    pub fn inverse_transform_point(&self, world: Vec2) -> Vec2 {
        Vec2::from_angle(-self.rotation).rotate(world - self.position)
    }

    /// Check whether two transforms match within `epsilon`
    pub fn approx_eq(&self, other: &Transform2D, epsilon: f32) -> bool {
        approx_equal(self.position.x, other.position.x, epsilon)
            && approx_equal(self.position.y, other.position.y, epsilon)
            && approx_equal(wrap_angle(self.rotation - other.rotation), 0.0, epsilon)
    }
}

/// Check if two f32 values are approximately equal
pub fn approx_equal(a: f32, b: f32, epsilon: f32) -> bool {
    (a - b).abs() < epsilon
}

/// Wrap an angle into `(-PI, PI]`
pub fn wrap_angle(angle: f32) -> f32 {
    use std::f32::consts::{PI, TAU};
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

/// 2D cross product (z component of the 3D cross product)
pub fn cross(a: Vec2, b: Vec2) -> f32 {
    a.x * b.y - a.y * b.x
}

// Conversions between glam (public API) and nalgebra (rapier internals)

pub fn to_vector(v: Vec2) -> Vector<Real> {
    vector![v.x, v.y]
}

pub fn to_point(v: Vec2) -> Point<Real> {
    point![v.x, v.y]
}

pub fn from_vector(v: &Vector<Real>) -> Vec2 {
    Vec2::new(v.x, v.y)
}

pub fn from_point(p: &Point<Real>) -> Vec2 {
    Vec2::new(p.x, p.y)
}

/// Build a rapier isometry from a transform
pub fn to_isometry(transform: &Transform2D) -> Isometry<Real> {
    Isometry::new(to_vector(transform.position), transform.rotation)
}

/// Read a transform back out of a rapier isometry
pub fn from_isometry(iso: &Isometry<Real>) -> Transform2D {
    Transform2D::new(from_vector(&iso.translation.vector), iso.rotation.angle())
}
