//! Plane geometry for signal propagation
//!
//! Signals are circles growing out of their source; two signals interfere when
//! their circles touch and a terminal hears a signal once the circle covers it.

use std::ops::Sub;

/// A 2D point or displacement
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector2D {
    pub x: f64,
    pub y: f64,
}

impl Vector2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn dot(&self, other: &Vector2D) -> f64 {
        self.x * other.x + self.y * other.y
    }

    pub fn magnitude(&self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn distance(&self, other: &Vector2D) -> f64 {
        (*self - *other).magnitude()
    }
}

impl Sub for Vector2D {
    type Output = Vector2D;

    fn sub(self, other: Vector2D) -> Vector2D {
        Vector2D::new(self.x - other.x, self.y - other.y)
    }
}

/// A circle on the plane
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub center: Vector2D,
    pub radius: f64,
}

impl Circle {
    pub fn new(center: Vector2D, radius: f64) -> Self {
        Self { center, radius }
    }

    /// True if the two circles touch or overlap
    pub fn collides(&self, other: &Circle) -> bool {
        self.radius + other.radius >= self.center.distance(&other.center)
    }

    /// True if `point` lies inside or on the circle
    pub fn contains(&self, point: &Vector2D) -> bool {
        self.radius >= self.center.distance(point)
    }
}
