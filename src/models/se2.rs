//! Planar rigid-body poses `[x, y, theta]`.
//!
//! `compose(a, b)` is the group operation `a + b`: the pose reached by applying
//! the relative motion `b`, expressed in the frame of `a`. Headings are left
//! unwrapped so that compositions stay continuous; use [`normalize_angle`] when
//! presenting or differencing angles.

use nalgebra::{Vector2, Vector3};
use std::f64::consts::{PI, TAU};

/// Wraps an angle to `[-pi, pi)`.
pub fn normalize_angle(angle: f64) -> f64 {
    (angle + PI).rem_euclid(TAU) - PI
}

pub fn compose(a: &Vector3<f64>, b: &Vector3<f64>) -> Vector3<f64> {
    let (s, c) = a.z.sin_cos();
    Vector3::new(
        a.x + c * b.x - s * b.y,
        a.y + s * b.x + c * b.y,
        a.z + b.z,
    )
}

pub fn inverse(a: &Vector3<f64>) -> Vector3<f64> {
    let (s, c) = a.z.sin_cos();
    Vector3::new(-c * a.x - s * a.y, s * a.x - c * a.y, -a.z)
}

/// Relative motion `-a + b` taking `a` to `b`.
pub fn between(a: &Vector3<f64>, b: &Vector3<f64>) -> Vector3<f64> {
    compose(&inverse(a), b)
}

/// Maps a point from the frame of `pose` to the global frame (`pose + local`).
pub fn transform_point(pose: &Vector3<f64>, local: &Vector2<f64>) -> Vector2<f64> {
    let (s, c) = pose.z.sin_cos();
    Vector2::new(
        pose.x + c * local.x - s * local.y,
        pose.y + s * local.x + c * local.y,
    )
}

/// Maps a global point into the frame of `pose` (`-pose + global`).
pub fn inverse_transform_point(pose: &Vector3<f64>, global: &Vector2<f64>) -> Vector2<f64> {
    let (s, c) = pose.z.sin_cos();
    let dx = global.x - pose.x;
    let dy = global.y - pose.y;
    Vector2::new(c * dx + s * dy, -s * dx + c * dy)
}
