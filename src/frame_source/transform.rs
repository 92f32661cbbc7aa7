// SPDX-License-Identifier: GPL-3.0-only

//! Sample-transform matrices
//!
//! A transform maps quad texture coordinates `(u, v, 0, 1)` to the
//! coordinates actually sampled. Quad coordinates put v = 1 at the top while
//! sensor rows are uploaded top row first, so every camera frame needs a
//! vertical flip. Front-facing sensors also need a horizontal one.

use glam::{Mat4, Vec4};

/// `v -> 1 - v`
pub const FLIP_V: Mat4 = Mat4::from_cols(
    Vec4::new(1.0, 0.0, 0.0, 0.0),
    Vec4::new(0.0, -1.0, 0.0, 0.0),
    Vec4::new(0.0, 0.0, 1.0, 0.0),
    Vec4::new(0.0, 1.0, 0.0, 1.0),
);

/// `u -> 1 - u`
pub const FLIP_H: Mat4 = Mat4::from_cols(
    Vec4::new(-1.0, 0.0, 0.0, 0.0),
    Vec4::new(0.0, 1.0, 0.0, 0.0),
    Vec4::new(0.0, 0.0, 1.0, 0.0),
    Vec4::new(1.0, 0.0, 0.0, 1.0),
);

/// Transform for frames read out of a sensor.
///
/// The mirror is applied first, then the fixed vertical flip.
pub fn sensor_transform(face_camera: bool) -> Mat4 {
    if face_camera {
        FLIP_V * FLIP_H
    } else {
        FLIP_V
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;

    fn apply(m: Mat4, u: f32, v: f32) -> Vec2 {
        let p = m * Vec4::new(u, v, 0.0, 1.0);
        Vec2::new(p.x, p.y)
    }

    #[test]
    fn test_flip_v() {
        assert_eq!(apply(FLIP_V, 0.25, 1.0), Vec2::new(0.25, 0.0));
        assert_eq!(apply(FLIP_V, 0.25, 0.0), Vec2::new(0.25, 1.0));
    }

    #[test]
    fn test_face_camera_flips_both_axes() {
        let m = sensor_transform(true);
        assert_eq!(apply(m, 0.0, 1.0), Vec2::new(1.0, 0.0));
        assert_eq!(apply(m, 0.75, 0.25), Vec2::new(0.25, 0.75));
        assert_eq!(sensor_transform(false), FLIP_V);
    }
}
