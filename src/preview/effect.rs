// SPDX-License-Identifier: GPL-3.0-only

//! Camera frame placement: rotation, aspect correction and sampling transform

use crate::errors::RenderResult;
use crate::shaders::{DEFAULT_FRAGMENT_SHADER, Effect, UniformBlock, UniformField, UniformKind};
use glam::{Mat4, Vec3};

/// Distance from the eye to the plane the frame is drawn on
const EYE_DISTANCE: f32 = 5.0;

/// Half-height of the visible plane at [`EYE_DISTANCE`]
const PLANE_HALF_HEIGHT: f32 = 1.0;

/// Draws a camera frame or still image scaled to its own aspect ratio
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviewEffect {
    pub mvp: Mat4,
    /// Quad texture coordinates to sample coordinates
    pub st: Mat4,
    /// Width over height of the source frame
    pub camera_ratio: f32,
}

impl Default for PreviewEffect {
    fn default() -> Self {
        Self {
            mvp: Mat4::IDENTITY,
            st: Mat4::IDENTITY,
            camera_ratio: 1.0,
        }
    }
}

impl Effect for PreviewEffect {
    fn label(&self) -> &'static str {
        "preview"
    }

    fn vertex_source(&self) -> &'static str {
        include_str!("../shaders/wgsl/preview_vertex.wgsl")
    }

    fn fragment_source(&self) -> &'static str {
        DEFAULT_FRAGMENT_SHADER
    }

    fn uniform_fields(&self) -> &'static [UniformField] {
        const FIELDS: &[UniformField] = &[
            UniformField::new("mvp", UniformKind::Mat4),
            UniformField::new("st", UniformKind::Mat4),
            UniformField::new("camera_ratio", UniformKind::Float),
        ];
        FIELDS
    }

    fn on_draw(&self, uniforms: &mut UniformBlock) -> RenderResult<()> {
        uniforms.set_mat4("mvp", &self.mvp.to_cols_array())?;
        uniforms.set_mat4("st", &self.st.to_cols_array())?;
        uniforms.set_f32("camera_ratio", self.camera_ratio)
    }
}

/// Camera looking down -Z at the frame plane
pub fn view_matrix() -> Mat4 {
    Mat4::look_at_rh(Vec3::new(0.0, 0.0, EYE_DISTANCE), Vec3::ZERO, Vec3::Y)
}

/// Projection showing `[-aspect, aspect] x [-1, 1]` of the frame plane
pub fn projection_matrix(width: u32, height: u32) -> Mat4 {
    let aspect = width as f32 / height.max(1) as f32;
    let fov_y = 2.0 * (PLANE_HALF_HEIGHT / EYE_DISTANCE).atan();
    Mat4::perspective_rh(fov_y, aspect, 1.0, EYE_DISTANCE * 2.0)
}

/// Rotate the frame back by the camera orientation.
///
/// A front camera that is not shown mirrored gets its vertical axis flipped
/// before rotation, which undoes the sensor mirror.
pub fn model_matrix(orientation: u32, face_camera: bool, face_mirror: bool) -> Mat4 {
    let rotation = Mat4::from_rotation_z(-(orientation as f32).to_radians());
    if face_camera && !face_mirror {
        rotation * Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0))
    } else {
        rotation
    }
}
