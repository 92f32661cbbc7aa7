// SPDX-License-Identifier: GPL-3.0-only

use crate::errors::RenderResult;
use crate::shaders::{Effect, UniformBlock, UniformField, UniformKind};

/// Sepia tone, stored column-major: each group of four is one output channel
pub const SEPIA_MATRIX: [f32; 16] = [
    0.3588, 0.7044, 0.1368, 0.0, //
    0.2990, 0.5870, 0.1140, 0.0, //
    0.2392, 0.4696, 0.0912, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

pub const IDENTITY_MATRIX: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Multiplies each pixel by a 4x4 matrix, blended with the original by
/// `intensity`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorMatrix {
    pub matrix: [f32; 16],
    pub intensity: f32,
}

impl ColorMatrix {
    pub fn new(matrix: [f32; 16], intensity: f32) -> Self {
        Self { matrix, intensity }
    }

    pub fn sepia(intensity: f32) -> Self {
        Self::new(SEPIA_MATRIX, intensity)
    }

    /// Apply the matrix to one RGBA pixel on the CPU, as the shader does
    pub fn apply(&self, pixel: [f32; 4]) -> [f32; 4] {
        let mut out = [0.0; 4];
        for (channel, value) in out.iter_mut().enumerate() {
            let column = &self.matrix[channel * 4..channel * 4 + 4];
            let transformed: f32 = column.iter().zip(pixel).map(|(m, p)| m * p).sum();
            *value = self.intensity * transformed + (1.0 - self.intensity) * pixel[channel];
        }
        out
    }
}

impl Default for ColorMatrix {
    fn default() -> Self {
        Self::new(IDENTITY_MATRIX, 1.0)
    }
}

impl Effect for ColorMatrix {
    fn label(&self) -> &'static str {
        "color_matrix"
    }

    fn fragment_source(&self) -> &'static str {
        include_str!("../wgsl/color_matrix.wgsl")
    }

    fn uniform_fields(&self) -> &'static [UniformField] {
        const FIELDS: &[UniformField] = &[
            UniformField::new("color_matrix", UniformKind::Mat4),
            UniformField::new("intensity", UniformKind::Float),
        ];
        FIELDS
    }

    fn on_draw(&self, uniforms: &mut UniformBlock) -> RenderResult<()> {
        uniforms.set_mat4("color_matrix", &self.matrix)?;
        uniforms.set_f32("intensity", self.intensity)
    }
}
