// SPDX-License-Identifier: GPL-3.0-only

//! Neighborhood effects. Both need the frame size to step one texel.

use crate::errors::RenderResult;
use crate::shaders::{Effect, UniformBlock, UniformField, UniformKind};

pub(super) fn texel_step(width: u32, height: u32) -> [f32; 2] {
    [1.0 / width.max(1) as f32, 1.0 / height.max(1) as f32]
}

/// Unsharp mask over the four direct neighbors
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sharpen {
    pub sharpness: f32,
    texel_step: [f32; 2],
}

impl Sharpen {
    pub fn new(sharpness: f32) -> Self {
        Self {
            sharpness,
            texel_step: [0.004, 0.004],
        }
    }
}

impl Default for Sharpen {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Effect for Sharpen {
    fn label(&self) -> &'static str {
        "sharpen"
    }

    fn fragment_source(&self) -> &'static str {
        include_str!("../wgsl/sharpen.wgsl")
    }

    fn uniform_fields(&self) -> &'static [UniformField] {
        const FIELDS: &[UniformField] = &[
            UniformField::new("texel_step", UniformKind::Vec2),
            UniformField::new("sharpness", UniformKind::Float),
        ];
        FIELDS
    }

    fn set_frame_size(&mut self, width: u32, height: u32) {
        self.texel_step = texel_step(width, height);
    }

    fn on_draw(&self, uniforms: &mut UniformBlock) -> RenderResult<()> {
        uniforms.set_vec2("texel_step", self.texel_step)?;
        uniforms.set_f32("sharpness", self.sharpness)
    }
}

/// 3x3 convolution; the kernel is given row by row, top row first
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Convolution3x3 {
    pub kernel: [f32; 9],
    texel_step: [f32; 2],
}

impl Convolution3x3 {
    pub const IDENTITY: [f32; 9] = [0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0];

    pub fn new(kernel: [f32; 9]) -> Self {
        Self {
            kernel,
            texel_step: [0.0, 0.0],
        }
    }

    pub fn emboss(intensity: f32) -> Self {
        Self::new([
            -2.0 * intensity,
            -intensity,
            0.0,
            -intensity,
            1.0,
            intensity,
            0.0,
            intensity,
            2.0 * intensity,
        ])
    }

    fn row(&self, index: usize) -> [f32; 3] {
        [
            self.kernel[index * 3],
            self.kernel[index * 3 + 1],
            self.kernel[index * 3 + 2],
        ]
    }
}

impl Default for Convolution3x3 {
    fn default() -> Self {
        Self::new(Self::IDENTITY)
    }
}

impl Effect for Convolution3x3 {
    fn label(&self) -> &'static str {
        "convolution3x3"
    }

    fn fragment_source(&self) -> &'static str {
        include_str!("../wgsl/convolution3x3.wgsl")
    }

    fn uniform_fields(&self) -> &'static [UniformField] {
        const FIELDS: &[UniformField] = &[
            UniformField::new("texel_step", UniformKind::Vec2),
            UniformField::new("row0", UniformKind::Vec3),
            UniformField::new("row1", UniformKind::Vec3),
            UniformField::new("row2", UniformKind::Vec3),
        ];
        FIELDS
    }

    fn set_frame_size(&mut self, width: u32, height: u32) {
        self.texel_step = texel_step(width, height);
    }

    fn on_draw(&self, uniforms: &mut UniformBlock) -> RenderResult<()> {
        uniforms.set_vec2("texel_step", self.texel_step)?;
        uniforms.set_vec3("row0", self.row(0))?;
        uniforms.set_vec3("row1", self.row(1))?;
        uniforms.set_vec3("row2", self.row(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaders::validation::validate_effect;

    #[test]
    fn test_convolution_effects_validate() {
        validate_effect(&Sharpen::new(0.5));
        validate_effect(&Convolution3x3::emboss(1.0));
    }

    #[test]
    fn test_emboss_kernel_preserves_flat_regions() {
        let emboss = Convolution3x3::emboss(2.5);
        let sum: f32 = emboss.kernel.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_frame_size_sets_texel_step() {
        let mut sharpen = Sharpen::new(1.0);
        sharpen.set_frame_size(200, 100);
        let mut block = UniformBlock::new(sharpen.uniform_fields());
        sharpen.on_draw(&mut block).unwrap();
        let offset = block.offset_of("texel_step").unwrap();
        let step: [f32; 2] = bytemuck::pod_read_unaligned(&block.bytes()[offset..offset + 8]);
        assert_eq!(step, [0.005, 0.01]);
    }
}
