// SPDX-License-Identifier: GPL-3.0-only

//! Blurs. Tap spacing is measured in texels, so the blur covers the same
//! number of pixels whatever the frame size.

use super::convolution::texel_step;
use crate::errors::RenderResult;
use crate::shaders::{Effect, UniformBlock, UniformField, UniformKind};

const BLUR_FIELDS: &[UniformField] = &[
    UniformField::new("texel_step", UniformKind::Vec2),
    UniformField::new("blur_size", UniformKind::Float),
];

macro_rules! blur_effect {
    ($(#[$meta:meta])* $name:ident, $label:literal, $source:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq)]
        pub struct $name {
            /// Distance between taps in texels
            pub blur_size: f32,
            texel_step: [f32; 2],
        }

        impl $name {
            pub const DEFAULT: f32 = 1.0;

            pub fn new(blur_size: f32) -> Self {
                Self {
                    blur_size,
                    texel_step: [0.0, 0.0],
                }
            }

            pub fn texel_step(&self) -> [f32; 2] {
                self.texel_step
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new(Self::DEFAULT)
            }
        }

        impl Effect for $name {
            fn label(&self) -> &'static str {
                $label
            }

            fn fragment_source(&self) -> &'static str {
                include_str!($source)
            }

            fn uniform_fields(&self) -> &'static [UniformField] {
                BLUR_FIELDS
            }

            fn set_frame_size(&mut self, width: u32, height: u32) {
                self.texel_step = texel_step(width, height);
            }

            fn on_draw(&self, uniforms: &mut UniformBlock) -> RenderResult<()> {
                uniforms.set_vec2("texel_step", self.texel_step)?;
                uniforms.set_f32("blur_size", self.blur_size)
            }
        }
    };
}

blur_effect!(
    /// 9x9 Gaussian
    GaussianBlur,
    "gaussian_blur",
    "../wgsl/gaussian_blur.wgsl"
);

blur_effect!(
    /// 5x5 box average
    BoxBlur,
    "box_blur",
    "../wgsl/box_blur.wgsl"
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaders::validation::validate_effect;

    #[test]
    fn test_blur_effects_validate() {
        validate_effect(&GaussianBlur::default());
        validate_effect(&BoxBlur::default());
    }

    #[test]
    fn test_texel_step_follows_frame_size() {
        let mut blur = GaussianBlur::new(2.0);
        blur.set_frame_size(64, 32);
        assert_eq!(blur.texel_step(), [1.0 / 64.0, 1.0 / 32.0]);
        blur.set_frame_size(128, 64);
        assert_eq!(blur.texel_step(), [1.0 / 128.0, 1.0 / 64.0]);

        let mut block = UniformBlock::new(blur.uniform_fields());
        blur.on_draw(&mut block).unwrap();
        let offset = block.offset_of("blur_size").unwrap();
        let size: f32 = bytemuck::pod_read_unaligned(&block.bytes()[offset..offset + 4]);
        assert_eq!(size, 2.0);
    }
}
