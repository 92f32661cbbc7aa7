// SPDX-License-Identifier: GPL-3.0-only

use crate::errors::RenderResult;
use crate::shaders::{Effect, UniformBlock, UniformField, UniformKind};

/// Mixes a second image over the input by its alpha times `mix`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlphaBlend {
    pub mix: f32,
}

impl AlphaBlend {
    pub fn new(mix: f32) -> Self {
        Self { mix }
    }
}

impl Default for AlphaBlend {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl Effect for AlphaBlend {
    fn label(&self) -> &'static str {
        "alpha_blend"
    }

    fn fragment_source(&self) -> &'static str {
        include_str!("../wgsl/alpha_blend.wgsl")
    }

    fn uniform_fields(&self) -> &'static [UniformField] {
        const FIELDS: &[UniformField] = &[UniformField::new("mix_amount", UniformKind::Float)];
        FIELDS
    }

    fn uses_second_input(&self) -> bool {
        true
    }

    fn on_draw(&self, uniforms: &mut UniformBlock) -> RenderResult<()> {
        uniforms.set_f32("mix_amount", self.mix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RenderError;
    use crate::gpu::create_headless_context;
    use crate::shaders::validation::validate_effect;
    use crate::shaders::{ProgramStage, ShaderStage};

    #[test]
    fn test_alpha_blend_validates() {
        validate_effect(&AlphaBlend::default());
    }

    #[tokio::test]
    async fn test_missing_second_input_is_configuration_error() {
        let context = match create_headless_context("blend_test").await {
            Ok(c) => c,
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                return;
            }
        };
        let mut stage = ProgramStage::new(AlphaBlend::default());
        let err = stage.setup(&context).unwrap_err();
        assert!(matches!(err, RenderError::Configuration(_)));

        let overlay = image::RgbaImage::from_pixel(4, 4, image::Rgba([255, 0, 0, 255]));
        let mut stage = ProgramStage::with_second_input(AlphaBlend::default(), overlay);
        stage.setup(&context).unwrap();
        assert!(stage.is_set_up());
    }
}
