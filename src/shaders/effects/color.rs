// SPDX-License-Identifier: GPL-3.0-only

//! Per-pixel color adjustments

use crate::errors::RenderResult;
use crate::shaders::{Effect, UniformBlock, UniformField, UniformKind};

/// Effects with a single float parameter named after the struct field
macro_rules! scalar_effect {
    ($(#[$meta:meta])* $name:ident { $field:ident = $default:expr }, $label:literal, $source:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq)]
        pub struct $name {
            pub $field: f32,
        }

        impl $name {
            pub const DEFAULT: f32 = $default;

            pub fn new($field: f32) -> Self {
                Self { $field }
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
                const FIELDS: &[UniformField] =
                    &[UniformField::new(stringify!($field), UniformKind::Float)];
                FIELDS
            }

            fn on_draw(&self, uniforms: &mut UniformBlock) -> RenderResult<()> {
                uniforms.set_f32(stringify!($field), self.$field)
            }
        }
    };
}

scalar_effect!(
    /// Adds a constant to every channel; 0 leaves the image unchanged
    Brightness { brightness = 0.0 },
    "brightness",
    "../wgsl/brightness.wgsl"
);

scalar_effect!(
    /// Scales distance from mid-gray; 1 leaves the image unchanged
    Contrast { contrast = 1.0 },
    "contrast",
    "../wgsl/contrast.wgsl"
);

scalar_effect!(
    Gamma { gamma = 1.0 },
    "gamma",
    "../wgsl/gamma.wgsl"
);

scalar_effect!(
    /// Exposure in stops
    Exposure { exposure = 0.0 },
    "exposure",
    "../wgsl/exposure.wgsl"
);

scalar_effect!(
    /// 0 is grayscale, 1 unchanged, above 1 oversaturated
    Saturation { saturation = 1.0 },
    "saturation",
    "../wgsl/saturation.wgsl"
);

scalar_effect!(
    /// Quantizes each channel to `levels` steps
    Posterize { levels = 10.0 },
    "posterize",
    "../wgsl/posterize.wgsl"
);

/// Rec. 709 luminance
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Grayscale;

impl Effect for Grayscale {
    fn label(&self) -> &'static str {
        "grayscale"
    }

    fn fragment_source(&self) -> &'static str {
        include_str!("../wgsl/grayscale.wgsl")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Invert;

impl Effect for Invert {
    fn label(&self) -> &'static str {
        "invert"
    }

    fn fragment_source(&self) -> &'static str {
        include_str!("../wgsl/invert.wgsl")
    }
}

/// Darkens towards `color` with distance from `center`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vignette {
    pub center: [f32; 2],
    pub color: [f32; 3],
    pub start: f32,
    pub end: f32,
}

impl Default for Vignette {
    fn default() -> Self {
        Self {
            center: [0.5, 0.5],
            color: [0.0, 0.0, 0.0],
            start: 0.3,
            end: 0.75,
        }
    }
}

impl Effect for Vignette {
    fn label(&self) -> &'static str {
        "vignette"
    }

    fn fragment_source(&self) -> &'static str {
        include_str!("../wgsl/vignette.wgsl")
    }

    fn uniform_fields(&self) -> &'static [UniformField] {
        const FIELDS: &[UniformField] = &[
            UniformField::new("focus", UniformKind::Vec2),
            UniformField::new("start", UniformKind::Float),
            UniformField::new("end", UniformKind::Float),
            UniformField::new("color", UniformKind::Vec3),
        ];
        FIELDS
    }

    fn on_draw(&self, uniforms: &mut UniformBlock) -> RenderResult<()> {
        uniforms.set_vec2("focus", self.center)?;
        uniforms.set_f32("start", self.start)?;
        uniforms.set_f32("end", self.end)?;
        uniforms.set_vec3("color", self.color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaders::validation::validate_effect;

    #[test]
    fn test_color_effects_validate() {
        validate_effect(&Grayscale);
        validate_effect(&Invert);
        validate_effect(&Brightness::default());
        validate_effect(&Contrast::default());
        validate_effect(&Gamma::default());
        validate_effect(&Exposure::default());
        validate_effect(&Saturation::default());
        validate_effect(&Posterize::default());
        validate_effect(&Vignette::default());
    }

    #[test]
    fn test_scalar_effect_writes_its_field() {
        let effect = Brightness::new(0.2);
        let mut block = UniformBlock::new(effect.uniform_fields());
        effect.on_draw(&mut block).unwrap();
        assert_eq!(block.get_f32("brightness").unwrap(), 0.2);
    }

    #[test]
    fn test_neutral_defaults() {
        assert_eq!(Brightness::default().brightness, 0.0);
        assert_eq!(Contrast::default().contrast, 1.0);
        assert_eq!(Saturation::default().saturation, 1.0);
        assert_eq!(Posterize::default().levels, 10.0);
    }
}
