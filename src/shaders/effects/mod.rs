// SPDX-License-Identifier: GPL-3.0-only

//! Effect catalog
//!
//! Effects are addressed by name so they can come from the command line or a
//! configuration file, e.g. `grayscale` or `brightness=0.2`.

mod blend;
mod blur;
mod color;
mod color_matrix;
mod convolution;

pub use blend::AlphaBlend;
pub use blur::{BoxBlur, GaussianBlur};
pub use color::{
    Brightness, Contrast, Exposure, Gamma, Grayscale, Invert, Posterize, Saturation, Vignette,
};
pub use color_matrix::{ColorMatrix, IDENTITY_MATRIX, SEPIA_MATRIX};
pub use convolution::{Convolution3x3, Sharpen};

use super::{ProgramStage, ShaderStage};
use crate::errors::{RenderError, RenderResult};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Every effect the catalog can build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    Grayscale,
    Brightness,
    Contrast,
    ColorMatrix,
    Sepia,
    Sharpen,
    Emboss,
    GaussianBlur,
    BoxBlur,
    Invert,
    Gamma,
    Exposure,
    Saturation,
    Posterize,
    Vignette,
    AlphaBlend,
}

impl EffectKind {
    pub const ALL: [EffectKind; 16] = [
        EffectKind::Grayscale,
        EffectKind::Brightness,
        EffectKind::Contrast,
        EffectKind::ColorMatrix,
        EffectKind::Sepia,
        EffectKind::Sharpen,
        EffectKind::Emboss,
        EffectKind::GaussianBlur,
        EffectKind::BoxBlur,
        EffectKind::Invert,
        EffectKind::Gamma,
        EffectKind::Exposure,
        EffectKind::Saturation,
        EffectKind::Posterize,
        EffectKind::Vignette,
        EffectKind::AlphaBlend,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EffectKind::Grayscale => "grayscale",
            EffectKind::Brightness => "brightness",
            EffectKind::Contrast => "contrast",
            EffectKind::ColorMatrix => "color_matrix",
            EffectKind::Sepia => "sepia",
            EffectKind::Sharpen => "sharpen",
            EffectKind::Emboss => "emboss",
            EffectKind::GaussianBlur => "gaussian_blur",
            EffectKind::BoxBlur => "box_blur",
            EffectKind::Invert => "invert",
            EffectKind::Gamma => "gamma",
            EffectKind::Exposure => "exposure",
            EffectKind::Saturation => "saturation",
            EffectKind::Posterize => "posterize",
            EffectKind::Vignette => "vignette",
            EffectKind::AlphaBlend => "alpha_blend",
        }
    }

    /// One-line description with the meaning of the optional value
    pub fn description(&self) -> &'static str {
        match self {
            EffectKind::Grayscale => "Luminance only",
            EffectKind::Brightness => "Add value to every channel (default 0)",
            EffectKind::Contrast => "Scale around mid-gray by value (default 1)",
            EffectKind::ColorMatrix => "Identity color matrix blended by value (default 1)",
            EffectKind::Sepia => "Sepia tone blended by value (default 1)",
            EffectKind::Sharpen => "Sharpen by value (default 0)",
            EffectKind::Emboss => "Emboss with intensity value (default 1)",
            EffectKind::GaussianBlur => "Gaussian blur, taps value texels apart (default 1)",
            EffectKind::BoxBlur => "Box blur, taps value texels apart (default 1)",
            EffectKind::Invert => "Negative image",
            EffectKind::Gamma => "Raise channels to the power value (default 1)",
            EffectKind::Exposure => "Exposure adjustment in stops (default 0)",
            EffectKind::Saturation => "Saturation factor (default 1)",
            EffectKind::Posterize => "Color levels per channel (default 10)",
            EffectKind::Vignette => "Darken edges; value sets where darkening starts (default 0.3)",
            EffectKind::AlphaBlend => "Blend an overlay image by value (default 0.5)",
        }
    }

    pub fn needs_second_input(&self) -> bool {
        matches!(self, EffectKind::AlphaBlend)
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EffectKind {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        EffectKind::ALL
            .into_iter()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| RenderError::Configuration(format!("Unknown effect: {}", s)))
    }
}

/// An effect and its optional parameter, written `name` or `name=value`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectSpec {
    pub kind: EffectKind,
    pub value: Option<f32>,
}

impl EffectSpec {
    pub fn new(kind: EffectKind) -> Self {
        Self { kind, value: None }
    }

    pub fn with_value(kind: EffectKind, value: f32) -> Self {
        Self {
            kind,
            value: Some(value),
        }
    }

    /// Build the stage.
    ///
    /// `second_input` is required by two-input effects and ignored by the
    /// others.
    pub fn build_stage(&self, second_input: Option<RgbaImage>) -> RenderResult<Box<dyn ShaderStage>> {
        let value = self.value;
        let stage: Box<dyn ShaderStage> = match self.kind {
            EffectKind::Grayscale => Box::new(ProgramStage::new(Grayscale)),
            EffectKind::Invert => Box::new(ProgramStage::new(Invert)),
            EffectKind::Brightness => Box::new(ProgramStage::new(Brightness::new(
                value.unwrap_or(Brightness::DEFAULT),
            ))),
            EffectKind::Contrast => Box::new(ProgramStage::new(Contrast::new(
                value.unwrap_or(Contrast::DEFAULT),
            ))),
            EffectKind::Gamma => {
                Box::new(ProgramStage::new(Gamma::new(value.unwrap_or(Gamma::DEFAULT))))
            }
            EffectKind::Exposure => Box::new(ProgramStage::new(Exposure::new(
                value.unwrap_or(Exposure::DEFAULT),
            ))),
            EffectKind::Saturation => Box::new(ProgramStage::new(Saturation::new(
                value.unwrap_or(Saturation::DEFAULT),
            ))),
            EffectKind::Posterize => {
                let levels = value.unwrap_or(Posterize::DEFAULT);
                if levels < 1.0 {
                    return Err(RenderError::Configuration(format!(
                        "Posterize needs at least one level, got {}",
                        levels
                    )));
                }
                Box::new(ProgramStage::new(Posterize::new(levels)))
            }
            EffectKind::ColorMatrix => Box::new(ProgramStage::new(ColorMatrix::new(
                IDENTITY_MATRIX,
                value.unwrap_or(1.0),
            ))),
            EffectKind::Sepia => {
                Box::new(ProgramStage::new(ColorMatrix::sepia(value.unwrap_or(1.0))))
            }
            EffectKind::Sharpen => {
                Box::new(ProgramStage::new(Sharpen::new(value.unwrap_or(0.0))))
            }
            EffectKind::Emboss => Box::new(ProgramStage::new(Convolution3x3::emboss(
                value.unwrap_or(1.0),
            ))),
            EffectKind::GaussianBlur => Box::new(ProgramStage::new(GaussianBlur::new(
                value.unwrap_or(GaussianBlur::DEFAULT),
            ))),
            EffectKind::BoxBlur => Box::new(ProgramStage::new(BoxBlur::new(
                value.unwrap_or(BoxBlur::DEFAULT),
            ))),
            EffectKind::Vignette => {
                let mut vignette = Vignette::default();
                if let Some(start) = value {
                    vignette.start = start;
                }
                Box::new(ProgramStage::new(vignette))
            }
            EffectKind::AlphaBlend => {
                let image = second_input.ok_or_else(|| {
                    RenderError::Configuration("alpha_blend needs an overlay image".to_string())
                })?;
                let blend = AlphaBlend::new(value.unwrap_or(0.5));
                Box::new(ProgramStage::with_second_input(blend, image))
            }
        };
        Ok(stage)
    }
}

impl fmt::Display for EffectSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Some(value) => write!(f, "{}={}", self.kind, value),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl FromStr for EffectSpec {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((name, value)) => {
                let kind = name.parse()?;
                let value = value.trim().parse::<f32>().map_err(|e| {
                    RenderError::Configuration(format!("Bad value for {}: {}", name, e))
                })?;
                Ok(Self::with_value(kind, value))
            }
            None => Ok(Self::new(s.parse()?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert_eq!("grayscale".parse::<EffectKind>().unwrap(), EffectKind::Grayscale);
        assert_eq!("Alpha-Blend".parse::<EffectKind>().unwrap(), EffectKind::AlphaBlend);
        assert!("blur".parse::<EffectKind>().is_err());
    }

    #[test]
    fn test_every_kind_round_trips_through_its_name() {
        for kind in EffectKind::ALL {
            assert_eq!(kind.name().parse::<EffectKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_parse_spec_with_value() {
        let spec: EffectSpec = "brightness=0.2".parse().unwrap();
        assert_eq!(spec, EffectSpec::with_value(EffectKind::Brightness, 0.2));
        assert_eq!(spec.to_string(), "brightness=0.2");
        assert!("brightness=bright".parse::<EffectSpec>().is_err());
    }

    #[test]
    fn test_build_stage_labels() {
        let stage = EffectSpec::new(EffectKind::Sepia).build_stage(None).unwrap();
        assert_eq!(stage.label(), "color_matrix");
        assert!(!stage.is_set_up());
        let stage = EffectSpec::new(EffectKind::Emboss).build_stage(None).unwrap();
        assert_eq!(stage.label(), "convolution3x3");
        let stage = EffectSpec::with_value(EffectKind::GaussianBlur, 2.0)
            .build_stage(None)
            .unwrap();
        assert_eq!(stage.label(), "gaussian_blur");
        let stage = EffectSpec::new(EffectKind::BoxBlur).build_stage(None).unwrap();
        assert_eq!(stage.label(), "box_blur");
    }

    #[test]
    fn test_alpha_blend_requires_overlay() {
        let spec = EffectSpec::new(EffectKind::AlphaBlend);
        assert!(spec.kind.needs_second_input());
        assert!(spec.build_stage(None).is_err());
        let overlay = RgbaImage::new(2, 2);
        assert!(spec.build_stage(Some(overlay)).is_ok());
    }

    #[test]
    fn test_posterize_rejects_zero_levels() {
        let spec = EffectSpec::with_value(EffectKind::Posterize, 0.0);
        assert!(spec.build_stage(None).is_err());
    }
}
