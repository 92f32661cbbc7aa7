// SPDX-License-Identifier: GPL-3.0-only

use crate::constants::{BackendPreference, FboFormat, PixelFormat, RenderMode};
use crate::errors::{RenderError, RenderResult};
use crate::frame_source::FrameSourceKind;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// GPU power preference, mirrored so it can be serialized
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum PowerPreference {
    #[default]
    LowPower,
    HighPerformance,
}

impl PowerPreference {
    pub fn to_wgpu(self) -> wgpu::PowerPreference {
        match self {
            PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
            PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Render mode for camera-driven preview (WhenDirty by default)
    pub render_mode: RenderMode,
    /// Keep the device alive across pause/resume when the arbiter allows it
    pub preserve_context_on_pause: bool,
    /// Allow several render threads to hold a device at once
    pub multiple_contexts_allowed: bool,
    /// Show front camera frames mirrored (selfie mode)
    pub face_mirror: bool,
    /// Color format of offscreen framebuffer objects
    pub fbo_format: FboFormat,
    /// GPU backend selection
    pub backend: BackendPreference,
    /// GPU power preference
    pub power_preference: PowerPreference,
    /// Preferred pixel layout for the manual conversion path
    pub manual_pixel_format: PixelFormat,
    /// Orientation applied to captures instead of the camera's raw orientation
    pub capture_orientation: Option<u32>,
    /// Frame source strategy; detected from the camera when unset
    pub frame_source: Option<FrameSourceKind>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            render_mode: RenderMode::default(), // On-demand
            preserve_context_on_pause: false,
            multiple_contexts_allowed: true,
            face_mirror: true, // Default to mirrored (selfie mode)
            fbo_format: FboFormat::default(),
            backend: BackendPreference::default(),
            power_preference: PowerPreference::default(),
            manual_pixel_format: PixelFormat::default(),
            capture_orientation: None,
            frame_source: None,
        }
    }
}

impl Config {
    /// Load a configuration from a JSON file
    ///
    /// Missing fields take their default values.
    pub fn load(path: &Path) -> RenderResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RenderError::Configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_json(&text)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse a configuration from JSON text
    pub fn from_json(text: &str) -> RenderResult<Self> {
        let config: Config = serde_json::from_str(text)
            .map_err(|e| RenderError::Configuration(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        debug!(?config, "Parsed configuration");
        Ok(config)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> RenderResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| RenderError::Configuration(format!("Cannot serialize: {}", e)))
    }

    fn validate(&self) -> RenderResult<()> {
        if let Some(orientation) = self.capture_orientation
            && orientation % 90 != 0
        {
            return Err(RenderError::Configuration(format!(
                "capture_orientation must be a multiple of 90, got {}",
                orientation
            )));
        }
        Ok(())
    }
}
