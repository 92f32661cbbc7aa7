// SPDX-License-Identifier: GPL-3.0-only

//! Engine-wide constants

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the render thread decides when to draw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RenderMode {
    /// Draw on every loop iteration
    Continuous,
    /// Draw only after `request_render`; camera frames are the trigger
    #[default]
    WhenDirty,
}

/// Color format used by offscreen framebuffer objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FboFormat {
    /// BGRA, the native swap-chain order on most platforms
    #[default]
    Bgra8,
    /// RGBA
    Rgba8,
}

impl FboFormat {
    pub const ALL: [FboFormat; 2] = [FboFormat::Bgra8, FboFormat::Rgba8];

    pub fn texture_format(&self) -> wgpu::TextureFormat {
        match self {
            FboFormat::Bgra8 => wgpu::TextureFormat::Bgra8Unorm,
            FboFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        }
    }

    /// Whether readback bytes arrive with red and blue swapped
    pub fn swaps_red_blue(&self) -> bool {
        matches!(self, FboFormat::Bgra8)
    }
}

/// Pixel layout of the manual conversion buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 4 bytes per pixel
    #[default]
    Rgba,
    /// 3 bytes per pixel, used when the RGBA buffer cannot be allocated
    Rgb,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgba => 4,
            PixelFormat::Rgb => 3,
        }
    }
}

/// GPU backend preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackendPreference {
    /// Let wgpu pick from every primary backend
    #[default]
    Auto,
    Vulkan,
    Metal,
    Dx12,
    Gl,
}

impl BackendPreference {
    pub fn backends(&self) -> wgpu::Backends {
        match self {
            BackendPreference::Auto => wgpu::Backends::all(),
            BackendPreference::Vulkan => wgpu::Backends::VULKAN,
            BackendPreference::Metal => wgpu::Backends::METAL,
            BackendPreference::Dx12 => wgpu::Backends::DX12,
            BackendPreference::Gl => wgpu::Backends::GL,
        }
    }
}

/// Readback rows must be padded to this many bytes
pub const READBACK_ROW_ALIGNMENT: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

/// Depth format attached to every framebuffer object
pub const FBO_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24Plus;

/// Interval at which the FPS counter reports
pub const FPS_REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Number of frame slots in a hardware stream (front, ready, back)
pub const STREAM_SLOT_COUNT: usize = 3;

/// Rows expanded per upload chunk when the manual path holds RGB pixels
pub const RGB_UPLOAD_CHUNK_ROWS: u32 = 64;

/// Default clear color for every pass (opaque black)
pub const CLEAR_COLOR: wgpu::Color = wgpu::Color::BLACK;
