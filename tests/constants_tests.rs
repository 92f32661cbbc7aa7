// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for constants module

use camera_pipeline::constants::{
    BackendPreference, CLEAR_COLOR, FPS_REPORT_INTERVAL, FboFormat, PixelFormat, STREAM_SLOT_COUNT,
};
use std::time::Duration;

#[test]
fn test_fbo_formats_are_four_bytes() {
    for format in FboFormat::ALL {
        assert_eq!(format.texture_format().block_copy_size(None), Some(4));
    }
}

#[test]
fn test_only_bgra_swaps_channels() {
    assert!(FboFormat::Bgra8.swaps_red_blue());
    assert!(!FboFormat::Rgba8.swaps_red_blue());
}

#[test]
fn test_pixel_format_sizes() {
    assert_eq!(PixelFormat::Rgba.bytes_per_pixel(), 4);
    assert_eq!(PixelFormat::Rgb.bytes_per_pixel(), 3);
    assert_eq!(PixelFormat::default(), PixelFormat::Rgba);
}

#[test]
fn test_backend_preference_maps_to_single_backend() {
    assert_eq!(BackendPreference::Vulkan.backends(), wgpu::Backends::VULKAN);
    assert_eq!(BackendPreference::Gl.backends(), wgpu::Backends::GL);
    assert!(BackendPreference::Auto.backends().contains(wgpu::Backends::VULKAN));
}

#[test]
fn test_engine_constants() {
    // Front, ready and back slots
    assert_eq!(STREAM_SLOT_COUNT, 3);
    assert_eq!(FPS_REPORT_INTERVAL, Duration::from_secs(1));
    assert_eq!(CLEAR_COLOR, wgpu::Color::BLACK);
}
