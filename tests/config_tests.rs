// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use camera_pipeline::constants::{BackendPreference, FboFormat, PixelFormat, RenderMode};
use camera_pipeline::frame_source::FrameSourceKind;
use camera_pipeline::Config;

#[test]
fn test_config_default() {
    let config = Config::default();

    // Camera-driven previews draw on demand
    assert_eq!(config.render_mode, RenderMode::WhenDirty);
    assert!(config.face_mirror, "Front camera should be mirrored by default");
    assert!(!config.preserve_context_on_pause);
    assert_eq!(config.frame_source, None);
    assert_eq!(config.capture_orientation, None);
}

#[test]
fn test_config_partial_json_keeps_defaults() {
    let config = Config::from_json(r#"{ "fbo_format": "Rgba8", "frame_source": "ManualConversion" }"#)
        .unwrap();
    assert_eq!(config.fbo_format, FboFormat::Rgba8);
    assert_eq!(config.frame_source, Some(FrameSourceKind::ManualConversion));
    assert_eq!(config.manual_pixel_format, PixelFormat::Rgba);
    assert_eq!(config.backend, BackendPreference::Auto);
}

#[test]
fn test_config_json_round_trip() {
    let mut config = Config::default();
    config.render_mode = RenderMode::Continuous;
    config.capture_orientation = Some(270);
    let json = config.to_json().unwrap();
    assert_eq!(Config::from_json(&json).unwrap(), config);
}

#[test]
fn test_config_rejects_bad_orientation() {
    assert!(Config::from_json(r#"{ "capture_orientation": 45 }"#).is_err());
    assert!(Config::from_json("not json").is_err());
}

#[test]
fn test_config_load_missing_file() {
    let missing = std::env::temp_dir().join("camera-pipeline-no-such-config.json");
    assert!(Config::load(&missing).is_err());
}
