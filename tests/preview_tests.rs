// SPDX-License-Identifier: GPL-3.0-only

//! Camera preview tests on a real device with a synthetic camera
//!
//! Each test skips when no GPU adapter is available.

use camera_pipeline::camera::{CameraDevice, Facing, SyntheticCamera, SyntheticPattern};
use camera_pipeline::frame_source::{FrameSourceKind, SessionState};
use camera_pipeline::gpu::{HeadlessDriver, HeadlessWindow, create_headless_context};
use camera_pipeline::shaders::effects::{Brightness, EffectKind, EffectSpec};
use camera_pipeline::{
    CameraPreview, CameraStateListener, Config, ContextArbiter, RenderError, ShaderPipeline,
    shared_camera,
};
use futures::channel::mpsc;
use image::RgbaImage;
use std::sync::Arc;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
enum Event {
    Started,
    Captured(RgbaImage),
    Failed(String),
}

struct Listener {
    sender: mpsc::UnboundedSender<Event>,
}

impl CameraStateListener for Listener {
    fn on_start_preview(&self) {
        let _ = self.sender.unbounded_send(Event::Started);
    }

    fn on_image_capture(&self, image: RgbaImage) -> bool {
        self.sender.unbounded_send(Event::Captured(image)).is_ok()
    }

    fn on_error(&self, error: &RenderError) {
        let _ = self.sender.unbounded_send(Event::Failed(error.to_string()));
    }
}

struct Harness {
    preview: CameraPreview<HeadlessDriver>,
    window: HeadlessWindow,
    listener: Arc<dyn CameraStateListener>,
    events: mpsc::UnboundedReceiver<Event>,
}

impl Harness {
    /// A started preview drawing into a `width x height` window, or `None`
    /// without a GPU
    async fn start(camera: SyntheticCamera, config: Config, width: u32, height: u32) -> Option<Self> {
        let arbiter = ContextArbiter::new(config.multiple_contexts_allowed);
        Self::start_with_arbiter(camera, config, width, height, arbiter).await
    }

    /// Like `start`, with contexts brokered by `arbiter`
    async fn start_with_arbiter(
        camera: SyntheticCamera,
        config: Config,
        width: u32,
        height: u32,
        arbiter: Arc<ContextArbiter>,
    ) -> Option<Self> {
        if let Err(e) = create_headless_context("preview_gpu_check").await {
            println!("Skipping test (no GPU): {}", e);
            return None;
        }

        let mut camera = camera.with_frame_interval(Duration::from_millis(5));
        camera.open().unwrap();
        let driver = HeadlessDriver::new("preview_test", &config);
        let preview = CameraPreview::new(
            driver,
            shared_camera(camera),
            arbiter,
            &config,
        )
        .unwrap();

        let (sender, events) = mpsc::unbounded();
        let mut harness = Self {
            preview,
            window: HeadlessWindow::new(),
            listener: Arc::new(Listener { sender }),
            events,
        };
        harness.preview.render_thread().on_window_resize(width, height);
        harness
            .preview
            .render_thread()
            .surface_created(harness.window.clone());
        harness
            .preview
            .start_preview(width, height, Some(Arc::clone(&harness.listener)))
            .unwrap();
        assert!(matches!(harness.next_event(), Event::Started));
        harness.wait_frames(3);
        Some(harness)
    }

    fn next_event(&mut self) -> Event {
        let start = Instant::now();
        while start.elapsed() < TIMEOUT {
            if let Ok(event) = self.events.try_recv() {
                return event;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("No preview event within {:?}", TIMEOUT);
    }

    fn wait_frames(&self, count: u64) {
        let target = self.window.presented_frames() + count;
        let start = Instant::now();
        while self.window.presented_frames() < target {
            assert!(self.preview.render_thread().is_running());
            assert!(start.elapsed() < TIMEOUT, "Frames stopped arriving");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn capture(&mut self) -> RgbaImage {
        self.preview.capture(Arc::clone(&self.listener)).unwrap();
        self.expect_capture()
    }

    fn expect_capture(&mut self) -> RgbaImage {
        match self.next_event() {
            Event::Captured(image) => image,
            other => panic!("Expected a capture, got {:?}", other),
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.preview.shutdown();
    }
}

fn is_blank(image: &RgbaImage) -> bool {
    image.pixels().all(|p| p.0[..3] == [0, 0, 0])
}

fn assert_same_image(actual: &RgbaImage, expected: &RgbaImage) {
    assert_eq!(actual.dimensions(), expected.dimensions());
    for (a, e) in actual.pixels().zip(expected.pixels()) {
        for (ac, ec) in a.0.iter().zip(e.0) {
            assert!(ac.abs_diff(ec) <= 1, "got {:?}, expected {:?}", a, e);
        }
    }
}

#[tokio::test]
async fn test_capture_matches_window_size() {
    let camera = SyntheticCamera::new(Facing::Back);
    let Some(mut harness) = Harness::start(camera, Config::default(), 64, 48).await else {
        return;
    };
    let image = harness.capture();
    assert_eq!(image.dimensions(), (64, 48));
    assert!(!is_blank(&image), "Camera frame never reached the screen");
    assert_eq!(harness.preview.session_state(), SessionState::Streaming);
}

#[tokio::test]
async fn test_manual_conversion_renders_solid_color() {
    let camera = SyntheticCamera::new(Facing::Back).with_pattern(SyntheticPattern::Solid {
        y: 126,
        u: 128,
        v: 128,
    });
    let config = Config {
        frame_source: Some(FrameSourceKind::ManualConversion),
        ..Config::default()
    };
    let Some(mut harness) = Harness::start(camera, config, 40, 30).await else {
        return;
    };
    let image = harness.capture();
    // Y 126 with neutral chroma is mid-gray; the frame fills a 4:3 view
    for pixel in image.pixels() {
        for channel in &pixel.0[..3] {
            assert!(channel.abs_diff(128) <= 2, "pixel {:?}", pixel);
        }
    }
}

#[tokio::test]
async fn test_capture_after_resize_reflects_new_size() {
    let camera = SyntheticCamera::new(Facing::Back);
    let Some(mut harness) = Harness::start(camera, Config::default(), 64, 48).await else {
        return;
    };
    assert_eq!(harness.capture().dimensions(), (64, 48));

    harness.preview.render_thread().on_window_resize(32, 24);
    harness.wait_frames(2);
    assert_eq!(harness.window.last_size(), (32, 24));
    assert_eq!(harness.capture().dimensions(), (32, 24));
}

#[tokio::test]
async fn test_capture_rotates_by_camera_orientation() {
    let camera = SyntheticCamera::new(Facing::Back).with_orientation(90);
    let Some(mut harness) = Harness::start(camera, Config::default(), 64, 48).await else {
        return;
    };
    assert_eq!(harness.capture().dimensions(), (48, 64));
}

#[tokio::test]
async fn test_pause_resume_rebuilds_and_keeps_size() {
    let camera = SyntheticCamera::new(Facing::Front);
    let Some(mut harness) = Harness::start(camera, Config::default(), 48, 36).await else {
        return;
    };

    harness.preview.render_thread().on_pause();
    // Nothing draws while paused, so the capture slot stays taken
    harness.preview.capture(Arc::clone(&harness.listener)).unwrap();
    assert_eq!(
        harness.preview.capture(Arc::clone(&harness.listener)),
        Err(RenderError::CaptureBusy)
    );
    assert!(harness.preview.is_capture_pending());

    harness.preview.render_thread().on_resume();
    let image = harness.expect_capture();
    assert_eq!(image.dimensions(), (48, 36));
    assert!(!harness.preview.is_capture_pending());

    harness.wait_frames(2);
    assert_eq!(harness.window.last_size(), (48, 36));
    assert!(!is_blank(&harness.capture()));
}

#[tokio::test]
async fn test_shader_pipeline_applies_to_preview() {
    let camera = SyntheticCamera::new(Facing::Back).with_pattern(SyntheticPattern::Solid {
        y: 16,
        u: 128,
        v: 128,
    });
    let Some(mut harness) = Harness::start(camera, Config::default(), 32, 24).await else {
        return;
    };
    // Black frame, inverted then darkened
    let stages = vec![
        EffectSpec::new(EffectKind::Invert).build_stage(None).unwrap(),
        EffectSpec::with_value(EffectKind::Brightness, -0.5)
            .build_stage(None)
            .unwrap(),
    ];
    harness
        .preview
        .set_shader(Some(ShaderPipeline::new(stages, Config::default().fbo_format)))
        .unwrap();
    harness.wait_frames(2);
    let image = harness.capture();
    assert!(image.pixels().all(|p| p.0[0].abs_diff(128) <= 2));

    harness
        .preview
        .update_effect::<Brightness>(1, |b| b.brightness = 0.0)
        .unwrap();
    harness.wait_frames(2);
    let image = harness.capture();
    assert!(image.pixels().all(|p| p.0[0] >= 253));
}

#[tokio::test]
async fn test_still_capture_resumes_or_stops() {
    let camera = SyntheticCamera::new(Facing::Back);
    let Some(mut harness) = Harness::start(camera, Config::default(), 32, 24).await else {
        return;
    };

    harness
        .preview
        .take_picture(Arc::clone(&harness.listener), true, true)
        .unwrap();
    assert_eq!(harness.expect_capture().dimensions(), (32, 24));
    harness.wait_frames(2);
    assert_eq!(harness.preview.session_state(), SessionState::Streaming);

    harness
        .preview
        .take_picture(Arc::clone(&harness.listener), false, false)
        .unwrap();
    assert!(!is_blank(&harness.expect_capture()));
    let start = Instant::now();
    while harness.preview.session_state() != SessionState::Stopped {
        assert!(start.elapsed() < TIMEOUT);
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(
        harness
            .preview
            .take_picture(Arc::clone(&harness.listener), false, true)
            .is_err()
    );
}

#[tokio::test]
async fn test_static_image_replaces_camera() {
    let camera = SyntheticCamera::new(Facing::Back);
    let Some(mut harness) = Harness::start(camera, Config::default(), 40, 30).await else {
        return;
    };
    let image = RgbaImage::from_pixel(4, 3, image::Rgba([0, 0, 255, 255]));
    harness.preview.set_input_texture(Some(image)).unwrap();
    harness.wait_frames(2);
    let captured = harness.capture();
    assert!(captured.pixels().all(|p| p.0 == [0, 0, 255, 255]));
}

#[tokio::test]
async fn test_preview_recovers_after_another_took_the_only_context() {
    let arbiter = ContextArbiter::new(false);
    let camera = SyntheticCamera::new(Facing::Back);
    let Some(mut first) =
        Harness::start_with_arbiter(camera, Config::default(), 64, 48, Arc::clone(&arbiter)).await
    else {
        return;
    };
    let first_id = first.preview.render_thread().id();
    let before = first.capture();
    assert!(!is_blank(&before));
    assert_eq!(arbiter.owner(), Some(first_id));

    // A paused preview gives the only context up
    first.preview.render_thread().on_pause();
    assert_eq!(arbiter.owner(), None);

    let camera = SyntheticCamera::new(Facing::Front);
    let Some(mut second) =
        Harness::start_with_arbiter(camera, Config::default(), 32, 24, Arc::clone(&arbiter)).await
    else {
        return;
    };
    assert_eq!(arbiter.owner(), Some(second.preview.render_thread().id()));
    assert_eq!(second.capture().dimensions(), (32, 24));

    second.preview.render_thread().on_pause();
    assert_eq!(arbiter.owner(), None);
    first.preview.render_thread().on_resume();
    first.wait_frames(3);
    assert_eq!(arbiter.owner(), Some(first_id));
    assert_eq!(first.window.last_size(), (64, 48));

    // Camera textures and programs were rebuilt on the new context
    let after = first.capture();
    assert_same_image(&after, &before);
}

#[tokio::test]
async fn test_preview_redraws_after_releasing_its_context() {
    let camera = SyntheticCamera::new(Facing::Back);
    let Some(mut harness) = Harness::start(camera, Config::default(), 48, 36).await else {
        return;
    };
    let before = harness.capture();

    for _ in 0..3 {
        harness.preview.render_thread().request_release_context();
        harness.wait_frames(3);
        assert_same_image(&harness.capture(), &before);
    }
    assert_eq!(harness.preview.session_state(), SessionState::Streaming);
}
