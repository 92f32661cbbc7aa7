// SPDX-License-Identifier: GPL-3.0-only

//! Command line tools
//!
//! - `info`: show the GPU adapter and its texture limit
//! - `effects`: list the effect catalog
//! - `render`: draw a synthetic camera through effects and save a capture

use camera_pipeline::camera::{CameraDevice, Facing, SyntheticCamera};
use camera_pipeline::frame_source::FrameSourceKind;
use camera_pipeline::gpu::{HeadlessDriver, HeadlessWindow, create_render_device};
use camera_pipeline::shaders::effects::EffectKind;
use camera_pipeline::{
    CameraPreview, CameraStateListener, Config, ContextArbiter, EffectSpec, RenderError,
    ShaderPipeline, shared_camera,
};
use futures::channel::mpsc;
use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long `render` waits for each step
const STEP_TIMEOUT: Duration = Duration::from_secs(10);

pub fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(Config::load(path)?),
        None => Ok(Config::default()),
    }
}

/// Print the adapter a render thread would get
pub fn info(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: config.backend.backends(),
        ..Default::default()
    });
    let context = pollster::block_on(create_render_device(
        &instance,
        "camera-pipeline-info",
        config.power_preference.to_wgpu(),
        None,
    ))?;

    println!("Adapter:          {}", context.info.adapter_name);
    println!("Backend:          {:?}", context.info.backend);
    println!("Max texture size: {}", context.max_texture_size());
    Ok(())
}

pub fn list_effects() -> Result<(), Box<dyn std::error::Error>> {
    println!("Available effects:");
    println!();
    for kind in EffectKind::ALL {
        let overlay = if kind.needs_second_input() {
            " (needs --overlay)"
        } else {
            ""
        };
        println!("  {:<14} {}{}", kind.name(), kind.description(), overlay);
    }
    Ok(())
}

pub struct RenderOptions {
    pub effects: Vec<EffectSpec>,
    pub overlay: Option<PathBuf>,
    pub input: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
    pub facing: Facing,
    pub orientation: u32,
    pub source: Option<FrameSourceKind>,
    pub frames: u64,
    pub output: PathBuf,
}

enum PreviewEvent {
    Started,
    Captured(RgbaImage),
    Failed(String),
}

/// Forwards preview notifications to the waiting command
struct ChannelListener {
    sender: mpsc::UnboundedSender<PreviewEvent>,
}

impl CameraStateListener for ChannelListener {
    fn on_start_preview(&self) {
        let _ = self.sender.unbounded_send(PreviewEvent::Started);
    }

    fn on_image_capture(&self, image: RgbaImage) -> bool {
        self.sender
            .unbounded_send(PreviewEvent::Captured(image))
            .is_ok()
    }

    fn on_error(&self, error: &RenderError) {
        let _ = self
            .sender
            .unbounded_send(PreviewEvent::Failed(error.to_string()));
    }
}

fn build_pipeline(
    effects: &[EffectSpec],
    overlay: Option<&Path>,
    config: &Config,
) -> Result<Option<ShaderPipeline>, Box<dyn std::error::Error>> {
    if effects.is_empty() {
        return Ok(None);
    }
    let overlay = match overlay {
        Some(path) => Some(image::open(path)?.to_rgba8()),
        None => None,
    };
    let stages = effects
        .iter()
        .map(|spec| {
            let second = spec
                .kind
                .needs_second_input()
                .then(|| overlay.clone())
                .flatten();
            spec.build_stage(second)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(ShaderPipeline::new(stages, config.fbo_format)))
}

/// Wait for the next event, or fail after [`STEP_TIMEOUT`]
fn wait_event(
    receiver: &mut mpsc::UnboundedReceiver<PreviewEvent>,
    what: &str,
) -> Result<PreviewEvent, Box<dyn std::error::Error>> {
    let start = Instant::now();
    while start.elapsed() < STEP_TIMEOUT {
        match receiver.try_recv() {
            Ok(PreviewEvent::Failed(message)) => return Err(message.into()),
            Ok(event) => return Ok(event),
            Err(_) => std::thread::sleep(Duration::from_millis(10)),
        }
    }
    Err(format!("Timed out waiting for {}", what).into())
}

pub fn render(mut config: Config, options: RenderOptions) -> Result<(), Box<dyn std::error::Error>> {
    if options.source.is_some() {
        config.frame_source = options.source;
    }
    let pipeline = build_pipeline(&options.effects, options.overlay.as_deref(), &config)?;
    let input = match &options.input {
        Some(path) => Some(image::open(path)?.to_rgba8()),
        None => None,
    };

    let mut camera = SyntheticCamera::new(options.facing).with_orientation(options.orientation);
    camera.open()?;
    let camera = shared_camera(camera);

    let driver = HeadlessDriver::new("camera-pipeline", &config);
    let arbiter = ContextArbiter::new(config.multiple_contexts_allowed);
    let mut preview = CameraPreview::new(driver, camera, arbiter, &config)?;

    let (sender, mut receiver) = mpsc::unbounded();
    let listener: Arc<dyn CameraStateListener> = Arc::new(ChannelListener { sender });

    preview.set_shader(pipeline)?;
    if input.is_some() {
        preview.set_input_texture(input)?;
    }

    let window = HeadlessWindow::new();
    preview.render_thread().on_window_resize(options.width, options.height);
    preview.render_thread().surface_created(window.clone());
    preview.start_preview(options.width, options.height, Some(Arc::clone(&listener)))?;

    let result = (|| -> Result<RgbaImage, Box<dyn std::error::Error>> {
        wait_event(&mut receiver, "the preview to start")?;
        println!("Preview started");

        let target = window.presented_frames() + options.frames;
        let start = Instant::now();
        while window.presented_frames() < target {
            if !preview.render_thread().is_running() {
                return Err("Render thread stopped".into());
            }
            if start.elapsed() > STEP_TIMEOUT {
                return Err("Timed out waiting for frames".into());
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        preview.capture(Arc::clone(&listener))?;
        loop {
            match wait_event(&mut receiver, "the capture")? {
                PreviewEvent::Captured(image) => return Ok(image),
                PreviewEvent::Started | PreviewEvent::Failed(_) => continue,
            }
        }
    })();

    preview.shutdown();
    let image = result?;

    image.save(&options.output)?;
    println!(
        "Capture saved: {} ({}x{})",
        options.output.display(),
        image.width(),
        image.height()
    );
    Ok(())
}
