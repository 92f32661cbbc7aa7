// SPDX-License-Identifier: GPL-3.0-only

//! Render-thread side of the camera preview
//!
//! Each frame the camera image (or a still image) is placed by the preview
//! stage into an offscreen target. With a user pipeline the preview goes to
//! an internal FBO first and the pipeline draws into the renderer FBO.
//! The renderer FBO is then copied to the screen and is what captures read.

use super::effect::{PreviewEffect, model_matrix, projection_matrix, view_matrix};
use super::{CameraStateListener, PreviewShared, SharedCamera, configure_camera, lock_camera};
use crate::camera::CameraDevice;
use crate::config::Config;
use crate::constants::{FboFormat, PixelFormat};
use crate::errors::{CameraError, RenderError, RenderResult};
use crate::fbo::FramebufferObject;
use crate::fps::Fps;
use crate::frame_source::{FrameAvailableListener, FrameSource, FrameSourceKind, StaticImage};
use crate::gpu::{FrameTarget, GpuContext};
use crate::render::Renderer;
use crate::shaders::{Passthrough, ProgramStage, RenderTarget, ShaderPipeline, ShaderStage};
use glam::Mat4;
use image::RgbaImage;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{debug, error, info, warn};

/// A still capture in progress
struct StillCapture {
    resume: bool,
    detached: bool,
}

/// Draws the camera preview through an optional shader pipeline
pub struct PreviewRenderer {
    camera: SharedCamera,
    shared: Arc<PreviewShared>,

    face_mirror: bool,
    pixel_format: PixelFormat,
    forced_source: Option<FrameSourceKind>,
    capture_orientation: Option<u32>,

    preview: ProgramStage<PreviewEffect>,
    blit: ProgramStage<Passthrough>,
    /// Preview target when a user pipeline runs
    internal_fbo: FramebufferObject,
    /// Final image, shown on screen and read by captures
    renderer_fbo: FramebufferObject,

    shader: Option<ShaderPipeline>,
    new_shader: bool,

    source: Option<FrameSource>,
    /// Recreate the source on the next draw; the camera is still running
    restart_source: bool,
    frame_listener: Option<FrameAvailableListener>,
    image: Option<StaticImage>,

    pending_start: Option<Option<Arc<dyn CameraStateListener>>>,
    capture: Option<Arc<dyn CameraStateListener>>,
    still: Option<StillCapture>,
    fps: Option<Fps>,

    view: Mat4,
    projection: Mat4,
    camera_model: Mat4,
    camera_ratio: f32,
}

impl PreviewRenderer {
    pub(crate) fn new(camera: SharedCamera, shared: Arc<PreviewShared>, config: &Config) -> Self {
        Self {
            camera,
            shared,
            face_mirror: config.face_mirror,
            pixel_format: config.manual_pixel_format,
            forced_source: config.frame_source,
            capture_orientation: config.capture_orientation,
            preview: ProgramStage::new(PreviewEffect::default()),
            blit: ProgramStage::new(Passthrough),
            internal_fbo: FramebufferObject::new(config.fbo_format),
            renderer_fbo: FramebufferObject::new(config.fbo_format),
            shader: None,
            new_shader: false,
            source: None,
            restart_source: false,
            frame_listener: None,
            image: None,
            pending_start: None,
            capture: None,
            still: None,
            fps: None,
            view: view_matrix(),
            projection: Mat4::IDENTITY,
            camera_model: Mat4::IDENTITY,
            camera_ratio: 1.0,
        }
    }

    pub fn fbo_format(&self) -> FboFormat {
        self.renderer_fbo.format()
    }

    pub(crate) fn set_frame_listener(&mut self, listener: FrameAvailableListener) {
        if let Some(source) = &self.source {
            source.set_on_frame_available(Some(Arc::clone(&listener)));
        }
        self.frame_listener = Some(listener);
    }

    pub(crate) fn request_start(&mut self, listener: Option<Arc<dyn CameraStateListener>>) {
        self.pending_start = Some(listener);
    }

    pub(crate) fn request_capture(&mut self, listener: Arc<dyn CameraStateListener>) {
        self.capture = Some(listener);
    }

    pub(crate) fn request_still_capture(
        &mut self,
        listener: Arc<dyn CameraStateListener>,
        resume: bool,
    ) {
        self.capture = Some(listener);
        self.still = Some(StillCapture {
            resume,
            detached: false,
        });
    }

    /// Stop feeding the source and free it
    pub(crate) fn detach_source(&mut self) {
        self.pending_start = None;
        self.restart_source = false;
        if let Some(mut source) = self.source.take() {
            if let Err(e) = source.detach(&mut **lock_camera(&self.camera)) {
                warn!(error = %e, "Cannot detach frame source");
            }
            source.release();
            debug!(dropped = source.dropped_frames(), "Frame source released");
        }
    }

    /// Replace the user pipeline; it is set up on the next draw
    pub(crate) fn set_shader(&mut self, shader: Option<ShaderPipeline>) {
        if let Some(mut old) = self.shader.take() {
            old.release();
        }
        self.new_shader = shader.is_some();
        if let Some(shader) = &shader {
            info!(stages = ?shader.labels(), "Shader pipeline replaced");
        }
        self.shader = shader;
    }

    pub(crate) fn shader_mut(&mut self) -> Option<&mut ShaderPipeline> {
        self.shader.as_mut()
    }

    pub(crate) fn set_input_image(&mut self, image: Option<RgbaImage>) {
        if let Some(mut old) = self.image.take() {
            old.release();
        }
        self.image = image.map(StaticImage::new);
    }

    pub(crate) fn set_fps(&mut self, fps: Option<Fps>) {
        if let Some(old) = self.fps.take() {
            old.stop();
        }
        self.fps = fps;
    }

    pub(crate) fn set_face_mirror(&mut self, mirror: bool) {
        self.face_mirror = mirror;
        let camera = lock_camera(&self.camera);
        if camera.is_opened() {
            self.camera_model =
                model_matrix(camera.optimal_orientation(), camera.is_face_camera(), mirror);
        }
    }

    /// Create a source for the camera's current preview size and feed it
    fn attach_source(&mut self, gpu: &GpuContext, camera: &mut dyn CameraDevice) -> RenderResult<()> {
        if let Some(mut old) = self.source.take() {
            old.detach(camera)?;
            old.release();
        }
        let size = camera.preview_size()?;
        let kind = FrameSourceKind::detect(camera, self.forced_source);
        let source = FrameSource::setup(
            kind,
            gpu,
            size,
            camera.is_face_camera(),
            self.pixel_format,
        )?;
        source.set_on_frame_available(self.frame_listener.clone());
        source.attach(camera)?;
        self.source = Some(source);
        Ok(())
    }

    fn start_camera(&mut self, gpu: &GpuContext) -> RenderResult<()> {
        let camera = Arc::clone(&self.camera);
        let mut camera = lock_camera(&camera);
        if !camera.is_opened() {
            return Err(CameraError::NotOpened.into());
        }

        let size = camera.preview_size()?;
        self.camera_model = model_matrix(
            camera.optimal_orientation(),
            camera.is_face_camera(),
            self.face_mirror,
        );
        self.camera_ratio = size.aspect() as f32;

        self.attach_source(gpu, &mut **camera)?;
        camera.start_preview()?;
        self.shared.session().start()?;
        info!(%size, "Preview started");
        Ok(())
    }

    /// Work that needs the GPU and was requested since the last draw
    fn apply_pending(&mut self, gpu: &GpuContext) -> RenderResult<()> {
        if let Some(listener) = self.pending_start.take() {
            match self.start_camera(gpu) {
                Ok(()) => {
                    if let Some(listener) = listener {
                        listener.on_start_preview();
                    }
                }
                Err(e) => {
                    error!(error = %e, "Cannot start preview");
                    self.detach_source();
                    self.shared.session().stop();
                    if let Some(listener) = listener {
                        listener.on_error(&e);
                    }
                }
            }
        }

        if self.restart_source {
            self.restart_source = false;
            let camera = Arc::clone(&self.camera);
            let mut camera = lock_camera(&camera);
            if let Err(e) = self.attach_source(gpu, &mut **camera) {
                warn!(error = %e, "Cannot reattach frame source after context loss");
            }
        }

        if self.new_shader {
            self.new_shader = false;
            if let Some(shader) = &mut self.shader {
                shader.setup(gpu)?;
                if self.renderer_fbo.is_allocated() {
                    shader.set_frame_size(
                        gpu,
                        self.renderer_fbo.width(),
                        self.renderer_fbo.height(),
                    )?;
                }
            }
        }

        if let Some(still) = &mut self.still
            && !still.detached
        {
            still.detached = true;
            let mut camera = lock_camera(&self.camera);
            camera.stop_preview();
            if let Some(source) = &self.source
                && let Err(e) = source.detach(&mut **camera)
            {
                warn!(error = %e, "Cannot detach frame source for still capture");
            }
        }
        Ok(())
    }

    /// Texture, sample transform, aspect ratio and model matrix to draw
    fn latch_input(
        &mut self,
        gpu: &GpuContext,
    ) -> RenderResult<Option<(wgpu::TextureView, Mat4, f32, Mat4)>> {
        if let Some(image) = &mut self.image {
            let ratio = image.size().aspect() as f32;
            let view = image.texture_view(gpu)?.clone();
            return Ok(Some((view, Mat4::IDENTITY, ratio, Mat4::IDENTITY)));
        }
        let Some(source) = &mut self.source else {
            return Ok(None);
        };
        source.update_tex_image()?;
        Ok(source.texture_view().cloned().map(|view| {
            (view, source.transform(), self.camera_ratio, self.camera_model)
        }))
    }

    fn deliver_capture(&mut self, gpu: &GpuContext) {
        let Some(listener) = self.capture.take() else {
            return;
        };
        let orientation = if self.image.is_some() {
            0
        } else {
            self.capture_orientation
                .unwrap_or_else(|| lock_camera(&self.camera).orientation())
        };
        let result = self.renderer_fbo.get_bitmap(gpu, orientation, false);
        self.shared.release_capture();
        match result {
            Ok(image) => {
                let (width, height) = image.dimensions();
                debug!(width, height, orientation, "Frame captured");
                if !listener.on_image_capture(image) {
                    debug!("Capture not kept by listener");
                }
            }
            Err(e) => {
                warn!(error = %e, "Capture readback failed");
                listener.on_error(&e);
            }
        }
    }

    /// Resume or stop the camera after a still capture
    fn finish_still(&mut self) {
        let Some(still) = self.still.take() else {
            return;
        };
        if let Err(e) = self.shared.session().finish_capture(still.resume) {
            // The preview was stopped while the capture ran
            debug!(error = %e, "Still capture outlived its session");
            return;
        }
        if !still.resume {
            debug!("Preview left stopped after still capture");
            return;
        }
        let mut camera = lock_camera(&self.camera);
        let resumed = match &self.source {
            Some(source) => source.attach(&mut **camera),
            None => Ok(()),
        }
        .and_then(|()| camera.start_preview().map_err(RenderError::from));
        match resumed {
            Ok(()) => debug!("Preview resumed after still capture"),
            Err(e) => {
                error!(error = %e, "Cannot resume preview after still capture");
                self.shared.session().stop();
            }
        }
    }
}

/// Clear `target` without drawing
fn clear_target(encoder: &mut wgpu::CommandEncoder, target: &RenderTarget<'_>) {
    let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("preview_clear"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: target.color,
            depth_slice: None,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(target.clear.unwrap_or(wgpu::Color::BLACK)),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });
}

impl<F: FrameTarget> Renderer<GpuContext, F> for PreviewRenderer {
    fn on_surface_created(&mut self, gpu: &GpuContext) -> RenderResult<()> {
        self.preview.setup(gpu)?;
        self.blit.setup(gpu)?;
        if self.shader.is_some() {
            self.new_shader = true;
        }

        let deferred = {
            let mut deferred = self.shared.deferred();
            self.shared
                .max_texture_size
                .store(gpu.max_texture_size(), Ordering::SeqCst);
            deferred.take()
        };
        info!(max_texture_size = gpu.max_texture_size(), "Preview renderer initialized");

        if let Some(request) = deferred {
            match configure_camera(&self.camera, &self.shared, request.width, request.height) {
                Ok(()) => self.pending_start = Some(request.listener),
                Err(e) => {
                    error!(error = %e, "Cannot configure camera for deferred preview");
                    if let Some(listener) = request.listener {
                        listener.on_error(&e);
                    }
                }
            }
        }
        Ok(())
    }

    fn on_surface_changed(&mut self, gpu: &GpuContext, width: u32, height: u32) -> RenderResult<()> {
        if width == 0 || height == 0 {
            debug!(width, height, "Empty surface, nothing to draw into");
            self.renderer_fbo.release();
            self.internal_fbo.release();
            return Ok(());
        }
        self.renderer_fbo.setup(gpu, width, height)?;
        self.internal_fbo.setup(gpu, width, height)?;
        self.preview.set_frame_size(width, height);
        self.blit.set_frame_size(width, height);
        if let Some(shader) = &mut self.shader {
            shader.set_frame_size(gpu, width, height)?;
        }
        self.projection = projection_matrix(width, height);
        Ok(())
    }

    fn on_draw_frame(&mut self, gpu: &GpuContext, frame: &F) -> RenderResult<()> {
        self.apply_pending(gpu)?;
        if !self.renderer_fbo.is_allocated() {
            return Ok(());
        }
        let input = self.latch_input(gpu)?;

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("preview_frame"),
            });

        {
            let preview_fbo = if self.shader.is_some() {
                &self.internal_fbo
            } else {
                &self.renderer_fbo
            };
            let target = preview_fbo.enable()?;
            match &input {
                Some((view, st, camera_ratio, model)) => {
                    let effect = self.preview.effect_mut();
                    effect.mvp = self.projection * self.view * *model;
                    effect.st = *st;
                    effect.camera_ratio = *camera_ratio;
                    self.preview.draw(&mut encoder, view, &target)?;
                }
                None => clear_target(&mut encoder, &target),
            }

            if let Some(shader) = &mut self.shader {
                let source = self.internal_fbo.color_view().ok_or_else(|| {
                    RenderError::Configuration("Preview framebuffer missing".to_string())
                })?;
                shader.draw(&mut encoder, source, &self.renderer_fbo.enable()?)?;
            }
        }

        let (width, height) = frame.size();
        let screen = RenderTarget::screen(frame.view(), frame.format(), width, height);
        let rendered = self.renderer_fbo.color_view().ok_or_else(|| {
            RenderError::Configuration("Renderer framebuffer missing".to_string())
        })?;
        self.blit.draw(&mut encoder, rendered, &screen)?;

        gpu.queue.submit(std::iter::once(encoder.finish()));

        self.deliver_capture(gpu);
        self.finish_still();

        if let Some(fps) = &self.fps {
            fps.count_up();
        }
        Ok(())
    }

    fn on_context_released(&mut self) {
        self.preview.release();
        self.blit.release();
        self.internal_fbo.release();
        self.renderer_fbo.release();
        if let Some(shader) = &mut self.shader {
            shader.release();
            self.new_shader = true;
        }
        if let Some(image) = &mut self.image {
            image.release();
        }
        if self.source.is_some() {
            let pending = self.pending_start.take();
            self.detach_source();
            self.pending_start = pending;
            self.restart_source = true;
        }
        self.shared.max_texture_size.store(0, Ordering::SeqCst);
        debug!("Preview renderer released GPU resources");
    }
}

impl Drop for PreviewRenderer {
    fn drop(&mut self) {
        if let Some(fps) = &self.fps {
            fps.stop();
        }
    }
}
