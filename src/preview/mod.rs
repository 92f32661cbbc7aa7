// SPDX-License-Identifier: GPL-3.0-only

//! Live camera preview
//!
//! [`CameraPreview`] owns a render thread running a [`PreviewRenderer`] and
//! the camera feeding it. Every call on it comes from the owner's thread;
//! anything that touches GPU state is queued onto the render thread.
//!
//! Starting a preview needs the device's maximum texture size to pick camera
//! sizes, so [`CameraPreview::start_preview`] waits until the renderer has a
//! context when called earlier.

mod effect;
mod renderer;

pub use effect::{PreviewEffect, model_matrix, projection_matrix, view_matrix};
pub use renderer::PreviewRenderer;

use crate::camera::CameraDevice;
use crate::config::Config;
use crate::errors::{RenderError, RenderResult};
use crate::fps::Fps;
use crate::frame_source::{Session, SessionState};
use crate::gpu::{FrameTarget, GpuContext, GraphicsDriver};
use crate::render::{ContextArbiter, RenderThread, RenderThreadBuilder};
use crate::shaders::{Effect, ShaderPipeline};
use image::RgbaImage;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Camera shared between the owner and the render thread
pub type SharedCamera = Arc<Mutex<Box<dyn CameraDevice>>>;

pub fn shared_camera(camera: impl CameraDevice + 'static) -> SharedCamera {
    Arc::new(Mutex::new(Box::new(camera)))
}

pub(crate) fn lock_camera(camera: &SharedCamera) -> MutexGuard<'_, Box<dyn CameraDevice>> {
    camera.lock().unwrap_or_else(|e| e.into_inner())
}

/// Notifications from a running preview.
///
/// Called from the render thread or the camera's thread, never while the
/// caller holds the camera.
pub trait CameraStateListener: Send + Sync {
    /// The camera started delivering frames; sent once per start
    fn on_start_preview(&self) {}

    fn on_release_camera(&self) {}

    /// A captured frame. Return true to keep the image; it is dropped
    /// otherwise.
    fn on_image_capture(&self, image: RgbaImage) -> bool {
        let _ = image;
        false
    }

    /// A start or capture failed
    fn on_error(&self, error: &RenderError) {
        let _ = error;
    }
}

/// A start waiting for the renderer
pub(crate) struct StartRequest {
    pub width: u32,
    pub height: u32,
    pub listener: Option<Arc<dyn CameraStateListener>>,
}

/// State reachable from both the owner and the render thread
pub(crate) struct PreviewShared {
    /// Zero until the renderer has a context
    pub max_texture_size: AtomicU32,
    pub deferred_start: Mutex<Option<StartRequest>>,
    pub capture_pending: AtomicBool,
    pub session: Mutex<Session>,
}

impl PreviewShared {
    fn new() -> Self {
        Self {
            max_texture_size: AtomicU32::new(0),
            deferred_start: Mutex::new(None),
            capture_pending: AtomicBool::new(false),
            session: Mutex::new(Session::new()),
        }
    }

    pub fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn deferred(&self) -> MutexGuard<'_, Option<StartRequest>> {
        self.deferred_start
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the single capture slot
    fn claim_capture(&self) -> RenderResult<()> {
        if self.capture_pending.swap(true, Ordering::SeqCst) {
            return Err(RenderError::CaptureBusy);
        }
        Ok(())
    }

    pub fn release_capture(&self) {
        self.capture_pending.store(false, Ordering::SeqCst);
    }
}

/// Pick camera sizes for the requested view and configure the session.
///
/// A running stream is stopped first.
pub(crate) fn configure_camera(
    camera: &SharedCamera,
    shared: &PreviewShared,
    width: u32,
    height: u32,
) -> RenderResult<()> {
    let max_texture_size = shared.max_texture_size.load(Ordering::SeqCst);
    let mut camera = lock_camera(camera);
    let mut session = shared.session();
    if session.state() == SessionState::Streaming {
        camera.stop_preview();
        session.stop();
    }
    if width > 0 && height > 0 {
        camera.setup_optimal_preview_size(width, height, max_texture_size)?;
    }
    session.configure()?;
    debug!(width, height, max_texture_size, "Camera configured for preview");
    Ok(())
}

/// A camera preview drawn by its own render thread
pub struct CameraPreview<D: GraphicsDriver> {
    thread: RenderThread<D, PreviewRenderer>,
    camera: SharedCamera,
    shared: Arc<PreviewShared>,
    release_listener: Mutex<Option<Arc<dyn CameraStateListener>>>,
}

impl<D> CameraPreview<D>
where
    D: GraphicsDriver<Context = GpuContext>,
    D::Frame: FrameTarget,
{
    /// Spawn the render thread. The camera should already be open.
    pub fn new(
        driver: D,
        camera: SharedCamera,
        arbiter: Arc<ContextArbiter>,
        config: &Config,
    ) -> RenderResult<Self> {
        let shared = Arc::new(PreviewShared::new());
        let renderer = PreviewRenderer::new(Arc::clone(&camera), Arc::clone(&shared), config);

        let thread = RenderThreadBuilder::new("camera-preview")
            .render_mode(config.render_mode)
            .preserve_context_on_pause(config.preserve_context_on_pause)
            .error_listener(|e| error!(error = %e, "Preview render thread failed"))
            .spawn(driver, renderer, arbiter)?;

        // New camera frames wake the render thread
        let handle = thread.handle();
        thread.queue_event(move |renderer: &mut PreviewRenderer| {
            let waker = handle.clone();
            renderer.set_frame_listener(Arc::new(move || waker.request_render()));
        })?;

        info!("Camera preview created");
        Ok(Self {
            thread,
            camera,
            shared,
            release_listener: Mutex::new(None),
        })
    }

    /// The render thread, for surface and pause/resume notifications
    pub fn render_thread(&self) -> &RenderThread<D, PreviewRenderer> {
        &self.thread
    }

    pub fn camera(&self) -> &SharedCamera {
        &self.camera
    }

    /// Maximum texture size of the current device, once known
    pub fn max_texture_size(&self) -> Option<u32> {
        match self.shared.max_texture_size.load(Ordering::SeqCst) {
            0 => None,
            size => Some(size),
        }
    }

    pub fn session_state(&self) -> SessionState {
        self.shared.session().state()
    }

    pub fn is_capture_pending(&self) -> bool {
        self.shared.capture_pending.load(Ordering::SeqCst)
    }

    /// Start previewing into a view of `width x height`.
    ///
    /// Camera sizes are picked for that view; zero keeps the camera's
    /// current sizes. `listener` hears `on_start_preview` once frames flow.
    pub fn start_preview(
        &self,
        width: u32,
        height: u32,
        listener: Option<Arc<dyn CameraStateListener>>,
    ) -> RenderResult<()> {
        *self
            .release_listener
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = listener.clone();

        let request = StartRequest {
            width,
            height,
            listener,
        };
        {
            let mut deferred = self.shared.deferred();
            if self.shared.max_texture_size.load(Ordering::SeqCst) == 0 {
                debug!(width, height, "Renderer not ready, deferring preview start");
                *deferred = Some(request);
                return Ok(());
            }
        }

        configure_camera(&self.camera, &self.shared, width, height)?;
        self.thread.queue_event(move |renderer| renderer.request_start(request.listener))?;
        self.thread.request_render();
        Ok(())
    }

    /// Stop the camera and detach the frame source
    pub fn stop_preview(&self) -> RenderResult<()> {
        self.shared.deferred().take();
        lock_camera(&self.camera).stop_preview();
        self.shared.session().stop();
        self.thread.queue_event(|renderer| renderer.detach_source())?;
        debug!("Preview stopped");
        Ok(())
    }

    /// Stop previewing and release the camera
    pub fn release_camera(&self) -> RenderResult<()> {
        self.stop_preview()?;
        lock_camera(&self.camera).release();
        self.shared.session().reset();
        let listener = self
            .release_listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(listener) = listener {
            listener.on_release_camera();
        }
        info!("Camera released");
        Ok(())
    }

    /// Read back the next drawn frame.
    ///
    /// Only one capture may be pending; a second one fails with
    /// [`RenderError::CaptureBusy`].
    pub fn capture(&self, listener: Arc<dyn CameraStateListener>) -> RenderResult<()> {
        self.shared.claim_capture()?;
        if let Err(e) = self
            .thread
            .queue_event(move |renderer| renderer.request_capture(listener))
        {
            self.shared.release_capture();
            return Err(e);
        }
        self.thread.request_render();
        Ok(())
    }

    /// Take a still picture.
    ///
    /// Once the camera has taken it the feed is detached, the last frame
    /// is drawn once more and read back. Afterwards the stream resumes when
    /// `resume` is set, otherwise the session stays stopped.
    pub fn take_picture(
        &self,
        listener: Arc<dyn CameraStateListener>,
        auto_focus: bool,
        resume: bool,
    ) -> RenderResult<()> {
        self.shared.session().begin_capture()?;
        if let Err(e) = self.shared.claim_capture() {
            self.abandon_still();
            return Err(e);
        }

        let handle = self.thread.handle();
        let shared = Arc::clone(&self.shared);
        let taken = lock_camera(&self.camera).take_picture(
            Box::new(move |picture| match picture {
                Ok(_) => {
                    let queued = handle
                        .queue_event(move |renderer: &mut PreviewRenderer| {
                            renderer.request_still_capture(listener, resume)
                        });
                    match queued {
                        Ok(()) => handle.request_render(),
                        Err(e) => warn!(error = %e, "Picture taken after render thread exit"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Camera failed to take picture");
                    shared.release_capture();
                    let _ = shared.session().finish_capture(true);
                    listener.on_error(&e.into());
                }
            }),
            auto_focus,
        );

        if let Err(e) = taken {
            self.abandon_still();
            self.shared.release_capture();
            return Err(e.into());
        }
        Ok(())
    }

    fn abandon_still(&self) {
        if let Err(e) = self.shared.session().finish_capture(true) {
            debug!(error = %e, "No capture to abandon");
        }
    }

    /// Replace the user shader pipeline; `None` shows the preview as is
    pub fn set_shader(&self, pipeline: Option<ShaderPipeline>) -> RenderResult<()> {
        self.thread.queue_event(move |renderer| renderer.set_shader(pipeline))?;
        self.thread.request_render();
        Ok(())
    }

    /// Change a parameter of the effect at `index` of the user pipeline
    pub fn update_effect<E: Effect>(
        &self,
        index: usize,
        update: impl FnOnce(&mut E) + Send + 'static,
    ) -> RenderResult<()> {
        self.thread.queue_event(move |renderer| {
            match renderer.shader_mut().and_then(|p| p.effect_mut::<E>(index)) {
                Some(effect) => update(effect),
                None => warn!(index, "No such effect in the shader pipeline"),
            }
        })?;
        self.thread.request_render();
        Ok(())
    }

    /// Show a still image instead of the camera; `None` returns to the camera
    pub fn set_input_texture(&self, image: Option<RgbaImage>) -> RenderResult<()> {
        self.thread.queue_event(move |renderer| renderer.set_input_image(image))?;
        self.thread.request_render();
        Ok(())
    }

    pub fn set_fps(&self, fps: Option<Fps>) -> RenderResult<()> {
        self.thread.queue_event(move |renderer| renderer.set_fps(fps))
    }

    pub fn set_face_mirror(&self, mirror: bool) -> RenderResult<()> {
        self.thread.queue_event(move |renderer| renderer.set_face_mirror(mirror))?;
        self.thread.request_render();
        Ok(())
    }

    /// Stop the render thread and the camera
    pub fn shutdown(&mut self) {
        self.shared.deferred().take();
        lock_camera(&self.camera).stop_preview();
        self.shared.session().stop();
        self.thread.request_exit_and_wait();
        info!("Camera preview shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Facing, Size, SyntheticCamera};

    #[test]
    fn test_capture_slot_is_exclusive() {
        let shared = PreviewShared::new();
        shared.claim_capture().unwrap();
        assert_eq!(shared.claim_capture(), Err(RenderError::CaptureBusy));
        shared.release_capture();
        assert!(shared.claim_capture().is_ok());
    }

    #[test]
    fn test_configure_camera_picks_sizes_within_limit() {
        let mut camera = SyntheticCamera::new(Facing::Back);
        camera.open().unwrap();
        let camera = shared_camera(camera);
        let shared = PreviewShared::new();
        shared.max_texture_size.store(700, Ordering::SeqCst);

        configure_camera(&camera, &shared, 1280, 720).unwrap();
        assert_eq!(shared.session().state(), SessionState::Configured);
        let preview = lock_camera(&camera).preview_size().unwrap();
        assert!(preview.width <= 700 && preview.height <= 700);
        assert_eq!(preview, Size::new(640, 360));
    }

    #[test]
    fn test_configure_camera_requires_open_camera() {
        let camera = shared_camera(SyntheticCamera::new(Facing::Back));
        let shared = PreviewShared::new();
        assert!(configure_camera(&camera, &shared, 640, 480).is_err());
        assert_eq!(shared.session().state(), SessionState::Idle);
    }

    #[test]
    fn test_configure_stops_running_stream() {
        let mut camera = SyntheticCamera::new(Facing::Back);
        camera.open().unwrap();
        let camera = shared_camera(camera);
        let shared = PreviewShared::new();
        {
            let mut session = shared.session();
            session.configure().unwrap();
            session.start().unwrap();
        }
        configure_camera(&camera, &shared, 0, 0).unwrap();
        assert_eq!(shared.session().state(), SessionState::Configured);
    }
}
