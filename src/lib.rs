// SPDX-License-Identifier: GPL-3.0-only

//! GPU shader pipeline for live camera frames
//!
//! Camera frames are turned into GPU textures, drawn through a chain of
//! shader stages on a dedicated render thread and shown on a surface or
//! read back as images.
//!
//! # Architecture
//!
//! - [`render`]: render thread, renderer callbacks and the context arbiter
//! - [`gpu`]: device creation and the drivers a render thread runs on
//! - [`fbo`]: offscreen framebuffer objects and capture readback
//! - [`shaders`]: shader stages, the effect catalog and the stage pipeline
//! - [`frame_source`]: camera frames as textures (GPU stream or NV21 upload)
//! - [`camera`]: the camera collaborator trait and a synthetic camera
//! - [`preview`]: the live preview tying all of the above together
//!
//! # Example
//!
//! ```ignore
//! let camera = shared_camera(opened_camera);
//! let preview = CameraPreview::new(driver, camera, ContextArbiter::new(true), &config)?;
//! preview.render_thread().on_window_resize(1280, 720);
//! preview.render_thread().surface_created(window);
//! preview.start_preview(1280, 720, None)?;
//! ```

pub mod camera;
pub mod config;
pub mod constants;
pub mod errors;
pub mod fbo;
pub mod fps;
pub mod frame_loop;
pub mod frame_source;
pub mod gpu;
pub mod preview;
pub mod render;
pub mod shaders;

// Re-export commonly used types
pub use camera::{CameraDevice, Facing, Size, SyntheticCamera};
pub use config::Config;
pub use constants::{FboFormat, PixelFormat, RenderMode};
pub use errors::{CameraError, CameraResult, RenderError, RenderResult};
pub use frame_source::{FrameSource, FrameSourceKind};
pub use preview::{CameraPreview, CameraStateListener, SharedCamera, shared_camera};
pub use render::{ContextArbiter, RenderThread, RenderThreadBuilder};
pub use shaders::effects::{EffectKind, EffectSpec};
pub use shaders::{ShaderPipeline, ShaderStage};
