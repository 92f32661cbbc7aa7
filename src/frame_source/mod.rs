// SPDX-License-Identifier: GPL-3.0-only

//! Camera frames as GPU textures
//!
//! A [`FrameSource`] is one of two strategies, chosen once when it is built:
//!
//! - [`FrameSourceKind::HardwareStream`]: the camera publishes frames into
//!   GPU textures itself, see [`HardwareStream`].
//! - [`FrameSourceKind::ManualConversion`]: the camera hands over NV21
//!   buffers which are converted on the CPU, see [`ManualConversion`].
//!
//! In both cases the camera side signals new frames through a
//! [`FrameAvailableListener`] from its own thread, and the render thread
//! latches the newest one with [`FrameSource::update_tex_image`] before
//! drawing.

mod hardware;
mod image_texture;
mod manual;
mod session;
mod transform;
pub mod yuv;

pub use hardware::{HardwareStream, STREAM_FORMAT, StreamProducer};
pub use image_texture::{StaticImage, upload_image};
pub use manual::ManualConversion;
pub use session::{Session, SessionState};
pub use transform::{FLIP_H, FLIP_V, sensor_transform};

use crate::camera::{CameraDevice, Size};
use crate::constants::PixelFormat;
use crate::errors::RenderResult;
use crate::gpu::GpuContext;
use glam::Mat4;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Called from the camera's thread whenever a new frame can be latched
pub type FrameAvailableListener = Arc<dyn Fn() + Send + Sync>;

/// A latched frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    /// Maps quad texture coordinates to sample coordinates
    pub transform: Mat4,
    /// Nanoseconds, monotonic within one source
    pub timestamp: u64,
    /// Counts frames accepted by the source, starting at 1
    pub sequence: u64,
}

/// How frames get from the camera to the GPU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameSourceKind {
    HardwareStream,
    ManualConversion,
}

impl FrameSourceKind {
    /// Pick the strategy for `camera`; `forced` overrides detection
    pub fn detect(camera: &dyn CameraDevice, forced: Option<FrameSourceKind>) -> Self {
        let kind = forced.unwrap_or(if camera.supports_preview_texture() {
            FrameSourceKind::HardwareStream
        } else {
            FrameSourceKind::ManualConversion
        });
        info!(?kind, forced = forced.is_some(), "Frame source selected");
        kind
    }
}

/// The frame source in use by a preview
pub enum FrameSource {
    Hardware(HardwareStream),
    Manual(ManualConversion),
}

impl FrameSource {
    /// Allocate a source of `kind` for frames of `size`.
    ///
    /// `face_camera` adds the horizontal mirror to the manual path's
    /// transform; a hardware stream receives its transform per frame.
    pub fn setup(
        kind: FrameSourceKind,
        gpu: &GpuContext,
        size: Size,
        face_camera: bool,
        pixel_format: PixelFormat,
    ) -> RenderResult<Self> {
        Ok(match kind {
            FrameSourceKind::HardwareStream => FrameSource::Hardware(HardwareStream::new(gpu, size)?),
            FrameSourceKind::ManualConversion => FrameSource::Manual(ManualConversion::new(
                gpu,
                size,
                pixel_format,
                sensor_transform(face_camera),
            )?),
        })
    }

    pub fn kind(&self) -> FrameSourceKind {
        match self {
            FrameSource::Hardware(_) => FrameSourceKind::HardwareStream,
            FrameSource::Manual(_) => FrameSourceKind::ManualConversion,
        }
    }

    pub fn size(&self) -> Size {
        match self {
            FrameSource::Hardware(stream) => stream.size(),
            FrameSource::Manual(manual) => manual.size(),
        }
    }

    /// Start feeding this source from `camera`
    pub fn attach(&self, camera: &mut dyn CameraDevice) -> RenderResult<()> {
        match self {
            FrameSource::Hardware(stream) => {
                camera.set_preview_texture(Some(stream.producer()))?;
            }
            FrameSource::Manual(manual) => {
                let buffers = camera.callback_buffers();
                buffers.clear();
                camera.set_preview_callback(Some(manual.preview_callback(buffers.clone())));
                buffers.add(vec![0; manual.size().nv21_len()]);
            }
        }
        Ok(())
    }

    /// Stop feeding this source. The last latched frame stays usable.
    pub fn detach(&self, camera: &mut dyn CameraDevice) -> RenderResult<()> {
        match self {
            FrameSource::Hardware(_) => camera.set_preview_texture(None)?,
            FrameSource::Manual(_) => camera.set_preview_callback(None),
        }
        Ok(())
    }

    pub fn set_on_frame_available(&self, listener: Option<FrameAvailableListener>) {
        match self {
            FrameSource::Hardware(stream) => stream.set_on_frame_available(listener),
            FrameSource::Manual(manual) => manual.set_on_frame_available(listener),
        }
    }

    /// Latch the newest frame. Returns whether it changed.
    pub fn update_tex_image(&mut self) -> RenderResult<bool> {
        match self {
            FrameSource::Hardware(stream) => Ok(stream.update_tex_image()),
            FrameSource::Manual(manual) => manual.update_tex_image(),
        }
    }

    /// Texture of the latched frame; `None` until the first frame arrives
    pub fn texture_view(&self) -> Option<&wgpu::TextureView> {
        match self {
            FrameSource::Hardware(stream) => stream.texture_view(),
            FrameSource::Manual(manual) => manual.texture_view(),
        }
    }

    pub fn current_frame(&self) -> Option<Frame> {
        match self {
            FrameSource::Hardware(stream) => stream.current_frame(),
            FrameSource::Manual(manual) => manual.current_frame(),
        }
    }

    /// Sample transform of the latched frame
    pub fn transform(&self) -> Mat4 {
        self.current_frame()
            .map(|frame| frame.transform)
            .unwrap_or(FLIP_V)
    }

    /// Frames lost to backpressure: replaced before being latched on a
    /// stream, dropped before conversion on the manual path
    pub fn dropped_frames(&self) -> u64 {
        match self {
            FrameSource::Hardware(stream) => stream.replaced_frames(),
            FrameSource::Manual(manual) => manual.dropped_frames(),
        }
    }

    pub fn release(&mut self) {
        match self {
            FrameSource::Hardware(stream) => stream.release(),
            FrameSource::Manual(manual) => manual.release(),
        }
    }
}
