// SPDX-License-Identifier: GPL-3.0-only

//! CPU conversion path
//!
//! The camera delivers NV21 buffers on its own thread. Each buffer is
//! converted there into a shared pixel buffer under a lock, then handed back
//! to the camera for the next frame. The render thread uploads the pixel
//! buffer under the same lock.
//!
//! While a converted frame is still waiting for upload, newer frames are
//! dropped and counted instead of blocking the camera.

use super::yuv::{nv21_to_packed, rgb_to_rgba_into};
use super::{Frame, FrameAvailableListener};
use crate::camera::{CallbackBuffers, PreviewCallback, Size};
use crate::constants::{PixelFormat, RGB_UPLOAD_CHUNK_ROWS};
use crate::errors::{RenderError, RenderResult};
use crate::gpu::GpuContext;
use glam::Mat4;
use std::collections::TryReserveError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Upload texture format; RGB frames are expanded on upload
const UPLOAD_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

struct PixelBuffer {
    pixels: Vec<u8>,
    format: PixelFormat,
    /// Converted but not yet uploaded
    pending: bool,
    timestamp: u64,
    sequence: u64,
}

struct ManualShared {
    size: Size,
    buffer: Mutex<PixelBuffer>,
    listener: Mutex<Option<FrameAvailableListener>>,
    dropped: AtomicU64,
    next_sequence: AtomicU64,
    closed: AtomicBool,
    epoch: Instant,
}

impl ManualShared {
    /// Runs on the camera thread for every delivered buffer
    fn on_preview_frame(&self, data: Vec<u8>, buffers: &CallbackBuffers) {
        let converted = {
            let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            if self.closed.load(Ordering::Acquire) {
                false
            } else if buffer.pending {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                trace!(dropped, "Previous frame not uploaded yet, dropping");
                false
            } else {
                let format = buffer.format;
                match nv21_to_packed(
                    &data,
                    self.size.width,
                    self.size.height,
                    format,
                    &mut buffer.pixels,
                ) {
                    Ok(()) => {
                        buffer.pending = true;
                        buffer.timestamp = self.epoch.elapsed().as_nanos() as u64;
                        buffer.sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed) + 1;
                        true
                    }
                    Err(e) => {
                        warn!(error = %e, "Dropping malformed preview frame");
                        false
                    }
                }
            }
        };

        // Re-arm only once the copy is done
        buffers.add(data);

        if converted {
            let listener = self.listener.lock().unwrap_or_else(|e| e.into_inner()).clone();
            if let Some(listener) = listener {
                listener();
            }
        }
    }
}

/// Reserve `pixel_count` pixels, preferring `preferred` and falling back to
/// RGB when the RGBA buffer cannot be allocated
fn allocate_pixels(
    pixel_count: usize,
    preferred: PixelFormat,
    mut reserve: impl FnMut(&mut Vec<u8>, usize) -> Result<(), TryReserveError>,
) -> RenderResult<(Vec<u8>, PixelFormat)> {
    let candidates: &[PixelFormat] = match preferred {
        PixelFormat::Rgba => &[PixelFormat::Rgba, PixelFormat::Rgb],
        PixelFormat::Rgb => &[PixelFormat::Rgb],
    };
    for &format in candidates {
        let len = pixel_count * format.bytes_per_pixel();
        let mut pixels = Vec::new();
        match reserve(&mut pixels, len) {
            Ok(()) => {
                pixels.resize(len, 0);
                return Ok((pixels, format));
            }
            Err(e) => warn!(?format, len, error = %e, "Pixel buffer allocation failed"),
        }
    }
    Err(RenderError::Configuration(format!(
        "Cannot allocate a pixel buffer for {} pixels",
        pixel_count
    )))
}

/// Frames converted on the CPU and uploaded by the render thread
pub struct ManualConversion {
    shared: Arc<ManualShared>,
    queue: Arc<wgpu::Queue>,
    texture: Option<(wgpu::Texture, wgpu::TextureView)>,
    transform: Mat4,
    current: Option<Frame>,
    /// RGBA rows expanded from an RGB buffer
    staging: Vec<u8>,
}

impl ManualConversion {
    /// Allocate the pixel buffer and upload texture for frames of `size`
    pub fn new(
        gpu: &GpuContext,
        size: Size,
        preferred: PixelFormat,
        transform: Mat4,
    ) -> RenderResult<Self> {
        Self::with_allocator(gpu, size, preferred, transform, |v, n| v.try_reserve_exact(n))
    }

    fn with_allocator(
        gpu: &GpuContext,
        size: Size,
        preferred: PixelFormat,
        transform: Mat4,
        reserve: impl FnMut(&mut Vec<u8>, usize) -> Result<(), TryReserveError>,
    ) -> RenderResult<Self> {
        let max = gpu.max_texture_size();
        if size.width == 0 || size.height == 0 || size.width > max || size.height > max {
            return Err(RenderError::Configuration(format!(
                "Preview size {} outside 1..={}",
                size, max
            )));
        }

        let (pixels, format) =
            allocate_pixels(size.width as usize * size.height as usize, preferred, reserve)?;
        if format != preferred {
            warn!(%size, ?format, "Manual frame path falling back to a smaller pixel format");
        }

        let (texture, error) = gpu.scoped(|device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some("manual_preview_texture"),
                size: wgpu::Extent3d {
                    width: size.width,
                    height: size.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: UPLOAD_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_DST
                    | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            })
        });
        if let Some(e) = error {
            texture.destroy();
            return Err(RenderError::Configuration(format!(
                "Preview texture {} incomplete: {}",
                size, e
            )));
        }
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        debug!(%size, ?format, "Manual frame path ready");

        Ok(Self {
            shared: Arc::new(ManualShared {
                size,
                buffer: Mutex::new(PixelBuffer {
                    pixels,
                    format,
                    pending: false,
                    timestamp: 0,
                    sequence: 0,
                }),
                listener: Mutex::new(None),
                dropped: AtomicU64::new(0),
                next_sequence: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                epoch: Instant::now(),
            }),
            queue: Arc::clone(&gpu.queue),
            texture: Some((texture, view)),
            transform,
            current: None,
            staging: Vec::new(),
        })
    }

    /// Camera callback converting into the shared buffer.
    ///
    /// Each delivered buffer goes back to `buffers` once it is copied.
    pub fn preview_callback(&self, buffers: CallbackBuffers) -> PreviewCallback {
        let shared = Arc::clone(&self.shared);
        Arc::new(move |data: Vec<u8>| shared.on_preview_frame(data, &buffers))
    }

    pub fn size(&self) -> Size {
        self.shared.size
    }

    /// Layout the shared buffer ended up with
    pub fn pixel_format(&self) -> PixelFormat {
        self.shared
            .buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .format
    }

    pub fn set_on_frame_available(&self, listener: Option<FrameAvailableListener>) {
        *self.shared.listener.lock().unwrap_or_else(|e| e.into_inner()) = listener;
    }

    /// Upload the pending converted frame, if any.
    ///
    /// The buffer lock is held only for the copy into the queue.
    pub fn update_tex_image(&mut self) -> RenderResult<bool> {
        let Some((texture, _)) = &self.texture else {
            return Err(RenderError::Configuration(
                "Manual frame source used after release".to_string(),
            ));
        };
        let Size { width, height } = self.shared.size;

        let mut buffer = self.shared.buffer.lock().unwrap_or_else(|e| e.into_inner());
        if !buffer.pending {
            return Ok(false);
        }
        match buffer.format {
            PixelFormat::Rgba => write_rows(&self.queue, texture, &buffer.pixels, width, 0, height),
            PixelFormat::Rgb => {
                let row_bytes = width as usize * 3;
                let mut y = 0;
                while y < height {
                    let rows = RGB_UPLOAD_CHUNK_ROWS.min(height - y);
                    let start = y as usize * row_bytes;
                    let end = start + rows as usize * row_bytes;
                    rgb_to_rgba_into(&buffer.pixels[start..end], &mut self.staging);
                    write_rows(&self.queue, texture, &self.staging, width, y, rows);
                    y += rows;
                }
            }
        }
        buffer.pending = false;
        let frame = Frame {
            transform: self.transform,
            timestamp: buffer.timestamp,
            sequence: buffer.sequence,
        };
        drop(buffer);

        self.current = Some(frame);
        Ok(true)
    }

    pub fn texture_view(&self) -> Option<&wgpu::TextureView> {
        self.current.as_ref()?;
        self.texture.as_ref().map(|(_, view)| view)
    }

    pub fn current_frame(&self) -> Option<Frame> {
        self.current
    }

    /// Frames the camera delivered while an earlier frame awaited upload
    pub fn dropped_frames(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn release(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        if let Some((texture, _)) = self.texture.take() {
            texture.destroy();
            debug!("Manual frame path released");
        }
        self.current = None;
    }
}

impl Drop for ManualConversion {
    fn drop(&mut self) {
        self.release();
    }
}

fn write_rows(
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    rgba: &[u8],
    width: u32,
    first_row: u32,
    rows: u32,
) {
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d {
                x: 0,
                y: first_row,
                z: 0,
            },
            aspect: wgpu::TextureAspect::All,
        },
        rgba,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(width * 4),
            rows_per_image: Some(rows),
        },
        wgpu::Extent3d {
            width,
            height: rows,
            depth_or_array_layers: 1,
        },
    );
}
