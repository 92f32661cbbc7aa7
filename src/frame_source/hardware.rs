// SPDX-License-Identifier: GPL-3.0-only

//! Externally fed frame stream
//!
//! The camera writes frames straight into GPU textures through a
//! [`StreamProducer`], from whatever thread it delivers on. Three slots
//! rotate between roles: the producer fills `back`, the newest complete
//! frame waits in `ready`, and the render thread samples `front`. A publish
//! swaps `back` and `ready`; [`HardwareStream::update_tex_image`] swaps
//! `ready` and `front`. Neither side ever waits for the other beyond the
//! index swap.

use super::{Frame, FrameAvailableListener};
use crate::camera::Size;
use crate::constants::STREAM_SLOT_COUNT;
use crate::errors::{CameraError, CameraResult, RenderError, RenderResult};
use crate::gpu::GpuContext;
use glam::Mat4;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

/// Stream texture format; producers publish tightly packed RGBA rows
pub const STREAM_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

#[derive(Debug, Clone, Copy, Default)]
struct SlotMeta {
    transform: Mat4,
    timestamp: u64,
    sequence: u64,
}

#[derive(Debug)]
struct SlotIndices {
    front: usize,
    ready: usize,
    back: usize,
    /// `ready` holds a frame the consumer has not seen
    fresh: bool,
    meta: [SlotMeta; STREAM_SLOT_COUNT],
}

struct StreamShared {
    queue: Arc<wgpu::Queue>,
    textures: Vec<wgpu::Texture>,
    size: Size,
    indices: Mutex<SlotIndices>,
    /// Serializes publishers so only one writes the back slot
    publish_lock: Mutex<()>,
    listener: Mutex<Option<FrameAvailableListener>>,
    closed: AtomicBool,
    next_sequence: AtomicU64,
    replaced: AtomicU64,
}

/// Write side of a [`HardwareStream`], handed to the camera
#[derive(Clone)]
pub struct StreamProducer {
    shared: Arc<StreamShared>,
}

impl StreamProducer {
    pub fn size(&self) -> Size {
        self.shared.size
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Publish one frame of tightly packed RGBA rows, top row first.
    ///
    /// `transform` compensates for how the source laid the image out.
    /// A frame the consumer never pulled is replaced by this one.
    pub fn publish(&self, rgba: &[u8], transform: Mat4, timestamp: u64) -> CameraResult<()> {
        let shared = &self.shared;
        let Size { width, height } = shared.size;
        if rgba.len() != width as usize * height as usize * 4 {
            return Err(CameraError::Hardware(format!(
                "Stream frame of {} bytes does not match {}",
                rgba.len(),
                shared.size
            )));
        }

        let _publisher = shared.publish_lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_closed() {
            return Err(CameraError::NotOpened);
        }

        let back = shared.indices.lock().unwrap_or_else(|e| e.into_inner()).back;
        shared.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &shared.textures[back],
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );

        let sequence = shared.next_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let mut indices = shared.indices.lock().unwrap_or_else(|e| e.into_inner());
            indices.meta[back] = SlotMeta {
                transform,
                timestamp,
                sequence,
            };
            if indices.fresh {
                shared.replaced.fetch_add(1, Ordering::Relaxed);
            }
            let SlotIndices { back, ready, .. } = &mut *indices;
            std::mem::swap(back, ready);
            indices.fresh = true;
        }
        trace!(sequence, "Stream frame published");

        let listener = shared
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(listener) = listener {
            listener();
        }
        Ok(())
    }
}

impl std::fmt::Debug for StreamProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamProducer")
            .field("size", &self.shared.size)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Read side of the stream, owned by the render thread
pub struct HardwareStream {
    shared: Arc<StreamShared>,
    views: Vec<wgpu::TextureView>,
    current: Option<Frame>,
}

impl HardwareStream {
    /// Allocate the slot textures for frames of `size`
    pub fn new(gpu: &GpuContext, size: Size) -> RenderResult<Self> {
        let max = gpu.max_texture_size();
        if size.width == 0 || size.height == 0 || size.width > max || size.height > max {
            return Err(RenderError::Configuration(format!(
                "Stream size {} outside 1..={}",
                size, max
            )));
        }

        let (textures, error) = gpu.scoped(|device| {
            (0..STREAM_SLOT_COUNT)
                .map(|slot| {
                    device.create_texture(&wgpu::TextureDescriptor {
                        label: Some(&format!("stream_slot_{}", slot)),
                        size: wgpu::Extent3d {
                            width: size.width,
                            height: size.height,
                            depth_or_array_layers: 1,
                        },
                        mip_level_count: 1,
                        sample_count: 1,
                        dimension: wgpu::TextureDimension::D2,
                        format: STREAM_FORMAT,
                        usage: wgpu::TextureUsages::TEXTURE_BINDING
                            | wgpu::TextureUsages::COPY_DST
                            | wgpu::TextureUsages::COPY_SRC,
                        view_formats: &[],
                    })
                })
                .collect::<Vec<_>>()
        });
        if let Some(e) = error {
            for texture in &textures {
                texture.destroy();
            }
            return Err(RenderError::Configuration(format!(
                "Stream textures {} incomplete: {}",
                size, e
            )));
        }

        let views = textures
            .iter()
            .map(|t| t.create_view(&wgpu::TextureViewDescriptor::default()))
            .collect();
        debug!(%size, "Hardware stream allocated");

        Ok(Self {
            shared: Arc::new(StreamShared {
                queue: Arc::clone(&gpu.queue),
                textures,
                size,
                indices: Mutex::new(SlotIndices {
                    front: 0,
                    ready: 1,
                    back: 2,
                    fresh: false,
                    meta: [SlotMeta::default(); STREAM_SLOT_COUNT],
                }),
                publish_lock: Mutex::new(()),
                listener: Mutex::new(None),
                closed: AtomicBool::new(false),
                next_sequence: AtomicU64::new(0),
                replaced: AtomicU64::new(0),
            }),
            views,
            current: None,
        })
    }

    pub fn producer(&self) -> StreamProducer {
        StreamProducer {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn size(&self) -> Size {
        self.shared.size
    }

    pub fn set_on_frame_available(&self, listener: Option<FrameAvailableListener>) {
        *self.shared.listener.lock().unwrap_or_else(|e| e.into_inner()) = listener;
    }

    /// Latch the newest published frame for sampling.
    ///
    /// Returns whether a new frame was latched. Without one the previous
    /// frame stays current.
    pub fn update_tex_image(&mut self) -> bool {
        let mut indices = self.shared.indices.lock().unwrap_or_else(|e| e.into_inner());
        if !indices.fresh {
            return false;
        }
        let SlotIndices { front, ready, .. } = &mut *indices;
        std::mem::swap(front, ready);
        indices.fresh = false;
        let meta = indices.meta[indices.front];
        drop(indices);

        self.current = Some(Frame {
            transform: meta.transform,
            timestamp: meta.timestamp,
            sequence: meta.sequence,
        });
        true
    }

    /// Texture of the latched frame
    pub fn texture_view(&self) -> Option<&wgpu::TextureView> {
        self.current.as_ref()?;
        let front = self.shared.indices.lock().unwrap_or_else(|e| e.into_inner()).front;
        self.views.get(front)
    }

    pub fn current_frame(&self) -> Option<Frame> {
        self.current
    }

    /// Frames overwritten before the consumer latched them
    pub fn replaced_frames(&self) -> u64 {
        self.shared.replaced.load(Ordering::Relaxed)
    }

    /// Stop accepting frames and free the slot textures
    pub fn release(&mut self) {
        let _publisher = self
            .shared
            .publish_lock
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.current = None;
        for texture in &self.shared.textures {
            texture.destroy();
        }
        debug!("Hardware stream released");
    }
}

impl Drop for HardwareStream {
    fn drop(&mut self) {
        self.release();
    }
}
