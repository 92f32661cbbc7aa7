// SPDX-License-Identifier: GPL-3.0-only

//! Offscreen framebuffer objects
//!
//! An FBO owns a color texture plus a depth attachment. Stages render into it
//! and the next stage samples its color texture. Images are stored bottom-up;
//! [`FramebufferObject::get_bitmap`] returns them upright.

mod capture;

pub use capture::{RawReadback, correct_readback};

use crate::constants::{CLEAR_COLOR, FBO_DEPTH_FORMAT, FboFormat};
use crate::errors::{RenderError, RenderResult};
use crate::gpu::{GpuContext, read_texture};
use crate::shaders::RenderTarget;
use image::RgbaImage;
use tracing::{debug, warn};

struct Attachments {
    color: wgpu::Texture,
    color_view: wgpu::TextureView,
    depth: wgpu::Texture,
    depth_view: wgpu::TextureView,
}

impl Attachments {
    fn destroy(self) {
        self.color.destroy();
        self.depth.destroy();
    }
}

/// Color texture and depth buffer of one offscreen target
pub struct FramebufferObject {
    format: FboFormat,
    width: u32,
    height: u32,
    attachments: Option<Attachments>,
}

impl FramebufferObject {
    pub fn new(format: FboFormat) -> Self {
        Self {
            format,
            width: 0,
            height: 0,
            attachments: None,
        }
    }

    /// Allocate attachments of `width x height`, replacing any previous ones.
    ///
    /// Both dimensions must be at least 1 and at most the device's maximum
    /// texture size. On failure nothing stays allocated.
    pub fn setup(&mut self, gpu: &GpuContext, width: u32, height: u32) -> RenderResult<()> {
        let max = gpu.max_texture_size();
        if width == 0 || height == 0 || width > max || height > max {
            return Err(RenderError::Configuration(format!(
                "Framebuffer size {}x{} outside 1..={}",
                width, height, max
            )));
        }

        self.release();

        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let ((color, depth), error) = gpu.scoped(|device| {
            let color = device.create_texture(&wgpu::TextureDescriptor {
                label: Some("fbo_color"),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: self.format.texture_format(),
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            });
            let depth = device.create_texture(&wgpu::TextureDescriptor {
                label: Some("fbo_depth"),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: FBO_DEPTH_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            });
            (color, depth)
        });

        if let Some(e) = error {
            color.destroy();
            depth.destroy();
            warn!(width, height, error = %e, "Framebuffer allocation incomplete");
            return Err(RenderError::Configuration(format!(
                "Framebuffer {}x{} incomplete: {}",
                width, height, e
            )));
        }

        let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());
        self.attachments = Some(Attachments {
            color,
            color_view,
            depth,
            depth_view,
        });
        self.width = width;
        self.height = height;
        debug!(width, height, format = ?self.format, "Framebuffer ready");
        Ok(())
    }

    /// Free every attachment; safe to call repeatedly
    pub fn release(&mut self) {
        if let Some(attachments) = self.attachments.take() {
            attachments.destroy();
        }
        self.width = 0;
        self.height = 0;
    }

    pub fn is_allocated(&self) -> bool {
        self.attachments.is_some()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> FboFormat {
        self.format
    }

    /// Color attachment, sampled by the next stage
    pub fn color_view(&self) -> Option<&wgpu::TextureView> {
        self.attachments.as_ref().map(|a| &a.color_view)
    }

    /// Make this FBO the draw target: cleared, with depth attached
    pub fn enable(&self) -> RenderResult<RenderTarget<'_>> {
        let attachments = self.attachments.as_ref().ok_or_else(|| {
            RenderError::Configuration("Framebuffer enabled before setup".to_string())
        })?;
        Ok(RenderTarget {
            color: &attachments.color_view,
            depth: Some(&attachments.depth_view),
            format: self.format.texture_format(),
            depth_format: Some(FBO_DEPTH_FORMAT),
            width: self.width,
            height: self.height,
            flip_y: true,
            clear: Some(CLEAR_COLOR),
        })
    }

    /// Read the color attachment back as an upright image.
    ///
    /// Drawing must have been submitted before this is called. See
    /// [`correct_readback`] for how `orientation` and `mirror` apply.
    pub fn get_bitmap(
        &self,
        gpu: &GpuContext,
        orientation: u32,
        mirror: bool,
    ) -> RenderResult<RgbaImage> {
        let attachments = self.attachments.as_ref().ok_or_else(|| {
            RenderError::Readback("Framebuffer read before setup".to_string())
        })?;
        let (data, bytes_per_row) = read_texture(
            &gpu.device,
            &gpu.queue,
            &attachments.color,
            self.width,
            self.height,
        )?;
        correct_readback(
            RawReadback {
                data: &data,
                width: self.width,
                height: self.height,
                bytes_per_row,
                swap_red_blue: self.format.swaps_red_blue(),
            },
            orientation,
            mirror,
        )
    }
}

impl Drop for FramebufferObject {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for FramebufferObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramebufferObject")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("allocated", &self.is_allocated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::create_headless_context;

    #[tokio::test]
    async fn test_setup_release_setup() {
        let context = match create_headless_context("fbo_test").await {
            Ok(c) => c,
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                return;
            }
        };
        let mut fbo = FramebufferObject::new(FboFormat::Bgra8);
        fbo.setup(&context, 16, 8).unwrap();
        assert!(fbo.is_allocated());
        assert_eq!((fbo.width(), fbo.height()), (16, 8));

        fbo.release();
        assert!(!fbo.is_allocated());
        assert!(fbo.color_view().is_none());
        assert!(fbo.enable().is_err());

        fbo.setup(&context, 4, 4).unwrap();
        assert_eq!((fbo.width(), fbo.height()), (4, 4));
    }

    #[tokio::test]
    async fn test_setup_rejects_bad_sizes() {
        let context = match create_headless_context("fbo_size_test").await {
            Ok(c) => c,
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                return;
            }
        };
        let mut fbo = FramebufferObject::new(FboFormat::Rgba8);
        assert!(matches!(
            fbo.setup(&context, 0, 10),
            Err(RenderError::Configuration(_))
        ));
        let too_big = context.max_texture_size() + 1;
        assert!(fbo.setup(&context, too_big, 10).is_err());
        assert!(!fbo.is_allocated());
    }

    #[tokio::test]
    async fn test_cleared_fbo_reads_back_black() {
        let context = match create_headless_context("fbo_clear_test").await {
            Ok(c) => c,
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                return;
            }
        };
        for format in FboFormat::ALL {
            let mut fbo = FramebufferObject::new(format);
            fbo.setup(&context, 3, 2).unwrap();
            let mut encoder = context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
            {
                let target = fbo.enable().unwrap();
                let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("clear"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: target.color,
                        depth_slice: None,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
            }
            context.queue.submit(std::iter::once(encoder.finish()));

            let image = fbo.get_bitmap(&context, 90, false).unwrap();
            assert_eq!(image.dimensions(), (2, 3));
            assert!(image.pixels().all(|p| p.0 == [0, 0, 0, 255]));
        }
    }
}
