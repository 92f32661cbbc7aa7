// SPDX-License-Identifier: GPL-3.0-only

//! Still images used in place of camera frames

use crate::camera::Size;
use crate::errors::{RenderError, RenderResult};
use crate::gpu::GpuContext;
use image::RgbaImage;

/// Upload a top-row-first image bottom-up, the way offscreen targets store
/// images, so it samples upright with an identity transform
pub fn upload_image(
    gpu: &GpuContext,
    image: &RgbaImage,
    label: &str,
) -> RenderResult<(wgpu::Texture, wgpu::TextureView)> {
    let (width, height) = image.dimensions();
    let max = gpu.max_texture_size();
    if width == 0 || height == 0 || width > max || height > max {
        return Err(RenderError::Configuration(format!(
            "Image {}x{} outside texture limits (max {})",
            width, height, max
        )));
    }
    let flipped = image::imageops::flip_vertical(image);
    let texture = wgpu::util::DeviceExt::create_texture_with_data(
        gpu.device.as_ref(),
        &gpu.queue,
        &wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        },
        wgpu::util::TextureDataOrder::LayerMajor,
        flipped.as_raw(),
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    Ok((texture, view))
}

/// A still image standing in for the camera.
///
/// The image is kept on the CPU and uploaded on first use, so it survives
/// context loss.
pub struct StaticImage {
    image: RgbaImage,
    uploaded: Option<(wgpu::Texture, wgpu::TextureView)>,
}

impl StaticImage {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image,
            uploaded: None,
        }
    }

    pub fn size(&self) -> Size {
        let (width, height) = self.image.dimensions();
        Size::new(width, height)
    }

    /// Texture holding the image, uploaded if needed
    pub fn texture_view(&mut self, gpu: &GpuContext) -> RenderResult<&wgpu::TextureView> {
        if self.uploaded.is_none() {
            self.uploaded = Some(upload_image(gpu, &self.image, "static_input_texture")?);
        }
        match &self.uploaded {
            Some((_, view)) => Ok(view),
            None => Err(RenderError::Configuration(
                "Static image upload missing".to_string(),
            )),
        }
    }

    /// Drop the GPU copy; the next use uploads again
    pub fn release(&mut self) {
        if let Some((texture, _)) = self.uploaded.take() {
            texture.destroy();
        }
    }
}

impl Drop for StaticImage {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{create_headless_context, read_texture};
    use image::Rgba;

    #[tokio::test]
    async fn test_image_is_stored_bottom_up() {
        let context = match create_headless_context("static_image_test").await {
            Ok(c) => c,
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                return;
            }
        };
        let mut image = RgbaImage::from_pixel(1, 2, Rgba([0, 0, 255, 255]));
        image.put_pixel(0, 0, Rgba([255, 0, 0, 255]));

        let (texture, _) = upload_image(&context, &image, "test").unwrap();
        let (data, stride) = read_texture(&context.device, &context.queue, &texture, 1, 2).unwrap();
        // Bottom row (blue) is first in memory
        assert_eq!(&data[..4], &[0, 0, 255, 255]);
        assert_eq!(&data[stride as usize..stride as usize + 4], &[255, 0, 0, 255]);
    }

    #[tokio::test]
    async fn test_static_image_reuploads_after_release() {
        let context = match create_headless_context("static_image_release").await {
            Ok(c) => c,
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                return;
            }
        };
        let mut still = StaticImage::new(RgbaImage::new(4, 2));
        assert_eq!(still.size(), Size::new(4, 2));
        still.texture_view(&context).unwrap();
        still.release();
        assert!(still.texture_view(&context).is_ok());
    }
}
