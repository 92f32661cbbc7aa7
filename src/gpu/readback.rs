// SPDX-License-Identifier: GPL-3.0-only

//! Texture to CPU readback helpers

use crate::constants::READBACK_ROW_ALIGNMENT;
use crate::errors::{RenderError, RenderResult};

/// Bytes per row of a readback buffer, padded to the copy alignment
#[inline]
pub fn padded_bytes_per_row(width: u32, bytes_per_pixel: u32) -> u32 {
    let unpadded = width * bytes_per_pixel;
    unpadded.div_ceil(READBACK_ROW_ALIGNMENT) * READBACK_ROW_ALIGNMENT
}

/// Map `buffer` (created with `MAP_READ`), wait for the device and copy
/// its contents out. The buffer is unmapped again before returning.
pub async fn read_buffer_async(
    device: &wgpu::Device,
    buffer: &wgpu::Buffer,
) -> RenderResult<Vec<u8>> {
    let slice = buffer.slice(..);
    let (sender, receiver) = futures::channel::oneshot::channel();

    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    let _ = device.poll(wgpu::PollType::wait_indefinitely());

    receiver
        .await
        .map_err(|_| RenderError::Readback("Failed to receive buffer mapping".to_string()))?
        .map_err(|e| RenderError::Readback(format!("Failed to map buffer: {:?}", e)))?;

    let data = slice.get_mapped_range().to_vec();
    buffer.unmap();

    Ok(data)
}

/// Copy a 4-byte-per-pixel texture into CPU memory.
///
/// Returns the padded rows and the padded row stride. Rows come back in
/// texture memory order.
pub fn read_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
) -> RenderResult<(Vec<u8>, u32)> {
    let bytes_per_row = padded_bytes_per_row(width, 4);
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback_staging_buffer"),
        size: (bytes_per_row * height) as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback_encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(std::iter::once(encoder.finish()));

    let data = pollster::block_on(read_buffer_async(device, &staging))?;
    Ok((data, bytes_per_row))
}
