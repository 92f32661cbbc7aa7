// SPDX-License-Identifier: GPL-3.0-only

//! CPU side of a framebuffer capture
//!
//! Offscreen targets store images bottom-up. A readback is flipped upright,
//! optionally mirrored, then rotated back by the capture orientation.

use crate::errors::{RenderError, RenderResult};
use image::{Rgba, RgbaImage, imageops};

/// Readback of a 4-byte-per-pixel target
#[derive(Debug, Clone, Copy)]
pub struct RawReadback<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    /// Padded row stride in bytes
    pub bytes_per_row: u32,
    /// BGRA storage that must be swapped to RGBA
    pub swap_red_blue: bool,
}

/// Turn a readback into an upright RGBA image.
///
/// `orientation` is the clockwise camera orientation in degrees (0, 90, 180
/// or 270); the image is rotated counterclockwise by it. For 90 and 270 the
/// output is `height x width`.
pub fn correct_readback(
    raw: RawReadback<'_>,
    orientation: u32,
    mirror: bool,
) -> RenderResult<RgbaImage> {
    let RawReadback {
        data,
        width,
        height,
        bytes_per_row,
        swap_red_blue,
    } = raw;

    let row_bytes = width as usize * 4;
    let stride = bytes_per_row as usize;
    if stride < row_bytes || data.len() < stride * (height as usize).saturating_sub(1) + row_bytes
    {
        return Err(RenderError::Readback(format!(
            "Readback of {} bytes too small for {}x{} (stride {})",
            data.len(),
            width,
            height,
            stride
        )));
    }

    let mut upright = RgbaImage::new(width, height);
    for y in 0..height {
        let source_row = (height - 1 - y) as usize * stride;
        let row = &data[source_row..source_row + row_bytes];
        for (x, px) in row.chunks_exact(4).enumerate() {
            let pixel = if swap_red_blue {
                [px[2], px[1], px[0], px[3]]
            } else {
                [px[0], px[1], px[2], px[3]]
            };
            upright.put_pixel(x as u32, y, Rgba(pixel));
        }
    }

    if mirror {
        imageops::flip_horizontal_in_place(&mut upright);
    }

    match orientation % 360 {
        0 => Ok(upright),
        90 => Ok(imageops::rotate270(&upright)),
        180 => Ok(imageops::rotate180(&upright)),
        270 => Ok(imageops::rotate90(&upright)),
        other => Err(RenderError::Configuration(format!(
            "Capture orientation must be a multiple of 90, got {}",
            other
        ))),
    }
}
