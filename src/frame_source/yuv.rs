// SPDX-License-Identifier: GPL-3.0-only

//! NV21 to packed RGB(A) conversion
//!
//! NV21 is a full-resolution Y plane followed by an interleaved V/U plane at
//! half resolution in both directions. Odd dimensions round the chroma plane
//! up, so the last column or row has a V/U pair of its own. Conversion uses
//! BT.601 video range in 10-bit fixed point:
//!
//! ```text
//! R = 1.164 (Y - 16) + 1.596 (V - 128)
//! G = 1.164 (Y - 16) - 0.813 (V - 128) - 0.391 (U - 128)
//! B = 1.164 (Y - 16) + 2.018 (U - 128)
//! ```

use crate::camera::Size;
use crate::constants::PixelFormat;
use crate::errors::{RenderError, RenderResult};

/// Convert one pixel. Returns `[r, g, b]`.
#[inline]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = (y as i32 - 16).max(0) * 1192;
    let u = u as i32 - 128;
    let v = v as i32 - 128;

    let r = y + 1634 * v;
    let g = y - 833 * v - 400 * u;
    let b = y + 2066 * u;

    let clamp = |c: i32| (c.clamp(0, 262_143) >> 10) as u8;
    [clamp(r), clamp(g), clamp(b)]
}

/// Convert an NV21 frame into `out`, packed as `format`.
///
/// `out` must hold exactly `width * height * format.bytes_per_pixel()` bytes.
pub fn nv21_to_packed(
    nv21: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
    out: &mut [u8],
) -> RenderResult<()> {
    let size = Size::new(width, height);
    let chroma_stride = size.nv21_chroma_size().0 * 2;
    let width = width as usize;
    let height = height as usize;
    let luma_len = width * height;
    let bpp = format.bytes_per_pixel();

    if nv21.len() < size.nv21_len() {
        return Err(RenderError::Configuration(format!(
            "NV21 buffer of {} bytes too small for {}x{}",
            nv21.len(),
            width,
            height
        )));
    }
    if out.len() != luma_len * bpp {
        return Err(RenderError::Configuration(format!(
            "Output buffer of {} bytes does not match {}x{} {:?}",
            out.len(),
            width,
            height,
            format
        )));
    }

    let (y_plane, vu_plane) = nv21.split_at(luma_len);
    for (row, out_row) in out.chunks_exact_mut(width * bpp).enumerate() {
        let luma = &y_plane[row * width..(row + 1) * width];
        let chroma = &vu_plane[(row / 2) * chroma_stride..(row / 2 + 1) * chroma_stride];
        for (col, px) in out_row.chunks_exact_mut(bpp).enumerate() {
            let pair = (col / 2) * 2;
            // V comes first in NV21
            let rgb = yuv_to_rgb(luma[col], chroma[pair + 1], chroma[pair]);
            px[..3].copy_from_slice(&rgb);
            if bpp == 4 {
                px[3] = 255;
            }
        }
    }
    Ok(())
}

/// Expand packed RGB rows to RGBA with opaque alpha
pub fn rgb_to_rgba_into(rgb: &[u8], rgba: &mut Vec<u8>) {
    rgba.clear();
    rgba.reserve(rgb.len() / 3 * 4);
    for px in rgb.chunks_exact(3) {
        rgba.extend_from_slice(&[px[0], px[1], px[2], 255]);
    }
}

/// Build an NV21 frame of one solid color
pub fn solid_nv21(width: u32, height: u32, y: u8, u: u8, v: u8) -> Vec<u8> {
    let size = Size::new(width, height);
    let (pairs, rows) = size.nv21_chroma_size();
    let mut frame = vec![y; width as usize * height as usize];
    frame.reserve(pairs * rows * 2);
    for _ in 0..pairs * rows {
        frame.push(v);
        frame.push(u);
    }
    frame
}
