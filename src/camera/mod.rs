// SPDX-License-Identifier: GPL-3.0-only

//! Camera device abstraction
//!
//! The preview engine talks to cameras only through [`CameraDevice`]. Frames
//! reach the GPU either through a stream producer handed to
//! [`CameraDevice::set_preview_texture`] or as NV21 buffers delivered to a
//! preview callback, which must hand each buffer back through
//! [`CallbackBuffers`] once it has been copied.

mod synthetic;

pub use synthetic::{SyntheticCamera, SyntheticPattern};

use crate::errors::CameraResult;
use crate::frame_source::StreamProducer;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Width and height in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn aspect(&self) -> f64 {
        self.width as f64 / self.height.max(1) as f64
    }

    /// Chroma plane dimensions in V/U pairs, rounded up for odd sizes
    pub fn nv21_chroma_size(&self) -> (usize, usize) {
        (self.width.div_ceil(2) as usize, self.height.div_ceil(2) as usize)
    }

    /// Bytes of one NV21 frame of this size
    pub fn nv21_len(&self) -> usize {
        let (pairs, rows) = self.nv21_chroma_size();
        self.width as usize * self.height as usize + pairs * rows * 2
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Which way the camera faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Facing {
    #[default]
    Back,
    Front,
}

/// Receives one filled NV21 buffer per frame on the camera's thread
pub type PreviewCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Receives the encoded picture, or the failure, after `take_picture`
pub type PictureCallback = Box<dyn FnOnce(CameraResult<Vec<u8>>) + Send>;

/// Buffers the camera may fill with preview frames.
///
/// A camera only delivers a frame when a buffer is queued; without one the
/// frame is dropped.
#[derive(Clone, Default)]
pub struct CallbackBuffers {
    queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
}

impl CallbackBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, buffer: Vec<u8>) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(buffer);
    }

    pub fn take(&self) -> Option<Vec<u8>> {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl fmt::Debug for CallbackBuffers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackBuffers")
            .field("queued", &self.len())
            .finish()
    }
}

/// A camera as seen by the preview engine
pub trait CameraDevice: Send {
    fn open(&mut self) -> CameraResult<()>;

    fn release(&mut self);

    fn is_opened(&self) -> bool;

    fn preview_size(&self) -> CameraResult<Size>;

    fn picture_size(&self) -> CameraResult<Size>;

    /// Clockwise rotation of the sensor image relative to the display
    fn orientation(&self) -> u32;

    /// Rotation to apply when drawing the preview
    fn optimal_orientation(&self) -> u32 {
        self.orientation()
    }

    fn set_display_orientation(&mut self, degrees: u32);

    fn is_face_camera(&self) -> bool;

    /// Pick preview and picture sizes for a view of `width x height`,
    /// never exceeding `max_texture_size` on either side
    fn setup_optimal_preview_size(
        &mut self,
        width: u32,
        height: u32,
        max_texture_size: u32,
    ) -> CameraResult<()>;

    /// Deliver NV21 frames to `callback`; `None` stops delivery
    fn set_preview_callback(&mut self, callback: Option<PreviewCallback>);

    /// Handle used to queue buffers for the preview callback
    fn callback_buffers(&self) -> CallbackBuffers;

    fn add_callback_buffer(&self, buffer: Vec<u8>) {
        self.callback_buffers().add(buffer);
    }

    /// Whether frames can be published straight into a GPU stream
    fn supports_preview_texture(&self) -> bool {
        true
    }

    /// Publish frames straight into a GPU stream; `None` detaches it
    fn set_preview_texture(&mut self, producer: Option<StreamProducer>) -> CameraResult<()>;

    fn start_preview(&mut self) -> CameraResult<()>;

    fn stop_preview(&mut self);

    fn take_picture(&mut self, callback: PictureCallback, auto_focus: bool) -> CameraResult<()>;
}

/// Aspect ratios closer than this count as matching
const ASPECT_TOLERANCE: f64 = 0.1;

/// Best size for a `width x height` area.
///
/// Prefers sizes whose aspect ratio matches within tolerance, then the one
/// whose height is closest. Sizes with a side above `max_size` are skipped
/// when `max_size` is non-zero.
pub fn optimal_size(sizes: &[Size], width: u32, height: u32, max_size: u32) -> Option<Size> {
    let target = Size::new(width, height).aspect();
    let fits = |s: &&Size| max_size == 0 || (s.width <= max_size && s.height <= max_size);
    let height_diff = |s: &&Size| s.height.abs_diff(height);

    sizes
        .iter()
        .filter(fits)
        .filter(|s| (s.aspect() - target).abs() <= ASPECT_TOLERANCE)
        .min_by_key(height_diff)
        .or_else(|| sizes.iter().filter(fits).min_by_key(height_diff))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZES: &[Size] = &[
        Size::new(1920, 1080),
        Size::new(1280, 720),
        Size::new(640, 480),
        Size::new(320, 240),
    ];

    #[test]
    fn test_optimal_size_prefers_matching_aspect() {
        assert_eq!(optimal_size(SIZES, 1200, 700, 0), Some(Size::new(1280, 720)));
        assert_eq!(optimal_size(SIZES, 800, 600, 0), Some(Size::new(640, 480)));
    }

    #[test]
    fn test_optimal_size_respects_max_texture_size() {
        assert_eq!(optimal_size(SIZES, 1920, 1080, 1280), Some(Size::new(1280, 720)));
        assert_eq!(optimal_size(SIZES, 1920, 1080, 100), None);
    }

    #[test]
    fn test_optimal_size_falls_back_to_height() {
        // 1:1 matches nothing; closest height wins
        assert_eq!(optimal_size(SIZES, 500, 500, 0), Some(Size::new(640, 480)));
    }

    #[test]
    fn test_callback_buffers_fifo() {
        let buffers = CallbackBuffers::new();
        buffers.add(vec![1]);
        buffers.add(vec![2]);
        let clone = buffers.clone();
        assert_eq!(clone.take(), Some(vec![1]));
        assert_eq!(buffers.len(), 1);
        buffers.clear();
        assert!(clone.is_empty());
    }

    #[test]
    fn test_nv21_len() {
        assert_eq!(Size::new(4, 2).nv21_len(), 12);
        // 3x3 luma plus 2x2 V/U pairs
        assert_eq!(Size::new(3, 3).nv21_len(), 9 + 8);
        assert_eq!(Size::new(5, 2).nv21_chroma_size(), (3, 1));
    }
}
