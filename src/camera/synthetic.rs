// SPDX-License-Identifier: GPL-3.0-only

//! Test-pattern camera
//!
//! Generates NV21 frames on its own thread at a fixed rate. Frames go to a
//! stream producer when one is set, otherwise to the preview callback, one
//! frame per queued callback buffer.

use super::{
    CallbackBuffers, CameraDevice, Facing, PictureCallback, PreviewCallback, Size, optimal_size,
};
use crate::constants::PixelFormat;
use crate::errors::{CameraError, CameraResult};
use crate::frame_loop::{FrameLoop, LoopAction};
use crate::frame_source::yuv::nv21_to_packed;
use crate::frame_source::{StreamProducer, sensor_transform};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// 75% color bars as (Y, U, V): white, yellow, cyan, green, magenta, red,
/// blue, black
const BARS: [(u8, u8, u8); 8] = [
    (180, 128, 128),
    (162, 44, 142),
    (131, 156, 44),
    (112, 72, 58),
    (84, 184, 198),
    (65, 100, 212),
    (35, 212, 114),
    (16, 128, 128),
];

/// What the synthetic camera shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyntheticPattern {
    /// Every pixel the same color
    Solid { y: u8, u: u8, v: u8 },
    /// Eight vertical color bars
    #[default]
    Bars,
}

impl SyntheticPattern {
    fn color_at(&self, x: u32, width: u32) -> (u8, u8, u8) {
        match *self {
            SyntheticPattern::Solid { y, u, v } => (y, u, v),
            SyntheticPattern::Bars => {
                let bar = (x as usize * BARS.len()) / width.max(1) as usize;
                BARS[bar.min(BARS.len() - 1)]
            }
        }
    }

    /// Render one NV21 frame into `out`
    pub fn fill_nv21(&self, size: Size, out: &mut Vec<u8>) {
        let Size { width, height } = size;
        out.clear();
        out.reserve(size.nv21_len());
        for _ in 0..height {
            out.extend((0..width).map(|x| self.color_at(x, width).0));
        }
        let (pairs, rows) = size.nv21_chroma_size();
        for _ in 0..rows {
            for pair in 0..pairs as u32 {
                let (_, u, v) = self.color_at(pair * 2, width);
                out.push(v);
                out.push(u);
            }
        }
    }
}

#[derive(Default)]
struct Outputs {
    callback: Option<PreviewCallback>,
    producer: Option<StreamProducer>,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    /// Frames generated while no callback buffer was queued
    starved: AtomicU64,
}

const DEFAULT_SIZES: [Size; 4] = [
    Size::new(1280, 720),
    Size::new(640, 480),
    Size::new(640, 360),
    Size::new(320, 240),
];

/// A [`CameraDevice`] producing test patterns
pub struct SyntheticCamera {
    facing: Facing,
    orientation: u32,
    display_orientation: u32,
    preview_sizes: Vec<Size>,
    picture_sizes: Vec<Size>,
    preview_size: Size,
    picture_size: Size,
    pattern: SyntheticPattern,
    frame_interval: Duration,
    stream_support: bool,
    opened: bool,
    outputs: Arc<Mutex<Outputs>>,
    buffers: CallbackBuffers,
    counters: Arc<Counters>,
    frame_loop: Option<FrameLoop>,
}

impl SyntheticCamera {
    pub fn new(facing: Facing) -> Self {
        Self {
            facing,
            orientation: 0,
            display_orientation: 0,
            preview_sizes: DEFAULT_SIZES.to_vec(),
            picture_sizes: DEFAULT_SIZES.to_vec(),
            preview_size: DEFAULT_SIZES[1],
            picture_size: DEFAULT_SIZES[1],
            pattern: SyntheticPattern::default(),
            frame_interval: Duration::from_millis(33),
            stream_support: true,
            opened: false,
            outputs: Arc::new(Mutex::new(Outputs::default())),
            buffers: CallbackBuffers::new(),
            counters: Arc::new(Counters::default()),
            frame_loop: None,
        }
    }

    /// Sensor orientation in degrees clockwise
    pub fn with_orientation(mut self, degrees: u32) -> Self {
        self.orientation = degrees % 360;
        self
    }

    /// Supported sizes; the first one becomes the current preview and
    /// picture size
    pub fn with_sizes(mut self, sizes: Vec<Size>) -> Self {
        if let Some(&first) = sizes.first() {
            self.preview_size = first;
            self.picture_size = first;
        }
        self.preview_sizes = sizes.clone();
        self.picture_sizes = sizes;
        self
    }

    pub fn with_pattern(mut self, pattern: SyntheticPattern) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Whether frames may be published into a GPU stream
    pub fn with_stream_support(mut self, supported: bool) -> Self {
        self.stream_support = supported;
        self
    }

    pub fn is_previewing(&self) -> bool {
        self.frame_loop.as_ref().is_some_and(|l| l.is_running())
    }

    /// Frames handed to a callback or stream so far
    pub fn delivered_frames(&self) -> u64 {
        self.counters.delivered.load(Ordering::Relaxed)
    }

    /// Frames skipped because no callback buffer was queued
    pub fn starved_frames(&self) -> u64 {
        self.counters.starved.load(Ordering::Relaxed)
    }

    fn require_opened(&self) -> CameraResult<()> {
        if self.opened {
            Ok(())
        } else {
            Err(CameraError::NotOpened)
        }
    }
}

/// State of the frame thread
struct Delivery {
    outputs: Arc<Mutex<Outputs>>,
    buffers: CallbackBuffers,
    counters: Arc<Counters>,
    size: Size,
    face_camera: bool,
    frame: Vec<u8>,
    rgba: Vec<u8>,
    started: Instant,
}

impl Delivery {
    /// Hand the frame to whichever output is set
    fn deliver(&mut self) {
        let (callback, producer) = {
            let outputs = self.outputs.lock().unwrap_or_else(|e| e.into_inner());
            (outputs.callback.clone(), outputs.producer.clone())
        };
        let size = self.size;

        if let Some(producer) = producer {
            if producer.size() != size {
                trace!(stream = %producer.size(), %size, "Stream size differs, skipping frame");
                return;
            }
            self.rgba
                .resize(size.width as usize * size.height as usize * 4, 0);
            if let Err(e) = nv21_to_packed(
                &self.frame,
                size.width,
                size.height,
                PixelFormat::Rgba,
                &mut self.rgba,
            ) {
                warn!(error = %e, "Cannot convert synthetic frame");
                return;
            }
            let timestamp = self.started.elapsed().as_nanos() as u64;
            match producer.publish(&self.rgba, sensor_transform(self.face_camera), timestamp) {
                Ok(()) => {
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => trace!(error = %e, "Stream rejected frame"),
            }
        } else if let Some(callback) = callback {
            let Some(mut buffer) = self.buffers.take() else {
                self.counters.starved.fetch_add(1, Ordering::Relaxed);
                return;
            };
            buffer.clear();
            buffer.extend_from_slice(&self.frame);
            self.counters.delivered.fetch_add(1, Ordering::Relaxed);
            callback(buffer);
        }
    }
}

impl CameraDevice for SyntheticCamera {
    fn open(&mut self) -> CameraResult<()> {
        if self.opened {
            return Err(CameraError::Busy);
        }
        self.opened = true;
        info!(facing = ?self.facing, "Synthetic camera opened");
        Ok(())
    }

    fn release(&mut self) {
        self.stop_preview();
        let mut outputs = self.outputs.lock().unwrap_or_else(|e| e.into_inner());
        *outputs = Outputs::default();
        drop(outputs);
        self.buffers.clear();
        if self.opened {
            debug!("Synthetic camera released");
        }
        self.opened = false;
    }

    fn is_opened(&self) -> bool {
        self.opened
    }

    fn preview_size(&self) -> CameraResult<Size> {
        self.require_opened()?;
        Ok(self.preview_size)
    }

    fn picture_size(&self) -> CameraResult<Size> {
        self.require_opened()?;
        Ok(self.picture_size)
    }

    fn orientation(&self) -> u32 {
        self.orientation
    }

    fn set_display_orientation(&mut self, degrees: u32) {
        self.display_orientation = degrees % 360;
    }

    fn is_face_camera(&self) -> bool {
        self.facing == Facing::Front
    }

    fn setup_optimal_preview_size(
        &mut self,
        width: u32,
        height: u32,
        max_texture_size: u32,
    ) -> CameraResult<()> {
        self.require_opened()?;
        // Sizes are listed landscape; read a portrait view sideways
        let (mut width, mut height) = match self.display_orientation {
            90 | 270 => (height, width),
            _ => (width, height),
        };

        let picture = optimal_size(&self.picture_sizes, width, height, max_texture_size);
        if let Some(picture) = picture {
            width = picture.width;
            height = picture.height;
        }
        let preview = optimal_size(&self.preview_sizes, width, height, max_texture_size);

        if let (Some(preview), Some(picture)) = (preview, picture) {
            self.preview_size = preview;
            self.picture_size = picture;
            debug!(%preview, %picture, "Synthetic camera sizes chosen");
        }
        Ok(())
    }

    fn set_preview_callback(&mut self, callback: Option<PreviewCallback>) {
        self.outputs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .callback = callback;
    }

    fn callback_buffers(&self) -> CallbackBuffers {
        self.buffers.clone()
    }

    fn supports_preview_texture(&self) -> bool {
        self.stream_support
    }

    fn set_preview_texture(&mut self, producer: Option<StreamProducer>) -> CameraResult<()> {
        if producer.is_some() && !self.stream_support {
            return Err(CameraError::Unsupported(
                "GPU stream output is disabled".to_string(),
            ));
        }
        self.outputs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .producer = producer;
        Ok(())
    }

    fn start_preview(&mut self) -> CameraResult<()> {
        self.require_opened()?;
        if self.is_previewing() {
            return Ok(());
        }

        let size = self.preview_size;
        let mut delivery = Delivery {
            outputs: Arc::clone(&self.outputs),
            buffers: self.buffers.clone(),
            counters: Arc::clone(&self.counters),
            size,
            face_camera: self.is_face_camera(),
            frame: Vec::new(),
            rgba: Vec::new(),
            started: Instant::now(),
        };
        self.pattern.fill_nv21(size, &mut delivery.frame);

        let frame_loop = FrameLoop::start("synthetic-camera", self.frame_interval, move || {
            delivery.deliver();
            LoopAction::Continue
        })
        .map_err(|e| CameraError::Hardware(format!("Cannot start frame thread: {}", e)))?;

        self.frame_loop = Some(frame_loop);
        info!(%size, "Synthetic preview started");
        Ok(())
    }

    fn stop_preview(&mut self) {
        if let Some(mut frame_loop) = self.frame_loop.take() {
            frame_loop.stop();
            debug!("Synthetic preview stopped");
        }
    }

    fn take_picture(&mut self, callback: PictureCallback, auto_focus: bool) -> CameraResult<()> {
        self.require_opened()?;
        let size = self.picture_size;
        let pattern = self.pattern;
        debug!(%size, auto_focus, "Taking synthetic picture");
        thread::Builder::new()
            .name("synthetic-picture".to_string())
            .spawn(move || {
                let mut data = Vec::new();
                pattern.fill_nv21(size, &mut data);
                callback(Ok(data));
            })
            .map(|_| ())
            .map_err(|e| CameraError::Hardware(format!("Cannot start picture thread: {}", e)))
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.stop_preview();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_closed_camera_refuses_work() {
        let mut camera = SyntheticCamera::new(Facing::Back);
        assert_eq!(camera.preview_size(), Err(CameraError::NotOpened));
        assert_eq!(camera.start_preview(), Err(CameraError::NotOpened));
        camera.open().unwrap();
        assert_eq!(camera.open(), Err(CameraError::Busy));
        assert!(camera.preview_size().is_ok());
    }

    #[test]
    fn test_bars_pattern() {
        let mut frame = Vec::new();
        let size = Size::new(16, 2);
        SyntheticPattern::Bars.fill_nv21(size, &mut frame);
        assert_eq!(frame.len(), size.nv21_len());
        assert_eq!(frame[0], 180);
        assert_eq!(frame[15], 16);
        // First chroma pair is white: V then U
        assert_eq!(&frame[32..34], &[128, 128]);
        // Second pair falls in the yellow bar
        assert_eq!(&frame[34..36], &[142, 44]);

        let odd = Size::new(7, 5);
        SyntheticPattern::Bars.fill_nv21(odd, &mut frame);
        assert_eq!(frame.len(), odd.nv21_len());
    }

    #[test]
    fn test_portrait_view_picks_landscape_size() {
        let mut camera = SyntheticCamera::new(Facing::Back);
        camera.open().unwrap();
        camera.set_display_orientation(90);
        camera.setup_optimal_preview_size(720, 1280, 0).unwrap();
        assert_eq!(camera.preview_size().unwrap(), Size::new(1280, 720));

        camera.setup_optimal_preview_size(720, 1280, 1000).unwrap();
        assert_eq!(camera.picture_size().unwrap(), Size::new(640, 360));
    }

    #[test]
    fn test_callback_delivery_needs_buffers() {
        let mut camera = SyntheticCamera::new(Facing::Front)
            .with_sizes(vec![Size::new(4, 2)])
            .with_frame_interval(Duration::from_millis(2));
        camera.open().unwrap();

        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        camera.set_preview_callback(Some(Arc::new(move |data: Vec<u8>| {
            let _ = tx.lock().unwrap().send(data);
        })));
        camera.start_preview().unwrap();

        // No buffer queued yet, so frames are skipped
        while camera.starved_frames() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        camera.add_callback_buffer(vec![0; 12]);
        let frame = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(frame.len(), 12);
        camera.stop_preview();
        assert!(!camera.is_previewing());
        assert_eq!(camera.delivered_frames(), 1);
    }

    #[test]
    fn test_take_picture_delivers_picture_size() {
        let mut camera = SyntheticCamera::new(Facing::Back).with_sizes(vec![Size::new(8, 4)]);
        camera.open().unwrap();
        let (tx, rx) = mpsc::channel();
        camera
            .take_picture(
                Box::new(move |result| {
                    let _ = tx.send(result);
                }),
                true,
            )
            .unwrap();
        let data = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(data.len(), Size::new(8, 4).nv21_len());
    }
}
