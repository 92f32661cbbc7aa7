// SPDX-License-Identifier: GPL-3.0-only

//! Frames-per-second counter
//!
//! The render thread calls [`Fps::count_up`] once per drawn frame. A
//! background thread reports the count each interval and resets it.

use crate::constants::FPS_REPORT_INTERVAL;
use crate::frame_loop::{FrameLoop, LoopAction};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Receives the number of frames drawn during the last interval
pub type FpsCallback = Arc<dyn Fn(u32) + Send + Sync>;

/// Shared frame counter; clones count into the same total
#[derive(Clone)]
pub struct Fps {
    frames: Arc<AtomicU32>,
    callback: FpsCallback,
    interval: Duration,
    reporter: Arc<Mutex<Option<FrameLoop>>>,
}

impl Fps {
    pub fn new(callback: impl Fn(u32) + Send + Sync + 'static) -> Self {
        Self::with_interval(FPS_REPORT_INTERVAL, callback)
    }

    pub fn with_interval(interval: Duration, callback: impl Fn(u32) + Send + Sync + 'static) -> Self {
        Self {
            frames: Arc::new(AtomicU32::new(0)),
            callback: Arc::new(callback),
            interval,
            reporter: Arc::new(Mutex::new(None)),
        }
    }

    /// Start reporting, restarting the count
    pub fn start(&self) {
        let mut reporter = self.reporter.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut previous) = reporter.take() {
            previous.stop();
        }
        self.frames.store(0, Ordering::Relaxed);

        let frames = Arc::clone(&self.frames);
        let callback = Arc::clone(&self.callback);
        match FrameLoop::start("fps-counter", self.interval, move || {
            callback(frames.swap(0, Ordering::Relaxed));
            LoopAction::Continue
        }) {
            Ok(frame_loop) => *reporter = Some(frame_loop),
            Err(e) => warn!(error = %e, "Cannot start FPS reporting"),
        }
    }

    /// Stop reporting
    pub fn stop(&self) {
        let previous = self
            .reporter
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(mut frame_loop) = previous {
            frame_loop.stop();
            debug!("FPS reporting stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.reporter
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|l| l.is_running())
    }

    /// Count one drawn frame
    pub fn count_up(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for Fps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fps")
            .field("frames", &self.frames.load(Ordering::Relaxed))
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_reports_and_resets_count() {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let fps = Fps::with_interval(Duration::from_millis(50), move |count| {
            let _ = tx.lock().unwrap().send(count);
        });
        fps.start();
        assert!(fps.is_running());
        for _ in 0..7 {
            fps.count_up();
        }
        let mut total = 0;
        while total < 7 {
            total += rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert_eq!(total, 7);

        fps.stop();
        assert!(!fps.is_running());
    }

    #[test]
    fn test_stop_without_start() {
        let fps = Fps::new(|_| {});
        fps.stop();
        fps.count_up();
        assert!(!fps.is_running());
    }
}
