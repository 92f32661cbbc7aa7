// SPDX-License-Identifier: GPL-3.0-only

//! Periodic worker threads
//!
//! Used by the synthetic camera to deliver frames at a fixed rate and by the
//! FPS counter to report once per interval. Stopping wakes the worker
//! immediately instead of waiting out the current period.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Action returned by the loop callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Run again after the next period
    Continue,
    /// Leave the loop
    Stop,
}

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    fn raise(&self) {
        *self.stopped.lock().unwrap_or_else(|e| e.into_inner()) = true;
        self.wake.notify_all();
    }

    /// Sleep until `deadline` or until stopped. Returns whether stopped.
    fn wait_until(&self, deadline: Instant) -> bool {
        let mut stopped = self.stopped.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if *stopped {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            stopped = match self.wake.wait_timeout(stopped, deadline - now) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
    }
}

/// A named thread calling a closure once per period
pub struct FrameLoop {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: Arc<StopSignal>,
    name: String,
}

impl FrameLoop {
    /// Start calling `tick` every `period` until it returns
    /// [`LoopAction::Stop`] or the loop is stopped.
    ///
    /// Ticks are scheduled from the previous deadline, so a slow tick does
    /// not shift later ones.
    pub fn start<F>(name: &str, period: Duration, mut tick: F) -> std::io::Result<Self>
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(StopSignal::default());
        let worker_signal = Arc::clone(&stop_signal);
        let thread_name = name.to_string();

        info!(name = %name, ?period, "Starting frame loop");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut deadline = Instant::now() + period;
                loop {
                    if worker_signal.wait_until(deadline) {
                        debug!(name = %thread_name, "Stop signal received");
                        break;
                    }
                    if tick() == LoopAction::Stop {
                        debug!(name = %thread_name, "Loop requested stop");
                        break;
                    }
                    deadline += period;
                    let now = Instant::now();
                    if deadline < now {
                        // Fell behind; skip the missed ticks
                        deadline = now + period;
                    }
                }
                debug!(name = %thread_name, "Frame loop thread exiting");
            })?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        })
    }

    /// Check if the loop is still running
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the loop to stop without waiting
    pub fn request_stop(&self) {
        self.stop_signal.raise();
    }

    /// Stop the loop and wait for the thread to finish
    pub fn stop(&mut self) {
        self.request_stop();
        if let Some(handle) = self.thread_handle.take() {
            if handle.thread().id() == thread::current().id() {
                // Stopped from inside a tick; the loop exits on its own
                return;
            }
            if handle.join().is_err() {
                warn!(name = %self.name, "Frame loop thread panicked");
            }
        }
    }
}

impl Drop for FrameLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_loop_ticks_until_stopped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let mut frame_loop = FrameLoop::start("test-loop", Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            LoopAction::Continue
        })
        .unwrap();

        while ticks.load(Ordering::SeqCst) < 3 {
            thread::sleep(Duration::from_millis(1));
        }
        frame_loop.stop();
        assert!(!frame_loop.is_running());
        let after = ticks.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(ticks.load(Ordering::SeqCst), after);
    }

    #[test]
    fn test_stop_interrupts_long_period() {
        let started = Instant::now();
        let mut frame_loop =
            FrameLoop::start("slow-loop", Duration::from_secs(60), || LoopAction::Continue)
                .unwrap();
        frame_loop.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_loop_can_stop_itself() {
        let frame_loop = FrameLoop::start("once", Duration::from_millis(1), || LoopAction::Stop)
            .unwrap();
        while frame_loop.is_running() {
            thread::sleep(Duration::from_millis(1));
        }
    }
}
