// SPDX-License-Identifier: GPL-3.0-only

//! Render thread and graphics context lifecycle
//!
//! The render thread exclusively owns the graphics context and surface of a
//! [`GraphicsDriver`]. Other threads talk to it through blocking handshakes
//! (surface created/destroyed, pause, resume, resize) and a work queue that
//! is always drained before the next draw.
//!
//! ```ignore
//! let arbiter = ContextArbiter::new(true);
//! let thread = RenderThreadBuilder::new("preview")
//!     .render_mode(RenderMode::WhenDirty)
//!     .spawn(driver, renderer, arbiter)?;
//!
//! thread.surface_created(window);
//! thread.on_window_resize(1280, 720);
//! thread.queue_event(|r| r.set_brightness(0.2));
//! thread.request_render();
//! ```

use super::arbiter::{ContextArbiter, Monitor, RenderThreadId};
use super::renderer::Renderer;
use crate::constants::RenderMode;
use crate::errors::{RenderError, RenderResult};
use crate::gpu::{GraphicsDriver, SwapOutcome};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Consecutive swap failures tolerated before waiting for a new surface
const MAX_SWAP_FAILURES: u32 = 3;

/// Work item executed on the render thread before the next draw
pub type RenderEvent<R> = Box<dyn FnOnce(&mut R) + Send>;

/// Receives fatal errors after the render thread has exited
pub type ErrorListener = Arc<dyn Fn(&RenderError) + Send + Sync>;

/// Observable lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    /// No surface, and the thread has not yet acknowledged it
    NoSurface,
    /// Thread is waiting for a window surface
    WaitingForSurface,
    /// A window exists but no context is held
    HasSurfaceNoContext,
    /// Context is held but the presentable surface is not created yet
    HasContextNoFbSurface,
    /// Drawing is possible
    Ready,
    /// Paused by the owner
    Paused,
    /// Exit requested or done
    Exiting,
}

type EventQueue<R> = Arc<Mutex<VecDeque<RenderEvent<R>>>>;

/// Cloneable handle for poking a render thread from other threads.
///
/// Frame sources use this to request a render when a new camera frame
/// arrives.
pub struct RenderHandle<R> {
    id: RenderThreadId,
    arbiter: Arc<ContextArbiter>,
    events: EventQueue<R>,
}

impl<R> Clone for RenderHandle<R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            arbiter: Arc::clone(&self.arbiter),
            events: Arc::clone(&self.events),
        }
    }
}

impl<R> RenderHandle<R> {
    /// Ask for one more frame (non-blocking)
    pub fn request_render(&self) {
        let mut monitor = self.arbiter.lock();
        monitor.thread(self.id).request_render = true;
        drop(monitor);
        self.arbiter.notify_all();
    }

    /// Queue work to run on the render thread ahead of the next draw
    pub fn queue_event(&self, event: impl FnOnce(&mut R) + Send + 'static) -> RenderResult<()> {
        if self.arbiter.lock().thread(self.id).exited {
            return Err(RenderError::ThreadExited);
        }
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Box::new(event));
        self.arbiter.notify_all();
        Ok(())
    }

    /// Whether the thread has finished
    pub fn has_exited(&self) -> bool {
        self.arbiter.lock().thread(self.id).exited
    }
}

/// Builder for render threads
pub struct RenderThreadBuilder {
    name: String,
    render_mode: RenderMode,
    preserve_context_on_pause: bool,
    error_listener: Option<ErrorListener>,
}

impl RenderThreadBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            render_mode: RenderMode::default(),
            preserve_context_on_pause: false,
            error_listener: None,
        }
    }

    pub fn render_mode(mut self, mode: RenderMode) -> Self {
        self.render_mode = mode;
        self
    }

    pub fn preserve_context_on_pause(mut self, preserve: bool) -> Self {
        self.preserve_context_on_pause = preserve;
        self
    }

    /// Called once with the error that stopped the thread
    pub fn error_listener(mut self, listener: impl Fn(&RenderError) + Send + Sync + 'static) -> Self {
        self.error_listener = Some(Arc::new(listener));
        self
    }

    /// Start the render thread
    pub fn spawn<D, R>(
        self,
        driver: D,
        renderer: R,
        arbiter: Arc<ContextArbiter>,
    ) -> RenderResult<RenderThread<D, R>>
    where
        D: GraphicsDriver,
        R: Renderer<D::Context, D::Frame>,
    {
        let id = arbiter.register(self.render_mode, self.preserve_context_on_pause);
        let events: EventQueue<R> = Arc::new(Mutex::new(VecDeque::new()));
        let window: Arc<Mutex<Option<D::Window>>> = Arc::new(Mutex::new(None));

        info!(name = %self.name, ?id, mode = ?self.render_mode, "Starting render thread");

        let worker_arbiter = Arc::clone(&arbiter);
        let worker_events = Arc::clone(&events);
        let worker_window = Arc::clone(&window);
        let name = self.name.clone();
        let error_listener = self.error_listener;

        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let worker = Worker {
                    id,
                    name,
                    arbiter: worker_arbiter,
                    events: worker_events,
                    window: worker_window,
                    driver,
                    renderer,
                    context: None,
                    surface: None,
                    error_listener,
                };
                worker.run();
            })
            .map_err(|e| {
                arbiter.unregister(id);
                RenderError::Configuration(format!("Cannot spawn render thread: {}", e))
            })?;

        Ok(RenderThread {
            handle: RenderHandle {
                id,
                arbiter,
                events,
            },
            window,
            join_handle: Some(handle),
            name: self.name,
        })
    }
}

/// Owner side of a render thread
pub struct RenderThread<D: GraphicsDriver, R> {
    handle: RenderHandle<R>,
    window: Arc<Mutex<Option<D::Window>>>,
    join_handle: Option<JoinHandle<()>>,
    name: String,
}

impl<D: GraphicsDriver, R> RenderThread<D, R> {
    pub fn id(&self) -> RenderThreadId {
        self.handle.id
    }

    /// Handle usable from other threads
    pub fn handle(&self) -> RenderHandle<R> {
        self.handle.clone()
    }

    /// Check if the thread is still running
    pub fn is_running(&self) -> bool {
        self.join_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    pub fn state(&self) -> RenderState {
        let mut monitor = self.handle.arbiter.lock();
        let st = monitor.thread(self.handle.id);
        if st.exited || st.should_exit {
            RenderState::Exiting
        } else if st.paused {
            RenderState::Paused
        } else if !st.has_surface {
            if st.waiting_for_surface {
                RenderState::WaitingForSurface
            } else {
                RenderState::NoSurface
            }
        } else if !st.have_context {
            RenderState::HasSurfaceNoContext
        } else if !st.have_fb_surface {
            RenderState::HasContextNoFbSurface
        } else {
            RenderState::Ready
        }
    }

    /// Hand a window to the thread and wait until it has been taken up
    pub fn surface_created(&self, window: D::Window) {
        *self.window.lock().unwrap_or_else(|e| e.into_inner()) = Some(window);

        let arbiter = &self.handle.arbiter;
        let id = self.handle.id;
        let mut monitor = arbiter.lock();
        debug!(name = %self.name, "Surface created");
        {
            let st = monitor.thread(id);
            st.has_surface = true;
            st.surface_is_bad = false;
            st.finished_creating_surface = false;
        }
        arbiter.notify_all();
        loop {
            let st = monitor.thread(id);
            if !(st.waiting_for_surface && !st.finished_creating_surface && !st.exited) {
                break;
            }
            monitor = arbiter.wait(monitor);
        }
    }

    /// Withdraw the window and wait until the thread has dropped its surface
    pub fn surface_destroyed(&self) {
        let arbiter = &self.handle.arbiter;
        let id = self.handle.id;
        let mut monitor = arbiter.lock();
        debug!(name = %self.name, "Surface destroyed");
        monitor.thread(id).has_surface = false;
        arbiter.notify_all();
        loop {
            let st = monitor.thread(id);
            if st.waiting_for_surface || st.exited {
                break;
            }
            monitor = arbiter.wait(monitor);
        }
        drop(monitor);
        *self.window.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Pause and wait for the thread to acknowledge
    pub fn on_pause(&self) {
        let arbiter = &self.handle.arbiter;
        let id = self.handle.id;
        let mut monitor = arbiter.lock();
        debug!(name = %self.name, "Pause requested");
        monitor.thread(id).request_paused = true;
        arbiter.notify_all();
        loop {
            let st = monitor.thread(id);
            if st.exited || st.paused {
                break;
            }
            monitor = arbiter.wait(monitor);
        }
    }

    /// Resume and wait for the thread to acknowledge
    pub fn on_resume(&self) {
        let arbiter = &self.handle.arbiter;
        let id = self.handle.id;
        let mut monitor = arbiter.lock();
        debug!(name = %self.name, "Resume requested");
        {
            let st = monitor.thread(id);
            st.request_paused = false;
            st.request_render = true;
            st.render_complete = false;
        }
        arbiter.notify_all();
        loop {
            let st = monitor.thread(id);
            if st.exited || !st.paused || st.render_complete {
                break;
            }
            monitor = arbiter.wait(monitor);
        }
    }

    /// Resize and wait until a frame has been rendered at the new size.
    ///
    /// Returns early when the thread cannot draw (paused, no surface, no
    /// context yet).
    pub fn on_window_resize(&self, width: u32, height: u32) {
        let arbiter = &self.handle.arbiter;
        let id = self.handle.id;
        let mut monitor = arbiter.lock();
        debug!(name = %self.name, width, height, "Window resized");
        let seq = {
            let st = monitor.thread(id);
            st.width = width;
            st.height = height;
            st.size_changed = true;
            st.request_render = true;
            st.surface_is_bad = false;
            st.resize_seq += 1;
            st.resize_seq
        };
        arbiter.notify_all();
        loop {
            let st = monitor.thread(id);
            if st.exited || st.presented_seq >= seq || !st.can_present() {
                break;
            }
            monitor = arbiter.wait(monitor);
        }
    }

    pub fn request_render(&self) {
        self.handle.request_render();
    }

    pub fn set_render_mode(&self, mode: RenderMode) {
        let mut monitor = self.handle.arbiter.lock();
        monitor.thread(self.handle.id).render_mode = mode;
        drop(monitor);
        self.handle.arbiter.notify_all();
    }

    pub fn render_mode(&self) -> RenderMode {
        self.handle.arbiter.lock().thread(self.handle.id).render_mode
    }

    pub fn set_preserve_context_on_pause(&self, preserve: bool) {
        self.handle
            .arbiter
            .lock()
            .thread(self.handle.id)
            .preserve_context_on_pause = preserve;
    }

    pub fn queue_event(&self, event: impl FnOnce(&mut R) + Send + 'static) -> RenderResult<()> {
        self.handle.queue_event(event)
    }

    /// Ask the thread to give up its context (it keeps running)
    pub fn request_release_context(&self) {
        let mut monitor = self.handle.arbiter.lock();
        monitor.thread(self.handle.id).should_release_context = true;
        drop(monitor);
        self.handle.arbiter.notify_all();
    }

    /// Stop the thread and wait for it to finish
    pub fn request_exit_and_wait(&mut self) {
        let arbiter = Arc::clone(&self.handle.arbiter);
        let id = self.handle.id;
        {
            let mut monitor = arbiter.lock();
            debug!(name = %self.name, "Requesting render thread exit");
            monitor.thread(id).should_exit = true;
            arbiter.notify_all();
            loop {
                if monitor.thread(id).exited {
                    break;
                }
                monitor = arbiter.wait(monitor);
            }
        }
        self.join();
    }

    fn join(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            debug!(name = %self.name, "Waiting for render thread to finish");
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Render thread panicked: {:?}", e);
            } else {
                debug!(name = %self.name, "Render thread finished");
            }
        }
    }
}

impl<D: GraphicsDriver, R> Drop for RenderThread<D, R> {
    fn drop(&mut self) {
        if self.join_handle.is_some() {
            debug!(name = %self.name, "RenderThread dropped, stopping thread");
            self.request_exit_and_wait();
        }
        self.handle.arbiter.unregister(self.handle.id);
    }
}

/// Marks the thread exited even when the renderer panics
struct ExitGuard {
    id: RenderThreadId,
    arbiter: Arc<ContextArbiter>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.arbiter.lock().thread_exiting(self.id);
        self.arbiter.notify_all();
    }
}

/// Render-thread side state
struct Worker<D: GraphicsDriver, R> {
    id: RenderThreadId,
    name: String,
    arbiter: Arc<ContextArbiter>,
    events: EventQueue<R>,
    window: Arc<Mutex<Option<D::Window>>>,
    driver: D,
    renderer: R,
    context: Option<D::Context>,
    surface: Option<D::Surface>,
    error_listener: Option<ErrorListener>,
}

impl<D, R> Worker<D, R>
where
    D: GraphicsDriver,
    R: Renderer<D::Context, D::Frame>,
{
    fn run(mut self) {
        debug!(name = %self.name, "Render thread started");
        let guard = ExitGuard {
            id: self.id,
            arbiter: Arc::clone(&self.arbiter),
        };

        let result = self.guarded_run();

        {
            let arbiter = Arc::clone(&self.arbiter);
            let mut monitor = arbiter.lock();
            self.stop_surface(&mut monitor);
            self.stop_context(&mut monitor);
        }
        drop(guard);

        if let Err(e) = result {
            error!(name = %self.name, error = %e, "Render thread stopped by fatal error");
            if let Some(listener) = &self.error_listener {
                listener(&e);
            }
        }

        info!(name = %self.name, "Render thread exiting");
    }

    fn pop_event(&self) -> Option<RenderEvent<R>> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    fn stop_surface(&mut self, monitor: &mut Monitor) {
        let st = monitor.thread(self.id);
        if st.have_fb_surface {
            st.have_fb_surface = false;
            if let (Some(surface), Some(context)) = (self.surface.take(), self.context.as_ref()) {
                debug!(name = %self.name, "Destroying surface");
                self.driver.destroy_surface(context, surface);
            }
        }
    }

    fn stop_context(&mut self, monitor: &mut Monitor) {
        self.stop_surface(monitor);
        let st = monitor.thread(self.id);
        if st.have_context {
            st.have_context = false;
            self.renderer.on_context_released();
            if let Some(context) = self.context.take() {
                debug!(name = %self.name, "Destroying context");
                self.driver.destroy_context(context);
            }
            monitor.release_context(self.id);
            self.arbiter.notify_all();
        }
    }

    /// Sort a recoverable renderer error into the loop's recovery flags
    fn recover(
        &self,
        err: RenderError,
        lost_context: &mut bool,
        recreate_surface: &mut bool,
    ) -> RenderResult<()> {
        match err {
            RenderError::ContextLost(msg) => {
                warn!(name = %self.name, %msg, "Context lost while rendering");
                *lost_context = true;
                Ok(())
            }
            RenderError::TransientDriver(msg) => {
                debug!(name = %self.name, %msg, "Transient driver error, recreating surface");
                *recreate_surface = true;
                Ok(())
            }
            fatal => Err(fatal),
        }
    }

    fn guarded_run(&mut self) -> RenderResult<()> {
        let arbiter = Arc::clone(&self.arbiter);
        let id = self.id;

        let mut create_context = false;
        let mut create_surface = false;
        let mut size_changed = false;
        // Resize generation owed a presented frame
        let mut notify_seq: Option<u64> = None;
        let mut asked_to_release = false;
        let mut lost_context = false;
        let mut recreate_surface = false;
        let mut swap_failures = 0u32;
        let mut width = 0u32;
        let mut height = 0u32;

        loop {
            let mut event = None;
            {
                let mut monitor = arbiter.lock();
                loop {
                    if monitor.thread(id).should_exit {
                        return Ok(());
                    }

                    if let Some(ev) = self.pop_event() {
                        event = Some(ev);
                        break;
                    }

                    let mut pausing = false;
                    {
                        let st = monitor.thread(id);
                        if st.paused != st.request_paused {
                            pausing = st.request_paused;
                            st.paused = st.request_paused;
                            debug!(name = %self.name, paused = st.paused, "Pause state changed");
                            arbiter.notify_all();
                        }
                    }

                    if monitor.thread(id).should_release_context {
                        debug!(name = %self.name, "Releasing context on request");
                        self.stop_context(&mut monitor);
                        monitor.thread(id).should_release_context = false;
                        asked_to_release = true;
                    }

                    if lost_context {
                        self.stop_context(&mut monitor);
                        lost_context = false;
                    }

                    if recreate_surface {
                        self.stop_surface(&mut monitor);
                        recreate_surface = false;
                    }

                    if pausing && monitor.thread(id).have_fb_surface {
                        self.stop_surface(&mut monitor);
                    }

                    if pausing && monitor.thread(id).have_context {
                        let preserve = monitor.thread(id).preserve_context_on_pause;
                        if !preserve || monitor.should_release_when_pausing() {
                            self.stop_context(&mut monitor);
                        }
                    }

                    let (has_surface, waiting) = {
                        let st = monitor.thread(id);
                        (st.has_surface, st.waiting_for_surface)
                    };
                    if !has_surface && !waiting {
                        self.stop_surface(&mut monitor);
                        let st = monitor.thread(id);
                        st.waiting_for_surface = true;
                        st.surface_is_bad = false;
                        arbiter.notify_all();
                    }
                    if has_surface && waiting {
                        monitor.thread(id).waiting_for_surface = false;
                        arbiter.notify_all();
                    }

                    if monitor.thread(id).ready_to_draw() {
                        if !monitor.thread(id).have_context {
                            if asked_to_release {
                                asked_to_release = false;
                            } else if monitor.try_acquire_context(id) {
                                let created = {
                                    let window =
                                        self.window.lock().unwrap_or_else(|e| e.into_inner());
                                    self.driver.create_context(window.as_ref())
                                };
                                match created {
                                    Ok(context) => {
                                        self.context = Some(context);
                                        monitor.thread(id).have_context = true;
                                        create_context = true;
                                        arbiter.notify_all();
                                    }
                                    Err(e) => {
                                        monitor.release_context(id);
                                        return Err(e);
                                    }
                                }
                            } else {
                                // Wake the owner so it sees the release request
                                arbiter.notify_all();
                            }
                        }

                        let st = monitor.thread(id);
                        if st.have_context && !st.have_fb_surface {
                            st.have_fb_surface = true;
                            create_surface = true;
                            size_changed = true;
                        }

                        if st.have_fb_surface {
                            if st.size_changed {
                                size_changed = true;
                                width = st.width;
                                height = st.height;
                                notify_seq = Some(st.resize_seq);
                                create_surface = true;
                                st.size_changed = false;
                            }
                            st.request_render = false;
                            arbiter.notify_all();
                            break;
                        }
                    }

                    monitor = arbiter.wait(monitor);
                }
            }

            if let Some(event) = event {
                event(&mut self.renderer);
                continue;
            }

            if create_surface {
                if let (Some(old), Some(context)) = (self.surface.take(), self.context.as_ref()) {
                    self.driver.destroy_surface(context, old);
                }
                let created = {
                    let window = self.window.lock().unwrap_or_else(|e| e.into_inner());
                    match (self.context.as_ref(), window.as_ref()) {
                        (Some(context), Some(window)) => {
                            self.driver.create_surface(context, window, width, height)
                        }
                        _ => Err(RenderError::TransientDriver(
                            "No window available for surface".to_string(),
                        )),
                    }
                };
                match created {
                    Ok(surface) => {
                        self.surface = Some(surface);
                        monitor_finished_surface(&arbiter, id, false);
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(name = %self.name, error = %e, "Surface creation failed");
                        monitor_finished_surface(&arbiter, id, true);
                        continue;
                    }
                }
                create_surface = false;
            }

            let Some(context) = self.context.as_ref() else {
                continue;
            };

            if create_context {
                debug!(name = %self.name, "Context created, notifying renderer");
                if let Err(e) = self.renderer.on_surface_created(context) {
                    let (mut lost, mut recreate) = (false, false);
                    self.recover(e, &mut lost, &mut recreate)?;
                    lost_context |= lost;
                    recreate_surface |= recreate;
                    request_redraw(&arbiter, id);
                    continue;
                }
                create_context = false;
            }

            if size_changed {
                debug!(name = %self.name, width, height, "Surface changed");
                if let Err(e) = self.renderer.on_surface_changed(context, width, height) {
                    let (mut lost, mut recreate) = (false, false);
                    self.recover(e, &mut lost, &mut recreate)?;
                    lost_context |= lost;
                    recreate_surface |= recreate;
                    request_redraw(&arbiter, id);
                    continue;
                }
                size_changed = false;
            }

            let Some(surface) = self.surface.as_mut() else {
                continue;
            };

            let outcome = match self.driver.acquire_frame(context, surface) {
                Ok(frame) => match self.renderer.on_draw_frame(context, &frame) {
                    Ok(()) => self.driver.present(context, surface, frame),
                    Err(RenderError::ContextLost(msg)) => {
                        warn!(name = %self.name, %msg, "Context lost while drawing");
                        SwapOutcome::ContextLost
                    }
                    Err(RenderError::TransientDriver(msg)) => {
                        debug!(name = %self.name, %msg, "Transient error while drawing");
                        SwapOutcome::SurfaceBad
                    }
                    Err(e) => return Err(e),
                },
                Err(outcome) => outcome,
            };

            match outcome {
                SwapOutcome::Presented => {
                    swap_failures = 0;
                    if let Some(seq) = notify_seq.take() {
                        let mut monitor = arbiter.lock();
                        let st = monitor.thread(id);
                        st.presented_seq = st.presented_seq.max(seq);
                        st.render_complete = true;
                        drop(monitor);
                        arbiter.notify_all();
                    }
                }
                SwapOutcome::SurfaceBad => {
                    swap_failures += 1;
                    if swap_failures >= MAX_SWAP_FAILURES {
                        warn!(name = %self.name, swap_failures, "Surface keeps failing, waiting for a new one");
                        swap_failures = 0;
                        let mut monitor = arbiter.lock();
                        monitor.thread(id).surface_is_bad = true;
                        arbiter.notify_all();
                    } else {
                        recreate_surface = true;
                        request_redraw(&arbiter, id);
                    }
                }
                SwapOutcome::ContextLost => {
                    lost_context = true;
                    request_redraw(&arbiter, id);
                }
            }
        }
    }
}

fn monitor_finished_surface(arbiter: &ContextArbiter, id: RenderThreadId, failed: bool) {
    let mut monitor = arbiter.lock();
    let st = monitor.thread(id);
    st.finished_creating_surface = true;
    if failed {
        st.surface_is_bad = true;
        st.have_fb_surface = false;
    }
    drop(monitor);
    arbiter.notify_all();
}

/// Re-arm a render request after a frame was lost to recovery
fn request_redraw(arbiter: &ContextArbiter, id: RenderThreadId) {
    arbiter.lock().thread(id).request_render = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};

    /// What the mock driver saw
    #[derive(Default, Debug)]
    struct DriverLog {
        contexts_created: u32,
        contexts_with_window: u32,
        contexts_destroyed: u32,
        surfaces_created: Vec<(u32, u32)>,
        surfaces_destroyed: u32,
        presented: Vec<(u32, u32)>,
    }

    #[derive(Clone, Default)]
    struct MockDriver {
        log: Arc<Mutex<DriverLog>>,
        present_script: Arc<Mutex<VecDeque<SwapOutcome>>>,
        fail_context: bool,
    }

    impl GraphicsDriver for MockDriver {
        type Window = ();
        type Context = u32;
        type Surface = (u32, u32);
        type Frame = (u32, u32);

        fn create_context(&mut self, window: Option<&()>) -> RenderResult<u32> {
            if self.fail_context {
                return Err(RenderError::Configuration("no device".into()));
            }
            let mut log = self.log.lock().unwrap();
            log.contexts_created += 1;
            log.contexts_with_window += u32::from(window.is_some());
            Ok(log.contexts_created)
        }

        fn destroy_context(&mut self, _context: u32) {
            self.log.lock().unwrap().contexts_destroyed += 1;
        }

        fn create_surface(
            &mut self,
            _context: &u32,
            _window: &(),
            width: u32,
            height: u32,
        ) -> RenderResult<(u32, u32)> {
            self.log.lock().unwrap().surfaces_created.push((width, height));
            Ok((width, height))
        }

        fn destroy_surface(&mut self, _context: &u32, _surface: (u32, u32)) {
            self.log.lock().unwrap().surfaces_destroyed += 1;
        }

        fn acquire_frame(
            &mut self,
            _context: &u32,
            surface: &mut (u32, u32),
        ) -> Result<(u32, u32), SwapOutcome> {
            Ok(*surface)
        }

        fn present(&mut self, _context: &u32, _surface: &mut (u32, u32), frame: (u32, u32)) -> SwapOutcome {
            let outcome = self
                .present_script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(SwapOutcome::Presented);
            if outcome == SwapOutcome::Presented {
                self.log.lock().unwrap().presented.push(frame);
            }
            outcome
        }
    }

    #[derive(Clone, Default)]
    struct MockRenderer {
        calls: Arc<Mutex<Vec<String>>>,
        value: u32,
    }

    impl Renderer<u32, (u32, u32)> for MockRenderer {
        fn on_surface_created(&mut self, context: &u32) -> RenderResult<()> {
            self.calls.lock().unwrap().push(format!("created {}", context));
            Ok(())
        }

        fn on_surface_changed(&mut self, _context: &u32, width: u32, height: u32) -> RenderResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("changed {}x{}", width, height));
            Ok(())
        }

        fn on_draw_frame(&mut self, _context: &u32, frame: &(u32, u32)) -> RenderResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("draw {}x{} value={}", frame.0, frame.1, self.value));
            Ok(())
        }

        fn on_context_released(&mut self) {
            self.calls.lock().unwrap().push("released".to_string());
        }
    }

    fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "Timed out waiting for {}", what);
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn start(
        name: &str,
        driver: MockDriver,
        renderer: MockRenderer,
        arbiter: Arc<ContextArbiter>,
    ) -> RenderThread<MockDriver, MockRenderer> {
        RenderThreadBuilder::new(name)
            .render_mode(RenderMode::WhenDirty)
            .spawn(driver, renderer, arbiter)
            .unwrap()
    }

    #[test]
    fn test_first_frame_after_surface_and_size() {
        let driver = MockDriver::default();
        let renderer = MockRenderer::default();
        let thread = start("first-frame", driver.clone(), renderer.clone(), ContextArbiter::new(true));

        wait_until("waiting for surface", || {
            thread.state() == RenderState::WaitingForSurface
        });

        thread.surface_created(());
        thread.on_window_resize(4, 3);

        wait_until("first frame", || !driver.log.lock().unwrap().presented.is_empty());
        assert_eq!(thread.state(), RenderState::Ready);

        assert_eq!(driver.log.lock().unwrap().contexts_with_window, 1);
        let calls = renderer.calls.lock().unwrap().clone();
        assert_eq!(calls[0], "created 1");
        assert_eq!(calls[1], "changed 4x3");
        assert_eq!(calls[2], "draw 4x3 value=0");
        assert_eq!(driver.log.lock().unwrap().surfaces_created, vec![(4, 3)]);
    }

    #[test]
    fn test_resize_waits_for_frame_at_new_size() {
        let driver = MockDriver::default();
        let thread = start("resize", driver.clone(), MockRenderer::default(), ContextArbiter::new(true));

        thread.surface_created(());
        thread.on_window_resize(4, 4);
        wait_until("first frame", || !driver.log.lock().unwrap().presented.is_empty());

        thread.on_window_resize(8, 6);
        let last = driver.log.lock().unwrap().presented.last().copied();
        assert_eq!(last, Some((8, 6)));
    }

    #[test]
    fn test_back_to_back_resizes_each_present_new_size() {
        let driver = MockDriver::default();
        let renderer = MockRenderer::default();
        let thread = start("resize-burst", driver.clone(), renderer.clone(), ContextArbiter::new(true));

        thread.surface_created(());
        thread.on_window_resize(4, 4);
        wait_until("first frame", || !driver.log.lock().unwrap().presented.is_empty());

        for step in 1..=50u32 {
            let size = (4 + step % 7, 3 + step % 5);
            thread.on_window_resize(size.0, size.1);
            let last = driver.log.lock().unwrap().presented.last().copied();
            assert_eq!(last, Some(size), "resize {} returned early", step);
            // A frame request between resizes must not satisfy the next one
            thread.request_render();
        }

        let calls = renderer.calls.lock().unwrap().clone();
        assert!(calls.contains(&"changed 8x5".to_string()));
    }

    #[test]
    fn test_resize_without_surface_returns() {
        let driver = MockDriver::default();
        let thread = start("resize-early", driver.clone(), MockRenderer::default(), ContextArbiter::new(true));

        wait_until("waiting for surface", || {
            thread.state() == RenderState::WaitingForSurface
        });
        thread.on_window_resize(6, 6);
        assert!(driver.log.lock().unwrap().presented.is_empty());

        thread.surface_created(());
        wait_until("frame at requested size", || {
            driver.log.lock().unwrap().presented.last() == Some(&(6, 6))
        });
    }

    #[test]
    fn test_pause_resume_keeps_last_size() {
        let driver = MockDriver::default();
        let thread = start("pause", driver.clone(), MockRenderer::default(), ContextArbiter::new(true));

        thread.surface_created(());
        thread.on_window_resize(4, 4);
        wait_until("first frame", || !driver.log.lock().unwrap().presented.is_empty());
        thread.on_window_resize(10, 5);

        for _ in 0..3 {
            thread.on_pause();
            assert_eq!(thread.state(), RenderState::Paused);
            thread.on_resume();
        }

        let presented_before = driver.log.lock().unwrap().presented.len();
        thread.request_render();
        wait_until("frame after resume", || {
            driver.log.lock().unwrap().presented.len() > presented_before
        });
        let last = driver.log.lock().unwrap().presented.last().copied();
        assert_eq!(last, Some((10, 5)));
    }

    #[test]
    fn test_pause_releases_context_unless_preserved() {
        let driver = MockDriver::default();
        let renderer = MockRenderer::default();
        let thread = RenderThreadBuilder::new("preserve")
            .preserve_context_on_pause(true)
            .spawn(driver.clone(), renderer.clone(), ContextArbiter::new(true))
            .unwrap();

        thread.surface_created(());
        thread.on_window_resize(4, 4);
        wait_until("first frame", || !driver.log.lock().unwrap().presented.is_empty());

        thread.on_pause();
        thread.on_resume();
        assert_eq!(driver.log.lock().unwrap().contexts_destroyed, 0);

        thread.set_preserve_context_on_pause(false);
        thread.on_pause();
        assert_eq!(driver.log.lock().unwrap().contexts_destroyed, 1);
        assert!(renderer.calls.lock().unwrap().contains(&"released".to_string()));
    }

    #[test]
    fn test_events_run_before_draw() {
        let driver = MockDriver::default();
        let renderer = MockRenderer::default();
        let thread = start("events", driver.clone(), renderer.clone(), ContextArbiter::new(true));

        thread.surface_created(());
        thread.on_window_resize(2, 2);
        wait_until("first frame", || !driver.log.lock().unwrap().presented.is_empty());

        thread.queue_event(|r| r.value = 7).unwrap();
        thread.request_render();

        wait_until("second draw", || {
            renderer
                .calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.starts_with("draw"))
                .count()
                >= 2
        });
        let calls = renderer.calls.lock().unwrap();
        assert_eq!(calls.last().map(String::as_str), Some("draw 2x2 value=7"));
    }

    #[test]
    fn test_surface_bad_recreates_surface_only() {
        let driver = MockDriver::default();
        driver
            .present_script
            .lock()
            .unwrap()
            .push_back(SwapOutcome::SurfaceBad);
        let thread = start("surface-bad", driver.clone(), MockRenderer::default(), ContextArbiter::new(true));

        thread.surface_created(());
        thread.on_window_resize(4, 4);

        wait_until("recovered frame", || !driver.log.lock().unwrap().presented.is_empty());
        let log = driver.log.lock().unwrap();
        assert_eq!(log.contexts_created, 1);
        assert_eq!(log.surfaces_created.len(), 2);
        assert_eq!(log.surfaces_destroyed, 1);
        drop(log);
        assert_eq!(thread.state(), RenderState::Ready);
    }

    #[test]
    fn test_context_loss_rebuilds_everything() {
        let driver = MockDriver::default();
        driver
            .present_script
            .lock()
            .unwrap()
            .push_back(SwapOutcome::ContextLost);
        let renderer = MockRenderer::default();
        let thread = start("context-lost", driver.clone(), renderer.clone(), ContextArbiter::new(true));

        thread.surface_created(());
        thread.on_window_resize(4, 4);

        wait_until("frame on new context", || !driver.log.lock().unwrap().presented.is_empty());
        assert_eq!(driver.log.lock().unwrap().contexts_created, 2);
        assert_eq!(driver.log.lock().unwrap().contexts_destroyed, 1);

        let calls = renderer.calls.lock().unwrap();
        let released = calls.iter().position(|c| c == "released").unwrap();
        assert!(calls[released + 1..].contains(&"created 2".to_string()));
    }

    #[test]
    fn test_single_context_is_revoked_for_second_thread() {
        let arbiter = ContextArbiter::new(false);

        let driver_a = MockDriver::default();
        let renderer_a = MockRenderer::default();
        let thread_a = start("owner-a", driver_a.clone(), renderer_a.clone(), Arc::clone(&arbiter));
        thread_a.surface_created(());
        thread_a.on_window_resize(4, 4);
        wait_until("thread a frame", || !driver_a.log.lock().unwrap().presented.is_empty());
        assert_eq!(arbiter.owner(), Some(thread_a.id()));

        let driver_b = MockDriver::default();
        let thread_b = start("owner-b", driver_b.clone(), MockRenderer::default(), Arc::clone(&arbiter));
        thread_b.surface_created(());
        thread_b.on_window_resize(4, 4);

        wait_until("thread b frame", || !driver_b.log.lock().unwrap().presented.is_empty());
        assert_eq!(arbiter.owner(), Some(thread_b.id()));
        assert_eq!(driver_a.log.lock().unwrap().contexts_destroyed, 1);
        assert!(renderer_a.calls.lock().unwrap().contains(&"released".to_string()));
    }

    #[test]
    fn test_fatal_setup_error_stops_thread() {
        let driver = MockDriver {
            fail_context: true,
            ..Default::default()
        };
        let reported = Arc::new(AtomicBool::new(false));
        let reported_clone = Arc::clone(&reported);

        let thread = RenderThreadBuilder::new("fatal")
            .error_listener(move |e| {
                assert!(matches!(e, RenderError::Configuration(_)));
                reported_clone.store(true, Ordering::SeqCst);
            })
            .spawn(driver, MockRenderer::default(), ContextArbiter::new(true))
            .unwrap();

        thread.surface_created(());
        thread.on_window_resize(4, 4);

        wait_until("thread exit", || !thread.is_running());
        assert!(reported.load(Ordering::SeqCst));
        assert_eq!(thread.state(), RenderState::Exiting);
        assert!(matches!(
            thread.queue_event(|_| {}),
            Err(RenderError::ThreadExited)
        ));
    }

    #[test]
    fn test_surface_destroyed_then_exit() {
        let driver = MockDriver::default();
        let mut thread = start("destroy", driver.clone(), MockRenderer::default(), ContextArbiter::new(true));

        thread.surface_created(());
        thread.on_window_resize(4, 4);
        wait_until("first frame", || !driver.log.lock().unwrap().presented.is_empty());

        thread.surface_destroyed();
        assert_eq!(thread.state(), RenderState::WaitingForSurface);
        assert_eq!(driver.log.lock().unwrap().surfaces_destroyed, 1);

        thread.request_exit_and_wait();
        assert!(!thread.is_running());
        assert_eq!(thread.state(), RenderState::Exiting);
        assert_eq!(driver.log.lock().unwrap().contexts_destroyed, 1);
    }
}
