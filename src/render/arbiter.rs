// SPDX-License-Identifier: GPL-3.0-only

//! Context ownership arbiter
//!
//! Every render thread sharing an arbiter keeps its lifecycle flags inside the
//! arbiter's monitor, so a single lock orders all handshakes and ownership
//! changes. When only one context may be alive at a time, a thread that
//! cannot acquire asks the current owner to release and waits to be woken.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::constants::RenderMode;

/// Identifier of a render thread registered with an arbiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderThreadId(u64);

/// Lifecycle flags of one render thread, guarded by the arbiter monitor
#[derive(Debug, Clone)]
pub(crate) struct ThreadState {
    pub should_exit: bool,
    pub exited: bool,
    pub request_paused: bool,
    pub paused: bool,
    pub has_surface: bool,
    pub surface_is_bad: bool,
    pub waiting_for_surface: bool,
    pub have_context: bool,
    pub have_fb_surface: bool,
    pub finished_creating_surface: bool,
    pub should_release_context: bool,
    pub width: u32,
    pub height: u32,
    pub render_mode: RenderMode,
    pub request_render: bool,
    pub render_complete: bool,
    pub size_changed: bool,
    /// Bumped by every resize request
    pub resize_seq: u64,
    /// Newest resize a frame has been presented for
    pub presented_seq: u64,
    pub preserve_context_on_pause: bool,
}

impl ThreadState {
    fn new(render_mode: RenderMode, preserve_context_on_pause: bool) -> Self {
        Self {
            should_exit: false,
            exited: false,
            request_paused: false,
            paused: false,
            has_surface: false,
            surface_is_bad: false,
            waiting_for_surface: false,
            have_context: false,
            have_fb_surface: false,
            finished_creating_surface: false,
            should_release_context: false,
            width: 0,
            height: 0,
            render_mode,
            request_render: true,
            render_complete: false,
            size_changed: true,
            resize_seq: 0,
            presented_seq: 0,
            preserve_context_on_pause,
        }
    }

    pub fn ready_to_draw(&self) -> bool {
        !self.paused
            && self.has_surface
            && !self.surface_is_bad
            && self.width > 0
            && self.height > 0
            && (self.request_render || self.render_mode == RenderMode::Continuous)
    }

    pub fn able_to_draw(&self) -> bool {
        self.have_context && self.have_fb_surface && self.ready_to_draw()
    }

    /// Whether a resize can expect a frame, whether or not one is requested
    pub fn can_present(&self) -> bool {
        self.have_context
            && self.have_fb_surface
            && !self.paused
            && self.has_surface
            && !self.surface_is_bad
            && self.width > 0
            && self.height > 0
    }
}

/// Monitor contents
pub(crate) struct Monitor {
    threads: HashMap<RenderThreadId, ThreadState>,
    owner: Option<RenderThreadId>,
    multiple_contexts_allowed: bool,
}

impl Monitor {
    /// Flags of a registered thread.
    ///
    /// Threads stay registered until their handle is dropped, so a missing
    /// entry is an internal bug; a fresh exited state is returned in that case
    /// so callers stop waiting.
    pub fn thread(&mut self, id: RenderThreadId) -> &mut ThreadState {
        self.threads.entry(id).or_insert_with(|| {
            let mut state = ThreadState::new(RenderMode::WhenDirty, false);
            state.exited = true;
            state
        })
    }

    /// Try to take the context for `id`.
    ///
    /// With a single allowed context and another owner, the owner is asked to
    /// release and `false` is returned; the caller retries when woken.
    pub fn try_acquire_context(&mut self, id: RenderThreadId) -> bool {
        if self.multiple_contexts_allowed {
            return true;
        }
        match self.owner {
            None => {
                self.owner = Some(id);
                true
            }
            Some(owner) if owner == id => true,
            Some(owner) => {
                debug!(?owner, requester = ?id, "Asking context owner to release");
                self.thread(owner).should_release_context = true;
                false
            }
        }
    }

    pub fn release_context(&mut self, id: RenderThreadId) {
        if self.owner == Some(id) {
            self.owner = None;
        }
    }

    pub fn thread_exiting(&mut self, id: RenderThreadId) {
        debug!(?id, "Render thread exiting");
        self.thread(id).exited = true;
        self.release_context(id);
    }

    /// Whether a pausing thread must give its context up even when asked to
    /// preserve it
    pub fn should_release_when_pausing(&self) -> bool {
        !self.multiple_contexts_allowed
    }
}

/// Brokers graphics contexts between render threads
pub struct ContextArbiter {
    monitor: Mutex<Monitor>,
    condvar: Condvar,
    next_id: Mutex<u64>,
}

impl ContextArbiter {
    /// Create an arbiter.
    ///
    /// # Arguments
    ///
    /// * `multiple_contexts_allowed` - false on platforms where only one
    ///   context may be alive at a time
    pub fn new(multiple_contexts_allowed: bool) -> Arc<Self> {
        info!(multiple_contexts_allowed, "Creating context arbiter");
        Arc::new(Self {
            monitor: Mutex::new(Monitor {
                threads: HashMap::new(),
                owner: None,
                multiple_contexts_allowed,
            }),
            condvar: Condvar::new(),
            next_id: Mutex::new(0),
        })
    }

    pub fn multiple_contexts_allowed(&self) -> bool {
        self.lock().multiple_contexts_allowed
    }

    /// Thread currently holding the single context, if limited
    pub fn owner(&self) -> Option<RenderThreadId> {
        self.lock().owner
    }

    pub(crate) fn register(
        &self,
        render_mode: RenderMode,
        preserve_context_on_pause: bool,
    ) -> RenderThreadId {
        let id = {
            let mut next = self.next_id.lock().unwrap_or_else(|e| e.into_inner());
            *next += 1;
            RenderThreadId(*next)
        };
        self.lock().threads.insert(
            id,
            ThreadState::new(render_mode, preserve_context_on_pause),
        );
        id
    }

    pub(crate) fn unregister(&self, id: RenderThreadId) {
        let mut monitor = self.lock();
        monitor.release_context(id);
        monitor.threads.remove(&id);
        drop(monitor);
        self.notify_all();
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Monitor> {
        self.monitor.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn wait<'a>(&self, guard: MutexGuard<'a, Monitor>) -> MutexGuard<'a, Monitor> {
        self.condvar.wait(guard).unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn notify_all(&self) {
        self.condvar.notify_all();
    }
}

impl std::fmt::Debug for ContextArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let monitor = self.lock();
        f.debug_struct("ContextArbiter")
            .field("owner", &monitor.owner)
            .field("threads", &monitor.threads.len())
            .field("multiple_contexts_allowed", &monitor.multiple_contexts_allowed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_context_ownership() {
        let arbiter = ContextArbiter::new(false);
        let a = arbiter.register(RenderMode::WhenDirty, false);
        let b = arbiter.register(RenderMode::WhenDirty, false);

        let mut monitor = arbiter.lock();
        assert!(monitor.try_acquire_context(a));
        assert!(monitor.try_acquire_context(a));
        assert!(!monitor.try_acquire_context(b));
        assert!(monitor.thread(a).should_release_context);

        monitor.release_context(a);
        assert!(monitor.try_acquire_context(b));
        drop(monitor);
        assert_eq!(arbiter.owner(), Some(b));
    }

    #[test]
    fn test_multiple_contexts_never_revoke() {
        let arbiter = ContextArbiter::new(true);
        let a = arbiter.register(RenderMode::WhenDirty, false);
        let b = arbiter.register(RenderMode::WhenDirty, false);

        let mut monitor = arbiter.lock();
        assert!(monitor.try_acquire_context(a));
        assert!(monitor.try_acquire_context(b));
        assert!(!monitor.thread(a).should_release_context);
        assert!(!monitor.should_release_when_pausing());
    }

    #[test]
    fn test_exit_releases_ownership() {
        let arbiter = ContextArbiter::new(false);
        let a = arbiter.register(RenderMode::WhenDirty, false);
        {
            let mut monitor = arbiter.lock();
            assert!(monitor.try_acquire_context(a));
            monitor.thread_exiting(a);
            assert!(monitor.thread(a).exited);
        }
        assert_eq!(arbiter.owner(), None);
    }

    #[test]
    fn test_ready_to_draw_requires_size_and_surface() {
        let mut state = ThreadState::new(RenderMode::WhenDirty, false);
        assert!(!state.ready_to_draw());
        state.has_surface = true;
        assert!(!state.ready_to_draw());
        state.width = 4;
        state.height = 4;
        assert!(state.ready_to_draw());
        state.request_render = false;
        assert!(!state.ready_to_draw());
        state.render_mode = RenderMode::Continuous;
        assert!(state.ready_to_draw());
        state.paused = true;
        assert!(!state.ready_to_draw());
    }
}
