// SPDX-License-Identifier: GPL-3.0-only

use crate::errors::RenderResult;

/// Callbacks invoked on the render thread.
///
/// `C` is the graphics context type and `F` the acquired frame type of the
/// driver running the thread. Every callback runs on the render thread, which
/// is the only thread allowed to touch GPU state.
pub trait Renderer<C, F>: Send + 'static {
    /// A new context exists. Every GPU object from a previous context is gone
    /// and must be rebuilt here.
    fn on_surface_created(&mut self, context: &C) -> RenderResult<()>;

    /// The surface was (re)created at a new size.
    fn on_surface_changed(&mut self, context: &C, width: u32, height: u32) -> RenderResult<()>;

    /// Draw one frame into `frame`.
    fn on_draw_frame(&mut self, context: &C, frame: &F) -> RenderResult<()>;

    /// The context is about to be destroyed (pause, revocation, loss or
    /// exit). Drop cached GPU handles.
    fn on_context_released(&mut self) {}
}
