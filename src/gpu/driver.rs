// SPDX-License-Identifier: GPL-3.0-only

//! The seam between the render thread and the platform graphics stack

use crate::errors::RenderResult;

/// Result of presenting (or trying to acquire) a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOutcome {
    /// Frame reached the surface
    Presented,
    /// The surface is unusable; recreate it and keep the context
    SurfaceBad,
    /// The context is gone; everything must be rebuilt
    ContextLost,
}

/// Platform graphics operations needed by the render thread.
///
/// A driver is moved onto the render thread and every method is called from
/// there, so contexts, surfaces and frames never cross threads. Only the
/// window handle is produced elsewhere.
pub trait GraphicsDriver: Send + 'static {
    /// Native window a surface is bound to
    type Window: Send + 'static;
    /// Graphics context (device + queue)
    type Context;
    /// Presentable surface bound to a window
    type Surface;
    /// One acquired swap-chain image
    type Frame;

    /// Create a context able to present to `window`, when one is known
    fn create_context(&mut self, window: Option<&Self::Window>) -> RenderResult<Self::Context>;

    fn destroy_context(&mut self, context: Self::Context);

    /// Create (or recreate) the surface at the given size.
    fn create_surface(
        &mut self,
        context: &Self::Context,
        window: &Self::Window,
        width: u32,
        height: u32,
    ) -> RenderResult<Self::Surface>;

    fn destroy_surface(&mut self, context: &Self::Context, surface: Self::Surface);

    /// Acquire the next image to draw into.
    ///
    /// Failure is reported as the swap outcome the loop must react to.
    fn acquire_frame(
        &mut self,
        context: &Self::Context,
        surface: &mut Self::Surface,
    ) -> Result<Self::Frame, SwapOutcome>;

    /// Present a drawn frame.
    fn present(
        &mut self,
        context: &Self::Context,
        surface: &mut Self::Surface,
        frame: Self::Frame,
    ) -> SwapOutcome;
}

/// Anything a render pass can target on screen
pub trait FrameTarget {
    fn view(&self) -> &wgpu::TextureView;
    fn format(&self) -> wgpu::TextureFormat;
    fn size(&self) -> (u32, u32);
}
