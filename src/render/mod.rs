// SPDX-License-Identifier: GPL-3.0-only

//! Render thread, renderer callbacks and context arbitration

mod arbiter;
mod renderer;
mod thread;

pub use arbiter::{ContextArbiter, RenderThreadId};
pub use renderer::Renderer;
pub use thread::{
    ErrorListener, RenderEvent, RenderHandle, RenderState, RenderThread, RenderThreadBuilder,
};
