// SPDX-License-Identifier: GPL-3.0-only
//! Shader stages and the stage pipeline
//!
//! A stage samples one input texture and draws a full-screen quad into a
//! [`RenderTarget`]. Stages are chained by a [`ShaderPipeline`], which gives
//! every stage but the last its own framebuffer object.
//!
//! All stage modules share `wgsl/stage_header.wgsl`: binding 0 is the input
//! texture, 1 the sampler, 2 the stage's uniform struct and 3 an optional
//! second texture for two-input stages.

pub mod effects;
mod pipeline;
mod program;
mod uniforms;

pub use pipeline::ShaderPipeline;
pub use program::{Effect, Passthrough, ProgramStage, QUAD_VERTICES};
pub use uniforms::{UniformBlock, UniformField, UniformKind};

use crate::constants::CLEAR_COLOR;
use crate::errors::RenderResult;
use crate::gpu::GpuContext;
use std::any::Any;

/// Declarations shared by every stage module
pub const STAGE_HEADER: &str = include_str!("wgsl/stage_header.wgsl");

/// Pass-through vertex shader
pub const DEFAULT_VERTEX_SHADER: &str = include_str!("wgsl/vertex.wgsl");

/// Pass-through fragment shader
pub const DEFAULT_FRAGMENT_SHADER: &str = include_str!("wgsl/passthrough.wgsl");

/// Where a stage draws
#[derive(Debug, Clone, Copy)]
pub struct RenderTarget<'a> {
    pub color: &'a wgpu::TextureView,
    pub depth: Option<&'a wgpu::TextureView>,
    pub format: wgpu::TextureFormat,
    pub depth_format: Option<wgpu::TextureFormat>,
    pub width: u32,
    pub height: u32,
    /// Offscreen targets keep images bottom-up and need the quad flipped
    pub flip_y: bool,
    /// Clear color, or `None` to draw over the existing contents
    pub clear: Option<wgpu::Color>,
}

impl<'a> RenderTarget<'a> {
    /// The presentable surface
    pub fn screen(
        color: &'a wgpu::TextureView,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            color,
            depth: None,
            format,
            depth_format: None,
            width,
            height,
            flip_y: false,
            clear: Some(CLEAR_COLOR),
        }
    }
}

/// A drawable stage
pub trait ShaderStage: Send {
    fn label(&self) -> &'static str;

    /// Compile and link. Any previously created objects are released first,
    /// so this is also the rebuild path after a context loss.
    fn setup(&mut self, gpu: &GpuContext) -> RenderResult<()>;

    /// Notify the stage of the frame size it will draw at
    fn set_frame_size(&mut self, width: u32, height: u32);

    /// Record a draw of `input` into `target`
    fn draw(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        input: &wgpu::TextureView,
        target: &RenderTarget<'_>,
    ) -> RenderResult<()>;

    fn release(&mut self);

    fn is_set_up(&self) -> bool;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_stage_validates() {
        validation::validate_effect(&Passthrough);
    }
}
