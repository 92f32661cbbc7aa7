// SPDX-License-Identifier: GPL-3.0-only
//! Ordered chain of stages

use super::program::{Effect, ProgramStage};
use super::{RenderTarget, ShaderStage};
use crate::constants::FboFormat;
use crate::errors::{RenderError, RenderResult};
use crate::fbo::FramebufferObject;
use crate::gpu::GpuContext;
use tracing::debug;

/// Runs stages in order; every stage but the last draws into its own FBO
/// and the last draws into the caller's target.
///
/// The pipeline only composes stages. It is not a stage itself.
pub struct ShaderPipeline {
    stages: Vec<Box<dyn ShaderStage>>,
    /// One FBO per non-terminal stage
    framebuffers: Vec<FramebufferObject>,
    fbo_format: FboFormat,
    frame_size: Option<(u32, u32)>,
    set_up: bool,
}

impl ShaderPipeline {
    pub fn new(stages: Vec<Box<dyn ShaderStage>>, fbo_format: FboFormat) -> Self {
        Self {
            stages,
            framebuffers: Vec::new(),
            fbo_format,
            frame_size: None,
            set_up: false,
        }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Append a stage. Takes effect at the next setup.
    pub fn push(&mut self, stage: Box<dyn ShaderStage>) {
        self.stages.push(stage);
    }

    pub fn labels(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.label()).collect()
    }

    pub fn stage_mut(&mut self, index: usize) -> Option<&mut (dyn ShaderStage + 'static)> {
        self.stages.get_mut(index).map(|s| s.as_mut())
    }

    /// The effect of stage `index`, if that stage is a `ProgramStage<E>`
    pub fn effect_mut<E: Effect>(&mut self, index: usize) -> Option<&mut E> {
        self.stages
            .get_mut(index)?
            .as_any_mut()
            .downcast_mut::<ProgramStage<E>>()
            .map(|stage| stage.effect_mut())
    }

    /// Set up every stage in order and allocate the intermediate FBOs.
    ///
    /// FBOs are sized once a frame size is known.
    pub fn setup(&mut self, gpu: &GpuContext) -> RenderResult<()> {
        if self.stages.is_empty() {
            return Err(RenderError::Configuration(
                "Shader pipeline has no stages".to_string(),
            ));
        }
        self.release();
        for stage in &mut self.stages {
            stage.setup(gpu)?;
        }
        self.framebuffers = (1..self.stages.len())
            .map(|_| FramebufferObject::new(self.fbo_format))
            .collect();
        self.set_up = true;
        if let Some((width, height)) = self.frame_size {
            self.allocate_framebuffers(gpu, width, height)?;
        }
        debug!(stages = self.stages.len(), "Shader pipeline set up");
        Ok(())
    }

    /// Forward the frame size to every stage and reallocate the FBOs at it
    pub fn set_frame_size(&mut self, gpu: &GpuContext, width: u32, height: u32) -> RenderResult<()> {
        self.frame_size = Some((width, height));
        for stage in &mut self.stages {
            stage.set_frame_size(width, height);
        }
        if self.set_up {
            self.allocate_framebuffers(gpu, width, height)?;
        }
        Ok(())
    }

    pub fn frame_size(&self) -> Option<(u32, u32)> {
        self.frame_size
    }

    fn allocate_framebuffers(&mut self, gpu: &GpuContext, width: u32, height: u32) -> RenderResult<()> {
        for fbo in &mut self.framebuffers {
            fbo.setup(gpu, width, height)?;
        }
        Ok(())
    }

    /// Record every stage. `input` feeds the first stage and the last one
    /// draws into `target`.
    pub fn draw(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        input: &wgpu::TextureView,
        target: &RenderTarget<'_>,
    ) -> RenderResult<()> {
        let Some((last, intermediate)) = self.stages.split_last_mut() else {
            return Err(RenderError::Configuration(
                "Shader pipeline has no stages".to_string(),
            ));
        };
        if !self.set_up || self.framebuffers.len() != intermediate.len() {
            return Err(RenderError::Configuration(
                "Shader pipeline drawn before setup".to_string(),
            ));
        }

        let mut current = input.clone();
        for (stage, fbo) in intermediate.iter_mut().zip(&self.framebuffers) {
            let fbo_target = fbo.enable()?;
            stage.draw(encoder, &current, &fbo_target)?;
            current = fbo_target.color.clone();
        }
        last.draw(encoder, &current, target)
    }

    /// Release every stage and FBO
    pub fn release(&mut self) {
        for stage in &mut self.stages {
            stage.release();
        }
        for fbo in &mut self.framebuffers {
            fbo.release();
        }
        self.framebuffers.clear();
        self.set_up = false;
    }

    pub fn is_set_up(&self) -> bool {
        self.set_up && self.stages.iter().all(|s| s.is_set_up())
    }
}

impl std::fmt::Debug for ShaderPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderPipeline")
            .field("stages", &self.labels())
            .field("framebuffers", &self.framebuffers)
            .field("frame_size", &self.frame_size)
            .finish()
    }
}
