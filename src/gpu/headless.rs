// SPDX-License-Identifier: GPL-3.0-only

//! Offscreen driver: the "surface" is a plain texture.
//!
//! Used by the command line tool and by tests that need a real device but
//! no window system.

use super::driver::{FrameTarget, GraphicsDriver, SwapOutcome};
use super::{GpuContext, create_render_device};
use crate::config::Config;
use crate::errors::{RenderError, RenderResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Stand-in for a native window; records what was presented to it
#[derive(Debug, Clone, Default)]
pub struct HeadlessWindow {
    presented: Arc<AtomicU64>,
    last_size: Arc<Mutex<(u32, u32)>>,
}

impl HeadlessWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames presented so far
    pub fn presented_frames(&self) -> u64 {
        self.presented.load(Ordering::SeqCst)
    }

    /// Size of the most recently presented frame
    pub fn last_size(&self) -> (u32, u32) {
        *self.last_size.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Offscreen texture standing in for a swap chain
pub struct HeadlessSurface {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    window: HeadlessWindow,
    width: u32,
    height: u32,
}

impl HeadlessSurface {
    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }
}

/// Frame drawn into a [`HeadlessSurface`]
pub struct HeadlessFrame {
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl FrameTarget for HeadlessFrame {
    fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    fn format(&self) -> wgpu::TextureFormat {
        HeadlessDriver::SURFACE_FORMAT
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Driver without a window system
pub struct HeadlessDriver {
    instance: wgpu::Instance,
    power: wgpu::PowerPreference,
    label: String,
}

impl HeadlessDriver {
    pub const SURFACE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

    pub fn new(label: &str, config: &Config) -> Self {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: config.backend.backends(),
            ..Default::default()
        });
        Self {
            instance,
            power: config.power_preference.to_wgpu(),
            label: label.to_string(),
        }
    }
}

impl GraphicsDriver for HeadlessDriver {
    type Window = HeadlessWindow;
    type Context = GpuContext;
    type Surface = HeadlessSurface;
    type Frame = HeadlessFrame;

    fn create_context(&mut self, _window: Option<&HeadlessWindow>) -> RenderResult<GpuContext> {
        pollster::block_on(create_render_device(
            &self.instance,
            &self.label,
            self.power,
            None,
        ))
    }

    fn destroy_context(&mut self, context: GpuContext) {
        debug!(label = %self.label, "Destroying headless GPU context");
        drop(context);
    }

    fn create_surface(
        &mut self,
        context: &GpuContext,
        window: &HeadlessWindow,
        width: u32,
        height: u32,
    ) -> RenderResult<HeadlessSurface> {
        let (texture, error) = context.scoped(|device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some("headless_surface"),
                size: wgpu::Extent3d {
                    width: width.max(1),
                    height: height.max(1),
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: Self::SURFACE_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            })
        });
        if let Some(e) = error {
            texture.destroy();
            return Err(RenderError::TransientDriver(format!(
                "Headless surface allocation failed: {}",
                e
            )));
        }
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        debug!(width, height, "Headless surface created");
        Ok(HeadlessSurface {
            texture,
            view,
            window: window.clone(),
            width,
            height,
        })
    }

    fn destroy_surface(&mut self, _context: &GpuContext, surface: HeadlessSurface) {
        surface.texture.destroy();
    }

    fn acquire_frame(
        &mut self,
        context: &GpuContext,
        surface: &mut HeadlessSurface,
    ) -> Result<HeadlessFrame, SwapOutcome> {
        if context.is_lost() {
            return Err(SwapOutcome::ContextLost);
        }
        Ok(HeadlessFrame {
            view: surface.view.clone(),
            width: surface.width,
            height: surface.height,
        })
    }

    fn present(
        &mut self,
        context: &GpuContext,
        surface: &mut HeadlessSurface,
        frame: HeadlessFrame,
    ) -> SwapOutcome {
        if context.is_lost() {
            return SwapOutcome::ContextLost;
        }
        let _ = context.device.poll(wgpu::PollType::Poll);
        surface.window.presented.fetch_add(1, Ordering::SeqCst);
        *surface
            .window
            .last_size
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = (frame.width, frame.height);
        SwapOutcome::Presented
    }
}
