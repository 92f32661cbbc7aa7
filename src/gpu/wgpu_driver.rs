// SPDX-License-Identifier: GPL-3.0-only

//! Window-backed driver presenting through a wgpu surface

use super::driver::{FrameTarget, GraphicsDriver, SwapOutcome};
use super::{GpuContext, create_render_device};
use crate::config::Config;
use crate::errors::{RenderError, RenderResult};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Configured surface plus the settings it was configured with
pub struct WgpuSurface {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
}

impl WgpuSurface {
    pub fn format(&self) -> wgpu::TextureFormat {
        self.config.format
    }
}

/// Acquired swap-chain image
pub struct SurfaceFrame {
    texture: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
}

impl FrameTarget for SurfaceFrame {
    fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Driver for on-screen rendering into a native window
pub struct WgpuDriver {
    instance: wgpu::Instance,
    power: wgpu::PowerPreference,
    label: String,
    /// Surface made while picking the adapter, handed to the next `create_surface`
    adapter_surface: Option<wgpu::Surface<'static>>,
}

impl WgpuDriver {
    pub fn new(label: &str, config: &Config) -> Self {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: config.backend.backends(),
            ..Default::default()
        });
        Self {
            instance,
            power: config.power_preference.to_wgpu(),
            label: label.to_string(),
            adapter_surface: None,
        }
    }

    fn new_surface(&self, window: &Arc<dyn wgpu::WindowHandle>) -> RenderResult<wgpu::Surface<'static>> {
        self.instance
            .create_surface(Arc::clone(window))
            .map_err(|e| RenderError::TransientDriver(format!("Cannot create surface: {}", e)))
    }

    /// Pick a linear 8-bit format when the surface offers one
    fn choose_format(caps: &wgpu::SurfaceCapabilities) -> Option<wgpu::TextureFormat> {
        caps.formats
            .iter()
            .copied()
            .find(|f| {
                matches!(
                    f,
                    wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Rgba8Unorm
                )
            })
            .or_else(|| caps.formats.first().copied())
    }
}

impl GraphicsDriver for WgpuDriver {
    type Window = Arc<dyn wgpu::WindowHandle>;
    type Context = GpuContext;
    type Surface = WgpuSurface;
    type Frame = SurfaceFrame;

    fn create_context(&mut self, window: Option<&Self::Window>) -> RenderResult<GpuContext> {
        // The adapter must be able to present to the window
        let surface = window.map(|w| self.new_surface(w)).transpose()?;
        let context = pollster::block_on(create_render_device(
            &self.instance,
            &self.label,
            self.power,
            surface.as_ref(),
        ))?;
        self.adapter_surface = surface;
        Ok(context)
    }

    fn destroy_context(&mut self, context: GpuContext) {
        debug!(label = %self.label, "Destroying GPU context");
        self.adapter_surface = None;
        context.device.destroy();
    }

    fn create_surface(
        &mut self,
        context: &GpuContext,
        window: &Self::Window,
        width: u32,
        height: u32,
    ) -> RenderResult<WgpuSurface> {
        let surface = match self.adapter_surface.take() {
            Some(surface) => surface,
            None => self.new_surface(window)?,
        };

        if !context.adapter.is_surface_supported(&surface) {
            return Err(RenderError::Configuration(
                "Adapter cannot present to this window".to_string(),
            ));
        }

        let caps = surface.get_capabilities(&context.adapter);
        let format = Self::choose_format(&caps).ok_or_else(|| {
            RenderError::Configuration("Surface reports no texture formats".to_string())
        })?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: width.max(1),
            height: height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            desired_maximum_frame_latency: 2,
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
        };

        let (_, error) = context.scoped(|device| surface.configure(device, &config));
        if let Some(e) = error {
            return Err(RenderError::TransientDriver(format!(
                "Surface configuration failed: {}",
                e
            )));
        }

        info!(width, height, ?format, "Window surface configured");
        Ok(WgpuSurface { surface, config })
    }

    fn destroy_surface(&mut self, _context: &GpuContext, surface: WgpuSurface) {
        debug!(
            width = surface.config.width,
            height = surface.config.height,
            "Destroying window surface"
        );
        drop(surface);
    }

    fn acquire_frame(
        &mut self,
        context: &GpuContext,
        surface: &mut WgpuSurface,
    ) -> Result<SurfaceFrame, SwapOutcome> {
        if context.is_lost() {
            return Err(SwapOutcome::ContextLost);
        }

        match surface.surface.get_current_texture() {
            Ok(texture) => {
                let view = texture
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default());
                Ok(SurfaceFrame {
                    texture,
                    view,
                    format: surface.config.format,
                    width: surface.config.width,
                    height: surface.config.height,
                })
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                warn!("Surface acquire ran out of memory");
                context.mark_lost();
                Err(SwapOutcome::ContextLost)
            }
            Err(e) => {
                debug!(error = %e, "Surface acquire failed");
                Err(SwapOutcome::SurfaceBad)
            }
        }
    }

    fn present(
        &mut self,
        context: &GpuContext,
        _surface: &mut WgpuSurface,
        frame: SurfaceFrame,
    ) -> SwapOutcome {
        frame.texture.present();
        if context.is_lost() {
            SwapOutcome::ContextLost
        } else {
            SwapOutcome::Presented
        }
    }
}
