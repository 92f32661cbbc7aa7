// SPDX-License-Identifier: GPL-3.0-only

//! GPU device creation and the graphics drivers used by the render thread.
//!
//! A [`GpuContext`] is the wgpu equivalent of a graphics context: adapter,
//! device and queue, plus a flag raised by the device-lost callback. It is
//! created and destroyed by a [`GraphicsDriver`] on the render thread.

mod driver;
mod headless;
mod readback;
mod wgpu_driver;

pub use driver::{FrameTarget, GraphicsDriver, SwapOutcome};
pub use headless::{HeadlessDriver, HeadlessFrame, HeadlessSurface, HeadlessWindow};
pub use readback::{padded_bytes_per_row, read_buffer_async, read_texture};
pub use wgpu_driver::{SurfaceFrame, WgpuDriver, WgpuSurface};

use crate::errors::{RenderError, RenderResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// What a render thread learned about its adapter
#[derive(Debug, Clone)]
pub struct GpuDeviceInfo {
    /// Adapter name as reported by the driver
    pub adapter_name: String,
    /// Graphics API the device runs on
    pub backend: wgpu::Backend,
    /// Largest 2D texture side the device accepts
    pub max_texture_size: u32,
}

/// Device, queue and loss state owned by one render thread
pub struct GpuContext {
    pub adapter: wgpu::Adapter,
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub info: GpuDeviceInfo,
    lost: Arc<AtomicBool>,
}

impl GpuContext {
    /// Largest 2D texture side, the equivalent of GL_MAX_TEXTURE_SIZE
    pub fn max_texture_size(&self) -> u32 {
        self.info.max_texture_size
    }

    /// Whether the device-lost callback has fired
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Mark the context lost (used when a driver call reports loss directly)
    pub fn mark_lost(&self) {
        self.lost.store(true, Ordering::SeqCst);
    }

    /// Run `f` inside validation and out-of-memory error scopes.
    ///
    /// Returns the first captured error, if any. This is how allocations are
    /// checked for completeness before being handed out.
    pub fn scoped<T>(&self, f: impl FnOnce(&wgpu::Device) -> T) -> (T, Option<wgpu::Error>) {
        with_error_scope(&self.device, f)
    }
}

/// [`GpuContext::scoped`] for holders of a bare device handle
pub fn with_error_scope<T>(
    device: &wgpu::Device,
    f: impl FnOnce(&wgpu::Device) -> T,
) -> (T, Option<wgpu::Error>) {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = f(device);
    let validation = pollster::block_on(device.pop_error_scope());
    let oom = pollster::block_on(device.pop_error_scope());
    (value, validation.or(oom))
}

impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext")
            .field("info", &self.info)
            .field("lost", &self.is_lost())
            .finish()
    }
}

/// Create a wgpu device and queue for rendering.
///
/// # Arguments
///
/// * `instance` - The wgpu instance to pick an adapter from
/// * `label` - Device label shown in validation errors
/// * `power` - Adapter power preference
/// * `compatible_surface` - Surface the adapter must be able to present to
pub async fn create_render_device(
    instance: &wgpu::Instance,
    label: &str,
    power: wgpu::PowerPreference,
    compatible_surface: Option<&wgpu::Surface<'_>>,
) -> RenderResult<GpuContext> {
    info!(label = label, "Creating GPU device for rendering");

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: power,
            compatible_surface,
            force_fallback_adapter: false,
        })
        .await
        .map_err(|e| RenderError::Configuration(format!("No suitable GPU adapter: {}", e)))?;

    let adapter_info = adapter.get_info();
    let adapter_limits = adapter.limits();

    info!(
        adapter = %adapter_info.name,
        backend = ?adapter_info.backend,
        max_texture_size = adapter_limits.max_texture_dimension_2d,
        "GPU adapter selected for rendering"
    );

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some(label),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::downlevel_defaults().using_resolution(adapter_limits),
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        })
        .await
        .map_err(|e| RenderError::Configuration(format!("Failed to create GPU device: {}", e)))?;

    let lost = Arc::new(AtomicBool::new(false));
    let lost_flag = Arc::clone(&lost);
    let device_label = label.to_string();
    device.set_device_lost_callback(move |reason, message| {
        warn!(label = %device_label, ?reason, %message, "GPU device lost");
        lost_flag.store(true, Ordering::SeqCst);
    });

    let info = GpuDeviceInfo {
        adapter_name: adapter_info.name.clone(),
        backend: adapter_info.backend,
        max_texture_size: device.limits().max_texture_dimension_2d,
    };

    debug!(?info, "GPU device ready");

    Ok(GpuContext {
        adapter,
        device: Arc::new(device),
        queue: Arc::new(queue),
        info,
        lost,
    })
}

/// Create a device without a surface, for offscreen rendering and tools
pub async fn create_headless_context(label: &str) -> RenderResult<GpuContext> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    create_render_device(&instance, label, wgpu::PowerPreference::LowPower, None).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_headless_context() {
        match create_headless_context("test_device").await {
            Ok(context) => {
                println!("Created device: {:?}", context.info);
                assert!(context.max_texture_size() > 0);
                assert!(!context.is_lost());
            }
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
            }
        }
    }

    #[tokio::test]
    async fn test_error_scope_reports_oversized_texture() {
        let context = match create_headless_context("scope_test").await {
            Ok(c) => c,
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                return;
            }
        };

        let too_big = context.max_texture_size() + 1;
        let (_texture, error) = context.scoped(|device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some("oversized"),
                size: wgpu::Extent3d {
                    width: too_big,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            })
        });
        assert!(error.is_some());
    }
}
