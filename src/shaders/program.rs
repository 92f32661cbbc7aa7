// SPDX-License-Identifier: GPL-3.0-only
//! Program stage: one shader module drawing the shared quad

use super::uniforms::{UniformBlock, UniformField};
use super::{DEFAULT_FRAGMENT_SHADER, DEFAULT_VERTEX_SHADER, RenderTarget, STAGE_HEADER, ShaderStage};
use crate::errors::{RenderError, RenderResult};
use crate::frame_source::upload_image;
use crate::gpu::{GpuContext, with_error_scope};
use image::RgbaImage;
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, info};
use wgpu::util::DeviceExt;

/// Full-screen quad as a 4-vertex triangle strip: X, Y, Z, U, V.
///
/// Texture coordinates put v = 1 at the top of the quad.
pub const QUAD_VERTICES: [f32; 20] = [
    -1.0, 1.0, 0.0, 0.0, 1.0, //
    1.0, 1.0, 0.0, 1.0, 1.0, //
    -1.0, -1.0, 0.0, 0.0, 0.0, //
    1.0, -1.0, 0.0, 1.0, 0.0,
];

const QUAD_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x2];

const QUAD_STRIDE: wgpu::BufferAddress = 5 * std::mem::size_of::<f32>() as wgpu::BufferAddress;

/// What a [`ProgramStage`] draws.
///
/// The stage owns compilation, buffers and draw calls; an effect supplies
/// WGSL and fills its uniforms right before each draw.
pub trait Effect: Send + 'static {
    fn label(&self) -> &'static str;

    fn fragment_source(&self) -> &'static str;

    fn vertex_source(&self) -> &'static str {
        DEFAULT_VERTEX_SHADER
    }

    /// Fields of the struct bound at binding 2, in declaration order
    fn uniform_fields(&self) -> &'static [UniformField] {
        &[]
    }

    /// Whether the shader samples a second texture at binding 3
    fn uses_second_input(&self) -> bool {
        false
    }

    fn set_frame_size(&mut self, _width: u32, _height: u32) {}

    fn on_draw(&self, _uniforms: &mut UniformBlock) -> RenderResult<()> {
        Ok(())
    }
}

/// Copies its input unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Effect for Passthrough {
    fn label(&self) -> &'static str {
        "default"
    }

    fn fragment_source(&self) -> &'static str {
        DEFAULT_FRAGMENT_SHADER
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TargetKey {
    format: wgpu::TextureFormat,
    depth_format: Option<wgpu::TextureFormat>,
    flip_y: bool,
}

impl From<&RenderTarget<'_>> for TargetKey {
    fn from(target: &RenderTarget<'_>) -> Self {
        Self {
            format: target.format,
            depth_format: target.depth_format,
            flip_y: target.flip_y,
        }
    }
}

/// GPU objects of a set-up stage
struct ProgramResources {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    module: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: Vec<(TargetKey, wgpu::RenderPipeline)>,
    vertex_buffer: wgpu::Buffer,
    uniform_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
    second_input: Option<(wgpu::Texture, wgpu::TextureView)>,
}

impl ProgramResources {
    /// Index of the pipeline for `key`, linking it on first use
    fn pipeline_index(&mut self, label: &'static str, key: TargetKey) -> RenderResult<usize> {
        if let Some(index) = self.pipelines.iter().position(|(k, _)| *k == key) {
            return Ok(index);
        }

        let constants = [("flip_y", if key.flip_y { -1.0 } else { 1.0 })];
        let (pipeline, error) = with_error_scope(&self.device, |device| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &self.module,
                    entry_point: Some("vs_main"),
                    compilation_options: wgpu::PipelineCompilationOptions {
                        constants: &constants,
                        ..Default::default()
                    },
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: QUAD_STRIDE,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &QUAD_ATTRIBUTES,
                    }],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &self.module,
                    entry_point: Some("fs_main"),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: key.format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleStrip,
                    ..Default::default()
                },
                // Depth is attached to offscreen targets but never tested
                depth_stencil: key.depth_format.map(|format| wgpu::DepthStencilState {
                    format,
                    depth_write_enabled: false,
                    depth_compare: wgpu::CompareFunction::Always,
                    stencil: Default::default(),
                    bias: Default::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        });
        if let Some(e) = error {
            return Err(RenderError::linkage(label, e.to_string()));
        }

        debug!(stage = label, ?key, "Linked stage pipeline");
        self.pipelines.push((key, pipeline));
        Ok(self.pipelines.len() - 1)
    }

    fn bind_group(&self, label: &'static str, input: &wgpu::TextureView) -> wgpu::BindGroup {
        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(input),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(&self.sampler),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: self.uniform_buffer.as_entire_binding(),
            },
        ];
        if let Some((_, view)) = &self.second_input {
            entries.push(wgpu::BindGroupEntry {
                binding: 3,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.bind_group_layout,
            entries: &entries,
        })
    }
}

impl Drop for ProgramResources {
    fn drop(&mut self) {
        self.vertex_buffer.destroy();
        self.uniform_buffer.destroy();
        if let Some((texture, _)) = &self.second_input {
            texture.destroy();
        }
    }
}

/// A stage built from an [`Effect`]
pub struct ProgramStage<E: Effect> {
    effect: E,
    uniforms: UniformBlock,
    second_image: Option<RgbaImage>,
    resources: Option<ProgramResources>,
}

impl<E: Effect> ProgramStage<E> {
    pub fn new(effect: E) -> Self {
        let uniforms = UniformBlock::new(effect.uniform_fields());
        Self {
            effect,
            uniforms,
            second_image: None,
            resources: None,
        }
    }

    /// Two-input stage sampling `image` as its second texture.
    ///
    /// The image is given top row first, like any decoded picture.
    pub fn with_second_input(effect: E, image: RgbaImage) -> Self {
        let mut stage = Self::new(effect);
        stage.second_image = Some(image);
        stage
    }

    pub fn effect(&self) -> &E {
        &self.effect
    }

    /// Parameters changed here take effect on the next draw
    pub fn effect_mut(&mut self) -> &mut E {
        &mut self.effect
    }

    pub fn uniforms_mut(&mut self) -> &mut UniformBlock {
        &mut self.uniforms
    }

    fn build(&self, gpu: &GpuContext) -> RenderResult<ProgramResources> {
        let label = self.effect.label();
        let device = &gpu.device;

        let source = format!(
            "{}\n{}\n{}",
            STAGE_HEADER,
            self.effect.vertex_source(),
            self.effect.fragment_source()
        );
        let (module, error) = gpu.scoped(|device| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            })
        });
        if let Some(e) = error {
            return Err(RenderError::linkage(label, e.to_string()));
        }

        let two_inputs = self.effect.uses_second_input();
        if two_inputs && self.second_image.is_none() {
            return Err(RenderError::Configuration(format!(
                "{} needs a second input image",
                label
            )));
        }

        let mut layout_entries = vec![
            // Input texture
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            // Sampler
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
            // Stage parameters
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ];
        if two_inputs {
            layout_entries.push(wgpu::BindGroupLayoutEntry {
                binding: 3,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
        }
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &layout_entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("quad_vertex_buffer"),
            contents: bytemuck::cast_slice(&QUAD_VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("stage_uniform_buffer"),
            size: self.uniforms.size() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("stage_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let second_input = match (&self.second_image, two_inputs) {
            (Some(image), true) => Some(upload_image(gpu, image, "second_input_texture")?),
            _ => None,
        };

        Ok(ProgramResources {
            device: Arc::clone(&gpu.device),
            queue: Arc::clone(&gpu.queue),
            module,
            bind_group_layout,
            pipeline_layout,
            pipelines: Vec::new(),
            vertex_buffer,
            uniform_buffer,
            sampler,
            second_input,
        })
    }
}

impl<E: Effect> ShaderStage for ProgramStage<E> {
    fn label(&self) -> &'static str {
        self.effect.label()
    }

    fn setup(&mut self, gpu: &GpuContext) -> RenderResult<()> {
        self.release();
        self.uniforms.clear_cache();

        let label = self.effect.label();
        let mut resources = self.build(gpu)?;

        // Link against a typical offscreen target now so interface
        // mismatches surface during setup rather than on first draw
        resources.pipeline_index(
            label,
            TargetKey {
                format: crate::constants::FboFormat::default().texture_format(),
                depth_format: Some(crate::constants::FBO_DEPTH_FORMAT),
                flip_y: true,
            },
        )?;

        info!(stage = label, "Shader stage ready");
        self.resources = Some(resources);
        Ok(())
    }

    fn set_frame_size(&mut self, width: u32, height: u32) {
        self.effect.set_frame_size(width, height);
    }

    fn draw(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        input: &wgpu::TextureView,
        target: &RenderTarget<'_>,
    ) -> RenderResult<()> {
        let label = self.effect.label();
        let resources = self.resources.as_mut().ok_or_else(|| {
            RenderError::Configuration(format!("{} drawn before setup", label))
        })?;

        self.effect.on_draw(&mut self.uniforms)?;
        resources
            .queue
            .write_buffer(&resources.uniform_buffer, 0, self.uniforms.bytes());

        let index = resources.pipeline_index(label, TargetKey::from(target))?;
        let bind_group = resources.bind_group(label, input);

        let load = match target.clear {
            Some(color) => wgpu::LoadOp::Clear(color),
            None => wgpu::LoadOp::Load,
        };
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target.color,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: target.depth.map(|view| {
                wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Discard,
                    }),
                    stencil_ops: None,
                }
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_viewport(
            0.0,
            0.0,
            target.width as f32,
            target.height as f32,
            0.0,
            1.0,
        );
        pass.set_pipeline(&resources.pipelines[index].1);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_vertex_buffer(0, resources.vertex_buffer.slice(..));
        pass.draw(0..4, 0..1);
        Ok(())
    }

    fn release(&mut self) {
        if self.resources.take().is_some() {
            debug!(stage = self.effect.label(), "Shader stage released");
        }
        self.uniforms.clear_cache();
    }

    fn is_set_up(&self) -> bool {
        self.resources.is_some()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::create_headless_context;

    #[test]
    fn test_quad_is_triangle_strip_with_gl_texcoords() {
        assert_eq!(QUAD_VERTICES.len(), 4 * 5);
        // top-left samples v = 1
        assert_eq!(&QUAD_VERTICES[0..5], &[-1.0, 1.0, 0.0, 0.0, 1.0]);
        // bottom-right samples v = 0
        assert_eq!(&QUAD_VERTICES[15..20], &[1.0, -1.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_new_stage_is_not_set_up() {
        let stage = ProgramStage::new(Passthrough);
        assert!(!stage.is_set_up());
    }

    struct Broken;

    impl Effect for Broken {
        fn label(&self) -> &'static str {
            "broken"
        }

        fn fragment_source(&self) -> &'static str {
            "@fragment fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> { return undefined_value; }"
        }
    }

    #[tokio::test]
    async fn test_setup_reports_linkage_error() {
        let context = match create_headless_context("linkage_test").await {
            Ok(c) => c,
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                return;
            }
        };
        let mut stage = ProgramStage::new(Broken);
        let err = stage.setup(&context).unwrap_err();
        assert!(matches!(err, RenderError::Linkage { .. }));
        assert!(err.is_fatal());
        assert!(!stage.is_set_up());
    }

    #[tokio::test]
    async fn test_setup_twice_and_release() {
        let context = match create_headless_context("program_test").await {
            Ok(c) => c,
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                return;
            }
        };
        let mut stage = ProgramStage::new(Passthrough);
        stage.setup(&context).unwrap();
        stage.setup(&context).unwrap();
        assert!(stage.is_set_up());
        stage.release();
        assert!(!stage.is_set_up());
    }
}
