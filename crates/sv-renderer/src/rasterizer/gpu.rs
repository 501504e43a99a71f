//! Headless wgpu rasterizer
//!
//! Renders into offscreen textures (RGBA8 color, R32Float linear depth and a
//! Depth32Float z-buffer) and reads them back through row-padded staging
//! buffers. Device loss flips a shared flag and every later call reports
//! [`RasterError::ContextLost`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use wgpu::util::DeviceExt;

use sv_core::{MeshGeometry, SceneSnapshot};

use super::{Rasterizer, RenderTarget};
use crate::camera::SceneUniform;
use crate::config::RendererConfig;
use crate::error::RasterError;
use crate::vertex::MeshVertex;

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const LINEAR_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Both readback textures use 4 bytes per pixel
const BYTES_PER_PIXEL: u32 = 4;

struct OffscreenTargets {
    width: u32,
    height: u32,
    color: wgpu::Texture,
    color_view: wgpu::TextureView,
    linear_depth: wgpu::Texture,
    linear_depth_view: wgpu::TextureView,
    depth_view: wgpu::TextureView,
    color_readback: wgpu::Buffer,
    depth_readback: wgpu::Buffer,
    padded_bytes_per_row: u32,
}

impl OffscreenTargets {
    fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let texture = |label: &str, format: wgpu::TextureFormat, usage: wgpu::TextureUsages| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats: &[],
            })
        };

        let readable = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC;
        let color = texture("Offscreen Color", COLOR_FORMAT, readable);
        let linear_depth = texture("Offscreen Linear Depth", LINEAR_DEPTH_FORMAT, readable);
        let depth = texture(
            "Offscreen Depth",
            DEPTH_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT,
        );

        let padded_bytes_per_row = padded_bytes_per_row(width);
        let readback = |label: &str| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: padded_bytes_per_row as u64 * height as u64,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            })
        };

        Self {
            width,
            height,
            color_view: color.create_view(&wgpu::TextureViewDescriptor::default()),
            color,
            linear_depth_view: linear_depth.create_view(&wgpu::TextureViewDescriptor::default()),
            linear_depth,
            depth_view: depth.create_view(&wgpu::TextureViewDescriptor::default()),
            color_readback: readback("Color Readback"),
            depth_readback: readback("Depth Readback"),
            padded_bytes_per_row,
        }
    }
}

/// Row pitch of a texture copy, rounded up to wgpu's 256-byte alignment
fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * BYTES_PER_PIXEL;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

struct GpuMesh {
    source: Arc<MeshGeometry>,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
}

impl GpuMesh {
    fn new(device: &wgpu::Device, mesh: &Arc<MeshGeometry>) -> Self {
        let vertices = MeshVertex::from_geometry(mesh);
        tracing::info!(
            name = %mesh.name,
            vertices = vertices.len(),
            indices = mesh.indices.len(),
            "Uploading mesh to GPU"
        );

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Mesh Vertex Buffer"),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Mesh Index Buffer"),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        Self {
            source: Arc::clone(mesh),
            vertex_buffer,
            index_buffer,
            index_count: mesh.indices.len() as u32,
        }
    }
}

/// Offscreen GPU rasterizer
pub struct WgpuRasterizer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    targets: Option<OffscreenTargets>,
    mesh: Option<GpuMesh>,
    lost: Arc<AtomicBool>,
    background: wgpu::Color,
    ambient_strength: f32,
}

impl WgpuRasterizer {
    /// Create a headless device and the mesh pipeline
    pub fn new(config: &RendererConfig) -> Result<Self, RasterError> {
        pollster::block_on(Self::new_async(config))
    }

    async fn new_async(config: &RendererConfig) -> Result<Self, RasterError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| RasterError::Unavailable("no GPU adapter found".into()))?;

        let info = adapter.get_info();
        tracing::info!(
            adapter = %info.name,
            backend = ?info.backend,
            driver = %info.driver,
            "Selected GPU adapter"
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("sv-renderer"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| RasterError::Unavailable(e.to_string()))?;

        let lost = Arc::new(AtomicBool::new(false));
        {
            let lost = Arc::clone(&lost);
            device.set_device_lost_callback(move |reason, message| {
                lost.store(true, Ordering::SeqCst);
                tracing::error!(?reason, %message, "GPU device lost");
            });
        }

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Mesh Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/mesh.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Scene Bind Group Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Scene Uniform Buffer"),
            size: std::mem::size_of::<SceneUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Scene Bind Group"),
            layout: &bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Mesh Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Mesh Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[MeshVertex::layout()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[
                    Some(wgpu::ColorTargetState {
                        format: COLOR_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    }),
                    Some(wgpu::ColorTargetState {
                        format: LINEAR_DEPTH_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    }),
                ],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let [r, g, b, a] = config.viewport.background_color.map(f64::from);
        Ok(Self {
            device,
            queue,
            pipeline,
            uniform_buffer,
            bind_group,
            targets: None,
            mesh: None,
            lost,
            background: wgpu::Color { r, g, b, a },
            ambient_strength: config.lighting.ambient_strength,
        })
    }

    fn ensure_targets(&mut self, width: u32, height: u32) {
        let stale = self
            .targets
            .as_ref()
            .is_none_or(|t| t.width != width || t.height != height);
        if stale {
            tracing::debug!(width, height, "Allocating offscreen targets");
            self.targets = Some(OffscreenTargets::new(&self.device, width, height));
        }
    }

    fn ensure_mesh(&mut self, mesh: &Arc<MeshGeometry>) {
        let stale = self
            .mesh
            .as_ref()
            .is_none_or(|m| !Arc::ptr_eq(&m.source, mesh));
        if stale {
            self.mesh = Some(GpuMesh::new(&self.device, mesh));
        }
    }

    fn check_lost(&self) -> Result<(), RasterError> {
        if self.lost.load(Ordering::SeqCst) {
            return Err(RasterError::ContextLost("GPU device lost".into()));
        }
        Ok(())
    }
}

impl Rasterizer for WgpuRasterizer {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn render(
        &mut self,
        scene: &SceneSnapshot,
        target: RenderTarget<'_>,
    ) -> Result<(), RasterError> {
        self.check_lost()?;
        target.validate()?;
        self.ensure_targets(target.width, target.height);
        self.ensure_mesh(&scene.mesh);

        let (Some(targets), Some(mesh)) = (&self.targets, &self.mesh) else {
            return Err(RasterError::Failed("offscreen resources missing".into()));
        };

        let uniform = SceneUniform::from_snapshot(scene, self.ambient_strength);
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniform));

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Offscreen Render Encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Offscreen Mesh Pass"),
                color_attachments: &[
                    Some(wgpu::RenderPassColorAttachment {
                        view: &targets.color_view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(self.background),
                            store: wgpu::StoreOp::Store,
                        },
                    }),
                    Some(wgpu::RenderPassColorAttachment {
                        view: &targets.linear_depth_view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                            store: wgpu::StoreOp::Store,
                        },
                    }),
                ],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &targets.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Discard,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
            pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..mesh.index_count, 0, 0..1);
        }

        let extent = wgpu::Extent3d {
            width: targets.width,
            height: targets.height,
            depth_or_array_layers: 1,
        };
        let copy = |encoder: &mut wgpu::CommandEncoder,
                    texture: &wgpu::Texture,
                    buffer: &wgpu::Buffer| {
            encoder.copy_texture_to_buffer(
                wgpu::ImageCopyTexture {
                    texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::ImageCopyBuffer {
                    buffer,
                    layout: wgpu::ImageDataLayout {
                        offset: 0,
                        bytes_per_row: Some(targets.padded_bytes_per_row),
                        rows_per_image: Some(targets.height),
                    },
                },
                extent,
            );
        };
        copy(&mut encoder, &targets.color, &targets.color_readback);
        if target.depth.is_some() {
            copy(&mut encoder, &targets.linear_depth, &targets.depth_readback);
        }

        self.queue.submit(Some(encoder.finish()));

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(RasterError::Failed(error.to_string()));
        }

        let row_bytes = (targets.width * BYTES_PER_PIXEL) as usize;
        read_back(
            &self.device,
            &targets.color_readback,
            targets.padded_bytes_per_row as usize,
            row_bytes,
            target.color,
        )?;
        if let Some(depth) = target.depth {
            read_back(
                &self.device,
                &targets.depth_readback,
                targets.padded_bytes_per_row as usize,
                row_bytes,
                bytemuck::cast_slice_mut(depth),
            )?;
        }

        self.check_lost()
    }
}

/// Map a staging buffer and strip the row padding into `out`
fn read_back(
    device: &wgpu::Device,
    buffer: &wgpu::Buffer,
    padded_row: usize,
    row_bytes: usize,
    out: &mut [u8],
) -> Result<(), RasterError> {
    let slice = buffer.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    let _ = device.poll(wgpu::Maintain::Wait);

    rx.recv()
        .map_err(|_| RasterError::ContextLost("readback callback dropped".into()))?
        .map_err(|e| RasterError::Failed(e.to_string()))?;

    {
        let data = slice.get_mapped_range();
        for (row, chunk) in out.chunks_exact_mut(row_bytes).enumerate() {
            let start = row * padded_row;
            chunk.copy_from_slice(&data[start..start + row_bytes]);
        }
    }
    buffer.unmap();
    Ok(())
}
