//! wgpu-backed [`RenderDevice`]. Headless; window presentation is the host
//! application's job.

use super::{DepthId, DeviceError, RenderDevice, ScreenRect, ShaderId, TargetId};
use crate::compositor::{AdapterLuid, MirrorHandle};
use crate::math::Mat4;
use pollster::block_on;
use std::collections::HashMap;
use std::sync::Arc;

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct BlitRect {
    origin: [f32; 2],
    extent: [f32; 2],
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: [u32; 2],
}

struct PresentPipeline {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    uniform_buffer: wgpu::Buffer,
}

pub struct WgpuDevice {
    _instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    screen: GpuTexture,
    next_id: u64,
    targets: HashMap<u64, GpuTexture>,
    depths: HashMap<u64, GpuTexture>,
    mirrors: HashMap<u64, GpuTexture>,
    shaders: HashMap<u64, PresentPipeline>,
    bound: Option<(TargetId, DepthId)>,
    view_stack: Vec<(Mat4, Mat4)>,
}

impl WgpuDevice {
    pub fn initialize(screen_size: [u32; 2]) -> Result<Self, DeviceError> {
        block_on(Self::initialize_async(screen_size))
    }

    async fn initialize_async(screen_size: [u32; 2]) -> Result<Self, DeviceError> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| {
                DeviceError::Unavailable("no compatible GPU adapter found".to_string())
            })?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Parallax Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults(),
                },
                None,
            )
            .await
            .map_err(|err| DeviceError::Unavailable(format!("device request failed: {err}")))?;

        log::info!(
            "[device] wgpu ready on {} ({}x{} screen)",
            adapter.get_info().name,
            screen_size[0],
            screen_size[1]
        );

        let screen = Self::make_texture(
            &device,
            screen_size,
            COLOR_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            "Parallax Screen",
        );

        Ok(Self {
            _instance: instance,
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
            screen,
            next_id: 0,
            targets: HashMap::new(),
            depths: HashMap::new(),
            mirrors: HashMap::new(),
            shaders: HashMap::new(),
            bound: None,
            view_stack: Vec::new(),
        })
    }

    fn make_texture(
        device: &wgpu::Device,
        size: [u32; 2],
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
        label: &str,
    ) -> GpuTexture {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size[0].max(1),
                height: size[1].max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        GpuTexture {
            texture,
            view,
            size,
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn screen_texture(&self) -> &wgpu::Texture {
        &self.screen.texture
    }

    pub fn current_view(&self) -> Option<&(Mat4, Mat4)> {
        self.view_stack.last()
    }

    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    pub fn wgpu_device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    fn mirror_texture(&mut self, mirror: MirrorHandle) -> &GpuTexture {
        self.mirrors.entry(mirror.id).or_insert_with(|| {
            // The compositor writes the preview into this surface; the
            // device only samples it.
            Self::make_texture(
                &self.device,
                mirror.size,
                COLOR_FORMAT,
                wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_DST
                    | wgpu::TextureUsages::RENDER_ATTACHMENT,
                "Parallax Mirror",
            )
        })
    }

    fn make_present_pipeline(&self) -> PresentPipeline {
        let shader = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Parallax Present Shader"),
                source: wgpu::ShaderSource::Wgsl(include_str!("shaders/present.wgsl").into()),
            });

        let uniform_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Parallax Blit Rect"),
            size: std::mem::size_of::<BlitRect>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Parallax Mirror Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let bind_group_layout =
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("Parallax Present Layout"),
                    entries: &[
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
                        wgpu::BindGroupLayoutEntry {
                            binding: 1,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: 2,
                            visibility: wgpu::ShaderStages::VERTEX,
                            ty: wgpu::BindingType::Buffer {
                                ty: wgpu::BufferBindingType::Uniform,
                                has_dynamic_offset: false,
                                min_binding_size: None,
                            },
                            count: None,
                        },
                    ],
                });

        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Parallax Present Pipeline Layout"),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Parallax Present Pipeline"),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: "vs_main",
                    buffers: &[],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: "fs_main",
                    targets: &[Some(wgpu::ColorTargetState {
                        format: COLOR_FORMAT,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            });

        PresentPipeline {
            pipeline,
            bind_group_layout,
            sampler,
            uniform_buffer,
        }
    }
}

impl RenderDevice for WgpuDevice {
    fn label(&self) -> &'static str {
        "WGPU Device"
    }

    fn adapter_luid(&self) -> AdapterLuid {
        let info = self.adapter.get_info();
        let mut luid = [0u8; 8];
        luid[..4].copy_from_slice(&info.vendor.to_le_bytes());
        luid[4..].copy_from_slice(&info.device.to_le_bytes());
        AdapterLuid(luid)
    }

    fn create_target(&mut self, size: [u32; 2]) -> Result<TargetId, DeviceError> {
        let id = self.next_id();
        let texture = Self::make_texture(
            &self.device,
            size,
            COLOR_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            "Parallax Eye Target",
        );
        self.targets.insert(id, texture);
        Ok(TargetId(id))
    }

    fn create_depth(&mut self, size: [u32; 2]) -> Result<DepthId, DeviceError> {
        let id = self.next_id();
        let texture = Self::make_texture(
            &self.device,
            size,
            DEPTH_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT,
            "Parallax Eye Depth",
        );
        self.depths.insert(id, texture);
        Ok(DepthId(id))
    }

    fn destroy_target(&mut self, target: TargetId) {
        self.targets.remove(&target.0);
    }

    fn destroy_depth(&mut self, depth: DepthId) {
        self.depths.remove(&depth.0);
    }

    fn bind_and_clear(&mut self, target: TargetId, depth: DepthId) {
        let (Some(color), Some(depth_tex)) = (self.targets.get(&target.0), self.depths.get(&depth.0))
        else {
            log::error!("[device] bind_and_clear with unknown {target:?}/{depth:?}");
            return;
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Parallax Clear Encoder"),
            });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Parallax Eye Clear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &color.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: 0.0,
                            g: 0.0,
                            b: 0.0,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &depth_tex.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        self.bound = Some((target, depth));
    }

    fn unbind(&mut self) {
        if self.bound.take().is_none() {
            log::warn!("[device] unbind without a bound render target");
        }
    }

    fn push_view(&mut self, view: Mat4, projection: Mat4) {
        self.view_stack.push((view, projection));
    }

    fn pop_view(&mut self) {
        if self.view_stack.pop().is_none() {
            log::warn!("[device] view stack popped while empty");
        }
    }

    fn create_present_shader(&mut self) -> Result<ShaderId, DeviceError> {
        let pipeline = self.make_present_pipeline();
        let id = self.next_id();
        self.shaders.insert(id, pipeline);
        Ok(ShaderId(id))
    }

    fn destroy_shader(&mut self, shader: ShaderId) {
        self.shaders.remove(&shader.0);
    }

    fn blit_mirror(&mut self, mirror: MirrorHandle, shader: ShaderId, rect: ScreenRect) {
        if !self.shaders.contains_key(&shader.0) {
            log::error!("[device] blit with unknown present shader {shader:?}");
            return;
        }
        let _ = self.mirror_texture(mirror);

        let screen = [self.screen.size[0] as f32, self.screen.size[1] as f32];
        let blit = BlitRect {
            // NDC bottom-left of the region; rect origin is top-left.
            origin: [
                rect.x / screen[0] * 2.0 - 1.0,
                1.0 - (rect.y + rect.height) / screen[1] * 2.0,
            ],
            extent: [
                rect.width / screen[0] * 2.0,
                rect.height / screen[1] * 2.0,
            ],
        };

        let present = &self.shaders[&shader.0];
        let mirror_tex = &self.mirrors[&mirror.id];
        self.queue
            .write_buffer(&present.uniform_buffer, 0, bytemuck::bytes_of(&blit));

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Parallax Present Bind Group"),
            layout: &present.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&mirror_tex.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&present.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: present.uniform_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Parallax Present Encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Parallax Mirror Blit"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.screen.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&present.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..6, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }
}
