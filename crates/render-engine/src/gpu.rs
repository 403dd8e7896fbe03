//! Headless wgpu compositor.
//!
//! The crop is a UV remap: one full-screen triangle samples the decoded
//! frame through the crop window, so scaling happens in the texture
//! sampler. The overlay layer is uploaded once per render and blended over
//! the result by a second draw. Only the finished picture is read back.

use clipframe_media_model::CropRect;
use image::RgbaImage;
use tracing::{debug, info};
use wgpu::*;

const SHADER: &str = r#"
struct Window {
    origin: vec2<f32>,
    size: vec2<f32>,
};

@group(0) @binding(0) var frame_tex: texture_2d<f32>;
@group(0) @binding(1) var frame_sampler: sampler;
@group(0) @binding(2) var<uniform> crop_window: Window;

struct VertexOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOut {
    // Fullscreen triangle
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var out: VertexOut;
    out.position = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, 0.0, 1.0);
    out.uv = uv;
    return out;
}

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    return textureSample(frame_tex, frame_sampler, crop_window.origin + in.uv * crop_window.size);
}
"#;

const FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// GPU setup or readback failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GpuError {
    #[error("no GPU adapter available")]
    NoAdapter,

    #[error("device request failed: {0}")]
    Device(String),

    #[error("{width}x{height} exceeds the device texture limit of {limit}")]
    TooLarge { width: u32, height: u32, limit: u32 },

    #[error("GPU validation: {0}")]
    Validation(String),

    #[error("readback failed: {0}")]
    Readback(String),
}

/// A texture bound for sampling through one window.
struct Layer {
    texture: Texture,
    bind_group: BindGroup,
}

/// Device state for one render.
pub struct GpuCompositor {
    device: Device,
    queue: Queue,
    adapter_name: String,
    layout: BindGroupLayout,
    sampler: Sampler,
    crop_pipeline: RenderPipeline,
    blend_pipeline: RenderPipeline,
    crop_window: Buffer,
    full_window: Buffer,
    source: Option<Layer>,
    overlay: Option<Layer>,
    target: Texture,
    readback: Buffer,
    output_size: (u32, u32),
    padded_row: u32,
}

impl GpuCompositor {
    /// Request an adapter and build both passes for `output_size` frames.
    pub async fn new(output_size: (u32, u32)) -> Result<Self, GpuError> {
        let instance = Instance::new(InstanceDescriptor {
            backends: Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;
        let adapter_name = adapter.get_info().name;

        let (device, queue) = adapter
            .request_device(
                &DeviceDescriptor {
                    label: Some("Clipframe Compositor Device"),
                    required_features: Features::empty(),
                    required_limits: Limits::downlevel_defaults().using_resolution(adapter.limits()),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| GpuError::Device(e.to_string()))?;

        let (width, height) = output_size;
        let limit = device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > limit || height > limit {
            return Err(GpuError::TooLarge {
                width,
                height,
                limit,
            });
        }

        let layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("Layer Bind Group Layout"),
            entries: &[
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Float { filterable: true },
                        view_dimension: TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 1,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Sampler(SamplerBindingType::Filtering),
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 2,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let sampler = device.create_sampler(&SamplerDescriptor {
            label: Some("Layer Sampler"),
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            address_mode_w: AddressMode::ClampToEdge,
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mipmap_filter: FilterMode::Nearest,
            ..Default::default()
        });

        let crop_pipeline = Self::create_pipeline(&device, &layout, BlendState::REPLACE, "Crop Pipeline");
        let blend_pipeline =
            Self::create_pipeline(&device, &layout, BlendState::ALPHA_BLENDING, "Overlay Pipeline");

        let crop_window = Self::window_buffer(&device, "Crop Window");
        let full_window = Self::window_buffer(&device, "Full Window");
        queue.write_buffer(&full_window, 0, &window_bytes(&CropRect::FULL));

        let target = device.create_texture(&TextureDescriptor {
            label: Some("Output Texture"),
            size: extent(output_size),
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: FORMAT,
            usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        let padded_row = padded_row_bytes(width);
        let readback = device.create_buffer(&BufferDescriptor {
            label: Some("Readback Buffer"),
            size: u64::from(padded_row) * u64::from(height),
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        info!(adapter = %adapter_name, width, height, "GPU compositor ready");

        Ok(Self {
            device,
            queue,
            adapter_name,
            layout,
            sampler,
            crop_pipeline,
            blend_pipeline,
            crop_window,
            full_window,
            source: None,
            overlay: None,
            target,
            readback,
            output_size,
            padded_row,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    pub fn has_overlay(&self) -> bool {
        self.overlay.is_some()
    }

    /// Upload the overlay layer. It stays on the device for every later
    /// frame.
    pub fn set_overlay(&mut self, overlay: &RgbaImage) {
        let layer = self.create_layer(overlay.dimensions(), &self.full_window, "Overlay Texture");
        self.upload(&layer.texture, overlay);
        self.overlay = Some(layer);
        debug!("Overlay uploaded to GPU");
    }

    /// Composite one frame: crop pass, optional overlay pass, readback.
    pub fn render(&mut self, frame: &RgbaImage, crop: &CropRect) -> Result<RgbaImage, GpuError> {
        let size = frame.dimensions();
        let stale = self
            .source
            .as_ref()
            .map_or(true, |layer| (layer.texture.width(), layer.texture.height()) != size);
        if stale {
            self.source = Some(self.create_layer(size, &self.crop_window, "Frame Texture"));
        }
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| GpuError::Validation("frame texture missing".into()))?;
        self.upload(&source.texture, frame);
        self.queue.write_buffer(&self.crop_window, 0, &window_bytes(crop));

        self.device.push_error_scope(ErrorFilter::Validation);

        let view = self.target.create_view(&TextureViewDescriptor::default());
        let mut encoder = self.device.create_command_encoder(&CommandEncoderDescriptor {
            label: Some("Composite Encoder"),
        });

        {
            let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("Crop Pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Clear(Color::BLACK),
                        store: StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.crop_pipeline);
            pass.set_bind_group(0, &source.bind_group, &[]);
            pass.draw(0..3, 0..1);
        }

        if let Some(overlay) = &self.overlay {
            let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("Overlay Pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Load,
                        store: StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.blend_pipeline);
            pass.set_bind_group(0, &overlay.bind_group, &[]);
            pass.draw(0..3, 0..1);
        }

        let (width, height) = self.output_size;
        encoder.copy_texture_to_buffer(
            ImageCopyTexture {
                texture: &self.target,
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            ImageCopyBuffer {
                buffer: &self.readback,
                layout: ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_row),
                    rows_per_image: Some(height),
                },
            },
            extent(self.output_size),
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(GpuError::Validation(error.to_string()));
        }

        let slice = self.readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(Maintain::Wait);
        rx.recv()
            .map_err(|e| GpuError::Readback(e.to_string()))?
            .map_err(|e| GpuError::Readback(e.to_string()))?;

        let row = width as usize * 4;
        let mut pixels = Vec::with_capacity(row * height as usize);
        {
            let mapped = slice.get_mapped_range();
            for line in mapped.chunks(self.padded_row as usize).take(height as usize) {
                pixels.extend_from_slice(&line[..row]);
            }
        }
        self.readback.unmap();

        RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| GpuError::Readback("short readback".into()))
    }

    fn create_layer(&self, (width, height): (u32, u32), window: &Buffer, label: &str) -> Layer {
        let texture = self.device.create_texture(&TextureDescriptor {
            label: Some(label),
            size: extent((width, height)),
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: FORMAT,
            usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&BindGroupDescriptor {
            label: Some(label),
            layout: &self.layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(&view),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::Sampler(&self.sampler),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: window.as_entire_binding(),
                },
            ],
        });
        Layer {
            texture,
            bind_group,
        }
    }

    fn upload(&self, texture: &Texture, image: &RgbaImage) {
        let (width, height) = image.dimensions();
        self.queue.write_texture(
            ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            image.as_raw(),
            ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            extent((width, height)),
        );
    }

    fn window_buffer(device: &Device, label: &str) -> Buffer {
        device.create_buffer(&BufferDescriptor {
            label: Some(label),
            size: 16,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    fn create_pipeline(
        device: &Device,
        layout: &BindGroupLayout,
        blend: BlendState,
        label: &str,
    ) -> RenderPipeline {
        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("Composite Shader"),
            source: ShaderSource::Wgsl(SHADER.into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[layout],
            push_constant_ranges: &[],
        });

        device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            cache: None,
            vertex: VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            fragment: Some(FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(ColorTargetState {
                    format: FORMAT,
                    blend: Some(blend),
                    write_mask: ColorWrites::ALL,
                })],
            }),
            primitive: PrimitiveState {
                topology: PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: MultisampleState::default(),
            multiview: None,
        })
    }
}

fn extent((width, height): (u32, u32)) -> Extent3d {
    Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

/// Row pitch of the readback buffer.
fn padded_row_bytes(width: u32) -> u32 {
    let unpadded = width * 4;
    unpadded.div_ceil(COPY_BYTES_PER_ROW_ALIGNMENT) * COPY_BYTES_PER_ROW_ALIGNMENT
}

/// Uniform layout of `Window`: origin then size, as `f32`.
fn window_bytes(crop: &CropRect) -> [u8; 16] {
    let mut out = [0u8; 16];
    for (slot, value) in out.chunks_exact_mut(4).zip([crop.x, crop.y, crop.w, crop.h]) {
        slot.copy_from_slice(&(value as f32).to_le_bytes());
    }
    out
}
