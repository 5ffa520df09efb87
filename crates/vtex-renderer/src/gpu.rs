//! GPU lookup texture resources
//!
//! `wgpu` side of the lookup texture: the texture itself, the instance
//! buffer for the batched rasterization pass and the shader parameter
//! uniform. The CPU copy in [`LookupTexture`] is uploaded with
//! [`GpuLookupTexture::upload_texels`]; alternatively the instance batch can
//! be drawn straight into the texture with [`GpuLookupTexture::draw`].

use std::mem;

use crate::lookup::{LookupInstance, LookupTexture, ShaderParams};
use crate::{VirtualTextureConfig, VtError, VtResult};

/// Unit-quad instanced rasterization of lookup pages
pub const LOOKUP_SHADER: &str = r#"
struct Instance {
    @location(0) c0: vec4<f32>,
    @location(1) c1: vec4<f32>,
    @location(2) c2: vec4<f32>,
    @location(3) c3: vec4<f32>,
    @location(4) payload: vec4<f32>,
};

struct VsOut {
    @builtin(position) position: vec4<f32>,
    @location(0) payload: vec4<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) index: u32, instance: Instance) -> VsOut {
    let corner = vec2<f32>(f32(index & 1u), f32(index >> 1u));
    let transform = mat4x4<f32>(instance.c0, instance.c1, instance.c2, instance.c3);
    let uv = (transform * vec4<f32>(corner, 0.0, 1.0)).xy;

    var out: VsOut;
    out.position = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, 0.0, 1.0);
    out.payload = instance.payload;
    return out;
}

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    return in.payload;
}
"#;

const INSTANCE_ATTRIBUTES: [wgpu::VertexAttribute; 5] = wgpu::vertex_attr_array![
    0 => Float32x4,
    1 => Float32x4,
    2 => Float32x4,
    3 => Float32x4,
    4 => Float32x4,
];

/// GPU resources backing the lookup texture
pub struct GpuLookupTexture {
    size: u32,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    instances: wgpu::Buffer,
    instance_capacity: usize,
    instance_count: u32,
    params: wgpu::Buffer,
}

impl GpuLookupTexture {
    pub const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

    /// Create the lookup texture and its buffers
    pub fn new(device: &wgpu::Device, config: &VirtualTextureConfig) -> Self {
        let size = config.table_size;
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("vtex.lookup"),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let instance_capacity = 64;
        let instances = Self::create_instance_buffer(device, instance_capacity);
        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("vtex.params"),
            size: mem::size_of::<ShaderParams>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        log::debug!("Created {size}x{size} GPU lookup texture");

        Self {
            size,
            texture,
            view,
            instances,
            instance_capacity,
            instance_count: 0,
            params,
        }
    }

    fn create_instance_buffer(device: &wgpu::Device, capacity: usize) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("vtex.lookup_instances"),
            size: (capacity * mem::size_of::<LookupInstance>()) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Copy the CPU-rasterized lookup texels into the texture
    pub fn upload_texels(&self, queue: &wgpu::Queue, lookup: &LookupTexture) -> VtResult<()> {
        if lookup.size() != self.size {
            return Err(VtError::Gpu(format!(
                "lookup texture is {} texels wide, GPU texture is {}",
                lookup.size(),
                self.size
            )));
        }

        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            lookup.as_bytes(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(self.size * 4),
                rows_per_image: Some(self.size),
            },
            wgpu::Extent3d {
                width: self.size,
                height: self.size,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    /// Upload the instance batch, growing the buffer when needed
    pub fn upload_instances(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        instances: &[LookupInstance],
    ) {
        if instances.len() > self.instance_capacity {
            self.instance_capacity = instances.len().next_power_of_two();
            self.instances = Self::create_instance_buffer(device, self.instance_capacity);
        }
        if !instances.is_empty() {
            queue.write_buffer(&self.instances, 0, bytemuck::cast_slice(instances));
        }
        self.instance_count = instances.len() as u32;
    }

    pub fn upload_params(&self, queue: &wgpu::Queue, params: &ShaderParams) {
        queue.write_buffer(&self.params, 0, bytemuck::bytes_of(params));
    }

    /// Render pipeline drawing lookup instances into a [`Self::FORMAT`] target
    pub fn create_pipeline(device: &wgpu::Device) -> wgpu::RenderPipeline {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("vtex.lookup_shader"),
            source: wgpu::ShaderSource::Wgsl(LOOKUP_SHADER.into()),
        });

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("vtex.lookup_pipeline"),
            layout: None,
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[Self::instance_layout()],
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: Self::FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            multiview: None,
            cache: None,
        })
    }

    /// Draw the uploaded instances, in order, into the bound lookup target
    pub fn draw(&self, pass: &mut wgpu::RenderPass<'_>) {
        if self.instance_count == 0 {
            return;
        }
        pass.set_vertex_buffer(0, self.instances.slice(..));
        pass.draw(0..4, 0..self.instance_count);
    }

    /// Vertex layout of [`LookupInstance`]
    pub fn instance_layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<LookupInstance>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &INSTANCE_ATTRIBUTES,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn params_buffer(&self) -> &wgpu::Buffer {
        &self.params
    }

    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }
}
