// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The accelerated energy backend.
//!
//! The RGB buffer is uploaded as a texture and a full-screen quad is
//! drawn into an `R32Float` render target with the Sobel fragment
//! shader; the target is then copied to a mappable buffer and read
//! back as an [`EnergyMap`].  Results agree with the CPU backend within
//! floating point tolerance.
//!
//! # Lifecycle
//! `GpuEnergy::new()` holds nothing.  `initialize` acquires a device,
//! compiles the shaders and builds the pipeline, sampler, uniform
//! buffer and quad, all of which persist until `cleanup` (or drop).
//! The input/energy textures and the readback buffer are rebuilt
//! whenever a call arrives with a different size than the last one.
//!
//! Every call rewrites that shared state, so the backend is not
//! reentrant: one owner at a time, which `&mut self` enforces.

use crate::config::ShaderPaths;
use crate::energy::{EnergyBackend, CHANNELS};
use crate::errors::{check_buffer, CarveError};
use crate::twodmap::EnergyMap;
use log::{debug, error, info};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Instant;
use wgpu::util::DeviceExt;

const VERTEX_SHADER: &str = include_str!("../shaders/energy_vertex.wgsl");
const FRAGMENT_SHADER: &str = include_str!("../shaders/energy_fragment.wgsl");

const INPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const ENERGY_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;

/// One corner of the full-screen quad: clip-space position and the
/// texture coordinate that lands there.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct QuadVertex {
    position: [f32; 2],
    tex_coord: [f32; 2],
}

impl QuadVertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 2] =
        wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

// Two triangles.  Clip space has y up, textures have v down.
#[rustfmt::skip]
const QUAD: [QuadVertex; 6] = [
    QuadVertex { position: [-1.0, -1.0], tex_coord: [0.0, 1.0] },
    QuadVertex { position: [ 1.0, -1.0], tex_coord: [1.0, 1.0] },
    QuadVertex { position: [ 1.0,  1.0], tex_coord: [1.0, 0.0] },
    QuadVertex { position: [-1.0, -1.0], tex_coord: [0.0, 1.0] },
    QuadVertex { position: [ 1.0,  1.0], tex_coord: [1.0, 0.0] },
    QuadVertex { position: [-1.0,  1.0], tex_coord: [0.0, 0.0] },
];

// The `texel_size` uniform, padded to 16 bytes.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct EnergyParams {
    texel_size: [f32; 2],
    _pad: [f32; 2],
}

fn device_failure<E: std::fmt::Display>(what: &str, err: E) -> CarveError {
    CarveError::DeviceResourceFailure(format!("{}: {}", what, err))
}

/// Round `value` up to the next multiple of `alignment`.
fn align_to(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) / alignment * alignment
}

// Per-size resources.  Rebuilt when the image width changes, which in
// a reduction is every call.
struct Targets {
    width: u32,
    height: u32,
    input: wgpu::Texture,
    energy: wgpu::Texture,
    energy_view: wgpu::TextureView,
    readback: wgpu::Buffer,
    padded_row: u32,
    bind_group: wgpu::BindGroup,
}

// Everything `initialize` allocates.  Fields drop top to bottom, so
// the device, queue and instance outlive the objects made from them.
struct GpuState {
    targets: Option<Targets>,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    params: wgpu::Buffer,
    quad: wgpu::Buffer,
    adapter_name: String,
    device: wgpu::Device,
    queue: wgpu::Queue,
    _instance: wgpu::Instance,
}

impl GpuState {
    async fn create(vertex_source: &str, fragment_source: &str) -> Result<Self, CarveError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| CarveError::DeviceResourceFailure("no graphics adapter found".to_string()))?;
        let info = adapter.get_info();
        let adapter_name = format!("{} ({:?}, {:?})", info.name, info.backend, info.device_type);

        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("rgbseam"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(|e| device_failure("device request failed", e))?;

        // Shader compilation and pipeline linking report through the
        // validation scope rather than by return value.
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let vertex = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("energy vertex"),
            source: wgpu::ShaderSource::Wgsl(vertex_source.into()),
        });
        let fragment = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("energy fragment"),
            source: wgpu::ShaderSource::Wgsl(fragment_source.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("energy bind group layout"),
            entries: &[
                // Binding 0: input_texture
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                // Binding 1: input_sampler
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                // Binding 2: texel_size
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("energy pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("energy"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &vertex,
                entry_point: "vs_main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &[QuadVertex::layout()],
            },
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &fragment,
                entry_point: "fs_main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: ENERGY_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            multiview: None,
            cache: None,
        });

        if let Some(err) = device.pop_error_scope().await {
            return Err(device_failure("shader program failed to build", err));
        }

        // Nearest filtering at texel centres reads texels back exactly.
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("energy input sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("energy params"),
            size: std::mem::size_of::<EnergyParams>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let quad = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("energy quad"),
            contents: bytemuck::cast_slice(&QUAD),
            usage: wgpu::BufferUsages::VERTEX,
        });

        Ok(GpuState {
            targets: None,
            pipeline,
            bind_group_layout,
            sampler,
            params,
            quad,
            adapter_name,
            device,
            queue,
            _instance: instance,
        })
    }

    fn resize(&mut self, width: u32, height: u32) {
        if let Some(t) = &self.targets {
            if t.width == width && t.height == height {
                return;
            }
        }
        debug!("gpu energy targets resized to {}x{}", width, height);

        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let input = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("energy input"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: INPUT_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let energy = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("energy target"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: ENERGY_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let input_view = input.create_view(&wgpu::TextureViewDescriptor::default());
        let energy_view = energy.create_view(&wgpu::TextureViewDescriptor::default());

        // Texture to buffer copies need rows padded to 256 bytes.
        let padded_row = align_to(width * 4, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("energy readback"),
            size: u64::from(padded_row) * u64::from(height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("energy bind group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&input_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.params.as_entire_binding(),
                },
            ],
        });

        self.targets = Some(Targets {
            width,
            height,
            input,
            energy,
            energy_view,
            readback,
            padded_row,
            bind_group,
        });
    }

    fn render(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<EnergyMap, CarveError> {
        let max = self.device.limits().max_texture_dimension_2d;
        if width > max || height > max {
            return Err(CarveError::DeviceResourceFailure(format!(
                "{}x{} exceeds the device's {} pixel texture limit",
                width, height, max
            )));
        }
        self.resize(width, height);
        let targets = match &self.targets {
            Some(t) => t,
            None => return Err(CarveError::BackendNotReady),
        };

        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let rgba: Vec<u8> = pixels
            .chunks_exact(CHANNELS as usize)
            .flat_map(|p| [p[0], p[1], p[2], u8::MAX])
            .collect();
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &targets.input,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &rgba,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            size,
        );
        let params = EnergyParams {
            texel_size: [1.0 / width as f32, 1.0 / height as f32],
            _pad: [0.0; 2],
        };
        self.queue.write_buffer(&self.params, 0, bytemuck::bytes_of(&params));

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("energy pass"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("energy pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &targets.energy_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &targets.bind_group, &[]);
            pass.set_vertex_buffer(0, self.quad.slice(..));
            pass.draw(0..QUAD.len() as u32, 0..1);
        }
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &targets.energy,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &targets.readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(targets.padded_row),
                    rows_per_image: Some(height),
                },
            },
            size,
        );
        self.queue.submit(std::iter::once(encoder.finish()));
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(device_failure("energy pass failed", err));
        }

        // Map the readback buffer and block until the copy lands.
        let slice = targets.readback.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|e| device_failure("readback never completed", e))?
            .map_err(|e| device_failure("readback map failed", e))?;

        let mut energy = Vec::with_capacity(width as usize * height as usize);
        {
            let mapped = slice.get_mapped_range();
            for row in mapped.chunks_exact(targets.padded_row as usize) {
                energy.extend(
                    row[..width as usize * 4]
                        .chunks_exact(4)
                        .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]])),
                );
            }
        }
        targets.readback.unmap();

        EnergyMap::from_raw(width, height, energy).ok_or_else(|| {
            CarveError::DeviceResourceFailure("readback returned the wrong number of texels".to_string())
        })
    }
}

fn load_shader(path: &Path, fallback: &'static str, allow_fallback: bool) -> Result<String, CarveError> {
    match fs::read_to_string(path) {
        Ok(source) => Ok(source),
        Err(ref e) if allow_fallback && e.kind() == io::ErrorKind::NotFound => {
            debug!("{} not found, using the built-in shader", path.display());
            Ok(fallback.to_string())
        }
        Err(e) => Err(device_failure(&format!("cannot read shader {}", path.display()), e)),
    }
}

/// The accelerated backend.  See the module documentation for its
/// lifecycle.
#[derive(Default)]
pub struct GpuEnergy {
    state: Option<GpuState>,
}

impl GpuEnergy {
    /// An uninitialized backend.  `compute_energy` fails with
    /// `BackendNotReady` until `initialize` succeeds.
    pub fn new() -> Self {
        GpuEnergy { state: None }
    }

    /// Bring the backend up with the shaders built into the crate.
    pub fn initialize(&mut self) -> Result<(), CarveError> {
        self.initialize_from_source(VERTEX_SHADER, FRAGMENT_SHADER)
    }

    /// Bring the backend up with shaders read from disk.  The default
    /// paths fall back to the built-in shaders if the files are absent;
    /// explicit paths must exist.
    pub fn initialize_with_shaders(&mut self, shaders: &ShaderPaths) -> Result<(), CarveError> {
        if self.state.is_some() {
            return Ok(());
        }
        let fallback = shaders.is_default();
        let vertex = load_shader(&shaders.vertex, VERTEX_SHADER, fallback)?;
        let fragment = load_shader(&shaders.fragment, FRAGMENT_SHADER, fallback)?;
        self.initialize_from_source(&vertex, &fragment)
    }

    /// Bring the backend up with the given WGSL.  The vertex module must
    /// export `vs_main`; the fragment module `fs_main`, reading
    /// `input_texture`, `input_sampler` and the `texel_size` uniform at
    /// bindings 0, 1 and 2 of group 0.
    pub fn initialize_from_source(&mut self, vertex: &str, fragment: &str) -> Result<(), CarveError> {
        if self.state.is_some() {
            return Ok(());
        }
        match pollster::block_on(GpuState::create(vertex, fragment)) {
            Ok(state) => {
                info!("GPU energy backend initialized on {}", state.adapter_name);
                self.state = Some(state);
                Ok(())
            }
            Err(e) => {
                error!("GPU energy backend failed to initialize: {}", e);
                Err(e)
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_some()
    }

    /// Release every device resource.  The backend can be initialized
    /// again afterwards.
    pub fn cleanup(&mut self) {
        if self.state.take().is_some() {
            info!("GPU energy backend cleaned up");
        }
    }
}

impl EnergyBackend for GpuEnergy {
    fn compute_energy(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        channels: u8,
    ) -> Result<EnergyMap, CarveError> {
        if channels != CHANNELS {
            return Err(CarveError::UnsupportedFormat { channels });
        }
        let state = self.state.as_mut().ok_or(CarveError::BackendNotReady)?;
        check_buffer(pixels, width, height, channels)?;
        if width == 0 || height == 0 {
            return Ok(EnergyMap::new(width, height));
        }

        let start = Instant::now();
        let energy = state.render(pixels, width, height)?;
        debug!(
            "gpu energy {}x{} in {:.2}ms",
            width,
            height,
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(energy)
    }

    fn name(&self) -> &'static str {
        "gpu"
    }
}
