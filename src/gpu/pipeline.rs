/// wgpu backend for the render graph
///
/// This module manages all the wgpu boilerplate:
/// - Device and queue initialization, error capture
/// - Texture creation and uploads (source, curve, LUT, overlay, grain)
/// - One render pipeline per pass, per target format
/// - Per-pass encoders and padded readback
///
/// Device loss surfaces as `EngineError::DeviceLost`; the engine then drops
/// this backend and builds a new one from its CPU-side state. Validation
/// errors outside a scope surface as `EngineError::GpuValidation`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use image::RgbaImage;

use super::shaders;
use super::uniforms::{BlurUniforms, FinalUniforms, GlobalUniforms, GlowUniforms, MaskUniforms};
use crate::error::{EngineError, Result};
use crate::render::backend::{BackendKind, BlurDirection, DeviceLimits, RenderBackend};
use crate::render::params::{FinalParams, GlobalParams, GlowParams};
use crate::render::plane::quantize;
use crate::render::source::{GrainTexture, GRAIN_TEXTURE_SIZE};
use crate::render::targets::{Region, Slot, TargetSizes};
use crate::state::{CubeLut, Mask, ToneCurveLut};

const WORKING_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
const DISPLAY_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Fault reported outside an error scope
#[derive(Debug, Clone, PartialEq)]
enum DeviceFault {
    Lost(String),
    OutOfMemory(String),
    Validation(String),
}

impl DeviceFault {
    fn from_wgpu(error: &wgpu::Error) -> Self {
        match error {
            wgpu::Error::OutOfMemory { .. } => DeviceFault::OutOfMemory(error.to_string()),
            wgpu::Error::Validation { .. } => DeviceFault::Validation(error.to_string()),
        }
    }

    fn into_error(self) -> EngineError {
        match self {
            DeviceFault::Lost(message) => EngineError::DeviceLost(message),
            DeviceFault::OutOfMemory(message) => {
                tracing::warn!(%message, "uncaptured GPU allocation failure");
                EngineError::ResourceExhausted {
                    what: "device memory",
                    width: 0,
                    height: 0,
                }
            }
            DeviceFault::Validation(message) => EngineError::GpuValidation(message),
        }
    }
}

/// Keep the first fault, except that a loss replaces anything else
fn record_fault(slot: &Mutex<Option<DeviceFault>>, fault: DeviceFault) {
    if let Ok(mut current) = slot.lock() {
        match (&*current, &fault) {
            (Some(DeviceFault::Lost(_)), _) => {}
            (Some(_), DeviceFault::Lost(_)) | (None, _) => *current = Some(fault),
            (Some(_), _) => {}
        }
    }
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
}

/// One fragment stage built for both target formats
struct PassPipeline {
    layout: wgpu::BindGroupLayout,
    working: wgpu::RenderPipeline,
    display: wgpu::RenderPipeline,
}

impl PassPipeline {
    fn for_format(&self, format: wgpu::TextureFormat) -> &wgpu::RenderPipeline {
        if format == DISPLAY_FORMAT {
            &self.display
        } else {
            &self.working
        }
    }
}

struct Pipelines {
    global: PassPipeline,
    mask: PassPipeline,
    composite: PassPipeline,
    threshold: PassPipeline,
    blur: PassPipeline,
    final_pass: PassPipeline,
}

struct UniformBuffers {
    global: wgpu::Buffer,
    mask: wgpu::Buffer,
    glow: wgpu::Buffer,
    blur: wgpu::Buffer,
    final_pass: wgpu::Buffer,
}

pub struct GpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    limits: DeviceLimits,
    pipelines: Pipelines,
    uniforms: UniformBuffers,
    sampler: wgpu::Sampler,
    source: Option<GpuTexture>,
    curve: GpuTexture,
    lut: GpuTexture,
    lut_domain: Option<CubeLut>,
    overlay: GpuTexture,
    grain: GpuTexture,
    targets: HashMap<Slot, GpuTexture>,
    sizes: Option<TargetSizes>,
    analysis_size: Option<u32>,
    /// Fault reported outside an error scope, taken by the next pass
    device_error: Arc<Mutex<Option<DeviceFault>>>,
}

// Manual Debug implementation (wgpu types don't implement Debug)
impl std::fmt::Debug for GpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuBackend")
            .field("adapter", &self.adapter_name)
            .field("sizes", &self.sizes)
            .finish_non_exhaustive()
    }
}

fn texture_entry(binding: u32, view_dimension: wgpu::TextureViewDimension) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension,
            multisampled: false,
        },
        count: None,
    }
}

fn texture_2d(binding: u32) -> wgpu::BindGroupLayoutEntry {
    texture_entry(binding, wgpu::TextureViewDimension::D2)
}

fn sampler_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn view_entry(binding: u32, view: &wgpu::TextureView) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: wgpu::BindingResource::TextureView(view),
    }
}

fn build_pass(
    device: &wgpu::Device,
    stage: &'static str,
    fragment: &str,
    entries: &[wgpu::BindGroupLayoutEntry],
) -> Result<PassPipeline> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(stage),
        source: wgpu::ShaderSource::Wgsl(shaders::compose(fragment).into()),
    });
    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(stage),
        entries,
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(stage),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[],
    });
    let pipeline = |format: wgpu::TextureFormat| {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(stage),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: "vs_main",
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                unclipped_depth: false,
                polygon_mode: wgpu::PolygonMode::Fill,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
        })
    };
    let working = pipeline(WORKING_FORMAT);
    let display = pipeline(DISPLAY_FORMAT);

    if let Some(error) = pollster::block_on(device.pop_error_scope()) {
        return Err(EngineError::ShaderBuild {
            stage,
            message: error.to_string(),
        });
    }
    Ok(PassPipeline {
        layout,
        working,
        display,
    })
}

fn build_pipelines(device: &wgpu::Device) -> Result<Pipelines> {
    Ok(Pipelines {
        global: build_pass(
            device,
            "global",
            shaders::GLOBAL,
            &[
                texture_2d(0),
                sampler_entry(1),
                uniform_entry(2),
                texture_2d(3),
                texture_entry(4, wgpu::TextureViewDimension::D3),
                texture_2d(5),
            ],
        )?,
        mask: build_pass(device, "mask", shaders::MASK, &[uniform_entry(0)])?,
        composite: build_pass(
            device,
            "composite",
            shaders::COMPOSITE,
            &[texture_2d(0), texture_2d(1), texture_2d(2), sampler_entry(3)],
        )?,
        threshold: build_pass(
            device,
            "threshold",
            shaders::THRESHOLD,
            &[texture_2d(0), sampler_entry(1), uniform_entry(2)],
        )?,
        blur: build_pass(
            device,
            "blur",
            shaders::BLUR,
            &[texture_2d(0), sampler_entry(1), uniform_entry(2)],
        )?,
        final_pass: build_pass(
            device,
            "final",
            shaders::FINAL,
            &[
                texture_2d(0),
                texture_2d(1),
                texture_2d(2),
                texture_2d(3),
                sampler_entry(4),
                uniform_entry(5),
            ],
        )?,
    })
}

fn uniform_buffer(device: &wgpu::Device, label: &'static str, size: usize) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Allocate a texture inside OOM/validation scopes
fn create_texture(
    device: &wgpu::Device,
    what: &'static str,
    size: wgpu::Extent3d,
    dimension: wgpu::TextureDimension,
    format: wgpu::TextureFormat,
    usage: wgpu::TextureUsages,
) -> Result<GpuTexture> {
    if size.width == 0 || size.height == 0 {
        return Err(EngineError::ResourceExhausted {
            what,
            width: size.width,
            height: size.height,
        });
    }
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(what),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension,
        format,
        usage,
        view_formats: &[],
    });
    let validation = pollster::block_on(device.pop_error_scope());
    let oom = pollster::block_on(device.pop_error_scope());
    if let Some(error) = oom.or(validation) {
        tracing::warn!(%error, what, width = size.width, height = size.height, "texture allocation failed");
        return Err(EngineError::ResourceExhausted {
            what,
            width: size.width,
            height: size.height,
        });
    }
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    Ok(GpuTexture {
        texture,
        view,
        width: size.width,
        height: size.height,
        format,
    })
}

fn extent(width: u32, height: u32, depth: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: depth,
    }
}

fn sampled_texture(
    device: &wgpu::Device,
    what: &'static str,
    size: wgpu::Extent3d,
    dimension: wgpu::TextureDimension,
    format: wgpu::TextureFormat,
) -> Result<GpuTexture> {
    create_texture(
        device,
        what,
        size,
        dimension,
        format,
        wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
    )
}

fn write_texture(queue: &wgpu::Queue, target: &GpuTexture, bytes: &[u8], bytes_per_pixel: u32, depth: u32) {
    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture: &target.texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        bytes,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(bytes_per_pixel * target.width),
            rows_per_image: Some(target.height),
        },
        extent(target.width, target.height, depth),
    );
}

impl GpuBackend {
    /// Open the default high-performance adapter and build every pipeline
    pub fn new() -> Result<Self> {
        pollster::block_on(Self::create())
    }

    async fn create() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(EngineError::NoAdapter)?;
        let info = adapter.get_info();
        let adapter_name = format!("{} ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("film-lab device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults()
                        .using_resolution(adapter.limits()),
                },
                None,
            )
            .await
            .map_err(|e| EngineError::DeviceLost(e.to_string()))?;

        let device_error = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&device_error);
        device.on_uncaptured_error(Box::new(move |error| {
            tracing::error!(%error, "uncaptured GPU error");
            record_fault(&sink, DeviceFault::from_wgpu(&error));
        }));
        let sink = Arc::clone(&device_error);
        device.set_device_lost_callback(move |reason, message| {
            match reason {
                wgpu::DeviceLostReason::Dropped | wgpu::DeviceLostReason::ReplacedCallback => {}
                _ => {
                    tracing::error!(?reason, %message, "GPU device lost");
                    record_fault(&sink, DeviceFault::Lost(message));
                }
            }
        });

        let device_limits = device.limits();
        let limits = DeviceLimits {
            max_texture_dim: device_limits.max_texture_dimension_2d,
            max_volume_dim: device_limits.max_texture_dimension_3d,
        };
        tracing::info!(adapter = %adapter_name, max_texture_dim = limits.max_texture_dim, "GPU backend ready");

        let pipelines = build_pipelines(&device)?;
        let uniforms = UniformBuffers {
            global: uniform_buffer(&device, "global uniforms", std::mem::size_of::<GlobalUniforms>()),
            mask: uniform_buffer(&device, "mask uniforms", std::mem::size_of::<MaskUniforms>()),
            glow: uniform_buffer(&device, "glow uniforms", std::mem::size_of::<GlowUniforms>()),
            blur: uniform_buffer(&device, "blur uniforms", std::mem::size_of::<BlurUniforms>()),
            final_pass: uniform_buffer(&device, "final uniforms", std::mem::size_of::<FinalUniforms>()),
        };

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("linear clamp sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let curve = sampled_texture(
            &device,
            "tone curve",
            extent(256, 4, 1),
            wgpu::TextureDimension::D2,
            wgpu::TextureFormat::R8Unorm,
        )?;
        write_texture(&queue, &curve, ToneCurveLut::identity().as_bytes(), 1, 1);

        let lut = Self::lut_placeholder(&device, &queue)?;
        let overlay = Self::overlay_placeholder(&device, &queue)?;

        let grain = sampled_texture(
            &device,
            "grain texture",
            extent(GRAIN_TEXTURE_SIZE, GRAIN_TEXTURE_SIZE, 1),
            wgpu::TextureDimension::D2,
            wgpu::TextureFormat::R8Unorm,
        )?;
        write_texture(&queue, &grain, GrainTexture::generate(0).data(), 1, 1);

        Ok(Self {
            device,
            queue,
            adapter_name,
            limits,
            pipelines,
            uniforms,
            sampler,
            source: None,
            curve,
            lut,
            lut_domain: None,
            overlay,
            grain,
            targets: HashMap::new(),
            sizes: None,
            analysis_size: None,
            device_error,
        })
    }

    fn lut_placeholder(device: &wgpu::Device, queue: &wgpu::Queue) -> Result<GpuTexture> {
        let texture = sampled_texture(
            device,
            "3-D LUT",
            extent(2, 2, 2),
            wgpu::TextureDimension::D3,
            WORKING_FORMAT,
        )?;
        let identity = CubeLut::identity(2)?.to_rgba_f16();
        write_texture(queue, &texture, bytemuck::cast_slice(&identity), 8, 2);
        Ok(texture)
    }

    fn overlay_placeholder(device: &wgpu::Device, queue: &wgpu::Queue) -> Result<GpuTexture> {
        let texture = sampled_texture(
            device,
            "overlay",
            extent(1, 1, 1),
            wgpu::TextureDimension::D2,
            DISPLAY_FORMAT,
        )?;
        write_texture(queue, &texture, &[0, 0, 0, 255], 4, 1);
        Ok(texture)
    }

    fn upload_rgba8(&self, what: &'static str, image: &RgbaImage) -> Result<GpuTexture> {
        let (w, h) = image.dimensions();
        if w > self.limits.max_texture_dim || h > self.limits.max_texture_dim {
            return Err(EngineError::ResourceExhausted {
                what,
                width: w,
                height: h,
            });
        }
        let texture = sampled_texture(
            &self.device,
            what,
            extent(w, h, 1),
            wgpu::TextureDimension::D2,
            DISPLAY_FORMAT,
        )?;
        write_texture(&self.queue, &texture, image.as_raw(), 4, 1);
        Ok(texture)
    }

    fn allocate_target(&self, slot: Slot, width: u32, height: u32) -> Result<GpuTexture> {
        if width > self.limits.max_texture_dim || height > self.limits.max_texture_dim {
            return Err(EngineError::ResourceExhausted {
                what: "render target",
                width,
                height,
            });
        }
        let format = if slot.is_display() {
            DISPLAY_FORMAT
        } else {
            WORKING_FORMAT
        };
        create_texture(
            &self.device,
            slot.label(),
            extent(width, height, 1),
            wgpu::TextureDimension::D2,
            format,
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
        )
    }

    fn target(&self, slot: Slot) -> Result<&GpuTexture> {
        self.targets
            .get(&slot)
            .ok_or(EngineError::MissingTarget(slot.label()))
    }

    fn source(&self) -> Result<&GpuTexture> {
        self.source.as_ref().ok_or(EngineError::NoSource)
    }

    /// Surface an error captured by the uncaptured-error handler
    fn check_device(&self) -> Result<()> {
        let reported = self
            .device_error
            .lock()
            .map(|mut slot| slot.take())
            .unwrap_or_else(|poisoned| Some(DeviceFault::Lost(poisoned.to_string())));
        match reported {
            Some(fault) => Err(fault.into_error()),
            None => Ok(()),
        }
    }

    /// Record and submit one full-screen pass into `dst`
    fn draw(
        &self,
        label: &'static str,
        pass: &PassPipeline,
        entries: &[wgpu::BindGroupEntry<'_>],
        dst: &GpuTexture,
    ) -> Result<()> {
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &pass.layout,
            entries,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &dst.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_pass.set_pipeline(pass.for_format(dst.format));
            render_pass.set_bind_group(0, &bind_group, &[]);
            render_pass.draw(0..3, 0..1); // Full-screen triangle
        }
        self.queue.submit(Some(encoder.finish()));
        self.check_device()
    }
}

impl RenderBackend for GpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Gpu
    }

    fn name(&self) -> String {
        self.adapter_name.clone()
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn upload_source(&mut self, image: &RgbaImage) -> Result<()> {
        self.source = None;
        let texture = self.upload_rgba8("source texture", image)?;
        tracing::debug!(width = texture.width, height = texture.height, "source uploaded");
        self.source = Some(texture);
        self.check_device()
    }

    fn upload_curve(&mut self, curve: &ToneCurveLut) -> Result<()> {
        write_texture(&self.queue, &self.curve, curve.as_bytes(), 1, 1);
        self.check_device()
    }

    fn upload_lut(&mut self, lut: Option<&CubeLut>) -> Result<()> {
        self.lut = match lut {
            Some(cube) => {
                let n = cube.size();
                if n > self.limits.max_volume_dim {
                    return Err(EngineError::ResourceExhausted {
                        what: "3-D LUT",
                        width: n,
                        height: n,
                    });
                }
                let texture = sampled_texture(
                    &self.device,
                    "3-D LUT",
                    extent(n, n, n),
                    wgpu::TextureDimension::D3,
                    WORKING_FORMAT,
                )?;
                let halves = cube.to_rgba_f16();
                write_texture(&self.queue, &texture, bytemuck::cast_slice(&halves), 8, n);
                texture
            }
            None => Self::lut_placeholder(&self.device, &self.queue)?,
        };
        self.lut_domain = lut.cloned();
        self.check_device()
    }

    fn upload_overlay(&mut self, image: Option<&RgbaImage>) -> Result<()> {
        self.overlay = match image {
            Some(image) => self.upload_rgba8("overlay", image)?,
            None => Self::overlay_placeholder(&self.device, &self.queue)?,
        };
        self.check_device()
    }

    fn upload_grain(&mut self, grain: &GrainTexture) -> Result<()> {
        write_texture(&self.queue, &self.grain, grain.data(), 1, 1);
        self.check_device()
    }

    fn ensure_targets(&mut self, sizes: TargetSizes) -> Result<bool> {
        if self.sizes == Some(sizes) && Slot::FULL.iter().all(|s| self.targets.contains_key(s)) {
            return Ok(false);
        }
        self.release_targets();
        for slot in Slot::FULL.into_iter().chain(Slot::QUARTER) {
            let Some((w, h)) = sizes.size_of(slot) else {
                continue;
            };
            match self.allocate_target(slot, w, h) {
                Ok(texture) => {
                    self.targets.insert(slot, texture);
                }
                Err(e) => {
                    self.release_targets();
                    return Err(e);
                }
            }
        }
        tracing::debug!(width = sizes.width, height = sizes.height, "gpu targets allocated");
        self.sizes = Some(sizes);
        Ok(true)
    }

    fn ensure_analysis_target(&mut self, size: u32) -> Result<bool> {
        if self.analysis_size == Some(size) && self.targets.contains_key(&Slot::Analysis) {
            return Ok(false);
        }
        let texture = self.allocate_target(Slot::Analysis, size, size)?;
        self.targets.insert(Slot::Analysis, texture);
        self.analysis_size = Some(size);
        Ok(true)
    }

    fn render_global(&mut self, params: &GlobalParams, dst: Slot) -> Result<()> {
        let out = self.target(dst)?;
        let params = GlobalParams {
            width: out.width,
            height: out.height,
            ..params.clone()
        };
        let uniforms = GlobalUniforms::from(&params).with_lut_domain(self.lut_domain.as_ref());
        self.queue
            .write_buffer(&self.uniforms.global, 0, bytemuck::bytes_of(&uniforms));
        let source = self.source()?;
        self.draw(
            "global",
            &self.pipelines.global,
            &[
                view_entry(0, &source.view),
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.uniforms.global.as_entire_binding(),
                },
                view_entry(3, &self.curve.view),
                view_entry(4, &self.lut.view),
                view_entry(5, &self.overlay.view),
            ],
            out,
        )
    }

    fn render_mask(&mut self, mask: &Mask, dst: Slot) -> Result<()> {
        let out = self.target(dst)?;
        let uniforms = MaskUniforms::new(mask, out.width, out.height);
        self.queue
            .write_buffer(&self.uniforms.mask, 0, bytemuck::bytes_of(&uniforms));
        self.draw(
            "mask",
            &self.pipelines.mask,
            &[wgpu::BindGroupEntry {
                binding: 0,
                resource: self.uniforms.mask.as_entire_binding(),
            }],
            out,
        )
    }

    fn composite_mask(&mut self, base: Slot, local: Slot, coverage: Slot, dst: Slot) -> Result<()> {
        let out = self.target(dst)?;
        self.draw(
            "composite",
            &self.pipelines.composite,
            &[
                view_entry(0, &self.target(base)?.view),
                view_entry(1, &self.target(local)?.view),
                view_entry(2, &self.target(coverage)?.view),
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
            out,
        )
    }

    fn threshold(&mut self, params: &GlowParams, src: Slot, dst: Slot) -> Result<()> {
        let out = self.target(dst)?;
        let uniforms = GlowUniforms::new(params, out.width, out.height);
        self.queue
            .write_buffer(&self.uniforms.glow, 0, bytemuck::bytes_of(&uniforms));
        self.draw(
            "threshold",
            &self.pipelines.threshold,
            &[
                view_entry(0, &self.target(src)?.view),
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.uniforms.glow.as_entire_binding(),
                },
            ],
            out,
        )
    }

    fn blur(&mut self, direction: BlurDirection, src: Slot, dst: Slot) -> Result<()> {
        let out = self.target(dst)?;
        let horizontal = direction == BlurDirection::Horizontal;
        let uniforms = BlurUniforms::new(horizontal, out.width, out.height);
        self.queue
            .write_buffer(&self.uniforms.blur, 0, bytemuck::bytes_of(&uniforms));
        self.draw(
            "blur",
            &self.pipelines.blur,
            &[
                view_entry(0, &self.target(src)?.view),
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.uniforms.blur.as_entire_binding(),
                },
            ],
            out,
        )
    }

    fn render_final(
        &mut self,
        params: &FinalParams,
        base: Slot,
        glow: Option<Slot>,
        dst: Slot,
    ) -> Result<()> {
        let out = self.target(dst)?;
        let mut params = params.resized(out.width, out.height);
        let base = self.target(base)?;
        let glow = match glow {
            Some(slot) => self.target(slot)?,
            None => {
                params.glow = None;
                base
            }
        };
        let uniforms = FinalUniforms::from(&params);
        self.queue
            .write_buffer(&self.uniforms.final_pass, 0, bytemuck::bytes_of(&uniforms));
        self.draw(
            "final",
            &self.pipelines.final_pass,
            &[
                view_entry(0, &base.view),
                view_entry(1, &glow.view),
                view_entry(2, &self.source()?.view),
                view_entry(3, &self.grain.view),
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: self.uniforms.final_pass.as_entire_binding(),
                },
            ],
            out,
        )
    }

    fn read_region(&mut self, slot: Slot, region: Region) -> Result<Vec<u8>> {
        let texture = self.target(slot)?;
        if region.x + region.width > texture.width || region.y + region.height > texture.height {
            return Err(EngineError::ResourceExhausted {
                what: "readback region",
                width: region.width,
                height: region.height,
            });
        }
        let bytes_per_pixel = if texture.format == DISPLAY_FORMAT { 4 } else { 8 };
        let bytes_per_row = region.width * bytes_per_pixel;
        let padded_bytes_per_row = (bytes_per_row + 255) & !255;
        let buffer_size = (padded_bytes_per_row * region.height) as u64;

        let output_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback buffer"),
            size: buffer_size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("readback") });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: region.x,
                    y: region.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &output_buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(region.height),
                },
            },
            extent(region.width, region.height, 1),
        );
        self.queue.submit(Some(encoder.finish()));

        let buffer_slice = output_buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(EngineError::DeviceLost(e.to_string())),
            Err(_) => {
                return Err(EngineError::DeviceLost(
                    "readback callback never fired".to_string(),
                ))
            }
        }

        let data = buffer_slice.get_mapped_range();
        let mut output = Vec::with_capacity(region.pixel_count() as usize * 4);
        for y in 0..region.height {
            let start = (y * padded_bytes_per_row) as usize;
            let row = &data[start..start + bytes_per_row as usize];
            if bytes_per_pixel == 4 {
                output.extend_from_slice(row);
            } else {
                output.extend(
                    row.chunks_exact(2)
                        .map(|h| quantize(half::f16::from_le_bytes([h[0], h[1]]).to_f32())),
                );
            }
        }

        drop(data);
        output_buffer.unmap();
        self.check_device()?;
        Ok(output)
    }

    fn release_targets(&mut self) {
        for (_, target) in self.targets.drain() {
            target.texture.destroy();
        }
        self.sizes = None;
        self.analysis_size = None;
    }
}
