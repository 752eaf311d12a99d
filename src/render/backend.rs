/// Render backend abstraction
///
/// The engine drives the render graph through this trait; a wgpu backend
/// and a rayon CPU backend implement it. Backends own their textures and
/// targets but no adjustment state: everything they hold can be rebuilt
/// from the engine's CPU-side copies.

use image::RgbaImage;

use crate::config::BackendChoice;
use crate::error::Result;
use crate::render::cpu::CpuBackend;
use crate::render::params::{FinalParams, GlobalParams, GlowParams};
use crate::render::source::GrainTexture;
use crate::render::targets::{Region, Slot, TargetSizes};
use crate::state::{CubeLut, Mask, ToneCurveLut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Cpu,
    Gpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    pub max_texture_dim: u32,
    pub max_volume_dim: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlurDirection {
    Horizontal,
    Vertical,
}

pub trait RenderBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Human-readable adapter description
    fn name(&self) -> String;

    fn limits(&self) -> DeviceLimits;

    fn upload_source(&mut self, image: &RgbaImage) -> Result<()>;

    fn upload_curve(&mut self, curve: &ToneCurveLut) -> Result<()>;

    /// `None` unloads the LUT
    fn upload_lut(&mut self, lut: Option<&CubeLut>) -> Result<()>;

    fn upload_overlay(&mut self, image: Option<&RgbaImage>) -> Result<()>;

    fn upload_grain(&mut self, grain: &GrainTexture) -> Result<()>;

    /// (Re)allocate the full and glow targets when `sizes` differs from
    /// what is allocated. Returns true when anything was allocated.
    fn ensure_targets(&mut self, sizes: TargetSizes) -> Result<bool>;

    /// Square analysis target, cached by edge length
    fn ensure_analysis_target(&mut self, size: u32) -> Result<bool>;

    fn render_global(&mut self, params: &GlobalParams, dst: Slot) -> Result<()>;

    fn render_mask(&mut self, mask: &Mask, dst: Slot) -> Result<()>;

    /// `mix(base, local, coverage)` into `dst`
    fn composite_mask(&mut self, base: Slot, local: Slot, coverage: Slot, dst: Slot) -> Result<()>;

    fn threshold(&mut self, params: &GlowParams, src: Slot, dst: Slot) -> Result<()>;

    fn blur(&mut self, direction: BlurDirection, src: Slot, dst: Slot) -> Result<()>;

    fn render_final(
        &mut self,
        params: &FinalParams,
        base: Slot,
        glow: Option<Slot>,
        dst: Slot,
    ) -> Result<()>;

    /// RGBA8 bytes of a region, tightly packed
    fn read_region(&mut self, slot: Slot, region: Region) -> Result<Vec<u8>>;

    /// Drop every render target (rendering disabled until `ensure_targets`)
    fn release_targets(&mut self);
}

/// Construct the backend the config asks for. `Auto` falls back to the CPU
/// when no GPU adapter can be opened.
pub fn create_backend(choice: BackendChoice) -> Result<Box<dyn RenderBackend>> {
    match choice {
        BackendChoice::Cpu => Ok(Box::new(CpuBackend::new())),
        BackendChoice::Gpu => Ok(Box::new(crate::gpu::GpuBackend::new()?)),
        BackendChoice::Auto => match crate::gpu::GpuBackend::new() {
            Ok(gpu) => Ok(Box::new(gpu)),
            Err(e) => {
                tracing::warn!(error = %e, "GPU backend unavailable, using CPU");
                Ok(Box::new(CpuBackend::new()))
            }
        },
    }
}
