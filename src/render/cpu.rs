/// CPU reference backend
///
/// Runs every pass with the per-pixel functions in `ops.rs`, one rayon task
/// per row. Targets are `f32` planes, except the frame and analysis targets,
/// which are quantized to 8 bits on write like their GPU counterparts.

use std::collections::HashMap;

use image::RgbaImage;
use rayon::prelude::*;

use crate::error::{EngineError, Result};
use crate::render::backend::{BackendKind, BlurDirection, DeviceLimits, RenderBackend};
use crate::render::ops::{self, FinalInputs, GlobalInputs};
use crate::render::params::{FinalParams, GlobalParams, GlowParams};
use crate::render::plane::{quantize, Plane};
use crate::render::source::GrainTexture;
use crate::render::targets::{Region, Slot, TargetSizes};
use crate::state::{CubeLut, Mask, ToneCurveLut};

const DEFAULT_MAX_DIM: u32 = 16384;

pub struct CpuBackend {
    source: Option<Plane>,
    curve: ToneCurveLut,
    lut: Option<CubeLut>,
    overlay: Option<Plane>,
    grain: GrainTexture,
    targets: HashMap<Slot, Plane>,
    sizes: Option<TargetSizes>,
    analysis_size: Option<u32>,
    max_texture_dim: u32,
    /// Simulated memory ceiling for one target, in pixels
    pixel_budget: Option<u64>,
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuBackend {
    pub fn new() -> Self {
        Self {
            source: None,
            curve: ToneCurveLut::identity(),
            lut: None,
            overlay: None,
            grain: GrainTexture::generate(0),
            targets: HashMap::new(),
            sizes: None,
            analysis_size: None,
            max_texture_dim: DEFAULT_MAX_DIM,
            pixel_budget: None,
        }
    }

    /// Backend that reports `max_texture_dim` as its 2-D texture limit
    pub fn with_max_texture_dim(max_texture_dim: u32) -> Self {
        Self {
            max_texture_dim,
            ..Self::new()
        }
    }

    /// Backend whose target allocations fail above `pixels` per target
    pub fn with_pixel_budget(pixels: u64) -> Self {
        Self {
            pixel_budget: Some(pixels),
            ..Self::new()
        }
    }

    fn check_allocation(&self, what: &'static str, width: u32, height: u32) -> Result<()> {
        let too_large = width > self.max_texture_dim
            || height > self.max_texture_dim
            || self
                .pixel_budget
                .is_some_and(|budget| width as u64 * height as u64 > budget);
        if too_large || width == 0 || height == 0 {
            return Err(EngineError::ResourceExhausted {
                what,
                width,
                height,
            });
        }
        Ok(())
    }

    fn target(&self, slot: Slot) -> Result<&Plane> {
        self.targets
            .get(&slot)
            .ok_or(EngineError::MissingTarget(slot.label()))
    }

    fn take(&mut self, slot: Slot) -> Result<Plane> {
        self.targets
            .remove(&slot)
            .ok_or(EngineError::MissingTarget(slot.label()))
    }

    fn source(&self) -> Result<&Plane> {
        self.source.as_ref().ok_or(EngineError::NoSource)
    }
}

/// Evaluate `shade` for every pixel of `dst`, rows in parallel
fn run_pass<F>(dst: &mut Plane, display: bool, shade: F)
where
    F: Fn(u32, u32) -> [f32; 4] + Sync,
{
    let width = dst.width() as usize;
    dst.pixels_mut()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, px) in row.iter_mut().enumerate() {
                let value = shade(x as u32, y as u32);
                *px = if display {
                    value.map(|v| quantize(v) as f32 / 255.0)
                } else {
                    value
                };
            }
        });
}

impl RenderBackend for CpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    fn name(&self) -> String {
        format!("CPU ({} threads)", rayon::current_num_threads())
    }

    fn limits(&self) -> DeviceLimits {
        DeviceLimits {
            max_texture_dim: self.max_texture_dim,
            max_volume_dim: 256,
        }
    }

    fn upload_source(&mut self, image: &RgbaImage) -> Result<()> {
        self.check_allocation("source texture", image.width(), image.height())?;
        self.source = Some(Plane::from_rgba8(image));
        Ok(())
    }

    fn upload_curve(&mut self, curve: &ToneCurveLut) -> Result<()> {
        self.curve = curve.clone();
        Ok(())
    }

    fn upload_lut(&mut self, lut: Option<&CubeLut>) -> Result<()> {
        self.lut = lut.cloned();
        Ok(())
    }

    fn upload_overlay(&mut self, image: Option<&RgbaImage>) -> Result<()> {
        self.overlay = image.map(Plane::from_rgba8);
        Ok(())
    }

    fn upload_grain(&mut self, grain: &GrainTexture) -> Result<()> {
        self.grain = grain.clone();
        Ok(())
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
            if let Err(e) = self.check_allocation("render target", w, h) {
                self.release_targets();
                return Err(e);
            }
            self.targets.insert(slot, Plane::new(w, h));
        }
        tracing::debug!(width = sizes.width, height = sizes.height, "cpu targets allocated");
        self.sizes = Some(sizes);
        Ok(true)
    }

    fn ensure_analysis_target(&mut self, size: u32) -> Result<bool> {
        if self.analysis_size == Some(size) && self.targets.contains_key(&Slot::Analysis) {
            return Ok(false);
        }
        self.check_allocation("analysis target", size, size)?;
        self.targets.insert(Slot::Analysis, Plane::new(size, size));
        self.analysis_size = Some(size);
        Ok(true)
    }

    fn render_global(&mut self, params: &GlobalParams, dst: Slot) -> Result<()> {
        let mut out = self.take(dst)?;
        let result = (|| {
            let inputs = GlobalInputs {
                source: self.source()?,
                curve: Some(&self.curve),
                lut: self.lut.as_ref(),
                overlay: self.overlay.as_ref(),
            };
            let params = GlobalParams {
                width: out.width(),
                height: out.height(),
                ..params.clone()
            };
            run_pass(&mut out, dst.is_display(), |x, y| {
                ops::to_pixel(ops::global_pixel(&params, &inputs, x, y))
            });
            Ok(())
        })();
        self.targets.insert(dst, out);
        result
    }

    fn render_mask(&mut self, mask: &Mask, dst: Slot) -> Result<()> {
        let mut out = self.take(dst)?;
        let (w, h) = out.dimensions();
        let aspect = w as f32 / h as f32;
        run_pass(&mut out, dst.is_display(), |x, y| {
            let coverage = mask.coverage_at(ops::pixel_uv(x, y, w, h), aspect);
            [coverage, coverage, coverage, 1.0]
        });
        self.targets.insert(dst, out);
        Ok(())
    }

    fn composite_mask(&mut self, base: Slot, local: Slot, coverage: Slot, dst: Slot) -> Result<()> {
        let mut out = self.take(dst)?;
        let result = (|| {
            let base = self.target(base)?;
            let local = self.target(local)?;
            let coverage = self.target(coverage)?;
            let (w, h) = out.dimensions();
            run_pass(&mut out, dst.is_display(), |x, y| {
                let uv = ops::pixel_uv(x, y, w, h);
                let a = base.sample(uv);
                let b = local.sample(uv);
                let m = coverage.sample(uv)[0];
                [
                    a[0] + (b[0] - a[0]) * m,
                    a[1] + (b[1] - a[1]) * m,
                    a[2] + (b[2] - a[2]) * m,
                    1.0,
                ]
            });
            Ok(())
        })();
        self.targets.insert(dst, out);
        result
    }

    fn threshold(&mut self, params: &GlowParams, src: Slot, dst: Slot) -> Result<()> {
        let mut out = self.take(dst)?;
        let result = (|| {
            let src = self.target(src)?;
            let (w, h) = out.dimensions();
            run_pass(&mut out, false, |x, y| {
                let c = src.sample_rgb(ops::pixel_uv(x, y, w, h));
                ops::to_pixel(ops::threshold_pixel(params, c))
            });
            Ok(())
        })();
        self.targets.insert(dst, out);
        result
    }

    fn blur(&mut self, direction: BlurDirection, src: Slot, dst: Slot) -> Result<()> {
        let mut out = self.take(dst)?;
        let result = (|| {
            let src = self.target(src)?;
            let (w, h) = out.dimensions();
            let horizontal = direction == BlurDirection::Horizontal;
            run_pass(&mut out, false, |x, y| ops::blur_pixel(src, x, y, w, h, horizontal));
            Ok(())
        })();
        self.targets.insert(dst, out);
        result
    }

    fn render_final(
        &mut self,
        params: &FinalParams,
        base: Slot,
        glow: Option<Slot>,
        dst: Slot,
    ) -> Result<()> {
        let mut out = self.take(dst)?;
        let result = (|| {
            let glow = match glow {
                Some(slot) => Some(self.target(slot)?),
                None => None,
            };
            let inputs = FinalInputs {
                base: self.target(base)?,
                glow,
                source: self.source()?,
                grain: &self.grain,
            };
            let params = params.resized(out.width(), out.height());
            run_pass(&mut out, dst.is_display(), |x, y| {
                ops::to_pixel(ops::final_pixel(&params, &inputs, x, y))
            });
            Ok(())
        })();
        self.targets.insert(dst, out);
        result
    }

    fn read_region(&mut self, slot: Slot, region: Region) -> Result<Vec<u8>> {
        let plane = self.target(slot)?;
        if region.x + region.width > plane.width() || region.y + region.height > plane.height() {
            return Err(EngineError::ResourceExhausted {
                what: "readback region",
                width: region.width,
                height: region.height,
            });
        }
        Ok(plane.to_rgba8(region.x, region.y, region.width, region.height))
    }

    fn release_targets(&mut self) {
        self.targets.clear();
        self.sizes = None;
        self.analysis_size = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::render::params::{PassContext, ViewOptions};
    use crate::state::{AdjustmentState, MaskShape};
    use image::Rgba;

    fn backend_with_source(w: u32, h: u32) -> CpuBackend {
        let mut backend = CpuBackend::new();
        let image = RgbaImage::from_fn(w, h, |x, y| Rgba([(x * 7) as u8, (y * 11) as u8, 128, 255]));
        backend.upload_source(&image).unwrap();
        backend
            .ensure_targets(TargetSizes::new(w, h, &EngineConfig::default()))
            .unwrap();
        backend
    }

    #[test]
    fn test_ensure_targets_is_idempotent() {
        let mut backend = backend_with_source(32, 24);
        let sizes = TargetSizes::new(32, 24, &EngineConfig::default());
        assert!(!backend.ensure_targets(sizes).unwrap());
        assert!(backend
            .ensure_targets(TargetSizes::new(16, 12, &EngineConfig::default()))
            .unwrap());
        assert_eq!(backend.target(Slot::MainA).unwrap().dimensions(), (16, 12));
        assert_eq!(backend.target(Slot::Ping).unwrap().dimensions(), (64, 64));
    }

    #[test]
    fn test_allocation_failure_leaves_no_targets() {
        let mut backend = CpuBackend::with_pixel_budget(1000);
        let err = backend
            .ensure_targets(TargetSizes::new(100, 100, &EngineConfig::default()))
            .unwrap_err();
        assert!(matches!(err, EngineError::ResourceExhausted { .. }));
        assert!(backend.targets.is_empty());
    }

    #[test]
    fn test_global_then_final_reproduces_source() {
        let mut backend = backend_with_source(20, 10);
        let state = AdjustmentState::default();
        let ctx = PassContext {
            width: 20,
            height: 10,
            ..Default::default()
        };
        backend
            .render_global(&GlobalParams::new(&state, ctx), Slot::MainA)
            .unwrap();
        let params = FinalParams::new(&state, &ViewOptions::default(), 0.0, 20, 10);
        backend
            .render_final(&params, Slot::MainA, None, Slot::Frame)
            .unwrap();
        let bytes = backend.read_region(Slot::Frame, Region::full(20, 10)).unwrap();
        let expected = RgbaImage::from_fn(20, 10, |x, y| Rgba([(x * 7) as u8, (y * 11) as u8, 128, 255]));
        assert_eq!(bytes, expected.into_raw());
    }

    #[test]
    fn test_mask_composite_uses_coverage() {
        let mut backend = backend_with_source(16, 16);
        let ctx = PassContext {
            width: 16,
            height: 16,
            ..Default::default()
        };
        let base = AdjustmentState::default();
        let dark = AdjustmentState {
            exposure: -2.0,
            ..Default::default()
        };
        backend.render_global(&GlobalParams::new(&base, ctx), Slot::MainA).unwrap();
        backend.render_global(&GlobalParams::new(&dark, ctx), Slot::Local).unwrap();
        let mask = Mask::new(
            1,
            MaskShape::Radial {
                center: [0.5, 0.5],
                radius: 0.25,
            },
        );
        backend.render_mask(&mask, Slot::Mask).unwrap();
        backend
            .composite_mask(Slot::MainA, Slot::Local, Slot::Mask, Slot::MainB)
            .unwrap();

        let out = backend.target(Slot::MainB).unwrap();
        let before = backend.target(Slot::MainA).unwrap();
        // Center takes the local result, the corner keeps the base
        assert!(out.texel(8, 8)[0] < before.texel(8, 8)[0]);
        assert_eq!(out.texel(0, 0), before.texel(0, 0));
    }

    #[test]
    fn test_missing_target_is_an_error() {
        let mut backend = CpuBackend::new();
        let state = AdjustmentState::default();
        let err = backend
            .render_global(&GlobalParams::new(&state, PassContext::default()), Slot::MainA)
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingTarget("main-a")));
    }
}
