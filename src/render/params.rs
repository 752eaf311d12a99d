/// Typed per-pass parameters
///
/// `AdjustmentState` is stored on human scales. Each pass gets a small
/// struct here with every amount already divided down and every optional
/// stage folded into an `Option`, so both backends see identical inputs
/// and gating decisions live in one place.

use serde::{Deserialize, Serialize};

use crate::color::{hue_color, splat, Rgb};
use crate::state::adjustments::{
    AdjustmentState, AsciiPalette, BlendMode, DitherAlgorithm, GrainSource, GrainStock,
    PrintProfile, SpectralMode,
};

/// Display-only switches that never enter history or presets
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct ViewOptions {
    /// Before/after divider as a fraction of the frame width
    pub split_position: Option<f32>,
    /// Paint clipped highlights red and crushed shadows blue
    pub show_clipping: bool,
    /// Show the source with geometry only
    pub show_original: bool,
}

/// Quarter turns and mirroring, applied to sampling coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
    pub quarter_turns: u8,
    pub flip_x: bool,
    pub flip_y: bool,
}

impl Geometry {
    pub fn from_state(state: &AdjustmentState) -> Self {
        Self {
            quarter_turns: state.rotate_quarters % 4,
            flip_x: state.flip_x,
            flip_y: state.flip_y,
        }
    }

    pub fn swaps_axes(&self) -> bool {
        self.quarter_turns % 2 == 1
    }

    /// Output frame dimensions for a source of `width x height`
    pub fn output_size(&self, width: u32, height: u32) -> (u32, u32) {
        if self.swaps_axes() {
            (height, width)
        } else {
            (width, height)
        }
    }

    /// Source dimensions that produce an output of `width x height`
    pub fn source_size(&self, width: u32, height: u32) -> (u32, u32) {
        self.output_size(width, height)
    }

    /// Map an output UV to the source UV it shows.
    ///
    /// Output is the source turned clockwise `quarter_turns` times, then
    /// mirrored; this undoes the mirror, then each turn.
    pub fn source_uv(&self, uv: [f32; 2]) -> [f32; 2] {
        let [mut u, mut v] = uv;
        if self.flip_x {
            u = 1.0 - u;
        }
        if self.flip_y {
            v = 1.0 - v;
        }
        for _ in 0..self.quarter_turns % 4 {
            (u, v) = (v, 1.0 - u);
        }
        [u, v]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradeParams {
    /// Luminance pivot shifted by the balance slider
    pub mid: f32,
    pub shadow: Rgb,
    pub shadow_amount: f32,
    pub midtone: Rgb,
    pub midtone_amount: f32,
    pub highlight: Rgb,
    pub highlight_amount: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AsciiParams {
    /// Glyph columns across the frame
    pub density: f32,
    pub palette: AsciiPalette,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayParams {
    pub opacity: f32,
    pub blend: BlendMode,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectiveParams {
    /// Target hue, range and feather in degrees
    pub hue: f32,
    pub range: f32,
    pub feather: f32,
    pub saturation: f32,
    pub luminance: f32,
}

/// What the renderer has loaded besides the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PassContext {
    pub width: u32,
    pub height: u32,
    pub curve: bool,
    pub lut: bool,
    pub overlay: bool,
}

/// Inputs of the global adjustment pass
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalParams {
    pub width: u32,
    pub height: u32,
    pub geometry: Geometry,
    /// Bilateral mix, 0..1
    pub denoise: f32,
    pub sharpen: f32,
    pub curve: bool,
    pub exposure: f32,
    pub saturation: f32,
    pub contrast: f32,
    pub highlights: f32,
    pub shadows: f32,
    pub whites: f32,
    pub blacks: f32,
    pub dehaze: f32,
    pub clarity: f32,
    pub temperature: f32,
    pub tint: f32,
    pub vibrance: f32,
    pub grade: Option<GradeParams>,
    pub hsl: Option<[[f32; 3]; 8]>,
    /// Blend of the 3-D LUT, 0 when no LUT is loaded
    pub lut_opacity: f32,
    pub ascii: Option<AsciiParams>,
    pub overlay: Option<OverlayParams>,
    pub selective: Option<SelectiveParams>,
    pub aberration: f32,
    pub vignette: f32,
    pub fade: f32,
    pub rolloff: f32,
    /// Posterize levels, 0 when off
    pub posterize: f32,
    pub spectral: SpectralMode,
}

impl GlobalParams {
    pub fn new(state: &AdjustmentState, ctx: PassContext) -> Self {
        let any_grade = state.split_shadow_sat > 0.0
            || state.split_midtone_sat > 0.0
            || state.split_highlight_sat > 0.0;
        let grade = any_grade.then(|| GradeParams {
            mid: 0.5 + state.split_balance / 100.0 * 0.25,
            shadow: hue_color(state.split_shadow_hue),
            shadow_amount: state.split_shadow_sat.max(0.0) / 100.0 * 0.3,
            midtone: hue_color(state.split_midtone_hue),
            midtone_amount: state.split_midtone_sat.max(0.0) / 100.0 * 0.3,
            highlight: hue_color(state.split_highlight_hue),
            highlight_amount: state.split_highlight_sat.max(0.0) / 100.0 * 0.3,
        });

        let bands = state.hsl_bands();
        let hsl = bands.iter().flatten().any(|v| *v != 0.0).then_some(bands);

        let ascii = (state.ascii_size > 0.0).then(|| AsciiParams {
            density: (state.ascii_size * 100.0).max(10.0),
            palette: state.ascii_palette,
        });

        let overlay = (ctx.overlay && state.overlay_opacity > 0.0).then(|| OverlayParams {
            opacity: (state.overlay_opacity / 100.0).min(1.0),
            blend: state.overlay_blend,
        });

        let selective = (state.selective_saturation != 0.0 || state.selective_luminance != 0.0)
            .then(|| SelectiveParams {
                hue: state.selective_hue.rem_euclid(360.0),
                range: state.selective_range.max(0.0),
                feather: state.selective_feather.max(0.0),
                saturation: state.selective_saturation / 100.0,
                luminance: state.selective_luminance / 100.0,
            });

        let posterize = if state.posterize >= 2.0 {
            state.posterize.floor()
        } else {
            0.0
        };

        Self {
            width: ctx.width,
            height: ctx.height,
            geometry: Geometry::from_state(state),
            denoise: (state.denoise / 100.0).clamp(0.0, 1.0),
            sharpen: state.sharpness.max(0.0) / 100.0 * 2.0,
            curve: ctx.curve,
            exposure: state.exposure,
            saturation: state.saturation / 100.0,
            contrast: state.contrast / 100.0,
            highlights: state.highlights / 100.0,
            shadows: state.shadows / 100.0,
            whites: state.whites / 100.0,
            blacks: state.blacks / 100.0,
            dehaze: state.dehaze / 100.0,
            clarity: state.clarity / 100.0,
            temperature: state.temperature / 100.0,
            tint: state.tint / 100.0,
            vibrance: state.vibrance / 100.0,
            grade,
            hsl,
            lut_opacity: if ctx.lut {
                (state.lut_opacity / 100.0).clamp(0.0, 1.0)
            } else {
                0.0
            },
            ascii,
            overlay,
            selective,
            aberration: state.chromatic_aberration.max(0.0) / 100.0 * 0.02,
            vignette: state.vignette.max(0.0) / 100.0,
            fade: state.fade.max(0.0) / 100.0 * 0.3,
            rolloff: (state.rolloff / 100.0).clamp(0.0, 1.0),
            posterize,
            spectral: state.spectral,
        }
    }
}

/// Threshold and composite settings of the glow chain
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlowParams {
    pub threshold: f32,
    pub mist: f32,
    pub strength: f32,
    pub tint: Rgb,
}

impl GlowParams {
    /// Bloom wins the threshold and tint; halation alone uses a fixed
    /// threshold and its own tint. `None` skips the whole chain.
    pub fn select(state: &AdjustmentState) -> Option<Self> {
        let mist = state.mist.max(0.0) / 100.0;
        if state.bloom_strength > 0.0 {
            let strength = if state.halation > 0.0 {
                state.bloom_strength.max(state.halation)
            } else {
                state.bloom_strength
            };
            Some(Self {
                threshold: state.bloom_threshold / 100.0,
                mist,
                strength: strength / 100.0,
                tint: splat(1.0),
            })
        } else if state.halation > 0.0 {
            let [r, g, b] = state.halation_tint;
            Some(Self {
                threshold: 0.7,
                mist,
                strength: state.halation / 100.0,
                tint: Rgb::new(r, g, b),
            })
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrainParams {
    pub stock: GrainStock,
    pub source: GrainSource,
    pub shadow: f32,
    pub highlight: f32,
    /// Grain cell edge in output pixels
    pub size: f32,
    /// `grainGlobal * 0.002`
    pub scale: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DitherParams {
    pub algorithm: DitherAlgorithm,
    /// Quantization levels per channel, `2^depth`
    pub levels: f32,
    pub strength: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BorderParams {
    /// Frame width as a fraction of the shorter edge
    pub fraction: f32,
    pub color: Rgb,
}

/// Inputs of the final composite pass
#[derive(Debug, Clone, PartialEq)]
pub struct FinalParams {
    pub width: u32,
    pub height: u32,
    pub film_seed: f32,
    pub glow: Option<GlowParams>,
    pub grain: Option<GrainParams>,
    pub light_leak: f32,
    pub scratches: f32,
    pub dust: f32,
    pub print: Option<PrintProfile>,
    pub dither: Option<DitherParams>,
    pub border: Option<BorderParams>,
    pub split: Option<f32>,
    pub geometry: Geometry,
    pub clipping: bool,
}

impl FinalParams {
    pub fn new(
        state: &AdjustmentState,
        view: &ViewOptions,
        film_seed: f32,
        width: u32,
        height: u32,
    ) -> Self {
        let grain_active = state.grain_global > 0.0
            && (state.grain_shadow > 0.0 || state.grain_highlight > 0.0);
        let grain = grain_active.then(|| GrainParams {
            stock: state.grain_stock,
            source: state.grain_source,
            shadow: state.grain_shadow.max(0.0),
            highlight: state.grain_highlight.max(0.0),
            size: if state.grain_size > 0.1 { state.grain_size } else { 1.0 },
            scale: state.grain_global * 0.002,
        });

        let dither = (state.dither_strength > 0.0).then(|| DitherParams {
            algorithm: state.dither_algorithm,
            levels: 2f32.powi(state.dither_depth.round().clamp(1.0, 8.0) as i32),
            strength: (state.dither_strength / 100.0).min(1.0),
        });

        let border = (state.border_size > 0.0).then(|| {
            let [r, g, b] = state.border_color;
            BorderParams {
                fraction: state.border_size / 100.0 * 0.1,
                color: Rgb::new(r, g, b),
            }
        });

        Self {
            width,
            height,
            film_seed,
            glow: GlowParams::select(state),
            grain,
            light_leak: state.light_leak.max(0.0) / 100.0,
            scratches: state.scratches.max(0.0) / 100.0,
            dust: state.dust.max(0.0) / 100.0,
            print: state.output_transform.profile(),
            dither,
            border,
            split: view.split_position.map(|s| s.clamp(0.0, 1.0)),
            geometry: Geometry::from_state(state),
            clipping: view.show_clipping,
        }
    }

    /// Same settings at a different output size
    pub fn resized(&self, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_geometry_quarter_turn() {
        let geometry = Geometry {
            quarter_turns: 1,
            ..Default::default()
        };
        assert_eq!(geometry.output_size(400, 300), (300, 400));
        // Top-right of the output shows the source's top-left
        let [u, v] = geometry.source_uv([1.0, 0.0]);
        assert_abs_diff_eq!(u, 0.0);
        assert_abs_diff_eq!(v, 0.0);
        // Four turns are the identity
        let full = Geometry {
            quarter_turns: 4,
            ..Default::default()
        };
        assert_eq!(full.source_uv([0.2, 0.7]), [0.2, 0.7]);
    }

    #[test]
    fn test_geometry_flip() {
        let geometry = Geometry {
            flip_x: true,
            ..Default::default()
        };
        assert_eq!(geometry.source_uv([0.25, 0.5]), [0.75, 0.5]);
        assert_eq!(geometry.output_size(40, 30), (40, 30));
    }

    #[test]
    fn test_glow_selection() {
        let mut state = AdjustmentState::default();
        assert!(GlowParams::select(&state).is_none());

        state.halation = 40.0;
        let halation = GlowParams::select(&state).unwrap();
        assert_abs_diff_eq!(halation.threshold, 0.7);
        assert_abs_diff_eq!(halation.strength, 0.4);
        assert_eq!(halation.tint, Rgb::new(1.0, 0.4, 0.6));

        state.bloom_strength = 25.0;
        state.bloom_threshold = 60.0;
        let bloom = GlowParams::select(&state).unwrap();
        assert_abs_diff_eq!(bloom.threshold, 0.6);
        assert_abs_diff_eq!(bloom.strength, 0.4);
        assert_eq!(bloom.tint, splat(1.0));
    }

    #[test]
    fn test_default_state_gates_every_optional_stage() {
        let state = AdjustmentState::default();
        let ctx = PassContext {
            width: 64,
            height: 48,
            curve: false,
            lut: true,
            overlay: true,
        };
        let global = GlobalParams::new(&state, ctx);
        assert!(global.grade.is_none());
        assert!(global.hsl.is_none());
        assert!(global.ascii.is_none());
        assert!(global.overlay.is_none());
        assert!(global.selective.is_none());
        assert_eq!(global.posterize, 0.0);
        // A loaded LUT is active at the default opacity
        assert_eq!(global.lut_opacity, 1.0);

        let fin = FinalParams::new(&state, &ViewOptions::default(), 12.0, 64, 48);
        assert!(fin.glow.is_none());
        assert!(fin.grain.is_none());
        assert!(fin.dither.is_none());
        assert!(fin.border.is_none());
        assert!(fin.print.is_none());
        assert!(fin.split.is_none());
    }

    #[test]
    fn test_dither_levels_from_depth() {
        let state = AdjustmentState {
            dither_strength: 50.0,
            dither_depth: 3.0,
            ..Default::default()
        };
        let fin = FinalParams::new(&state, &ViewOptions::default(), 0.0, 8, 8);
        let dither = fin.dither.unwrap();
        assert_eq!(dither.levels, 8.0);
        assert_abs_diff_eq!(dither.strength, 0.5);
    }
}
