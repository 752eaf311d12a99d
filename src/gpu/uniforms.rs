/// GPU-side uniform layouts
///
/// Every field is a `vec4<f32>` so the `repr(C)` structs and the WGSL
/// structs in `shaders.rs` share one layout with no implicit padding.
/// Enums travel as float indices; disabled stages have their enable lane
/// set to zero.

use crate::color::{hue_color, to_array};
use crate::render::params::{FinalParams, Geometry, GlobalParams, GlowParams};
use crate::state::adjustments::{
    AsciiPalette, BlendMode, DitherAlgorithm, GrainSource, GrainStock, SpectralMode,
};
use crate::state::{CubeLut, Mask, MaskShape};

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GlobalUniforms {
    pub size: [f32; 4],
    pub geometry: [f32; 4],
    /// denoise, sharpen, curve enabled, lut opacity
    pub detail: [f32; 4],
    /// exposure, saturation, contrast, -
    pub density: [f32; 4],
    /// highlights, shadows, whites, blacks
    pub bands: [f32; 4],
    /// dehaze, clarity, vibrance, -
    pub presence: [f32; 4],
    /// temperature, tint, grade enabled, grade pivot
    pub balance: [f32; 4],
    pub grade_shadow: [f32; 4],
    pub grade_midtone: [f32; 4],
    pub grade_highlight: [f32; 4],
    pub hsl: [[f32; 4]; 8],
    /// hsl enabled, ascii density (0 = off), ascii palette, -
    pub toggles: [f32; 4],
    /// opacity (0 = off), blend mode, -, -
    pub overlay: [f32; 4],
    /// hue, range, feather (degrees), enabled
    pub selective: [f32; 4],
    /// saturation, luminance, -, -
    pub selective_amounts: [f32; 4],
    /// aberration, vignette, fade, rolloff
    pub effects: [f32; 4],
    /// posterize levels, spectral mode, -, -
    pub finish: [f32; 4],
    /// LUT input domain
    pub lut_min: [f32; 4],
    pub lut_max: [f32; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaskUniforms {
    /// kind (0 radial, 1 linear), invert, feather, aspect
    pub shape: [f32; 4],
    /// center or start, radius
    pub a: [f32; 4],
    /// end
    pub b: [f32; 4],
    pub size: [f32; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GlowUniforms {
    /// threshold, mist, -, -
    pub params: [f32; 4],
    pub size: [f32; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BlurUniforms {
    /// texel step along the blur axis
    pub step: [f32; 4],
    pub size: [f32; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FinalUniforms {
    pub size: [f32; 4],
    /// film seed, light leak, scratches, dust
    pub seed: [f32; 4],
    /// tint rgb, strength (0 = off)
    pub glow: [f32; 4],
    /// stock, source, shadow, highlight
    pub grain: [f32; 4],
    /// cell size, scale, enabled, -
    pub grain_scale: [f32; 4],
    /// enabled, contrast, saturation, -
    pub print_tone: [f32; 4],
    /// tint rgb, amount
    pub print_shadow: [f32; 4],
    pub print_highlight: [f32; 4],
    /// enabled, algorithm, levels, strength
    pub dither: [f32; 4],
    /// enabled, fraction, -, -
    pub border: [f32; 4],
    pub border_color: [f32; 4],
    /// split position (< 0 = off), clipping, -, -
    pub view: [f32; 4],
    pub geometry: [f32; 4],
}

fn flag(on: bool) -> f32 {
    if on {
        1.0
    } else {
        0.0
    }
}

fn size4(width: u32, height: u32) -> [f32; 4] {
    [
        width as f32,
        height as f32,
        1.0 / width.max(1) as f32,
        1.0 / height.max(1) as f32,
    ]
}

fn geometry4(g: &Geometry) -> [f32; 4] {
    [g.quarter_turns as f32, flag(g.flip_x), flag(g.flip_y), 0.0]
}

fn rgb4(rgb: [f32; 3], w: f32) -> [f32; 4] {
    [rgb[0], rgb[1], rgb[2], w]
}

fn palette_index(palette: AsciiPalette) -> f32 {
    match palette {
        AsciiPalette::Source => 0.0,
        AsciiPalette::Mono => 1.0,
        AsciiPalette::Green => 2.0,
        AsciiPalette::Amber => 3.0,
    }
}

fn blend_index(mode: BlendMode) -> f32 {
    match mode {
        BlendMode::Normal => 0.0,
        BlendMode::Multiply => 1.0,
        BlendMode::Screen => 2.0,
        BlendMode::Overlay => 3.0,
    }
}

fn spectral_index(mode: SpectralMode) -> f32 {
    match mode {
        SpectralMode::Off => 0.0,
        SpectralMode::Thermal => 1.0,
        SpectralMode::Infrared => 2.0,
    }
}

fn stock_index(stock: GrainStock) -> f32 {
    match stock {
        GrainStock::Digital => 0.0,
        GrainStock::Negative => 1.0,
        GrainStock::Slide => 2.0,
    }
}

fn grain_source_index(source: GrainSource) -> f32 {
    match source {
        GrainSource::Procedural => 0.0,
        GrainSource::Texture => 1.0,
    }
}

fn dither_index(algorithm: DitherAlgorithm) -> f32 {
    match algorithm {
        DitherAlgorithm::Bayer => 0.0,
        DitherAlgorithm::Atkinson => 1.0,
        DitherAlgorithm::ErrorEstimate => 2.0,
        DitherAlgorithm::Random => 3.0,
    }
}

impl From<&GlobalParams> for GlobalUniforms {
    fn from(p: &GlobalParams) -> Self {
        let (grade_on, mid, shadow, midtone, highlight) = match &p.grade {
            Some(g) => (
                1.0,
                g.mid,
                rgb4(to_array(g.shadow), g.shadow_amount),
                rgb4(to_array(g.midtone), g.midtone_amount),
                rgb4(to_array(g.highlight), g.highlight_amount),
            ),
            None => (0.0, 0.5, [0.0; 4], [0.0; 4], [0.0; 4]),
        };
        let mut hsl = [[0.0f32; 4]; 8];
        if let Some(bands) = &p.hsl {
            for (dst, band) in hsl.iter_mut().zip(bands) {
                *dst = rgb4(*band, 0.0);
            }
        }
        let (ascii_density, ascii_palette) = p
            .ascii
            .map(|a| (a.density, palette_index(a.palette)))
            .unwrap_or((0.0, 0.0));
        let overlay = p
            .overlay
            .map(|o| [o.opacity, blend_index(o.blend), 0.0, 0.0])
            .unwrap_or([0.0; 4]);
        let (selective, selective_amounts) = match &p.selective {
            Some(s) => (
                [s.hue, s.range, s.feather, 1.0],
                [s.saturation, s.luminance, 0.0, 0.0],
            ),
            None => ([0.0; 4], [0.0; 4]),
        };

        Self {
            size: size4(p.width, p.height),
            geometry: geometry4(&p.geometry),
            detail: [p.denoise, p.sharpen, flag(p.curve), p.lut_opacity],
            density: [p.exposure, p.saturation, p.contrast, 0.0],
            bands: [p.highlights, p.shadows, p.whites, p.blacks],
            presence: [p.dehaze, p.clarity, p.vibrance, 0.0],
            balance: [p.temperature, p.tint, grade_on, mid],
            grade_shadow: shadow,
            grade_midtone: midtone,
            grade_highlight: highlight,
            hsl,
            toggles: [flag(p.hsl.is_some()), ascii_density, ascii_palette, 0.0],
            overlay,
            selective,
            selective_amounts,
            effects: [p.aberration, p.vignette, p.fade, p.rolloff],
            finish: [p.posterize, spectral_index(p.spectral), 0.0, 0.0],
            lut_min: [0.0; 4],
            lut_max: [1.0; 4],
        }
    }
}

impl GlobalUniforms {
    pub fn with_lut_domain(mut self, lut: Option<&CubeLut>) -> Self {
        if let Some(lut) = lut {
            self.lut_min = rgb4(lut.domain_min, 0.0);
            self.lut_max = rgb4(lut.domain_max, 1.0);
        }
        self
    }
}

impl MaskUniforms {
    pub fn new(mask: &Mask, width: u32, height: u32) -> Self {
        let (kind, a, b) = match mask.shape {
            MaskShape::Radial { center, radius } => {
                (0.0, [center[0], center[1], radius, 0.0], [0.0; 4])
            }
            MaskShape::Linear { start, end } => (
                1.0,
                [start[0], start[1], 0.0, 0.0],
                [end[0], end[1], 0.0, 0.0],
            ),
        };
        Self {
            shape: [
                kind,
                flag(mask.invert),
                mask.feather,
                width as f32 / height.max(1) as f32,
            ],
            a,
            b,
            size: size4(width, height),
        }
    }
}

impl GlowUniforms {
    pub fn new(p: &GlowParams, width: u32, height: u32) -> Self {
        Self {
            params: [p.threshold, p.mist, 0.0, 0.0],
            size: size4(width, height),
        }
    }
}

impl BlurUniforms {
    pub fn new(horizontal: bool, width: u32, height: u32) -> Self {
        let size = size4(width, height);
        let step = if horizontal {
            [size[2], 0.0, 0.0, 0.0]
        } else {
            [0.0, size[3], 0.0, 0.0]
        };
        Self { step, size }
    }
}

impl From<&FinalParams> for FinalUniforms {
    fn from(p: &FinalParams) -> Self {
        let glow = p
            .glow
            .map(|g| rgb4(to_array(g.tint), g.strength))
            .unwrap_or([0.0; 4]);
        let (grain, grain_scale) = match &p.grain {
            Some(g) => (
                [
                    stock_index(g.stock),
                    grain_source_index(g.source),
                    g.shadow,
                    g.highlight,
                ],
                [g.size, g.scale, 1.0, 0.0],
            ),
            None => ([0.0; 4], [1.0, 0.0, 0.0, 0.0]),
        };
        let (print_tone, print_shadow, print_highlight) = match &p.print {
            Some(profile) => (
                [1.0, profile.contrast / 100.0, profile.saturation / 100.0, 0.0],
                rgb4(to_array(hue_color(profile.shadow_hue)), profile.shadow_sat / 100.0),
                rgb4(
                    to_array(hue_color(profile.highlight_hue)),
                    profile.highlight_sat / 100.0,
                ),
            ),
            None => ([0.0; 4], [0.0; 4], [0.0; 4]),
        };
        let dither = p
            .dither
            .map(|d| [1.0, dither_index(d.algorithm), d.levels, d.strength])
            .unwrap_or([0.0; 4]);
        let (border, border_color) = match &p.border {
            Some(b) => ([1.0, b.fraction, 0.0, 0.0], rgb4(to_array(b.color), 1.0)),
            None => ([0.0; 4], [0.0; 4]),
        };

        Self {
            size: size4(p.width, p.height),
            seed: [p.film_seed, p.light_leak, p.scratches, p.dust],
            glow,
            grain,
            grain_scale,
            print_tone,
            print_shadow,
            print_highlight,
            dither,
            border,
            border_color,
            view: [p.split.unwrap_or(-1.0), flag(p.clipping), 0.0, 0.0],
            geometry: geometry4(&p.geometry),
        }
    }
}
