/// Per-pixel pass math for the CPU backend
///
/// Each `*_pixel` function evaluates one fragment of the matching WGSL
/// entry point in `gpu/shaders.rs`. Coordinates follow the GPU conventions:
/// pixel centers at half-integers, UV origin top-left, clamp-to-edge
/// bilinear sampling.

use cgmath::{vec2, InnerSpace};

use crate::color::{
    clamp01, fract, hash_noise, hsl_to_rgb, hue_color, luma601, luminance, max_component, mean,
    min_component, mix, mix3, modulate, rgb_to_hsl, smoothstep, splat, Rgb,
};
use crate::render::params::{
    AsciiParams, DitherParams, FinalParams, GlobalParams, GlowParams, GradeParams, GrainParams,
    OverlayParams, SelectiveParams,
};
use crate::render::plane::Plane;
use crate::render::source::GrainTexture;
use crate::state::adjustments::{
    AsciiPalette, BlendMode, DitherAlgorithm, GrainSource, GrainStock, PrintProfile, SpectralMode,
};
use crate::state::{CubeLut, ToneCurveLut};

/// 4x4 ordered-dither thresholds, row-major
pub const BAYER4: [f32; 16] = [
    0.0625, 0.5625, 0.1875, 0.6875, //
    0.8125, 0.3125, 0.9375, 0.4375, //
    0.25, 0.75, 0.125, 0.625, //
    1.0, 0.5, 0.875, 0.375,
];

/// Linear-sampled 9-tap Gaussian folded into 5 fetches
pub const BLUR_OFFSETS: [f32; 3] = [0.0, 1.384_615_4, 3.230_769_2];
pub const BLUR_WEIGHTS: [f32; 3] = [0.227_027_03, 0.316_216_2, 0.070_270_27];

const THRESHOLD_KNEE: f32 = 0.1;

/// HSL mixer band centers (hue 0..1) and falloff slopes
const HSL_BANDS: [(f32, f32); 8] = [
    (0.0, 12.0),
    (0.083, 12.0),
    (0.167, 12.0),
    (0.333, 6.0),
    (0.5, 6.0),
    (0.667, 6.0),
    (0.75, 12.0),
    (0.875, 8.0),
];

#[inline]
pub fn pixel_uv(x: u32, y: u32, width: u32, height: u32) -> [f32; 2] {
    [
        (x as f32 + 0.5) / width as f32,
        (y as f32 + 0.5) / height as f32,
    ]
}

#[inline]
pub fn to_pixel(c: Rgb) -> [f32; 4] {
    [c.x, c.y, c.z, 1.0]
}

/// Textures read by the global pass
pub struct GlobalInputs<'a> {
    pub source: &'a Plane,
    pub curve: Option<&'a ToneCurveLut>,
    pub lut: Option<&'a CubeLut>,
    pub overlay: Option<&'a Plane>,
}

pub fn global_pixel(p: &GlobalParams, inputs: &GlobalInputs<'_>, x: u32, y: u32) -> Rgb {
    let uv = pixel_uv(x, y, p.width, p.height);
    let texel = [1.0 / p.width as f32, 1.0 / p.height as f32];
    let at = |q: [f32; 2]| inputs.source.sample_rgb(p.geometry.source_uv(q));
    let fetch = |dx: f32, dy: f32| at([uv[0] + dx * texel[0], uv[1] + dy * texel[1]]);

    let center = fetch(0.0, 0.0);
    let mut c = center;
    if p.denoise > 0.0 {
        c = denoise(center, &fetch, p.denoise);
    }
    if p.sharpen > 0.0 {
        c = sharpen(c, center, &fetch, p.sharpen);
    }
    if p.curve {
        if let Some(curve) = inputs.curve {
            c = curve.apply(c);
        }
    }

    c = density(c, p.exposure, p.saturation);
    c = tone(c, p);
    c = dehaze(c, p.dehaze);
    c = clarity(c, p.clarity);
    c = white_balance(c, p.temperature, p.tint);
    c = vibrance(c, p.vibrance);
    if let Some(grade) = &p.grade {
        c = split_tone(c, grade);
    }
    if let Some(bands) = &p.hsl {
        c = hsl_mixer(c, bands);
    }
    if p.lut_opacity > 0.0 {
        if let Some(lut) = inputs.lut {
            c = mix3(c, lut.sample(c), p.lut_opacity);
        }
    }
    if let Some(ascii) = &p.ascii {
        c = ascii_glyph(ascii, uv, p.width, p.height, &at);
    }
    if let (Some(overlay), Some(texture)) = (&p.overlay, inputs.overlay) {
        c = blend_overlay(c, texture.sample_rgb(uv), overlay);
    }
    if let Some(selective) = &p.selective {
        c = selective_color(c, selective);
    }
    if p.aberration > 0.0 {
        c = aberration(c, uv, p.aberration, &at);
    }
    c = vignette(c, uv, p.vignette);
    c = fade(c, p.fade);
    c = rolloff(c, p.rolloff);
    if p.posterize > 0.0 {
        c = posterize(c, p.posterize);
    }
    c = spectral(c, p.spectral);
    clamp01(c)
}

/// 3x3 edge-aware bilateral filter mixed in by `amount`
fn denoise(center: Rgb, fetch: &impl Fn(f32, f32) -> Rgb, amount: f32) -> Rgb {
    let sigma_r = 0.02 + amount * 0.2;
    let mut sum = splat(0.0);
    let mut weight_sum = 0.0;
    for dy in -1..=1 {
        for dx in -1..=1 {
            let (fx, fy) = (dx as f32, dy as f32);
            let s = if dx == 0 && dy == 0 { center } else { fetch(fx, fy) };
            let diff = s - center;
            let spatial = (-(fx * fx + fy * fy) / 2.0).exp();
            let range = (-diff.dot(diff) / (2.0 * sigma_r * sigma_r)).exp();
            let w = spatial * range;
            sum += s * w;
            weight_sum += w;
        }
    }
    mix3(center, sum / weight_sum, amount)
}

fn sharpen(c: Rgb, center: Rgb, fetch: &impl Fn(f32, f32) -> Rgb, s: f32) -> Rgb {
    let mut sum = splat(0.0);
    for dy in -1..=1 {
        for dx in -1..=1 {
            if dx != 0 || dy != 0 {
                sum += fetch(dx as f32, dy as f32);
            }
        }
    }
    c + (center - sum / 8.0) * s
}

/// Subtractive density model: exposure and saturation act on dye density
fn density(c: Rgb, exposure: f32, saturation: f32) -> Rgb {
    if exposure == 0.0 && saturation == 0.0 {
        return c;
    }
    let mut cmy = splat(1.0) - c;
    cmy -= splat(exposure * 0.5);
    if saturation != 0.0 {
        let avg = splat(mean(cmy));
        cmy = avg + (cmy - avg) * (1.0 + saturation);
    }
    splat(1.0) - clamp01(cmy)
}

fn tone(mut c: Rgb, p: &GlobalParams) -> Rgb {
    if p.contrast != 0.0 {
        c = (c - splat(0.5)) * (1.0 + p.contrast) + splat(0.5);
    }
    if p.highlights == 0.0 && p.shadows == 0.0 && p.whites == 0.0 && p.blacks == 0.0 {
        return c;
    }
    let l = luminance(c);
    let weight = smoothstep(0.5, 1.0, l) * p.highlights
        + (1.0 - smoothstep(0.0, 0.5, l)) * p.shadows
        + smoothstep(0.75, 1.0, l) * p.whites
        + (1.0 - smoothstep(0.0, 0.25, l)) * p.blacks;
    c + c * weight
}

fn dehaze(c: Rgb, d: f32) -> Rgb {
    if d == 0.0 {
        return c;
    }
    let haze = min_component(c);
    let t = (1.0 - d * haze).max(0.1);
    let recovered = clamp01((c - splat(1.0 - t)) / t);
    mix3(c, recovered, d.abs())
}

fn clarity(c: Rgb, amount: f32) -> Rgb {
    if amount == 0.0 {
        return c;
    }
    let mask = 1.0 - (luminance(c) - 0.5).abs() * 2.0;
    let boost = amount * mask * mask * 0.5;
    (c - splat(0.5)) * (1.0 + boost) + splat(0.5)
}

fn white_balance(mut c: Rgb, temperature: f32, tint: f32) -> Rgb {
    c.x += temperature * 0.1;
    c.z -= temperature * 0.1;
    c.y -= tint * 0.1;
    c.x += tint * 0.05;
    c.z += tint * 0.05;
    c
}

fn vibrance(c: Rgb, v: f32) -> Rgb {
    if v == 0.0 {
        return c;
    }
    let avg = mean(c);
    let sat = 1.0 - (max_component(c) - avg);
    mix3(splat(avg), c, 1.0 + v * sat)
}

fn split_tone(mut c: Rgb, g: &GradeParams) -> Rgb {
    let l = luminance(c);
    let highlight = smoothstep(g.mid - 0.1, g.mid + 0.3, l);
    let shadow = 1.0 - smoothstep(g.mid - 0.3, g.mid + 0.1, l);
    let midtone = (1.0 - ((l - g.mid) / 0.5).powi(2)).max(0.0);
    c = mix3(c, modulate(c, g.highlight), highlight * g.highlight_amount);
    c = mix3(c, modulate(c, g.shadow), shadow * g.shadow_amount);
    mix3(c, modulate(c, g.midtone), midtone * g.midtone_amount)
}

fn hsl_mixer(c: Rgb, bands: &[[f32; 3]; 8]) -> Rgb {
    let mut hsl = rgb_to_hsl(clamp01(c));
    let h = hsl.x;
    let mut delta = [0.0f32; 3];
    for (i, ((center, slope), band)) in HSL_BANDS.iter().zip(bands).enumerate() {
        let mut weight = (1.0 - (h - center).abs() * slope).max(0.0);
        // Red wraps around the hue circle
        if i == 0 {
            weight += (1.0 - (h - 1.0).abs() * slope).max(0.0);
        }
        for k in 0..3 {
            delta[k] += band[k] * weight;
        }
    }
    hsl.x = fract(hsl.x + delta[0] / 360.0);
    hsl.y = (hsl.y * (1.0 + delta[1] / 100.0)).clamp(0.0, 1.0);
    hsl.z = (hsl.z * (1.0 + delta[2] / 100.0)).clamp(0.0, 1.0);
    hsl_to_rgb(hsl)
}

/// Whether glyph `level` (0..7) inks cell position `x` (0..2), `y` (0..4)
pub fn glyph_bit(level: i32, x: i32, y: i32) -> bool {
    match level {
        0 => false,
        // .
        1 => x == 1 && y == 4,
        // :
        2 => x == 1 && (y == 1 || y == 4),
        // ;
        3 => x == 1 && (y == 1 || y == 3 || y == 4),
        // +
        4 => (x == 1 && (1..=3).contains(&y)) || y == 2,
        // o
        5 => y >= 1 && (x != 1 || y == 1 || y == 4),
        // #
        6 => x == 1 || y == 1 || y == 3,
        _ => true,
    }
}

fn ascii_glyph(
    a: &AsciiParams,
    uv: [f32; 2],
    width: u32,
    height: u32,
    at: &impl Fn([f32; 2]) -> Rgb,
) -> Rgb {
    let grid = [
        a.density,
        (a.density * (height as f32 / width as f32) * 1.6).max(1.0),
    ];
    let gx = uv[0] * grid[0];
    let gy = uv[1] * grid[1];
    let cell_center = [(gx.floor() + 0.5) / grid[0], (gy.floor() + 0.5) / grid[1]];
    let source = clamp01(at(cell_center));
    let gray = luma601(source);
    let level = ((gray * 8.0) as i32).clamp(0, 7);

    let x = ((fract(gx) * 3.0) as i32).min(2);
    let y = ((fract(gy) * 5.0) as i32).min(4);
    if !glyph_bit(level, x, y) {
        return splat(0.0);
    }
    match a.palette {
        AsciiPalette::Source => source,
        AsciiPalette::Mono => splat(gray),
        AsciiPalette::Green => Rgb::new(0.2, 1.0, 0.3) * gray,
        AsciiPalette::Amber => Rgb::new(1.0, 0.7, 0.2) * gray,
    }
}

pub fn blend(base: Rgb, top: Rgb, mode: BlendMode) -> Rgb {
    match mode {
        BlendMode::Normal => top,
        BlendMode::Multiply => modulate(base, top),
        BlendMode::Screen => splat(1.0) - modulate(splat(1.0) - base, splat(1.0) - top),
        BlendMode::Overlay => {
            let channel = |b: f32, t: f32| {
                if b < 0.5 {
                    2.0 * b * t
                } else {
                    1.0 - 2.0 * (1.0 - b) * (1.0 - t)
                }
            };
            Rgb::new(
                channel(base.x, top.x),
                channel(base.y, top.y),
                channel(base.z, top.z),
            )
        }
    }
}

fn blend_overlay(c: Rgb, top: Rgb, o: &OverlayParams) -> Rgb {
    mix3(c, blend(c, top, o.blend), o.opacity)
}

fn selective_color(c: Rgb, s: &SelectiveParams) -> Rgb {
    let mut hsl = rgb_to_hsl(clamp01(c));
    let mut distance = (hsl.x * 360.0 - s.hue).abs();
    distance = distance.min(360.0 - distance);
    let wedge = if s.feather > 0.0 {
        1.0 - smoothstep(s.range, s.range + s.feather, distance)
    } else if distance <= s.range {
        1.0
    } else {
        0.0
    };
    // Neutrals carry no hue, so they sit outside every wedge
    let weight = wedge * smoothstep(0.0, 0.15, hsl.y);
    if weight <= 0.0 {
        return c;
    }
    hsl.y = (hsl.y * (1.0 + s.saturation * weight)).clamp(0.0, 1.0);
    hsl.z = (hsl.z * (1.0 + s.luminance * weight)).clamp(0.0, 1.0);
    hsl_to_rgb(hsl)
}

/// Radial red/blue fringing added on top of the processed color
fn aberration(mut c: Rgb, uv: [f32; 2], amount: f32, at: &impl Fn([f32; 2]) -> Rgb) -> Rgb {
    let d = vec2(uv[0] - 0.5, uv[1] - 0.5);
    let dist = d.magnitude() * 2.0;
    let s = amount * dist * dist;
    if s == 0.0 {
        return c;
    }
    let here = at(uv);
    let red = at([uv[0] - d.x * s, uv[1] - d.y * s]).x;
    let blue = at([uv[0] + d.x * s, uv[1] + d.y * s]).z;
    c.x += red - here.x;
    c.z += blue - here.z;
    c
}

fn vignette(c: Rgb, uv: [f32; 2], v: f32) -> Rgb {
    if v <= 0.0 {
        return c;
    }
    let dist = vec2(uv[0] - 0.5, uv[1] - 0.5).magnitude();
    c * (1.0 - smoothstep(0.3, 0.9, dist * v * 2.0))
}

fn fade(c: Rgb, f: f32) -> Rgb {
    if f <= 0.0 {
        return c;
    }
    c + (splat(1.0) - c) * f
}

fn shoulder(x: f32) -> f32 {
    if x > 0.8 {
        0.8 + 0.2 * ((x - 0.8) * 5.0).tanh()
    } else {
        x
    }
}

fn rolloff(c: Rgb, r: f32) -> Rgb {
    if r <= 0.0 {
        return c;
    }
    mix3(c, c.map(shoulder), r)
}

fn posterize(c: Rgb, levels: f32) -> Rgb {
    let n = levels - 1.0;
    clamp01(c).map(|v| (v * n).round() / n)
}

fn gradient(stops: &[Rgb], t: f32) -> Rgb {
    let scaled = t.clamp(0.0, 1.0) * (stops.len() - 1) as f32;
    let i = (scaled as usize).min(stops.len() - 2);
    mix3(stops[i], stops[i + 1], scaled - i as f32)
}

fn spectral(c: Rgb, mode: SpectralMode) -> Rgb {
    match mode {
        SpectralMode::Off => c,
        SpectralMode::Thermal => gradient(
            &[
                Rgb::new(0.0, 0.0, 0.0),
                Rgb::new(0.1, 0.0, 0.6),
                Rgb::new(0.8, 0.0, 0.6),
                Rgb::new(1.0, 0.5, 0.0),
                Rgb::new(1.0, 1.0, 0.7),
            ],
            luminance(clamp01(c)),
        ),
        SpectralMode::Infrared => {
            // Foliage reflects near-infrared, so green drives the key
            let key = 0.2 * c.x + 0.7 * c.y + 0.1 * c.z;
            gradient(
                &[
                    Rgb::new(0.05, 0.0, 0.15),
                    Rgb::new(0.85, 0.15, 0.35),
                    Rgb::new(1.0, 0.95, 0.9),
                ],
                key,
            )
        }
    }
}

/// Soft-knee highlight extraction for the glow chain
pub fn threshold_pixel(p: &GlowParams, c: Rgb) -> Rgb {
    let brightness = 0.7 * c.x + 0.2 * c.y + 0.1 * c.z;
    let threshold = p.threshold - p.mist * 0.3;
    let knee = THRESHOLD_KNEE;
    let soft = (brightness - threshold + knee).clamp(0.0, 2.0 * knee).powi(2) / (4.0 * knee + 1e-5);
    let contribution = soft.max(brightness - threshold) / brightness.max(1e-5);
    c * contribution + c * (p.mist * 0.05)
}

/// One direction of the separable Gaussian
pub fn blur_pixel(src: &Plane, x: u32, y: u32, width: u32, height: u32, horizontal: bool) -> [f32; 4] {
    let uv = pixel_uv(x, y, width, height);
    let step = if horizontal {
        [1.0 / width as f32, 0.0]
    } else {
        [0.0, 1.0 / height as f32]
    };
    let center = src.sample(uv);
    let mut out = center.map(|v| v * BLUR_WEIGHTS[0]);
    for i in 1..3 {
        let o = [step[0] * BLUR_OFFSETS[i], step[1] * BLUR_OFFSETS[i]];
        let a = src.sample([uv[0] + o[0], uv[1] + o[1]]);
        let b = src.sample([uv[0] - o[0], uv[1] - o[1]]);
        for k in 0..4 {
            out[k] += (a[k] + b[k]) * BLUR_WEIGHTS[i];
        }
    }
    out
}

/// Textures read by the final pass
pub struct FinalInputs<'a> {
    pub base: &'a Plane,
    pub glow: Option<&'a Plane>,
    pub source: &'a Plane,
    pub grain: &'a GrainTexture,
}

pub fn final_pixel(p: &FinalParams, inputs: &FinalInputs<'_>, x: u32, y: u32) -> Rgb {
    let uv = pixel_uv(x, y, p.width, p.height);
    let seed = p.film_seed;
    let mut c = inputs.base.sample_rgb(uv);

    if let (Some(glow), Some(texture)) = (&p.glow, inputs.glow) {
        c += modulate(texture.sample_rgb(uv), glow.tint) * glow.strength;
    }
    if let Some(grain) = &p.grain {
        c = apply_grain(c, grain, x, y, seed, inputs.grain);
    }
    c = light_leak(c, uv, p.light_leak, seed);
    c = scratches(c, uv, p.scratches, seed);
    c = dust(c, uv, p.dust, seed, p.width as f32 / p.height as f32);
    if let Some(print) = &p.print {
        c = print_stock(c, print);
    }
    if let Some(dither) = &p.dither {
        let neighbor = |dx: i64, dy: i64| {
            let [r, g, b, _] = inputs.base.sample(pixel_uv(
                (x as i64 + dx).clamp(0, p.width as i64 - 1) as u32,
                (y as i64 + dy).clamp(0, p.height as i64 - 1) as u32,
                p.width,
                p.height,
            ));
            Rgb::new(r, g, b)
        };
        c = apply_dither(c, dither, x, y, seed, &neighbor);
    }
    if let Some(border) = &p.border {
        if in_border(x, y, p.width, p.height, border.fraction) {
            c = border.color;
        }
    }
    if let Some(split) = p.split {
        let line = (split * p.width as f32).floor();
        let column = x as f32;
        if column == line {
            c = splat(1.0);
        } else if column < line {
            c = inputs.source.sample_rgb(p.geometry.source_uv(uv));
        }
    }
    if p.clipping {
        c = clipping(c);
    }
    clamp01(c)
}

/// Grain amplitude as a function of luminance
pub fn grain_response(stock: GrainStock, l: f32, shadow: f32, highlight: f32) -> f32 {
    match stock {
        GrainStock::Digital => mix(shadow, highlight, l),
        GrainStock::Negative => (1.0 - l.powf(2.5)) * shadow,
        GrainStock::Slide => 4.0 * l * (1.0 - l) * shadow.max(highlight),
    }
}

fn apply_grain(c: Rgb, g: &GrainParams, x: u32, y: u32, seed: f32, texture: &GrainTexture) -> Rgb {
    let l = luminance(clamp01(c));
    let intensity = grain_response(g.stock, l, g.shadow, g.highlight) * g.scale;
    if intensity <= 0.0 {
        return c;
    }
    let cx = ((x as f32 + 0.5) / g.size).floor();
    let cy = ((y as f32 + 0.5) / g.size).floor();
    let noise = match g.source {
        GrainSource::Procedural => hash_noise(cx + seed * 17.0, cy + seed * 31.0) - 0.5,
        GrainSource::Texture => texture.noise(cx as i64, cy as i64),
    };
    c + splat(noise * intensity)
}

fn light_leak(c: Rgb, uv: [f32; 2], amount: f32, seed: f32) -> Rgb {
    if amount <= 0.0 {
        return c;
    }
    let offset = (seed * 12.34).sin() * 0.5;
    let x = uv[0] + offset;
    let primary = (x * 2.0 + seed).sin() * (uv[1] * 1.5 + seed * 0.5).cos();
    let secondary = (uv[0] * 3.0 - seed).sin() * (uv[1] * 3.0 + seed).cos();
    let leak = smoothstep(0.6, 1.0, primary) + smoothstep(0.8, 1.0, secondary);
    let color = mix3(
        Rgb::new(1.0, 0.5, 0.2),
        Rgb::new(1.0, 0.2, 0.1),
        (seed * 10.0).sin() * 0.5 + 0.5,
    );
    c + color * (leak * amount)
}

fn scratches(c: Rgb, uv: [f32; 2], amount: f32, seed: f32) -> Rgb {
    if amount <= 0.0 {
        return c;
    }
    let column = ((uv[0] + seed * 13.59) * 300.0).floor();
    let line = smoothstep(0.995, 1.0, hash_noise(column, seed));
    let opacity = hash_noise(seed, column);
    c + splat(line * opacity * amount * 0.8)
}

fn dust(c: Rgb, uv: [f32; 2], amount: f32, seed: f32, aspect: f32) -> Rgb {
    if amount <= 0.0 {
        return c;
    }
    let gx = uv[0] * 60.0 * aspect;
    let gy = uv[1] * 60.0;
    let (cx, cy) = (gx.floor(), gy.floor());
    let h = hash_noise(cx + seed * 7.13, cy - seed * 3.7);
    if h < 1.0 - amount.min(1.0) * 0.08 {
        return c;
    }
    let center = vec2(
        0.25 + 0.5 * hash_noise(cy + seed, cx * 1.7),
        0.25 + 0.5 * hash_noise(cx * 2.3 - seed, cy + seed * 0.5),
    );
    let r = (vec2(fract(gx), fract(gy)) - center).magnitude();
    let radius = 0.04 + 0.08 * fract(h * 97.0);
    let speck = 1.0 - smoothstep(radius * 0.5, radius, r);
    c + splat(speck * (0.3 + 0.5 * amount.min(1.0)))
}

fn print_stock(c: Rgb, p: &PrintProfile) -> Rgb {
    let s_curve = clamp01(c).map(|v| v * v * (3.0 - 2.0 * v));
    let mut c = mix3(c, s_curve, p.contrast / 100.0);
    let l = luminance(c);
    c = mix3(splat(l), c, 1.0 + p.saturation / 100.0);
    let shadow = 1.0 - smoothstep(0.0, 0.5, l);
    let highlight = smoothstep(0.5, 1.0, l);
    c = mix3(c, modulate(c, hue_color(p.shadow_hue)), shadow * p.shadow_sat / 100.0);
    mix3(c, modulate(c, hue_color(p.highlight_hue)), highlight * p.highlight_sat / 100.0)
}

#[inline]
fn quantize_with(v: f32, threshold: f32, levels: f32) -> f32 {
    let n = levels - 1.0;
    (v.clamp(0.0, 1.0) * n + threshold).floor().min(n) / n
}

fn apply_dither(
    c: Rgb,
    d: &DitherParams,
    x: u32,
    y: u32,
    seed: f32,
    neighbor: &impl Fn(i64, i64) -> Rgb,
) -> Rgb {
    let bayer = BAYER4[(x % 4 + (y % 4) * 4) as usize];
    let levels = d.levels;
    let dithered = match d.algorithm {
        DitherAlgorithm::Bayer => {
            let t = bayer - 1.0 / 32.0;
            c.map(|v| quantize_with(v, t, levels))
        }
        DitherAlgorithm::Atkinson => {
            // Atkinson drops a quarter of the error, so thresholds cluster near 0.5
            let t = 0.5 + (bayer - 0.531_25) * 0.75;
            c.map(|v| quantize_with(v, t, levels))
        }
        DitherAlgorithm::Random => {
            let t = hash_noise(x as f32 + seed, y as f32 - seed);
            c.map(|v| quantize_with(v, t, levels))
        }
        DitherAlgorithm::ErrorEstimate => {
            // Floyd-Steinberg weights over the already-visited neighbors
            let taps: [(i64, i64, f32); 4] = [
                (-1, 0, 7.0 / 16.0),
                (-1, -1, 1.0 / 16.0),
                (0, -1, 5.0 / 16.0),
                (1, -1, 3.0 / 16.0),
            ];
            let mut error = splat(0.0);
            for (dx, dy, w) in taps {
                let n = clamp01(neighbor(dx, dy));
                error += (n - n.map(|v| quantize_with(v, 0.5, levels))) * w;
            }
            (c + error).map(|v| quantize_with(v, 0.5, levels))
        }
    };
    mix3(c, dithered, d.strength)
}

fn in_border(x: u32, y: u32, width: u32, height: u32, fraction: f32) -> bool {
    let size = (fraction * width.min(height) as f32).round();
    let (x, y) = (x as f32, y as f32);
    x < size || y < size || x >= width as f32 - size || y >= height as f32 - size
}

/// Clipped channels to pure red, crushed pixels to pure blue
pub fn clipping(c: Rgb) -> Rgb {
    if c.x >= 0.99 || c.y >= 0.99 || c.z >= 0.99 {
        Rgb::new(1.0, 0.0, 0.0)
    } else if c.x <= 0.01 && c.y <= 0.01 && c.z <= 0.01 {
        Rgb::new(0.0, 0.0, 1.0)
    } else {
        c
    }
}
