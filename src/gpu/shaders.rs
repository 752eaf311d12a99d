/// WGSL sources for the render graph
///
/// Every pass shares `COMMON` (full-screen triangle plus color helpers) and
/// appends its own fragment stage. The math mirrors `render/ops.rs`; when
/// one side changes the other has to follow.
///
/// All sampling goes through `textureSampleLevel` so branches on per-pixel
/// values stay legal.

/// Full-screen triangle and shared color math
pub const COMMON: &str = r#"
struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) tex_coords: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    var output: VertexOutput;
    let x = f32(i32(vertex_index & 1u) * 4 - 1);
    let y = f32(i32(vertex_index >> 1u) * 4 - 1);
    output.clip_position = vec4<f32>(x, -y, 0.0, 1.0);
    output.tex_coords = vec2<f32>((x + 1.0) * 0.5, (y + 1.0) * 0.5);
    return output;
}

const REC709: vec3<f32> = vec3<f32>(0.2126, 0.7152, 0.0722);
const REC601: vec3<f32> = vec3<f32>(0.299, 0.587, 0.114);

fn luminance(c: vec3<f32>) -> f32 {
    return dot(c, REC709);
}

fn clamp01(c: vec3<f32>) -> vec3<f32> {
    return clamp(c, vec3<f32>(0.0), vec3<f32>(1.0));
}

fn mix3(a: vec3<f32>, b: vec3<f32>, t: f32) -> vec3<f32> {
    return a * (1.0 - t) + b * t;
}

fn hash_noise(x: f32, y: f32) -> f32 {
    return fract(sin(x * 12.9898 + y * 78.233) * 43758.547);
}

fn rgb_to_hsl(c: vec3<f32>) -> vec3<f32> {
    let max_c = max(c.r, max(c.g, c.b));
    let min_c = min(c.r, min(c.g, c.b));
    let l = (max_c + min_c) * 0.5;
    if (max_c == min_c) {
        return vec3<f32>(0.0, 0.0, l);
    }
    let d = max_c - min_c;
    var s: f32;
    if (l > 0.5) {
        s = d / (2.0 - max_c - min_c);
    } else {
        s = d / (max_c + min_c);
    }
    var h: f32;
    if (max_c == c.r) {
        h = (c.g - c.b) / d;
        if (c.g < c.b) {
            h = h + 6.0;
        }
    } else if (max_c == c.g) {
        h = (c.b - c.r) / d + 2.0;
    } else {
        h = (c.r - c.g) / d + 4.0;
    }
    return vec3<f32>(h / 6.0, s, l);
}

fn hue_to_channel(p: f32, q: f32, t_in: f32) -> f32 {
    var t = t_in;
    if (t < 0.0) {
        t = t + 1.0;
    }
    if (t > 1.0) {
        t = t - 1.0;
    }
    if (t < 1.0 / 6.0) {
        return p + (q - p) * 6.0 * t;
    }
    if (t < 0.5) {
        return q;
    }
    if (t < 2.0 / 3.0) {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    return p;
}

fn hsl_to_rgb(hsl: vec3<f32>) -> vec3<f32> {
    if (hsl.y == 0.0) {
        return vec3<f32>(hsl.z);
    }
    var q: f32;
    if (hsl.z < 0.5) {
        q = hsl.z * (1.0 + hsl.y);
    } else {
        q = hsl.z + hsl.y - hsl.z * hsl.y;
    }
    let p = 2.0 * hsl.z - q;
    return vec3<f32>(
        hue_to_channel(p, q, hsl.x + 1.0 / 3.0),
        hue_to_channel(p, q, hsl.x),
        hue_to_channel(p, q, hsl.x - 1.0 / 3.0),
    );
}

// Undo the output mirror, then each clockwise quarter turn
fn source_uv(uv: vec2<f32>, geometry: vec4<f32>) -> vec2<f32> {
    var u = uv.x;
    var v = uv.y;
    if (geometry.y > 0.5) {
        u = 1.0 - u;
    }
    if (geometry.z > 0.5) {
        v = 1.0 - v;
    }
    let turns = u32(geometry.x + 0.5) % 4u;
    for (var i = 0u; i < turns; i = i + 1u) {
        let t = u;
        u = v;
        v = 1.0 - t;
    }
    return vec2<f32>(u, v);
}
"#;

pub const GLOBAL: &str = r#"
struct GlobalUniforms {
    size: vec4<f32>,
    geometry: vec4<f32>,
    detail: vec4<f32>,
    density: vec4<f32>,
    bands: vec4<f32>,
    presence: vec4<f32>,
    balance: vec4<f32>,
    grade_shadow: vec4<f32>,
    grade_midtone: vec4<f32>,
    grade_highlight: vec4<f32>,
    hsl: array<vec4<f32>, 8>,
    toggles: vec4<f32>,
    overlay: vec4<f32>,
    selective: vec4<f32>,
    selective_amounts: vec4<f32>,
    effects: vec4<f32>,
    finish: vec4<f32>,
    lut_min: vec4<f32>,
    lut_max: vec4<f32>,
}

@group(0) @binding(0) var source_tex: texture_2d<f32>;
@group(0) @binding(1) var linear_sampler: sampler;
@group(0) @binding(2) var<uniform> params: GlobalUniforms;
@group(0) @binding(3) var curve_tex: texture_2d<f32>;
@group(0) @binding(4) var lut_tex: texture_3d<f32>;
@group(0) @binding(5) var overlay_tex: texture_2d<f32>;

fn sample_at(q: vec2<f32>) -> vec3<f32> {
    return textureSampleLevel(source_tex, linear_sampler, source_uv(q, params.geometry), 0.0).rgb;
}

fn fetch(uv: vec2<f32>, dx: f32, dy: f32) -> vec3<f32> {
    return sample_at(uv + vec2<f32>(dx, dy) * params.size.zw);
}

fn denoise(uv: vec2<f32>, center: vec3<f32>, amount: f32) -> vec3<f32> {
    let sigma_r = 0.02 + amount * 0.2;
    var sum = vec3<f32>(0.0);
    var weight_sum = 0.0;
    for (var dy = -1; dy <= 1; dy = dy + 1) {
        for (var dx = -1; dx <= 1; dx = dx + 1) {
            let fx = f32(dx);
            let fy = f32(dy);
            var s = center;
            if (dx != 0 || dy != 0) {
                s = fetch(uv, fx, fy);
            }
            let diff = s - center;
            let spatial = exp(-(fx * fx + fy * fy) / 2.0);
            let range = exp(-dot(diff, diff) / (2.0 * sigma_r * sigma_r));
            let w = spatial * range;
            sum = sum + s * w;
            weight_sum = weight_sum + w;
        }
    }
    return mix3(center, sum / weight_sum, amount);
}

fn sharpen(c: vec3<f32>, uv: vec2<f32>, center: vec3<f32>, s: f32) -> vec3<f32> {
    var sum = vec3<f32>(0.0);
    for (var dy = -1; dy <= 1; dy = dy + 1) {
        for (var dx = -1; dx <= 1; dx = dx + 1) {
            if (dx != 0 || dy != 0) {
                sum = sum + fetch(uv, f32(dx), f32(dy));
            }
        }
    }
    return c + (center - sum / 8.0) * s;
}

fn curve_lookup(row: i32, v: f32) -> f32 {
    let pos = clamp(v, 0.0, 1.0) * 255.0;
    let i0 = min(i32(floor(pos)), 255);
    let i1 = min(i0 + 1, 255);
    let f = pos - f32(i0);
    let a = textureLoad(curve_tex, vec2<i32>(i0, row), 0).r;
    let b = textureLoad(curve_tex, vec2<i32>(i1, row), 0).r;
    return a + (b - a) * f;
}

fn apply_curve(c: vec3<f32>) -> vec3<f32> {
    let m = vec3<f32>(curve_lookup(0, c.r), curve_lookup(0, c.g), curve_lookup(0, c.b));
    return vec3<f32>(curve_lookup(1, m.r), curve_lookup(2, m.g), curve_lookup(3, m.b));
}

fn density(c: vec3<f32>, exposure: f32, saturation: f32) -> vec3<f32> {
    if (exposure == 0.0 && saturation == 0.0) {
        return c;
    }
    var cmy = vec3<f32>(1.0) - c;
    cmy = cmy - vec3<f32>(exposure * 0.5);
    if (saturation != 0.0) {
        let avg = vec3<f32>((cmy.r + cmy.g + cmy.b) / 3.0);
        cmy = avg + (cmy - avg) * (1.0 + saturation);
    }
    return vec3<f32>(1.0) - clamp01(cmy);
}

fn tone(c_in: vec3<f32>) -> vec3<f32> {
    var c = c_in;
    let contrast = params.density.z;
    if (contrast != 0.0) {
        c = (c - vec3<f32>(0.5)) * (1.0 + contrast) + vec3<f32>(0.5);
    }
    let b = params.bands;
    if (b.x == 0.0 && b.y == 0.0 && b.z == 0.0 && b.w == 0.0) {
        return c;
    }
    let l = luminance(c);
    let weight = smoothstep(0.5, 1.0, l) * b.x
        + (1.0 - smoothstep(0.0, 0.5, l)) * b.y
        + smoothstep(0.75, 1.0, l) * b.z
        + (1.0 - smoothstep(0.0, 0.25, l)) * b.w;
    return c + c * weight;
}

fn dehaze(c: vec3<f32>, d: f32) -> vec3<f32> {
    if (d == 0.0) {
        return c;
    }
    let haze = min(c.r, min(c.g, c.b));
    let t = max(1.0 - d * haze, 0.1);
    let recovered = clamp01((c - vec3<f32>(1.0 - t)) / t);
    return mix3(c, recovered, abs(d));
}

fn clarity(c: vec3<f32>, amount: f32) -> vec3<f32> {
    if (amount == 0.0) {
        return c;
    }
    let mask = 1.0 - abs(luminance(c) - 0.5) * 2.0;
    let boost = amount * mask * mask * 0.5;
    return (c - vec3<f32>(0.5)) * (1.0 + boost) + vec3<f32>(0.5);
}

fn white_balance(c: vec3<f32>, temperature: f32, tint: f32) -> vec3<f32> {
    return vec3<f32>(
        c.r + temperature * 0.1 + tint * 0.05,
        c.g - tint * 0.1,
        c.b - temperature * 0.1 + tint * 0.05,
    );
}

fn vibrance(c: vec3<f32>, v: f32) -> vec3<f32> {
    if (v == 0.0) {
        return c;
    }
    let avg = (c.r + c.g + c.b) / 3.0;
    let sat = 1.0 - (max(c.r, max(c.g, c.b)) - avg);
    return mix3(vec3<f32>(avg), c, 1.0 + v * sat);
}

fn split_tone(c_in: vec3<f32>) -> vec3<f32> {
    var c = c_in;
    let mid = params.balance.w;
    let l = luminance(c);
    let highlight = smoothstep(mid - 0.1, mid + 0.3, l);
    let shadow = 1.0 - smoothstep(mid - 0.3, mid + 0.1, l);
    let k = (l - mid) / 0.5;
    let midtone = max(1.0 - k * k, 0.0);
    c = mix3(c, c * params.grade_highlight.rgb, highlight * params.grade_highlight.w);
    c = mix3(c, c * params.grade_shadow.rgb, shadow * params.grade_shadow.w);
    return mix3(c, c * params.grade_midtone.rgb, midtone * params.grade_midtone.w);
}

fn hsl_mixer(c: vec3<f32>) -> vec3<f32> {
    var centers = array<f32, 8>(0.0, 0.083, 0.167, 0.333, 0.5, 0.667, 0.75, 0.875);
    var slopes = array<f32, 8>(12.0, 12.0, 12.0, 6.0, 6.0, 6.0, 12.0, 8.0);
    var hsl = rgb_to_hsl(clamp01(c));
    let h = hsl.x;
    var delta = vec3<f32>(0.0);
    for (var i = 0; i < 8; i = i + 1) {
        var weight = max(1.0 - abs(h - centers[i]) * slopes[i], 0.0);
        if (i == 0) {
            weight = weight + max(1.0 - abs(h - 1.0) * slopes[i], 0.0);
        }
        delta = delta + params.hsl[i].xyz * weight;
    }
    hsl.x = fract(hsl.x + delta.x / 360.0);
    hsl.y = clamp(hsl.y * (1.0 + delta.y / 100.0), 0.0, 1.0);
    hsl.z = clamp(hsl.z * (1.0 + delta.z / 100.0), 0.0, 1.0);
    return hsl_to_rgb(hsl);
}

fn sample_lut(c: vec3<f32>) -> vec3<f32> {
    let span = params.lut_max.rgb - params.lut_min.rgb;
    let n = clamp01((c - params.lut_min.rgb) / span);
    let size = f32(textureDimensions(lut_tex).x);
    let coord = n * ((size - 1.0) / size) + vec3<f32>(0.5 / size);
    return textureSampleLevel(lut_tex, linear_sampler, coord, 0.0).rgb;
}

fn glyph_bit(level: i32, x: i32, y: i32) -> bool {
    if (level <= 0) {
        return false;
    }
    if (level == 1) {
        return x == 1 && y == 4;
    }
    if (level == 2) {
        return x == 1 && (y == 1 || y == 4);
    }
    if (level == 3) {
        return x == 1 && (y == 1 || y == 3 || y == 4);
    }
    if (level == 4) {
        return (x == 1 && y >= 1 && y <= 3) || y == 2;
    }
    if (level == 5) {
        return y >= 1 && (x != 1 || y == 1 || y == 4);
    }
    if (level == 6) {
        return x == 1 || y == 1 || y == 3;
    }
    return true;
}

fn ascii_glyph(uv: vec2<f32>) -> vec3<f32> {
    let density = params.toggles.y;
    let grid = vec2<f32>(density, max(density * (params.size.y / params.size.x) * 1.6, 1.0));
    let g = uv * grid;
    let cell_center = (floor(g) + vec2<f32>(0.5)) / grid;
    let source = clamp01(sample_at(cell_center));
    let gray = dot(source, REC601);
    let level = clamp(i32(gray * 8.0), 0, 7);
    let x = min(i32(fract(g.x) * 3.0), 2);
    let y = min(i32(fract(g.y) * 5.0), 4);
    if (!glyph_bit(level, x, y)) {
        return vec3<f32>(0.0);
    }
    let palette = i32(params.toggles.z + 0.5);
    if (palette == 1) {
        return vec3<f32>(gray);
    }
    if (palette == 2) {
        return vec3<f32>(0.2, 1.0, 0.3) * gray;
    }
    if (palette == 3) {
        return vec3<f32>(1.0, 0.7, 0.2) * gray;
    }
    return source;
}

fn overlay_channel(b: f32, t: f32) -> f32 {
    if (b < 0.5) {
        return 2.0 * b * t;
    }
    return 1.0 - 2.0 * (1.0 - b) * (1.0 - t);
}

fn blend(base: vec3<f32>, top: vec3<f32>, mode: i32) -> vec3<f32> {
    if (mode == 1) {
        return base * top;
    }
    if (mode == 2) {
        return vec3<f32>(1.0) - (vec3<f32>(1.0) - base) * (vec3<f32>(1.0) - top);
    }
    if (mode == 3) {
        return vec3<f32>(
            overlay_channel(base.r, top.r),
            overlay_channel(base.g, top.g),
            overlay_channel(base.b, top.b),
        );
    }
    return top;
}

fn selective_color(c: vec3<f32>) -> vec3<f32> {
    var hsl = rgb_to_hsl(clamp01(c));
    var distance = abs(hsl.x * 360.0 - params.selective.x);
    distance = min(distance, 360.0 - distance);
    let range = params.selective.y;
    let feather = params.selective.z;
    var wedge = 0.0;
    if (feather > 0.0) {
        wedge = 1.0 - smoothstep(range, range + feather, distance);
    } else if (distance <= range) {
        wedge = 1.0;
    }
    let weight = wedge * smoothstep(0.0, 0.15, hsl.y);
    if (weight <= 0.0) {
        return c;
    }
    hsl.y = clamp(hsl.y * (1.0 + params.selective_amounts.x * weight), 0.0, 1.0);
    hsl.z = clamp(hsl.z * (1.0 + params.selective_amounts.y * weight), 0.0, 1.0);
    return hsl_to_rgb(hsl);
}

fn aberration(c: vec3<f32>, uv: vec2<f32>, amount: f32) -> vec3<f32> {
    let d = uv - vec2<f32>(0.5);
    let dist = length(d) * 2.0;
    let s = amount * dist * dist;
    if (s == 0.0) {
        return c;
    }
    let here = sample_at(uv);
    let red = sample_at(uv - d * s).r;
    let blue = sample_at(uv + d * s).b;
    return vec3<f32>(c.r + red - here.r, c.g, c.b + blue - here.b);
}

fn vignette(c: vec3<f32>, uv: vec2<f32>, v: f32) -> vec3<f32> {
    if (v <= 0.0) {
        return c;
    }
    let dist = length(uv - vec2<f32>(0.5));
    return c * (1.0 - smoothstep(0.3, 0.9, dist * v * 2.0));
}

fn shoulder(x: f32) -> f32 {
    if (x > 0.8) {
        return 0.8 + 0.2 * tanh((x - 0.8) * 5.0);
    }
    return x;
}

fn rolloff(c: vec3<f32>, r: f32) -> vec3<f32> {
    if (r <= 0.0) {
        return c;
    }
    return mix3(c, vec3<f32>(shoulder(c.r), shoulder(c.g), shoulder(c.b)), r);
}

fn posterize(c: vec3<f32>, levels: f32) -> vec3<f32> {
    let n = levels - 1.0;
    return floor(clamp01(c) * n + vec3<f32>(0.5)) / n;
}

fn thermal(t: f32) -> vec3<f32> {
    var stops = array<vec3<f32>, 5>(
        vec3<f32>(0.0, 0.0, 0.0),
        vec3<f32>(0.1, 0.0, 0.6),
        vec3<f32>(0.8, 0.0, 0.6),
        vec3<f32>(1.0, 0.5, 0.0),
        vec3<f32>(1.0, 1.0, 0.7),
    );
    let scaled = clamp(t, 0.0, 1.0) * 4.0;
    let i = min(u32(scaled), 3u);
    return mix3(stops[i], stops[i + 1u], scaled - f32(i));
}

fn infrared(t: f32) -> vec3<f32> {
    var stops = array<vec3<f32>, 3>(
        vec3<f32>(0.05, 0.0, 0.15),
        vec3<f32>(0.85, 0.15, 0.35),
        vec3<f32>(1.0, 0.95, 0.9),
    );
    let scaled = clamp(t, 0.0, 1.0) * 2.0;
    let i = min(u32(scaled), 1u);
    return mix3(stops[i], stops[i + 1u], scaled - f32(i));
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let uv = input.clip_position.xy * params.size.zw;
    let center = sample_at(uv);
    var c = center;

    if (params.detail.x > 0.0) {
        c = denoise(uv, center, params.detail.x);
    }
    if (params.detail.y > 0.0) {
        c = sharpen(c, uv, center, params.detail.y);
    }
    if (params.detail.z > 0.5) {
        c = apply_curve(c);
    }

    c = density(c, params.density.x, params.density.y);
    c = tone(c);
    c = dehaze(c, params.presence.x);
    c = clarity(c, params.presence.y);
    c = white_balance(c, params.balance.x, params.balance.y);
    c = vibrance(c, params.presence.z);
    if (params.balance.z > 0.5) {
        c = split_tone(c);
    }
    if (params.toggles.x > 0.5) {
        c = hsl_mixer(c);
    }
    if (params.detail.w > 0.0) {
        c = mix3(c, sample_lut(c), params.detail.w);
    }
    if (params.toggles.y > 0.0) {
        c = ascii_glyph(uv);
    }
    if (params.overlay.x > 0.0) {
        let top = textureSampleLevel(overlay_tex, linear_sampler, uv, 0.0).rgb;
        c = mix3(c, blend(c, top, i32(params.overlay.y + 0.5)), params.overlay.x);
    }
    if (params.selective.w > 0.5) {
        c = selective_color(c);
    }
    if (params.effects.x > 0.0) {
        c = aberration(c, uv, params.effects.x);
    }
    c = vignette(c, uv, params.effects.y);
    if (params.effects.z > 0.0) {
        c = c + (vec3<f32>(1.0) - c) * params.effects.z;
    }
    c = rolloff(c, params.effects.w);
    if (params.finish.x > 0.0) {
        c = posterize(c, params.finish.x);
    }
    let spectral = i32(params.finish.y + 0.5);
    if (spectral == 1) {
        c = thermal(luminance(clamp01(c)));
    } else if (spectral == 2) {
        c = infrared(0.2 * c.r + 0.7 * c.g + 0.1 * c.b);
    }
    return vec4<f32>(clamp01(c), 1.0);
}
"#;

pub const MASK: &str = r#"
struct MaskUniforms {
    shape: vec4<f32>,
    a: vec4<f32>,
    b: vec4<f32>,
    size: vec4<f32>,
}

@group(0) @binding(0) var<uniform> mask: MaskUniforms;

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let uv = input.clip_position.xy * mask.size.zw;
    let aspect = mask.shape.w;
    let p = vec2<f32>(uv.x * aspect, uv.y);
    var t: f32;
    if (mask.shape.x < 0.5) {
        let center = vec2<f32>(mask.a.x * aspect, mask.a.y);
        t = length(p - center) / (mask.a.z + 1e-4);
    } else {
        let s = vec2<f32>(mask.a.x * aspect, mask.a.y);
        let line = vec2<f32>(mask.b.x * aspect, mask.b.y) - s;
        let len = length(line);
        let dir = line / (len + 1e-4);
        t = dot(p - s, dir) / (len + 1e-4);
    }
    let feather = max(mask.shape.z, 0.01);
    var coverage = clamp(1.0 - smoothstep(1.0 - feather, 1.0 + feather, t), 0.0, 1.0);
    if (mask.shape.y > 0.5) {
        coverage = 1.0 - coverage;
    }
    return vec4<f32>(coverage, coverage, coverage, 1.0);
}
"#;

pub const COMPOSITE: &str = r#"
@group(0) @binding(0) var base_tex: texture_2d<f32>;
@group(0) @binding(1) var local_tex: texture_2d<f32>;
@group(0) @binding(2) var coverage_tex: texture_2d<f32>;
@group(0) @binding(3) var linear_sampler: sampler;

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let uv = input.clip_position.xy / vec2<f32>(textureDimensions(base_tex));
    let base = textureSampleLevel(base_tex, linear_sampler, uv, 0.0).rgb;
    let local_color = textureSampleLevel(local_tex, linear_sampler, uv, 0.0).rgb;
    let m = textureSampleLevel(coverage_tex, linear_sampler, uv, 0.0).r;
    return vec4<f32>(mix3(base, local_color, m), 1.0);
}
"#;

pub const THRESHOLD: &str = r#"
struct GlowUniforms {
    params: vec4<f32>,
    size: vec4<f32>,
}

@group(0) @binding(0) var src_tex: texture_2d<f32>;
@group(0) @binding(1) var linear_sampler: sampler;
@group(0) @binding(2) var<uniform> glow: GlowUniforms;

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let uv = input.clip_position.xy * glow.size.zw;
    let c = textureSampleLevel(src_tex, linear_sampler, uv, 0.0).rgb;
    let brightness = 0.7 * c.r + 0.2 * c.g + 0.1 * c.b;
    let threshold = glow.params.x - glow.params.y * 0.3;
    let knee = 0.1;
    let k = clamp(brightness - threshold + knee, 0.0, 2.0 * knee);
    let soft = k * k / (4.0 * knee + 1e-5);
    let contribution = max(soft, brightness - threshold) / max(brightness, 1e-5);
    return vec4<f32>(c * contribution + c * (glow.params.y * 0.05), 1.0);
}
"#;

pub const BLUR: &str = r#"
struct BlurUniforms {
    step: vec4<f32>,
    size: vec4<f32>,
}

@group(0) @binding(0) var src_tex: texture_2d<f32>;
@group(0) @binding(1) var linear_sampler: sampler;
@group(0) @binding(2) var<uniform> blur: BlurUniforms;

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    var offsets = array<f32, 3>(0.0, 1.3846154, 3.2307692);
    var weights = array<f32, 3>(0.22702703, 0.3162162, 0.07027027);
    let uv = input.clip_position.xy * blur.size.zw;
    var acc = textureSampleLevel(src_tex, linear_sampler, uv, 0.0) * weights[0];
    for (var i = 1; i < 3; i = i + 1) {
        let o = blur.step.xy * offsets[i];
        acc = acc + textureSampleLevel(src_tex, linear_sampler, uv + o, 0.0) * weights[i];
        acc = acc + textureSampleLevel(src_tex, linear_sampler, uv - o, 0.0) * weights[i];
    }
    return acc;
}
"#;

pub const FINAL: &str = r#"
struct FinalUniforms {
    size: vec4<f32>,
    seed: vec4<f32>,
    glow: vec4<f32>,
    grain: vec4<f32>,
    grain_scale: vec4<f32>,
    print_tone: vec4<f32>,
    print_shadow: vec4<f32>,
    print_highlight: vec4<f32>,
    dither: vec4<f32>,
    border: vec4<f32>,
    border_color: vec4<f32>,
    view: vec4<f32>,
    geometry: vec4<f32>,
}

@group(0) @binding(0) var base_tex: texture_2d<f32>;
@group(0) @binding(1) var glow_tex: texture_2d<f32>;
@group(0) @binding(2) var source_tex: texture_2d<f32>;
@group(0) @binding(3) var grain_tex: texture_2d<f32>;
@group(0) @binding(4) var linear_sampler: sampler;
@group(0) @binding(5) var<uniform> params: FinalUniforms;

fn grain_response(stock: i32, l: f32, shadow: f32, highlight: f32) -> f32 {
    if (stock == 1) {
        return (1.0 - pow(l, 2.5)) * shadow;
    }
    if (stock == 2) {
        return 4.0 * l * (1.0 - l) * max(shadow, highlight);
    }
    return mix(shadow, highlight, l);
}

fn wrap256(v: i32) -> i32 {
    return ((v % 256) + 256) % 256;
}

fn apply_grain(c: vec3<f32>, pixel: vec2<f32>, seed: f32) -> vec3<f32> {
    let l = luminance(clamp01(c));
    let stock = i32(params.grain.x + 0.5);
    let intensity = grain_response(stock, l, params.grain.z, params.grain.w) * params.grain_scale.y;
    if (intensity <= 0.0) {
        return c;
    }
    let cell = floor((pixel + vec2<f32>(0.5)) / params.grain_scale.x);
    var noise: f32;
    if (params.grain.y > 0.5) {
        let texel = vec2<i32>(wrap256(i32(cell.x)), wrap256(i32(cell.y)));
        noise = textureLoad(grain_tex, texel, 0).r - 0.5;
    } else {
        noise = hash_noise(cell.x + seed * 17.0, cell.y + seed * 31.0) - 0.5;
    }
    return c + vec3<f32>(noise * intensity);
}

fn light_leak(c: vec3<f32>, uv: vec2<f32>, amount: f32, seed: f32) -> vec3<f32> {
    if (amount <= 0.0) {
        return c;
    }
    let offset = sin(seed * 12.34) * 0.5;
    let x = uv.x + offset;
    let primary = sin(x * 2.0 + seed) * cos(uv.y * 1.5 + seed * 0.5);
    let secondary = sin(uv.x * 3.0 - seed) * cos(uv.y * 3.0 + seed);
    let leak = smoothstep(0.6, 1.0, primary) + smoothstep(0.8, 1.0, secondary);
    let color = mix3(
        vec3<f32>(1.0, 0.5, 0.2),
        vec3<f32>(1.0, 0.2, 0.1),
        sin(seed * 10.0) * 0.5 + 0.5,
    );
    return c + color * (leak * amount);
}

fn scratches(c: vec3<f32>, uv: vec2<f32>, amount: f32, seed: f32) -> vec3<f32> {
    if (amount <= 0.0) {
        return c;
    }
    let column = floor((uv.x + seed * 13.59) * 300.0);
    let line = smoothstep(0.995, 1.0, hash_noise(column, seed));
    let opacity = hash_noise(seed, column);
    return c + vec3<f32>(line * opacity * amount * 0.8);
}

fn dust(c: vec3<f32>, uv: vec2<f32>, amount: f32, seed: f32, aspect: f32) -> vec3<f32> {
    if (amount <= 0.0) {
        return c;
    }
    let gx = uv.x * 60.0 * aspect;
    let gy = uv.y * 60.0;
    let cx = floor(gx);
    let cy = floor(gy);
    let h = hash_noise(cx + seed * 7.13, cy - seed * 3.7);
    if (h < 1.0 - min(amount, 1.0) * 0.08) {
        return c;
    }
    let center = vec2<f32>(
        0.25 + 0.5 * hash_noise(cy + seed, cx * 1.7),
        0.25 + 0.5 * hash_noise(cx * 2.3 - seed, cy + seed * 0.5),
    );
    let r = length(vec2<f32>(fract(gx), fract(gy)) - center);
    let radius = 0.04 + 0.08 * fract(h * 97.0);
    let speck = 1.0 - smoothstep(radius * 0.5, radius, r);
    return c + vec3<f32>(speck * (0.3 + 0.5 * min(amount, 1.0)));
}

fn print_stock(c_in: vec3<f32>) -> vec3<f32> {
    let k = clamp01(c_in);
    let s_curve = k * k * (vec3<f32>(3.0) - 2.0 * k);
    var c = mix3(c_in, s_curve, params.print_tone.y);
    let l = luminance(c);
    c = mix3(vec3<f32>(l), c, 1.0 + params.print_tone.z);
    let shadow = 1.0 - smoothstep(0.0, 0.5, l);
    let highlight = smoothstep(0.5, 1.0, l);
    c = mix3(c, c * params.print_shadow.rgb, shadow * params.print_shadow.w);
    return mix3(c, c * params.print_highlight.rgb, highlight * params.print_highlight.w);
}

fn bayer_at(x: i32, y: i32) -> f32 {
    var m = array<f32, 16>(
        0.0625, 0.5625, 0.1875, 0.6875,
        0.8125, 0.3125, 0.9375, 0.4375,
        0.25, 0.75, 0.125, 0.625,
        1.0, 0.5, 0.875, 0.375,
    );
    return m[(x % 4) + (y % 4) * 4];
}

fn quantize_with(v: f32, t: f32, levels: f32) -> f32 {
    let n = levels - 1.0;
    return min(floor(clamp(v, 0.0, 1.0) * n + t), n) / n;
}

fn quantize3(c: vec3<f32>, t: f32, levels: f32) -> vec3<f32> {
    return vec3<f32>(quantize_with(c.r, t, levels), quantize_with(c.g, t, levels), quantize_with(c.b, t, levels));
}

fn base_at(x: i32, y: i32) -> vec3<f32> {
    let px = clamp(x, 0, i32(params.size.x) - 1);
    let py = clamp(y, 0, i32(params.size.y) - 1);
    let uv = (vec2<f32>(f32(px), f32(py)) + vec2<f32>(0.5)) * params.size.zw;
    return textureSampleLevel(base_tex, linear_sampler, uv, 0.0).rgb;
}

fn apply_dither(c: vec3<f32>, x: i32, y: i32, seed: f32) -> vec3<f32> {
    let bayer = bayer_at(x, y);
    let levels = params.dither.z;
    let algorithm = i32(params.dither.y + 0.5);
    var dithered: vec3<f32>;
    if (algorithm == 0) {
        dithered = quantize3(c, bayer - 1.0 / 32.0, levels);
    } else if (algorithm == 1) {
        dithered = quantize3(c, 0.5 + (bayer - 0.53125) * 0.75, levels);
    } else if (algorithm == 3) {
        dithered = quantize3(c, hash_noise(f32(x) + seed, f32(y) - seed), levels);
    } else {
        var dxs = array<i32, 4>(-1, -1, 0, 1);
        var dys = array<i32, 4>(0, -1, -1, -1);
        var ws = array<f32, 4>(7.0 / 16.0, 1.0 / 16.0, 5.0 / 16.0, 3.0 / 16.0);
        var error = vec3<f32>(0.0);
        for (var i = 0; i < 4; i = i + 1) {
            let n = clamp01(base_at(x + dxs[i], y + dys[i]));
            error = error + (n - quantize3(n, 0.5, levels)) * ws[i];
        }
        dithered = quantize3(c + error, 0.5, levels);
    }
    return mix3(c, dithered, params.dither.w);
}

fn in_border(x: f32, y: f32) -> bool {
    let size = floor(params.border.y * min(params.size.x, params.size.y) + 0.5);
    return x < size || y < size || x >= params.size.x - size || y >= params.size.y - size;
}

fn clipping(c: vec3<f32>) -> vec3<f32> {
    if (c.r >= 0.99 || c.g >= 0.99 || c.b >= 0.99) {
        return vec3<f32>(1.0, 0.0, 0.0);
    }
    if (c.r <= 0.01 && c.g <= 0.01 && c.b <= 0.01) {
        return vec3<f32>(0.0, 0.0, 1.0);
    }
    return c;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let pixel = floor(input.clip_position.xy);
    let uv = (pixel + vec2<f32>(0.5)) * params.size.zw;
    let seed = params.seed.x;
    var c = textureSampleLevel(base_tex, linear_sampler, uv, 0.0).rgb;

    if (params.glow.w > 0.0) {
        let glow = textureSampleLevel(glow_tex, linear_sampler, uv, 0.0).rgb;
        c = c + glow * params.glow.rgb * params.glow.w;
    }
    if (params.grain_scale.z > 0.5) {
        c = apply_grain(c, pixel, seed);
    }
    c = light_leak(c, uv, params.seed.y, seed);
    c = scratches(c, uv, params.seed.z, seed);
    c = dust(c, uv, params.seed.w, seed, params.size.x / params.size.y);
    if (params.print_tone.x > 0.5) {
        c = print_stock(c);
    }
    if (params.dither.x > 0.5) {
        c = apply_dither(c, i32(pixel.x), i32(pixel.y), seed);
    }
    if (params.border.x > 0.5 && in_border(pixel.x, pixel.y)) {
        c = params.border_color.rgb;
    }
    if (params.view.x >= 0.0) {
        let line = floor(params.view.x * params.size.x);
        if (pixel.x == line) {
            c = vec3<f32>(1.0);
        } else if (pixel.x < line) {
            let suv = source_uv(uv, params.geometry);
            c = textureSampleLevel(source_tex, linear_sampler, suv, 0.0).rgb;
        }
    }
    if (params.view.y > 0.5) {
        c = clipping(c);
    }
    return vec4<f32>(clamp01(c), 1.0);
}
"#;

/// Shared prelude plus one pass's fragment stage
pub fn compose(pass: &str) -> String {
    format!("{COMMON}\n{pass}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_pass_has_fragment_entry() {
        for pass in [GLOBAL, MASK, COMPOSITE, THRESHOLD, BLUR, FINAL] {
            let source = compose(pass);
            assert!(source.contains("fn vs_main"));
            assert!(source.contains("fn fs_main"));
        }
    }

    #[test]
    fn test_uniform_structs_match_rust_field_counts() {
        let fields = |src: &str, name: &str| {
            let start = src.find(&format!("struct {name}")).unwrap();
            let body = &src[start..start + src[start..].find('}').unwrap()];
            body.matches("vec4<f32>").count()
        };
        // hsl is an 8-element array counted once
        assert_eq!(fields(GLOBAL, "GlobalUniforms") + 7, 26);
        assert_eq!(fields(FINAL, "FinalUniforms"), 13);
        assert_eq!(fields(MASK, "MaskUniforms"), 4);
    }
}
