/// Per-pixel color math shared by the CPU reference passes
///
/// These helpers mirror the WGSL functions in `gpu/shaders.rs` one to one,
/// so both backends evaluate the same formulas:
/// - Rec.709 luminance for tonal masks, Rec.601 luma for ASCII glyph picks
/// - HSL conversions for the mixer and grading tints
/// - GLSL-style `smoothstep`, `mix` and `fract`
/// - the sine-hash noise used by grain and film defects

use cgmath::{vec3, ElementWise, InnerSpace, Vector3};

/// Linear RGB triple in 0..1 (values may leave that range mid-pipeline)
pub type Rgb = Vector3<f32>;

const REC709: Vector3<f32> = Vector3 {
    x: 0.2126,
    y: 0.7152,
    z: 0.0722,
};

const REC601: Vector3<f32> = Vector3 {
    x: 0.299,
    y: 0.587,
    z: 0.114,
};

#[inline]
pub fn splat(v: f32) -> Rgb {
    vec3(v, v, v)
}

#[inline]
pub fn luminance(c: Rgb) -> f32 {
    c.dot(REC709)
}

#[inline]
pub fn luma601(c: Rgb) -> f32 {
    c.dot(REC601)
}

#[inline]
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[inline]
pub fn mix(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}

#[inline]
pub fn mix3(a: Rgb, b: Rgb, t: f32) -> Rgb {
    a * (1.0 - t) + b * t
}

#[inline]
pub fn fract(x: f32) -> f32 {
    x - x.floor()
}

#[inline]
pub fn clamp01(c: Rgb) -> Rgb {
    vec3(
        c.x.clamp(0.0, 1.0),
        c.y.clamp(0.0, 1.0),
        c.z.clamp(0.0, 1.0),
    )
}

#[inline]
pub fn max_component(c: Rgb) -> f32 {
    c.x.max(c.y).max(c.z)
}

#[inline]
pub fn min_component(c: Rgb) -> f32 {
    c.x.min(c.y).min(c.z)
}

#[inline]
pub fn mean(c: Rgb) -> f32 {
    (c.x + c.y + c.z) / 3.0
}

/// Component-wise product
#[inline]
pub fn modulate(a: Rgb, b: Rgb) -> Rgb {
    a.mul_element_wise(b)
}

/// Sine hash noise in 0..1
#[inline]
pub fn hash_noise(x: f32, y: f32) -> f32 {
    fract((x * 12.9898 + y * 78.233).sin() * 43_758.547)
}

/// RGB to HSL, all components in 0..1
pub fn rgb_to_hsl(c: Rgb) -> Rgb {
    let max_c = max_component(c);
    let min_c = min_component(c);
    let l = (max_c + min_c) / 2.0;
    if max_c == min_c {
        return vec3(0.0, 0.0, l);
    }

    let d = max_c - min_c;
    let s = if l > 0.5 {
        d / (2.0 - max_c - min_c)
    } else {
        d / (max_c + min_c)
    };
    let h = if max_c == c.x {
        (c.y - c.z) / d + if c.y < c.z { 6.0 } else { 0.0 }
    } else if max_c == c.y {
        (c.z - c.x) / d + 2.0
    } else {
        (c.x - c.y) / d + 4.0
    };
    vec3(h / 6.0, s, l)
}

fn hue_to_channel(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 0.5 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}

/// HSL to RGB, all components in 0..1
pub fn hsl_to_rgb(hsl: Rgb) -> Rgb {
    let (h, s, l) = (hsl.x, hsl.y, hsl.z);
    if s == 0.0 {
        return splat(l);
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    vec3(
        hue_to_channel(p, q, h + 1.0 / 3.0),
        hue_to_channel(p, q, h),
        hue_to_channel(p, q, h - 1.0 / 3.0),
    )
}

/// Fully saturated mid-lightness color for a hue in degrees
pub fn hue_color(degrees: f32) -> Rgb {
    hsl_to_rgb(vec3(fract(degrees / 360.0), 1.0, 0.5))
}

#[inline]
pub fn to_array(c: Rgb) -> [f32; 3] {
    [c.x, c.y, c.z]
}

#[inline]
pub fn from_array(a: [f32; 3]) -> Rgb {
    vec3(a[0], a[1], a[2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_hsl_round_trip_primaries() {
        for c in [
            vec3(1.0, 0.0, 0.0),
            vec3(0.0, 1.0, 0.0),
            vec3(0.2, 0.4, 0.9),
            vec3(0.5, 0.5, 0.5),
        ] {
            let back = hsl_to_rgb(rgb_to_hsl(c));
            assert_abs_diff_eq!(back.x, c.x, epsilon = 1e-5);
            assert_abs_diff_eq!(back.y, c.y, epsilon = 1e-5);
            assert_abs_diff_eq!(back.z, c.z, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_hue_color_red_and_blue() {
        let red = hue_color(0.0);
        assert_abs_diff_eq!(red.x, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(red.y, 0.0, epsilon = 1e-6);
        let blue = hue_color(240.0);
        assert_abs_diff_eq!(blue.z, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(blue.x, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_smoothstep_edges() {
        assert_eq!(smoothstep(0.5, 1.0, 0.2), 0.0);
        assert_eq!(smoothstep(0.5, 1.0, 1.5), 1.0);
        assert_abs_diff_eq!(smoothstep(0.0, 1.0, 0.5), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_luminance_weights_sum_to_one() {
        assert_abs_diff_eq!(luminance(splat(1.0)), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(luma601(splat(1.0)), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_hash_noise_range_and_determinism() {
        for i in 0..100 {
            let n = hash_noise(i as f32 * 0.37, 11.0);
            assert!((0.0..1.0).contains(&n));
            assert_eq!(n, hash_noise(i as f32 * 0.37, 11.0));
        }
    }
}
