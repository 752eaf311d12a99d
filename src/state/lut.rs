/// 3-D color lookup tables
///
/// Holds an N x N x N RGB cube with red varying fastest, matching the
/// `.cube` row order. Loading is all-or-nothing: malformed data is
/// rejected before anything reaches the GPU.

use half::f16;

use crate::color::Rgb;
use crate::error::{EngineError, Result};

pub const MIN_CUBE_SIZE: u32 = 2;
pub const MAX_CUBE_SIZE: u32 = 256;
const DEFAULT_CUBE_SIZE: u32 = 33;

#[derive(Debug, Clone, PartialEq)]
pub struct CubeLut {
    pub title: String,
    size: u32,
    data: Vec<f32>,
    pub domain_min: [f32; 3],
    pub domain_max: [f32; 3],
}

impl CubeLut {
    /// Wrap raw RGB float data; `data.len()` must be exactly `size^3 * 3`
    pub fn new(data: Vec<f32>, size: u32) -> Result<Self> {
        if !(MIN_CUBE_SIZE..=MAX_CUBE_SIZE).contains(&size) {
            return Err(EngineError::InvalidLut(format!(
                "cube size {size} outside {MIN_CUBE_SIZE}..={MAX_CUBE_SIZE}"
            )));
        }
        let expected = (size as usize).pow(3) * 3;
        if data.len() != expected {
            return Err(EngineError::InvalidLut(format!(
                "expected {expected} floats for size {size}, got {}",
                data.len()
            )));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(EngineError::InvalidLut("non-finite entry".into()));
        }
        Ok(Self {
            title: String::from("Untitled LUT"),
            size,
            data,
            domain_min: [0.0; 3],
            domain_max: [1.0; 3],
        })
    }

    /// Cube that maps every color to itself
    pub fn identity(size: u32) -> Result<Self> {
        let s = size as usize;
        let scale = (size.max(2) - 1) as f32;
        let mut data = Vec::with_capacity(s * s * s * 3);
        for b in 0..s {
            for g in 0..s {
                for r in 0..s {
                    data.extend([r as f32 / scale, g as f32 / scale, b as f32 / scale]);
                }
            }
        }
        Self::new(data, size)
    }

    /// Parse an Adobe `.cube` file
    pub fn parse_cube(text: &str) -> Result<Self> {
        let mut title = None;
        let mut size = None;
        let mut domain_min = [0.0f32; 3];
        let mut domain_max = [1.0f32; 3];
        let mut data = Vec::new();

        for (line_no, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let Some(head) = parts.next() else {
                continue;
            };
            match head {
                "TITLE" => {
                    title = Some(line["TITLE".len()..].trim().trim_matches('"').to_string());
                }
                "LUT_3D_SIZE" => {
                    let value = parts.next().and_then(|v| v.parse::<u32>().ok()).ok_or_else(|| {
                        EngineError::InvalidLut(format!("line {}: bad LUT_3D_SIZE", line_no + 1))
                    })?;
                    size = Some(value);
                }
                "DOMAIN_MIN" => domain_min = parse_triple(parts, line_no)?,
                "DOMAIN_MAX" => domain_max = parse_triple(parts, line_no)?,
                // 1-D tables and unknown keywords are not supported by the cube path
                "LUT_1D_SIZE" => {
                    return Err(EngineError::InvalidLut("1-D .cube tables are not supported".into()))
                }
                _ if head.starts_with(|c: char| c.is_ascii_alphabetic()) => {
                    tracing::debug!(keyword = head, "ignoring .cube keyword");
                }
                _ => {
                    let row = parse_triple(line.split_whitespace(), line_no)?;
                    data.extend(row);
                }
            }
        }

        let size = size.unwrap_or_else(|| {
            tracing::warn!("no LUT_3D_SIZE found, assuming {DEFAULT_CUBE_SIZE}");
            DEFAULT_CUBE_SIZE
        });
        let mut lut = Self::new(data, size)?;
        if (0..3).any(|i| domain_max[i] <= domain_min[i]) {
            return Err(EngineError::InvalidLut("DOMAIN_MAX must exceed DOMAIN_MIN".into()));
        }
        lut.title = title.unwrap_or_else(|| String::from("Untitled LUT"));
        lut.domain_min = domain_min;
        lut.domain_max = domain_max;
        Ok(lut)
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Map a color into the cube's 0..1 lookup space
    pub fn normalize(&self, c: Rgb) -> Rgb {
        let n = |v: f32, i: usize| {
            ((v - self.domain_min[i]) / (self.domain_max[i] - self.domain_min[i])).clamp(0.0, 1.0)
        };
        Rgb::new(n(c.x, 0), n(c.y, 1), n(c.z, 2))
    }

    /// Trilinear lookup
    pub fn sample(&self, c: Rgb) -> Rgb {
        let c = self.normalize(c);
        let s = self.size as usize;
        let scale = (s - 1) as f32;

        let r = c.x * scale;
        let g = c.y * scale;
        let b = c.z * scale;
        let r0 = (r as usize).min(s - 1);
        let g0 = (g as usize).min(s - 1);
        let b0 = (b as usize).min(s - 1);
        let r1 = (r0 + 1).min(s - 1);
        let g1 = (g0 + 1).min(s - 1);
        let b1 = (b0 + 1).min(s - 1);
        let fr = r - r0 as f32;
        let fg = g - g0 as f32;
        let fb = b - b0 as f32;

        let idx = |ri: usize, gi: usize, bi: usize, ch: usize| -> f32 {
            self.data[(bi * s * s + gi * s + ri) * 3 + ch]
        };

        let mut out = [0.0f32; 3];
        for (ch, value) in out.iter_mut().enumerate() {
            let c00 = idx(r0, g0, b0, ch) + fr * (idx(r1, g0, b0, ch) - idx(r0, g0, b0, ch));
            let c10 = idx(r0, g1, b0, ch) + fr * (idx(r1, g1, b0, ch) - idx(r0, g1, b0, ch));
            let c01 = idx(r0, g0, b1, ch) + fr * (idx(r1, g0, b1, ch) - idx(r0, g0, b1, ch));
            let c11 = idx(r0, g1, b1, ch) + fr * (idx(r1, g1, b1, ch) - idx(r0, g1, b1, ch));
            let c0 = c00 + fg * (c10 - c00);
            let c1 = c01 + fg * (c11 - c01);
            *value = c0 + fb * (c1 - c0);
        }
        Rgb::new(out[0], out[1], out[2])
    }

    /// RGBA half floats for an `Rgba16Float` 3-D texture
    pub fn to_rgba_f16(&self) -> Vec<f16> {
        let mut out = Vec::with_capacity(self.data.len() / 3 * 4);
        for rgb in self.data.chunks_exact(3) {
            out.push(f16::from_f32(rgb[0]));
            out.push(f16::from_f32(rgb[1]));
            out.push(f16::from_f32(rgb[2]));
            out.push(f16::ONE);
        }
        out
    }
}

fn parse_triple<'a>(mut parts: impl Iterator<Item = &'a str>, line_no: usize) -> Result<[f32; 3]> {
    let mut out = [0.0f32; 3];
    for value in out.iter_mut() {
        *value = parts
            .next()
            .and_then(|v| v.parse::<f32>().ok())
            .ok_or_else(|| EngineError::InvalidLut(format!("line {}: expected three numbers", line_no + 1)))?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn cube_text(size: u32, rows: &[[f32; 3]]) -> String {
        let mut text = format!("# generated\nTITLE \"Test Cube\"\nLUT_3D_SIZE {size}\n");
        for row in rows {
            text.push_str(&format!("{} {} {}\n", row[0], row[1], row[2]));
        }
        text
    }

    #[test]
    fn test_parse_identity_cube() {
        let lut = CubeLut::identity(2).unwrap();
        let rows: Vec<[f32; 3]> = lut.data().chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect();
        let parsed = CubeLut::parse_cube(&cube_text(2, &rows)).unwrap();

        assert_eq!(parsed.title, "Test Cube");
        assert_eq!(parsed.size(), 2);
        assert_eq!(parsed.data(), lut.data());
    }

    #[test]
    fn test_identity_sample() {
        let lut = CubeLut::identity(17).unwrap();
        let c = Rgb::new(0.13, 0.5, 0.87);
        let out = lut.sample(c);
        assert_abs_diff_eq!(out.x, c.x, epsilon = 1e-5);
        assert_abs_diff_eq!(out.y, c.y, epsilon = 1e-5);
        assert_abs_diff_eq!(out.z, c.z, epsilon = 1e-5);
    }

    #[test]
    fn test_red_varies_fastest() {
        // Second row of a size-2 cube is r=1, g=0, b=0
        let mut data = vec![0.0; 24];
        data[3] = 1.0;
        let lut = CubeLut::new(data, 2).unwrap();
        let out = lut.sample(Rgb::new(1.0, 0.0, 0.0));
        assert_abs_diff_eq!(out.x, 1.0);
        assert_abs_diff_eq!(out.y, 0.0);
    }

    #[test]
    fn test_rejects_short_data() {
        let text = cube_text(2, &[[0.0, 0.0, 0.0]; 7]);
        assert!(matches!(CubeLut::parse_cube(&text), Err(EngineError::InvalidLut(_))));
    }

    #[test]
    fn test_rejects_bad_size() {
        assert!(CubeLut::new(vec![0.0; 3], 1).is_err());
        assert!(CubeLut::new(vec![0.0; 10], 2).is_err());
    }

    #[test]
    fn test_domain_normalization() {
        let mut text = String::from("LUT_3D_SIZE 2\nDOMAIN_MIN 0 0 0\nDOMAIN_MAX 2 2 2\n");
        let lut = CubeLut::identity(2).unwrap();
        for c in lut.data().chunks_exact(3) {
            text.push_str(&format!("{} {} {}\n", c[0], c[1], c[2]));
        }
        let parsed = CubeLut::parse_cube(&text).unwrap();
        let out = parsed.sample(Rgb::new(1.0, 1.0, 1.0));
        assert_abs_diff_eq!(out.x, 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_half_float_upload_layout() {
        let lut = CubeLut::identity(2).unwrap();
        let rgba = lut.to_rgba_f16();
        assert_eq!(rgba.len(), 8 * 4);
        assert_eq!(rgba[3], f16::ONE);
        assert_eq!(rgba[4].to_f32(), 1.0);
    }
}
