/// Float RGBA image buffer used by the CPU backend

use image::RgbaImage;

use crate::color::Rgb;

#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    width: u32,
    height: u32,
    data: Vec<[f32; 4]>,
}

impl Plane {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![[0.0, 0.0, 0.0, 1.0]; width as usize * height as usize],
        }
    }

    pub fn from_rgba8(image: &RgbaImage) -> Self {
        let data = image
            .pixels()
            .map(|p| {
                let [r, g, b, a] = p.0;
                [
                    r as f32 / 255.0,
                    g as f32 / 255.0,
                    b as f32 / 255.0,
                    a as f32 / 255.0,
                ]
            })
            .collect();
        Self {
            width: image.width(),
            height: image.height(),
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixels(&self) -> &[[f32; 4]] {
        &self.data
    }

    pub fn pixels_mut(&mut self) -> &mut [[f32; 4]] {
        &mut self.data
    }

    /// Texel with coordinates clamped to the edge
    #[inline]
    pub fn texel(&self, x: i64, y: i64) -> [f32; 4] {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        self.data[y * self.width as usize + x]
    }

    /// Bilinear lookup at a normalized coordinate, clamp-to-edge, texel
    /// centers at half-integers
    pub fn sample(&self, uv: [f32; 2]) -> [f32; 4] {
        let x = uv[0] * self.width as f32 - 0.5;
        let y = uv[1] * self.height as f32 - 0.5;
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (xi, yi) = (x0 as i64, y0 as i64);

        let a = self.texel(xi, yi);
        let b = self.texel(xi + 1, yi);
        let c = self.texel(xi, yi + 1);
        let d = self.texel(xi + 1, yi + 1);
        let mut out = [0.0f32; 4];
        for i in 0..4 {
            let top = a[i] + (b[i] - a[i]) * fx;
            let bottom = c[i] + (d[i] - c[i]) * fx;
            out[i] = top + (bottom - top) * fy;
        }
        out
    }

    #[inline]
    pub fn sample_rgb(&self, uv: [f32; 2]) -> Rgb {
        let [r, g, b, _] = self.sample(uv);
        Rgb::new(r, g, b)
    }

    /// Quantize a region to RGBA8 bytes (row-major)
    pub fn to_rgba8(&self, x: u32, y: u32, width: u32, height: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(width as usize * height as usize * 4);
        for row in y..y + height {
            let start = row as usize * self.width as usize + x as usize;
            for px in &self.data[start..start + width as usize] {
                out.extend(px.iter().map(|v| quantize(*v)));
            }
        }
        out
    }
}

/// Unorm conversion: clamp, scale, round to nearest
#[inline]
pub fn quantize(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_sample_at_texel_center_is_exact() {
        let image = RgbaImage::from_fn(5, 3, |x, y| Rgba([(x * 40) as u8, (y * 90) as u8, 17, 255]));
        let plane = Plane::from_rgba8(&image);
        for y in 0..3u32 {
            for x in 0..5u32 {
                let uv = [(x as f32 + 0.5) / 5.0, (y as f32 + 0.5) / 3.0];
                let got = plane.sample(uv);
                let want = plane.texel(x as i64, y as i64);
                for i in 0..4 {
                    assert!((got[i] - want[i]).abs() < 1e-5);
                }
            }
        }
        assert_eq!(plane.to_rgba8(0, 0, 5, 3), image.into_raw());
    }

    #[test]
    fn test_sample_midpoint_and_clamp() {
        let image = RgbaImage::from_fn(2, 1, |x, _| Rgba([if x == 0 { 0 } else { 255 }, 0, 0, 255]));
        let plane = Plane::from_rgba8(&image);
        assert!((plane.sample([0.5, 0.5])[0] - 0.5).abs() < 1e-6);
        assert_eq!(plane.sample([-1.0, 0.5])[0], 0.0);
        assert_eq!(plane.sample([2.0, 0.5])[0], 1.0);
    }
}
