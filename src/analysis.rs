/// Image analysis on rendered RGBA bytes
///
/// Consumers of `Engine::analysis_buffer`: an RGB + luma histogram with an
/// auto-exposure hint, and a Cb/Cr vectorscope density grid.

use serde::Serialize;

use crate::color::{luminance, Rgb};

/// Mid-gray target of the exposure hint
const EXPOSURE_TARGET: f32 = 0.5;

/// 256-bin histograms of the red, green, blue and luma channels
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Histogram {
    pub red: Vec<u32>,
    pub green: Vec<u32>,
    pub blue: Vec<u32>,
    pub luma: Vec<u32>,
}

impl Histogram {
    /// Bin tightly packed RGBA bytes; alpha is ignored
    pub fn from_rgba(rgba_bytes: &[u8]) -> Self {
        let mut bins = [[0u32; 256]; 4];

        for pixel in rgba_bytes.chunks_exact(4) {
            let (r, g, b) = (pixel[0], pixel[1], pixel[2]);
            bins[0][r as usize] += 1;
            bins[1][g as usize] += 1;
            bins[2][b as usize] += 1;
            let y = luminance(Rgb::new(r as f32, g as f32, b as f32));
            bins[3][(y.round() as usize).min(255)] += 1;
        }

        let [red, green, blue, luma] = bins.map(|channel| channel.to_vec());
        Self {
            red,
            green,
            blue,
            luma,
        }
    }

    pub fn total(&self) -> u64 {
        self.luma.iter().map(|&c| c as u64).sum()
    }

    /// Largest bin across the color channels, for normalized drawing
    pub fn peak(&self) -> u32 {
        [&self.red, &self.green, &self.blue]
            .iter()
            .flat_map(|channel| channel.iter())
            .copied()
            .max()
            .unwrap_or(0)
    }

    /// Mean luma in 0..1; 0 for an empty histogram
    pub fn mean_luminance(&self) -> f32 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let weighted: u64 = self
            .luma
            .iter()
            .enumerate()
            .map(|(i, &c)| i as u64 * c as u64)
            .sum();
        weighted as f32 / total as f32 / 255.0
    }

    /// Stops of exposure that would bring the mean luma to mid-gray, within +-2
    pub fn exposure_hint(&self) -> f32 {
        let mean = self.mean_luminance().max(1.0 / 255.0);
        (EXPOSURE_TARGET / mean).log2().clamp(-2.0, 2.0)
    }

    /// Fraction of pixels in the top (`high`) or bottom luma bin
    pub fn clipped_fraction(&self, high: bool) -> f32 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let bin = if high { self.luma[255] } else { self.luma[0] };
        bin as f32 / total as f32
    }
}

/// Chroma density on a square Cb/Cr grid (BT.601), neutral at the center
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vectorscope {
    size: usize,
    cells: Vec<u32>,
}

impl Vectorscope {
    pub fn from_rgba(rgba_bytes: &[u8], size: usize) -> Self {
        let size = size.max(2);
        let mut cells = vec![0u32; size * size];
        let scale = (size - 1) as f32;

        for pixel in rgba_bytes.chunks_exact(4) {
            let [r, g, b] = [pixel[0], pixel[1], pixel[2]].map(|v| v as f32 / 255.0);
            let cb = -0.168_736 * r - 0.331_264 * g + 0.5 * b;
            let cr = 0.5 * r - 0.418_688 * g - 0.081_312 * b;
            let x = ((cb + 0.5) * scale).round().clamp(0.0, scale) as usize;
            // Cr grows upward
            let y = ((0.5 - cr) * scale).round().clamp(0.0, scale) as usize;
            cells[y * size + x] += 1;
        }

        Self { size, cells }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn count(&self, x: usize, y: usize) -> u32 {
        self.cells[y * self.size + x]
    }

    pub fn cells(&self) -> &[u32] {
        &self.cells
    }

    /// Share of samples farther than `radius` (in grid cells) from neutral
    pub fn saturated_fraction(&self, radius: f32) -> f32 {
        let total: u64 = self.cells.iter().map(|&c| c as u64).sum();
        if total == 0 {
            return 0.0;
        }
        let center = (self.size - 1) as f32 / 2.0;
        let outside: u64 = self
            .cells
            .iter()
            .enumerate()
            .filter(|(i, _)| {
                let dx = (i % self.size) as f32 - center;
                let dy = (i / self.size) as f32 - center;
                (dx * dx + dy * dy).sqrt() > radius
            })
            .map(|(_, &c)| c as u64)
            .sum();
        outside as f32 / total as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn solid(rgb: [u8; 3], count: usize) -> Vec<u8> {
        (0..count).flat_map(|_| [rgb[0], rgb[1], rgb[2], 255]).collect()
    }

    #[test]
    fn test_histogram_counts_channels() {
        let mut bytes = solid([255, 0, 10], 3);
        bytes.extend(solid([0, 0, 0], 1));
        let histogram = Histogram::from_rgba(&bytes);
        assert_eq!(histogram.red[255], 3);
        assert_eq!(histogram.red[0], 1);
        assert_eq!(histogram.blue[10], 3);
        assert_eq!(histogram.green[0], 4);
        assert_eq!(histogram.total(), 4);
        assert_eq!(histogram.peak(), 4);
        assert_eq!(histogram.luma[0], 1);
    }

    #[test]
    fn test_exposure_hint_direction() {
        let dark = Histogram::from_rgba(&solid([32, 32, 32], 10));
        assert!(dark.exposure_hint() > 1.5);
        let mid = Histogram::from_rgba(&solid([128, 128, 128], 10));
        assert_abs_diff_eq!(mid.exposure_hint(), 0.0, epsilon = 0.02);
        let white = Histogram::from_rgba(&solid([255, 255, 255], 10));
        assert_abs_diff_eq!(white.exposure_hint(), -1.0, epsilon = 0.01);
        assert_abs_diff_eq!(white.clipped_fraction(true), 1.0);
    }

    #[test]
    fn test_empty_histogram() {
        let histogram = Histogram::from_rgba(&[]);
        assert_eq!(histogram.mean_luminance(), 0.0);
        assert_eq!(histogram.exposure_hint(), 2.0);
        assert_eq!(histogram.clipped_fraction(false), 0.0);
    }

    #[test]
    fn test_vectorscope_neutral_and_red() {
        let gray = Vectorscope::from_rgba(&solid([90, 90, 90], 5), 65);
        assert_eq!(gray.count(32, 32), 5);
        assert_eq!(gray.saturated_fraction(2.0), 0.0);

        let red = Vectorscope::from_rgba(&solid([255, 0, 0], 5), 65);
        assert_eq!(red.count(32, 32), 0);
        assert_abs_diff_eq!(red.saturated_fraction(2.0), 1.0);
        // Red sits left of center (negative Cb) and above it (positive Cr)
        let index = red.cells().iter().position(|&c| c == 5).unwrap();
        assert!(index % 65 < 32);
        assert!(index / 65 < 32);
    }
}
