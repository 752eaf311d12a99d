/// Source image policy
///
/// The engine keeps the untouched original on the CPU (device-loss recovery
/// and export both start from it) and uploads a working copy whose longest
/// edge never exceeds the current cap. Also home of the per-image film seed
/// and the seeded grain texture.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::RgbaImage;

use crate::error::{EngineError, Result};

/// Edge length of the tiled grain texture
pub const GRAIN_TEXTURE_SIZE: u32 = 256;

/// Scale factor that fits `width x height` inside `cap` (never upscales)
pub fn downscale_ratio(width: u32, height: u32, cap: u32) -> f32 {
    let ratio = (cap as f32 / width as f32).min(cap as f32 / height as f32);
    ratio.min(1.0)
}

/// Dimensions after fitting inside `cap`, floored and at least 1
pub fn fit_to_cap(width: u32, height: u32, cap: u32) -> (u32, u32) {
    let ratio = downscale_ratio(width, height, cap);
    if ratio >= 1.0 {
        return (width, height);
    }
    (
        ((width as f32 * ratio).floor() as u32).max(1),
        ((height as f32 * ratio).floor() as u32).max(1),
    )
}

/// Original bitmap plus the capped working copy uploaded to the backend
#[derive(Debug, Clone)]
pub struct SourceImage {
    original: Arc<RgbaImage>,
    working: RgbaImage,
    cap: u32,
    film_seed: f32,
}

impl SourceImage {
    pub fn new(original: RgbaImage, cap: u32) -> Result<Self> {
        if original.width() == 0 || original.height() == 0 {
            return Err(EngineError::NoSource);
        }
        let film_seed = film_seed(&original);
        let original = Arc::new(original);
        let working = scaled(&original, cap);
        tracing::info!(
            width = original.width(),
            height = original.height(),
            working_width = working.width(),
            working_height = working.height(),
            ratio = downscale_ratio(original.width(), original.height(), cap),
            "source loaded"
        );
        Ok(Self {
            original,
            working,
            cap,
            film_seed,
        })
    }

    /// Rebuild the working copy under a new cap
    pub fn set_cap(&mut self, cap: u32) {
        if cap != self.cap {
            self.working = scaled(&self.original, cap);
            self.cap = cap;
            tracing::info!(cap, width = self.working.width(), height = self.working.height(), "source rescaled");
        }
    }

    pub fn original(&self) -> &RgbaImage {
        &self.original
    }

    pub fn working(&self) -> &RgbaImage {
        &self.working
    }

    pub fn cap(&self) -> u32 {
        self.cap
    }

    pub fn film_seed(&self) -> f32 {
        self.film_seed
    }

    /// Original resampled to exact dimensions (export renders)
    pub fn resized(&self, width: u32, height: u32) -> RgbaImage {
        if (width, height) == self.original.dimensions() {
            return self.original.as_ref().clone();
        }
        imageops::resize(self.original.as_ref(), width, height, FilterType::Lanczos3)
    }
}

fn scaled(original: &RgbaImage, cap: u32) -> RgbaImage {
    let (w, h) = fit_to_cap(original.width(), original.height(), cap);
    if (w, h) == original.dimensions() {
        original.clone()
    } else {
        imageops::resize(original, w, h, FilterType::Lanczos3)
    }
}

/// Deterministic per-image seed in 0..100
///
/// Hashes the dimensions and a sparse lattice of pixels, so grain and film
/// defects stay put across renders, exports and reloads of the same image.
pub fn film_seed(image: &RgbaImage) -> f32 {
    let mut hasher = DefaultHasher::new();
    image.dimensions().hash(&mut hasher);
    let step_x = (image.width() / 16).max(1);
    let step_y = (image.height() / 16).max(1);
    for y in (0..image.height()).step_by(step_y as usize) {
        for x in (0..image.width()).step_by(step_x as usize) {
            image.get_pixel(x, y).0.hash(&mut hasher);
        }
    }
    (hasher.finish() % 10_000) as f32 / 100.0
}

/// Linear congruential generator for grain noise
struct Lcg {
    state: u32,
}

impl Lcg {
    fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    fn next_u8(&mut self) -> u8 {
        self.state = self.state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        (self.state >> 24) as u8
    }
}

/// Tileable single-channel noise used when the grain source is `Texture`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrainTexture {
    seed: u32,
    data: Vec<u8>,
}

impl GrainTexture {
    pub fn generate(seed: u32) -> Self {
        let mut rng = Lcg::new(seed);
        let len = (GRAIN_TEXTURE_SIZE * GRAIN_TEXTURE_SIZE) as usize;
        let data = (0..len).map(|_| rng.next_u8()).collect();
        Self { seed, data }
    }

    pub fn for_film_seed(film_seed: f32) -> Self {
        Self::generate((film_seed * 1000.0) as u32)
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Zero-mean noise at integer texel coordinates, wrapping
    pub fn noise(&self, x: i64, y: i64) -> f32 {
        let size = GRAIN_TEXTURE_SIZE as i64;
        let (x, y) = (x.rem_euclid(size), y.rem_euclid(size));
        self.data[(y * size + x) as usize] as f32 / 255.0 - 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_cap_policy() {
        assert_eq!(fit_to_cap(4000, 3000, 2560), (2560, 1920));
        assert_eq!(fit_to_cap(3000, 4000, 1024), (768, 1024));
        assert_eq!(fit_to_cap(800, 600, 2560), (800, 600));
        assert_eq!(fit_to_cap(10000, 3, 100), (100, 1));
    }

    #[test]
    fn test_working_copy_respects_cap() {
        let original = RgbaImage::from_pixel(300, 200, Rgba([10, 20, 30, 255]));
        let mut source = SourceImage::new(original, 150).unwrap();
        assert_eq!(source.working().dimensions(), (150, 100));
        assert_eq!(source.original().dimensions(), (300, 200));

        source.set_cap(1000);
        assert_eq!(source.working().dimensions(), (300, 200));
    }

    #[test]
    fn test_empty_image_rejected() {
        assert!(matches!(
            SourceImage::new(RgbaImage::new(0, 0), 100),
            Err(EngineError::NoSource)
        ));
    }

    #[test]
    fn test_film_seed_is_deterministic() {
        let a = RgbaImage::from_fn(64, 48, |x, y| Rgba([x as u8, y as u8, 7, 255]));
        let b = RgbaImage::from_fn(64, 48, |x, y| Rgba([y as u8, x as u8, 7, 255]));
        assert_eq!(film_seed(&a), film_seed(&a.clone()));
        assert_ne!(film_seed(&a), film_seed(&b));
        assert!((0.0..100.0).contains(&film_seed(&a)));
    }

    #[test]
    fn test_grain_texture_lcg() {
        let grain = GrainTexture::generate(1);
        // 1 * 1664525 + 1013904223 = 1015568748 -> top byte 0x3C
        assert_eq!(grain.data()[0], 0x3C);
        assert_eq!(grain.data().len(), 256 * 256);
        assert_eq!(grain, GrainTexture::generate(1));
        assert_eq!(grain.noise(-1, 0), grain.noise(255, 0));
    }
}
