/// Export sizing, tiling and encoding
///
/// - `ExportPreset` - long-edge caps or an exact width, aspect preserved
/// - `tile_plan` / `blit_tile` - row-major tiles for memory-safe readback
/// - `encode` - PNG or JPEG bytes via the `image` crate

use std::io::Cursor;
use std::str::FromStr;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::render::targets::Region;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Png,
    Jpeg,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Jpeg => "jpg",
        }
    }

    /// Guess from a file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(ExportFormat::Png),
            "jpg" | "jpeg" => Some(ExportFormat::Jpeg),
            _ => None,
        }
    }
}

/// Output resolution choice, applied to the output (post-rotation) frame.
///
/// Named presets cap the longest edge and never upscale; `Custom` sets the
/// width exactly.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ExportPreset {
    Uhd4k,
    Qhd2k,
    FullHd,
    Hd,
    #[default]
    Original,
    Custom(u32),
}

impl ExportPreset {
    /// Longest-edge cap of a named preset
    pub fn max_dimension(self) -> Option<u32> {
        match self {
            ExportPreset::Uhd4k => Some(3840),
            ExportPreset::Qhd2k => Some(2560),
            ExportPreset::FullHd => Some(1920),
            ExportPreset::Hd => Some(1280),
            ExportPreset::Original | ExportPreset::Custom(_) => None,
        }
    }

    /// Output dimensions for a frame whose full-resolution size is `width` x `height`
    pub fn resolve(self, width: u32, height: u32) -> (u32, u32) {
        let (width, height) = (width.max(1), height.max(1));
        let scale = match self {
            ExportPreset::Original => return (width, height),
            ExportPreset::Custom(w) => {
                let w = w.max(1);
                let h = (w as f64 * height as f64 / width as f64).round() as u32;
                return (w, h.max(1));
            }
            named => match named.max_dimension() {
                Some(cap) => cap as f64 / width.max(height) as f64,
                None => 1.0,
            },
        };
        if scale >= 1.0 {
            return (width, height);
        }
        let scaled = |v: u32| ((v as f64 * scale).round() as u32).max(1);
        (scaled(width), scaled(height))
    }
}

impl FromStr for ExportPreset {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "4k" => Ok(ExportPreset::Uhd4k),
            "2k" => Ok(ExportPreset::Qhd2k),
            "1080p" => Ok(ExportPreset::FullHd),
            "720p" => Ok(ExportPreset::Hd),
            "original" => Ok(ExportPreset::Original),
            other => other
                .parse::<u32>()
                .ok()
                .filter(|w| *w > 0)
                .map(ExportPreset::Custom)
                .ok_or_else(|| EngineError::Config(format!("unknown export preset '{s}'"))),
        }
    }
}

/// Whether a frame must be read back tile by tile
pub fn needs_tiling(width: u32, height: u32, safe_pixels: u64) -> bool {
    width as u64 * height as u64 > safe_pixels
}

/// Row-major tiles covering the frame; edge tiles are clipped
pub fn tile_plan(width: u32, height: u32, tile: u32) -> Vec<Region> {
    let tile = tile.max(1);
    let mut tiles = Vec::new();
    for y in (0..height).step_by(tile as usize) {
        for x in (0..width).step_by(tile as usize) {
            tiles.push(Region {
                x,
                y,
                width: tile.min(width - x),
                height: tile.min(height - y),
            });
        }
    }
    tiles
}

/// Copy tightly packed RGBA `tile` bytes into `frame` at the tile's region
pub fn blit_tile(frame: &mut RgbaImage, region: Region, tile: &[u8]) {
    let frame_width = frame.width() as usize;
    let row_bytes = region.width as usize * 4;
    let buf: &mut [u8] = frame;
    for (row, src) in tile.chunks_exact(row_bytes).enumerate() {
        let start = ((region.y as usize + row) * frame_width + region.x as usize) * 4;
        buf[start..start + row_bytes].copy_from_slice(src);
    }
}

/// Encode a frame; JPEG drops alpha and uses `quality` (1-100)
pub fn encode(image: &RgbaImage, format: ExportFormat, quality: u8) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    match format {
        ExportFormat::Png => image.write_to(&mut out, ImageFormat::Png)?,
        ExportFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode_image(&rgb)?;
        }
    }
    Ok(out.into_inner())
}
