/// Engine configuration
///
/// Every knob has a sensible default, so a config file only needs the
/// fields it wants to change. Loaded from JSON by the CLI.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::export::ExportFormat;

/// Hardware class used to pick the source-size cap.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    #[default]
    Desktop,
    Mobile,
}

/// Which render backend the engine should construct.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    /// GPU when an adapter is available, CPU otherwise.
    #[default]
    Auto,
    Cpu,
    Gpu,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub device_class: DeviceClass,
    /// Longest allowed source edge on desktop-class hardware.
    pub desktop_cap: u32,
    /// Longest allowed source edge on mobile-class hardware.
    pub mobile_cap: u32,
    /// Fraction of the device texture limit usable when that limit is below the cap.
    pub texture_headroom: f32,
    /// Smallest cap the engine falls back to after allocation failures.
    pub min_cap: u32,
    /// Linear downscale factor of the glow targets.
    pub glow_divisor: u32,
    /// Minimum glow target edge.
    pub glow_min_dim: u32,
    /// Edge length of export tiles.
    pub tile_size: u32,
    /// Exports above this many pixels are read back tile by tile.
    pub safe_export_pixels: u64,
    /// Default edge of the square analysis buffer.
    pub analysis_size: u32,
    pub history_depth: usize,
    pub history_debounce_ms: u64,
    pub export_format: ExportFormat,
    /// JPEG quality, 1-100.
    pub jpeg_quality: u8,
    pub backend: BackendChoice,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_class: DeviceClass::Desktop,
            desktop_cap: 2560,
            mobile_cap: 1024,
            texture_headroom: 0.5,
            min_cap: 256,
            glow_divisor: 4,
            glow_min_dim: 64,
            tile_size: 512,
            safe_export_pixels: 8 * 1024 * 1024,
            analysis_size: 256,
            history_depth: 50,
            history_debounce_ms: 300,
            export_format: ExportFormat::Png,
            jpeg_quality: 92,
            backend: BackendChoice::Auto,
        }
    }
}

impl EngineConfig {
    /// Parse a config from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.desktop_cap == 0 || self.mobile_cap == 0 {
            return Err(EngineError::Config("source caps must be non-zero".into()));
        }
        if self.min_cap == 0 || self.min_cap > self.desktop_cap.min(self.mobile_cap) {
            return Err(EngineError::Config(format!(
                "minCap {} must be in 1..={}",
                self.min_cap,
                self.desktop_cap.min(self.mobile_cap)
            )));
        }
        if !(self.texture_headroom > 0.0 && self.texture_headroom <= 1.0) {
            return Err(EngineError::Config(
                "textureHeadroom must be in (0, 1]".into(),
            ));
        }
        if self.glow_divisor == 0 {
            return Err(EngineError::Config("glowDivisor must be non-zero".into()));
        }
        if self.tile_size == 0 {
            return Err(EngineError::Config("tileSize must be non-zero".into()));
        }
        if self.analysis_size == 0 {
            return Err(EngineError::Config("analysisSize must be non-zero".into()));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(EngineError::Config(format!(
                "jpegQuality {} must be in 1..=100",
                self.jpeg_quality
            )));
        }
        Ok(())
    }

    /// Cap for the longest source edge given the device's 2-D texture limit.
    ///
    /// When the device limit is below the class cap, only a fraction of it is
    /// used so auxiliary targets still fit.
    pub fn source_cap(&self, max_texture_dim: u32) -> u32 {
        let class_cap = match self.device_class {
            DeviceClass::Desktop => self.desktop_cap,
            DeviceClass::Mobile => self.mobile_cap,
        };
        if max_texture_dim < class_cap {
            ((max_texture_dim as f32 * self.texture_headroom).floor() as u32).max(1)
        } else {
            class_cap
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_source_cap_policy() {
        let mut config = EngineConfig::default();
        assert_eq!(config.source_cap(16384), 2560);
        // Device limit below the cap keeps half of it as headroom
        assert_eq!(config.source_cap(2048), 1024);

        config.device_class = DeviceClass::Mobile;
        assert_eq!(config.source_cap(16384), 1024);
        assert_eq!(config.source_cap(1000), 500);
    }

    #[test]
    fn test_partial_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "deviceClass": "mobile", "tileSize": 256 }}"#).unwrap();

        let config = EngineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.device_class, DeviceClass::Mobile);
        assert_eq!(config.tile_size, 256);
        assert_eq!(config.desktop_cap, 2560);
    }

    #[test]
    fn test_rejects_zero_tile() {
        let config = EngineConfig {
            tile_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_export_defaults_from_json() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "exportFormat": "jpeg", "jpegQuality": 80 }"#).unwrap();
        assert_eq!(config.export_format, ExportFormat::Jpeg);
        assert_eq!(config.jpeg_quality, 80);
        assert!(config.validate().is_ok());

        let zero = EngineConfig {
            jpeg_quality: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
    }
}
