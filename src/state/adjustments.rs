/// Non-destructive adjustment state
///
/// A flat record of every parameter the pipeline reads. All values are on
/// human scales (mostly -100..100 or 0..100); the passes divide internally.
/// The default record renders the source unchanged.
///
/// Field-level writes go through serde_json so the same code path serves
/// `set_adjustment(name, value)`, partial objects, presets, mask-local
/// merges and preset-strength interpolation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::{EngineError, Result};

/// Partial adjustment record, keyed by camelCase field name
pub type PartialAdjustments = Map<String, Value>;

/// Fields kept across a preset application.
pub const STRUCTURAL_FIELDS: &[&str] = &[
    "rotateQuarters",
    "flipX",
    "flipY",
    "outputTransform",
    "borderSize",
    "borderColor",
];

/// Vector fields that hold colors rather than deltas; mask merges replace them.
const SWATCH_FIELDS: &[&str] = &["halationTint", "borderColor"];

/// Preset metadata keys that never map onto a field
const PRESET_META_KEYS: &[&str] = &["name", "category"];

/// Grain response curve as a function of luminance
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "camelCase")]
pub enum GrainStock {
    /// Linear mix between the shadow and highlight amounts
    #[default]
    Digital,
    /// Colour negative: strongest in the shadows
    Negative,
    /// Reversal film: strongest in the midtones
    Slide,
}

impl GrainStock {
    /// Guess the grain stock from a film stock name
    pub fn detect(film_name: &str) -> Self {
        const SLIDE_MARKERS: &[&str] = &[
            "velvia",
            "provia",
            "astia",
            "ektachrome",
            "fortia",
            "sensia",
            "ct prec",
            "slide",
            "chrome",
        ];
        let name = film_name.to_lowercase();
        // Lomochrome is a negative stock despite the name
        if name.contains("lomochrome") {
            return GrainStock::Negative;
        }
        if SLIDE_MARKERS.iter().any(|marker| name.contains(marker)) {
            GrainStock::Slide
        } else {
            GrainStock::Negative
        }
    }
}

/// Where grain noise samples come from
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "camelCase")]
pub enum GrainSource {
    #[default]
    Procedural,
    /// Tiled 256x256 texture generated from the film seed
    Texture,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "camelCase")]
pub enum DitherAlgorithm {
    #[default]
    Bayer,
    Atkinson,
    ErrorEstimate,
    Random,
}

/// Print-stock emulation applied after grading
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "camelCase")]
pub enum PrintStock {
    #[default]
    None,
    Kodak2383,
    Fuji3513,
}

/// Color-science parameters of a print stock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrintProfile {
    pub contrast: f32,
    pub saturation: f32,
    pub shadow_hue: f32,
    pub shadow_sat: f32,
    pub highlight_hue: f32,
    pub highlight_sat: f32,
}

impl PrintStock {
    pub fn profile(self) -> Option<PrintProfile> {
        match self {
            PrintStock::None => None,
            // Teal shadows, warm highlights, punchy mids
            PrintStock::Kodak2383 => Some(PrintProfile {
                contrast: 25.0,
                saturation: -10.0,
                shadow_hue: 190.0,
                shadow_sat: 15.0,
                highlight_hue: 40.0,
                highlight_sat: 10.0,
            }),
            // Magenta shadows, cool highlights, gentler curve
            PrintStock::Fuji3513 => Some(PrintProfile {
                contrast: 20.0,
                saturation: 0.0,
                shadow_hue: 300.0,
                shadow_sat: 10.0,
                highlight_hue: 200.0,
                highlight_sat: 5.0,
            }),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "camelCase")]
pub enum AsciiPalette {
    /// Glyphs take the source color of their cell
    #[default]
    Source,
    Mono,
    Green,
    Amber,
}

/// Texture overlay blend mode
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "camelCase")]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
}

/// False-color remap keyed by luminance
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SpectralMode {
    #[default]
    Off,
    Thermal,
    Infrared,
}

/// All adjustment parameters for one image
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AdjustmentState {
    // ========== Tone ==========
    /// Density exposure (-5.0 to +5.0)
    pub exposure: f32,
    pub contrast: f32,
    pub highlights: f32,
    pub shadows: f32,
    pub whites: f32,
    pub blacks: f32,

    // ========== Presence ==========
    pub dehaze: f32,
    pub clarity: f32,
    /// Unsharp amount (0 to 100)
    pub sharpness: f32,
    /// Edge-aware smoothing (0 to 100)
    pub denoise: f32,

    // ========== Color ==========
    pub temperature: f32,
    pub tint: f32,
    pub vibrance: f32,
    pub saturation: f32,

    // ========== Three-way grading ==========
    /// Hues in degrees, saturations 0 to 100
    pub split_shadow_hue: f32,
    pub split_shadow_sat: f32,
    pub split_midtone_hue: f32,
    pub split_midtone_sat: f32,
    pub split_highlight_hue: f32,
    pub split_highlight_sat: f32,
    /// Crossover shift (-100 to +100)
    pub split_balance: f32,

    // ========== HSL mixer: [hue shift deg, saturation %, luminance %] ==========
    pub hsl_red: [f32; 3],
    pub hsl_orange: [f32; 3],
    pub hsl_yellow: [f32; 3],
    pub hsl_green: [f32; 3],
    pub hsl_aqua: [f32; 3],
    pub hsl_blue: [f32; 3],
    pub hsl_purple: [f32; 3],
    pub hsl_magenta: [f32; 3],

    // ========== Creative ==========
    /// Blend of the loaded 3-D LUT (0 to 100)
    pub lut_opacity: f32,
    /// Glyph grid density (0 = off, up to 2.0)
    pub ascii_size: f32,
    pub ascii_palette: AsciiPalette,
    pub overlay_opacity: f32,
    pub overlay_blend: BlendMode,
    /// Selective color wedge center in degrees
    pub selective_hue: f32,
    /// Half-width of the wedge in degrees
    pub selective_range: f32,
    /// Soft edge outside the wedge in degrees
    pub selective_feather: f32,
    pub selective_saturation: f32,
    pub selective_luminance: f32,

    // ========== Optics & finish ==========
    pub chromatic_aberration: f32,
    pub vignette: f32,
    pub fade: f32,
    /// Highlight shoulder blend (0 to 100)
    pub rolloff: f32,
    /// Levels per channel (0 = off)
    pub posterize: f32,
    pub spectral: SpectralMode,

    // ========== Bloom / halation ==========
    pub bloom_strength: f32,
    /// Bright-pass threshold (0 to 100)
    pub bloom_threshold: f32,
    pub halation: f32,
    pub halation_tint: [f32; 3],
    pub mist: f32,

    // ========== Grain ==========
    pub grain_stock: GrainStock,
    pub grain_source: GrainSource,
    pub grain_shadow: f32,
    pub grain_highlight: f32,
    /// Grain cell size in pixels
    pub grain_size: f32,
    /// Global grain multiplier
    pub grain_global: f32,

    // ========== Film defects ==========
    pub scratches: f32,
    pub dust: f32,
    pub light_leak: f32,

    // ========== Dither ==========
    pub dither_algorithm: DitherAlgorithm,
    /// Bits per channel (1 to 8)
    pub dither_depth: f32,
    pub dither_strength: f32,

    // ========== Structural ==========
    pub output_transform: PrintStock,
    /// Clockwise quarter turns (0 to 3)
    pub rotate_quarters: u8,
    pub flip_x: bool,
    pub flip_y: bool,
    /// Border width as a percentage of a tenth of the short edge
    pub border_size: f32,
    pub border_color: [f32; 3],
}

impl Default for AdjustmentState {
    /// Identity adjustments
    fn default() -> Self {
        Self {
            exposure: 0.0,
            contrast: 0.0,
            highlights: 0.0,
            shadows: 0.0,
            whites: 0.0,
            blacks: 0.0,
            dehaze: 0.0,
            clarity: 0.0,
            sharpness: 0.0,
            denoise: 0.0,
            temperature: 0.0,
            tint: 0.0,
            vibrance: 0.0,
            saturation: 0.0,
            split_shadow_hue: 0.0,
            split_shadow_sat: 0.0,
            split_midtone_hue: 0.0,
            split_midtone_sat: 0.0,
            split_highlight_hue: 0.0,
            split_highlight_sat: 0.0,
            split_balance: 0.0,
            hsl_red: [0.0; 3],
            hsl_orange: [0.0; 3],
            hsl_yellow: [0.0; 3],
            hsl_green: [0.0; 3],
            hsl_aqua: [0.0; 3],
            hsl_blue: [0.0; 3],
            hsl_purple: [0.0; 3],
            hsl_magenta: [0.0; 3],
            lut_opacity: 100.0,
            ascii_size: 0.0,
            ascii_palette: AsciiPalette::Source,
            overlay_opacity: 0.0,
            overlay_blend: BlendMode::Normal,
            selective_hue: 0.0,
            selective_range: 30.0,
            selective_feather: 15.0,
            selective_saturation: 0.0,
            selective_luminance: 0.0,
            chromatic_aberration: 0.0,
            vignette: 0.0,
            fade: 0.0,
            rolloff: 0.0,
            posterize: 0.0,
            spectral: SpectralMode::Off,
            bloom_strength: 0.0,
            bloom_threshold: 70.0,
            halation: 0.0,
            halation_tint: [1.0, 0.4, 0.6],
            mist: 0.0,
            grain_stock: GrainStock::Digital,
            grain_source: GrainSource::Procedural,
            grain_shadow: 0.0,
            grain_highlight: 0.0,
            grain_size: 1.0,
            grain_global: 1.0,
            scratches: 0.0,
            dust: 0.0,
            light_leak: 0.0,
            dither_algorithm: DitherAlgorithm::Bayer,
            dither_depth: 1.0,
            dither_strength: 0.0,
            output_transform: PrintStock::None,
            rotate_quarters: 0,
            flip_x: false,
            flip_y: false,
            border_size: 0.0,
            border_color: [1.0, 1.0, 1.0],
        }
    }
}

impl AdjustmentState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Check if every value is at its default
    pub fn is_unedited(&self) -> bool {
        *self == Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// HSL triples in band order red, orange, yellow, green, aqua, blue, purple, magenta
    pub fn hsl_bands(&self) -> [[f32; 3]; 8] {
        [
            self.hsl_red,
            self.hsl_orange,
            self.hsl_yellow,
            self.hsl_green,
            self.hsl_aqua,
            self.hsl_blue,
            self.hsl_purple,
            self.hsl_magenta,
        ]
    }

    /// Write a single named field (camelCase name)
    pub fn set_field(&mut self, name: &str, value: Value) -> Result<()> {
        let mut partial = PartialAdjustments::new();
        partial.insert(name.to_string(), value);
        self.apply_partial(&partial)
    }

    /// Write several fields at once. Either every field applies or none does.
    pub fn apply_partial(&mut self, partial: &PartialAdjustments) -> Result<()> {
        let mut fields = self.to_map()?;
        for (name, value) in partial {
            match fields.get(name) {
                Some(current) if same_shape(current, value) => {
                    fields.insert(name.clone(), value.clone());
                }
                Some(_) => {
                    return Err(EngineError::InvalidAdjustment {
                        name: name.clone(),
                        reason: format!("unexpected value {value}"),
                    })
                }
                None => return Err(EngineError::UnknownAdjustment(name.clone())),
            }
        }
        *self = Self::from_map(fields).map_err(|e| match partial.keys().next() {
            Some(name) if partial.len() == 1 => EngineError::InvalidAdjustment {
                name: name.clone(),
                reason: e.to_string(),
            },
            _ => e,
        })?;
        Ok(())
    }

    /// State with a mask's local adjustments folded in.
    ///
    /// Numbers are summed, numeric vectors summed per component, and anything
    /// else (enums, flags, color swatches) is replaced. Unknown keys and
    /// structural fields are ignored, so the local pass keeps the frame geometry.
    pub fn merged(&self, local: &PartialAdjustments) -> Result<Self> {
        if local.is_empty() {
            return Ok(self.clone());
        }
        let mut fields = self.to_map()?;
        for (name, value) in local {
            if STRUCTURAL_FIELDS.contains(&name.as_str()) {
                continue;
            }
            let Some(base) = fields.get(name) else {
                continue;
            };
            let merged = if SWATCH_FIELDS.contains(&name.as_str()) {
                value.clone()
            } else {
                sum_values(base, value).unwrap_or_else(|| value.clone())
            };
            fields.insert(name.clone(), merged);
        }
        Self::from_map(fields)
    }

    /// Field-wise interpolation between two snapshots.
    ///
    /// Numbers and numeric vectors interpolate linearly; integers, enums and
    /// flags snap to the nearer endpoint. `t = 0` returns `pre`, `t = 1` `post`.
    pub fn interpolate(pre: &Self, post: &Self, t: f32) -> Result<Self> {
        let t = t.clamp(0.0, 1.0);
        if t == 0.0 {
            return Ok(pre.clone());
        }
        if t == 1.0 {
            return Ok(post.clone());
        }
        let a = pre.to_map()?;
        let b = post.to_map()?;
        let mut out = Map::new();
        for (name, post_value) in &b {
            let value = match a.get(name) {
                Some(pre_value) => lerp_value(pre_value, post_value, t),
                None => post_value.clone(),
            };
            out.insert(name.clone(), value);
        }
        Self::from_map(out)
    }

    /// State after applying a preset: reset to defaults, keep the structural
    /// fields, then write the preset's fields. Unknown preset keys are skipped.
    pub fn with_preset(&self, preset: &PartialAdjustments) -> Result<Self> {
        let current = self.to_map()?;
        let mut fields = Self::default().to_map()?;
        for name in STRUCTURAL_FIELDS {
            if let Some(value) = current.get(*name) {
                fields.insert((*name).to_string(), value.clone());
            }
        }
        for (name, value) in preset {
            if PRESET_META_KEYS.contains(&name.as_str()) {
                continue;
            }
            match fields.get(name) {
                Some(existing) if same_shape(existing, value) => {
                    fields.insert(name.clone(), value.clone());
                }
                _ => tracing::debug!(key = %name, "skipping preset key"),
            }
        }
        Self::from_map(fields)
    }

    /// Serialize into a field map
    pub fn to_map(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(EngineError::InvalidAdjustment {
                name: "<state>".into(),
                reason: format!("serialized to non-object {other}"),
            }),
        }
    }

    fn from_map(map: Map<String, Value>) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(map))?)
    }
}

/// Coarse JSON type check so a number never lands in an enum slot and vice versa
fn same_shape(current: &Value, value: &Value) -> bool {
    match (current, value) {
        (Value::Number(_), Value::Number(_)) => true,
        (Value::Bool(_), Value::Bool(_)) => true,
        (Value::String(_), Value::String(_)) => true,
        (Value::Array(a), Value::Array(b)) => a.len() == b.len(),
        _ => false,
    }
}

fn sum_values(base: &Value, delta: &Value) -> Option<Value> {
    match (base, delta) {
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
                return Some(Value::from(x + y));
            }
            let sum = a.as_f64()? + b.as_f64()?;
            Number::from_f64(sum).map(Value::Number)
        }
        (Value::Array(a), Value::Array(b)) if a.len() == b.len() => a
            .iter()
            .zip(b)
            .map(|(x, y)| sum_values(x, y))
            .collect::<Option<Vec<_>>>()
            .map(Value::Array),
        _ => None,
    }
}

fn lerp_value(pre: &Value, post: &Value, t: f32) -> Value {
    let nearest = || if t < 0.5 { pre.clone() } else { post.clone() };
    match (pre, post) {
        (Value::Number(a), Value::Number(b)) => {
            if a.is_u64() && b.is_u64() {
                return nearest();
            }
            match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => {
                    let t = t as f64;
                    Number::from_f64(x * (1.0 - t) + y * t)
                        .map(Value::Number)
                        .unwrap_or_else(nearest)
                }
                _ => nearest(),
            }
        }
        (Value::Array(a), Value::Array(b)) if a.len() == b.len() => Value::Array(
            a.iter().zip(b).map(|(x, y)| lerp_value(x, y, t)).collect(),
        ),
        _ => nearest(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use serde_json::json;

    fn partial(value: Value) -> PartialAdjustments {
        match value {
            Value::Object(map) => map,
            _ => panic!("test partial must be an object"),
        }
    }

    #[test]
    fn test_default_is_unedited() {
        let state = AdjustmentState::default();
        assert!(state.is_unedited());
        assert_eq!(state.grain_global, 1.0);
        assert_eq!(state.bloom_threshold, 70.0);
        assert_eq!(state.lut_opacity, 100.0);
    }

    #[test]
    fn test_serialization() {
        let mut state = AdjustmentState::default();
        state.exposure = 1.5;
        state.contrast = 20.0;
        state.hsl_blue = [10.0, -20.0, 5.0];
        state.grain_stock = GrainStock::Slide;

        let json = state.to_json().unwrap();
        assert!(json.contains("\"grainStock\":\"slide\""));
        let restored = AdjustmentState::from_json(&json).unwrap();

        assert_eq!(state, restored);
        assert!(!restored.is_unedited());
    }

    #[test]
    fn test_reset() {
        let mut state = AdjustmentState::default();
        state.exposure = 2.0;
        state.dither_strength = 50.0;
        assert!(!state.is_unedited());

        state.reset();
        assert!(state.is_unedited());
    }

    #[test]
    fn test_set_field_by_name() {
        let mut state = AdjustmentState::default();
        state.set_field("exposure", json!(0.5)).unwrap();
        state.set_field("ditherAlgorithm", json!("atkinson")).unwrap();
        state.set_field("hslGreen", json!([5, 10, -10])).unwrap();

        assert_eq!(state.exposure, 0.5);
        assert_eq!(state.dither_algorithm, DitherAlgorithm::Atkinson);
        assert_eq!(state.hsl_green, [5.0, 10.0, -10.0]);
    }

    #[test]
    fn test_set_field_rejects_bad_input() {
        let mut state = AdjustmentState::default();
        assert!(matches!(
            state.set_field("warpDrive", json!(1.0)),
            Err(EngineError::UnknownAdjustment(_))
        ));
        // HSL triples must have exactly three components
        assert!(matches!(
            state.set_field("hslRed", json!([1.0, 2.0])),
            Err(EngineError::InvalidAdjustment { .. })
        ));
        assert!(matches!(
            state.set_field("grainStock", json!("polaroid")),
            Err(EngineError::InvalidAdjustment { .. })
        ));
        assert!(state.is_unedited());
    }

    #[test]
    fn test_apply_partial_is_all_or_nothing() {
        let mut state = AdjustmentState::default();
        let result = state.apply_partial(&partial(json!({
            "exposure": 1.0,
            "contrast": "high"
        })));
        assert!(result.is_err());
        assert_eq!(state.exposure, 0.0);
    }

    #[test]
    fn test_merged_sums_numbers_and_overrides_rest() {
        let mut base = AdjustmentState::default();
        base.exposure = 0.5;
        base.hsl_red = [1.0, 2.0, 3.0];

        let local = partial(json!({
            "exposure": -1.0,
            "hslRed": [1.0, 1.0, 1.0],
            "spectral": "thermal",
            "halationTint": [0.0, 1.0, 0.0],
            "notAField": 3
        }));
        let merged = base.merged(&local).unwrap();

        assert_abs_diff_eq!(merged.exposure, -0.5);
        assert_eq!(merged.hsl_red, [2.0, 3.0, 4.0]);
        assert_eq!(merged.spectral, SpectralMode::Thermal);
        assert_eq!(merged.halation_tint, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_merged_ignores_structural_fields() {
        let mut base = AdjustmentState::default();
        base.rotate_quarters = 1;
        let local = partial(json!({
            "rotateQuarters": 1,
            "flipX": true,
            "borderSize": 10.0,
            "borderColor": [1.0, 0.0, 0.0],
            "exposure": 0.5
        }));
        let merged = base.merged(&local).unwrap();
        assert_eq!(merged.rotate_quarters, 1);
        assert!(!merged.flip_x);
        assert_eq!(merged.border_size, base.border_size);
        assert_eq!(merged.border_color, base.border_color);
        assert_abs_diff_eq!(merged.exposure, 0.5);

        // Malformed structural values never reach deserialization
        let odd = partial(json!({ "rotateQuarters": 0.5 }));
        assert_eq!(base.merged(&odd).unwrap(), base);
    }

    #[test]
    fn test_merged_rejects_bad_local_value() {
        let base = AdjustmentState::default();
        let local = partial(json!({ "grainStock": "polaroid" }));
        assert!(base.merged(&local).is_err());
    }

    #[test]
    fn test_interpolate_endpoints_and_midpoint() {
        let pre = AdjustmentState::default();
        let mut post = AdjustmentState::default();
        post.exposure = 1.0;
        post.hsl_aqua = [20.0, 40.0, -60.0];
        post.grain_stock = GrainStock::Negative;

        assert_eq!(AdjustmentState::interpolate(&pre, &post, 0.0).unwrap(), pre);
        assert_eq!(AdjustmentState::interpolate(&pre, &post, 1.0).unwrap(), post);

        let mid = AdjustmentState::interpolate(&pre, &post, 0.25).unwrap();
        assert_abs_diff_eq!(mid.exposure, 0.25, epsilon = 1e-6);
        assert_abs_diff_eq!(mid.hsl_aqua[2], -15.0, epsilon = 1e-5);
        assert_eq!(mid.grain_stock, GrainStock::Digital);
        let late = AdjustmentState::interpolate(&pre, &post, 0.75).unwrap();
        assert_eq!(late.grain_stock, GrainStock::Negative);
    }

    #[test]
    fn test_preset_keeps_structural_fields() {
        let mut state = AdjustmentState::default();
        state.rotate_quarters = 1;
        state.flip_x = true;
        state.border_size = 20.0;
        state.output_transform = PrintStock::Kodak2383;
        state.contrast = 40.0;

        let preset = partial(json!({
            "name": "Portra-ish",
            "category": "film",
            "exposure": 0.2,
            "grainShadow": 30,
            "unknownKnob": 1
        }));
        let next = state.with_preset(&preset).unwrap();

        assert_eq!(next.rotate_quarters, 1);
        assert!(next.flip_x);
        assert_eq!(next.border_size, 20.0);
        assert_eq!(next.output_transform, PrintStock::Kodak2383);
        assert_eq!(next.contrast, 0.0);
        assert_abs_diff_eq!(next.exposure, 0.2);
        assert_eq!(next.grain_shadow, 30.0);
    }

    #[test]
    fn test_structural_fields_exist() {
        let map = AdjustmentState::default().to_map().unwrap();
        for name in STRUCTURAL_FIELDS.iter().chain(SWATCH_FIELDS) {
            assert!(map.contains_key(*name), "missing {name}");
        }
    }

    #[test]
    fn test_detect_grain_stock() {
        assert_eq!(GrainStock::detect("Fuji Velvia 50"), GrainStock::Slide);
        assert_eq!(GrainStock::detect("Kodak Ektachrome E100"), GrainStock::Slide);
        assert_eq!(GrainStock::detect("LomoChrome Purple"), GrainStock::Negative);
        assert_eq!(GrainStock::detect("Kodak Portra 400"), GrainStock::Negative);
    }

    #[test]
    fn test_print_profiles() {
        assert!(PrintStock::None.profile().is_none());
        let kodak = PrintStock::Kodak2383.profile().unwrap();
        assert_eq!(kodak.contrast, 25.0);
        assert_eq!(kodak.shadow_hue, 190.0);
    }
}
