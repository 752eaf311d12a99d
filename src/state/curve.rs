/// Tone curve lookup tables
///
/// The curve editor hands the engine either finished 256-entry tables or
/// raw control points. Points are fitted with a Catmull-Rom spline and the
/// result is memoized in a `CurveCache` keyed by a hash of the points, so
/// dragging an unrelated slider never refits the curve.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::color::Rgb;
use crate::error::{EngineError, Result};

pub const CURVE_SIZE: usize = 256;

/// Four 256-entry tables: master, red, green, blue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToneCurveLut {
    tables: [[u8; CURVE_SIZE]; 4],
}

impl Default for ToneCurveLut {
    fn default() -> Self {
        Self::identity()
    }
}

fn identity_table() -> [u8; CURVE_SIZE] {
    let mut table = [0u8; CURVE_SIZE];
    for (i, entry) in table.iter_mut().enumerate() {
        *entry = i as u8;
    }
    table
}

/// Linear lookup of a 0..1 value in a 256-entry table
#[inline]
fn lookup(table: &[u8; CURVE_SIZE], v: f32) -> f32 {
    let pos = v.clamp(0.0, 1.0) * 255.0;
    let i0 = (pos.floor() as usize).min(CURVE_SIZE - 1);
    let i1 = (i0 + 1).min(CURVE_SIZE - 1);
    let frac = pos - i0 as f32;
    let a = table[i0] as f32;
    let b = table[i1] as f32;
    (a + (b - a) * frac) / 255.0
}

impl ToneCurveLut {
    pub fn identity() -> Self {
        let table = identity_table();
        Self {
            tables: [table; 4],
        }
    }

    pub fn from_tables(master: [u8; 256], red: [u8; 256], green: [u8; 256], blue: [u8; 256]) -> Self {
        Self {
            tables: [master, red, green, blue],
        }
    }

    /// Accepts 256 bytes (master only) or 1024 bytes (master, R, G, B)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut lut = Self::identity();
        match bytes.len() {
            CURVE_SIZE => lut.tables[0].copy_from_slice(bytes),
            n if n == CURVE_SIZE * 4 => {
                for (table, chunk) in lut.tables.iter_mut().zip(bytes.chunks_exact(CURVE_SIZE)) {
                    table.copy_from_slice(chunk);
                }
            }
            n => {
                return Err(EngineError::InvalidCurve(format!(
                    "expected 256 or 1024 bytes, got {n}"
                )))
            }
        }
        Ok(lut)
    }

    pub fn is_identity(&self) -> bool {
        let identity = identity_table();
        self.tables.iter().all(|t| *t == identity)
    }

    /// Rows laid out master, R, G, B for a 256x4 texture upload
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.tables)
    }

    pub fn master(&self) -> &[u8; CURVE_SIZE] {
        &self.tables[0]
    }

    /// Master curve on all channels, then each channel's own curve
    pub fn apply(&self, c: Rgb) -> Rgb {
        let [master, red, green, blue] = &self.tables;
        Rgb::new(
            lookup(red, lookup(master, c.x)),
            lookup(green, lookup(master, c.y)),
            lookup(blue, lookup(master, c.z)),
        )
    }
}

/// Control points for all four curves, each a list of `[x, y]` in 0..1
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct CurvePoints {
    pub master: Vec<[f32; 2]>,
    pub red: Vec<[f32; 2]>,
    pub green: Vec<[f32; 2]>,
    pub blue: Vec<[f32; 2]>,
}

impl CurvePoints {
    /// Straight diagonal on every channel
    pub fn diagonal() -> Self {
        let line = vec![[0.0, 0.0], [1.0, 1.0]];
        Self {
            master: line.clone(),
            red: line.clone(),
            green: line.clone(),
            blue: line,
        }
    }

    /// Hash over the exact bit patterns of every point
    pub fn version_key(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for channel in [&self.master, &self.red, &self.green, &self.blue] {
            channel.len().hash(&mut hasher);
            for [x, y] in channel {
                x.to_bits().hash(&mut hasher);
                y.to_bits().hash(&mut hasher);
            }
        }
        hasher.finish()
    }

    pub fn to_lut(&self) -> Result<ToneCurveLut> {
        Ok(ToneCurveLut::from_tables(
            fit_curve(&self.master)?,
            fit_curve(&self.red)?,
            fit_curve(&self.green)?,
            fit_curve(&self.blue)?,
        ))
    }
}

/// Fit a Catmull-Rom spline through control points and sample 256 entries.
///
/// Fewer than two points yields the identity table. End tangents use
/// reflected phantom points so collinear points reproduce the straight line.
pub fn fit_curve(points: &[[f32; 2]]) -> Result<[u8; CURVE_SIZE]> {
    if points.iter().flatten().any(|v| !v.is_finite()) {
        return Err(EngineError::InvalidCurve("non-finite control point".into()));
    }
    if points.len() < 2 {
        return Ok(identity_table());
    }

    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| a[0].total_cmp(&b[0]));

    let mut table = [0u8; CURVE_SIZE];
    for (i, entry) in table.iter_mut().enumerate() {
        let x = i as f32 / 255.0;
        let y = catmull_rom(&sorted, x).clamp(0.0, 1.0);
        *entry = (y * 255.0).round() as u8;
    }
    Ok(table)
}

fn catmull_rom(points: &[[f32; 2]], x: f32) -> f32 {
    let last = points.len() - 1;
    if x <= points[0][0] {
        return points[0][1];
    }
    if x >= points[last][0] {
        return points[last][1];
    }

    let mut i = 0;
    while i < last && points[i + 1][0] < x {
        i += 1;
    }
    let p1 = points[i];
    let p2 = points[i + 1];
    let span = p2[0] - p1[0];
    if span <= f32::EPSILON {
        return p2[1];
    }
    let p0 = if i == 0 {
        [2.0 * p1[0] - p2[0], 2.0 * p1[1] - p2[1]]
    } else {
        points[i - 1]
    };
    let p3 = if i + 2 > last {
        [2.0 * p2[0] - p1[0], 2.0 * p2[1] - p1[1]]
    } else {
        points[i + 2]
    };

    let t = (x - p1[0]) / span;
    let t2 = t * t;
    let t3 = t2 * t;
    0.5 * ((2.0 * p1[1])
        + (-p0[1] + p2[1]) * t
        + (2.0 * p0[1] - 5.0 * p1[1] + 4.0 * p2[1] - p3[1]) * t2
        + (-p0[1] + 3.0 * p1[1] - 3.0 * p2[1] + p3[1]) * t3)
}

/// Memoized curve fit with an explicit invalidation key
#[derive(Debug, Default)]
pub struct CurveCache {
    key: Option<u64>,
    lut: ToneCurveLut,
    /// Bumped every time the table is refitted
    generation: u64,
}

impl CurveCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the fitted table, refitting only when the points changed.
    /// On invalid points the previous table is kept.
    pub fn get(&mut self, points: &CurvePoints) -> Result<&ToneCurveLut> {
        let key = points.version_key();
        if self.key != Some(key) {
            self.lut = points.to_lut()?;
            self.key = Some(key);
            self.generation += 1;
        }
        Ok(&self.lut)
    }

    pub fn key(&self) -> Option<u64> {
        self.key
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagonal_points_give_identity() {
        let lut = CurvePoints::diagonal().to_lut().unwrap();
        assert!(lut.is_identity());
    }

    #[test]
    fn test_diagonal_with_interior_points_is_identity() {
        let points = vec![[0.0, 0.0], [0.25, 0.25], [0.5, 0.5], [0.75, 0.75], [1.0, 1.0]];
        assert_eq!(fit_curve(&points).unwrap(), identity_table());
    }

    #[test]
    fn test_unsorted_points_and_clamping() {
        let points = vec![[1.0, 1.2], [0.0, -0.3], [0.5, 0.9]];
        let table = fit_curve(&points).unwrap();
        assert_eq!(table[0], 0);
        assert_eq!(table[255], 255);
        assert!(table[128] > 200);
    }

    #[test]
    fn test_non_monotonic_curves_allowed() {
        let inverted = fit_curve(&[[0.0, 1.0], [1.0, 0.0]]).unwrap();
        assert_eq!(inverted[0], 255);
        assert_eq!(inverted[255], 0);
    }

    #[test]
    fn test_rejects_nan_points() {
        assert!(matches!(
            fit_curve(&[[0.0, f32::NAN], [1.0, 1.0]]),
            Err(EngineError::InvalidCurve(_))
        ));
    }

    #[test]
    fn test_from_bytes_lengths() {
        let master: Vec<u8> = (0..=255u8).rev().collect();
        let lut = ToneCurveLut::from_bytes(&master).unwrap();
        assert_eq!(lut.master()[0], 255);
        assert!(!lut.is_identity());
        assert!(ToneCurveLut::from_bytes(&[0u8; 100]).is_err());
        assert_eq!(lut.as_bytes().len(), 1024);
    }

    #[test]
    fn test_identity_apply_preserves_color() {
        let lut = ToneCurveLut::identity();
        let c = Rgb::new(0.2, 0.5, 0.9);
        let out = lut.apply(c);
        assert!((out - c).x.abs() < 1e-6);
        assert!((out - c).y.abs() < 1e-6);
        assert!((out - c).z.abs() < 1e-6);
    }

    #[test]
    fn test_cache_refits_only_on_change() {
        let mut cache = CurveCache::new();
        let mut points = CurvePoints::diagonal();
        cache.get(&points).unwrap();
        cache.get(&points).unwrap();
        assert_eq!(cache.generation(), 1);

        points.master = vec![[0.0, 0.1], [1.0, 0.9]];
        let lut = cache.get(&points).unwrap();
        assert_eq!(lut.master()[0], 26);
        assert_eq!(cache.generation(), 2);
    }
}
