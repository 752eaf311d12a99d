/// State management module
///
/// Everything the renderer reads, kept CPU-side so GPU state can always be
/// rebuilt from it:
/// - Adjustment parameters, presets and interpolation (adjustments.rs)
/// - Local adjustment masks (mask.rs)
/// - Tone curve tables and control-point fitting (curve.rs)
/// - 3-D LUTs and the `.cube` parser (lut.rs)
/// - Undo/redo snapshots (history.rs)

pub mod adjustments;
pub mod curve;
pub mod history;
pub mod lut;
pub mod mask;

pub use adjustments::{AdjustmentState, PartialAdjustments};
pub use curve::{CurveCache, CurvePoints, ToneCurveLut};
pub use history::History;
pub use lut::CubeLut;
pub use mask::{Mask, MaskList, MaskShape};
