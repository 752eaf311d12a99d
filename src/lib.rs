/// Non-destructive film look engine
///
/// A single image is edited through a flat `AdjustmentState`, optional
/// local masks, a tone curve, a 3-D LUT and an overlay. `Engine` renders it
/// through a fixed pass graph on a wgpu or CPU backend:
/// - `state` - adjustment record, masks, curves, LUTs, history
/// - `render` - backend trait, targets, per-pass parameters, CPU backend
/// - `gpu` - wgpu backend and WGSL shaders
/// - `engine` - orchestration, recovery, export
/// - `analysis` / `export` - histogram, vectorscope, tiling, encoding

pub mod analysis;
pub mod color;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod gpu;
pub mod render;
pub mod state;

pub use analysis::{Histogram, Vectorscope};
pub use config::{BackendChoice, DeviceClass, EngineConfig};
pub use engine::{BackendFactory, Engine, EngineEvent, EngineStatus};
pub use error::{EngineError, Result};
pub use export::{ExportFormat, ExportPreset};
pub use render::{RenderBackend, ViewOptions};
pub use state::{AdjustmentState, CubeLut, CurvePoints, Mask, MaskShape, PartialAdjustments};
