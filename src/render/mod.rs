/// Render graph building blocks
///
/// - `backend.rs` - the `RenderBackend` trait and backend selection
/// - `targets.rs` - target slots, sizes and the accumulator double buffer
/// - `source.rs` - source downscale policy, film seed, grain texture
/// - `params.rs` - per-pass parameters derived from adjustment state
/// - `ops.rs` / `plane.rs` / `cpu.rs` - the CPU backend

pub mod backend;
pub mod cpu;
pub mod ops;
pub mod params;
pub mod plane;
pub mod source;
pub mod targets;

pub use backend::{create_backend, BackendKind, BlurDirection, DeviceLimits, RenderBackend};
pub use cpu::CpuBackend;
pub use params::{FinalParams, Geometry, GlobalParams, GlowParams, PassContext, ViewOptions};
pub use source::{GrainTexture, SourceImage};
pub use targets::{DoubleBuffer, Region, Slot, TargetSizes};
