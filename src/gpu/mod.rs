/// GPU render backend
///
/// Architecture:
/// - `shaders.rs` - WGSL source for every pass of the render graph
/// - `uniforms.rs` - `repr(C)` uniform blocks packed from pass parameters
/// - `pipeline.rs` - wgpu device, textures, pipelines and readback
///
/// `GpuBackend` implements `RenderBackend` and produces the same pixels as
/// the CPU backend up to 8-bit rounding.

pub mod pipeline;
pub mod shaders;
pub mod uniforms;

pub use pipeline::GpuBackend;
