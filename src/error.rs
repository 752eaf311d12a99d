/// Error types for the rendering engine
///
/// Errors fall into a few recovery classes:
/// - shader build failures are fatal and stall rendering until a reload
/// - resource exhaustion is recovered by shrinking the source cap and retrying
/// - device loss is recovered by rebuilding every GPU object from CPU-side state
/// - invalid LUT/curve data is rejected at load time, leaving the previous asset in place

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// WGSL module or pipeline failed validation.
    #[error("shader build failed ({stage}): {message}")]
    ShaderBuild { stage: &'static str, message: String },

    /// Texture, buffer or render target allocation failed.
    #[error("resource exhausted allocating {what} at {width}x{height}")]
    ResourceExhausted {
        what: &'static str,
        width: u32,
        height: u32,
    },

    /// GPU device was lost or a submission could not complete.
    #[error("device lost: {0}")]
    DeviceLost(String),

    /// wgpu rejected a call outside an error scope; not retried.
    #[error("GPU validation failed: {0}")]
    GpuValidation(String),

    /// No usable GPU adapter on this system.
    #[error("no suitable GPU adapter found")]
    NoAdapter,

    /// Rendering is stalled after a fatal error.
    #[error("rendering stalled: {0}")]
    Stalled(String),

    /// 3-D LUT data rejected at load time.
    #[error("invalid LUT: {0}")]
    InvalidLut(String),

    /// Tone curve data rejected at load time.
    #[error("invalid tone curve: {0}")]
    InvalidCurve(String),

    /// Adjustment name is not part of the state record.
    #[error("unknown adjustment '{0}'")]
    UnknownAdjustment(String),

    /// Adjustment value has the wrong shape for its field.
    #[error("invalid value for adjustment '{name}': {reason}")]
    InvalidAdjustment { name: String, reason: String },

    /// Mask id not present in the mask list.
    #[error("unknown mask {0}")]
    UnknownMask(u32),

    /// A pass referenced a target that has not been allocated.
    #[error("render target '{0}' is not allocated")]
    MissingTarget(&'static str),

    /// A render was requested before any image was loaded.
    #[error("no source image loaded")]
    NoSource,

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Errors the engine recovers from without surfacing them to the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::ResourceExhausted { .. } | EngineError::DeviceLost(_)
        )
    }
}

/// Result type used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classes() {
        let oom = EngineError::ResourceExhausted {
            what: "main target",
            width: 4000,
            height: 3000,
        };
        assert!(oom.is_recoverable());
        assert!(EngineError::DeviceLost("reset".into()).is_recoverable());

        let shader = EngineError::ShaderBuild {
            stage: "global",
            message: "bad token".into(),
        };
        assert!(!shader.is_recoverable());
        assert!(!EngineError::InvalidLut("size".into()).is_recoverable());
        assert!(!EngineError::GpuValidation("bad binding".into()).is_recoverable());
    }

    #[test]
    fn test_display_mentions_dimensions() {
        let err = EngineError::ResourceExhausted {
            what: "ping target",
            width: 64,
            height: 48,
        };
        assert_eq!(
            err.to_string(),
            "resource exhausted allocating ping target at 64x48"
        );
    }
}
