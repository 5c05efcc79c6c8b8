//! Error taxonomy split by blast radius: startup failures are terminal,
//! per-iteration failures are logged and skipped.
use thiserror::Error;

/// Terminal failures during startup. Any of these keeps the pipeline from
/// ever entering `Running`.
#[derive(Debug, Error)]
pub enum StartupError {
    /// Camera access was denied by the platform.
    #[error("camera access denied: {0}")]
    Permission(String),

    /// No usable camera is exposed by the platform.
    #[error("camera unavailable: {0}")]
    Unsupported(String),

    /// The model could not be fetched or parsed.
    #[error("model load failed: {0}")]
    Load(String),
}

/// Recoverable failures inside one pipeline iteration.
#[derive(Debug, Error)]
pub enum IterationError {
    /// The captured frame is smaller than the crop target.
    #[error("frame {width}x{height} is smaller than the 384x512 crop")]
    Shape { width: u32, height: u32 },

    /// The runtime failed to execute the model.
    #[error("inference failed: {0}")]
    Infer(String),
}
