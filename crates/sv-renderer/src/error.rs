//! Render error taxonomy

use std::time::Duration;

/// Errors reported by a rasterizer backend for a single call
#[derive(Debug, Clone, thiserror::Error)]
pub enum RasterError {
    /// The call failed; the backend is still usable
    #[error("Rasterizer error: {0}")]
    Failed(String),
    /// The underlying context is gone and cannot render again
    #[error("Rendering context lost: {0}")]
    ContextLost(String),
    /// The backend could not be created on this host
    #[error("Rasterizer unavailable: {0}")]
    Unavailable(String),
}

/// Errors reported by the render engine for one job
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RenderError {
    /// Per-job failure; the engine keeps serving later jobs
    #[error("Render failed: {0}")]
    Failure(String),
    /// The job did not finish (or start) before its deadline
    #[error("Render exceeded deadline of {0:?}")]
    Timeout(Duration),
    /// The rasterizer is unrecoverable; rendering must be restarted
    #[error("Fatal render engine error: {0}")]
    Fatal(String),
}

impl RenderError {
    /// True when the process must restart its rendering capability
    pub fn is_fatal(&self) -> bool {
        matches!(self, RenderError::Fatal(_))
    }
}

impl From<RasterError> for RenderError {
    fn from(err: RasterError) -> Self {
        match err {
            RasterError::Failed(msg) => RenderError::Failure(msg),
            RasterError::ContextLost(msg) | RasterError::Unavailable(msg) => {
                RenderError::Fatal(msg)
            }
        }
    }
}
