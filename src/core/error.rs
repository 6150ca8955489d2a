use thiserror::Error;

use crate::core::cancel::Cancelled;

/// Hard failures of the pipeline. Everything else (submission failures,
/// readiness timeouts, overlay failures) is recovered locally and surfaces as a
/// result status instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        PipelineError::Configuration(message.into())
    }
}
