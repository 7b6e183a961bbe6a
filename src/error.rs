//! Error taxonomy for the training engine.
//!
//! Numerical faults (non-positive-definite covariance, zero homogeneous w,
//! NaN gradients) never surface here: the kernels drop the affected Gaussian
//! for the current view and the backward pass reaches the same decision, so
//! gradients stay consistent. Only capacity and backend faults terminate the
//! training loop.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainError {
    /// A requested allocation exceeds the configured byte budget or a
    /// backend limit. The densify cap degrades gracefully first; this fires
    /// only when a scene cannot shrink below the budget at all.
    #[error("capacity exceeded: {what} needs {required} bytes, budget is {budget}")]
    Capacity {
        what: &'static str,
        required: u64,
        budget: u64,
    },

    /// Device lost, adapter unavailable, or a submission-level failure.
    #[error("GPU backend error: {0}")]
    Backend(String),

    /// Malformed engine input (mismatched array lengths, empty scene,
    /// out-of-range SH degree). Loader-level format faults are handled by
    /// external collaborators before data reaches the engine.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl TrainError {
    pub fn backend(msg: impl Into<String>) -> Self {
        TrainError::Backend(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        TrainError::InvalidInput(msg.into())
    }
}
