//! percolo: The Spectral Layer.
//!
//! Provides Chebyshev spectral graph convolution layers built on `candle`
//! tensors, plus the Laplacian preprocessing that produces their graph
//! operator.

pub mod laplacian;
pub mod nn;

#[cfg(feature = "backend-burn")]
pub mod burn_cheb;

pub use laplacian::{normalized_laplacian, rescale_laplacian};
pub use nn::{ChebConv, ChebConvConfig};

use thiserror::Error;

/// Errors surfaced by layer construction, preprocessing, and the forward
/// pass.
#[derive(Debug, Error)]
pub enum SpectralError {
    /// Invalid construction parameters or incompatible shapes, rejected
    /// before any numeric work.
    #[error("configuration error: {0}")]
    Config(String),
    /// Failure inside a tensor operation.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, SpectralError>;
