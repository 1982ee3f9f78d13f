//! Chebyshev spectral graph convolution.
//!
//! The layer computes a K-term Chebyshev polynomial expansion of a graph
//! operator (He, Wei & Wen, 2022):
//!
//! ```text
//! y = Σ_{o=0}^{k-1}  T_o(L̂) · x · W_o     T_0 = x
//!                                          T_1 = L̂ x
//!                                          T_o = 2 L̂ T_{o-1} − T_{o-2}
//! ```
//!
//! where `L̂` is the rescaled normalized Laplacian produced by
//! [`crate::laplacian`] (eigenvalues in `[-1, 1]`) and each `W_o` is an
//! effective weight matrix blended from the raw kernel by
//! [`effective_kernel`]. No eigendecomposition is ever taken; the expansion
//! costs one operator product per order.

use candle_core::{Tensor, D};
use candle_nn::{Activation, Init, Module, VarBuilder};

use crate::laplacian;
use crate::{Result, SpectralError};

/// Construction-time options for [`ChebConv`]. Immutable once the layer is
/// created.
#[derive(Debug, Clone)]
pub struct ChebConvConfig {
    /// Number of Chebyshev terms (polynomial orders `0..k`).
    pub k: usize,
    /// Whether a trainable bias vector is added to the output.
    pub use_bias: bool,
    /// Elementwise activation applied after bias and masking. `None` is the
    /// identity.
    pub activation: Option<Activation>,
    /// Kernel initializer, passed through to the weight store. `None`
    /// selects Glorot uniform, derived from the feature dimensions at build
    /// time.
    pub kernel_init: Option<Init>,
    /// Bias initializer.
    pub bias_init: Init,
}

impl Default for ChebConvConfig {
    fn default() -> Self {
        Self {
            k: 1,
            use_bias: true,
            activation: None,
            kernel_init: None,
            bias_init: candle_nn::init::ZERO,
        }
    }
}

/// Chebyshev spectral graph convolution layer.
///
/// Create with [`ChebConv::new`], then call [`ChebConv::build`] once the
/// input feature size is known; only a built layer can run
/// [`ChebConv::forward`]. The trainable tensors live in the `VarMap` behind
/// the `VarBuilder` handed to `build`, so an external optimizer stepping
/// those vars is immediately visible to subsequent forward passes. The
/// layer itself never writes them.
#[derive(Debug)]
pub struct ChebConv {
    channels: usize,
    config: ChebConvConfig,
    state: State,
}

#[derive(Debug)]
enum State {
    Unbuilt,
    Built(Weights),
}

#[derive(Debug)]
struct Weights {
    /// Raw kernel, shape `(k, in_channels, channels)`.
    kernel: Tensor,
    /// Optional bias, shape `(channels,)`.
    bias: Option<Tensor>,
    in_channels: usize,
}

impl ChebConv {
    /// Creates an unbuilt layer producing `channels` output features per
    /// node.
    pub fn new(channels: usize, config: ChebConvConfig) -> Result<Self> {
        if channels == 0 {
            return Err(SpectralError::Config(
                "channels must be at least 1".into(),
            ));
        }
        if config.k == 0 {
            return Err(SpectralError::Config(
                "at least one Chebyshev term is required (k >= 1)".into(),
            ));
        }
        Ok(Self {
            channels,
            config,
            state: State::Unbuilt,
        })
    }

    /// Number of Chebyshev terms.
    pub fn k(&self) -> usize {
        self.config.k
    }

    /// Number of output features per node.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Whether [`build`](Self::build) has run.
    pub fn is_built(&self) -> bool {
        matches!(self.state, State::Built(_))
    }

    /// Allocates the trainable tensors for `in_channels` input features.
    ///
    /// Registers the kernel `(k, in_channels, channels)` and, when
    /// configured, the bias `(channels,)` under the names `"kernel"` and
    /// `"bias"` in `vb`'s weight store. Transitions the layer from unbuilt
    /// to built; calling it a second time is an error.
    pub fn build(&mut self, in_channels: usize, vb: VarBuilder) -> Result<()> {
        if self.is_built() {
            return Err(SpectralError::Config("layer is already built".into()));
        }
        if in_channels == 0 {
            return Err(SpectralError::Config(
                "in_channels must be at least 1".into(),
            ));
        }
        let kernel_init = self
            .config
            .kernel_init
            .unwrap_or_else(|| glorot_uniform(in_channels, self.channels));
        let kernel = vb.get_with_hints(
            (self.config.k, in_channels, self.channels),
            "kernel",
            kernel_init,
        )?;
        let bias = if self.config.use_bias {
            Some(vb.get_with_hints(self.channels, "bias", self.config.bias_init)?)
        } else {
            None
        };
        self.state = State::Built(Weights {
            kernel,
            bias,
            in_channels,
        });
        Ok(())
    }

    /// Builds the operator consumed by [`forward`](Self::forward) from a
    /// raw adjacency matrix: normalized Laplacian, rescaled to `[-1, 1]`.
    pub fn preprocess(adjacency: &Tensor) -> Result<Tensor> {
        let lap = laplacian::normalized_laplacian(adjacency)?;
        laplacian::rescale_laplacian(&lap, None)
    }

    /// Runs the convolution over `x` under `operator`.
    ///
    /// `x` holds node features, `(n, f_in)` or batched `(b, n, f_in)`;
    /// `operator` is the preprocessed graph operator, `(n, n)` or
    /// `(b, n, n)`. A rank-2 operator broadcasts over a batched `x`. The
    /// output keeps `x`'s leading dimensions with the last replaced by
    /// `channels`.
    pub fn forward(&self, x: &Tensor, operator: &Tensor) -> Result<Tensor> {
        self.forward_with_mask(x, operator, None)
    }

    /// Same as [`forward`](Self::forward), zeroing padded nodes.
    ///
    /// `mask` multiplies the output elementwise before the activation: a
    /// `0.0` entry zeroes that node's row, a `1.0` entry keeps it. A mask
    /// of rank `x.rank() - 1` gains a trailing unit dimension so it
    /// broadcasts across channels. With a non-identity activation, masked
    /// rows read `activation(0)` in the result.
    pub fn forward_with_mask(
        &self,
        x: &Tensor,
        operator: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<Tensor> {
        let weights = self.built()?;
        self.check_shapes(x, operator, weights)?;

        let k = self.config.k;
        let mut output = dot(x, &effective_kernel(&weights.kernel, 0)?)?;

        if k > 1 {
            let mut t_prev = x.clone();
            let mut t_curr = dot(operator, x)?;
            output = (output + dot(&t_curr, &effective_kernel(&weights.kernel, 1)?)?)?;
            for order in 2..k {
                let t_next = (dot(operator, &t_curr)?.affine(2.0, 0.0)? - &t_prev)?;
                output = (output + dot(&t_next, &effective_kernel(&weights.kernel, order)?)?)?;
                t_prev = t_curr;
                t_curr = t_next;
            }
        }

        if let Some(bias) = &weights.bias {
            output = output.broadcast_add(bias)?;
        }
        if let Some(mask) = mask {
            let mask = if mask.rank() + 1 == output.rank() {
                mask.unsqueeze(D::Minus1)?
            } else {
                mask.clone()
            };
            output = output.broadcast_mul(&mask)?;
        }
        match &self.config.activation {
            Some(act) => Ok(act.forward(&output)?),
            None => Ok(output),
        }
    }

    fn built(&self) -> Result<&Weights> {
        match &self.state {
            State::Built(weights) => Ok(weights),
            State::Unbuilt => Err(SpectralError::Config(
                "layer has not been built; call build() with the input feature size first".into(),
            )),
        }
    }

    fn check_shapes(&self, x: &Tensor, operator: &Tensor, weights: &Weights) -> Result<()> {
        let x_rank = x.rank();
        if x_rank != 2 && x_rank != 3 {
            return Err(SpectralError::Config(format!(
                "node features must have rank 2 or 3, got rank {x_rank}"
            )));
        }
        let f_in = x.dim(D::Minus1)?;
        if f_in != weights.in_channels {
            return Err(SpectralError::Config(format!(
                "input has {f_in} features but the layer was built for {}",
                weights.in_channels
            )));
        }
        let n = x.dim(D::Minus2)?;
        let rows = operator.dim(D::Minus2)?;
        let cols = operator.dim(D::Minus1)?;
        if rows != cols {
            return Err(SpectralError::Config(format!(
                "graph operator must be square, got {rows}x{cols}"
            )));
        }
        if rows != n {
            return Err(SpectralError::Config(format!(
                "graph operator is {rows}x{cols} but the input has {n} nodes"
            )));
        }
        if operator.rank() > x_rank {
            return Err(SpectralError::Config(format!(
                "operator rank {} exceeds node feature rank {x_rank}",
                operator.rank()
            )));
        }
        if operator.rank() == 3 && x_rank == 3 && operator.dim(0)? != x.dim(0)? {
            return Err(SpectralError::Config(format!(
                "operator batch size {} does not match feature batch size {}",
                operator.dim(0)?,
                x.dim(0)?
            )));
        }
        Ok(())
    }
}

/// Effective weight matrix for one polynomial order.
///
/// The raw kernel holds one `(f_in, f_out)` slice per Chebyshev
/// interpolation node `x_j = cos(π (j + ½) / k)`. The matrix actually
/// applied at order `o` blends every slice (He, Wei & Wen, 2022):
///
/// ```text
/// W_o = (2 − δ_{o0}) / k · Σ_j T_o(x_j) · kernel[j]
/// ```
///
/// The blend is a broadcast multiply plus a sum over the leading dimension,
/// so gradients flow back into the raw kernel; it is recomputed on every
/// forward call rather than cached, since the kernel changes between
/// optimizer steps. For `k == 1` this reduces to `kernel[0]` exactly.
pub fn effective_kernel(kernel: &Tensor, order: usize) -> Result<Tensor> {
    if kernel.rank() != 3 {
        return Err(SpectralError::Config(format!(
            "kernel must have shape (k, f_in, f_out), got rank {}",
            kernel.rank()
        )));
    }
    let k = kernel.dim(0)?;
    if order >= k {
        return Err(SpectralError::Config(format!(
            "polynomial order {order} out of range for {k} kernel slices"
        )));
    }
    let coeffs = interpolation_coefficients(k, order);
    let scale = Tensor::from_vec(coeffs, (k, 1, 1), kernel.device())?.to_dtype(kernel.dtype())?;
    Ok(kernel.broadcast_mul(&scale)?.sum(0)?)
}

/// Blending coefficients `(2 − δ_{o0}) / k · T_o(x_j)` over the k
/// interpolation nodes.
pub(crate) fn interpolation_coefficients(k: usize, order: usize) -> Vec<f32> {
    let weight = if order == 0 { 1.0 } else { 2.0 } / k as f64;
    (0..k)
        .map(|j| {
            let node = (std::f64::consts::PI * (j as f64 + 0.5) / k as f64).cos();
            (weight * chebyshev_t(order, node)) as f32
        })
        .collect()
}

/// Chebyshev polynomial of the first kind, by the same recurrence the
/// forward pass applies to the operator.
fn chebyshev_t(order: usize, x: f64) -> f64 {
    match order {
        0 => 1.0,
        1 => x,
        _ => {
            let (mut prev, mut curr) = (1.0, x);
            for _ in 2..=order {
                let next = 2.0 * x * curr - prev;
                prev = curr;
                curr = next;
            }
            curr
        }
    }
}

/// Matrix product that broadcasts over an optional leading batch dimension.
fn dot(a: &Tensor, b: &Tensor) -> candle_core::Result<Tensor> {
    if a.rank() == b.rank() {
        a.matmul(b)
    } else {
        a.broadcast_matmul(b)
    }
}

fn glorot_uniform(fan_in: usize, fan_out: usize) -> Init {
    let limit = (6.0 / (fan_in + fan_out) as f64).sqrt();
    Init::Uniform {
        lo: -limit,
        up: limit,
    }
}
