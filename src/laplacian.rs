//! Graph Laplacian preprocessing.
//!
//! Produces the operator consumed by the Chebyshev recurrence:
//!
//! | Step      | Formula                    | Spectrum        |
//! |-----------|----------------------------|-----------------|
//! | Normalize | `L = I − D^{−½} A D^{−½}`  | `[0, λ_max ≤ 2]`|
//! | Rescale   | `L̂ = (2/λ_max) L − I`      | `[−1, 1]`       |
//!
//! The rescale bounds the recurrence's spectral range, which is what keeps
//! repeated operator products stable. All transforms here are pure,
//! deterministic, and rank-2 only; batched inputs are preprocessed per
//! graph and stacked by the caller.

use candle_core::{DType, Tensor, D};

use crate::{Result, SpectralError};

/// Upper bound on the largest eigenvalue of the normalized Laplacian
/// (λ_max ≤ 2 always holds).
pub const LAMBDA_MAX_BOUND: f64 = 2.0;

const POWER_ITERATIONS: usize = 100;
const POWER_TOLERANCE: f64 = 1e-7;

/// Symmetrically normalized Laplacian `L = I − D^{−½} A D^{−½}` of a
/// square, non-negative, undirected adjacency matrix.
///
/// Nodes with zero degree have no neighbors to couple to, so their
/// `D^{−½}` entry is taken as zero and their row of `L` reduces to the
/// identity row. A warning is logged when such nodes are present, since
/// downstream results silently carry the convention.
pub fn normalized_laplacian(adjacency: &Tensor) -> Result<Tensor> {
    let n = square_side(adjacency)?;
    let degrees = adjacency
        .sum(D::Minus1)?
        .to_dtype(DType::F32)?
        .to_vec1::<f32>()?;
    let isolated = degrees.iter().filter(|&&d| d <= 0.0).count();
    if isolated > 0 {
        log::warn!(
            "{isolated} of {n} nodes have degree zero; their Laplacian rows reduce to the identity"
        );
    }
    let inv_sqrt: Vec<f32> = degrees
        .iter()
        .map(|&d| if d > 0.0 { 1.0 / d.sqrt() } else { 0.0 })
        .collect();
    let d_inv_sqrt =
        Tensor::from_vec(inv_sqrt, n, adjacency.device())?.to_dtype(adjacency.dtype())?;
    let a_norm = adjacency
        .broadcast_mul(&d_inv_sqrt.reshape((n, 1))?)?
        .broadcast_mul(&d_inv_sqrt.reshape((1, n))?)?;
    let eye = Tensor::eye(n, adjacency.dtype(), adjacency.device())?;
    Ok((eye - a_norm)?)
}

/// Maps a Laplacian's spectrum from `[0, λ_max]` to `[−1, 1]`:
/// `L̂ = (2/λ_max) L − I`.
///
/// Pass `Some(λ)` to use a known bound (2.0 is always safe for the
/// normalized Laplacian); `None` estimates λ_max with
/// [`estimate_lambda_max`]. Not idempotent; apply it exactly once.
pub fn rescale_laplacian(laplacian: &Tensor, lambda_max: Option<f64>) -> Result<Tensor> {
    let n = square_side(laplacian)?;
    let lambda = match lambda_max {
        Some(value) if value > 0.0 => value,
        Some(value) => {
            return Err(SpectralError::Config(format!(
                "lambda_max must be positive, got {value}"
            )))
        }
        None => estimate_lambda_max(laplacian)?,
    };
    let eye = Tensor::eye(n, laplacian.dtype(), laplacian.device())?;
    Ok((laplacian.affine(2.0 / lambda, 0.0)? - eye)?)
}

/// Largest-eigenvalue estimate via power iteration.
///
/// Deterministic: the start vector is a fixed all-ones direction and the
/// iteration cap and tolerance are compile-time constants. When the
/// iteration degenerates (zero matrix, non-finite norms) the estimate
/// falls back to [`LAMBDA_MAX_BOUND`] with a warning instead of
/// propagating NaN/Inf into the rescale.
pub fn estimate_lambda_max(laplacian: &Tensor) -> Result<f64> {
    let n = square_side(laplacian)?;
    let mut v = Tensor::ones((n, 1), laplacian.dtype(), laplacian.device())?
        .affine(1.0 / (n as f64).sqrt(), 0.0)?;
    let mut lambda = 0.0f64;
    for _ in 0..POWER_ITERATIONS {
        let w = laplacian.matmul(&v)?;
        let norm = (w
            .sqr()?
            .sum_all()?
            .to_dtype(DType::F32)?
            .to_scalar::<f32>()? as f64)
            .sqrt();
        if !norm.is_finite() || norm <= f64::EPSILON {
            log::warn!(
                "power iteration degenerated (|Lv| = {norm}); falling back to lambda_max = {LAMBDA_MAX_BOUND}"
            );
            return Ok(LAMBDA_MAX_BOUND);
        }
        if (norm - lambda).abs() <= POWER_TOLERANCE * norm.max(1.0) {
            return Ok(norm);
        }
        lambda = norm;
        v = w.affine(1.0 / norm, 0.0)?;
    }
    Ok(lambda)
}

/// Expands a rescaled operator into the polynomial basis
/// `[T_0 = I, T_1 = L̂, T_j = 2 L̂ T_{j−1} − T_{j−2}]`, `k` terms.
///
/// Useful when the same operator feeds many forward passes and the basis
/// is worth materializing once; the convolution layer itself recomputes
/// the recurrence against the features instead, which is cheaper for a
/// single pass.
pub fn chebyshev_filter(operator: &Tensor, k: usize) -> Result<Vec<Tensor>> {
    if k == 0 {
        return Err(SpectralError::Config(
            "at least one polynomial term is required (k >= 1)".into(),
        ));
    }
    let n = square_side(operator)?;
    let mut basis = vec![Tensor::eye(n, operator.dtype(), operator.device())?];
    if k > 1 {
        basis.push(operator.clone());
    }
    for j in 2..k {
        let next = (operator.matmul(&basis[j - 1])?.affine(2.0, 0.0)? - &basis[j - 2])?;
        basis.push(next);
    }
    Ok(basis)
}

fn square_side(matrix: &Tensor) -> Result<usize> {
    if matrix.rank() != 2 {
        return Err(SpectralError::Config(format!(
            "expected a square matrix, got rank {}",
            matrix.rank()
        )));
    }
    let (rows, cols) = matrix.dims2()?;
    if rows != cols {
        return Err(SpectralError::Config(format!(
            "expected a square matrix, got {rows}x{cols}"
        )));
    }
    if rows == 0 {
        return Err(SpectralError::Config("matrix must be non-empty".into()));
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    const S: f32 = std::f32::consts::FRAC_1_SQRT_2;

    fn path_adjacency() -> Tensor {
        Tensor::from_vec(
            vec![0.0f32, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0],
            (3, 3),
            &Device::Cpu,
        )
        .unwrap()
    }

    fn assert_close(actual: &Tensor, expected: &[f32], tol: f32) {
        let values = actual.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(values.len(), expected.len());
        for (i, (a, e)) in values.iter().zip(expected.iter()).enumerate() {
            assert!((a - e).abs() < tol, "element {i}: {a} vs {e}");
        }
    }

    #[test]
    fn path_graph_laplacian_closed_form() {
        // Degrees (1, 2, 1) → off-diagonal coupling 1/√2.
        let lap = normalized_laplacian(&path_adjacency()).unwrap();
        let expected = [
            1.0, -S, 0.0, //
            -S, 1.0, -S, //
            0.0, -S, 1.0,
        ];
        assert_close(&lap, &expected, 1e-6);
    }

    #[test]
    fn isolated_node_row_is_identity() {
        let adjacency = Tensor::from_vec(
            vec![0.0f32, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            (3, 3),
            &Device::Cpu,
        )
        .unwrap();
        let lap = normalized_laplacian(&adjacency).unwrap();
        let expected = [
            1.0, -1.0, 0.0, //
            -1.0, 1.0, 0.0, //
            0.0, 0.0, 1.0,
        ];
        assert_close(&lap, &expected, 1e-6);
    }

    #[test]
    fn power_iteration_finds_the_path_graph_spectrum_edge() {
        // The normalized Laplacian of the 3-node path has eigenvalues
        // {0, 1, 2}.
        let lap = normalized_laplacian(&path_adjacency()).unwrap();
        let lambda = estimate_lambda_max(&lap).unwrap();
        assert!((lambda - 2.0).abs() < 1e-4, "lambda = {lambda}");
    }

    #[test]
    fn rescale_with_known_bound_is_l_minus_identity() {
        let lap = normalized_laplacian(&path_adjacency()).unwrap();
        let rescaled = rescale_laplacian(&lap, Some(2.0)).unwrap();
        let expected = [
            0.0, -S, 0.0, //
            -S, 0.0, -S, //
            0.0, -S, 0.0,
        ];
        assert_close(&rescaled, &expected, 1e-6);
    }

    #[test]
    fn rescale_estimate_agrees_with_the_exact_bound() {
        let lap = normalized_laplacian(&path_adjacency()).unwrap();
        let estimated = rescale_laplacian(&lap, None).unwrap();
        let exact = rescale_laplacian(&lap, Some(2.0)).unwrap();
        let exact = exact.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_close(&estimated, &exact, 1e-3);
    }

    #[test]
    fn rescale_rejects_non_positive_bound() {
        let lap = normalized_laplacian(&path_adjacency()).unwrap();
        assert!(matches!(
            rescale_laplacian(&lap, Some(0.0)),
            Err(SpectralError::Config(_))
        ));
    }

    #[test]
    fn non_square_input_is_rejected() {
        let rect = Tensor::zeros((2, 3), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            normalized_laplacian(&rect),
            Err(SpectralError::Config(_))
        ));
    }

    #[test]
    fn filter_basis_starts_with_identity_and_the_operator() {
        let lap = normalized_laplacian(&path_adjacency()).unwrap();
        let operator = rescale_laplacian(&lap, Some(2.0)).unwrap();
        let basis = chebyshev_filter(&operator, 3).unwrap();
        assert_eq!(basis.len(), 3);

        assert_close(&basis[0], &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0], 1e-6);
        let operator_values = operator.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_close(&basis[1], &operator_values, 1e-6);

        // T_2 = 2 L̂² − I; for the path operator
        // L̂² = [[.5, 0, .5], [0, 1, 0], [.5, 0, .5]].
        let expected_t2 = [
            0.0, 0.0, 1.0, //
            0.0, 1.0, 0.0, //
            1.0, 0.0, 0.0,
        ];
        assert_close(&basis[2], &expected_t2, 1e-5);
    }

    #[test]
    fn filter_of_identity_collapses_to_identity() {
        let eye = Tensor::eye(4, DType::F32, &Device::Cpu).unwrap();
        let basis = chebyshev_filter(&eye, 4).unwrap();
        let eye_values = eye.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        for term in &basis {
            assert_close(term, &eye_values, 1e-6);
        }
    }

    #[test]
    fn filter_requires_at_least_one_term() {
        let eye = Tensor::eye(2, DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            chebyshev_filter(&eye, 0),
            Err(SpectralError::Config(_))
        ));
    }
}
