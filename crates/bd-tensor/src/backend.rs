use std::fmt::Debug;

use crate::error::Result;

/// Trait for pluggable compute backends (CPU now, accelerators later).
///
/// All operations work on f32 slices. Data is passed in as slices and
/// returned as owned vectors; the backend performs the computation and is
/// free to parallelize internally.
pub trait ComputeBackend: Send + Sync + Debug {
    /// Returns the name of this backend (e.g., "cpu").
    fn name(&self) -> &str;

    /// Matrix multiplication: C = A @ B.
    ///
    /// - `a`: row-major data of shape [m, k]
    /// - `b`: row-major data of shape [k, n]
    /// - Returns: row-major data of shape [m, n]
    fn matmul(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>>;

    /// Element-wise addition: result[i] = a[i] + b[i].
    fn add(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>>;

    /// Scalar multiplication: result[i] = a[i] * s.
    fn scale(&self, a: &[f32], s: f32) -> Result<Vec<f32>>;

    /// Layer normalization over rows of `hidden_size` elements.
    ///
    /// For each row:
    ///   mean = mean(x), var = mean((x - mean)^2)
    ///   result[i] = (x[i] - mean) / sqrt(var + eps) * gamma[i] + beta[i]
    ///
    /// - `x`: input data, length must be a multiple of `hidden_size`
    /// - `gamma`, `beta`: per-element affine parameters, length `hidden_size`
    fn layer_norm(
        &self,
        x: &[f32],
        gamma: &[f32],
        beta: &[f32],
        eps: f32,
        hidden_size: usize,
    ) -> Result<Vec<f32>>;

    /// Softmax over chunks of `chunk` elements.
    ///
    /// For each chunk: result[i] = exp(x[i] - max(x)) / sum(exp(x[j] - max(x)))
    fn softmax(&self, x: &[f32], chunk: usize) -> Result<Vec<f32>>;

    /// Log-softmax over chunks of `chunk` elements.
    ///
    /// For each chunk: result[i] = x[i] - max(x) - ln(sum(exp(x[j] - max(x))))
    fn log_softmax(&self, x: &[f32], chunk: usize) -> Result<Vec<f32>>;

    /// ReLU activation: result[i] = max(x[i], 0).
    fn relu(&self, x: &[f32]) -> Result<Vec<f32>>;
}
