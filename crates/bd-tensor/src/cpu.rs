use crate::backend::ComputeBackend;
use crate::error::{Result, TensorError};

/// Pure-Rust CPU compute backend.
///
/// Implements all operations with straightforward loops optimized for
/// correctness rather than peak performance. Intended as a reference
/// implementation and fallback.
#[derive(Debug, Clone)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn check_chunked(op: &str, len: usize, chunk: usize) -> Result<()> {
    if chunk == 0 {
        return Err(TensorError::Other(format!("{}: chunk must be > 0", op)));
    }
    if len % chunk != 0 {
        return Err(TensorError::Other(format!(
            "{}: x.len()={} is not a multiple of chunk={}",
            op, len, chunk
        )));
    }
    Ok(())
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn matmul(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>> {
        if a.len() != m * k {
            return Err(TensorError::Other(format!(
                "matmul: a.len()={} but expected m*k={}",
                a.len(),
                m * k
            )));
        }
        if b.len() != k * n {
            return Err(TensorError::Other(format!(
                "matmul: b.len()={} but expected k*n={}",
                b.len(),
                k * n
            )));
        }

        let mut c = vec![0.0f32; m * n];
        for i in 0..m {
            for p in 0..k {
                let av = a[i * k + p];
                if av == 0.0 {
                    continue;
                }
                for j in 0..n {
                    c[i * n + j] += av * b[p * n + j];
                }
            }
        }
        Ok(c)
    }

    fn add(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>> {
        if a.len() != b.len() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![a.len()],
                got: vec![b.len()],
            });
        }
        Ok(a.iter().zip(b.iter()).map(|(x, y)| x + y).collect())
    }

    fn scale(&self, a: &[f32], s: f32) -> Result<Vec<f32>> {
        Ok(a.iter().map(|x| x * s).collect())
    }

    fn layer_norm(
        &self,
        x: &[f32],
        gamma: &[f32],
        beta: &[f32],
        eps: f32,
        hidden_size: usize,
    ) -> Result<Vec<f32>> {
        if gamma.len() != hidden_size || beta.len() != hidden_size {
            return Err(TensorError::Other(format!(
                "layer_norm: gamma.len()={}, beta.len()={} but hidden_size={}",
                gamma.len(),
                beta.len(),
                hidden_size
            )));
        }
        check_chunked("layer_norm", x.len(), hidden_size)?;

        let n_rows = x.len() / hidden_size;
        let mut result = vec![0.0f32; x.len()];

        for row in 0..n_rows {
            let offset = row * hidden_size;
            let row_data = &x[offset..offset + hidden_size];

            let mean: f32 = row_data.iter().sum::<f32>() / hidden_size as f32;
            let var: f32 = row_data
                .iter()
                .map(|v| (v - mean) * (v - mean))
                .sum::<f32>()
                / hidden_size as f32;
            let inv_std = 1.0 / (var + eps).sqrt();

            for i in 0..hidden_size {
                result[offset + i] = (row_data[i] - mean) * inv_std * gamma[i] + beta[i];
            }
        }

        Ok(result)
    }

    fn softmax(&self, x: &[f32], chunk: usize) -> Result<Vec<f32>> {
        check_chunked("softmax", x.len(), chunk)?;

        let n_chunks = x.len() / chunk;
        let mut result = vec![0.0f32; x.len()];

        for c in 0..n_chunks {
            let offset = c * chunk;
            let chunk_data = &x[offset..offset + chunk];

            let max_val = chunk_data
                .iter()
                .copied()
                .fold(f32::NEG_INFINITY, f32::max);

            let mut sum = 0.0f32;
            for i in 0..chunk {
                let e = (chunk_data[i] - max_val).exp();
                result[offset + i] = e;
                sum += e;
            }
            for i in 0..chunk {
                result[offset + i] /= sum;
            }
        }

        Ok(result)
    }

    fn log_softmax(&self, x: &[f32], chunk: usize) -> Result<Vec<f32>> {
        check_chunked("log_softmax", x.len(), chunk)?;

        let n_chunks = x.len() / chunk;
        let mut result = vec![0.0f32; x.len()];

        for c in 0..n_chunks {
            let offset = c * chunk;
            let chunk_data = &x[offset..offset + chunk];

            let max_val = chunk_data
                .iter()
                .copied()
                .fold(f32::NEG_INFINITY, f32::max);

            let sum: f32 = chunk_data.iter().map(|v| (v - max_val).exp()).sum();
            let log_sum = sum.ln();

            for i in 0..chunk {
                result[offset + i] = chunk_data[i] - max_val - log_sum;
            }
        }

        Ok(result)
    }

    fn relu(&self, x: &[f32]) -> Result<Vec<f32>> {
        Ok(x.iter().map(|&v| v.max(0.0)).collect())
    }
}
