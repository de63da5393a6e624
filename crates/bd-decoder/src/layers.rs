use bd_tensor::ComputeBackend;
use rand::Rng;

use crate::error::Result;

/// Affine projection with weights stored `[in_dim, out_dim]` row-major, so a
/// batch of rows `[rows, in_dim]` maps through a single backend matmul.
#[derive(Debug)]
pub struct Linear {
    weight: Vec<f32>,
    bias: Vec<f32>,
    in_dim: usize,
    out_dim: usize,
}

impl Linear {
    /// Create a linear layer with uniform init in ±1/sqrt(in_dim).
    pub fn new(in_dim: usize, out_dim: usize, rng: &mut impl Rng) -> Self {
        let bound = 1.0 / (in_dim as f32).sqrt();
        let weight = (0..in_dim * out_dim)
            .map(|_| rng.gen_range(-bound..bound))
            .collect();
        let bias = (0..out_dim).map(|_| rng.gen_range(-bound..bound)).collect();
        Linear {
            weight,
            bias,
            in_dim,
            out_dim,
        }
    }

    #[cfg(test)]
    pub(crate) fn from_parts(weight: Vec<f32>, bias: Vec<f32>, in_dim: usize, out_dim: usize) -> Self {
        assert_eq!(weight.len(), in_dim * out_dim);
        assert_eq!(bias.len(), out_dim);
        Linear {
            weight,
            bias,
            in_dim,
            out_dim,
        }
    }

    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    /// Apply to `rows` rows of `in_dim` features, returning `rows * out_dim`.
    pub fn forward(&self, x: &[f32], rows: usize, backend: &dyn ComputeBackend) -> Result<Vec<f32>> {
        let mut y = backend.matmul(x, &self.weight, rows, self.in_dim, self.out_dim)?;
        for r in 0..rows {
            for o in 0..self.out_dim {
                y[r * self.out_dim + o] += self.bias[o];
            }
        }
        Ok(y)
    }
}

/// Per-feature layer normalization with learned affine parameters.
#[derive(Debug)]
pub struct LayerNorm {
    gamma: Vec<f32>,
    beta: Vec<f32>,
    eps: f32,
    dim: usize,
}

impl LayerNorm {
    pub fn new(dim: usize) -> Self {
        LayerNorm {
            gamma: vec![1.0; dim],
            beta: vec![0.0; dim],
            eps: 1e-12,
            dim,
        }
    }

    /// Normalize each row of `dim` features in `x`.
    pub fn forward(&self, x: &[f32], backend: &dyn ComputeBackend) -> Result<Vec<f32>> {
        Ok(backend.layer_norm(x, &self.gamma, &self.beta, self.eps, self.dim)?)
    }
}

/// Position-wise feed-forward: D -> units -> relu -> D, applied per row.
#[derive(Debug)]
pub struct PositionwiseFeedForward {
    w1: Linear,
    w2: Linear,
}

impl PositionwiseFeedForward {
    pub fn new(d_model: usize, units: usize, rng: &mut impl Rng) -> Self {
        PositionwiseFeedForward {
            w1: Linear::new(d_model, units, rng),
            w2: Linear::new(units, d_model, rng),
        }
    }

    pub fn forward(&self, x: &[f32], rows: usize, backend: &dyn ComputeBackend) -> Result<Vec<f32>> {
        let h = self.w1.forward(x, rows, backend)?;
        let h = backend.relu(&h)?;
        self.w2.forward(&h, rows, backend)
    }
}
