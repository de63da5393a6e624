use bd_tensor::{ComputeBackend, Shape, Tensor};
use rand::Rng;

use crate::error::{DecoderError, Result};
use crate::layers::Linear;
use crate::mask::BoolMask;

/// Multi-head scaled dot-product attention.
///
/// Masking is explicit: a score for a forbidden `(i, j)` pair is set to
/// negative infinity before the softmax, so it contributes exactly zero
/// weight. A query row whose attend set is empty produces a zero vector.
#[derive(Debug)]
pub struct MultiHeadAttention {
    wq: Linear,
    wk: Linear,
    wv: Linear,
    wo: Linear,
    heads: usize,
    d_model: usize,
    head_dim: usize,
}

impl MultiHeadAttention {
    pub fn new(heads: usize, d_model: usize, rng: &mut impl Rng) -> Result<Self> {
        if heads == 0 || d_model % heads != 0 {
            return Err(DecoderError::Configuration(format!(
                "attention dim {} is not divisible by {} heads",
                d_model, heads
            )));
        }
        Ok(MultiHeadAttention {
            wq: Linear::new(d_model, d_model, rng),
            wk: Linear::new(d_model, d_model, rng),
            wv: Linear::new(d_model, d_model, rng),
            wo: Linear::new(d_model, d_model, rng),
            heads,
            d_model,
            head_dim: d_model / heads,
        })
    }

    /// Attend from `query` (B, Lq, D) over `key`/`value` (B, Lk, D) under
    /// `mask` (B or 1, Lq or 1, Lk). Returns (B, Lq, D).
    pub fn forward(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        mask: &BoolMask,
        backend: &dyn ComputeBackend,
    ) -> Result<Tensor> {
        let q_dims = query.shape().dims();
        let k_dims = key.shape().dims();
        if q_dims.len() != 3 || q_dims[2] != self.d_model {
            return Err(DecoderError::ShapeMismatch {
                expected: vec![0, 0, self.d_model],
                got: q_dims.to_vec(),
            });
        }
        if k_dims.len() != 3
            || k_dims[0] != q_dims[0]
            || k_dims[2] != self.d_model
            || key.shape().dims() != value.shape().dims()
        {
            return Err(DecoderError::ShapeMismatch {
                expected: vec![q_dims[0], 0, self.d_model],
                got: k_dims.to_vec(),
            });
        }
        let (batch, lq, lk) = (q_dims[0], q_dims[1], k_dims[1]);
        let m_dims = mask.dims();
        if m_dims[2] != lk
            || (m_dims[1] != 1 && m_dims[1] != lq)
            || (m_dims[0] != 1 && m_dims[0] != batch)
        {
            return Err(DecoderError::ShapeMismatch {
                expected: vec![batch, lq, lk],
                got: m_dims.to_vec(),
            });
        }

        let d = self.d_model;
        let hd = self.head_dim;
        let scale = 1.0 / (hd as f32).sqrt();
        let q_data = query.data_f32();
        let k_data = key.data_f32();
        let v_data = value.data_f32();

        let mut out = Vec::with_capacity(batch * lq * d);
        for b in 0..batch {
            let q = self
                .wq
                .forward(&q_data[b * lq * d..(b + 1) * lq * d], lq, backend)?;
            let k = self
                .wk
                .forward(&k_data[b * lk * d..(b + 1) * lk * d], lk, backend)?;
            let v = self
                .wv
                .forward(&v_data[b * lk * d..(b + 1) * lk * d], lk, backend)?;

            let mut attn = vec![0.0f32; lq * d];
            for h in 0..self.heads {
                let h_off = h * hd;
                for i in 0..lq {
                    let q_row = &q[i * d + h_off..i * d + h_off + hd];

                    // Scores over all key positions, masked to -inf.
                    let mut scores = Vec::with_capacity(lk);
                    for j in 0..lk {
                        if mask.get(b, i, j) {
                            let k_row = &k[j * d + h_off..j * d + h_off + hd];
                            let dot: f32 =
                                q_row.iter().zip(k_row.iter()).map(|(a, c)| a * c).sum();
                            scores.push(dot * scale);
                        } else {
                            scores.push(f32::NEG_INFINITY);
                        }
                    }

                    let max_score =
                        scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                    if max_score == f32::NEG_INFINITY {
                        // Empty attend set: leave the output row at zero.
                        continue;
                    }

                    // Inline numerically stable softmax over the row.
                    let mut exp_sum = 0.0f32;
                    let mut probs = Vec::with_capacity(lk);
                    for &s in &scores {
                        let e = (s - max_score).exp();
                        probs.push(e);
                        exp_sum += e;
                    }

                    // Weighted sum of value rows.
                    let out_off = i * d + h_off;
                    for (j, &p) in probs.iter().enumerate() {
                        if p == 0.0 {
                            continue;
                        }
                        let w = p / exp_sum;
                        let v_row = &v[j * d + h_off..j * d + h_off + hd];
                        for c in 0..hd {
                            attn[out_off + c] += w * v_row[c];
                        }
                    }
                }
            }

            out.extend(self.wo.forward(&attn, lq, backend)?);
        }

        Ok(Tensor::new(out, Shape::new(vec![batch, lq, d])))
    }
}
