use bd_tensor::{ComputeBackend, Shape, Tensor};
use rand::Rng;

use crate::attention::MultiHeadAttention;
use crate::error::{DecoderError, Result};
use crate::layers::{LayerNorm, PositionwiseFeedForward};
use crate::mask::BoolMask;

/// One decoder block: self-attention over target features, cross-attention
/// to encoder memory, then a position-wise feed-forward, each wrapped in a
/// residual join. `normalize_before` selects pre-norm (norm before each
/// sub-layer) or post-norm (norm after the residual join).
///
/// Memory and memory mask pass through unchanged; only target features are
/// transformed.
#[derive(Debug)]
pub struct DecoderBlock {
    self_attn: MultiHeadAttention,
    src_attn: MultiHeadAttention,
    feed_forward: PositionwiseFeedForward,
    norm1: LayerNorm,
    norm2: LayerNorm,
    norm3: LayerNorm,
    normalize_before: bool,
    d_model: usize,
}

impl DecoderBlock {
    pub fn new(
        d_model: usize,
        heads: usize,
        linear_units: usize,
        normalize_before: bool,
        rng: &mut impl Rng,
    ) -> Result<Self> {
        Ok(DecoderBlock {
            self_attn: MultiHeadAttention::new(heads, d_model, rng)?,
            src_attn: MultiHeadAttention::new(heads, d_model, rng)?,
            feed_forward: PositionwiseFeedForward::new(d_model, linear_units, rng),
            norm1: LayerNorm::new(d_model),
            norm2: LayerNorm::new(d_model),
            norm3: LayerNorm::new(d_model),
            normalize_before,
            d_model,
        })
    }

    /// Full-sequence transform of `x` (B, L, D) under `tgt_mask`.
    pub fn forward(
        &self,
        x: &Tensor,
        tgt_mask: &BoolMask,
        memory: &Tensor,
        memory_mask: &BoolMask,
        backend: &dyn ComputeBackend,
    ) -> Result<Tensor> {
        self.forward_partial(x, tgt_mask, memory, memory_mask, None, backend)
    }

    /// Incremental transform. With `cache` of shape (B, L-1, D) holding this
    /// block's output for the already-decoded prefix, only the newest
    /// position is computed; the result is the cache with the new position
    /// appended, shape (B, L, D), which becomes the next cache entry.
    ///
    /// With `cache == None` the whole sequence is computed, and the full
    /// output seeds the cache.
    pub fn forward_partial(
        &self,
        x: &Tensor,
        tgt_mask: &BoolMask,
        memory: &Tensor,
        memory_mask: &BoolMask,
        cache: Option<&Tensor>,
        backend: &dyn ComputeBackend,
    ) -> Result<Tensor> {
        let dims = x.shape().dims();
        if dims.len() != 3 || dims[2] != self.d_model {
            return Err(DecoderError::ShapeMismatch {
                expected: vec![0, 0, self.d_model],
                got: dims.to_vec(),
            });
        }
        let (b, l, d) = (dims[0], dims[1], dims[2]);
        let m_rows = tgt_mask.dims()[1];
        if m_rows != 1 && m_rows != l {
            return Err(DecoderError::ShapeMismatch {
                expected: vec![tgt_mask.dims()[0], l, tgt_mask.dims()[2]],
                got: tgt_mask.dims().to_vec(),
            });
        }

        // Sub-layer 1: self-attention. Keys/values always cover the full
        // sequence; with a cache only the newest position queries.
        let normed = if self.normalize_before {
            Tensor::new(
                self.norm1.forward(x.data_f32(), backend)?,
                Shape::new(dims.to_vec()),
            )
        } else {
            x.clone()
        };

        let (query, residual, q_mask, q_len) = match cache {
            None => (normed.clone(), x.clone(), tgt_mask.clone(), l),
            Some(c) => {
                let c_dims = c.shape().dims();
                if c_dims != [b, l - 1, d] {
                    return Err(DecoderError::ShapeMismatch {
                        expected: vec![b, l - 1, d],
                        got: c_dims.to_vec(),
                    });
                }
                (
                    normed.narrow(1, l - 1, 1)?,
                    x.narrow(1, l - 1, 1)?,
                    tgt_mask.narrow_rows(if m_rows == 1 { 0 } else { l - 1 }, 1),
                    1,
                )
            }
        };

        let attn = self
            .self_attn
            .forward(&query, &normed, &normed, &q_mask, backend)?;
        let mut h = backend.add(residual.data_f32(), attn.data_f32())?;
        if !self.normalize_before {
            h = self.norm1.forward(&h, backend)?;
        }

        // Sub-layer 2: cross-attention to encoder memory.
        let residual = h.clone();
        let h_in = if self.normalize_before {
            self.norm2.forward(&h, backend)?
        } else {
            h
        };
        let q2 = Tensor::new(h_in, Shape::new(vec![b, q_len, d]));
        let attn = self
            .src_attn
            .forward(&q2, memory, memory, memory_mask, backend)?;
        let mut h = backend.add(&residual, attn.data_f32())?;
        if !self.normalize_before {
            h = self.norm2.forward(&h, backend)?;
        }

        // Sub-layer 3: position-wise feed-forward.
        let residual = h.clone();
        let h_in = if self.normalize_before {
            self.norm3.forward(&h, backend)?
        } else {
            h
        };
        let ff = self.feed_forward.forward(&h_in, b * q_len, backend)?;
        let mut h = backend.add(&residual, &ff)?;
        if !self.normalize_before {
            h = self.norm3.forward(&h, backend)?;
        }

        let out = Tensor::new(h, Shape::new(vec![b, q_len, d]));
        match cache {
            Some(c) => Ok(c.concat(&out, 1)?),
            None => Ok(out),
        }
    }
}
