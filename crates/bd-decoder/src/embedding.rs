use bd_tensor::{ComputeBackend, Shape, Tensor};
use rand::Rng;

use crate::error::{DecoderError, Result};

/// Token embedding stage: lookup table scaled by sqrt(D) plus a
/// deterministic sinusoidal positional signal.
///
/// The forward and reverse decoding directions each own an independent
/// instance; tables are never shared between them.
#[derive(Debug)]
pub struct Embedding {
    table: Vec<f32>,
    vocab_size: usize,
    d_model: usize,
}

impl Embedding {
    pub fn new(vocab_size: usize, d_model: usize, rng: &mut impl Rng) -> Self {
        let bound = 1.0 / (d_model as f32).sqrt();
        let table = (0..vocab_size * d_model)
            .map(|_| rng.gen_range(-bound..bound))
            .collect();
        Embedding {
            table,
            vocab_size,
            d_model,
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// Embed `(B, L)` token ids into `(B, L, D)` features.
    pub fn forward(
        &self,
        ids: &[u32],
        batch: usize,
        len: usize,
        backend: &dyn ComputeBackend,
    ) -> Result<Tensor> {
        debug_assert_eq!(ids.len(), batch * len);
        let d = self.d_model;
        let xscale = (d as f32).sqrt();

        let mut rows = Vec::with_capacity(batch * len * d);
        let mut signal = Vec::with_capacity(batch * len * d);
        for (idx, &id) in ids.iter().enumerate() {
            if id as usize >= self.vocab_size {
                return Err(DecoderError::InvalidToken {
                    id,
                    vocab: self.vocab_size,
                });
            }
            let pos = idx % len;
            rows.extend_from_slice(&self.table[id as usize * d..(id as usize + 1) * d]);
            for i in 0..d {
                signal.push(positional_signal(pos, i, d));
            }
        }

        let scaled = backend.scale(&rows, xscale)?;
        let out = backend.add(&scaled, &signal)?;
        Ok(Tensor::new(out, Shape::new(vec![batch, len, d])))
    }
}

/// Sinusoidal positional encoding value at (pos, i):
/// sin for even feature indices, cos for odd, with the usual 10000^(2k/D)
/// wavelength progression.
fn positional_signal(pos: usize, i: usize, d_model: usize) -> f32 {
    let k = (i / 2) as f32;
    let angle = pos as f32 / 10000f32.powf(2.0 * k / d_model as f32);
    if i % 2 == 0 {
        angle.sin()
    } else {
        angle.cos()
    }
}
