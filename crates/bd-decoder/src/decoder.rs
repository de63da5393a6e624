use bd_tensor::{ComputeBackend, Shape, Tensor};
use rand::Rng;

use crate::block::DecoderBlock;
use crate::cache::DecoderCache;
use crate::config::DecoderConfig;
use crate::embedding::Embedding;
use crate::error::{DecoderError, Result};
use crate::layers::{LayerNorm, Linear};
use crate::mask::{
    causal_mask, causal_mask_reversed, padding_mask, padding_mask_right, BoolMask,
};

/// Decoding direction of a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    /// Left-to-right: position i attends to j <= i, padding left-aligned.
    Forward,
    /// Right-to-left: position i attends to j >= i, padding right-aligned.
    Reverse,
}

/// One decoding direction: embedding, an ordered stack of decoder blocks,
/// the final normalization, and the output projection to vocabulary scores.
///
/// The forward and reverse directions are two instances of this type with
/// independently initialized parameters.
#[derive(Debug)]
struct DirectionStack {
    direction: Direction,
    embed: Embedding,
    blocks: Vec<DecoderBlock>,
    after_norm: LayerNorm,
    output_layer: Linear,
    normalize_before: bool,
}

impl DirectionStack {
    fn new(
        config: &DecoderConfig,
        direction: Direction,
        n_blocks: usize,
        rng: &mut impl Rng,
    ) -> Result<Self> {
        let blocks = (0..n_blocks)
            .map(|_| {
                DecoderBlock::new(
                    config.attention_dim,
                    config.attention_heads,
                    config.linear_units,
                    config.normalize_before,
                    rng,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(DirectionStack {
            direction,
            embed: Embedding::new(config.vocab_size, config.attention_dim, rng),
            blocks,
            after_norm: LayerNorm::new(config.attention_dim),
            output_layer: Linear::new(config.attention_dim, config.vocab_size, rng),
            normalize_before: config.normalize_before,
        })
    }

    /// Padding and combined padding+causal masks for this direction.
    fn target_mask(&self, valid_lengths: &[usize], len: usize) -> Result<(BoolMask, BoolMask)> {
        let (pad, causal) = match self.direction {
            Direction::Forward => (padding_mask(valid_lengths, len)?, causal_mask(len)),
            Direction::Reverse => (
                padding_mask_right(valid_lengths, len)?,
                causal_mask_reversed(len),
            ),
        };
        let combined = pad.and(&causal)?;
        Ok((pad, combined))
    }

    /// Embed, run all blocks in order, normalize, and project to vocabulary
    /// scores (B, L, V).
    fn run(
        &self,
        tokens: &[u32],
        batch: usize,
        len: usize,
        tgt_mask: &BoolMask,
        memory: &Tensor,
        memory_mask: &BoolMask,
        backend: &dyn ComputeBackend,
    ) -> Result<Tensor> {
        let mut x = self.embed.forward(tokens, batch, len, backend)?;
        for block in &self.blocks {
            x = block.forward(&x, tgt_mask, memory, memory_mask, backend)?;
        }

        let mut h = x.data_f32().to_vec();
        if self.normalize_before {
            h = self.after_norm.forward(&h, backend)?;
        }
        let scores = self.output_layer.forward(&h, batch * len, backend)?;
        Ok(Tensor::new(
            scores,
            Shape::new(vec![batch, len, self.output_layer.out_dim()]),
        ))
    }
}

/// Full-sequence decoding result.
#[derive(Debug)]
pub struct ForwardOutput {
    /// Left-to-right scores (B, L, V), pre-softmax.
    pub scores: Tensor,
    /// Right-to-left scores (B, L, V); present only when the reverse path
    /// actually ran (reverse blocks configured AND reverse weight > 0).
    pub reverse_scores: Option<Tensor>,
    /// Per-sequence output lengths, the row sums of the forward padding mask.
    pub output_lengths: Vec<usize>,
}

/// Bidirectional autoregressive decoder over encoder memory.
///
/// Exposes two operating modes: [`forward`](BidirectionalDecoder::forward)
/// scores a whole teacher-forced target sequence in both directions, and
/// [`forward_one_step`](BidirectionalDecoder::forward_one_step) extends a
/// growing prefix by one position using a caller-owned per-block cache. Both
/// are pure `&self` transforms; calls on disjoint inputs are independent.
#[derive(Debug)]
pub struct BidirectionalDecoder {
    config: DecoderConfig,
    forward_stack: DirectionStack,
    reverse_stack: Option<DirectionStack>,
}

impl BidirectionalDecoder {
    /// Build a decoder from a validated configuration, drawing all parameter
    /// initializations from `rng`. The reverse stack exists only when
    /// `config.reverse_blocks > 0`.
    pub fn new(config: DecoderConfig, rng: &mut impl Rng) -> Result<Self> {
        config.validate()?;
        let forward_stack =
            DirectionStack::new(&config, Direction::Forward, config.num_blocks, rng)?;
        let reverse_stack = if config.reverse_blocks > 0 {
            Some(DirectionStack::new(
                &config,
                Direction::Reverse,
                config.reverse_blocks,
                rng,
            )?)
        } else {
            None
        };
        Ok(BidirectionalDecoder {
            config,
            forward_stack,
            reverse_stack,
        })
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Check memory (B, S, D) and memory mask (B, 1, S), returning (B, S).
    fn check_memory(&self, memory: &Tensor, memory_mask: &BoolMask) -> Result<(usize, usize)> {
        let m_dims = memory.shape().dims();
        if m_dims.len() != 3 || m_dims[0] == 0 || m_dims[2] != self.config.attention_dim {
            return Err(DecoderError::ShapeMismatch {
                expected: vec![
                    m_dims.first().copied().unwrap_or(0),
                    m_dims.get(1).copied().unwrap_or(0),
                    self.config.attention_dim,
                ],
                got: m_dims.to_vec(),
            });
        }
        let (batch, src_len) = (m_dims[0], m_dims[1]);
        if memory_mask.dims() != [batch, 1, src_len] {
            return Err(DecoderError::ShapeMismatch {
                expected: vec![batch, 1, src_len],
                got: memory_mask.dims().to_vec(),
            });
        }
        Ok((batch, src_len))
    }

    /// Full-sequence scoring of teacher-forced targets.
    ///
    /// - `memory`: encoder output (B, S, D)
    /// - `memory_mask`: valid encoder positions (B, 1, S)
    /// - `tokens`: forward target ids, row-major (B, L)
    /// - `valid_lengths`: non-padding lengths per sequence (B)
    /// - `reverse_tokens`: right-aligned reverse target ids (B, L); never
    ///   inspected unless the reverse path runs
    /// - `reverse_weight`: caller's reverse gate; <= 0 skips the reverse
    ///   path entirely (no mask, embedding, or blocks execute)
    pub fn forward(
        &self,
        memory: &Tensor,
        memory_mask: &BoolMask,
        tokens: &[u32],
        valid_lengths: &[usize],
        reverse_tokens: &[u32],
        reverse_weight: f32,
        backend: &dyn ComputeBackend,
    ) -> Result<ForwardOutput> {
        let (batch, _) = self.check_memory(memory, memory_mask)?;
        if valid_lengths.len() != batch {
            return Err(DecoderError::ShapeMismatch {
                expected: vec![batch],
                got: vec![valid_lengths.len()],
            });
        }
        if tokens.is_empty() || tokens.len() % batch != 0 {
            return Err(DecoderError::ShapeMismatch {
                expected: vec![batch, tokens.len().max(1) / batch.max(1)],
                got: vec![tokens.len()],
            });
        }
        let len = tokens.len() / batch;

        // Forward path. The padding mask doubles as the output-length source.
        let (pad, tgt_mask) = self.forward_stack.target_mask(valid_lengths, len)?;
        let scores = self.forward_stack.run(
            tokens,
            batch,
            len,
            &tgt_mask,
            memory,
            memory_mask,
            backend,
        )?;
        let output_lengths = (0..batch).map(|b| pad.row_count(b, 0)).collect();

        // Reverse path, gated on both the configured stack and the caller's
        // weight. When gated off nothing reverse-related is touched.
        let reverse_scores = match &self.reverse_stack {
            Some(stack) if reverse_weight > 0.0 => {
                if reverse_tokens.len() != tokens.len() {
                    return Err(DecoderError::ShapeMismatch {
                        expected: vec![batch, len],
                        got: vec![reverse_tokens.len()],
                    });
                }
                let (_, r_mask) = stack.target_mask(valid_lengths, len)?;
                Some(stack.run(
                    reverse_tokens,
                    batch,
                    len,
                    &r_mask,
                    memory,
                    memory_mask,
                    backend,
                )?)
            }
            _ => None,
        };

        Ok(ForwardOutput {
            scores,
            reverse_scores,
            output_lengths,
        })
    }

    /// One step of incremental decoding over a growing left-to-right prefix.
    ///
    /// The whole prefix (B, T) is re-embedded, but each block computes only
    /// the newest position, reusing `cache` (its own output history) for the
    /// rest. Returns log-probabilities for the last position (B, V) and the
    /// updated cache for the next call; pass `None` on the first step.
    ///
    /// `prefix_mask` must cover the current prefix (B or 1, T, T); no
    /// padding-mask reconstruction happens here.
    pub fn forward_one_step(
        &self,
        memory: &Tensor,
        memory_mask: &BoolMask,
        prefix: &[u32],
        prefix_mask: &BoolMask,
        cache: Option<&DecoderCache>,
        backend: &dyn ComputeBackend,
    ) -> Result<(Tensor, DecoderCache)> {
        let (batch, _) = self.check_memory(memory, memory_mask)?;
        if prefix.is_empty() || prefix.len() % batch != 0 {
            return Err(DecoderError::ShapeMismatch {
                expected: vec![batch, prefix.len().max(1) / batch.max(1)],
                got: vec![prefix.len()],
            });
        }
        let len = prefix.len() / batch;
        let m_dims = prefix_mask.dims();
        if m_dims[2] != len
            || (m_dims[1] != 1 && m_dims[1] != len)
            || (m_dims[0] != 1 && m_dims[0] != batch)
        {
            return Err(DecoderError::ShapeMismatch {
                expected: vec![batch, len, len],
                got: m_dims.to_vec(),
            });
        }
        if let Some(c) = cache {
            if c.len() != self.forward_stack.blocks.len() {
                return Err(DecoderError::ShapeMismatch {
                    expected: vec![self.forward_stack.blocks.len()],
                    got: vec![c.len()],
                });
            }
        }

        let stack = &self.forward_stack;
        let mut x = stack.embed.forward(prefix, batch, len, backend)?;
        let mut new_cache = DecoderCache::new();
        for (i, block) in stack.blocks.iter().enumerate() {
            x = block.forward_partial(
                &x,
                prefix_mask,
                memory,
                memory_mask,
                cache.map(|c| c.entry(i)),
                backend,
            )?;
            new_cache.push(x.clone());
        }

        // Project only the newest position and normalize to log-probs.
        let last = x.narrow(1, len - 1, 1)?;
        let mut h = last.data_f32().to_vec();
        if stack.normalize_before {
            h = stack.after_norm.forward(&h, backend)?;
        }
        let vocab = stack.output_layer.out_dim();
        let logits = stack.output_layer.forward(&h, batch, backend)?;
        let log_probs = backend.log_softmax(&logits, vocab)?;

        Ok((
            Tensor::new(log_probs, Shape::new(vec![batch, vocab])),
            new_cache,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use bd_tensor::CpuBackend;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const VOCAB: usize = 20;
    const DIM: usize = 8;

    fn small_config() -> DecoderConfig {
        let mut c = DecoderConfig::new(VOCAB, DIM);
        c.attention_heads = 2;
        c.linear_units = 16;
        c.num_blocks = 2;
        c
    }

    fn decoder(config: DecoderConfig, seed: u64) -> BidirectionalDecoder {
        let mut rng = StdRng::seed_from_u64(seed);
        BidirectionalDecoder::new(config, &mut rng).unwrap()
    }

    fn encoder_memory(seed: u64, batch: usize, src_len: usize, dim: usize) -> (Tensor, BoolMask) {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = (0..batch * src_len * dim)
            .map(|_| rng.gen_range(-1.0..1.0))
            .collect();
        let memory = Tensor::new(data, Shape::new(vec![batch, src_len, dim]));
        let mask = BoolMask::new(vec![true; batch * src_len], [batch, 1, src_len]);
        (memory, mask)
    }

    #[test]
    fn test_example_scenario() {
        // vocab 100, dim 16, 2 forward blocks, 0 reverse, lengths [3,5].
        let mut config = DecoderConfig::new(100, 16);
        config.attention_heads = 4;
        config.linear_units = 32;
        config.num_blocks = 2;
        let dec = decoder(config, 1);
        let backend = CpuBackend::new();
        let (memory, memory_mask) = encoder_memory(2, 2, 4, 16);

        let tokens: Vec<u32> = (0..10).collect();
        let out = dec
            .forward(
                &memory,
                &memory_mask,
                &tokens,
                &[3, 5],
                &tokens,
                0.5,
                &backend,
            )
            .unwrap();
        assert_eq!(out.scores.shape().dims(), &[2, 5, 100]);
        assert_eq!(out.output_lengths, vec![3, 5]);
        assert!(out.reverse_scores.is_none());
    }

    #[test]
    fn test_forward_causality() {
        let dec = decoder(small_config(), 3);
        let backend = CpuBackend::new();
        let (memory, memory_mask) = encoder_memory(4, 1, 3, DIM);

        let a = [1u32, 2, 3, 4];
        let b = [1u32, 2, 3, 9];
        let run = |t: &[u32]| {
            dec.forward(&memory, &memory_mask, t, &[4], t, 0.0, &backend)
                .unwrap()
                .scores
        };
        let sa = run(&a);
        let sb = run(&b);
        // Positions before the perturbed one are untouched.
        for i in 0..3 * VOCAB {
            assert_relative_eq!(sa.data_f32()[i], sb.data_f32()[i], epsilon = 1e-6);
        }
        // The perturbed position itself must differ.
        let last_a = &sa.data_f32()[3 * VOCAB..];
        let last_b = &sb.data_f32()[3 * VOCAB..];
        assert!(last_a.iter().zip(last_b).any(|(x, y)| (x - y).abs() > 1e-6));
    }

    #[test]
    fn test_reverse_causality_mirrored() {
        let mut config = small_config();
        config.reverse_blocks = 2;
        let dec = decoder(config, 5);
        let backend = CpuBackend::new();
        let (memory, memory_mask) = encoder_memory(6, 1, 3, DIM);

        let tokens = [1u32, 2, 3, 4];
        // Perturb reverse position 0; rows i >= 1 may not change.
        let ra = [5u32, 6, 7, 8];
        let rb = [9u32, 6, 7, 8];
        let run = |r: &[u32]| {
            dec.forward(&memory, &memory_mask, &tokens, &[4], r, 1.0, &backend)
                .unwrap()
                .reverse_scores
                .unwrap()
        };
        let sa = run(&ra);
        let sb = run(&rb);
        for i in VOCAB..4 * VOCAB {
            assert_relative_eq!(sa.data_f32()[i], sb.data_f32()[i], epsilon = 1e-6);
        }
    }

    #[test]
    fn test_padding_invariance() {
        let dec = decoder(small_config(), 7);
        let backend = CpuBackend::new();
        let (memory, memory_mask) = encoder_memory(8, 1, 3, DIM);

        let a = [1u32, 2, 3, 0, 0];
        let b = [1u32, 2, 3, 7, 8];
        let run = |t: &[u32]| {
            dec.forward(&memory, &memory_mask, t, &[3], t, 0.0, &backend)
                .unwrap()
        };
        let sa = run(&a);
        let sb = run(&b);
        assert_eq!(sa.output_lengths, vec![3]);
        // Valid positions are unaffected by padding content.
        for i in 0..3 * VOCAB {
            assert_relative_eq!(
                sa.scores.data_f32()[i],
                sb.scores.data_f32()[i],
                epsilon = 1e-6
            );
        }
    }

    #[test]
    fn test_reverse_gating() {
        let backend = CpuBackend::new();
        let (memory, memory_mask) = encoder_memory(9, 1, 3, DIM);
        let tokens = [1u32, 2, 3];
        // Garbage reverse ids, including out-of-vocabulary ones. With the
        // gate closed they must never be inspected.
        let garbage = [999u32, 999, 999];

        // Gate closed by zero weight.
        let mut config = small_config();
        config.reverse_blocks = 2;
        let dec = decoder(config, 10);
        let out = dec
            .forward(&memory, &memory_mask, &tokens, &[3], &garbage, 0.0, &backend)
            .unwrap();
        assert!(out.reverse_scores.is_none());

        // Gate closed by zero reverse blocks.
        let dec = decoder(small_config(), 11);
        let out = dec
            .forward(&memory, &memory_mask, &tokens, &[3], &garbage, 1.0, &backend)
            .unwrap();
        assert!(out.reverse_scores.is_none());

        // Gate open.
        let mut config = small_config();
        config.reverse_blocks = 1;
        let dec = decoder(config, 12);
        let reverse = [3u32, 2, 1];
        let out = dec
            .forward(&memory, &memory_mask, &tokens, &[3], &reverse, 0.3, &backend)
            .unwrap();
        let r = out.reverse_scores.unwrap();
        assert_eq!(r.shape().dims(), &[1, 3, VOCAB]);
    }

    #[test]
    fn test_incremental_matches_full_sequence() {
        let dec = decoder(small_config(), 13);
        let backend = CpuBackend::new();
        let (memory, memory_mask) = encoder_memory(14, 1, 3, DIM);

        let tokens = [1u32, 2, 3, 4];
        let full = dec
            .forward(&memory, &memory_mask, &tokens, &[4], &tokens, 0.0, &backend)
            .unwrap()
            .scores;
        let full_log = backend
            .log_softmax(full.data_f32(), VOCAB)
            .unwrap();

        let mut cache: Option<DecoderCache> = None;
        for t in 1..=4 {
            let (log_probs, new_cache) = dec
                .forward_one_step(
                    &memory,
                    &memory_mask,
                    &tokens[..t],
                    &causal_mask(t),
                    cache.as_ref(),
                    &backend,
                )
                .unwrap();
            assert_eq!(log_probs.shape().dims(), &[1, VOCAB]);
            assert_eq!(new_cache.positions(), t);
            for v in 0..VOCAB {
                assert_relative_eq!(
                    log_probs.data_f32()[v],
                    full_log[(t - 1) * VOCAB + v],
                    epsilon = 1e-4
                );
            }
            cache = Some(new_cache);
        }
    }

    #[test]
    fn test_cache_purity_and_staleness() {
        let dec = decoder(small_config(), 15);
        let backend = CpuBackend::new();
        let (memory, memory_mask) = encoder_memory(16, 1, 3, DIM);
        let prefix = [1u32, 2, 3];

        // Determinism: same prefix, fresh cache, identical results.
        let (ya, ca) = dec
            .forward_one_step(
                &memory,
                &memory_mask,
                &prefix,
                &causal_mask(3),
                None,
                &backend,
            )
            .unwrap();
        let (yb, cb) = dec
            .forward_one_step(
                &memory,
                &memory_mask,
                &prefix,
                &causal_mask(3),
                None,
                &backend,
            )
            .unwrap();
        assert_eq!(ya.data_f32(), yb.data_f32());
        assert_eq!(ca.len(), cb.len());
        for i in 0..ca.len() {
            assert_eq!(ca.entry(i).data_f32(), cb.entry(i).data_f32());
        }

        // A cache recorded at length 3 cannot serve a length-5 prefix.
        let longer = [1u32, 2, 3, 4, 5];
        let err = dec
            .forward_one_step(
                &memory,
                &memory_mask,
                &longer,
                &causal_mask(5),
                Some(&ca),
                &backend,
            )
            .unwrap_err();
        assert!(matches!(err, DecoderError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_branching_requires_clone() {
        let dec = decoder(small_config(), 17);
        let backend = CpuBackend::new();
        let (memory, memory_mask) = encoder_memory(18, 1, 3, DIM);

        let (_, shared) = dec
            .forward_one_step(
                &memory,
                &memory_mask,
                &[1u32, 2],
                &causal_mask(2),
                None,
                &backend,
            )
            .unwrap();

        // Two branches extend an explicit copy each; both stay valid.
        let branch = shared.clone();
        let (_, c1) = dec
            .forward_one_step(
                &memory,
                &memory_mask,
                &[1u32, 2, 3],
                &causal_mask(3),
                Some(&shared),
                &backend,
            )
            .unwrap();
        let (_, c2) = dec
            .forward_one_step(
                &memory,
                &memory_mask,
                &[1u32, 2, 7],
                &causal_mask(3),
                Some(&branch),
                &backend,
            )
            .unwrap();
        assert_eq!(c1.positions(), 3);
        assert_eq!(c2.positions(), 3);
    }

    #[test]
    fn test_shape_validation() {
        let dec = decoder(small_config(), 19);
        let backend = CpuBackend::new();

        // Memory feature dimension must equal the attention dimension.
        let (bad_memory, bad_mask) = encoder_memory(20, 1, 3, DIM * 2);
        assert!(matches!(
            dec.forward(&bad_memory, &bad_mask, &[1], &[1], &[1], 0.0, &backend)
                .unwrap_err(),
            DecoderError::ShapeMismatch { .. }
        ));

        let (memory, memory_mask) = encoder_memory(21, 2, 3, DIM);
        // valid_lengths batch disagrees with memory batch.
        assert!(dec
            .forward(&memory, &memory_mask, &[1, 2], &[1], &[1, 2], 0.0, &backend)
            .is_err());
        // Reverse token buffer length checked once the gate is open.
        let mut config = small_config();
        config.reverse_blocks = 1;
        let dec_r = decoder(config, 22);
        assert!(dec_r
            .forward(&memory, &memory_mask, &[1, 2], &[1, 1], &[1], 1.0, &backend)
            .is_err());
    }

    #[test]
    fn test_invalid_length_rejected_before_compute() {
        let dec = decoder(small_config(), 23);
        let backend = CpuBackend::new();
        let (memory, memory_mask) = encoder_memory(24, 1, 3, DIM);
        let err = dec
            .forward(&memory, &memory_mask, &[1, 2], &[3], &[1, 2], 0.0, &backend)
            .unwrap_err();
        assert!(matches!(
            err,
            DecoderError::InvalidLength { length: 3, max: 2 }
        ));
    }

    #[test]
    fn test_decoder_and_output_are_debuggable() {
        let dec = decoder(small_config(), 26);
        assert!(format!("{:?}", dec).contains("BidirectionalDecoder"));

        let backend = CpuBackend::new();
        let (memory, memory_mask) = encoder_memory(27, 1, 2, DIM);
        let out = dec
            .forward(&memory, &memory_mask, &[1, 2], &[2], &[1, 2], 0.0, &backend)
            .unwrap();
        assert!(format!("{:?}", out).contains("reverse_scores"));
    }

    #[test]
    fn test_construction_rejects_bad_config() {
        let mut rng = StdRng::seed_from_u64(25);
        let mut config = small_config();
        config.attention_heads = 3;
        assert!(matches!(
            BidirectionalDecoder::new(config, &mut rng).unwrap_err(),
            DecoderError::Configuration(_)
        ));
    }
}
