use crate::error::{DecoderError, Result};

/// Hyperparameters for a `BidirectionalDecoder`.
///
/// `attention_dim` must equal the encoder output dimension: memory and
/// target features share it.
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Output vocabulary size (number of scores per position).
    pub vocab_size: usize,
    /// Shared attention / feature dimension D.
    pub attention_dim: usize,
    /// Number of attention heads per block.
    pub attention_heads: usize,
    /// Hidden units of the position-wise feed-forward.
    pub linear_units: usize,
    /// Number of left-to-right decoder blocks.
    pub num_blocks: usize,
    /// Number of right-to-left decoder blocks; 0 disables the reverse path.
    pub reverse_blocks: usize,
    /// Input embedding kind; only "embed" is supported.
    pub input_layer: String,
    /// Pre-norm (true) or post-norm (false) residual placement, threaded
    /// into every block and the output head.
    pub normalize_before: bool,
}

impl DecoderConfig {
    /// Config with the customary defaults for the given vocabulary and
    /// attention dimension.
    pub fn new(vocab_size: usize, attention_dim: usize) -> Self {
        DecoderConfig {
            vocab_size,
            attention_dim,
            attention_heads: 4,
            linear_units: 2048,
            num_blocks: 6,
            reverse_blocks: 0,
            input_layer: "embed".to_string(),
            normalize_before: true,
        }
    }

    /// Validate the configuration. Called at construction time so that
    /// inconsistent parameters never reach a forward call.
    pub fn validate(&self) -> Result<()> {
        if self.vocab_size == 0 {
            return Err(DecoderError::Configuration(
                "vocab_size must be > 0".to_string(),
            ));
        }
        if self.attention_dim == 0 {
            return Err(DecoderError::Configuration(
                "attention_dim must be > 0".to_string(),
            ));
        }
        if self.attention_heads == 0 || self.attention_dim % self.attention_heads != 0 {
            return Err(DecoderError::Configuration(format!(
                "attention_dim {} is not divisible by {} heads",
                self.attention_dim, self.attention_heads
            )));
        }
        if self.linear_units == 0 {
            return Err(DecoderError::Configuration(
                "linear_units must be > 0".to_string(),
            ));
        }
        if self.num_blocks == 0 {
            return Err(DecoderError::Configuration(
                "num_blocks must be > 0".to_string(),
            ));
        }
        if self.input_layer != "embed" {
            return Err(DecoderError::Configuration(format!(
                "only 'embed' input layer is supported: {}",
                self.input_layer
            )));
        }
        Ok(())
    }
}
