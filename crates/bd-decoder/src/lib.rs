//! `bd-decoder` - Bidirectional attention decoder core for bidecoder.
//!
//! Given encoder memory and a (partially) generated target sequence, the
//! decoder produces per-position scores over a fixed vocabulary, causally
//! left-to-right and optionally right-to-left for hypothesis re-scoring.
//!
//! Two operating modes:
//! - full-sequence scoring of teacher-forced targets
//!   ([`BidirectionalDecoder::forward`])
//! - incremental one-step decoding with a caller-owned per-block cache
//!   ([`BidirectionalDecoder::forward_one_step`]), guaranteed to match the
//!   full-sequence path over the same prefix

pub mod attention;
pub mod block;
pub mod cache;
pub mod config;
pub mod decoder;
pub mod embedding;
pub mod error;
pub mod layers;
pub mod mask;

pub use attention::MultiHeadAttention;
pub use block::DecoderBlock;
pub use cache::DecoderCache;
pub use config::DecoderConfig;
pub use decoder::{BidirectionalDecoder, ForwardOutput};
pub use embedding::Embedding;
pub use error::{DecoderError, Result};
pub use mask::{
    causal_mask, causal_mask_reversed, padding_mask, padding_mask_right, BoolMask,
};
