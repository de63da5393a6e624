use bd_tensor::Tensor;

/// Per-block feature history threaded through successive one-step calls.
///
/// Entry `i` holds block `i`'s output features for all previously decoded
/// positions, shape (B, T-1, D) before the next step. The cache is owned by
/// the caller: each one-step call consumes the previous cache and returns a
/// fresh one, and search branches diverging from a shared prefix must
/// `clone()` before extending independently.
#[derive(Debug, Clone, Default)]
pub struct DecoderCache {
    entries: Vec<Tensor>,
}

impl DecoderCache {
    pub fn new() -> Self {
        DecoderCache {
            entries: Vec::new(),
        }
    }

    /// Number of per-block entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The cached entry for block `i`.
    pub fn entry(&self, i: usize) -> &Tensor {
        &self.entries[i]
    }

    /// Prefix length recorded by this cache (0 when empty).
    pub fn positions(&self) -> usize {
        self.entries
            .first()
            .map(|t| t.shape().dim(1))
            .unwrap_or(0)
    }

    pub(crate) fn push(&mut self, entry: Tensor) {
        self.entries.push(entry);
    }
}
