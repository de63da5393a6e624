use bd_tensor::Shape;

use crate::error::{DecoderError, Result};

/// Boolean attendability mask with dims `(batch, rows, cols)`.
///
/// `true` at `(b, i, j)` means position `i` may attend to position `j`.
/// Dimensions of size 1 broadcast on access, so a padding mask `(B, 1, L)`
/// and a causal mask `(1, L, L)` can be combined or consumed directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoolMask {
    data: Vec<bool>,
    dims: [usize; 3],
}

impl BoolMask {
    /// Create a mask from flat row-major data.
    ///
    /// # Panics
    /// Panics if `data.len()` does not match the dims product.
    pub fn new(data: Vec<bool>, dims: [usize; 3]) -> Self {
        assert_eq!(
            data.len(),
            dims[0] * dims[1] * dims[2],
            "mask data length {} does not match dims {:?}",
            data.len(),
            dims
        );
        BoolMask { data, dims }
    }

    /// Returns the mask dimensions `(batch, rows, cols)`.
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Look up `(b, i, j)`, broadcasting any dimension of size 1.
    pub fn get(&self, b: usize, i: usize, j: usize) -> bool {
        let b = if self.dims[0] == 1 { 0 } else { b };
        let i = if self.dims[1] == 1 { 0 } else { i };
        let j = if self.dims[2] == 1 { 0 } else { j };
        self.data[(b * self.dims[1] + i) * self.dims[2] + j]
    }

    /// Element-wise AND with broadcasting, e.g. padding `(B,1,L)` AND
    /// causal `(1,L,L)` yields the effective target mask `(B,L,L)`.
    pub fn and(&self, other: &BoolMask) -> Result<BoolMask> {
        let out = Shape::broadcast_shape(
            &Shape::from_slice(&self.dims),
            &Shape::from_slice(&other.dims),
        )
        .map_err(DecoderError::Tensor)?;
        let (b, r, c) = (out.dim(0), out.dim(1), out.dim(2));

        let mut data = Vec::with_capacity(b * r * c);
        for bi in 0..b {
            for i in 0..r {
                for j in 0..c {
                    data.push(self.get(bi, i, j) && other.get(bi, i, j));
                }
            }
        }
        Ok(BoolMask::new(data, [b, r, c]))
    }

    /// Returns a mask restricted to rows `start..start+len`.
    ///
    /// A mask whose row dimension is 1 broadcasts over all rows already and
    /// is returned unchanged.
    pub fn narrow_rows(&self, start: usize, len: usize) -> BoolMask {
        if self.dims[1] == 1 {
            return self.clone();
        }
        assert!(
            start + len <= self.dims[1],
            "row range {}..{} out of bounds for {} rows",
            start,
            start + len,
            self.dims[1]
        );
        let [b, _, c] = self.dims;
        let mut data = Vec::with_capacity(b * len * c);
        for bi in 0..b {
            for i in start..start + len {
                for j in 0..c {
                    data.push(self.get(bi, i, j));
                }
            }
        }
        BoolMask::new(data, [b, len, c])
    }

    /// Number of `true` entries in row `i` of batch element `b`.
    pub fn row_count(&self, b: usize, i: usize) -> usize {
        (0..self.dims[2]).filter(|&j| self.get(b, i, j)).count()
    }
}

/// Padding mask `(B, 1, L)`: true at position `p` iff `p < valid_lengths[b]`.
///
/// Rejects any valid length exceeding `total_len`; lengths are never clamped.
pub fn padding_mask(valid_lengths: &[usize], total_len: usize) -> Result<BoolMask> {
    let batch = valid_lengths.len();
    let mut data = Vec::with_capacity(batch * total_len);
    for &len in valid_lengths {
        if len > total_len {
            return Err(DecoderError::InvalidLength {
                length: len,
                max: total_len,
            });
        }
        for p in 0..total_len {
            data.push(p < len);
        }
    }
    Ok(BoolMask::new(data, [batch, 1, total_len]))
}

/// Right-aligned padding mask `(B, 1, L)`: true at position `p` iff
/// `p >= total_len - valid_lengths[b]`.
///
/// Used for the right-to-left direction, whose target sequence is stored
/// right-aligned so the valid region is the suffix of the buffer.
pub fn padding_mask_right(valid_lengths: &[usize], total_len: usize) -> Result<BoolMask> {
    let batch = valid_lengths.len();
    let mut data = Vec::with_capacity(batch * total_len);
    for &len in valid_lengths {
        if len > total_len {
            return Err(DecoderError::InvalidLength {
                length: len,
                max: total_len,
            });
        }
        let first_valid = total_len - len;
        for p in 0..total_len {
            data.push(p >= first_valid);
        }
    }
    Ok(BoolMask::new(data, [batch, 1, total_len]))
}

/// Left-to-right causal mask `(1, L, L)`: true at `(i, j)` iff `j <= i`.
pub fn causal_mask(len: usize) -> BoolMask {
    let mut data = Vec::with_capacity(len * len);
    for i in 0..len {
        for j in 0..len {
            data.push(j <= i);
        }
    }
    BoolMask::new(data, [1, len, len])
}

/// Right-to-left causal mask `(1, L, L)`: true at `(i, j)` iff `j >= i`.
pub fn causal_mask_reversed(len: usize) -> BoolMask {
    let mut data = Vec::with_capacity(len * len);
    for i in 0..len {
        for j in 0..len {
            data.push(j >= i);
        }
    }
    BoolMask::new(data, [1, len, len])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding_mask() {
        let m = padding_mask(&[3, 5], 5).unwrap();
        assert_eq!(m.dims(), [2, 1, 5]);
        assert!(m.get(0, 0, 2));
        assert!(!m.get(0, 0, 3));
        assert!(m.get(1, 0, 4));
    }

    #[test]
    fn test_padding_mask_invalid_length() {
        let err = padding_mask(&[6], 5).unwrap_err();
        assert!(matches!(
            err,
            DecoderError::InvalidLength { length: 6, max: 5 }
        ));
    }

    #[test]
    fn test_padding_mask_right() {
        let m = padding_mask_right(&[3, 5], 5).unwrap();
        // First element valid only at positions 2..5.
        assert!(!m.get(0, 0, 1));
        assert!(m.get(0, 0, 2));
        assert!(m.get(0, 0, 4));
        // Full-length element valid everywhere.
        assert!(m.get(1, 0, 0));
        assert!(padding_mask_right(&[9], 5).is_err());
    }

    #[test]
    fn test_causal_mask_triangular() {
        let m = causal_mask(3);
        assert_eq!(m.dims(), [1, 3, 3]);
        assert!(m.get(0, 0, 0));
        assert!(!m.get(0, 0, 1));
        assert!(m.get(0, 2, 0));
        assert!(m.get(0, 2, 2));
    }

    #[test]
    fn test_causal_mask_reversed_triangular() {
        let m = causal_mask_reversed(3);
        assert!(m.get(0, 0, 2));
        assert!(!m.get(0, 2, 0));
        assert!(m.get(0, 1, 1));
    }

    #[test]
    fn test_and_broadcast() {
        let pad = padding_mask(&[2, 3], 3).unwrap();
        let causal = causal_mask(3);
        let tgt = pad.and(&causal).unwrap();
        assert_eq!(tgt.dims(), [2, 3, 3]);
        // Row 2 of batch 0: causally allowed up to j=2, but j=2 is padding.
        assert!(tgt.get(0, 2, 1));
        assert!(!tgt.get(0, 2, 2));
        // Batch 1 has no padding.
        assert!(tgt.get(1, 2, 2));
    }

    #[test]
    fn test_and_incompatible() {
        let a = BoolMask::new(vec![true; 6], [1, 2, 3]);
        let b = BoolMask::new(vec![true; 8], [1, 2, 4]);
        assert!(a.and(&b).is_err());
    }

    #[test]
    fn test_narrow_rows() {
        let m = causal_mask(4).narrow_rows(3, 1);
        assert_eq!(m.dims(), [1, 1, 4]);
        assert!(m.get(0, 0, 0) && m.get(0, 0, 3));

        // Broadcast row dim passes through.
        let pad = padding_mask(&[2], 4).unwrap();
        assert_eq!(pad.narrow_rows(3, 1).dims(), [1, 1, 4]);
    }

    #[test]
    fn test_row_count() {
        let pad = padding_mask(&[3, 5], 5).unwrap();
        assert_eq!(pad.row_count(0, 0), 3);
        assert_eq!(pad.row_count(1, 0), 5);
    }
}
