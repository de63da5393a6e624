use half::f16;

use crate::backend::ComputeBackend;
use crate::dtype::DType;
use crate::error::{Result, TensorError};
use crate::shape::Shape;
use crate::storage::CpuStorage;

/// A tensor backed by CPU storage.
///
/// Holds contiguous, row-major data with an associated shape and dtype.
/// Operations that require computation are dispatched to a `ComputeBackend`.
#[derive(Debug, Clone)]
pub struct Tensor {
    storage: CpuStorage,
    shape: Shape,
    dtype: DType,
}

impl Tensor {
    /// Create a new f32 tensor from data and a shape.
    ///
    /// # Panics
    /// Panics if `data.len() != shape.numel()`.
    pub fn new(data: Vec<f32>, shape: Shape) -> Self {
        assert_eq!(
            data.len(),
            shape.numel(),
            "data length {} does not match shape {:?} (numel={})",
            data.len(),
            shape,
            shape.numel()
        );
        Tensor {
            storage: CpuStorage::from_f32_vec(data),
            shape,
            dtype: DType::F32,
        }
    }

    /// Create a new f16 tensor from half-precision data and a shape.
    ///
    /// # Panics
    /// Panics if `data.len() != shape.numel()`.
    pub fn from_f16(data: Vec<f16>, shape: Shape) -> Self {
        assert_eq!(
            data.len(),
            shape.numel(),
            "data length {} does not match shape {:?} (numel={})",
            data.len(),
            shape,
            shape.numel()
        );
        Tensor {
            storage: CpuStorage::from_f16_vec(data),
            shape,
            dtype: DType::F16,
        }
    }

    /// Create a zero-filled f32 tensor with the given shape.
    pub fn zeros(shape: Shape) -> Self {
        let n = shape.numel();
        Tensor {
            storage: CpuStorage::zeros(DType::F32, n),
            shape,
            dtype: DType::F32,
        }
    }

    /// Returns a reference to the tensor's shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the tensor's data type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Returns the underlying data as an f32 slice.
    ///
    /// # Panics
    /// Panics if the storage is not F32; convert with [`Tensor::to_f32`] first.
    pub fn data_f32(&self) -> &[f32] {
        self.storage
            .as_f32_slice()
            .expect("tensor storage is not F32")
    }

    /// Returns an f32 copy of this tensor, promoting F16 storage.
    pub fn to_f32(&self) -> Tensor {
        Tensor {
            storage: CpuStorage::from_f32_vec(self.storage.to_f32_vec()),
            shape: self.shape.clone(),
            dtype: DType::F32,
        }
    }

    /// Reshape the tensor, returning a new tensor with the same data but
    /// a different shape.
    ///
    /// The total number of elements must remain the same.
    pub fn reshape(&self, new_shape: Shape) -> Result<Tensor> {
        if self.shape.numel() != new_shape.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.dims().to_vec(),
                got: new_shape.dims().to_vec(),
            });
        }
        Ok(Tensor {
            storage: self.storage.clone(),
            shape: new_shape,
            dtype: self.dtype,
        })
    }

    /// Matrix multiplication of two 2D tensors using the given backend.
    ///
    /// self is [m, k], other is [k, n], result is [m, n].
    pub fn matmul(&self, other: &Tensor, backend: &dyn ComputeBackend) -> Result<Tensor> {
        if self.shape.ndim() != 2 || other.shape.ndim() != 2 {
            return Err(TensorError::Other(
                "matmul requires 2D tensors".to_string(),
            ));
        }

        let m = self.shape.dim(0);
        let k = self.shape.dim(1);
        let k2 = other.shape.dim(0);
        let n = other.shape.dim(1);

        if k != k2 {
            return Err(TensorError::MatmulMismatch { m, k, k2, n });
        }

        let result_data = backend.matmul(self.data_f32(), other.data_f32(), m, k, n)?;
        Ok(Tensor::new(result_data, Shape::new(vec![m, n])))
    }

    /// Returns a copy of a contiguous range `start..start+len` along `axis`,
    /// keeping every other dimension intact.
    pub fn narrow(&self, axis: usize, start: usize, len: usize) -> Result<Tensor> {
        let ndim = self.shape.ndim();
        if axis >= ndim {
            return Err(TensorError::InvalidAxis { axis, ndim });
        }
        let dims = self.shape.dims();
        if start + len > dims[axis] {
            return Err(TensorError::Other(format!(
                "narrow range {}..{} out of bounds for axis {} with size {}",
                start,
                start + len,
                axis,
                dims[axis]
            )));
        }

        let outer: usize = dims[..axis].iter().product();
        let inner: usize = dims[axis + 1..].iter().product();
        let src = self.data_f32();

        let mut out = Vec::with_capacity(outer * len * inner);
        for o in 0..outer {
            let base = (o * dims[axis] + start) * inner;
            out.extend_from_slice(&src[base..base + len * inner]);
        }

        let mut new_dims = dims.to_vec();
        new_dims[axis] = len;
        Ok(Tensor::new(out, Shape::new(new_dims)))
    }

    /// Concatenate `self` and `other` along `axis`. All other dimensions
    /// must match exactly.
    pub fn concat(&self, other: &Tensor, axis: usize) -> Result<Tensor> {
        let ndim = self.shape.ndim();
        if axis >= ndim {
            return Err(TensorError::InvalidAxis { axis, ndim });
        }
        let a_dims = self.shape.dims();
        let b_dims = other.shape.dims();
        let compatible = a_dims.len() == b_dims.len()
            && a_dims
                .iter()
                .zip(b_dims.iter())
                .enumerate()
                .all(|(i, (a, b))| i == axis || a == b);
        if !compatible {
            return Err(TensorError::ShapeMismatch {
                expected: a_dims.to_vec(),
                got: b_dims.to_vec(),
            });
        }

        let outer: usize = a_dims[..axis].iter().product();
        let inner: usize = a_dims[axis + 1..].iter().product();
        let a_block = a_dims[axis] * inner;
        let b_block = b_dims[axis] * inner;
        let a_src = self.data_f32();
        let b_src = other.data_f32();

        let mut out = Vec::with_capacity(outer * (a_block + b_block));
        for o in 0..outer {
            out.extend_from_slice(&a_src[o * a_block..(o + 1) * a_block]);
            out.extend_from_slice(&b_src[o * b_block..(o + 1) * b_block]);
        }

        let mut new_dims = a_dims.to_vec();
        new_dims[axis] += b_dims[axis];
        Ok(Tensor::new(out, Shape::new(new_dims)))
    }

    /// Returns the underlying storage reference.
    pub fn storage(&self) -> &CpuStorage {
        &self.storage
    }
}
