//! `bd-tensor` - Tensor types and compute backends for bidecoder.
//!
//! This crate provides:
//! - A `Tensor` type backed by CPU storage (contiguous, row-major)
//! - A `ComputeBackend` trait for pluggable compute
//! - A reference `CpuBackend` implementation
//! - Shape utilities and broadcasting
//! - Data type definitions (F32 working precision, F16 storage)

pub mod backend;
pub mod cpu;
pub mod dtype;
pub mod error;
pub mod shape;
pub mod storage;
pub mod tensor;

// Re-export primary types at the crate root for convenience.
pub use backend::ComputeBackend;
pub use cpu::CpuBackend;
pub use dtype::DType;
pub use error::{Result, TensorError};
pub use shape::Shape;
pub use storage::CpuStorage;
pub use tensor::Tensor;
