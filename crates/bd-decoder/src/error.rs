use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecoderError {
    #[error("valid length {length} exceeds buffer length {max}")]
    InvalidLength { length: usize, max: usize },
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },
    #[error("token id {id} exceeds vocabulary size {vocab}")]
    InvalidToken { id: u32, vocab: usize },
    #[error("tensor error: {0}")]
    Tensor(#[from] bd_tensor::TensorError),
}

pub type Result<T> = std::result::Result<T, DecoderError>;
