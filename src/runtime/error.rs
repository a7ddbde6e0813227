use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("Type mismatch: {message}")]
    TypeMismatch { message: String },
    #[error("Unknown field `{field}` on `{ty}`")]
    UnknownField { field: String, ty: String },
    #[error("Address {addr:#x} (+{len} bytes) is outside the heap")]
    BadAddress { addr: u64, len: u64 },
    #[error("Attempted to free {addr:#x}, which is not a live allocation")]
    InvalidFree { addr: u64 },
    #[error("Function `{name}` expected {expected} arguments but received {received}")]
    ArityMismatch {
        name: String,
        expected: usize,
        received: usize,
    },
    #[error("Evaluation nested deeper than {limit} levels")]
    StackOverflow { limit: usize },
    #[error("Runtime panic: {message}")]
    Panic { message: String },
}

impl RuntimeError {
    pub fn mismatch(message: impl Into<String>) -> Self {
        RuntimeError::TypeMismatch {
            message: message.into(),
        }
    }
}
