use thiserror::Error;

use crate::device::StorageDevice;
use crate::types::DType;

/// Custom error type for the retrograd engine.
#[derive(Error, Debug, PartialEq, Clone)]
pub enum RetrogradError {
    #[error("Shape mismatch: expected {expected:?}, got {actual:?} during operation {operation}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
        operation: String,
    },

    #[error("Rank mismatch: expected {expected}, got {actual} during operation {operation}")]
    RankMismatch {
        expected: usize,
        actual: usize,
        operation: String,
    },

    #[error("DType mismatch for operation '{operation}': expected {expected:?}, got {actual:?}")]
    DTypeMismatch {
        expected: DType,
        actual: DType,
        operation: String,
    },

    #[error("Device mismatch for operation '{operation}': expected {expected:?}, got {actual:?}")]
    DeviceMismatch {
        expected: StorageDevice,
        actual: StorageDevice,
        operation: String,
    },

    #[error("Failed to allocate {requested} elements on {device:?}")]
    AllocationError {
        requested: usize,
        device: StorageDevice,
    },

    #[error("Variable creation error: data length {data_len} does not match shape {shape:?}")]
    VariableCreationError { data_len: usize, shape: Vec<usize> },

    #[error("Invalid strides {strides:?} for shape {shape:?}")]
    InvalidStrides {
        strides: Vec<usize>,
        shape: Vec<usize>,
    },

    #[error("Backward record fired with no recorded inputs: nothing to differentiate")]
    EmptyBackward,

    #[error("Implicit unit gradient requires a single-output record, but {expected} gradient slots are expected")]
    ImplicitGradientArity { expected: usize },

    #[error("Gradient delivered to slot {position}, but the record only expects {expected} slots")]
    GradientSlotOutOfRange { position: usize, expected: usize },

    #[error("Backward procedure produced {produced} input gradients, but the record captured {expected} inputs")]
    GradientArityMismatch { produced: usize, expected: usize },

    #[error("Index {index} out of bounds for axis of size {size} during operation {operation}")]
    IndexOutOfBounds {
        index: i64,
        size: usize,
        operation: String,
    },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}
