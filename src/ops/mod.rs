//! Differentiable operations.
//!
//! Each operation is a small struct implementing
//! [`crate::autograd::Operation`], paired with a `*_op` free function that
//! lifts it into the graph via [`crate::autograd::apply_forward`]. The
//! numeric kernels run on host data; non-CPU inputs must be transferred
//! first.

use crate::device::StorageDevice;
use crate::error::RetrogradError;
use crate::types::Element;
use crate::variable::Variable;

pub mod activation;
pub mod arithmetic;
pub mod loss;
pub mod reduction;
pub mod split;

pub use activation::{relu_op, ReluOp};
pub use arithmetic::{add_op, mul_op, AddOp, MulOp};
pub use loss::{log_softmax_op, nll_loss_op, LogSoftmaxOp, NllLossOp};
pub use reduction::{sum_op, SumOp};
pub use split::{split_op, SplitOp};

pub(crate) fn check_arity(
    operation: &str,
    actual: usize,
    expected: usize,
) -> Result<(), RetrogradError> {
    if actual != expected {
        return Err(RetrogradError::InternalError(format!(
            "{operation}: expected {expected} argument(s), got {actual}"
        )));
    }
    Ok(())
}

pub(crate) fn check_cpu_contiguous<T: Element>(
    operation: &str,
    input: &Variable<T>,
) -> Result<(), RetrogradError> {
    if input.device() != StorageDevice::CPU {
        return Err(RetrogradError::DeviceMismatch {
            expected: StorageDevice::CPU,
            actual: input.device(),
            operation: operation.to_string(),
        });
    }
    if !input.is_contiguous() {
        return Err(RetrogradError::UnsupportedOperation(format!(
            "{operation}: non-contiguous inputs are not supported"
        )));
    }
    Ok(())
}

pub(crate) fn check_same_shape<T: Element>(
    operation: &str,
    a: &Variable<T>,
    b: &Variable<T>,
) -> Result<(), RetrogradError> {
    if a.shape() != b.shape() {
        return Err(RetrogradError::ShapeMismatch {
            expected: a.shape(),
            actual: b.shape(),
            operation: operation.to_string(),
        });
    }
    Ok(())
}

/// Unwraps the single output of a one-output operation invocation.
pub(crate) fn single_output<T: Element>(
    operation: &str,
    mut outputs: Vec<Variable<T>>,
) -> Result<Variable<T>, RetrogradError> {
    if outputs.len() != 1 {
        return Err(RetrogradError::InternalError(format!(
            "{operation}: expected a single output, got {}",
            outputs.len()
        )));
    }
    Ok(outputs.remove(0))
}
