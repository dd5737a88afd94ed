use thiserror::Error;

use crate::autograd::grad_mode::{enable_grad, no_grad};
use crate::device::StorageDevice;
use crate::error::RetrogradError;
use crate::types::DType;
use crate::variable::Variable;

/// Error type specifically for gradient checking failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GradCheckError {
    #[error("Gradient check failed for input {input_index}, element {element_index}: analytical {analytical_grad} != numerical {numerical_grad} (difference {difference})")]
    GradientMismatch {
        input_index: usize,
        element_index: usize,
        analytical_grad: f64,
        numerical_grad: f64,
        difference: f64,
    },

    #[error("Forward function execution failed during gradient check: {0}")]
    ForwardPassError(RetrogradError),

    #[error("Backward pass execution failed during gradient check: {0}")]
    BackwardPassError(RetrogradError),

    #[error("Variable error during intermediate calculation: {0}")]
    VariableError(RetrogradError),

    #[error("Unsupported data type for gradient check: expected F32, got {0:?}")]
    UnsupportedDType(DType),

    #[error("Gradient checking only supported on CPU variables (input {input_index}), got {device:?}")]
    NonCpuInput {
        input_index: usize,
        device: StorageDevice,
    },

    #[error("Gradient checking on non-contiguous variables is not supported (input {input_index})")]
    NonContiguousInput { input_index: usize },

    #[error("Gradient check inputs must be graph leaves (input {input_index} has a producing record)")]
    InputNotLeaf { input_index: usize },

    #[error("Input {input_index} requires grad but has no gradient after the backward pass")]
    MissingAnalyticalGrad { input_index: usize },

    #[error("Numerical gradient is NaN or infinite for input {input_index}, element {element_index} (loss+: {loss_plus}, loss-: {loss_minus})")]
    NumericalGradNaNOrInfinite {
        input_index: usize,
        element_index: usize,
        loss_plus: f64,
        loss_minus: f64,
    },

    #[error("Analytical gradient is NaN or infinite for input {input_index}, element {element_index}: {value}")]
    AnalyticalGradNaNOrInfinite {
        input_index: usize,
        element_index: usize,
        value: f64,
    },

    #[error("Function did not propagate requires_grad correctly")]
    RequiresGradPropagationError,
}

impl From<RetrogradError> for GradCheckError {
    fn from(err: RetrogradError) -> Self {
        GradCheckError::VariableError(err)
    }
}

/// Scalar loss used by the checker: the output weighted by `output_grad`,
/// summed. Its gradient with respect to the output is `output_grad` itself.
fn weighted_sum(
    output: &Variable<f32>,
    output_grad: &Variable<f32>,
) -> Result<f64, GradCheckError> {
    if output.shape() != output_grad.shape() {
        return Err(GradCheckError::VariableError(
            RetrogradError::ShapeMismatch {
                expected: output.shape(),
                actual: output_grad.shape(),
                operation: "grad_check weighted_sum".to_string(),
            },
        ));
    }
    Ok(output
        .to_host()
        .iter()
        .zip(output_grad.to_host().iter())
        .map(|(&o, &g)| o as f64 * g as f64)
        .sum())
}

/// Checks analytical gradients against central finite differences.
///
/// `func` is invoked once under gradient tracking to obtain the analytical
/// gradients, then repeatedly (untracked) with each input element perturbed
/// by ±`epsilon`. The analytical and numerical values must agree within
/// `tolerance`, absolutely or relatively.
pub fn check_grad<F>(
    func: F,
    inputs: &[Variable<f32>],
    output_grad: &Variable<f32>,
    epsilon: f64,
    tolerance: f64,
) -> Result<(), GradCheckError>
where
    F: Fn(&[Variable<f32>]) -> Result<Variable<f32>, RetrogradError>,
{
    for (i, input) in inputs.iter().enumerate() {
        if input.dtype() != DType::F32 {
            return Err(GradCheckError::UnsupportedDType(input.dtype()));
        }
        if input.device() != StorageDevice::CPU {
            return Err(GradCheckError::NonCpuInput {
                input_index: i,
                device: input.device(),
            });
        }
        if !input.is_contiguous() {
            return Err(GradCheckError::NonContiguousInput { input_index: i });
        }
        if input.grad_fn().is_some() {
            return Err(GradCheckError::InputNotLeaf { input_index: i });
        }
    }

    // Analytical pass, tracked.
    for input in inputs {
        input.zero_grad();
    }
    let output = {
        let _tracked = enable_grad();
        func(inputs).map_err(GradCheckError::ForwardPassError)?
    };
    let any_requires_grad = inputs.iter().any(Variable::requires_grad);
    if any_requires_grad && !output.requires_grad() {
        return Err(GradCheckError::RequiresGradPropagationError);
    }
    output
        .backward(Some(output_grad))
        .map_err(GradCheckError::BackwardPassError)?;

    // Numerical passes, untracked.
    let _untracked = no_grad();
    for (i, input) in inputs.iter().enumerate() {
        if !input.requires_grad() {
            continue;
        }
        let analytical = input
            .grad()
            .ok_or(GradCheckError::MissingAnalyticalGrad { input_index: i })?
            .to_host();
        let original: Vec<f64> = input.to_host().iter().map(|&x| x as f64).collect();

        for elem_idx in 0..input.numel() {
            let loss_at = |delta: f64| -> Result<f64, GradCheckError> {
                let mut perturbed = original.clone();
                perturbed[elem_idx] += delta;
                let perturbed_input = Variable::new(
                    perturbed.iter().map(|&x| x as f32).collect(),
                    input.shape(),
                )?;
                let mut probe: Vec<Variable<f32>> = inputs.to_vec();
                probe[i] = perturbed_input;
                let output = func(&probe).map_err(GradCheckError::ForwardPassError)?;
                weighted_sum(&output, output_grad)
            };

            let loss_plus = loss_at(epsilon)?;
            let loss_minus = loss_at(-epsilon)?;
            let numerical = (loss_plus - loss_minus) / (2.0 * epsilon);
            let analytical_value = analytical[elem_idx] as f64;

            if numerical.is_nan() || numerical.is_infinite() {
                return Err(GradCheckError::NumericalGradNaNOrInfinite {
                    input_index: i,
                    element_index: elem_idx,
                    loss_plus,
                    loss_minus,
                });
            }
            if analytical_value.is_nan() || analytical_value.is_infinite() {
                return Err(GradCheckError::AnalyticalGradNaNOrInfinite {
                    input_index: i,
                    element_index: elem_idx,
                    value: analytical_value,
                });
            }

            let difference = (analytical_value - numerical).abs();
            let relative = difference / (analytical_value.abs() + epsilon);
            if difference > tolerance && relative > tolerance {
                return Err(GradCheckError::GradientMismatch {
                    input_index: i,
                    element_index: elem_idx,
                    analytical_grad: analytical_value,
                    numerical_grad: numerical,
                    difference,
                });
            }
        }
    }

    Ok(())
}
