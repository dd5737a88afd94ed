use crate::autograd::{apply_forward, Operation};
use crate::error::RetrogradError;
use crate::ops::{check_arity, check_cpu_contiguous, single_output};
use crate::types::Element;
use crate::variable::{full, Variable};

/// Reduces a variable to a rank-0 scalar by summing every element.
///
/// Backward: the scalar output gradient is broadcast back to the input
/// shape.
#[derive(Debug)]
pub struct SumOp;

impl<T: Element> Operation<T> for SumOp {
    fn name(&self) -> &'static str {
        "sum_op"
    }

    fn forward(&self, inputs: &[Variable<T>]) -> Result<Vec<Variable<T>>, RetrogradError> {
        check_arity("sum_op", inputs.len(), 1)?;
        let x = &inputs[0];
        check_cpu_contiguous("sum_op", x)?;

        let total: T = x.to_host().into_iter().sum();
        Ok(vec![Variable::new(vec![total], vec![])?])
    }

    fn backward(
        &self,
        inputs: &[Variable<T>],
        output_grads: &[Variable<T>],
    ) -> Result<Vec<Variable<T>>, RetrogradError> {
        check_arity("sum_op backward", inputs.len(), 1)?;
        check_arity("sum_op backward", output_grads.len(), 1)?;
        let g = output_grads[0].to_host();
        let scalar = *g.first().ok_or_else(|| {
            RetrogradError::InternalError("sum_op backward: empty scalar gradient".to_string())
        })?;
        Ok(vec![full(&inputs[0].shape(), scalar)?])
    }
}

/// Sums every element into a rank-0 scalar, recorded into the graph when
/// tracking is enabled.
pub fn sum_op<T: Element>(input: &Variable<T>) -> Result<Variable<T>, RetrogradError> {
    single_output("sum_op", apply_forward(SumOp, &[input.clone()])?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_with_grad(data: Vec<f32>, shape: Vec<usize>) -> Variable<f32> {
        let mut v = Variable::new(data, shape).unwrap();
        v.set_requires_grad(true).unwrap();
        v
    }

    #[test]
    fn test_sum_produces_scalar() {
        let x = Variable::new(vec![1.0f32, 2.0, 3.0, 4.0], vec![2, 2]).unwrap();
        let y = sum_op(&x).unwrap();
        assert_eq!(y.shape(), Vec::<usize>::new());
        assert_eq!(y.rank(), 0);
        assert_eq!(y.numel(), 1);
        assert_eq!(y.to_host(), vec![10.0]);
    }

    #[test]
    fn test_sum_backward_broadcasts_scalar() {
        let x = leaf_with_grad(vec![1.0, 2.0, 3.0], vec![3]);
        let y = sum_op(&x).unwrap();
        // Implicit unit gradient on a scalar output.
        y.backward(None).unwrap();
        assert_eq!(x.grad().unwrap().to_host(), vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_sum_backward_scales_with_output_grad() {
        let x = leaf_with_grad(vec![1.0, 2.0], vec![2]);
        let y = sum_op(&x).unwrap();
        let g = Variable::new(vec![3.0f32], vec![]).unwrap();
        y.backward(Some(&g)).unwrap();
        assert_eq!(x.grad().unwrap().to_host(), vec![3.0, 3.0]);
    }
}
