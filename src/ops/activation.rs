use crate::autograd::{apply_forward, Operation};
use crate::error::RetrogradError;
use crate::ops::{check_arity, check_cpu_contiguous, single_output};
use crate::types::Element;
use crate::variable::Variable;

/// Rectified linear unit: `max(x, 0)` element-wise.
///
/// Backward: the output gradient passes through where the captured input was
/// strictly positive and is zeroed elsewhere. The subgradient at zero is
/// taken as zero.
#[derive(Debug)]
pub struct ReluOp;

impl<T: Element> Operation<T> for ReluOp {
    fn name(&self) -> &'static str {
        "relu_op"
    }

    fn forward(&self, inputs: &[Variable<T>]) -> Result<Vec<Variable<T>>, RetrogradError> {
        check_arity("relu_op", inputs.len(), 1)?;
        let x = &inputs[0];
        check_cpu_contiguous("relu_op", x)?;

        let data: Vec<T> = x
            .to_host()
            .iter()
            .map(|&v| if v > T::zero() { v } else { T::zero() })
            .collect();
        Ok(vec![Variable::new(data, x.shape())?])
    }

    fn backward(
        &self,
        inputs: &[Variable<T>],
        output_grads: &[Variable<T>],
    ) -> Result<Vec<Variable<T>>, RetrogradError> {
        check_arity("relu_op backward", inputs.len(), 1)?;
        check_arity("relu_op backward", output_grads.len(), 1)?;
        let data: Vec<T> = inputs[0]
            .to_host()
            .iter()
            .zip(output_grads[0].to_host().iter())
            .map(|(&x, &g)| if x > T::zero() { g } else { T::zero() })
            .collect();
        Ok(vec![Variable::new(data, inputs[0].shape())?])
    }
}

/// Element-wise `max(x, 0)`, recorded into the graph when tracking is
/// enabled.
pub fn relu_op<T: Element>(input: &Variable<T>) -> Result<Variable<T>, RetrogradError> {
    single_output("relu_op", apply_forward(ReluOp, &[input.clone()])?)
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
    fn test_relu_forward_clamps_negatives() {
        let x = Variable::new(vec![-1.0f32, 0.0, 2.5], vec![3]).unwrap();
        let y = relu_op(&x).unwrap();
        assert_eq!(y.to_host(), vec![0.0, 0.0, 2.5]);
    }

    #[test]
    fn test_relu_backward_masks_gradient() {
        let x = leaf_with_grad(vec![-1.0, 0.0, 2.5], vec![3]);
        let y = relu_op(&x).unwrap();
        let g = Variable::new(vec![10.0f32, 20.0, 30.0], vec![3]).unwrap();
        y.backward(Some(&g)).unwrap();
        // Zero input gets zero gradient: the kink's subgradient is zero.
        assert_eq!(x.grad().unwrap().to_host(), vec![0.0, 0.0, 30.0]);
    }

    #[test]
    fn test_relu_fan_out_accumulates_into_source() {
        let x = leaf_with_grad(vec![-1.0, 2.0, 3.0], vec![3]);
        let y1 = relu_op(&x).unwrap();
        let y2 = relu_op(&x).unwrap();
        let g = Variable::new(vec![1.0f32, 2.0, 3.0], vec![3]).unwrap();
        y1.backward(Some(&g)).unwrap();
        y2.backward(Some(&g)).unwrap();
        assert_eq!(x.grad().unwrap().to_host(), vec![0.0, 4.0, 6.0]);
    }
}
