use crate::autograd::{apply_forward, Operation};
use crate::error::RetrogradError;
use crate::ops::{check_arity, check_cpu_contiguous, check_same_shape, single_output};
use crate::types::Element;
use crate::variable::Variable;

/// Element-wise addition of two equally-shaped variables.
///
/// Backward: both inputs receive the output gradient unchanged.
#[derive(Debug)]
pub struct AddOp;

impl<T: Element> Operation<T> for AddOp {
    fn name(&self) -> &'static str {
        "add_op"
    }

    fn forward(&self, inputs: &[Variable<T>]) -> Result<Vec<Variable<T>>, RetrogradError> {
        check_arity("add_op", inputs.len(), 2)?;
        let (a, b) = (&inputs[0], &inputs[1]);
        check_cpu_contiguous("add_op", a)?;
        check_cpu_contiguous("add_op", b)?;
        check_same_shape("add_op", a, b)?;

        let data: Vec<T> = a
            .to_host()
            .iter()
            .zip(b.to_host().iter())
            .map(|(&x, &y)| x + y)
            .collect();
        Ok(vec![Variable::new(data, a.shape())?])
    }

    fn backward(
        &self,
        _inputs: &[Variable<T>],
        output_grads: &[Variable<T>],
    ) -> Result<Vec<Variable<T>>, RetrogradError> {
        check_arity("add_op backward", output_grads.len(), 1)?;
        let g = &output_grads[0];
        Ok(vec![g.duplicate()?, g.duplicate()?])
    }
}

/// Element-wise multiplication of two equally-shaped variables.
///
/// Backward: d/da = g * b and d/db = g * a, with the inputs as captured at
/// invocation time.
#[derive(Debug)]
pub struct MulOp;

impl<T: Element> Operation<T> for MulOp {
    fn name(&self) -> &'static str {
        "mul_op"
    }

    fn forward(&self, inputs: &[Variable<T>]) -> Result<Vec<Variable<T>>, RetrogradError> {
        check_arity("mul_op", inputs.len(), 2)?;
        let (a, b) = (&inputs[0], &inputs[1]);
        check_cpu_contiguous("mul_op", a)?;
        check_cpu_contiguous("mul_op", b)?;
        check_same_shape("mul_op", a, b)?;

        let data: Vec<T> = a
            .to_host()
            .iter()
            .zip(b.to_host().iter())
            .map(|(&x, &y)| x * y)
            .collect();
        Ok(vec![Variable::new(data, a.shape())?])
    }

    fn backward(
        &self,
        inputs: &[Variable<T>],
        output_grads: &[Variable<T>],
    ) -> Result<Vec<Variable<T>>, RetrogradError> {
        check_arity("mul_op backward", inputs.len(), 2)?;
        check_arity("mul_op backward", output_grads.len(), 1)?;
        let g = output_grads[0].to_host();
        let a = inputs[0].to_host();
        let b = inputs[1].to_host();

        let grad_a: Vec<T> = g.iter().zip(b.iter()).map(|(&g, &y)| g * y).collect();
        let grad_b: Vec<T> = g.iter().zip(a.iter()).map(|(&g, &x)| g * x).collect();
        Ok(vec![
            Variable::new(grad_a, inputs[0].shape())?,
            Variable::new(grad_b, inputs[1].shape())?,
        ])
    }
}

/// Element-wise `a + b`, recorded into the graph when tracking is enabled.
pub fn add_op<T: Element>(
    a: &Variable<T>,
    b: &Variable<T>,
) -> Result<Variable<T>, RetrogradError> {
    single_output("add_op", apply_forward(AddOp, &[a.clone(), b.clone()])?)
}

/// Element-wise `a * b`, recorded into the graph when tracking is enabled.
pub fn mul_op<T: Element>(
    a: &Variable<T>,
    b: &Variable<T>,
) -> Result<Variable<T>, RetrogradError> {
    single_output("mul_op", apply_forward(MulOp, &[a.clone(), b.clone()])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::ones_like;

    fn leaf_with_grad(data: Vec<f32>, shape: Vec<usize>) -> Variable<f32> {
        let mut v = Variable::new(data, shape).unwrap();
        v.set_requires_grad(true).unwrap();
        v
    }

    #[test]
    fn test_add_forward_and_backward() {
        let a = leaf_with_grad(vec![1.0, 2.0, 3.0], vec![3]);
        let b = leaf_with_grad(vec![10.0, 20.0, 30.0], vec![3]);
        let y = add_op(&a, &b).unwrap();
        assert_eq!(y.to_host(), vec![11.0, 22.0, 33.0]);

        let g = Variable::new(vec![1.0f32, 2.0, 3.0], vec![3]).unwrap();
        y.backward(Some(&g)).unwrap();
        assert_eq!(a.grad().unwrap().to_host(), vec![1.0, 2.0, 3.0]);
        assert_eq!(b.grad().unwrap().to_host(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_add_shape_mismatch() {
        let a = Variable::new(vec![1.0f32, 2.0], vec![2]).unwrap();
        let b = Variable::new(vec![1.0f32], vec![1]).unwrap();
        assert!(matches!(
            add_op(&a, &b),
            Err(RetrogradError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_mul_backward_uses_captured_inputs() {
        let a = leaf_with_grad(vec![2.0, 3.0], vec![2]);
        let b = leaf_with_grad(vec![5.0, 7.0], vec![2]);
        let y = mul_op(&a, &b).unwrap();
        assert_eq!(y.to_host(), vec![10.0, 21.0]);

        y.backward(Some(&ones_like(&y).unwrap())).unwrap();
        assert_eq!(a.grad().unwrap().to_host(), vec![5.0, 7.0]);
        assert_eq!(b.grad().unwrap().to_host(), vec![2.0, 3.0]);
    }

    #[test]
    fn test_square_accumulates_both_factors() {
        // y = x * x delivers two contributions to the same input node.
        let x = leaf_with_grad(vec![3.0], vec![1]);
        let y = mul_op(&x, &x).unwrap();
        y.backward(None).unwrap();
        assert_eq!(x.grad().unwrap().to_host(), vec![6.0]);
    }

    #[test]
    fn test_interior_node_square_sums_both_factors() {
        // Squaring an interior node sends two contributions to its producing
        // record in one traversal; the record must fire once over their sum.
        // y = relu(x)^2 with x = 3: da = 2a = 6, dx = 6.
        let x = leaf_with_grad(vec![3.0], vec![1]);
        let a = crate::ops::relu_op(&x).unwrap();
        let y = mul_op(&a, &a).unwrap();
        y.backward(None).unwrap();
        assert_eq!(a.grad().unwrap().to_host(), vec![6.0]);
        assert_eq!(x.grad().unwrap().to_host(), vec![6.0]);
    }

    #[test]
    fn test_untracked_add_produces_leaf() {
        let a = Variable::new(vec![1.0f32], vec![1]).unwrap();
        let b = Variable::new(vec![2.0f32], vec![1]).unwrap();
        let y = add_op(&a, &b).unwrap();
        assert!(!y.requires_grad());
        assert!(y.grad_fn().is_none());
    }

    #[test]
    fn test_f64_add() {
        let a = Variable::new(vec![0.1f64, 0.2], vec![2]).unwrap();
        let b = Variable::new(vec![0.3f64, 0.4], vec![2]).unwrap();
        let y = add_op(&a, &b).unwrap();
        assert_eq!(y.to_host(), vec![0.1 + 0.3, 0.2 + 0.4]);
    }
}
