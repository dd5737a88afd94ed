use crate::autograd::{apply_forward, Operation};
use crate::error::RetrogradError;
use crate::ops::{check_arity, check_cpu_contiguous, single_output};
use crate::types::Element;
use crate::variable::Variable;

/// Log-softmax over the last axis, computed with the max-shifted
/// log-sum-exp for numerical stability.
///
/// Backward: `dx = g - exp(lsm) * row_sum(g)` per row, where `lsm` is
/// recomputed from the captured input.
#[derive(Debug)]
pub struct LogSoftmaxOp;

fn row_log_softmax<T: Element>(row: &[T]) -> Vec<T> {
    let max = row.iter().fold(T::neg_infinity(), |m, &v| m.max(v));
    let log_sum = row
        .iter()
        .map(|&v| (v - max).exp())
        .sum::<T>()
        .ln();
    row.iter().map(|&v| v - max - log_sum).collect()
}

impl<T: Element> Operation<T> for LogSoftmaxOp {
    fn name(&self) -> &'static str {
        "log_softmax_op"
    }

    fn forward(&self, inputs: &[Variable<T>]) -> Result<Vec<Variable<T>>, RetrogradError> {
        check_arity("log_softmax_op", inputs.len(), 1)?;
        let x = &inputs[0];
        check_cpu_contiguous("log_softmax_op", x)?;
        if x.rank() == 0 {
            return Err(RetrogradError::RankMismatch {
                expected: 1,
                actual: 0,
                operation: "log_softmax_op".to_string(),
            });
        }

        let shape = x.shape();
        let classes = shape[shape.len() - 1];
        if classes == 0 {
            return Err(RetrogradError::UnsupportedOperation(
                "log_softmax_op: empty class axis".to_string(),
            ));
        }
        let data = x.to_host();
        let mut out = Vec::with_capacity(data.len());
        for row in data.chunks(classes) {
            out.extend(row_log_softmax(row));
        }
        Ok(vec![Variable::new(out, shape)?])
    }

    fn backward(
        &self,
        inputs: &[Variable<T>],
        output_grads: &[Variable<T>],
    ) -> Result<Vec<Variable<T>>, RetrogradError> {
        check_arity("log_softmax_op backward", inputs.len(), 1)?;
        check_arity("log_softmax_op backward", output_grads.len(), 1)?;
        let shape = inputs[0].shape();
        let classes = shape[shape.len() - 1];
        let data = inputs[0].to_host();
        let grads = output_grads[0].to_host();

        let mut out = Vec::with_capacity(data.len());
        for (row, grad_row) in data.chunks(classes).zip(grads.chunks(classes)) {
            let lsm = row_log_softmax(row);
            let grad_sum: T = grad_row.iter().copied().sum();
            out.extend(
                lsm.iter()
                    .zip(grad_row.iter())
                    .map(|(&l, &g)| g - l.exp() * grad_sum),
            );
        }
        Ok(vec![Variable::new(out, shape)?])
    }
}

/// Log-softmax over the last axis, recorded into the graph when tracking is
/// enabled.
pub fn log_softmax_op<T: Element>(input: &Variable<T>) -> Result<Variable<T>, RetrogradError> {
    single_output("log_softmax_op", apply_forward(LogSoftmaxOp, &[input.clone()])?)
}

/// Negative log-likelihood loss over `[batch, classes]` log-probabilities.
///
/// The loss is the mean of `-input[i, targets[i]]` over the rows whose
/// target is not `ignore_index`. With every row ignored the loss is zero
/// and so are the input gradients.
#[derive(Debug)]
pub struct NllLossOp {
    targets: Vec<i64>,
    ignore_index: i64,
}

impl NllLossOp {
    pub fn new(targets: Vec<i64>, ignore_index: i64) -> Self {
        NllLossOp {
            targets,
            ignore_index,
        }
    }

    fn active_count(&self) -> usize {
        self.targets
            .iter()
            .filter(|&&t| t != self.ignore_index)
            .count()
    }

    fn check_targets(&self, batch: usize, classes: usize) -> Result<(), RetrogradError> {
        if self.targets.len() != batch {
            return Err(RetrogradError::UnsupportedOperation(format!(
                "nll_loss_op: {} targets for a batch of {batch}",
                self.targets.len()
            )));
        }
        for &t in &self.targets {
            if t == self.ignore_index {
                continue;
            }
            if t < 0 || t as usize >= classes {
                return Err(RetrogradError::IndexOutOfBounds {
                    index: t,
                    size: classes,
                    operation: "nll_loss_op".to_string(),
                });
            }
        }
        Ok(())
    }
}

impl<T: Element> Operation<T> for NllLossOp {
    fn name(&self) -> &'static str {
        "nll_loss_op"
    }

    fn forward(&self, inputs: &[Variable<T>]) -> Result<Vec<Variable<T>>, RetrogradError> {
        check_arity("nll_loss_op", inputs.len(), 1)?;
        let x = &inputs[0];
        check_cpu_contiguous("nll_loss_op", x)?;
        if x.rank() != 2 {
            return Err(RetrogradError::RankMismatch {
                expected: 2,
                actual: x.rank(),
                operation: "nll_loss_op".to_string(),
            });
        }
        let shape = x.shape();
        let (batch, classes) = (shape[0], shape[1]);
        self.check_targets(batch, classes)?;

        let count = self.active_count();
        if count == 0 {
            return Ok(vec![Variable::new(vec![T::zero()], vec![])?]);
        }
        let divisor = T::from(count).ok_or_else(|| {
            RetrogradError::InternalError(format!(
                "nll_loss_op: batch count {count} not representable in the element type"
            ))
        })?;

        let data = x.to_host();
        let mut total = T::zero();
        for (i, &t) in self.targets.iter().enumerate() {
            if t == self.ignore_index {
                continue;
            }
            total += -data[i * classes + t as usize];
        }
        Ok(vec![Variable::new(vec![total / divisor], vec![])?])
    }

    fn backward(
        &self,
        inputs: &[Variable<T>],
        output_grads: &[Variable<T>],
    ) -> Result<Vec<Variable<T>>, RetrogradError> {
        check_arity("nll_loss_op backward", inputs.len(), 1)?;
        check_arity("nll_loss_op backward", output_grads.len(), 1)?;
        let shape = inputs[0].shape();
        let classes = shape[1];
        let mut out = vec![T::zero(); inputs[0].numel()];

        let count = self.active_count();
        if count > 0 {
            let divisor = T::from(count).ok_or_else(|| {
                RetrogradError::InternalError(format!(
                    "nll_loss_op: batch count {count} not representable in the element type"
                ))
            })?;
            let g = output_grads[0].to_host();
            let scalar = *g.first().ok_or_else(|| {
                RetrogradError::InternalError(
                    "nll_loss_op backward: empty scalar gradient".to_string(),
                )
            })?;
            for (i, &t) in self.targets.iter().enumerate() {
                if t == self.ignore_index {
                    continue;
                }
                out[i * classes + t as usize] = -scalar / divisor;
            }
        }
        Ok(vec![Variable::new(out, shape)?])
    }
}

/// Mean negative log-likelihood of `[batch, classes]` log-probabilities
/// against integer class targets, recorded into the graph when tracking is
/// enabled. Rows whose target equals `ignore_index` contribute neither to
/// the loss nor to the averaging count.
pub fn nll_loss_op<T: Element>(
    input: &Variable<T>,
    targets: &[i64],
    ignore_index: i64,
) -> Result<Variable<T>, RetrogradError> {
    single_output(
        "nll_loss_op",
        apply_forward(
            NllLossOp::new(targets.to_vec(), ignore_index),
            &[input.clone()],
        )?,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn leaf_with_grad(data: Vec<f32>, shape: Vec<usize>) -> Variable<f32> {
        let mut v = Variable::new(data, shape).unwrap();
        v.set_requires_grad(true).unwrap();
        v
    }

    #[test]
    fn test_log_softmax_rows_normalize() {
        let x = Variable::new(vec![0.1f32, 0.2, 1000.0, 1000.0], vec![2, 2]).unwrap();
        let y = log_softmax_op(&x).unwrap();
        let out = y.to_host();
        // Each row's probabilities sum to one, even for large logits.
        for row in out.chunks(2) {
            let total: f32 = row.iter().map(|&l| l.exp()).sum();
            assert_abs_diff_eq!(total, 1.0, epsilon = 1e-5);
        }
        assert_abs_diff_eq!(out[0], -0.744397, epsilon = 1e-5);
        assert_abs_diff_eq!(out[1], -0.644397, epsilon = 1e-5);
    }

    #[test]
    fn test_log_softmax_backward_zero_sums_rows() {
        let x = leaf_with_grad(vec![0.5, -1.0, 2.0], vec![1, 3]);
        let y = log_softmax_op(&x).unwrap();
        let g = Variable::new(vec![1.0f32, 2.0, 3.0], vec![1, 3]).unwrap();
        y.backward(Some(&g)).unwrap();
        // Each row's input gradient sums to zero: softmax is shift-invariant.
        let total: f32 = x.grad().unwrap().to_host().iter().sum();
        assert_abs_diff_eq!(total, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_nll_loss_masks_ignored_rows() {
        let lp = Variable::new(
            vec![-1.0f32, -2.0, -3.0, -4.0, -5.0, -6.0],
            vec![3, 2],
        )
        .unwrap();
        // Row 2 is ignored: loss = (1.0 + 4.0) / 2.
        let loss = nll_loss_op(&lp, &[0, 1, -100], -100).unwrap();
        assert_eq!(loss.rank(), 0);
        assert_abs_diff_eq!(loss.to_host()[0], 2.5, epsilon = 1e-6);
    }

    #[test]
    fn test_nll_loss_all_ignored_is_zero() {
        let lp = leaf_with_grad(vec![-1.0, -2.0], vec![1, 2]);
        let loss = nll_loss_op(&lp, &[-100], -100).unwrap();
        assert_eq!(loss.to_host(), vec![0.0]);
        loss.backward(None).unwrap();
        assert_eq!(lp.grad().unwrap().to_host(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_nll_loss_rejects_bad_target() {
        let lp = Variable::new(vec![-1.0f32, -2.0], vec![1, 2]).unwrap();
        let result = nll_loss_op(&lp, &[2], -100);
        assert!(matches!(
            result,
            Err(RetrogradError::IndexOutOfBounds { index: 2, size: 2, .. })
        ));
    }

    #[test]
    fn test_classification_loss_end_to_end() {
        // Three identical rows of logits; targets 0, 1 and an ignored row.
        let x = leaf_with_grad(vec![0.1, 0.2, 0.1, 0.2, 0.1, 0.2], vec![3, 2]);
        let lsm = log_softmax_op(&x).unwrap();
        let loss = nll_loss_op(&lsm, &[0, 1, -100], -100).unwrap();
        assert_abs_diff_eq!(loss.to_host()[0], 0.694397, epsilon = 1e-5);

        loss.backward(None).unwrap();
        let grad = x.grad().unwrap().to_host();
        let expected = [-0.262489f32, 0.262489, 0.237511, -0.237511, 0.0, 0.0];
        for (&g, &e) in grad.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(g, e, epsilon = 1e-4);
        }
    }
}
