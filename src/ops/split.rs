use crate::autograd::{apply_forward, Operation};
use crate::error::RetrogradError;
use crate::ops::{check_arity, check_cpu_contiguous};
use crate::types::Element;
use crate::variable::Variable;

/// Splits a rank-1 variable of even length into two halves.
///
/// The two outputs share one backward-edge record: its fan-in gate holds the
/// backward pass until both halves have received their gradients, which are
/// then concatenated back into the input's shape.
#[derive(Debug)]
pub struct SplitOp;

impl<T: Element> Operation<T> for SplitOp {
    fn name(&self) -> &'static str {
        "split_op"
    }

    fn forward(&self, inputs: &[Variable<T>]) -> Result<Vec<Variable<T>>, RetrogradError> {
        check_arity("split_op", inputs.len(), 1)?;
        let x = &inputs[0];
        check_cpu_contiguous("split_op", x)?;
        if x.rank() != 1 {
            return Err(RetrogradError::RankMismatch {
                expected: 1,
                actual: x.rank(),
                operation: "split_op".to_string(),
            });
        }
        let len = x.numel();
        if len % 2 != 0 {
            return Err(RetrogradError::UnsupportedOperation(format!(
                "split_op: length {len} is not divisible into two halves"
            )));
        }

        let data = x.to_host();
        let half = len / 2;
        Ok(vec![
            Variable::new(data[..half].to_vec(), vec![half])?,
            Variable::new(data[half..].to_vec(), vec![half])?,
        ])
    }

    fn backward(
        &self,
        inputs: &[Variable<T>],
        output_grads: &[Variable<T>],
    ) -> Result<Vec<Variable<T>>, RetrogradError> {
        check_arity("split_op backward", inputs.len(), 1)?;
        check_arity("split_op backward", output_grads.len(), 2)?;
        let mut data = output_grads[0].to_host();
        data.extend(output_grads[1].to_host());
        Ok(vec![Variable::new(data, inputs[0].shape())?])
    }
}

/// Splits a rank-1 variable of even length into two halves, recorded into
/// the graph when tracking is enabled.
pub fn split_op<T: Element>(
    input: &Variable<T>,
) -> Result<(Variable<T>, Variable<T>), RetrogradError> {
    let mut outputs = apply_forward(SplitOp, &[input.clone()])?;
    if outputs.len() != 2 {
        return Err(RetrogradError::InternalError(format!(
            "split_op: expected two outputs, got {}",
            outputs.len()
        )));
    }
    let second = outputs.remove(1);
    let first = outputs.remove(0);
    Ok((first, second))
}
