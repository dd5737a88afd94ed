use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

use crate::autograd::backprop::{BackProp, BackwardFn};
use crate::autograd::grad_mode::is_grad_enabled;
use crate::error::RetrogradError;
use crate::types::Element;
use crate::variable::untyped::UntypedVariable;
use crate::variable::Variable;

/// The contract an operation collaborator exposes to the graph.
///
/// `forward` and `backward` have mirrored arities: `backward` receives one
/// gradient per output of `forward` (in the same order) and must produce one
/// gradient per input (in the same order). The engine does not know how
/// either procedure computes its numeric result.
pub trait Operation<T: Element>: Debug {
    /// Name used for error and log context.
    fn name(&self) -> &'static str;

    /// Computes the operation's output node(s) from typed input nodes.
    fn forward(&self, inputs: &[Variable<T>]) -> Result<Vec<Variable<T>>, RetrogradError>;

    /// Maps the gradients of the outputs to the gradients of the inputs.
    /// `inputs` are the original arguments, as captured at invocation time.
    fn backward(
        &self,
        inputs: &[Variable<T>],
        output_grads: &[Variable<T>],
    ) -> Result<Vec<Variable<T>>, RetrogradError>;
}

/// Lifts an operation invocation into the computation graph.
///
/// Runs the forward procedure; then, if tracking is enabled and at least one
/// input requires gradients, captures the type-erased inputs into a new
/// [`BackProp`] record whose backward closure re-types the slot gradients,
/// invokes the operation's backward procedure, and re-erases the results.
/// Every output is marked as requiring gradients, attached to the shared
/// record, and stamped with its output slot index.
///
/// With tracking disabled, or with no input requiring gradients, the forward
/// result is returned with no graph side effects: no record is created and
/// no gradient storage is allocated (the inference fast path).
pub fn apply_forward<T, O>(
    op: O,
    inputs: &[Variable<T>],
) -> Result<Vec<Variable<T>>, RetrogradError>
where
    T: Element,
    O: Operation<T> + 'static,
{
    let mut outputs = op.forward(inputs)?;
    if !is_grad_enabled() || !inputs.iter().any(Variable::requires_grad) {
        return Ok(outputs);
    }

    let erased_inputs: Vec<UntypedVariable> = inputs.iter().map(Variable::erase).collect();
    log::debug!(
        "recording {} into the graph ({} inputs, {} outputs)",
        op.name(),
        erased_inputs.len(),
        outputs.len()
    );

    let captured = erased_inputs.clone();
    let op = Rc::new(op);
    let backward_fn: BackwardFn = Box::new(move |slot_grads| {
        let typed_inputs: Vec<Variable<T>> = captured
            .iter()
            .map(UntypedVariable::retype::<T>)
            .collect::<Result<_, _>>()?;
        let typed_grads: Vec<Variable<T>> = slot_grads
            .iter()
            .map(UntypedVariable::retype::<T>)
            .collect::<Result<_, _>>()?;
        let input_grads = op.backward(&typed_inputs, &typed_grads)?;
        Ok(input_grads.iter().map(Variable::erase).collect())
    });

    let record = Rc::new(RefCell::new(BackProp::new(
        backward_fn,
        erased_inputs,
        outputs.len(),
    )));
    for (position, output) in outputs.iter_mut().enumerate() {
        output.set_requires_grad(true)?;
        output.grad_fn = Some(Rc::clone(&record));
        output.out_position = position;
    }
    Ok(outputs)
}
