use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::RetrogradError;
use crate::variable::untyped::{add_assign_data, UntypedVariable};

/// The backward procedure of a recorded operation: maps the ordered
/// per-output gradient slots to one gradient per captured input.
pub type BackwardFn =
    Box<dyn Fn(&[UntypedVariable]) -> Result<Vec<UntypedVariable>, RetrogradError>>;

/// The unit of the computation graph: one record per operation invocation.
///
/// A record holds the operation's type-erased backward procedure, the
/// type-erased inputs captured at invocation time, and one gradient slot per
/// output of the operation. The record fires its backward procedure at most
/// once, exactly when every slot has received a gradient; until then it
/// accumulates (Pending -> Accumulating -> Fired).
///
/// Ownership: every output node produced by the operation holds a shared
/// reference to the same record; the record never points back at its outputs,
/// which keeps the graph a DAG.
pub struct BackProp {
    backward_fn: BackwardFn,
    inputs: Vec<UntypedVariable>,
    slots: Vec<Option<UntypedVariable>>,
    filled: usize,
    fired: bool,
}

impl BackProp {
    /// Creates a record for an operation with `num_outputs` outputs.
    pub fn new(
        backward_fn: BackwardFn,
        inputs: Vec<UntypedVariable>,
        num_outputs: usize,
    ) -> Self {
        BackProp {
            backward_fn,
            inputs,
            slots: vec![None; num_outputs],
            filled: 0,
            fired: false,
        }
    }

    /// Number of gradient slots this record waits for before firing.
    pub fn expected(&self) -> usize {
        self.slots.len()
    }

    /// Number of distinct slots that have received a gradient.
    pub fn filled(&self) -> usize {
        self.filled
    }

    /// Whether the backward procedure has already run.
    pub fn has_fired(&self) -> bool {
        self.fired
    }

    /// The type-erased inputs captured at invocation time.
    pub fn inputs(&self) -> &[UntypedVariable] {
        &self.inputs
    }

    /// Stores `grad` into the given slot.
    ///
    /// First delivery to a slot fills it and advances the counter.
    /// Redelivery to an already-filled slot sums into it (never overwrites)
    /// without advancing the counter; the merge copies the slot first so the
    /// originally delivered gradient's storage is left untouched.
    fn deliver(
        &mut self,
        grad: UntypedVariable,
        position: usize,
    ) -> Result<(), RetrogradError> {
        if position >= self.slots.len() {
            return Err(RetrogradError::GradientSlotOutOfRange {
                position,
                expected: self.slots.len(),
            });
        }
        match self.slots[position].take() {
            None => {
                self.slots[position] = Some(grad);
                self.filled += 1;
            }
            Some(existing) => {
                let merged = existing.duplicate_detached()?;
                add_assign_data(&merged, &grad)?;
                self.slots[position] = Some(merged);
            }
        }
        Ok(())
    }

    fn ready(&self) -> bool {
        !self.fired && self.filled == self.slots.len()
    }

    /// Runs the backward procedure over the full ordered slot sequence and
    /// returns `(input, gradient)` pairs to propagate.
    fn fire(&mut self) -> Result<Vec<(UntypedVariable, UntypedVariable)>, RetrogradError> {
        if self.inputs.is_empty() {
            return Err(RetrogradError::EmptyBackward);
        }
        let slot_grads: Vec<UntypedVariable> = self
            .slots
            .iter()
            .map(|slot| {
                slot.clone().ok_or_else(|| {
                    RetrogradError::InternalError(
                        "backward record fired with an unfilled gradient slot".to_string(),
                    )
                })
            })
            .collect::<Result<_, _>>()?;
        let input_grads = (self.backward_fn)(&slot_grads)?;
        if input_grads.len() != self.inputs.len() {
            return Err(RetrogradError::GradientArityMismatch {
                produced: input_grads.len(),
                expected: self.inputs.len(),
            });
        }
        self.fired = true;
        Ok(self.inputs.iter().cloned().zip(input_grads).collect())
    }
}

impl fmt::Debug for BackProp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackProp")
            .field("num_inputs", &self.inputs.len())
            .field("expected", &self.slots.len())
            .field("filled", &self.filled)
            .field("fired", &self.fired)
            .finish()
    }
}

/// Drives the firing protocol from an initial gradient delivery.
///
/// Uses an explicit work-list instead of recursion so arbitrarily deep graphs
/// cannot exhaust the call stack; the partial order is unchanged: a record
/// fires strictly after every contribution to its expected count arrived.
/// A ready record holds its firing while any still-queued delivery can reach
/// it through the record graph: that delivery accumulates into the slot when
/// it lands and re-arms the firing, so interior fan-out (several paths of one
/// traversal funneling into one record) produces a single firing over the
/// summed gradient. On firing, each produced input gradient is summed into
/// the input's shared gradient storage (fan-out accumulation) and forwarded
/// to the input's own producing record at its recorded output slot. Any error
/// halts the whole traversal; partial gradient results are not considered
/// valid.
pub(crate) fn run_backward(
    record: &Rc<RefCell<BackProp>>,
    grad: UntypedVariable,
    position: usize,
) -> Result<(), RetrogradError> {
    let mut pending: Vec<(Rc<RefCell<BackProp>>, UntypedVariable, usize)> =
        vec![(Rc::clone(record), grad, position)];

    while let Some((record, grad, position)) = pending.pop() {
        let mut guard = record.borrow_mut();
        if guard.fired {
            log::warn!(
                "gradient delivered to slot {position} of an already-fired backward record; \
                 dropping the contribution"
            );
            continue;
        }
        guard.deliver(grad, position)?;
        log::trace!(
            "backward record at {:p}: {}/{} gradient slots filled",
            Rc::as_ptr(&record),
            guard.filled,
            guard.slots.len()
        );
        if !guard.ready() {
            continue;
        }
        drop(guard);
        if pending.iter().any(|(queued, _, _)| reaches(queued, &record)) {
            log::trace!(
                "backward record at {:p} is ready but a queued delivery still reaches it; \
                 holding the firing",
                Rc::as_ptr(&record)
            );
            continue;
        }
        let propagations = record.borrow_mut().fire()?;
        log::debug!(
            "backward record fired, propagating {} input gradients",
            propagations.len()
        );
        for (input, grad) in propagations {
            if input.requires_grad() {
                input.accumulate_grad(&grad)?;
            }
            if let Some(upstream) = input.grad_fn() {
                pending.push((upstream, grad, input.out_position()));
            }
        }
    }
    Ok(())
}

/// Whether a delivery to `from` can still lead to a contribution to
/// `target`: walks the record graph through captured inputs (gradients flow
/// from outputs toward leaves, so a record never depends on anything
/// downstream of itself).
fn reaches(from: &Rc<RefCell<BackProp>>, target: &Rc<RefCell<BackProp>>) -> bool {
    let target_ptr = Rc::as_ptr(target);
    let mut visited: Vec<*const RefCell<BackProp>> = Vec::new();
    let mut stack = vec![Rc::clone(from)];
    while let Some(current) = stack.pop() {
        let ptr = Rc::as_ptr(&current);
        if ptr == target_ptr {
            return true;
        }
        if visited.contains(&ptr) {
            continue;
        }
        visited.push(ptr);
        let guard = current.borrow();
        for input in guard.inputs() {
            if let Some(upstream) = input.grad_fn() {
                stack.push(upstream);
            }
        }
    }
    false
}
