use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::autograd::BackProp;
use crate::buffer::allocate;
use crate::device::StorageDevice;
use crate::error::RetrogradError;
use crate::types::{DType, Element};
use crate::variable::untyped::UntypedVariable;

pub mod create;
pub mod untyped;

pub use create::{from_vec, full, full_like, ones, ones_like, rand, randn, zeros, zeros_like};

/// Calculates the strides for a contiguous (row-major) layout of `shape`.
pub(crate) fn contiguous_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; shape.len()];
    if shape.is_empty() {
        return strides;
    }
    strides[shape.len() - 1] = 1;
    for i in (0..shape.len() - 1).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// A typed tensor node: a shaped, strided view over a storage buffer,
/// parameterized by element type, on a given backend.
///
/// The data buffer (and the gradient buffer, when present) are shared,
/// reference-counted handles: cloning a `Variable` or erasing it into an
/// [`UntypedVariable`] aliases the same allocation. A node either is a graph
/// leaf (no producing record) or carries the shared backward-edge record of
/// the operation that produced it, together with the output slot it occupied
/// (`out_position`).
///
/// Invariants: `shape.len() == strides.len()` (the rank, fixed at
/// construction); the gradient buffer exists exactly when `requires_grad` is
/// set, has the same element count as the data buffer, and lives on the same
/// backend.
#[derive(Clone)]
pub struct Variable<T: Element> {
    pub(crate) data: Rc<RefCell<Vec<T>>>,
    pub(crate) grad: Option<Rc<RefCell<Vec<T>>>>,
    pub(crate) device: StorageDevice,
    pub(crate) shape: Vec<usize>,
    pub(crate) strides: Vec<usize>,
    pub(crate) requires_grad: bool,
    pub(crate) grad_fn: Option<Rc<RefCell<BackProp>>>,
    pub(crate) out_position: usize,
}

impl<T: Element> Variable<T> {
    /// Creates a leaf variable on the CPU from raw data with contiguous
    /// strides. Gradient tracking is disabled by default.
    pub fn new(data: Vec<T>, shape: Vec<usize>) -> Result<Self, RetrogradError> {
        let numel: usize = shape.iter().product();
        if data.len() != numel {
            return Err(RetrogradError::VariableCreationError {
                data_len: data.len(),
                shape,
            });
        }
        let strides = contiguous_strides(&shape);
        Ok(Variable {
            data: Rc::new(RefCell::new(data)),
            grad: None,
            device: StorageDevice::CPU,
            shape,
            strides,
            requires_grad: false,
            grad_fn: None,
            out_position: 0,
        })
    }

    /// Wraps existing storage into a leaf variable.
    ///
    /// When `requires_grad` is set, a gradient buffer of the same element
    /// count is eagerly allocated and zero-filled on the same backend.
    pub fn from_parts(
        requires_grad: bool,
        shape: Vec<usize>,
        strides: Vec<usize>,
        storage: Rc<RefCell<Vec<T>>>,
        device: StorageDevice,
    ) -> Result<Self, RetrogradError> {
        if strides.len() != shape.len() {
            return Err(RetrogradError::InvalidStrides { strides, shape });
        }
        let numel: usize = shape.iter().product();
        let data_len = storage.borrow().len();
        if data_len < numel {
            return Err(RetrogradError::VariableCreationError { data_len, shape });
        }
        let grad = if requires_grad {
            Some(allocate::<T>(data_len, device)?)
        } else {
            None
        };
        Ok(Variable {
            data: storage,
            grad,
            device,
            shape,
            strides,
            requires_grad,
            grad_fn: None,
            out_position: 0,
        })
    }

    // --- Accessors ---

    pub fn shape(&self) -> Vec<usize> {
        self.shape.clone()
    }

    pub fn strides(&self) -> Vec<usize> {
        self.strides.clone()
    }

    /// The rank (number of axes), fixed at construction.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn device(&self) -> StorageDevice {
        self.device
    }

    pub fn dtype(&self) -> DType {
        T::DTYPE
    }

    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// The backward-edge record that produced this node, if any.
    pub fn grad_fn(&self) -> Option<Rc<RefCell<BackProp>>> {
        self.grad_fn.clone()
    }

    /// The output slot this node occupied in its producing operation.
    pub fn out_position(&self) -> usize {
        self.out_position
    }

    /// Checks whether the elements are laid out in row-major order without
    /// gaps, considering the strides.
    pub fn is_contiguous(&self) -> bool {
        let mut current_stride = 1;
        for i in (0..self.shape.len()).rev() {
            let extent = self.shape[i];
            if extent == 0 {
                return true;
            }
            if extent != 1 {
                if self.strides[i] != current_stride {
                    return false;
                }
                current_stride *= extent;
            }
        }
        true
    }

    /// Copies the data buffer back to host-addressable memory.
    pub fn to_host(&self) -> Vec<T> {
        self.data.borrow().clone()
    }

    /// Returns the gradient as a detached leaf sharing the gradient storage,
    /// if one exists.
    pub fn grad(&self) -> Option<Variable<T>> {
        self.grad.as_ref().map(|g| Variable {
            data: Rc::clone(g),
            grad: None,
            device: self.device,
            shape: self.shape.clone(),
            strides: self.strides.clone(),
            requires_grad: false,
            grad_fn: None,
            out_position: 0,
        })
    }

    // --- Autograd bookkeeping ---

    /// Enables or disables gradient tracking.
    ///
    /// Enabling allocates and zero-fills the gradient buffer; disabling drops
    /// it, restoring the `!requires_grad => no grad storage` invariant.
    pub fn set_requires_grad(&mut self, requires_grad: bool) -> Result<(), RetrogradError> {
        if requires_grad && self.grad.is_none() {
            self.grad = Some(allocate::<T>(self.data.borrow().len(), self.device)?);
        }
        if !requires_grad {
            self.grad = None;
        }
        self.requires_grad = requires_grad;
        Ok(())
    }

    /// Zero-fills the gradient buffer in place, if one exists.
    pub fn zero_grad(&self) {
        if let Some(grad) = &self.grad {
            grad.borrow_mut().iter_mut().for_each(|x| *x = T::zero());
        }
    }

    /// Returns a detached copy with a freshly copied (not aliased) data
    /// buffer and the same shape, strides and `requires_grad` flag. The
    /// producing record is not copied; the duplicate is a graph leaf.
    pub fn duplicate(&self) -> Result<Variable<T>, RetrogradError> {
        let copied = crate::buffer::from_host(&self.data.borrow(), self.device)?;
        Variable::from_parts(
            self.requires_grad,
            self.shape.clone(),
            self.strides.clone(),
            copied,
            self.device,
        )
    }

    /// Returns a detached copy with the data transferred to the target
    /// backend. Gradient storage is not transferred; a fresh zero-filled
    /// buffer is allocated on the target when `requires_grad` is set.
    pub fn to_device(&self, target: StorageDevice) -> Result<Variable<T>, RetrogradError> {
        let transferred = crate::buffer::from_host(&self.data.borrow(), target)?;
        Variable::from_parts(
            self.requires_grad,
            self.shape.clone(),
            self.strides.clone(),
            transferred,
            target,
        )
    }

    /// Produces the type-erased projection of this node, sharing the same
    /// data and gradient storage.
    pub fn erase(&self) -> UntypedVariable {
        UntypedVariable {
            data: T::erase_storage(self.device, Rc::clone(&self.data)),
            grad: self
                .grad
                .as_ref()
                .map(|g| T::erase_storage(self.device, Rc::clone(g))),
            dtype: T::DTYPE,
            device: self.device,
            shape: self.shape.clone(),
            strides: self.strides.clone(),
            requires_grad: self.requires_grad,
            grad_fn: self.grad_fn.clone(),
            out_position: self.out_position,
        }
    }

    /// Initiates the backward pass from this node.
    ///
    /// Delegates to the producing record's firing protocol at this node's
    /// output slot. A no-op on leaves (no producing record). With `gradient`
    /// absent, the record must expect exactly one gradient slot (the scalar
    /// loss convention) and an implicit unit gradient is used.
    pub fn backward(&self, gradient: Option<&Variable<T>>) -> Result<(), RetrogradError> {
        let record = match &self.grad_fn {
            Some(record) => Rc::clone(record),
            None => {
                log::trace!("backward called on a leaf variable; nothing to do");
                return Ok(());
            }
        };

        let erased = match gradient {
            Some(g) => {
                if g.shape != self.shape {
                    return Err(RetrogradError::ShapeMismatch {
                        expected: self.shape.clone(),
                        actual: g.shape.clone(),
                        operation: "backward".to_string(),
                    });
                }
                if g.device != self.device {
                    return Err(RetrogradError::DeviceMismatch {
                        expected: self.device,
                        actual: g.device,
                        operation: "backward".to_string(),
                    });
                }
                g.erase()
            }
            None => {
                let expected = record.borrow().expected();
                if expected != 1 {
                    return Err(RetrogradError::ImplicitGradientArity { expected });
                }
                ones_like(self)?.erase()
            }
        };

        crate::autograd::run_backward(&record, erased, self.out_position)
    }
}

impl<T: Element> fmt::Debug for Variable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variable")
            .field("shape", &self.shape)
            .field("strides", &self.strides)
            .field("device", &self.device)
            .field("dtype", &T::DTYPE)
            .field("requires_grad", &self.requires_grad)
            .field("grad_defined", &self.grad.is_some())
            .field("grad_fn_defined", &self.grad_fn.is_some())
            .finish()
    }
}
