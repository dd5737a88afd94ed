use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::autograd::BackProp;
use crate::buffer::Buffer;
use crate::device::StorageDevice;
use crate::error::RetrogradError;
use crate::types::{DType, Element};
use crate::variable::Variable;

/// The type-erased projection of a [`Variable`]: the graph's edge payload.
///
/// A single backward-edge record must reference inputs and outputs of
/// differing element types, ranks and backends, which a homogeneous typed
/// structure cannot express. The erased node carries the same shared data and
/// gradient handles as the typed node it came from (shared, not copied),
/// plus runtime tags for the element type and backend so erasure is a
/// checked, reversible operation.
#[derive(Clone)]
pub struct UntypedVariable {
    pub(crate) data: Buffer,
    pub(crate) grad: Option<Buffer>,
    pub(crate) dtype: DType,
    pub(crate) device: StorageDevice,
    pub(crate) shape: Vec<usize>,
    pub(crate) strides: Vec<usize>,
    pub(crate) requires_grad: bool,
    pub(crate) grad_fn: Option<Rc<RefCell<BackProp>>>,
    pub(crate) out_position: usize,
}

impl UntypedVariable {
    pub fn shape(&self) -> Vec<usize> {
        self.shape.clone()
    }

    pub fn strides(&self) -> Vec<usize> {
        self.strides.clone()
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> StorageDevice {
        self.device
    }

    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    pub fn grad_fn(&self) -> Option<Rc<RefCell<BackProp>>> {
        self.grad_fn.clone()
    }

    pub fn out_position(&self) -> usize {
        self.out_position
    }

    /// Recovers the typed view, validating the runtime element-type tag.
    ///
    /// The returned [`Variable`] shares this node's data and gradient
    /// storage. Requesting the wrong element type fails fast with
    /// [`RetrogradError::DTypeMismatch`]; memory is never reinterpreted.
    pub fn retype<T: Element>(&self) -> Result<Variable<T>, RetrogradError> {
        if T::DTYPE != self.dtype {
            return Err(RetrogradError::DTypeMismatch {
                expected: self.dtype,
                actual: T::DTYPE,
                operation: "retype".to_string(),
            });
        }
        if self.data.device() != self.device {
            return Err(RetrogradError::DeviceMismatch {
                expected: self.device,
                actual: self.data.device(),
                operation: "retype".to_string(),
            });
        }
        let data = T::retype_storage(&self.data, "retype")?;
        let grad = match &self.grad {
            Some(buffer) => Some(T::retype_storage(buffer, "retype")?),
            None => None,
        };
        Ok(Variable {
            data,
            grad,
            device: self.device,
            shape: self.shape.clone(),
            strides: self.strides.clone(),
            requires_grad: self.requires_grad,
            grad_fn: self.grad_fn.clone(),
            out_position: self.out_position,
        })
    }

    /// Returns a detached erased node with a freshly copied data buffer on
    /// the same backend. Used when a gradient slot must be merged without
    /// mutating the originally delivered gradient's storage.
    pub(crate) fn duplicate_detached(&self) -> Result<UntypedVariable, RetrogradError> {
        Ok(UntypedVariable {
            data: self.data.transfer(self.device)?,
            grad: None,
            dtype: self.dtype,
            device: self.device,
            shape: self.shape.clone(),
            strides: self.strides.clone(),
            requires_grad: false,
            grad_fn: None,
            out_position: 0,
        })
    }

    /// Sums a gradient contribution into this node's shared gradient
    /// storage. This is where fan-out accumulates: every consumer's record
    /// adds its contribution into the same buffer.
    pub(crate) fn accumulate_grad(
        &self,
        contribution: &UntypedVariable,
    ) -> Result<(), RetrogradError> {
        if contribution.shape != self.shape {
            return Err(RetrogradError::ShapeMismatch {
                expected: self.shape.clone(),
                actual: contribution.shape.clone(),
                operation: "accumulate_grad".to_string(),
            });
        }
        let grad = self.grad.as_ref().ok_or_else(|| {
            RetrogradError::InternalError(
                "gradient storage missing on a node that requires grad".to_string(),
            )
        })?;
        match self.dtype {
            DType::F32 => sum_into::<f32>(grad, &contribution.data, "accumulate_grad"),
            DType::F64 => sum_into::<f64>(grad, &contribution.data, "accumulate_grad"),
        }
    }
}

/// Elementwise `dst += src` over the data buffers of two erased nodes.
/// Used by the slot-redelivery accumulate policy.
pub(crate) fn add_assign_data(
    dst: &UntypedVariable,
    src: &UntypedVariable,
) -> Result<(), RetrogradError> {
    if src.shape != dst.shape {
        return Err(RetrogradError::ShapeMismatch {
            expected: dst.shape.clone(),
            actual: src.shape.clone(),
            operation: "gradient slot accumulation".to_string(),
        });
    }
    match dst.dtype {
        DType::F32 => sum_into::<f32>(&dst.data, &src.data, "gradient slot accumulation"),
        DType::F64 => sum_into::<f64>(&dst.data, &src.data, "gradient slot accumulation"),
    }
}

fn sum_into<T: Element>(
    dst: &Buffer,
    src: &Buffer,
    operation: &str,
) -> Result<(), RetrogradError> {
    let dst_storage = T::retype_storage(dst, operation)?;
    let src_storage = T::retype_storage(src, operation)?;
    if Rc::ptr_eq(&dst_storage, &src_storage) {
        return Err(RetrogradError::InternalError(format!(
            "{operation}: source and destination alias the same storage"
        )));
    }
    let mut dst_data = dst_storage.borrow_mut();
    let src_data = src_storage.borrow();
    if dst_data.len() != src_data.len() {
        return Err(RetrogradError::InternalError(format!(
            "{operation}: buffer length mismatch despite shape match"
        )));
    }
    for (d, &s) in dst_data.iter_mut().zip(src_data.iter()) {
        *d += s;
    }
    Ok(())
}

impl fmt::Debug for UntypedVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UntypedVariable")
            .field("shape", &self.shape)
            .field("strides", &self.strides)
            .field("dtype", &self.dtype)
            .field("device", &self.device)
            .field("requires_grad", &self.requires_grad)
            .field("out_position", &self.out_position)
            .field("grad_defined", &self.grad.is_some())
            .field("grad_fn_defined", &self.grad_fn.is_some())
            .finish()
    }
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
    fn test_erase_retype_round_trip_shares_storage() {
        let v = leaf_with_grad(vec![1.0, 2.0, 3.0], vec![3]);
        let erased = v.erase();
        assert_eq!(erased.dtype(), DType::F32);
        assert_eq!(erased.shape(), vec![3]);
        assert_eq!(erased.rank(), 1);
        assert!(erased.requires_grad());

        let retyped = erased.retype::<f32>().unwrap();
        // Mutations through the original must be visible through the
        // recovered view: erasure aliases, it does not copy.
        v.data.borrow_mut()[0] = 7.0;
        assert_eq!(retyped.to_host(), vec![7.0, 2.0, 3.0]);
        assert!(Rc::ptr_eq(&v.data, &retyped.data));
        assert!(Rc::ptr_eq(
            v.grad.as_ref().unwrap(),
            retyped.grad.as_ref().unwrap()
        ));
    }

    #[test]
    fn test_retype_wrong_dtype_fails_fast() {
        let v = leaf_with_grad(vec![1.0], vec![1]);
        let erased = v.erase();
        match erased.retype::<f64>() {
            Err(RetrogradError::DTypeMismatch {
                expected, actual, ..
            }) => {
                assert_eq!(expected, DType::F32);
                assert_eq!(actual, DType::F64);
            }
            other => panic!("expected DTypeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_accumulate_grad_sums_contributions() {
        let v = leaf_with_grad(vec![0.0, 0.0], vec![2]);
        let erased = v.erase();

        let c1 = Variable::new(vec![1.0f32, 2.0], vec![2]).unwrap().erase();
        let c2 = Variable::new(vec![10.0f32, 20.0], vec![2]).unwrap().erase();
        erased.accumulate_grad(&c1).unwrap();
        erased.accumulate_grad(&c2).unwrap();

        assert_eq!(v.grad().unwrap().to_host(), vec![11.0, 22.0]);
    }

    #[test]
    fn test_accumulate_grad_shape_mismatch() {
        let v = leaf_with_grad(vec![0.0, 0.0], vec![2]);
        let erased = v.erase();
        let wrong = Variable::new(vec![1.0f32], vec![1]).unwrap().erase();
        assert!(matches!(
            erased.accumulate_grad(&wrong),
            Err(RetrogradError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_erase_preserves_device() {
        let v = ones_like(
            &Variable::<f32>::new(vec![1.0, 2.0], vec![2])
                .unwrap()
                .to_device(crate::device::StorageDevice::GPU)
                .unwrap(),
        )
        .unwrap();
        let erased = v.erase();
        assert_eq!(erased.device(), crate::device::StorageDevice::GPU);
        let retyped = erased.retype::<f32>().unwrap();
        assert_eq!(retyped.device(), crate::device::StorageDevice::GPU);
    }
}
