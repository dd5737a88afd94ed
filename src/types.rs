use std::cell::RefCell;
use std::fmt::Debug;
use std::iter::Sum;
use std::ops::AddAssign;
use std::rc::Rc;

use num_traits::Float;

use crate::buffer::{Buffer, CpuBuffer, GpuBuffer};
use crate::device::StorageDevice;
use crate::error::RetrogradError;

/// Runtime tag for the element type held by a buffer.
///
/// This is what makes the type-erased side of the graph checkable: re-typing
/// an erased node validates this tag before reconstructing the typed view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 32-bit floating-point type.
    F32,
    /// 64-bit floating-point type.
    F64,
}

impl DType {
    /// Size in bytes of one element of this type.
    pub fn size_of(&self) -> usize {
        match self {
            DType::F32 => std::mem::size_of::<f32>(),
            DType::F64 => std::mem::size_of::<f64>(),
        }
    }
}

/// Element types a [`crate::variable::Variable`] can be parameterized over.
///
/// Binds a concrete Rust float type to its [`DType`] tag and to the pair of
/// checked conversions in and out of the [`Buffer`] variant container.
/// Erasure wraps the shared storage handle into the matching variant;
/// re-typing validates the tag and recovers the same handle, never
/// reinterpreting memory.
pub trait Element: Float + AddAssign + Sum + Debug + Default + 'static {
    /// The runtime tag corresponding to `Self`.
    const DTYPE: DType;

    /// Wraps a typed storage handle into the device- and dtype-tagged buffer.
    fn erase_storage(device: StorageDevice, storage: Rc<RefCell<Vec<Self>>>) -> Buffer;

    /// Recovers the typed storage handle from a buffer, validating the dtype
    /// tag. `operation` names the caller for error context.
    fn retype_storage(
        buffer: &Buffer,
        operation: &str,
    ) -> Result<Rc<RefCell<Vec<Self>>>, RetrogradError>;
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;

    fn erase_storage(device: StorageDevice, storage: Rc<RefCell<Vec<f32>>>) -> Buffer {
        match device {
            StorageDevice::CPU => Buffer::Cpu(CpuBuffer::F32(storage)),
            StorageDevice::GPU => Buffer::Gpu(GpuBuffer::F32(storage)),
        }
    }

    fn retype_storage(
        buffer: &Buffer,
        operation: &str,
    ) -> Result<Rc<RefCell<Vec<f32>>>, RetrogradError> {
        match buffer {
            Buffer::Cpu(CpuBuffer::F32(storage)) | Buffer::Gpu(GpuBuffer::F32(storage)) => {
                Ok(Rc::clone(storage))
            }
            other => Err(RetrogradError::DTypeMismatch {
                expected: DType::F32,
                actual: other.dtype(),
                operation: operation.to_string(),
            }),
        }
    }
}

impl Element for f64 {
    const DTYPE: DType = DType::F64;

    fn erase_storage(device: StorageDevice, storage: Rc<RefCell<Vec<f64>>>) -> Buffer {
        match device {
            StorageDevice::CPU => Buffer::Cpu(CpuBuffer::F64(storage)),
            StorageDevice::GPU => Buffer::Gpu(GpuBuffer::F64(storage)),
        }
    }

    fn retype_storage(
        buffer: &Buffer,
        operation: &str,
    ) -> Result<Rc<RefCell<Vec<f64>>>, RetrogradError> {
        match buffer {
            Buffer::Cpu(CpuBuffer::F64(storage)) | Buffer::Gpu(GpuBuffer::F64(storage)) => {
                Ok(Rc::clone(storage))
            }
            other => Err(RetrogradError::DTypeMismatch {
                expected: DType::F64,
                actual: other.dtype(),
                operation: operation.to_string(),
            }),
        }
    }
}
