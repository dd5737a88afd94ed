use std::cell::RefCell;
use std::rc::Rc;

use crate::device::StorageDevice;
use crate::error::RetrogradError;
use crate::types::{DType, Element};

/// Tagged union over storage backend and element type.
///
/// This is the variant container the type-erased side of the graph stores:
/// one enum covers every (device, dtype) combination, and each variant holds
/// the shared, interior-mutable storage handle. Cloning a `Buffer` shares the
/// underlying allocation; copying data is always explicit.
#[derive(Debug, Clone)]
pub enum Buffer {
    /// Data resides on the CPU.
    Cpu(CpuBuffer),
    /// Data resides in accelerator memory.
    Gpu(GpuBuffer),
}

/// CPU-resident buffer variants.
#[derive(Debug, Clone)]
pub enum CpuBuffer {
    F32(Rc<RefCell<Vec<f32>>>),
    F64(Rc<RefCell<Vec<f64>>>),
}

/// Accelerator-resident buffer variants.
///
/// Device memory is modeled as a host-side mirror; the tag is what matters
/// for the transfer contract, which never aliases across backends.
#[derive(Debug, Clone)]
pub enum GpuBuffer {
    F32(Rc<RefCell<Vec<f32>>>),
    F64(Rc<RefCell<Vec<f64>>>),
}

impl Buffer {
    /// The backend this buffer resides on.
    pub fn device(&self) -> StorageDevice {
        match self {
            Buffer::Cpu(_) => StorageDevice::CPU,
            Buffer::Gpu(_) => StorageDevice::GPU,
        }
    }

    /// The runtime element-type tag of this buffer.
    pub fn dtype(&self) -> DType {
        match self {
            Buffer::Cpu(CpuBuffer::F32(_)) | Buffer::Gpu(GpuBuffer::F32(_)) => DType::F32,
            Buffer::Cpu(CpuBuffer::F64(_)) | Buffer::Gpu(GpuBuffer::F64(_)) => DType::F64,
        }
    }

    /// Number of elements in the buffer.
    pub fn len(&self) -> usize {
        match self {
            Buffer::Cpu(CpuBuffer::F32(s)) | Buffer::Gpu(GpuBuffer::F32(s)) => s.borrow().len(),
            Buffer::Cpu(CpuBuffer::F64(s)) | Buffer::Gpu(GpuBuffer::F64(s)) => s.borrow().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Zero-fills the buffer in place.
    pub fn zero(&self) {
        match self {
            Buffer::Cpu(CpuBuffer::F32(s)) | Buffer::Gpu(GpuBuffer::F32(s)) => {
                s.borrow_mut().iter_mut().for_each(|x| *x = 0.0);
            }
            Buffer::Cpu(CpuBuffer::F64(s)) | Buffer::Gpu(GpuBuffer::F64(s)) => {
                s.borrow_mut().iter_mut().for_each(|x| *x = 0.0);
            }
        }
    }

    /// Copies this buffer's contents to the target backend.
    ///
    /// Transfer between backends is always an explicit copy, never an alias;
    /// same-backend transfers deep-copy as well for predictability.
    pub fn transfer(&self, target: StorageDevice) -> Result<Buffer, RetrogradError> {
        match self {
            Buffer::Cpu(CpuBuffer::F32(s)) | Buffer::Gpu(GpuBuffer::F32(s)) => {
                let copied = from_host::<f32>(&s.borrow(), target)?;
                Ok(f32::erase_storage(target, copied))
            }
            Buffer::Cpu(CpuBuffer::F64(s)) | Buffer::Gpu(GpuBuffer::F64(s)) => {
                let copied = from_host::<f64>(&s.borrow(), target)?;
                Ok(f64::erase_storage(target, copied))
            }
        }
    }
}

/// Allocates a zero-initialized storage of `n` elements on a backend.
///
/// Allocation failure surfaces as [`RetrogradError::AllocationError`] instead
/// of aborting the process.
pub fn allocate<T: Element>(
    n: usize,
    device: StorageDevice,
) -> Result<Rc<RefCell<Vec<T>>>, RetrogradError> {
    let mut data: Vec<T> = Vec::new();
    data.try_reserve_exact(n)
        .map_err(|_| RetrogradError::AllocationError {
            requested: n,
            device,
        })?;
    data.resize(n, T::zero());
    Ok(Rc::new(RefCell::new(data)))
}

/// Copies host data into a (possibly different) backend's storage.
pub fn from_host<T: Element>(
    data: &[T],
    device: StorageDevice,
) -> Result<Rc<RefCell<Vec<T>>>, RetrogradError> {
    let storage = allocate::<T>(data.len(), device)?;
    storage.borrow_mut().copy_from_slice(data);
    Ok(storage)
}

/// Copies a buffer's contents back to host-addressable memory, validating
/// the element-type tag.
pub fn to_host<T: Element>(buffer: &Buffer) -> Result<Vec<T>, RetrogradError> {
    let storage = T::retype_storage(buffer, "to_host")?;
    let out = storage.borrow().clone();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_zero_initialized() {
        let storage = allocate::<f32>(4, StorageDevice::CPU).unwrap();
        assert_eq!(*storage.borrow(), vec![0.0f32; 4]);
    }

    #[test]
    fn test_from_host_to_host_round_trip_cpu() {
        let data = vec![1.0f32, -2.5, 3.25];
        let storage = from_host(&data, StorageDevice::CPU).unwrap();
        let buffer = f32::erase_storage(StorageDevice::CPU, storage);
        assert_eq!(buffer.device(), StorageDevice::CPU);
        assert_eq!(buffer.dtype(), DType::F32);
        assert_eq!(to_host::<f32>(&buffer).unwrap(), data);
    }

    #[test]
    fn test_transfer_round_trip_is_bit_exact() {
        let data = vec![0.1f64, f64::MIN_POSITIVE, -7.75, 1e300];
        let storage = from_host(&data, StorageDevice::CPU).unwrap();
        let host = f64::erase_storage(StorageDevice::CPU, storage);

        let device = host.transfer(StorageDevice::GPU).unwrap();
        assert_eq!(device.device(), StorageDevice::GPU);
        assert_eq!(device.dtype(), DType::F64);

        let back = device.transfer(StorageDevice::CPU).unwrap();
        assert_eq!(to_host::<f64>(&back).unwrap(), data);
    }

    #[test]
    fn test_transfer_never_aliases() {
        let storage = from_host(&[1.0f32, 2.0], StorageDevice::CPU).unwrap();
        let host = f32::erase_storage(StorageDevice::CPU, Rc::clone(&storage));
        let copy = host.transfer(StorageDevice::CPU).unwrap();

        storage.borrow_mut()[0] = 42.0;
        assert_eq!(to_host::<f32>(&copy).unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_zero_fills_in_place() {
        let storage = from_host(&[5.0f32, 6.0], StorageDevice::GPU).unwrap();
        let buffer = f32::erase_storage(StorageDevice::GPU, storage);
        buffer.zero();
        assert_eq!(to_host::<f32>(&buffer).unwrap(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_to_host_wrong_dtype_fails() {
        let storage = from_host(&[1.0f32], StorageDevice::CPU).unwrap();
        let buffer = f32::erase_storage(StorageDevice::CPU, storage);
        let result = to_host::<f64>(&buffer);
        assert!(matches!(
            result,
            Err(RetrogradError::DTypeMismatch { .. })
        ));
    }
}
