use rand::distributions::Standard;
use rand::{thread_rng, Rng};
use rand_distr::{Distribution, StandardNormal};

use crate::buffer::allocate;
use crate::error::RetrogradError;
use crate::types::Element;
use crate::variable::Variable;

/// Creates a leaf variable from raw host data with contiguous strides.
pub fn from_vec<T: Element>(
    data: Vec<T>,
    shape: Vec<usize>,
) -> Result<Variable<T>, RetrogradError> {
    Variable::new(data, shape)
}

/// Creates a CPU variable filled with zeros.
pub fn zeros<T: Element>(shape: &[usize]) -> Result<Variable<T>, RetrogradError> {
    full(shape, T::zero())
}

/// Creates a CPU variable filled with ones.
pub fn ones<T: Element>(shape: &[usize]) -> Result<Variable<T>, RetrogradError> {
    full(shape, T::one())
}

/// Creates a CPU variable filled with a specific value.
pub fn full<T: Element>(shape: &[usize], value: T) -> Result<Variable<T>, RetrogradError> {
    let numel = shape.iter().product();
    Variable::new(vec![value; numel], shape.to_vec())
}

/// Creates a zero-filled variable with the same shape, strides and backend
/// as the reference.
pub fn zeros_like<T: Element>(reference: &Variable<T>) -> Result<Variable<T>, RetrogradError> {
    full_like(reference, T::zero())
}

/// Creates a ones-filled variable with the same shape, strides and backend
/// as the reference.
pub fn ones_like<T: Element>(reference: &Variable<T>) -> Result<Variable<T>, RetrogradError> {
    full_like(reference, T::one())
}

/// Creates a variable filled with `value`, matching the reference's shape,
/// strides and backend.
pub fn full_like<T: Element>(
    reference: &Variable<T>,
    value: T,
) -> Result<Variable<T>, RetrogradError> {
    let len = reference.data.borrow().len();
    let storage = allocate::<T>(len, reference.device())?;
    storage.borrow_mut().iter_mut().for_each(|x| *x = value);
    Variable::from_parts(
        false,
        reference.shape(),
        reference.strides(),
        storage,
        reference.device(),
    )
}

/// Creates a CPU variable with elements drawn from the standard normal
/// distribution.
pub fn randn<T: Element>(shape: &[usize]) -> Result<Variable<T>, RetrogradError>
where
    StandardNormal: Distribution<T>,
{
    let mut rng = thread_rng();
    let numel: usize = shape.iter().product();
    let data: Vec<T> = (0..numel).map(|_| rng.sample(StandardNormal)).collect();
    Variable::new(data, shape.to_vec())
}

/// Creates a CPU variable with elements drawn uniformly from `[0, 1)`.
pub fn rand<T: Element>(shape: &[usize]) -> Result<Variable<T>, RetrogradError>
where
    Standard: Distribution<T>,
{
    let mut rng = thread_rng();
    let numel: usize = shape.iter().product();
    let data: Vec<T> = (0..numel).map(|_| rng.sample(Standard)).collect();
    Variable::new(data, shape.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::StorageDevice;

    #[test]
    fn test_zeros_ones_full() {
        let z = zeros::<f32>(&[2, 3]).unwrap();
        assert!(z.to_host().iter().all(|&x| x == 0.0));
        assert_eq!(z.numel(), 6);

        let o = ones::<f64>(&[4]).unwrap();
        assert!(o.to_host().iter().all(|&x| x == 1.0));

        let f = full::<f32>(&[3, 1, 2], 42.5).unwrap();
        assert!(f.to_host().iter().all(|&x| x == 42.5));
        assert_eq!(f.shape(), vec![3, 1, 2]);
    }

    #[test]
    fn test_like_constructors_follow_device() {
        let v = ones::<f32>(&[2, 2])
            .unwrap()
            .to_device(StorageDevice::GPU)
            .unwrap();
        let z = zeros_like(&v).unwrap();
        assert_eq!(z.device(), StorageDevice::GPU);
        assert_eq!(z.shape(), vec![2, 2]);
        assert!(z.to_host().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_rand_range() {
        let v = rand::<f32>(&[100]).unwrap();
        assert!(v.to_host().iter().all(|&x| (0.0..1.0).contains(&x)));
    }

    #[test]
    fn test_randn_shape() {
        let v = randn::<f64>(&[5, 5]).unwrap();
        assert_eq!(v.numel(), 25);
        // Vanishingly unlikely that 25 standard-normal draws are all equal.
        let data = v.to_host();
        assert!(data.iter().any(|&x| x != data[0]));
    }

    #[test]
    fn test_scalar_shape() {
        let s = ones::<f32>(&[]).unwrap();
        assert_eq!(s.rank(), 0);
        assert_eq!(s.numel(), 1);
        assert_eq!(s.to_host(), vec![1.0]);
    }
}
