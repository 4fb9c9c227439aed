//! Random array construction.
//!
//! Used for weight initialization and for gradient checks in tests.

use rand::Rng;
use rand::distr::{Distribution, StandardUniform};
use rand_distr::StandardNormal;

use crate::array::Array;
use crate::device::DeviceRef;
use crate::dtype::Dtype;
use crate::error::TensorError;
use crate::shape::total_size;

fn sample<R: Rng, D: Distribution<f64>>(
    shape: &[usize],
    dtype: Dtype,
    device: &DeviceRef,
    distr: D,
    rng: &mut R,
) -> Result<Array, TensorError> {
    let data: Vec<f64> = distr.sample_iter(rng).take(total_size(shape)).collect();
    Array::from_vec(data, shape, dtype, device)
}

impl Array {
    /// Create an array with uniform random values in [0, 1).
    ///
    /// # Example
    ///
    /// ```
    /// use ndconv::{Array, Dtype, NativeDevice};
    ///
    /// let a = Array::random(&[2, 3], Dtype::Float64, &NativeDevice::shared()).unwrap();
    /// assert_eq!(a.shape(), &[2, 3]);
    /// assert!(a.data().iter().all(|v| (0.0..1.0).contains(v)));
    /// ```
    pub fn random(shape: &[usize], dtype: Dtype, device: &DeviceRef) -> Result<Self, TensorError> {
        Self::random_with_rng(shape, dtype, device, &mut rand::rng())
    }

    /// Create an array with uniform random values using a specific RNG.
    ///
    /// # Example
    ///
    /// ```
    /// use ndconv::{Array, Dtype, NativeDevice};
    /// use rand::SeedableRng;
    /// use rand::rngs::StdRng;
    ///
    /// let device = NativeDevice::shared();
    /// let mut rng = StdRng::seed_from_u64(42);
    /// let a1 = Array::random_with_rng(&[2, 3], Dtype::Float64, &device, &mut rng).unwrap();
    ///
    /// // Reset RNG with same seed for reproducible results
    /// let mut rng = StdRng::seed_from_u64(42);
    /// let a2 = Array::random_with_rng(&[2, 3], Dtype::Float64, &device, &mut rng).unwrap();
    ///
    /// assert_eq!(a1.data(), a2.data());
    /// ```
    pub fn random_with_rng<R: Rng>(
        shape: &[usize],
        dtype: Dtype,
        device: &DeviceRef,
        rng: &mut R,
    ) -> Result<Self, TensorError> {
        sample(shape, dtype, device, StandardUniform, rng)
    }

    /// Create an array with standard normal random values.
    pub fn randn(shape: &[usize], dtype: Dtype, device: &DeviceRef) -> Result<Self, TensorError> {
        Self::randn_with_rng(shape, dtype, device, &mut rand::rng())
    }

    /// Create an array with standard normal random values using a specific RNG.
    pub fn randn_with_rng<R: Rng>(
        shape: &[usize],
        dtype: Dtype,
        device: &DeviceRef,
        rng: &mut R,
    ) -> Result<Self, TensorError> {
        sample(shape, dtype, device, StandardNormal, rng)
    }
}
