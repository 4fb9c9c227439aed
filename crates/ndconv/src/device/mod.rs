//! Device abstraction for numeric kernels.
//!
//! The differentiable routines validate arguments, call one kernel of a
//! [`Device`] and record the call in the graph. Kernels receive and return
//! constant arrays; they know nothing about graphs.
//!
//! # Devices
//!
//! - `NativeDevice`: Naive loop-based reference implementation (always available)

mod native;

pub use native::NativeDevice;

use crate::array::Array;
use crate::dtype::Dtype;
use crate::error::TensorError;
use std::fmt::Debug;
use std::rc::Rc;

/// Shared handle to a device.
pub type DeviceRef = Rc<dyn Device>;

/// Kernels a device must provide.
///
/// Arrays are in batch-channel-spatial layout `[N, C, D1, ..., Dk]`.
/// Stride, padding and output-size slices have one entry per spatial
/// dimension; callers validate shapes before dispatching.
pub trait Device: Debug {
    /// Device name, used to compare devices and in error messages.
    fn name(&self) -> &str;

    /// Convolution of `x` `[N, C_in, ...]` with `w` `[C_out, C_in, k...]`.
    ///
    /// With `cover_all`, the output is extended so that trailing input
    /// elements are not dropped when the stride does not divide evenly.
    fn conv(
        &self,
        x: &Array,
        w: &Array,
        b: Option<&Array>,
        stride: &[i64],
        pad: &[i64],
        cover_all: bool,
    ) -> Result<Array, TensorError>;

    /// Transposed convolution of `x` `[N, C_in, ...]` with `w` `[C_in, C_out, k...]`
    /// producing spatial extent `out_size`.
    fn conv_transpose(
        &self,
        x: &Array,
        w: &Array,
        b: Option<&Array>,
        stride: &[i64],
        pad: &[i64],
        out_size: &[i64],
    ) -> Result<Array, TensorError>;

    /// Gradient of a convolution weight of shape `w_shape` given the input `x`
    /// and the output gradient `gy`.
    #[allow(clippy::too_many_arguments)]
    fn conv_grad_weight(
        &self,
        w_dtype: Dtype,
        w_shape: &[usize],
        x: &Array,
        gy: &Array,
        stride: &[i64],
        pad: &[i64],
        cover_all: bool,
    ) -> Result<Array, TensorError>;

    /// Sum over `axes` (sorted, unique), keeping them as size 1 if `keepdims`.
    fn sum(&self, a: &Array, axes: &[usize], keepdims: bool) -> Result<Array, TensorError>;

    /// Repeat `a` along `axes` to `shape`.
    ///
    /// `a` has either the rank of `shape` with size 1 on `axes`, or `axes` removed.
    fn broadcast_to(
        &self,
        a: &Array,
        shape: &[usize],
        axes: &[usize],
    ) -> Result<Array, TensorError>;

    /// Element-wise sum of two arrays of the same shape.
    fn add(&self, a: &Array, b: &Array) -> Result<Array, TensorError>;
}
