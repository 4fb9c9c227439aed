//! Element-wise addition and axis reductions.

use super::check_compatible;
use crate::array::Array;
use crate::error::TensorError;
use crate::graph::{BackwardFunction, GraphId, set_up_op_nodes};
use crate::shape::{Axes, Shape, make_shape, normalize_axes, reduced_shape};
use log::trace;
use std::rc::Rc;

/// Element-wise sum of two arrays of the same shape.
///
/// # Errors
///
/// Returns error if shapes, dtypes or devices differ.
pub fn add(a: &Array, b: &Array) -> Result<Array, TensorError> {
    if a.shape() != b.shape() {
        return Err(TensorError::OperandShapeMismatch {
            lhs: a.shape().to_vec(),
            rhs: b.shape().to_vec(),
        });
    }
    check_compatible(a, b)?;
    trace!("add: {:?}", a.shape());

    let out = a.device().add(&a.detach(), &b.detach())?;
    set_up_op_nodes(
        "add",
        &[a, b],
        out,
        vec![Rc::new(AddBackward), Rc::new(AddBackward)],
    )
}

/// Sum of `a` over `axes`.
///
/// Reduced axes are dropped, or kept with size 1 when `keepdims` is set.
///
/// # Errors
///
/// Returns `TensorError::InvalidAxis` if an axis is out of range or repeated.
///
/// # Example
///
/// ```
/// use ndconv::{Array, Dtype, NativeDevice};
/// use ndconv::routines::sum;
///
/// let device = NativeDevice::shared();
/// let a = Array::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2], Dtype::Float64, &device).unwrap();
///
/// assert_eq!(sum(&a, &[0], false).unwrap().data(), &[4.0, 6.0]);
/// assert_eq!(sum(&a, &[1], true).unwrap().shape(), &[2, 1]);
/// ```
pub fn sum(a: &Array, axes: &[usize], keepdims: bool) -> Result<Array, TensorError> {
    let axes = normalize_axes(axes, a.ndim())?;
    trace!("sum: {:?} over {axes:?}, keepdims={keepdims}", a.shape());

    let out = a.device().sum(&a.detach(), &axes, keepdims)?;
    let backward = SumBackward {
        shape: a.shape().into(),
        axes,
    };
    set_up_op_nodes("sum", &[a], out, vec![Rc::new(backward)])
}

/// Repeat `a` along `axes` to `shape`.
///
/// `a` must have the shape left after reducing `axes` from `shape`, either
/// with the axes dropped or kept with size 1.
///
/// # Errors
///
/// Returns error if an axis is invalid or `a` has the wrong shape.
pub fn broadcast_to(a: &Array, shape: &[usize], axes: &[usize]) -> Result<Array, TensorError> {
    let shape = make_shape(shape)?;
    let axes = normalize_axes(axes, shape.len())?;
    let keepdims = a.ndim() == shape.len();
    let expected = reduced_shape(&shape, &axes, keepdims);
    if a.shape() != expected.as_slice() {
        return Err(TensorError::OperandShapeMismatch {
            lhs: expected.to_vec(),
            rhs: a.shape().to_vec(),
        });
    }
    trace!("broadcast_to: {:?} -> {shape:?} along {axes:?}", a.shape());

    let out = a.device().broadcast_to(&a.detach(), &shape, &axes)?;
    let backward = BroadcastBackward { axes, keepdims };
    set_up_op_nodes("broadcast_to", &[a], out, vec![Rc::new(backward)])
}

struct AddBackward;

impl BackwardFunction for AddBackward {
    fn backward(&self, gout: &Array, _: &[GraphId]) -> Result<Array, TensorError> {
        Ok(gout.clone())
    }
}

struct SumBackward {
    shape: Shape,
    axes: Axes,
}

impl BackwardFunction for SumBackward {
    fn backward(&self, gout: &Array, _: &[GraphId]) -> Result<Array, TensorError> {
        broadcast_to(gout, &self.shape, &self.axes)
    }
}

struct BroadcastBackward {
    axes: Axes,
    keepdims: bool,
}

impl BackwardFunction for BroadcastBackward {
    fn backward(&self, gout: &Array, _: &[GraphId]) -> Result<Array, TensorError> {
        sum(gout, &self.axes, self.keepdims)
    }
}
