//! Differentiable routines.
//!
//! Each routine validates its arguments, computes the forward value on the
//! operands' device and records itself in every graph its inputs belong to.
//! Backward functions call back into these routines, so gradients can be
//! differentiated again.

mod connection;
mod conv_dims;
mod math;

pub use connection::{conv, conv_transpose};
pub use conv_dims::{get_conv_out_dim, get_conv_transpose_out_dim, infer_cover_all};
pub use math::{add, broadcast_to, sum};

use crate::array::Array;
use crate::error::TensorError;

/// Check that two operands can be combined in one kernel call.
pub(crate) fn check_compatible(a: &Array, b: &Array) -> Result<(), TensorError> {
    if a.dtype() != b.dtype() {
        return Err(TensorError::DtypeMismatch {
            expected: a.dtype(),
            actual: b.dtype(),
        });
    }
    if a.device().name() != b.device().name() {
        return Err(TensorError::DeviceMismatch {
            expected: a.device().name().to_string(),
            actual: b.device().name().to_string(),
        });
    }
    Ok(())
}
