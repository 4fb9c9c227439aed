//! Output-size arithmetic for convolution and transposed convolution.

use log::trace;

/// Output extent of a convolution along one spatial axis.
///
/// Without `cover_all`: `floor((in + 2*pad - kernel) / stride) + 1`.
/// With `cover_all` the window is allowed to run past the input end so the
/// last elements are never dropped: `floor((in + 2*pad - kernel + stride - 1) / stride) + 1`.
///
/// Division floors, so a kernel larger than the padded input yields a
/// result below 1.
///
/// # Panics
///
/// Panics if `stride` is zero. [`conv`](super::conv) rejects non-positive
/// strides before calling this.
///
/// # Examples
///
/// ```
/// use ndconv::routines::get_conv_out_dim;
///
/// assert_eq!(get_conv_out_dim(5, 3, 2, 0, false), 2);
/// assert_eq!(get_conv_out_dim(5, 3, 2, 0, true), 2);
/// assert_eq!(get_conv_out_dim(6, 3, 2, 0, true), 3);
/// ```
pub fn get_conv_out_dim(in_dim: i64, kernel_size: i64, stride: i64, pad: i64, cover_all: bool) -> i64 {
    let span = in_dim + 2 * pad - kernel_size;
    if cover_all {
        return (span + stride - 1).div_euclid(stride) + 1;
    }
    span.div_euclid(stride) + 1
}

/// Output extent of a transposed convolution along one spatial axis.
///
/// The inverse of [`get_conv_out_dim`]: applying the forward formula with
/// the same `cover_all` to the result gives back `in_dim`.
///
/// # Examples
///
/// ```
/// use ndconv::routines::{get_conv_out_dim, get_conv_transpose_out_dim};
///
/// let out = get_conv_transpose_out_dim(2, 3, 2, 0, false);
/// assert_eq!(out, 5);
/// assert_eq!(get_conv_out_dim(out, 3, 2, 0, false), 2);
/// ```
pub fn get_conv_transpose_out_dim(
    in_dim: i64,
    kernel_size: i64,
    stride: i64,
    pad: i64,
    cover_all: bool,
) -> i64 {
    if cover_all {
        return stride * (in_dim - 1) + kernel_size - stride + 1 - 2 * pad;
    }
    stride * (in_dim - 1) + kernel_size - 2 * pad
}

/// Recover the cover-all flag implied by a transposed convolution.
///
/// `in_spatial` is the spatial extent of the transposed convolution's input,
/// `out_size` the extent it produces. The call is cover-all when the plain
/// forward formula applied to `out_size` disagrees with `in_spatial` on any
/// spatial axis.
///
/// # Panics
///
/// Panics if a `stride` entry is zero, or if `out_size`, `kernel`, `stride`
/// or `pad` is shorter than `in_spatial`.
pub fn infer_cover_all(
    in_spatial: &[usize],
    out_size: &[i64],
    kernel: &[usize],
    stride: &[i64],
    pad: &[i64],
) -> bool {
    let cover_all = in_spatial.iter().enumerate().any(|(i, &in_dim)| {
        in_dim as i64 != get_conv_out_dim(out_size[i], kernel[i] as i64, stride[i], pad[i], false)
    });
    trace!("inferred cover_all={cover_all} for input {in_spatial:?} and output {out_size:?}");
    cover_all
}
