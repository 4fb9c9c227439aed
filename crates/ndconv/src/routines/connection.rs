//! Convolution, transposed convolution and the convolution weight gradient.
//!
//! The three routines are each other's derivatives:
//!
//! | routine            | d/d(first operand)  | d/d(second operand) |
//! |--------------------|---------------------|---------------------|
//! | `conv`             | `conv_transpose`    | `conv_grad_weight`  |
//! | `conv_transpose`   | `conv`              | `conv_grad_weight`  |
//! | `conv_grad_weight` | `conv_transpose`    | `conv`              |
//!
//! Bias gradients are sums over every axis but the channel axis.

use super::check_compatible;
use super::conv_dims::{get_conv_out_dim, get_conv_transpose_out_dim, infer_cover_all};
use super::math::sum;
use crate::array::Array;
use crate::dtype::Dtype;
use crate::error::TensorError;
use crate::graph::{BackwardFunction, GraphId, set_up_op_nodes};
use crate::shape::{Axes, MAX_NDIM, Shape, StackVector, spatial_dims};
use log::debug;
use std::rc::Rc;

/// Validate operand ranks and return the number of spatial dimensions.
fn check_ranks(x_shape: &[usize], w_shape: &[usize]) -> Result<usize, TensorError> {
    if x_shape.len() != w_shape.len() {
        return Err(TensorError::RankMismatch {
            expected: w_shape.len(),
            actual: x_shape.len(),
        });
    }
    if x_shape.len() < 3 {
        return Err(TensorError::NoSpatialDimensions {
            ndim: x_shape.len(),
        });
    }
    if x_shape.len() > MAX_NDIM {
        return Err(TensorError::TooManyDimensions {
            ndim: x_shape.len(),
            max: MAX_NDIM,
        });
    }
    Ok(x_shape.len() - 2)
}

fn check_spatial_params(ndim: usize, stride: &[i64], pad: &[i64]) -> Result<(), TensorError> {
    for (name, values) in [("stride", stride), ("pad", pad)] {
        if values.len() != ndim {
            return Err(TensorError::ParameterLengthMismatch {
                name,
                expected: ndim,
                actual: values.len(),
            });
        }
    }
    if let Some((axis, &value)) = stride.iter().enumerate().find(|(_, s)| **s <= 0) {
        return Err(TensorError::InvalidParameter {
            name: "stride",
            axis,
            value,
        });
    }
    if let Some((axis, &value)) = pad.iter().enumerate().find(|(_, p)| **p < 0) {
        return Err(TensorError::InvalidParameter {
            name: "pad",
            axis,
            value,
        });
    }
    Ok(())
}

fn check_channels(expected: usize, actual: usize) -> Result<(), TensorError> {
    if expected != actual {
        return Err(TensorError::ChannelMismatch { expected, actual });
    }
    Ok(())
}

fn check_bias(b: &Array, x: &Array, channels: usize) -> Result<(), TensorError> {
    if b.shape() != [channels] {
        return Err(TensorError::BiasShapeMismatch {
            expected: vec![channels],
            actual: b.shape().to_vec(),
        });
    }
    check_compatible(x, b)
}

/// Reject empty spatial axes of `x`.
///
/// The spatial shape of `x` is the output extent of the convolution pairing
/// `conv` with `conv_transpose`, so backward needs it positive.
fn check_spatial_extent(x_spatial: &[usize]) -> Result<(), TensorError> {
    if let Some(axis) = x_spatial.iter().position(|&d| d < 1) {
        return Err(TensorError::InvalidOutputDim { axis, dim: 0 });
    }
    Ok(())
}

/// Spatial output extent of a convolution, rejecting non-positive sizes.
fn conv_out_spatial(
    in_spatial: &[usize],
    kernel: &[usize],
    stride: &[i64],
    pad: &[i64],
    cover_all: bool,
) -> Result<StackVector, TensorError> {
    in_spatial
        .iter()
        .zip(kernel)
        .enumerate()
        .map(|(axis, (&d, &k))| {
            let dim = get_conv_out_dim(d as i64, k as i64, stride[axis], pad[axis], cover_all);
            if dim < 1 {
                return Err(TensorError::InvalidOutputDim { axis, dim });
            }
            Ok(dim)
        })
        .collect()
}

/// N-dimensional convolution.
///
/// `x` is `[N, C_in, D1, ..., Dk]`, `w` is `[C_out, C_in, K1, ..., Kk]` and
/// the optional bias `b` is `[C_out]`. `stride` and `pad` have one entry per
/// spatial dimension. The result is `[N, C_out, O1, ..., Ok]` with each `Oi`
/// given by [`get_conv_out_dim`](super::get_conv_out_dim).
///
/// The output is recorded in every graph `x`, `w` or `b` is tracked in.
///
/// # Errors
///
/// Returns error if:
/// - ranks of `x` and `w` differ or there is no spatial dimension
/// - `stride` or `pad` has the wrong length, a stride is not positive or a padding is negative
/// - channel counts or bias shape disagree with `w`
/// - dtypes or devices differ
/// - `x` has an empty spatial axis or an output dimension would be smaller than 1
///
/// # Example
///
/// ```
/// use ndconv::{Array, Dtype, NativeDevice, conv};
///
/// let device = NativeDevice::shared();
/// let x = Array::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0], &[1, 1, 5], Dtype::Float64, &device).unwrap();
/// let w = Array::from_vec(vec![1.0, 0.0, -1.0], &[1, 1, 3], Dtype::Float64, &device).unwrap();
///
/// let y = conv(&x, &w, None, &[2], &[0], false).unwrap();
/// assert_eq!(y.shape(), &[1, 1, 2]);
/// assert_eq!(y.data(), &[-2.0, -2.0]);
/// ```
pub fn conv(
    x: &Array,
    w: &Array,
    b: Option<&Array>,
    stride: &[i64],
    pad: &[i64],
    cover_all: bool,
) -> Result<Array, TensorError> {
    let ndim = check_ranks(x.shape(), w.shape())?;
    check_spatial_params(ndim, stride, pad)?;
    check_compatible(x, w)?;
    check_channels(w.shape()[1], x.shape()[1])?;
    if let Some(b) = b {
        check_bias(b, x, w.shape()[0])?;
    }
    check_spatial_extent(&x.shape()[2..])?;
    conv_out_spatial(&x.shape()[2..], &w.shape()[2..], stride, pad, cover_all)?;

    debug!(
        "conv: x {:?}, w {:?}, bias {}, stride {stride:?}, pad {pad:?}, cover_all={cover_all}",
        x.shape(),
        w.shape(),
        b.is_some()
    );

    let bias = b.map(Array::detach);
    let out = x
        .device()
        .conv(&x.detach(), &w.detach(), bias.as_ref(), stride, pad, cover_all)?;

    let stride = StackVector::from_slice(stride);
    let pad = StackVector::from_slice(pad);
    let mut inputs = vec![x, w];
    let mut backward_functions: Vec<Rc<dyn BackwardFunction>> = vec![
        Rc::new(ConvInputBackward {
            w: w.clone(),
            x_spatial: spatial_dims(x.shape()),
            stride: stride.clone(),
            pad: pad.clone(),
        }),
        Rc::new(ConvWeightBackward {
            w_dtype: w.dtype(),
            w_shape: w.shape().into(),
            x: x.clone(),
            stride,
            pad,
            cover_all,
        }),
    ];
    if let Some(b) = b {
        inputs.push(b);
        backward_functions.push(Rc::new(BiasBackward));
    }

    set_up_op_nodes("conv", &inputs, out, backward_functions)
}

/// N-dimensional transposed convolution.
///
/// `x` is `[N, C_in, D1, ..., Dk]`, `w` is `[C_in, C_out, K1, ..., Kk]` and
/// the optional bias `b` is `[C_out]`. The result is
/// `[N, C_out, out_size...]`. Without `out_size` each extent is
/// [`get_conv_transpose_out_dim`](super::get_conv_transpose_out_dim) with
/// cover-all off.
///
/// Whether the convolution mapping the result back onto `x` is cover-all is
/// inferred from the shapes; the backward functions use that flag.
///
/// # Errors
///
/// Same conditions as [`conv`], with the channel check against `w[0]` and the
/// bias check against `w[1]`, plus:
/// - `x` has an empty spatial axis or `out_size` has a non-positive entry
/// - `out_size` has the wrong length
/// - no convolution of `out_size` gives back the spatial shape of `x`
///
/// # Example
///
/// ```
/// use ndconv::{Array, Dtype, NativeDevice, conv_transpose};
///
/// let device = NativeDevice::shared();
/// let x = Array::ones(&[1, 1, 2], Dtype::Float64, &device).unwrap();
/// let w = Array::ones(&[1, 1, 3], Dtype::Float64, &device).unwrap();
///
/// let y = conv_transpose(&x, &w, None, &[2], &[0], None).unwrap();
/// assert_eq!(y.shape(), &[1, 1, 5]);
/// assert_eq!(y.data(), &[1.0, 1.0, 2.0, 1.0, 1.0]);
/// ```
pub fn conv_transpose(
    x: &Array,
    w: &Array,
    b: Option<&Array>,
    stride: &[i64],
    pad: &[i64],
    out_size: Option<&[i64]>,
) -> Result<Array, TensorError> {
    let ndim = check_ranks(x.shape(), w.shape())?;
    check_spatial_params(ndim, stride, pad)?;
    check_compatible(x, w)?;
    check_channels(w.shape()[0], x.shape()[1])?;
    if let Some(b) = b {
        check_bias(b, x, w.shape()[1])?;
    }

    let in_spatial = &x.shape()[2..];
    check_spatial_extent(in_spatial)?;
    let kernel = &w.shape()[2..];
    let out_size: StackVector = match out_size {
        Some(out_size) => {
            if out_size.len() != ndim {
                return Err(TensorError::ParameterLengthMismatch {
                    name: "out_size",
                    expected: ndim,
                    actual: out_size.len(),
                });
            }
            StackVector::from_slice(out_size)
        }
        None => in_spatial
            .iter()
            .zip(kernel)
            .enumerate()
            .map(|(i, (&d, &k))| {
                get_conv_transpose_out_dim(d as i64, k as i64, stride[i], pad[i], false)
            })
            .collect(),
    };
    if let Some((axis, &dim)) = out_size.iter().enumerate().find(|(_, d)| **d < 1) {
        return Err(TensorError::InvalidOutputDim { axis, dim });
    }

    let cover_all = infer_cover_all(in_spatial, &out_size, kernel, stride, pad);
    for (axis, &in_size) in in_spatial.iter().enumerate() {
        let mapped = get_conv_out_dim(
            out_size[axis],
            kernel[axis] as i64,
            stride[axis],
            pad[axis],
            cover_all,
        );
        if mapped != in_size as i64 {
            return Err(TensorError::InconsistentOutputSize {
                axis,
                in_size,
                out_size: out_size[axis] as usize,
            });
        }
    }

    debug!(
        "conv_transpose: x {:?}, w {:?}, bias {}, stride {stride:?}, pad {pad:?}, out_size {out_size:?}, cover_all={cover_all}",
        x.shape(),
        w.shape(),
        b.is_some()
    );

    let bias = b.map(Array::detach);
    let out = x.device().conv_transpose(
        &x.detach(),
        &w.detach(),
        bias.as_ref(),
        stride,
        pad,
        &out_size,
    )?;

    let stride = StackVector::from_slice(stride);
    let pad = StackVector::from_slice(pad);
    let mut inputs = vec![x, w];
    let mut backward_functions: Vec<Rc<dyn BackwardFunction>> = vec![
        Rc::new(ConvTransposeInputBackward {
            w: w.clone(),
            stride: stride.clone(),
            pad: pad.clone(),
            cover_all,
        }),
        Rc::new(ConvTransposeWeightBackward {
            w_dtype: w.dtype(),
            w_shape: w.shape().into(),
            x: x.clone(),
            stride,
            pad,
            cover_all,
        }),
    ];
    if let Some(b) = b {
        inputs.push(b);
        backward_functions.push(Rc::new(BiasBackward));
    }

    set_up_op_nodes("conv_transpose", &inputs, out, backward_functions)
}

/// Gradient of a convolution weight of shape `w_shape`.
///
/// `x` is the convolution input `[N, C_in, ...]` and `gy` the gradient of its
/// output `[N, C_out, ...]`. Differentiable in `x` and `gy`; only reachable
/// through the backward functions of [`conv`] and [`conv_transpose`].
#[allow(clippy::too_many_arguments)]
pub(crate) fn conv_grad_weight(
    w_dtype: Dtype,
    w_shape: &[usize],
    x: &Array,
    gy: &Array,
    stride: &[i64],
    pad: &[i64],
    cover_all: bool,
) -> Result<Array, TensorError> {
    let ndim = check_ranks(x.shape(), w_shape)?;
    if gy.ndim() != x.ndim() {
        return Err(TensorError::RankMismatch {
            expected: x.ndim(),
            actual: gy.ndim(),
        });
    }
    check_spatial_params(ndim, stride, pad)?;
    check_compatible(x, gy)?;
    check_channels(w_shape[1], x.shape()[1])?;
    check_channels(w_shape[0], gy.shape()[1])?;
    let out_spatial = conv_out_spatial(&x.shape()[2..], &w_shape[2..], stride, pad, cover_all)?;
    if gy.shape()[0] != x.shape()[0] || spatial_dims(gy.shape()) != out_spatial {
        return Err(TensorError::OperandShapeMismatch {
            lhs: x.shape().to_vec(),
            rhs: gy.shape().to_vec(),
        });
    }

    debug!(
        "conv_grad_weight: w {w_shape:?}, x {:?}, gy {:?}, stride {stride:?}, pad {pad:?}, cover_all={cover_all}",
        x.shape(),
        gy.shape()
    );

    let out = x.device().conv_grad_weight(
        w_dtype,
        w_shape,
        &x.detach(),
        &gy.detach(),
        stride,
        pad,
        cover_all,
    )?;

    let stride = StackVector::from_slice(stride);
    let pad = StackVector::from_slice(pad);
    let backward_functions: Vec<Rc<dyn BackwardFunction>> = vec![
        Rc::new(ConvGradWeightInputBackward {
            gy: gy.clone(),
            x_spatial: spatial_dims(x.shape()),
            stride: stride.clone(),
            pad: pad.clone(),
        }),
        Rc::new(ConvGradWeightGyBackward {
            x: x.clone(),
            stride,
            pad,
            cover_all,
        }),
    ];

    set_up_op_nodes("conv-grad-weight", &[x, gy], out, backward_functions)
}

/// Gradient of [`conv`] with respect to `x`.
struct ConvInputBackward {
    w: Array,
    x_spatial: StackVector,
    stride: StackVector,
    pad: StackVector,
}

impl BackwardFunction for ConvInputBackward {
    fn backward(
        &self,
        gout: &Array,
        graph_ids_to_stop_gradient: &[GraphId],
    ) -> Result<Array, TensorError> {
        conv_transpose(
            gout,
            &self.w.as_constant(graph_ids_to_stop_gradient),
            None,
            &self.stride,
            &self.pad,
            Some(self.x_spatial.as_slice()),
        )
    }
}

/// Gradient of [`conv`] with respect to `w`.
struct ConvWeightBackward {
    w_dtype: Dtype,
    w_shape: Shape,
    x: Array,
    stride: StackVector,
    pad: StackVector,
    cover_all: bool,
}

impl BackwardFunction for ConvWeightBackward {
    fn backward(
        &self,
        gout: &Array,
        graph_ids_to_stop_gradient: &[GraphId],
    ) -> Result<Array, TensorError> {
        conv_grad_weight(
            self.w_dtype,
            &self.w_shape,
            &self.x.as_constant(graph_ids_to_stop_gradient),
            gout,
            &self.stride,
            &self.pad,
            self.cover_all,
        )
    }
}

/// Gradient of a per-channel bias: the output gradient summed over every
/// axis except the channel axis.
struct BiasBackward;

impl BackwardFunction for BiasBackward {
    fn backward(&self, gout: &Array, _: &[GraphId]) -> Result<Array, TensorError> {
        let axes: Axes = (0..gout.ndim()).filter(|&axis| axis != 1).collect();
        sum(gout, &axes, false)
    }
}

/// Gradient of [`conv_transpose`] with respect to `x`.
struct ConvTransposeInputBackward {
    w: Array,
    stride: StackVector,
    pad: StackVector,
    cover_all: bool,
}

impl BackwardFunction for ConvTransposeInputBackward {
    fn backward(
        &self,
        gout: &Array,
        graph_ids_to_stop_gradient: &[GraphId],
    ) -> Result<Array, TensorError> {
        conv(
            gout,
            &self.w.as_constant(graph_ids_to_stop_gradient),
            None,
            &self.stride,
            &self.pad,
            self.cover_all,
        )
    }
}

/// Gradient of [`conv_transpose`] with respect to `w`.
///
/// The transposed convolution is a convolution from its output to its input,
/// so the output gradient takes the place of the convolution input.
struct ConvTransposeWeightBackward {
    w_dtype: Dtype,
    w_shape: Shape,
    x: Array,
    stride: StackVector,
    pad: StackVector,
    cover_all: bool,
}

impl BackwardFunction for ConvTransposeWeightBackward {
    fn backward(
        &self,
        gout: &Array,
        graph_ids_to_stop_gradient: &[GraphId],
    ) -> Result<Array, TensorError> {
        conv_grad_weight(
            self.w_dtype,
            &self.w_shape,
            gout,
            &self.x.as_constant(graph_ids_to_stop_gradient),
            &self.stride,
            &self.pad,
            self.cover_all,
        )
    }
}

/// Gradient of [`conv_grad_weight`] with respect to `x`.
struct ConvGradWeightInputBackward {
    gy: Array,
    x_spatial: StackVector,
    stride: StackVector,
    pad: StackVector,
}

impl BackwardFunction for ConvGradWeightInputBackward {
    fn backward(
        &self,
        gout: &Array,
        graph_ids_to_stop_gradient: &[GraphId],
    ) -> Result<Array, TensorError> {
        conv_transpose(
            &self.gy.as_constant(graph_ids_to_stop_gradient),
            gout,
            None,
            &self.stride,
            &self.pad,
            Some(self.x_spatial.as_slice()),
        )
    }
}

/// Gradient of [`conv_grad_weight`] with respect to `gy`.
struct ConvGradWeightGyBackward {
    x: Array,
    stride: StackVector,
    pad: StackVector,
    cover_all: bool,
}

impl BackwardFunction for ConvGradWeightGyBackward {
    fn backward(
        &self,
        gout: &Array,
        graph_ids_to_stop_gradient: &[GraphId],
    ) -> Result<Array, TensorError> {
        conv(
            &self.x.as_constant(graph_ids_to_stop_gradient),
            gout,
            None,
            &self.stride,
            &self.pad,
            self.cover_all,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceRef, NativeDevice};
    use crate::graph::{DoubleBackpropOption, backward, backward_with_seed};

    fn device() -> DeviceRef {
        NativeDevice::shared()
    }

    fn array(data: Vec<f64>, shape: &[usize]) -> Array {
        Array::from_vec(data, shape, Dtype::Float64, &device()).unwrap()
    }

    fn ones(shape: &[usize]) -> Array {
        Array::ones(shape, Dtype::Float64, &device()).unwrap()
    }

    #[test]
    fn test_conv_rank_mismatch() {
        let x = ones(&[1, 1, 4, 4]);
        let w = ones(&[1, 1, 3]);
        assert!(matches!(
            conv(&x, &w, None, &[1], &[0], false),
            Err(TensorError::RankMismatch {
                expected: 3,
                actual: 4
            })
        ));
    }

    #[test]
    fn test_conv_requires_spatial_dimension() {
        let x = ones(&[1, 1]);
        let w = ones(&[1, 1]);
        assert!(matches!(
            conv(&x, &w, None, &[], &[], false),
            Err(TensorError::NoSpatialDimensions { ndim: 2 })
        ));
    }

    #[test]
    fn test_conv_parameter_length_mismatch() {
        let x = ones(&[1, 1, 4, 4]);
        let w = ones(&[1, 1, 3, 3]);
        assert!(matches!(
            conv(&x, &w, None, &[1], &[0, 0], false),
            Err(TensorError::ParameterLengthMismatch {
                name: "stride",
                expected: 2,
                actual: 1
            })
        ));
        assert!(matches!(
            conv(&x, &w, None, &[1, 1], &[0, 0, 0], false),
            Err(TensorError::ParameterLengthMismatch { name: "pad", .. })
        ));
    }

    #[test]
    fn test_conv_invalid_parameters() {
        let x = ones(&[1, 1, 4, 4]);
        let w = ones(&[1, 1, 3, 3]);
        assert!(matches!(
            conv(&x, &w, None, &[1, 0], &[0, 0], false),
            Err(TensorError::InvalidParameter {
                name: "stride",
                axis: 1,
                value: 0
            })
        ));
        assert!(matches!(
            conv(&x, &w, None, &[1, 1], &[-1, 0], false),
            Err(TensorError::InvalidParameter { name: "pad", axis: 0, .. })
        ));
    }

    #[test]
    fn test_conv_kernel_larger_than_input() {
        let x = ones(&[1, 1, 2]);
        let w = ones(&[1, 1, 5]);
        assert!(matches!(
            conv(&x, &w, None, &[1], &[0], false),
            Err(TensorError::InvalidOutputDim { axis: 0, .. })
        ));
    }

    #[test]
    fn test_conv_rejects_empty_spatial_axis() {
        // Padding alone would give a positive output extent
        let x = ones(&[1, 1, 0]);
        let w = ones(&[1, 1, 1]);
        assert!(matches!(
            conv(&x, &w, None, &[1], &[1], false),
            Err(TensorError::InvalidOutputDim { axis: 0, dim: 0 })
        ));
    }

    #[test]
    fn test_conv_channel_and_bias_checks() {
        let x = ones(&[1, 2, 4]);
        let w = ones(&[3, 1, 3]);
        assert!(matches!(
            conv(&x, &w, None, &[1], &[0], false),
            Err(TensorError::ChannelMismatch {
                expected: 1,
                actual: 2
            })
        ));

        let w = ones(&[3, 2, 3]);
        let b = ones(&[2]);
        assert!(matches!(
            conv(&x, &w, Some(&b), &[1], &[0], false),
            Err(TensorError::BiasShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_conv_dtype_mismatch() {
        let x = ones(&[1, 1, 4]);
        let w = Array::ones(&[1, 1, 3], Dtype::Float32, &device()).unwrap();
        assert!(matches!(
            conv(&x, &w, None, &[1], &[0], false),
            Err(TensorError::DtypeMismatch { .. })
        ));
    }

    #[test]
    fn test_conv_constant_inputs_stay_constant() {
        let y = conv(&ones(&[1, 1, 4]), &ones(&[1, 1, 3]), None, &[1], &[0], false).unwrap();
        assert!(y.is_constant());
        assert_eq!(y.data(), &[3.0, 3.0]);
    }

    #[test]
    fn test_conv_records_op_node() {
        let g = GraphId::new("conv");
        let x = ones(&[1, 1, 4]);
        let w = ones(&[1, 1, 3]).require_grad(&g).unwrap();
        let b = ones(&[1]).require_grad(&g).unwrap();

        let y = conv(&x, &w, Some(&b), &[1], &[0], false).unwrap();

        let op = y.node(&g).unwrap().creator().unwrap();
        assert_eq!(op.name(), "conv");
        // x is constant, so only w and b have edges
        let indices: Vec<usize> = op.edges().iter().map(|e| e.input_index()).collect();
        assert_eq!(indices, vec![1, 2]);
    }

    #[test]
    fn test_conv_gradients_1d() {
        let g = GraphId::default();
        let x = array(vec![1.0, 2.0, 3.0, 4.0], &[1, 1, 4]).require_grad(&g).unwrap();
        let w = array(vec![1.0, 0.0, -1.0], &[1, 1, 3]).require_grad(&g).unwrap();
        let b = ones(&[1]).require_grad(&g).unwrap();

        let y = conv(&x, &w, Some(&b), &[1], &[0], false).unwrap();
        assert_eq!(y.data(), &[-1.0, -1.0]);
        let gy = array(vec![1.0, 2.0], &[1, 1, 2]);
        let grads = backward_with_seed(&y, &g, &gy, DoubleBackpropOption::Disable).unwrap();

        // gx[i] = sum_o gy[o] * w[i - o]
        assert_eq!(grads.get(&x).unwrap().data(), &[1.0, 2.0, -1.0, -2.0]);
        // gw[k] = sum_o gy[o] * x[o + k]
        assert_eq!(grads.get(&w).unwrap().data(), &[5.0, 8.0, 11.0]);
        assert_eq!(grads.get(&b).unwrap().data(), &[3.0]);
    }

    #[test]
    fn test_bias_gradient_shape() {
        let g = GraphId::new("bias");
        let x = ones(&[2, 3, 4, 4]);
        let w = ones(&[5, 3, 3, 3]);
        let b = ones(&[5]).require_grad(&g).unwrap();

        let y = conv(&x, &w, Some(&b), &[1, 1], &[1, 1], false).unwrap();
        let grads = backward(&y, &g, DoubleBackpropOption::Disable).unwrap();

        let gb = grads.get(&b).unwrap();
        assert_eq!(gb.shape(), &[5]);
        // N * H_out * W_out ones per channel
        assert!(gb.data().iter().all(|&v| v == 32.0));
    }

    #[test]
    fn test_conv_transpose_infers_out_size() {
        let x = ones(&[1, 1, 2]);
        let w = ones(&[1, 1, 3]);
        let y = conv_transpose(&x, &w, None, &[2], &[0], None).unwrap();
        assert_eq!(y.shape(), &[1, 1, 5]);
    }

    #[test]
    fn test_conv_transpose_channel_layout() {
        // w is [C_in, C_out, k]
        let x = ones(&[1, 2, 2]);
        let w = ones(&[2, 3, 2]);
        let b = array(vec![0.0, 1.0, 2.0], &[3]);
        let y = conv_transpose(&x, &w, Some(&b), &[1], &[0], None).unwrap();
        assert_eq!(y.shape(), &[1, 3, 3]);
        assert_eq!(y.get(&[0, 2, 1]), Some(4.0 + 2.0));

        let bad = ones(&[2]);
        assert!(matches!(
            conv_transpose(&x, &w, Some(&bad), &[1], &[0], None),
            Err(TensorError::BiasShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_conv_transpose_cover_all_out_size() {
        // A 6-long input under cover-all convolves to 3; transposing recovers 6
        let g = GraphId::new("cover");
        let x = ones(&[1, 1, 3]).require_grad(&g).unwrap();
        let w = ones(&[1, 1, 3]);
        let y = conv_transpose(&x, &w, None, &[2], &[0], Some(&[6])).unwrap();
        assert_eq!(y.shape(), &[1, 1, 6]);

        // Gradient wrt x goes through a cover-all convolution of length 6
        let grads = backward(&y, &g, DoubleBackpropOption::Disable).unwrap();
        assert_eq!(grads.get(&x).unwrap().data(), &[3.0, 3.0, 2.0]);
    }

    #[test]
    fn test_conv_transpose_rejects_inconsistent_out_size() {
        let x = ones(&[1, 1, 2]);
        let w = ones(&[1, 1, 3]);
        assert!(matches!(
            conv_transpose(&x, &w, None, &[2], &[0], Some(&[9])),
            Err(TensorError::InconsistentOutputSize {
                axis: 0,
                in_size: 2,
                out_size: 9
            })
        ));
        assert!(matches!(
            conv_transpose(&x, &w, None, &[2], &[0], Some(&[5, 5])),
            Err(TensorError::ParameterLengthMismatch { name: "out_size", .. })
        ));
        assert!(matches!(
            conv_transpose(&x, &w, None, &[2], &[0], Some(&[0])),
            Err(TensorError::InvalidOutputDim { axis: 0, dim: 0 })
        ));
    }

    #[test]
    fn test_conv_transpose_rejects_empty_spatial_axis() {
        // Default out_size 1 would map back to 0, but the gradient wrt x
        // would need a convolution with an empty output
        let g = GraphId::new("empty");
        let x = ones(&[1, 1, 2, 0]).require_grad(&g).unwrap();
        let w = ones(&[1, 1, 3, 3]);
        assert!(matches!(
            conv_transpose(&x, &w, None, &[2, 2], &[0, 0], None),
            Err(TensorError::InvalidOutputDim { axis: 1, dim: 0 })
        ));
        assert!(matches!(
            conv_transpose(&x, &w, None, &[2, 2], &[0, 0], Some(&[5, 1])),
            Err(TensorError::InvalidOutputDim { axis: 1, dim: 0 })
        ));
        assert!(x.node(&g).unwrap().is_leaf());
    }

    #[test]
    fn test_conv_grad_weight_checks_gy_shape() {
        let x = ones(&[1, 1, 5]);
        let gy = ones(&[1, 1, 4]);
        assert!(matches!(
            conv_grad_weight(Dtype::Float64, &[1, 1, 3], &x, &gy, &[1], &[0], false),
            Err(TensorError::OperandShapeMismatch { .. })
        ));

        let gy = ones(&[1, 1, 3]);
        let gw = conv_grad_weight(Dtype::Float64, &[1, 1, 3], &x, &gy, &[1], &[0], false).unwrap();
        assert_eq!(gw.shape(), &[1, 1, 3]);
        assert_eq!(gw.data(), &[3.0, 3.0, 3.0]);
    }

    #[test]
    fn test_conv_grad_weight_records_both_operands() {
        let g = GraphId::new("gw");
        let x = ones(&[1, 1, 5]).require_grad(&g).unwrap();
        let gy = ones(&[1, 1, 3]).require_grad(&g).unwrap();
        let gw = conv_grad_weight(Dtype::Float64, &[1, 1, 3], &x, &gy, &[1], &[0], false).unwrap();

        let op = gw.node(&g).unwrap().creator().unwrap();
        assert_eq!(op.name(), "conv-grad-weight");
        assert_eq!(op.edges().len(), 2);

        let grads = backward(&gw, &g, DoubleBackpropOption::Disable).unwrap();
        assert_eq!(grads.get(&x).unwrap().data(), &[1.0, 2.0, 3.0, 2.0, 1.0]);
        assert_eq!(grads.get(&gy).unwrap().data(), &[3.0, 3.0, 3.0]);
    }
}
