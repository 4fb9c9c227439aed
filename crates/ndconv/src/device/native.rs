//! Native (naive loop-based) device implementation.

use super::{Device, DeviceRef};
use crate::array::Array;
use crate::dtype::Dtype;
use crate::error::TensorError;
use crate::routines::get_conv_out_dim;
use crate::shape::{Shape, reduced_shape, total_size};
use crate::strides::{compute_strides, linear_to_cartesian_into};
use std::rc::Rc;

/// CPU device using naive loop-based kernels.
///
/// This device is always available and serves as the reference
/// implementation. It's suitable for small arrays and for checking other
/// devices against.
#[derive(Debug, Default)]
pub struct NativeDevice;

thread_local! {
    static NATIVE: DeviceRef = Rc::new(NativeDevice);
}

impl NativeDevice {
    /// Shared handle to the native device of the current thread.
    pub fn shared() -> DeviceRef {
        NATIVE.with(Rc::clone)
    }
}

/// One multiply-add of a convolution: output position, kernel offset and
/// input position, each a linear index within its spatial block.
#[derive(Debug, Clone, Copy)]
struct Tap {
    out: usize,
    kernel: usize,
    input: usize,
}

/// Spatial geometry of a forward convolution, expanded into taps.
///
/// Positions that fall into the padding (or past the input end when the
/// output was sized with cover-all) read zero and produce no tap. All three
/// convolution kernels share this list, which makes them exact adjoints.
struct ConvGeometry {
    in_len: usize,
    out_len: usize,
    kernel_len: usize,
    taps: Vec<Tap>,
}

impl ConvGeometry {
    fn new(
        in_spatial: &[usize],
        out_spatial: &[usize],
        kernel: &[usize],
        stride: &[i64],
        pad: &[i64],
    ) -> Self {
        let ndim = in_spatial.len();
        let in_strides = compute_strides(in_spatial);
        let out_len = total_size(out_spatial);
        let kernel_len = total_size(kernel);

        let mut out_idx = vec![0; ndim];
        let mut k_idx = vec![0; ndim];
        let mut taps = Vec::with_capacity(out_len * kernel_len);

        for out in 0..out_len {
            linear_to_cartesian_into(out, out_spatial, &mut out_idx);
            'kernel: for k in 0..kernel_len {
                linear_to_cartesian_into(k, kernel, &mut k_idx);
                let mut input = 0;
                for d in 0..ndim {
                    let pos = out_idx[d] as i64 * stride[d] + k_idx[d] as i64 - pad[d];
                    if pos < 0 || pos >= in_spatial[d] as i64 {
                        continue 'kernel;
                    }
                    input += pos as usize * in_strides[d];
                }
                taps.push(Tap {
                    out,
                    kernel: k,
                    input,
                });
            }
        }

        Self {
            in_len: total_size(in_spatial),
            out_len,
            kernel_len,
            taps,
        }
    }
}

fn to_extents(dims: &[i64]) -> Vec<usize> {
    dims.iter().map(|&d| d.max(0) as usize).collect()
}

fn add_bias(out: &mut [f64], b: &Array, batch: usize, channels: usize, block: usize) {
    for n in 0..batch {
        for c in 0..channels {
            let base = (n * channels + c) * block;
            for v in &mut out[base..base + block] {
                *v += b.data()[c];
            }
        }
    }
}

fn finish(
    mut data: Vec<f64>,
    shape: &[usize],
    dtype: Dtype,
    device: &DeviceRef,
) -> Result<Array, TensorError> {
    if dtype == Dtype::Float32 {
        for v in &mut data {
            *v = dtype.cast(*v);
        }
    }
    Array::from_vec(data, shape, dtype, device)
}

fn backend_error(message: String) -> TensorError {
    TensorError::Backend {
        device: "native".to_string(),
        message,
    }
}

impl Device for NativeDevice {
    fn name(&self) -> &str {
        "native"
    }

    fn conv(
        &self,
        x: &Array,
        w: &Array,
        b: Option<&Array>,
        stride: &[i64],
        pad: &[i64],
        cover_all: bool,
    ) -> Result<Array, TensorError> {
        let (batch, in_channels) = (x.shape()[0], x.shape()[1]);
        let out_channels = w.shape()[0];
        let kernel = &w.shape()[2..];
        let out_spatial: Vec<i64> = x.shape()[2..]
            .iter()
            .zip(kernel)
            .enumerate()
            .map(|(i, (&d, &k))| get_conv_out_dim(d as i64, k as i64, stride[i], pad[i], cover_all))
            .collect();
        if out_spatial.iter().any(|&d| d <= 0) {
            return Err(backend_error(format!(
                "conv output extent {out_spatial:?} is not positive"
            )));
        }
        let out_spatial = to_extents(&out_spatial);

        let geom = ConvGeometry::new(&x.shape()[2..], &out_spatial, kernel, stride, pad);
        let (xd, wd) = (x.data(), w.data());
        let mut out = vec![0.0; batch * out_channels * geom.out_len];

        for n in 0..batch {
            for co in 0..out_channels {
                let out_base = (n * out_channels + co) * geom.out_len;
                for ci in 0..in_channels {
                    let x_base = (n * in_channels + ci) * geom.in_len;
                    let w_base = (co * in_channels + ci) * geom.kernel_len;
                    for t in &geom.taps {
                        out[out_base + t.out] += xd[x_base + t.input] * wd[w_base + t.kernel];
                    }
                }
            }
        }
        if let Some(b) = b {
            add_bias(&mut out, b, batch, out_channels, geom.out_len);
        }

        let mut shape: Shape = Shape::from_slice(&[batch, out_channels]);
        shape.extend_from_slice(&out_spatial);
        finish(out, &shape, x.dtype(), x.device())
    }

    fn conv_transpose(
        &self,
        x: &Array,
        w: &Array,
        b: Option<&Array>,
        stride: &[i64],
        pad: &[i64],
        out_size: &[i64],
    ) -> Result<Array, TensorError> {
        let (batch, in_channels) = (x.shape()[0], x.shape()[1]);
        let out_channels = w.shape()[1];
        if out_size.iter().any(|&d| d <= 0) {
            return Err(backend_error(format!(
                "conv_transpose output extent {out_size:?} is not positive"
            )));
        }
        let out_spatial = to_extents(out_size);

        // Same taps as the forward convolution mapping out_spatial onto x
        let geom = ConvGeometry::new(&out_spatial, &x.shape()[2..], &w.shape()[2..], stride, pad);
        let (xd, wd) = (x.data(), w.data());
        let mut out = vec![0.0; batch * out_channels * geom.in_len];

        for n in 0..batch {
            for ci in 0..in_channels {
                let x_base = (n * in_channels + ci) * geom.out_len;
                for co in 0..out_channels {
                    let out_base = (n * out_channels + co) * geom.in_len;
                    let w_base = (ci * out_channels + co) * geom.kernel_len;
                    for t in &geom.taps {
                        out[out_base + t.input] += xd[x_base + t.out] * wd[w_base + t.kernel];
                    }
                }
            }
        }
        if let Some(b) = b {
            add_bias(&mut out, b, batch, out_channels, geom.in_len);
        }

        let mut shape: Shape = Shape::from_slice(&[batch, out_channels]);
        shape.extend_from_slice(&out_spatial);
        finish(out, &shape, x.dtype(), x.device())
    }

    fn conv_grad_weight(
        &self,
        w_dtype: Dtype,
        w_shape: &[usize],
        x: &Array,
        gy: &Array,
        stride: &[i64],
        pad: &[i64],
        _cover_all: bool,
    ) -> Result<Array, TensorError> {
        // The extent of gy already encodes cover_all
        let batch = x.shape()[0];
        let (out_channels, in_channels) = (w_shape[0], w_shape[1]);

        let geom = ConvGeometry::new(&x.shape()[2..], &gy.shape()[2..], &w_shape[2..], stride, pad);
        let (xd, gd) = (x.data(), gy.data());
        let mut gw = vec![0.0; out_channels * in_channels * geom.kernel_len];

        for n in 0..batch {
            for co in 0..out_channels {
                let gy_base = (n * out_channels + co) * geom.out_len;
                for ci in 0..in_channels {
                    let x_base = (n * in_channels + ci) * geom.in_len;
                    let w_base = (co * in_channels + ci) * geom.kernel_len;
                    for t in &geom.taps {
                        gw[w_base + t.kernel] += xd[x_base + t.input] * gd[gy_base + t.out];
                    }
                }
            }
        }

        finish(gw, w_shape, w_dtype, x.device())
    }

    fn sum(&self, a: &Array, axes: &[usize], keepdims: bool) -> Result<Array, TensorError> {
        let keep_shape = reduced_shape(a.shape(), axes, true);
        let keep_strides = compute_strides(&keep_shape);
        let mut out = vec![0.0; total_size(&keep_shape)];
        let mut idx = vec![0; a.ndim()];

        for (linear, &v) in a.data().iter().enumerate() {
            linear_to_cartesian_into(linear, a.shape(), &mut idx);
            let target: usize = idx
                .iter()
                .zip(keep_strides.iter())
                .enumerate()
                .filter(|(axis, _)| !axes.contains(axis))
                .map(|(_, (&i, &s))| i * s)
                .sum();
            out[target] += v;
        }

        let out_shape = reduced_shape(a.shape(), axes, keepdims);
        finish(out, &out_shape, a.dtype(), a.device())
    }

    fn broadcast_to(
        &self,
        a: &Array,
        shape: &[usize],
        axes: &[usize],
    ) -> Result<Array, TensorError> {
        let keep_shape = reduced_shape(shape, axes, true);
        if total_size(&keep_shape) != a.len() {
            return Err(backend_error(format!(
                "cannot broadcast {:?} to {shape:?} along {axes:?}",
                a.shape()
            )));
        }
        let keep_strides = compute_strides(&keep_shape);
        let mut out = vec![0.0; total_size(shape)];
        let mut idx = vec![0; shape.len()];

        for (linear, v) in out.iter_mut().enumerate() {
            linear_to_cartesian_into(linear, shape, &mut idx);
            let source: usize = idx
                .iter()
                .zip(keep_strides.iter())
                .enumerate()
                .filter(|(axis, _)| !axes.contains(axis))
                .map(|(_, (&i, &s))| i * s)
                .sum();
            *v = a.data()[source];
        }

        finish(out, shape, a.dtype(), a.device())
    }

    fn add(&self, a: &Array, b: &Array) -> Result<Array, TensorError> {
        let data = a
            .data()
            .iter()
            .zip(b.data().iter())
            .map(|(&x, &y)| x + y)
            .collect();
        finish(data, a.shape(), a.dtype(), a.device())
    }
}
