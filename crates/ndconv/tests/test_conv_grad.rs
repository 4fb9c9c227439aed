//! Integration tests for convolution gradients.
//!
//! Analytic gradients from the backward pass are compared against central
//! differences of `f = sum(seed * y)`.

use approx::assert_relative_eq;
use ndconv::{
    Array, DeviceRef, DoubleBackpropOption, Dtype, GraphId, NativeDevice, backward,
    backward_with_seed, conv, conv_transpose,
};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Compute numerical gradient using central difference.
///
/// grad_i ≈ (f(x + eps*e_i) - f(x - eps*e_i)) / (2*eps)
fn numerical_gradient<F>(f: F, x: &[f64], eps: f64) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let mut grad = vec![0.0; x.len()];
    let mut x_plus = x.to_vec();
    let mut x_minus = x.to_vec();

    for i in 0..x.len() {
        x_plus[i] = x[i] + eps;
        x_minus[i] = x[i] - eps;
        grad[i] = (f(&x_plus) - f(&x_minus)) / (2.0 * eps);
        x_plus[i] = x[i];
        x_minus[i] = x[i];
    }
    grad
}

fn randn(shape: &[usize], device: &DeviceRef, rng: &mut StdRng) -> Array {
    Array::randn_with_rng(shape, Dtype::Float64, device, rng).unwrap()
}

fn with_data(like: &Array, data: &[f64]) -> Array {
    Array::from_vec(data.to_vec(), like.shape(), like.dtype(), like.device()).unwrap()
}

fn weighted_sum(y: &Array, seed: &Array) -> f64 {
    y.data().iter().zip(seed.data()).map(|(a, b)| a * b).sum()
}

fn assert_grad_close(analytic: &Array, numerical: &[f64]) {
    assert_eq!(analytic.len(), numerical.len());
    for (a, n) in analytic.data().iter().zip(numerical) {
        assert_relative_eq!(*a, *n, epsilon = 1e-6, max_relative = 1e-6);
    }
}

/// Check d/dx, d/dw and d/db of `sum(seed * conv(x, w, b))`.
fn check_conv_gradients(
    x_shape: &[usize],
    w_shape: &[usize],
    stride: &[i64],
    pad: &[i64],
    cover_all: bool,
    seed: u64,
) {
    init_logger();
    let device = NativeDevice::shared();
    let mut rng = StdRng::seed_from_u64(seed);
    let g = GraphId::new("conv-grad");

    let x = randn(x_shape, &device, &mut rng);
    let w = randn(w_shape, &device, &mut rng);
    let b = randn(&[w_shape[0]], &device, &mut rng);

    let xt = x.clone().require_grad(&g).unwrap();
    let wt = w.clone().require_grad(&g).unwrap();
    let bt = b.clone().require_grad(&g).unwrap();
    let y = conv(&xt, &wt, Some(&bt), stride, pad, cover_all).unwrap();
    let gy = randn(y.shape(), &device, &mut rng);
    let grads = backward_with_seed(&y, &g, &gy, DoubleBackpropOption::Disable).unwrap();

    let eps = 1e-6;
    let f = |x: &Array, w: &Array, b: &Array| {
        weighted_sum(&conv(x, w, Some(b), stride, pad, cover_all).unwrap(), &gy)
    };
    let gx = numerical_gradient(|d| f(&with_data(&x, d), &w, &b), x.data(), eps);
    let gw = numerical_gradient(|d| f(&x, &with_data(&w, d), &b), w.data(), eps);
    let gb = numerical_gradient(|d| f(&x, &w, &with_data(&b, d)), b.data(), eps);

    assert_grad_close(grads.get(&xt).unwrap(), &gx);
    assert_grad_close(grads.get(&wt).unwrap(), &gw);
    assert_grad_close(grads.get(&bt).unwrap(), &gb);
    assert_eq!(grads.get(&bt).unwrap().shape(), &[w_shape[0]]);
}

/// Check d/dx, d/dw and d/db of `sum(seed * conv_transpose(x, w, b))`.
fn check_conv_transpose_gradients(
    x_shape: &[usize],
    w_shape: &[usize],
    stride: &[i64],
    pad: &[i64],
    out_size: Option<&[i64]>,
    seed: u64,
) {
    init_logger();
    let device = NativeDevice::shared();
    let mut rng = StdRng::seed_from_u64(seed);
    let g = GraphId::new("conv-transpose-grad");

    let x = randn(x_shape, &device, &mut rng);
    let w = randn(w_shape, &device, &mut rng);
    let b = randn(&[w_shape[1]], &device, &mut rng);

    let xt = x.clone().require_grad(&g).unwrap();
    let wt = w.clone().require_grad(&g).unwrap();
    let bt = b.clone().require_grad(&g).unwrap();
    let y = conv_transpose(&xt, &wt, Some(&bt), stride, pad, out_size).unwrap();
    let gy = randn(y.shape(), &device, &mut rng);
    let grads = backward_with_seed(&y, &g, &gy, DoubleBackpropOption::Disable).unwrap();

    let eps = 1e-6;
    let f = |x: &Array, w: &Array, b: &Array| {
        weighted_sum(
            &conv_transpose(x, w, Some(b), stride, pad, out_size).unwrap(),
            &gy,
        )
    };
    let gx = numerical_gradient(|d| f(&with_data(&x, d), &w, &b), x.data(), eps);
    let gw = numerical_gradient(|d| f(&x, &with_data(&w, d), &b), w.data(), eps);
    let gb = numerical_gradient(|d| f(&x, &w, &with_data(&b, d)), b.data(), eps);

    assert_grad_close(grads.get(&xt).unwrap(), &gx);
    assert_grad_close(grads.get(&wt).unwrap(), &gw);
    assert_grad_close(grads.get(&bt).unwrap(), &gb);
}

#[test]
fn test_conv_1d_gradients() {
    check_conv_gradients(&[2, 2, 7], &[3, 2, 3], &[2], &[1], false, 1);
}

#[test]
fn test_conv_2d_gradients() {
    check_conv_gradients(&[2, 3, 5, 4], &[2, 3, 3, 2], &[2, 1], &[1, 0], false, 2);
}

#[test]
fn test_conv_2d_cover_all_gradients() {
    // 6 + 0 - 3 is odd, so cover-all adds an output row
    check_conv_gradients(&[1, 2, 6, 5], &[2, 2, 3, 3], &[2, 2], &[0, 0], true, 3);
}

#[test]
fn test_conv_3d_gradients() {
    check_conv_gradients(&[1, 1, 4, 3, 3], &[2, 1, 2, 2, 2], &[1, 1, 2], &[0, 1, 0], false, 4);
}

#[test]
fn test_conv_transpose_1d_gradients() {
    check_conv_transpose_gradients(&[2, 2, 4], &[2, 3, 3], &[2], &[1], None, 5);
}

#[test]
fn test_conv_transpose_2d_gradients() {
    check_conv_transpose_gradients(&[1, 2, 3, 3], &[2, 3, 3, 3], &[2, 2], &[1, 0], None, 6);
}

#[test]
fn test_conv_transpose_cover_all_gradients() {
    // Neither extent is reachable without cover-all
    check_conv_transpose_gradients(
        &[1, 2, 3, 3],
        &[2, 1, 3, 3],
        &[2, 2],
        &[1, 0],
        Some(&[4, 6]),
        7,
    );
}

#[test]
fn test_bias_gradient_has_channel_shape() {
    init_logger();
    let device = NativeDevice::shared();
    let mut rng = StdRng::seed_from_u64(8);
    let g = GraphId::default();

    // x: [N, C, H, W], w: [C_out, C, 3, 3], b: [C_out]
    let x = randn(&[2, 3, 5, 5], &device, &mut rng);
    let w = randn(&[4, 3, 3, 3], &device, &mut rng);
    let b = randn(&[4], &device, &mut rng).require_grad(&g).unwrap();

    let y = conv(&x, &w, Some(&b), &[1, 1], &[0, 0], false).unwrap();
    let gy = randn(y.shape(), &device, &mut rng);
    let grads = backward_with_seed(&y, &g, &gy, DoubleBackpropOption::Disable).unwrap();

    let gb = grads.get(&b).unwrap();
    assert_eq!(gb.shape(), &[4]);

    // Sum over axes {0, 2, 3}
    let per_channel = 3 * 3;
    for c in 0..4 {
        let expected: f64 = (0..2)
            .flat_map(|n| {
                let start = (n * 4 + c) * per_channel;
                gy.data()[start..start + per_channel].to_vec()
            })
            .sum();
        assert_relative_eq!(gb.data()[c], expected, epsilon = 1e-12);
    }
}

#[test]
fn test_gradients_accumulate_over_shared_input() {
    init_logger();
    let device = NativeDevice::shared();
    let mut rng = StdRng::seed_from_u64(9);
    let g = GraphId::new("shared");

    // x feeds two convolutions whose outputs are added
    let x = randn(&[1, 1, 6], &device, &mut rng).require_grad(&g).unwrap();
    let w1 = randn(&[1, 1, 3], &device, &mut rng);
    let w2 = randn(&[1, 1, 3], &device, &mut rng);

    let y1 = conv(&x, &w1, None, &[1], &[0], false).unwrap();
    let y2 = conv(&x, &w2, None, &[1], &[0], false).unwrap();
    let y = ndconv::routines::add(&y1, &y2).unwrap();
    let grads = backward(&y, &g, DoubleBackpropOption::Disable).unwrap();

    // Same as a single convolution with w1 + w2
    let w_sum = ndconv::routines::add(&w1, &w2).unwrap();
    let xs = x.detach().require_grad(&g).unwrap();
    let ys = conv(&xs, &w_sum, None, &[1], &[0], false).unwrap();
    let grads_sum = backward(&ys, &g, DoubleBackpropOption::Disable).unwrap();

    let gx = grads.get(&x).unwrap();
    let gxs = grads_sum.get(&xs).unwrap();
    for (a, b) in gx.data().iter().zip(gxs.data()) {
        assert_relative_eq!(*a, *b, epsilon = 1e-12);
    }
}
