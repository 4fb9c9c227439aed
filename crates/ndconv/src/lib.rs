//! ndconv - differentiable N-dimensional convolution
//!
//! This crate provides convolution and transposed convolution over arrays
//! in batch-channel-spatial layout, recorded into gradient graphs so that
//! gradients (and gradients of gradients) can be computed by reverse-mode
//! differentiation.
//!
//! # Architecture
//!
//! ```text
//! Level 1: Differentiable routines (routines module)
//!     → conv, conv_transpose (public), conv_grad_weight (internal)
//!     → add, sum, broadcast_to
//!
//! Level 2: Graph recording and backward pass (graph module)
//!     → set_up_op_nodes, backward, Gradients
//!
//! Level 3: Device kernels (device module)
//!     → NativeDevice (naive loops)
//! ```
//!
//! Every backward function is a call to a Level 1 routine, so the
//! gradients computed by [`backward`] are themselves recorded when double
//! backprop is enabled.
//!
//! # Example
//!
//! ```
//! use ndconv::{Array, DoubleBackpropOption, Dtype, GraphId, NativeDevice, backward, conv};
//!
//! let device = NativeDevice::shared();
//! let g = GraphId::default();
//!
//! // x: [N=1, C=1, H=4, W=4], w: [C_out=2, C_in=1, 3, 3]
//! let x = Array::ones(&[1, 1, 4, 4], Dtype::Float64, &device).unwrap().require_grad(&g).unwrap();
//! let w = Array::ones(&[2, 1, 3, 3], Dtype::Float64, &device).unwrap().require_grad(&g).unwrap();
//! let b = Array::zeros(&[2], Dtype::Float64, &device).unwrap().require_grad(&g).unwrap();
//!
//! let y = conv(&x, &w, Some(&b), &[1, 1], &[1, 1], false).unwrap();
//! assert_eq!(y.shape(), &[1, 2, 4, 4]);
//!
//! let grads = backward(&y, &g, DoubleBackpropOption::Disable).unwrap();
//! assert_eq!(grads.get(&x).unwrap().shape(), &[1, 1, 4, 4]);
//! assert_eq!(grads.get(&w).unwrap().shape(), &[2, 1, 3, 3]);
//! assert_eq!(grads.get(&b).unwrap().data(), &[16.0, 16.0]);
//! ```

pub mod array;
pub mod device;
pub mod dtype;
pub mod error;
pub mod graph;
pub mod random;
pub mod routines;
pub mod shape;
pub mod strides;

pub use array::Array;
pub use device::{Device, DeviceRef, NativeDevice};
pub use dtype::Dtype;
pub use error::TensorError;
pub use graph::{
    BackwardFunction, DoubleBackpropOption, Gradients, GraphId, backward, backward_with_seed,
};
pub use routines::{conv, conv_transpose};
pub use shape::{Axes, MAX_NDIM, Shape, StackVector};
