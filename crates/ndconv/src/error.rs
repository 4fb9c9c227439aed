//! Error types for ndconv.

use crate::dtype::Dtype;
use crate::graph::GraphId;
use thiserror::Error;

/// Errors that can occur in array construction, convolution dispatch and backpropagation.
#[derive(Debug, Error)]
pub enum TensorError {
    /// Shape mismatch between data length and expected size.
    #[error("shape mismatch: expected {expected} elements, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// Two operands must have the same rank.
    #[error("expected tensor of rank {expected}, got rank {actual}")]
    RankMismatch { expected: usize, actual: usize },

    /// Convolution operands need at least one spatial dimension.
    #[error("convolution requires at least one spatial dimension, got tensor of rank {ndim}")]
    NoSpatialDimensions { ndim: usize },

    /// Rank exceeds the fixed capacity of shapes and parameter vectors.
    #[error("rank {ndim} exceeds the maximum supported rank {max}")]
    TooManyDimensions { ndim: usize, max: usize },

    /// A spatial parameter vector does not have one entry per spatial dimension.
    #[error("{name} has {actual} entries, expected one per spatial dimension ({expected})")]
    ParameterLengthMismatch {
        name: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Stride must be positive, padding non-negative.
    #[error("invalid {name} {value} for spatial axis {axis}")]
    InvalidParameter {
        name: &'static str,
        axis: usize,
        value: i64,
    },

    /// The output-size formula produced a non-positive extent.
    #[error("non-positive output dimension {dim} for spatial axis {axis}")]
    InvalidOutputDim { axis: usize, dim: i64 },

    /// The requested transposed-convolution output size does not map back onto the input.
    #[error(
        "transposed output size {out_size} on spatial axis {axis} does not map back to input size {in_size}"
    )]
    InconsistentOutputSize {
        axis: usize,
        in_size: usize,
        out_size: usize,
    },

    /// Channel count of an operand disagrees with the weight.
    #[error("channel mismatch: expected {expected} channels, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },

    /// Bias must be one-dimensional with one entry per output channel.
    #[error("bias shape mismatch: expected {expected:?}, got {actual:?}")]
    BiasShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Operand shapes of an elementwise operation disagree.
    #[error("operand shape mismatch: {lhs:?} vs {rhs:?}")]
    OperandShapeMismatch { lhs: Vec<usize>, rhs: Vec<usize> },

    /// Operands have different dtypes.
    #[error("dtype mismatch: expected {expected}, got {actual}")]
    DtypeMismatch { expected: Dtype, actual: Dtype },

    /// Operands live on different devices.
    #[error("device mismatch: expected {expected}, got {actual}")]
    DeviceMismatch { expected: String, actual: String },

    /// Axis index outside the array rank, or listed twice.
    #[error("invalid axis {axis} for tensor with {ndim} dimensions")]
    InvalidAxis { axis: usize, ndim: usize },

    /// Gradient was already required for this array in the graph.
    #[error("gradient is already required in graph {graph}")]
    GradientAlreadyRequired { graph: GraphId },

    /// The array does not belong to the graph.
    #[error("array is not tracked in graph {graph}")]
    NotInGraph { graph: GraphId },

    /// A backward function returned a gradient with the wrong shape.
    #[error("gradient shape mismatch in op {op}: expected {expected:?}, got {actual:?}")]
    GradientShapeMismatch {
        op: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Failure reported by a device backend, passed through unchanged.
    #[error("{device} backend error: {message}")]
    Backend { device: String, message: String },

    /// Operation not valid in the current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}
