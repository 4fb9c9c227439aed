//! Array - immutable tensor value with per-graph gradient tracking.

use crate::device::DeviceRef;
use crate::dtype::Dtype;
use crate::error::TensorError;
use crate::graph::{ArrayNode, GraphId, NodeId};
use crate::shape::{Shape, make_shape, total_size};
use crate::strides::{cartesian_to_linear, compute_strides};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// An n-dimensional array living on a device.
///
/// Data is stored row-major and shared between clones; no operation
/// mutates it. Graph membership is a set keyed by [`GraphId`]: an array
/// may be tracked in several graphs, and [`Array::as_constant`] removes
/// only the listed memberships.
///
/// # Example
///
/// ```
/// use ndconv::{Array, Dtype, GraphId, NativeDevice};
///
/// let device = NativeDevice::shared();
/// let g = GraphId::new("g");
///
/// let x = Array::ones(&[1, 1, 3], Dtype::Float64, &device)
///     .unwrap()
///     .require_grad(&g)
///     .unwrap();
/// assert!(x.is_grad_required(&g));
///
/// let c = x.as_constant(&[g.clone()]);
/// assert!(c.is_constant());
/// assert!(c.shares_data_with(&x));
/// ```
#[derive(Clone)]
pub struct Array {
    data: Rc<Vec<f64>>,
    shape: Shape,
    dtype: Dtype,
    device: DeviceRef,
    nodes: BTreeMap<GraphId, Rc<ArrayNode>>,
}

impl Array {
    /// Create an array from row-major data.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if data length doesn't match shape.
    pub fn from_vec(
        data: Vec<f64>,
        shape: &[usize],
        dtype: Dtype,
        device: &DeviceRef,
    ) -> Result<Self, TensorError> {
        let shape = make_shape(shape)?;
        let expected = total_size(&shape);
        if data.len() != expected {
            return Err(TensorError::ShapeMismatch {
                expected,
                actual: data.len(),
            });
        }
        let data = match dtype {
            Dtype::Float64 => data,
            Dtype::Float32 => data.into_iter().map(|v| dtype.cast(v)).collect(),
        };
        Ok(Self {
            data: Rc::new(data),
            shape,
            dtype,
            device: Rc::clone(device),
            nodes: BTreeMap::new(),
        })
    }

    /// Create an array filled with `value`.
    pub fn full(
        shape: &[usize],
        value: f64,
        dtype: Dtype,
        device: &DeviceRef,
    ) -> Result<Self, TensorError> {
        Self::from_vec(vec![value; total_size(shape)], shape, dtype, device)
    }

    /// Create a zero-initialized array.
    pub fn zeros(shape: &[usize], dtype: Dtype, device: &DeviceRef) -> Result<Self, TensorError> {
        Self::full(shape, 0.0, dtype, device)
    }

    /// Create an array filled with ones.
    pub fn ones(shape: &[usize], dtype: Dtype, device: &DeviceRef) -> Result<Self, TensorError> {
        Self::full(shape, 1.0, dtype, device)
    }

    /// Get the shape of the array.
    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Get the rank (number of dimensions).
    #[inline]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Get total number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if array has zero elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Element type.
    #[inline]
    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    /// Device holding the data.
    #[inline]
    pub fn device(&self) -> &DeviceRef {
        &self.device
    }

    /// Underlying row-major data.
    #[inline]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Get element by cartesian indices.
    ///
    /// Returns `None` if indices are out of bounds or wrong number of indices.
    pub fn get(&self, indices: &[usize]) -> Option<f64> {
        if indices.len() != self.ndim() {
            return None;
        }
        if indices.iter().zip(self.shape.iter()).any(|(&i, &d)| i >= d) {
            return None;
        }
        let linear = cartesian_to_linear(indices, &compute_strides(&self.shape));
        self.data.get(linear).copied()
    }

    /// Check if this array shares its data buffer with another.
    pub fn shares_data_with(&self, other: &Array) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }

    /// Mark this array as a leaf that requires gradient in `graph_id`.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::GradientAlreadyRequired` if the array is already
    /// tracked in that graph.
    pub fn require_grad(mut self, graph_id: &GraphId) -> Result<Self, TensorError> {
        if self.nodes.contains_key(graph_id) {
            return Err(TensorError::GradientAlreadyRequired {
                graph: graph_id.clone(),
            });
        }
        let node = ArrayNode::new(
            crate::graph::next_node_id(),
            graph_id.clone(),
            self.shape.clone(),
            self.dtype,
            None,
        );
        self.nodes.insert(graph_id.clone(), Rc::new(node));
        Ok(self)
    }

    /// Check if the array is tracked in `graph_id`.
    pub fn is_grad_required(&self, graph_id: &GraphId) -> bool {
        self.nodes.contains_key(graph_id)
    }

    /// Check if the array is tracked in no graph at all.
    pub fn is_constant(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Graphs this array is tracked in, in order.
    pub fn graph_ids(&self) -> impl Iterator<Item = &GraphId> {
        self.nodes.keys()
    }

    /// Array sharing this data with the listed graph memberships removed.
    ///
    /// Memberships in other graphs are kept.
    pub fn as_constant(&self, graph_ids: &[GraphId]) -> Array {
        let mut out = self.clone();
        for graph_id in graph_ids {
            out.nodes.remove(graph_id);
        }
        out
    }

    /// Array sharing this data with every graph membership removed.
    pub fn detach(&self) -> Array {
        let mut out = self.clone();
        out.nodes.clear();
        out
    }

    /// Node of this array in `graph_id`.
    pub fn node(&self, graph_id: &GraphId) -> Option<&Rc<ArrayNode>> {
        self.nodes.get(graph_id)
    }

    /// ID of this array's node in `graph_id`.
    pub fn node_id(&self, graph_id: &GraphId) -> Option<NodeId> {
        self.nodes.get(graph_id).map(|node| node.id())
    }

    pub(crate) fn insert_node(&mut self, node: Rc<ArrayNode>) {
        self.nodes.insert(node.graph_id().clone(), node);
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Array")
            .field("shape", &self.shape)
            .field("dtype", &self.dtype)
            .field("device", &self.device.name())
            .field("graphs", &self.nodes.keys().collect::<Vec<_>>())
            .finish()
    }
}
