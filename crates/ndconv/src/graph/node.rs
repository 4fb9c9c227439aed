//! Graph nodes and backward functions.

use super::GraphId;
use crate::array::Array;
use crate::dtype::Dtype;
use crate::error::TensorError;
use crate::shape::Shape;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// Unique identifier for an array node or op node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Get the internal index.
    pub fn index(&self) -> usize {
        self.0
    }
}

// Thread-local counter for unique node IDs
thread_local! {
    static NEXT_ID: Cell<usize> = const { Cell::new(0) };
}

pub(crate) fn next_node_id() -> NodeId {
    NEXT_ID.with(|id| {
        let current = id.get();
        id.set(current + 1);
        NodeId(current)
    })
}

/// Backward function of one operator input.
///
/// Maps the gradient of the operator output to the gradient of that input.
/// Implementations capture only what they need (shapes, parameters, other
/// operands) and never mutate it; `graph_ids_to_stop_gradient` lists the
/// graphs through which the result must not be differentiated again.
pub trait BackwardFunction {
    /// Compute the input gradient from the output gradient `gout`.
    fn backward(
        &self,
        gout: &Array,
        graph_ids_to_stop_gradient: &[GraphId],
    ) -> Result<Array, TensorError>;
}

/// Membership of an array in one graph.
pub struct ArrayNode {
    id: NodeId,
    graph_id: GraphId,
    shape: Shape,
    dtype: Dtype,
    /// Op that produced the array (None for leaf nodes).
    creator: Option<Rc<OpNode>>,
}

impl ArrayNode {
    pub(crate) fn new(
        id: NodeId,
        graph_id: GraphId,
        shape: Shape,
        dtype: Dtype,
        creator: Option<Rc<OpNode>>,
    ) -> Self {
        Self {
            id,
            graph_id,
            shape,
            dtype,
            creator,
        }
    }

    /// Get node ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Graph this node belongs to.
    pub fn graph_id(&self) -> &GraphId {
        &self.graph_id
    }

    /// Shape of the array this node tracks.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Dtype of the array this node tracks.
    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    /// Op that produced this node, if any.
    pub fn creator(&self) -> Option<&Rc<OpNode>> {
        self.creator.as_ref()
    }

    /// Check if this is a leaf node.
    pub fn is_leaf(&self) -> bool {
        self.creator.is_none()
    }
}

impl fmt::Debug for ArrayNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayNode")
            .field("id", &self.id)
            .field("graph_id", &self.graph_id)
            .field("shape", &self.shape)
            .field("dtype", &self.dtype)
            .field("creator", &self.creator.as_ref().map(|op| op.name()))
            .finish()
    }
}

/// Edge from an op node to one of its tracked inputs.
#[derive(Clone)]
pub struct OpEdge {
    input_index: usize,
    next_node: Rc<ArrayNode>,
    backward: Rc<dyn BackwardFunction>,
}

impl OpEdge {
    pub(crate) fn new(
        input_index: usize,
        next_node: Rc<ArrayNode>,
        backward: Rc<dyn BackwardFunction>,
    ) -> Self {
        Self {
            input_index,
            next_node,
            backward,
        }
    }

    /// Position of the input in the operator's input list.
    pub fn input_index(&self) -> usize {
        self.input_index
    }

    /// Array node of the input.
    pub fn next_node(&self) -> &Rc<ArrayNode> {
        &self.next_node
    }

    /// Backward function producing this input's gradient.
    pub fn backward_function(&self) -> &dyn BackwardFunction {
        self.backward.as_ref()
    }
}

impl fmt::Debug for OpEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpEdge")
            .field("input_index", &self.input_index)
            .field("next_node", &self.next_node.id())
            .finish()
    }
}

/// One operator invocation recorded in one graph.
#[derive(Debug)]
pub struct OpNode {
    id: NodeId,
    name: &'static str,
    graph_id: GraphId,
    output_id: NodeId,
    edges: Vec<OpEdge>,
}

impl OpNode {
    pub(crate) fn new(
        name: &'static str,
        graph_id: GraphId,
        output_id: NodeId,
        edges: Vec<OpEdge>,
    ) -> Self {
        Self {
            id: next_node_id(),
            name,
            graph_id,
            output_id,
            edges,
        }
    }

    /// Get node ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Operator name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Graph this op was recorded in.
    pub fn graph_id(&self) -> &GraphId {
        &self.graph_id
    }

    /// ID of the output array node.
    pub fn output_id(&self) -> NodeId {
        self.output_id
    }

    /// Edges to the inputs tracked in this graph, in input order.
    pub fn edges(&self) -> &[OpEdge] {
        &self.edges
    }
}
