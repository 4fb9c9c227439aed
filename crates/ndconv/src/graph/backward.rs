//! Backward pass execution over one graph.

use super::GraphId;
use super::gradients::Gradients;
use super::node::{NodeId, OpNode};
use crate::array::Array;
use crate::error::TensorError;
use crate::routines::add;
use log::{debug, trace};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

/// Whether the gradients computed by a backward pass stay differentiable
/// in the graph being walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DoubleBackpropOption {
    /// Gradients are constants in the walked graph (default).
    #[default]
    Disable,
    /// Gradients are recorded in the walked graph and can be differentiated again.
    Enable,
}

/// Execute backward pass from `output` in `graph_id`, seeded with ones.
///
/// Returns the gradients of the leaf arrays reached from `output`. Each
/// call starts from zero.
///
/// # Errors
///
/// Returns error if:
/// - `output` is not tracked in `graph_id`
/// - a backward function fails or returns a gradient of the wrong shape
///
/// # Example
///
/// ```
/// use ndconv::{Array, DoubleBackpropOption, Dtype, GraphId, NativeDevice, backward, conv};
///
/// let device = NativeDevice::shared();
/// let g = GraphId::default();
/// let x = Array::ones(&[1, 1, 5], Dtype::Float64, &device).unwrap().require_grad(&g).unwrap();
/// let w = Array::ones(&[1, 1, 3], Dtype::Float64, &device).unwrap();
///
/// let y = conv(&x, &w, None, &[1], &[0], false).unwrap();
/// let grads = backward(&y, &g, DoubleBackpropOption::Disable).unwrap();
///
/// assert_eq!(grads.get(&x).unwrap().data(), &[1.0, 2.0, 3.0, 2.0, 1.0]);
/// ```
pub fn backward(
    output: &Array,
    graph_id: &GraphId,
    double_backprop: DoubleBackpropOption,
) -> Result<Gradients, TensorError> {
    let seed = Array::ones(output.shape(), output.dtype(), output.device())?;
    backward_with_seed(output, graph_id, &seed, double_backprop)
}

/// Execute backward pass from `output` in `graph_id` with output gradient `seed`.
///
/// A tracked `seed` makes the returned gradients differentiable with
/// respect to it when double backprop is enabled.
///
/// # Errors
///
/// Returns error if:
/// - `output` is not tracked in `graph_id`
/// - `seed` does not have the shape of `output`
/// - a backward function fails or returns a gradient of the wrong shape
pub fn backward_with_seed(
    output: &Array,
    graph_id: &GraphId,
    seed: &Array,
    double_backprop: DoubleBackpropOption,
) -> Result<Gradients, TensorError> {
    let output_node = output.node(graph_id).ok_or_else(|| TensorError::NotInGraph {
        graph: graph_id.clone(),
    })?;
    if seed.shape() != output.shape() {
        return Err(TensorError::OperandShapeMismatch {
            lhs: output.shape().to_vec(),
            rhs: seed.shape().to_vec(),
        });
    }

    let graph_ids_to_stop_gradient = match double_backprop {
        DoubleBackpropOption::Disable => vec![graph_id.clone()],
        DoubleBackpropOption::Enable => Vec::new(),
    };
    let seed = seed.as_constant(&graph_ids_to_stop_gradient);

    let mut leaf_grads = Gradients::new(graph_id.clone());
    let Some(creator) = output_node.creator() else {
        leaf_grads.accumulate(output_node.id(), seed)?;
        return Ok(leaf_grads);
    };

    let order = topological_sort(creator)?;
    debug!(
        "backward in graph {graph_id}: {} op nodes, double backprop {:?}",
        order.len(),
        double_backprop
    );

    // Gradients of intermediate nodes, dropped once consumed
    let mut grads: HashMap<NodeId, Array> = HashMap::new();
    grads.insert(output_node.id(), seed);

    // Consumers come before producers
    for op_node in order.iter().rev() {
        let grad_output = match grads.remove(&op_node.output_id()) {
            Some(g) => g,
            None => continue,
        };
        trace!("backward through {} ({:?})", op_node.name(), op_node.id());

        for edge in op_node.edges() {
            let next_node = edge.next_node();
            let grad_input = edge
                .backward_function()
                .backward(&grad_output, &graph_ids_to_stop_gradient)?
                .as_constant(&graph_ids_to_stop_gradient);

            if grad_input.shape() != next_node.shape() {
                return Err(TensorError::GradientShapeMismatch {
                    op: op_node.name().to_string(),
                    expected: next_node.shape().to_vec(),
                    actual: grad_input.shape().to_vec(),
                });
            }

            if next_node.is_leaf() {
                leaf_grads.accumulate(next_node.id(), grad_input)?;
            } else {
                match grads.entry(next_node.id()) {
                    Entry::Occupied(mut e) => {
                        let total = add(e.get(), &grad_input)?;
                        e.insert(total);
                    }
                    Entry::Vacant(e) => {
                        e.insert(grad_input);
                    }
                }
            }
        }
    }

    Ok(leaf_grads)
}

/// Collect the op nodes reachable from `start` and sort them so that each
/// producer comes before all of its consumers.
fn topological_sort(start: &Rc<OpNode>) -> Result<Vec<Rc<OpNode>>, TensorError> {
    let mut reachable: HashMap<NodeId, Rc<OpNode>> = HashMap::new();
    let mut queue = VecDeque::new();
    queue.push_back(Rc::clone(start));

    // BFS to find all reachable op nodes
    while let Some(op_node) = queue.pop_front() {
        if reachable.contains_key(&op_node.id()) {
            continue;
        }
        for edge in op_node.edges() {
            if let Some(creator) = edge.next_node().creator() {
                if !reachable.contains_key(&creator.id()) {
                    queue.push_back(Rc::clone(creator));
                }
            }
        }
        reachable.insert(op_node.id(), op_node);
    }

    let mut graph: DiGraph<NodeId, ()> = DiGraph::new();
    let mut node_to_idx: HashMap<NodeId, NodeIndex> = HashMap::new();
    for &id in reachable.keys() {
        node_to_idx.insert(id, graph.add_node(id));
    }

    // Edges from producers to consumers
    for (id, op_node) in reachable.iter() {
        let consumer = node_to_idx[id];
        for edge in op_node.edges() {
            if let Some(creator) = edge.next_node().creator() {
                graph.add_edge(node_to_idx[&creator.id()], consumer, ());
            }
        }
    }

    let order = toposort(&graph, None).map_err(|_| {
        TensorError::InvalidOperation("computation graph contains a cycle".to_string())
    })?;

    Ok(order
        .into_iter()
        .map(|idx| Rc::clone(&reachable[&graph[idx]]))
        .collect())
}
