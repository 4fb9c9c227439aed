//! Recording operator calls into every graph their inputs belong to.

use super::GraphId;
use super::node::{ArrayNode, BackwardFunction, OpEdge, OpNode, next_node_id};
use crate::array::Array;
use crate::error::TensorError;
use log::debug;
use std::collections::BTreeSet;
use std::rc::Rc;

/// Record an operator call and attach the output to the graphs of its inputs.
///
/// `backward_functions[i]` is the backward function of `inputs[i]`. For every
/// graph any input is tracked in, one [`OpNode`] is created whose edges hold
/// the tracked inputs (in input order) with their backward functions; the
/// returned array is `output` with a node in each of those graphs.
///
/// Call this only after the output value has been computed.
///
/// # Errors
///
/// Returns `TensorError::InvalidOperation` if the number of backward functions
/// differs from the number of inputs, or if `output` is already tracked.
pub fn set_up_op_nodes(
    name: &'static str,
    inputs: &[&Array],
    output: Array,
    backward_functions: Vec<Rc<dyn BackwardFunction>>,
) -> Result<Array, TensorError> {
    if inputs.len() != backward_functions.len() {
        return Err(TensorError::InvalidOperation(format!(
            "{name}: {} inputs but {} backward functions",
            inputs.len(),
            backward_functions.len()
        )));
    }
    if !output.is_constant() {
        return Err(TensorError::InvalidOperation(format!(
            "{name}: output is already tracked in a graph"
        )));
    }

    let graph_ids: BTreeSet<GraphId> = inputs
        .iter()
        .flat_map(|input| input.graph_ids())
        .cloned()
        .collect();

    let mut output = output;
    for graph_id in graph_ids {
        let edges: Vec<OpEdge> = inputs
            .iter()
            .zip(backward_functions.iter())
            .enumerate()
            .filter_map(|(i, (input, backward))| {
                input
                    .node(&graph_id)
                    .map(|node| OpEdge::new(i, Rc::clone(node), Rc::clone(backward)))
            })
            .collect();

        debug!(
            "recording {name} in graph {graph_id} ({} of {} inputs tracked)",
            edges.len(),
            inputs.len()
        );

        let output_id = next_node_id();
        let op_node = OpNode::new(name, graph_id.clone(), output_id, edges);
        let node = ArrayNode::new(
            output_id,
            graph_id,
            output.shape().into(),
            output.dtype(),
            Some(Rc::new(op_node)),
        );
        output.insert_node(Rc::new(node));
    }

    Ok(output)
}
