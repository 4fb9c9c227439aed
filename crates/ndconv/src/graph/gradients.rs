//! Gradient storage returned by a backward pass.

use super::GraphId;
use super::node::NodeId;
use crate::array::Array;
use crate::error::TensorError;
use crate::routines::add;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

/// Gradients of the leaf arrays reached by one backward pass.
///
/// Gradients are keyed by the leaf's node in the walked graph. Graph nodes
/// never hold gradients, so dropping this container and the arrays releases
/// the whole graph, including graphs recorded by double backprop.
#[derive(Debug)]
pub struct Gradients {
    graph_id: GraphId,
    grads: HashMap<NodeId, Array>,
}

impl Gradients {
    /// Create an empty container for `graph_id`.
    pub fn new(graph_id: GraphId) -> Self {
        Self {
            graph_id,
            grads: HashMap::new(),
        }
    }

    /// Graph the gradients were computed in.
    pub fn graph_id(&self) -> &GraphId {
        &self.graph_id
    }

    /// Accumulate a gradient for a node.
    ///
    /// If a gradient already exists it is summed with the differentiable
    /// `add`, so totals stay recorded under double backprop.
    pub fn accumulate(&mut self, id: NodeId, grad: Array) -> Result<(), TensorError> {
        match self.grads.entry(id) {
            Entry::Occupied(mut e) => {
                let total = add(e.get(), &grad)?;
                e.insert(total);
            }
            Entry::Vacant(e) => {
                e.insert(grad);
            }
        }
        Ok(())
    }

    /// Gradient of `array`, looked up through its node in this graph.
    pub fn get(&self, array: &Array) -> Option<&Array> {
        array
            .node_id(&self.graph_id)
            .and_then(|id| self.grads.get(&id))
    }

    /// Gradient for a node.
    pub fn get_by_id(&self, id: NodeId) -> Option<&Array> {
        self.grads.get(&id)
    }

    /// Remove and return the gradient of `array`.
    pub fn remove(&mut self, array: &Array) -> Option<Array> {
        let id = array.node_id(&self.graph_id)?;
        self.grads.remove(&id)
    }

    /// Check if a gradient exists for node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.grads.contains_key(&id)
    }

    /// Number of stored gradients.
    pub fn len(&self) -> usize {
        self.grads.len()
    }

    /// Check if no gradients stored.
    pub fn is_empty(&self) -> bool {
        self.grads.is_empty()
    }

    /// Iterate over all gradients.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Array)> {
        self.grads.iter()
    }
}
