//! Computation graphs for reverse-mode automatic differentiation.
//!
//! An array can take part in several independent graphs at once. Each
//! membership is an [`ArrayNode`] scoped to one [`GraphId`]; every operator
//! call records one [`OpNode`] per graph its inputs belong to.
//!
//! # Architecture
//!
//! ```text
//!   Array ──nodes──► { GraphId → ArrayNode }
//!                               │ creator
//!                               ▼
//!                            OpNode ──edges──► (ArrayNode, BackwardFunction)
//! ```
//!
//! Nodes only point from outputs towards inputs and never hold gradients.
//! A backward pass returns its results in a separate [`Gradients`]
//! container, so a graph lives exactly as long as the arrays and gradients
//! that reach it.

mod backward;
mod gradients;
mod node;
mod registration;

pub use backward::{DoubleBackpropOption, backward, backward_with_seed};
pub use gradients::Gradients;
pub use node::{ArrayNode, BackwardFunction, NodeId, OpEdge, OpNode};
pub(crate) use node::next_node_id;
pub use registration::set_up_op_nodes;

use std::fmt;
use std::rc::Rc;

/// Name of one independent gradient tape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphId(Rc<str>);

impl GraphId {
    /// Create a graph id with the given name.
    pub fn new(name: &str) -> Self {
        Self(Rc::from(name))
    }

    /// Name of the graph.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl Default for GraphId {
    fn default() -> Self {
        Self::new("default")
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
