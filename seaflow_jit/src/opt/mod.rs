//! Graph reducers.
//!
//! A reducer looks at one node at a time and either leaves it alone, updates
//! it in place, or proposes a replacement node. [`GraphReducer`] drives any
//! number of reducers over the graph in a single traversal until none of them
//! changes anything.
//!
//! Reducers get an [`Editor`] while they run. Besides graph access it lets a
//! reducer replace *other* nodes and schedule nodes for another visit.

pub mod constant_folding;
pub mod graph_reducer;

pub use constant_folding::ConstantFoldingReducer;
pub use graph_reducer::{Editor, GraphReducer, ReductionStats};

use crate::ir::node::NodeId;

// =============================================================================
// Reduction
// =============================================================================

/// Outcome of reducing one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    /// Nothing to do.
    NoChange,
    /// The node changed. Carrying the reduced node itself means an in-place
    /// update; any other id is a replacement.
    Changed(NodeId),
}

impl Reduction {
    /// Replace the reduced node with `node`.
    #[inline]
    pub fn replace(node: NodeId) -> Self {
        Reduction::Changed(node)
    }

    #[inline]
    pub fn changed(self) -> bool {
        matches!(self, Reduction::Changed(_))
    }

    #[inline]
    pub fn replacement(self) -> Option<NodeId> {
        match self {
            Reduction::Changed(node) => Some(node),
            Reduction::NoChange => None,
        }
    }
}

// =============================================================================
// Reducer
// =============================================================================

/// A pass run by [`GraphReducer`].
///
/// `reduce` must be total: anything it does not recognize is `NoChange`.
pub trait Reducer {
    /// Name used in traces and statistics.
    fn name(&self) -> &'static str;

    /// Reduce `node`. Inputs of `node` have been reduced already, except
    /// across back edges.
    fn reduce(&mut self, node: NodeId, editor: &mut Editor<'_>) -> Reduction;

    /// Called once the worklist is empty. May revisit nodes, which restarts
    /// the traversal.
    fn finalize(&mut self, _editor: &mut Editor<'_>) {}
}
