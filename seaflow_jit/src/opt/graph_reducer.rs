//! Fixed-point graph reduction driver.
//!
//! # Algorithm
//!
//! Depth-first over input edges with an explicit stack of
//! `(node, next_input_index)` frames, so deep graphs never touch the call
//! stack:
//!
//! 1. The top frame scans its inputs from `next_input_index`, wrapping to
//!    the prefix, and pushes the first one that is unvisited (or waiting
//!    for a revisit). Inputs already on the stack are back edges and are
//!    skipped.
//! 2. Once no input needs a visit, every reducer runs on the node. An
//!    in-place change restarts the reducer list, skipping the reducer that
//!    made it; a replacement stops the list.
//! 3. Replacements are committed against the id high-water mark taken
//!    before the reduction: a pre-existing replacement takes every use and
//!    the node is killed; a fresh one only takes the uses that existed
//!    before, and is itself pushed for reduction.
//! 4. Users of a changed node that were already visited go to a revisit
//!    queue, drained once the stack is empty. When both are empty, every
//!    reducer's `finalize` runs; if that queued revisits, the loop goes on.

use std::collections::VecDeque;

use crate::ir::arena::SecondaryMap;
use crate::ir::graph::Graph;
use crate::ir::node::{Node, NodeId};

use super::{Reducer, Reduction};

// =============================================================================
// Traversal State
// =============================================================================

/// Per-node traversal mark. Ordered: `Unvisited < Revisit < OnStack < Visited`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
enum NodeState {
    #[default]
    Unvisited,
    Revisit,
    OnStack,
    Visited,
}

#[derive(Debug, Clone, Copy)]
struct StackFrame {
    node: NodeId,
    input_index: usize,
}

/// Statistics from one `reduce_graph` run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReductionStats {
    /// Reducer-list invocations (one per node visit).
    pub nodes_reduced: usize,
    /// Nodes replaced by a different node.
    pub replacements: usize,
    /// In-place updates.
    pub in_place_updates: usize,
    /// Nodes queued for another visit.
    pub revisits: usize,
    /// Times the finalizers ran.
    pub finalize_rounds: usize,
}

/// Stack, marks and revisit queue shared by the driver and the [`Editor`].
#[derive(Debug, Default)]
struct Worklist {
    state: SecondaryMap<Node, NodeState>,
    stack: Vec<StackFrame>,
    revisit: VecDeque<NodeId>,
    stats: ReductionStats,
}

impl Worklist {
    fn push(&mut self, node: NodeId) {
        debug_assert_ne!(self.state[node], NodeState::OnStack);
        self.state[node] = NodeState::OnStack;
        self.stack.push(StackFrame {
            node,
            input_index: 0,
        });
    }

    fn pop(&mut self) {
        if let Some(frame) = self.stack.pop() {
            self.state[frame.node] = NodeState::Visited;
        }
    }

    /// Push `node` unless it is on the stack, visited or dead.
    fn recurse(&mut self, graph: &Graph, node: NodeId) -> bool {
        if self.state[node] > NodeState::Revisit || graph.is_dead(node) {
            return false;
        }
        self.push(node);
        true
    }

    fn revisit(&mut self, node: NodeId) {
        if self.state[node] == NodeState::Visited {
            self.state[node] = NodeState::Revisit;
            self.revisit.push_back(node);
            self.stats.revisits += 1;
        }
    }

    /// Move the uses of `node` to `replacement`.
    ///
    /// Users with an id above `max_id` were created during the current
    /// reduction and keep pointing at `node`.
    fn replace(&mut self, graph: &mut Graph, node: NodeId, replacement: NodeId, max_id: NodeId) {
        if node == graph.start() {
            graph.set_start(replacement);
        }
        if node == graph.end() {
            graph.set_end(replacement);
        }
        self.stats.replacements += 1;
        tracing::trace!(%node, %replacement, "replace");

        if replacement <= max_id {
            let users: Vec<NodeId> = graph.users(node).collect();
            graph.replace_uses(node, replacement);
            for user in users {
                if user != node {
                    self.revisit(user);
                }
            }
            graph.kill(node);
        } else {
            let old_edges: Vec<_> = graph
                .uses(node)
                .iter()
                .copied()
                .filter(|u| u.user <= max_id)
                .collect();
            for edge in old_edges {
                graph.replace_input(edge.user, edge.index as usize, replacement);
                if edge.user != node {
                    self.revisit(edge.user);
                }
            }
            if graph.use_count(node) == 0 {
                graph.kill(node);
            }
            self.recurse(graph, replacement);
        }
    }
}

// =============================================================================
// Editor
// =============================================================================

/// What a reducer may do besides returning a [`Reduction`].
pub struct Editor<'a> {
    graph: &'a mut Graph,
    worklist: &'a mut Worklist,
}

impl Editor<'_> {
    #[inline]
    pub fn graph(&self) -> &Graph {
        self.graph
    }

    #[inline]
    pub fn graph_mut(&mut self) -> &mut Graph {
        self.graph
    }

    /// Queue an already reduced node for another visit.
    pub fn revisit(&mut self, node: NodeId) {
        self.worklist.revisit(node);
    }

    /// Replace `node` everywhere and kill it.
    pub fn replace(&mut self, node: NodeId, replacement: NodeId) {
        self.worklist
            .replace(self.graph, node, replacement, NodeId::new(u32::MAX - 1));
    }

    /// Split the uses of `node` by edge kind (see
    /// [`Graph::replace_with_value`]) and revisit every user.
    pub fn replace_with_value(
        &mut self,
        node: NodeId,
        value: NodeId,
        effect: Option<NodeId>,
        control: Option<NodeId>,
    ) {
        let users: Vec<NodeId> = self.graph.users(node).collect();
        self.graph.replace_with_value(node, value, effect, control);
        for user in users {
            self.worklist.revisit(user);
        }
    }
}

// =============================================================================
// Graph Reducer
// =============================================================================

/// Runs a list of reducers to a fixed point.
///
/// Reducers are borrowed, so callers keep them and can inspect them after
/// the run.
#[derive(Default)]
pub struct GraphReducer<'r> {
    reducers: Vec<&'r mut dyn Reducer>,
    worklist: Worklist,
}

impl<'r> GraphReducer<'r> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reducer. Reducers run in registration order.
    pub fn add_reducer(&mut self, reducer: &'r mut dyn Reducer) {
        self.reducers.push(reducer);
    }

    /// Whether no reducer is registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.reducers.is_empty()
    }

    /// Reduce everything reachable from the graph's `end`.
    pub fn reduce_graph(&mut self, graph: &mut Graph) -> ReductionStats {
        let end = graph.end();
        self.reduce_node(graph, end)
    }

    /// Reduce everything reachable from `root`.
    pub fn reduce_node(&mut self, graph: &mut Graph, root: NodeId) -> ReductionStats {
        assert!(self.worklist.stack.is_empty());
        assert!(self.worklist.revisit.is_empty());
        self.worklist.stats = ReductionStats::default();
        self.worklist.push(root);

        loop {
            if !self.worklist.stack.is_empty() {
                self.reduce_top(graph);
            } else if let Some(node) = self.worklist.revisit.pop_front() {
                if self.worklist.state[node] == NodeState::Revisit {
                    self.worklist.push(node);
                }
            } else {
                self.worklist.stats.finalize_rounds += 1;
                for reducer in self.reducers.iter_mut() {
                    let mut editor = Editor {
                        graph: &mut *graph,
                        worklist: &mut self.worklist,
                    };
                    reducer.finalize(&mut editor);
                }
                if self.worklist.revisit.is_empty() {
                    break;
                }
            }
        }

        let stats = std::mem::take(&mut self.worklist.stats);
        tracing::debug!(
            reducers = self.reducers.len(),
            nodes_reduced = stats.nodes_reduced,
            replacements = stats.replacements,
            in_place = stats.in_place_updates,
            revisits = stats.revisits,
            "graph reduction finished"
        );
        stats
    }

    /// Push the next input of the top frame, or reduce it.
    fn reduce_top(&mut self, graph: &mut Graph) {
        let Some(&StackFrame { node, input_index }) = self.worklist.stack.last() else {
            return;
        };
        if graph.is_dead(node) {
            // Killed while on the stack.
            self.worklist.pop();
            return;
        }

        let count = graph.input_count(node);
        let start = if input_index < count { input_index } else { 0 };
        if self.recurse_inputs(graph, node, (start..count).chain(0..start)) {
            return;
        }

        let max_id = graph.max_node_id();
        let reduction = self.reduce(graph, node);
        let Reduction::Changed(replacement) = reduction else {
            self.worklist.pop();
            return;
        };

        if replacement != node {
            self.worklist.pop();
            self.worklist.replace(graph, node, replacement, max_id);
            return;
        }

        // Updated in place: users that already saw the old node go again,
        // even if the node itself stays on the stack for a new input.
        let users: Vec<NodeId> = graph.users(node).collect();
        for user in users {
            if user != node {
                self.worklist.revisit(user);
            }
        }
        if !self.recurse_inputs(graph, node, 0..graph.input_count(node)) {
            self.worklist.pop();
        }
    }

    /// Push the first input of `node` (in `order`) that needs a visit and
    /// record where to resume.
    fn recurse_inputs(
        &mut self,
        graph: &Graph,
        node: NodeId,
        order: impl Iterator<Item = usize>,
    ) -> bool {
        for i in order {
            let input = graph.input(node, i);
            if input != node && self.worklist.recurse(graph, input) {
                // The frame of `node` sits just below the pushed input.
                let depth = self.worklist.stack.len();
                self.worklist.stack[depth - 2].input_index = i + 1;
                return true;
            }
        }
        false
    }

    /// Run the reducer list on one node.
    fn reduce(&mut self, graph: &mut Graph, node: NodeId) -> Reduction {
        self.worklist.stats.nodes_reduced += 1;
        let mut skip: Option<usize> = None;
        let mut i = 0;
        while i < self.reducers.len() {
            if skip != Some(i) {
                let mut editor = Editor {
                    graph: &mut *graph,
                    worklist: &mut self.worklist,
                };
                match self.reducers[i].reduce(node, &mut editor) {
                    Reduction::NoChange => {}
                    Reduction::Changed(replacement) if replacement == node => {
                        // Other reducers may apply now.
                        self.worklist.stats.in_place_updates += 1;
                        tracing::trace!(%node, reducer = self.reducers[i].name(), "in-place update");
                        skip = Some(i);
                        i = 0;
                        continue;
                    }
                    changed => {
                        tracing::trace!(%node, reducer = self.reducers[i].name(), "reduced");
                        return changed;
                    }
                }
            }
            i += 1;
        }
        match skip {
            Some(_) => Reduction::Changed(node),
            None => Reduction::NoChange,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::operators::{BranchHint, Opcode};
    use crate::ir::types::NodeType;

    /// Records the order in which nodes are reduced.
    #[derive(Default)]
    struct Recorder {
        order: Vec<NodeId>,
    }

    impl Reducer for Recorder {
        fn name(&self) -> &'static str {
            "Recorder"
        }

        fn reduce(&mut self, node: NodeId, _editor: &mut Editor<'_>) -> Reduction {
            self.order.push(node);
            Reduction::NoChange
        }
    }

    /// Replaces every `Int32Sub` with its left operand.
    struct SubToLeft;

    impl Reducer for SubToLeft {
        fn name(&self) -> &'static str {
            "SubToLeft"
        }

        fn reduce(&mut self, node: NodeId, editor: &mut Editor<'_>) -> Reduction {
            let graph = editor.graph();
            if graph.opcode(node) == Opcode::Int32Sub {
                Reduction::replace(graph.value_input(node, 0))
            } else {
                Reduction::NoChange
            }
        }
    }

    /// Replaces every `Int32Add` with a freshly built `Int32Mul`.
    struct AddToMul;

    impl Reducer for AddToMul {
        fn name(&self) -> &'static str {
            "AddToMul"
        }

        fn reduce(&mut self, node: NodeId, editor: &mut Editor<'_>) -> Reduction {
            let graph = editor.graph_mut();
            if graph.opcode(node) != Opcode::Int32Add {
                return Reduction::NoChange;
            }
            let (l, r) = (graph.value_input(node, 0), graph.value_input(node, 1));
            let mul = graph.binary(Opcode::Int32Mul, l, r);
            Reduction::replace(mul)
        }
    }

    /// Counts finalize calls and revisits `node` on the first one.
    struct RevisitOnFinalize {
        node: NodeId,
        finalized: usize,
        seen: usize,
    }

    impl Reducer for RevisitOnFinalize {
        fn name(&self) -> &'static str {
            "RevisitOnFinalize"
        }

        fn reduce(&mut self, node: NodeId, _editor: &mut Editor<'_>) -> Reduction {
            if node == self.node {
                self.seen += 1;
            }
            Reduction::NoChange
        }

        fn finalize(&mut self, editor: &mut Editor<'_>) {
            self.finalized += 1;
            if self.finalized == 1 {
                editor.revisit(self.node);
            }
        }
    }

    /// On its second visit of `target`, swaps input 0 for a fresh constant
    /// and reports an in-place change. Revisits `target` on the first
    /// finalize.
    struct SwapInFreshInput {
        target: NodeId,
        user: NodeId,
        target_visits: usize,
        user_visits: usize,
        finalized: usize,
    }

    impl Reducer for SwapInFreshInput {
        fn name(&self) -> &'static str {
            "SwapInFreshInput"
        }

        fn reduce(&mut self, node: NodeId, editor: &mut Editor<'_>) -> Reduction {
            if node == self.user {
                self.user_visits += 1;
            }
            if node != self.target {
                return Reduction::NoChange;
            }
            self.target_visits += 1;
            if self.target_visits != 2 {
                return Reduction::NoChange;
            }
            let graph = editor.graph_mut();
            let fresh = graph.int32_constant(99);
            graph.replace_input(node, 0, fresh);
            Reduction::Changed(node)
        }

        fn finalize(&mut self, editor: &mut Editor<'_>) {
            self.finalized += 1;
            if self.finalized == 1 {
                editor.revisit(self.target);
            }
        }
    }

    fn record(graph: &mut Graph) -> Vec<NodeId> {
        let mut recorder = Recorder::default();
        let mut reducer = GraphReducer::new();
        reducer.add_reducer(&mut recorder);
        reducer.reduce_graph(graph);
        drop(reducer);
        recorder.order
    }

    #[test]
    fn test_inputs_reduced_before_users() {
        let mut g = Graph::new();
        let p0 = g.parameter(0, NodeType::Int32);
        let p1 = g.parameter(1, NodeType::Int32);
        let add = g.binary(Opcode::Int32Add, p0, p1);
        g.append_input(g.end(), add);

        assert_eq!(record(&mut g), vec![g.start(), p0, p1, add, g.end()]);
    }

    #[test]
    fn test_diamond_order() {
        let mut g = Graph::new();
        let start = g.start();
        let x = g.parameter(0, NodeType::Bool);
        let branch = g.branch(x, start, BranchHint::None);
        let t = g.if_true(branch);
        let f = g.if_false(branch);
        let merge = g.merge(&[t, f]);
        let k1 = g.int32_constant(1);
        let k2 = g.int32_constant(2);
        let phi = g.phi(NodeType::Int32, merge, &[k1, k2]);
        g.append_input(g.end(), phi);

        assert_eq!(
            record(&mut g),
            vec![start, x, branch, t, f, merge, k1, k2, phi, g.end()]
        );
    }

    #[test]
    fn test_loop_back_edge_is_not_repushed() {
        let mut g = Graph::new();
        let start = g.start();
        let header = g.loop_header(start);
        let init = g.int32_constant(0);
        let phi = g.phi(NodeType::Int32, header, &[init]);
        let one = g.int32_constant(1);
        let next = g.binary(Opcode::Int32Add, phi, one);
        g.append_input(phi, next);
        g.append_input(header, header);
        g.append_input(g.end(), phi);

        let order = record(&mut g);
        for id in [phi, next, header, init, one] {
            assert_eq!(order.iter().filter(|&&n| n == id).count(), 1);
        }
        assert_eq!(order.last(), Some(&g.end()));
    }

    #[test]
    fn test_old_replacement_takes_all_uses() {
        let mut g = Graph::new();
        let a = g.int32_constant(7);
        let b = g.int32_constant(3);
        let sub = g.binary(Opcode::Int32Sub, a, b);
        let user = g.binary(Opcode::Int32Mul, sub, sub);
        g.append_input(g.end(), user);

        let mut pass = SubToLeft;
        let mut reducer = GraphReducer::new();
        reducer.add_reducer(&mut pass);
        let stats = reducer.reduce_graph(&mut g);

        assert_eq!(g.inputs(user), &[a, a]);
        assert!(g.is_dead(sub));
        assert_eq!(stats.replacements, 1);
    }

    #[test]
    fn test_fresh_replacement_is_reduced() {
        let mut g = Graph::new();
        let a = g.int32_constant(2);
        let add = g.binary(Opcode::Int32Add, a, a);
        g.append_input(g.end(), add);

        let mut to_mul = AddToMul;
        let mut recorder = Recorder::default();
        let mut reducer = GraphReducer::new();
        reducer.add_reducer(&mut to_mul);
        reducer.add_reducer(&mut recorder);
        reducer.reduce_graph(&mut g);
        drop(reducer);

        let mul = g.input(g.end(), 0);
        assert_eq!(g.opcode(mul), Opcode::Int32Mul);
        assert!(g.is_dead(add));
        assert!(recorder.order.contains(&mul));
    }

    #[test]
    fn test_finalize_revisits_restart_traversal() {
        let mut g = Graph::new();
        let a = g.int32_constant(2);
        let neg = g.binary(Opcode::Int32Sub, a, a);
        g.append_input(g.end(), neg);

        let mut pass = RevisitOnFinalize {
            node: a,
            finalized: 0,
            seen: 0,
        };
        let mut reducer = GraphReducer::new();
        reducer.add_reducer(&mut pass);
        let stats = reducer.reduce_graph(&mut g);
        drop(reducer);

        assert_eq!(pass.seen, 2);
        assert_eq!(pass.finalized, 2);
        assert_eq!(stats.finalize_rounds, 2);
        assert_eq!(stats.revisits, 1);
    }

    #[test]
    fn test_in_place_update_with_new_input_revisits_users() {
        let mut g = Graph::new();
        let a = g.int32_constant(5);
        let sub = g.binary(Opcode::Int32Sub, a, a);
        let mul = g.binary(Opcode::Int32Mul, sub, sub);
        g.append_input(g.end(), mul);

        let mut pass = SwapInFreshInput {
            target: sub,
            user: mul,
            target_visits: 0,
            user_visits: 0,
            finalized: 0,
        };
        let mut reducer = GraphReducer::new();
        reducer.add_reducer(&mut pass);
        let stats = reducer.reduce_graph(&mut g);
        drop(reducer);

        let fresh = g.input(sub, 0);
        assert_ne!(fresh, a);
        assert_eq!(g.opcode(fresh), Opcode::Constant32);
        // Once before finalize, once for the change, once after its new input.
        assert_eq!(pass.target_visits, 3);
        assert_eq!(pass.user_visits, 2);
        assert_eq!(stats.in_place_updates, 1);
    }
}
