//! Sea-of-Nodes graph structure.
//!
//! The graph provides:
//! - **Arena-based storage**: nodes are addressed by [`NodeId`] and never move
//!   out from under an id
//! - **Use lists**: every input edge is mirrored as a [`Use`] record on the
//!   used node, so "who uses me" and rewiring are both cheap
//! - **Distinguished nodes**: `start` (function entry) and `end` (collects
//!   every terminator)
//!
//! Structural invariants (arity, fixed vs variadic inputs, operations on dead
//! nodes) are asserted in every build mode.

use std::fmt;

use super::arena::{Arena, BitSet, SecondaryMap};
use super::node::{InputList, Node, NodeId};
use super::operators::{BranchHint, InputKind, OpParameter, Opcode, Operator};
use super::types::NodeType;

// =============================================================================
// Use Edges
// =============================================================================

/// One input edge seen from the used node: `user.inputs[index]` is the node
/// owning this record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Use {
    pub user: NodeId,
    pub index: u32,
}

// =============================================================================
// Graph Structure
// =============================================================================

/// A Sea-of-Nodes graph.
#[derive(Clone)]
pub struct Graph {
    nodes: Arena<Node>,
    uses: SecondaryMap<Node, Vec<Use>>,
    start: NodeId,
    end: NodeId,
}

impl Graph {
    /// Create a graph holding only `Start` (id 0) and an empty `End` (id 1).
    pub fn new() -> Self {
        let mut nodes = Arena::with_capacity(256);
        let start = nodes.alloc(Node::new(
            Operator::new(Opcode::Start),
            InputList::new(),
            NodeType::Control,
        ));
        let end = nodes.alloc(Node::new(
            Operator::variadic(Opcode::End, 0),
            InputList::new(),
            NodeType::Control,
        ));
        Graph {
            nodes,
            uses: SecondaryMap::new(),
            start,
            end,
        }
    }

    #[inline]
    pub fn start(&self) -> NodeId {
        self.start
    }

    #[inline]
    pub fn end(&self) -> NodeId {
        self.end
    }

    pub fn set_start(&mut self, start: NodeId) {
        self.start = start;
    }

    pub fn set_end(&mut self, end: NodeId) {
        self.end = end;
    }

    // =========================================================================
    // Node Access
    // =========================================================================

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    #[inline]
    pub fn op(&self, id: NodeId) -> &Operator {
        &self.nodes[id].op
    }

    #[inline]
    pub fn opcode(&self, id: NodeId) -> Opcode {
        self.nodes[id].op.opcode
    }

    #[inline]
    pub fn ty(&self, id: NodeId) -> NodeType {
        self.nodes[id].ty
    }

    pub fn set_type(&mut self, id: NodeId, ty: NodeType) {
        self.nodes[id].ty = ty;
    }

    /// Typed instance data of a node's operator.
    #[inline]
    pub fn op_param<T: OpParameter>(&self, id: NodeId) -> T {
        self.nodes[id].op.param::<T>()
    }

    /// Number of ids ever allocated (dead nodes included).
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether only `Start` and `End` exist.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 2
    }

    /// Highest id allocated so far.
    #[inline]
    pub fn max_node_id(&self) -> NodeId {
        NodeId::new(self.nodes.len() as u32 - 1)
    }

    #[inline]
    pub fn is_dead(&self, id: NodeId) -> bool {
        self.nodes[id].is_dead()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + use<> {
        self.nodes.ids()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter()
    }

    // =========================================================================
    // Inputs
    // =========================================================================

    #[inline]
    pub fn inputs(&self, id: NodeId) -> &[NodeId] {
        self.nodes[id].inputs.as_slice()
    }

    #[inline]
    pub fn input_count(&self, id: NodeId) -> usize {
        self.nodes[id].inputs.len()
    }

    /// Input `index`. Panics past the operator's arity.
    #[inline]
    pub fn input(&self, id: NodeId, index: usize) -> NodeId {
        let node = &self.nodes[id];
        assert!(
            index < node.inputs.len(),
            "{} has no input {}",
            node.op,
            index
        );
        node.inputs.as_slice()[index]
    }

    pub fn control_input(&self, id: NodeId, index: usize) -> NodeId {
        let inputs = self.nodes[id].control_inputs();
        assert!(index < inputs.len(), "{} has no control input {}", self.op(id), index);
        inputs[index]
    }

    pub fn value_input(&self, id: NodeId, index: usize) -> NodeId {
        let inputs = self.nodes[id].value_inputs();
        assert!(index < inputs.len(), "{} has no value input {}", self.op(id), index);
        inputs[index]
    }

    pub fn effect_input(&self, id: NodeId, index: usize) -> NodeId {
        let inputs = self.nodes[id].effect_inputs();
        assert!(index < inputs.len(), "{} has no effect input {}", self.op(id), index);
        inputs[index]
    }

    /// Group of the edge `user.inputs[index]`.
    #[inline]
    pub fn edge_kind(&self, user: NodeId, index: usize) -> InputKind {
        self.nodes[user].op.input_kind(index)
    }

    // =========================================================================
    // Use Lists
    // =========================================================================

    /// Every edge that points at `id`.
    #[inline]
    pub fn uses(&self, id: NodeId) -> &[Use] {
        self.uses.get(id)
    }

    #[inline]
    pub fn use_count(&self, id: NodeId) -> usize {
        self.uses.get(id).len()
    }

    /// Users of `id`, once per edge.
    pub fn users(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.uses.get(id).iter().map(|u| u.user)
    }

    fn add_use(&mut self, def: NodeId, user: NodeId, index: usize) {
        self.uses.get_mut(def).push(Use {
            user,
            index: index as u32,
        });
    }

    fn remove_use(&mut self, def: NodeId, user: NodeId, index: usize) {
        let edge = Use {
            user,
            index: index as u32,
        };
        let uses = self.uses.get_mut(def);
        let pos = uses
            .iter()
            .position(|&u| u == edge)
            .unwrap_or_else(|| panic!("use list of {} lacks {:?}", def, edge));
        uses.swap_remove(pos);
    }

    // =========================================================================
    // Node Creation
    // =========================================================================

    /// Create a node with the opcode's default result type.
    pub fn new_node(&mut self, op: Operator, inputs: &[NodeId]) -> NodeId {
        let ty = op.opcode.default_type();
        self.new_node_with_type(op, inputs, ty)
    }

    /// Create a node; `inputs` must match the operator's total arity.
    pub fn new_node_with_type(&mut self, op: Operator, inputs: &[NodeId], ty: NodeType) -> NodeId {
        assert_eq!(
            inputs.len(),
            op.input_count(),
            "{} expects {} inputs",
            op,
            op.input_count()
        );
        let id = self
            .nodes
            .alloc(Node::new(op, InputList::from_slice(inputs), ty));
        for (index, &input) in inputs.iter().enumerate() {
            assert!(!self.is_dead(input), "{} used as input of new {}", input, op);
            self.add_use(input, id, index);
        }
        id
    }

    /// Append to the variadic input group of `node`.
    pub fn append_input(&mut self, node: NodeId, input: NodeId) {
        assert!(!self.is_dead(node), "append to dead node {}", node);
        let n = &mut self.nodes[node];
        n.op.grow();
        let index = n.inputs.len();
        n.inputs.push(input);
        self.add_use(input, node, index);
    }

    /// Repoint `node.inputs[index]` to `new_input`.
    pub fn replace_input(&mut self, node: NodeId, index: usize, new_input: NodeId) {
        let old = self.input(node, index);
        if old == new_input {
            return;
        }
        self.remove_use(old, node, index);
        self.nodes[node].inputs.set(index, new_input);
        self.add_use(new_input, node, index);
    }

    /// Remove input `index`, shifting later inputs down. Only for the
    /// variadic group.
    pub fn remove_input(&mut self, node: NodeId, index: usize) {
        let count = self.input_count(node);
        let kind = self
            .op(node)
            .opcode
            .info()
            .variadic
            .unwrap_or_else(|| panic!("cannot remove an input of fixed-arity {}", self.op(node)));
        assert_eq!(self.edge_kind(node, index), kind);
        for i in index..count {
            let input = self.input(node, i);
            self.remove_use(input, node, i);
        }
        let tail: Vec<NodeId> = self.inputs(node)[index + 1..].to_vec();
        let n = &mut self.nodes[node];
        let kept: Vec<NodeId> = n.inputs.as_slice()[..index].to_vec();
        n.inputs = InputList::from_slice(&kept);
        match kind {
            InputKind::Control => n.op.control_in -= 1,
            InputKind::Value => n.op.value_in -= 1,
            InputKind::Effect => n.op.effect_in -= 1,
        }
        for (offset, input) in tail.into_iter().enumerate() {
            let n = &mut self.nodes[node];
            n.inputs.push(input);
            self.add_use(input, node, index + offset);
        }
    }

    // =========================================================================
    // Replacement
    // =========================================================================

    /// Move every use of `old` to `replacement`.
    ///
    /// The use list of `old` is taken up front and consumed edge by edge, so
    /// it is never walked while being mutated.
    pub fn replace_uses(&mut self, old: NodeId, replacement: NodeId) {
        if old == replacement {
            return;
        }
        let uses = std::mem::take(self.uses.get_mut(old));
        for edge in uses {
            self.nodes[edge.user]
                .inputs
                .set(edge.index as usize, replacement);
            self.uses.get_mut(replacement).push(edge);
        }
    }

    /// Replace the uses of `node` by edge kind.
    ///
    /// Value edges go to `value`, effect edges to `effect` (default: the
    /// node's own effect input), control edges to `control` (default: the
    /// node's own control input).
    pub fn replace_with_value(
        &mut self,
        node: NodeId,
        value: NodeId,
        effect: Option<NodeId>,
        control: Option<NodeId>,
    ) {
        let uses = std::mem::take(self.uses.get_mut(node));
        for edge in uses {
            let target = match self.edge_kind(edge.user, edge.index as usize) {
                InputKind::Value => value,
                InputKind::Effect => effect.unwrap_or_else(|| self.effect_input(node, 0)),
                InputKind::Control => control.unwrap_or_else(|| self.control_input(node, 0)),
            };
            self.nodes[edge.user]
                .inputs
                .set(edge.index as usize, target);
            self.uses.get_mut(target).push(edge);
        }
    }

    /// Detach `id` from its inputs and mark it dead. The id stays allocated.
    pub fn kill(&mut self, id: NodeId) {
        if self.is_dead(id) {
            return;
        }
        let inputs: Vec<NodeId> = self.inputs(id).to_vec();
        for (index, input) in inputs.into_iter().enumerate() {
            self.remove_use(input, id, index);
        }
        let n = &mut self.nodes[id];
        n.inputs.clear();
        n.op.control_in = 0;
        n.op.value_in = 0;
        n.op.effect_in = 0;
        n.mark_dead();
    }

    // =========================================================================
    // Traversal
    // =========================================================================

    /// Nodes reachable from `end` over all input edges.
    pub fn reachable(&self) -> BitSet {
        let mut seen = BitSet::with_capacity(self.len());
        let mut stack = vec![self.end];
        seen.insert(self.end.as_usize());
        while let Some(id) = stack.pop() {
            for &input in self.inputs(id) {
                if seen.insert(input.as_usize()) {
                    stack.push(input);
                }
            }
        }
        seen
    }

    /// Live (reachable, not dead) node ids in increasing order.
    pub fn live_nodes(&self) -> Vec<NodeId> {
        self.reachable()
            .iter()
            .map(|i| NodeId::new(i as u32))
            .filter(|&id| !self.is_dead(id))
            .collect()
    }

    // =========================================================================
    // Constants
    // =========================================================================

    pub fn int8_constant(&mut self, value: i8) -> NodeId {
        self.new_node_with_type(Operator::constant8(value as u8), &[], NodeType::Int8)
    }

    pub fn uint8_constant(&mut self, value: u8) -> NodeId {
        self.new_node_with_type(Operator::constant8(value), &[], NodeType::Uint8)
    }

    pub fn int32_constant(&mut self, value: i32) -> NodeId {
        self.new_node_with_type(Operator::constant32(value as u32), &[], NodeType::Int32)
    }

    pub fn uint32_constant(&mut self, value: u32) -> NodeId {
        self.new_node_with_type(Operator::constant32(value), &[], NodeType::Uint32)
    }

    pub fn parameter(&mut self, index: u16, ty: NodeType) -> NodeId {
        let start = self.start;
        self.new_node_with_type(Operator::parameter(index), &[start], ty)
    }

    // =========================================================================
    // Arithmetic and Control Helpers
    // =========================================================================

    /// Two-input pure operation (arithmetic or comparison).
    pub fn binary(&mut self, opcode: Opcode, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.new_node(Operator::new(opcode), &[lhs, rhs])
    }

    pub fn branch(&mut self, condition: NodeId, control: NodeId, hint: BranchHint) -> NodeId {
        self.new_node(Operator::branch(hint), &[control, condition])
    }

    pub fn if_true(&mut self, branch: NodeId) -> NodeId {
        self.new_node(Operator::new(Opcode::IfTrue), &[branch])
    }

    pub fn if_false(&mut self, branch: NodeId) -> NodeId {
        self.new_node(Operator::new(Opcode::IfFalse), &[branch])
    }

    pub fn merge(&mut self, controls: &[NodeId]) -> NodeId {
        self.new_node(Operator::variadic(Opcode::Merge, controls.len() as u16), controls)
    }

    /// Loop header with only its entry edge; back edges are appended.
    pub fn loop_header(&mut self, entry: NodeId) -> NodeId {
        self.new_node(Operator::variadic(Opcode::Loop, 1), &[entry])
    }

    pub fn phi(&mut self, ty: NodeType, control: NodeId, values: &[NodeId]) -> NodeId {
        let mut inputs = Vec::with_capacity(values.len() + 1);
        inputs.push(control);
        inputs.extend_from_slice(values);
        self.new_node_with_type(
            Operator::variadic(Opcode::Phi, values.len() as u16),
            &inputs,
            ty,
        )
    }

    pub fn effect_phi(&mut self, control: NodeId, effects: &[NodeId]) -> NodeId {
        let mut inputs = Vec::with_capacity(effects.len() + 1);
        inputs.push(control);
        inputs.extend_from_slice(effects);
        self.new_node(
            Operator::variadic(Opcode::EffectPhi, effects.len() as u16),
            &inputs,
        )
    }

    /// `Return` wired into `End`.
    pub fn return_value(&mut self, control: NodeId, value: NodeId, effect: NodeId) -> NodeId {
        let ret = self.new_node(Operator::new(Opcode::Return), &[control, value, effect]);
        self.append_input(self.end, ret);
        ret
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for id in self.live_nodes() {
            writeln!(f, "{}: {:?}", id, self.node(id))?;
        }
        Ok(())
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Graph ({} nodes):", self.nodes.len())?;
        for (id, node) in self.iter() {
            writeln!(f, "  {:?}: {:?}", id, node)?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn users(g: &Graph, id: NodeId) -> Vec<NodeId> {
        let mut users: Vec<_> = g.users(id).collect();
        users.sort();
        users
    }

    #[test]
    fn test_graph_creation() {
        let g = Graph::new();
        assert_eq!(g.start().index(), 0);
        assert_eq!(g.end().index(), 1);
        assert_eq!(g.opcode(g.end()), Opcode::End);
        assert_eq!(g.input_count(g.end()), 0);
        assert!(g.is_empty());
    }

    #[test]
    fn test_use_lists_track_every_edge() {
        let mut g = Graph::new();
        let c = g.int32_constant(5);
        let a = g.binary(Opcode::Int32Add, c, c);
        let b = g.binary(Opcode::Int32Mul, c, a);

        assert_eq!(g.use_count(c), 3);
        assert_eq!(users(&g, a), vec![b]);
        assert!(g.uses(c).contains(&Use { user: b, index: 0 }));
    }

    #[test]
    fn test_replace_uses_moves_every_edge() {
        let mut g = Graph::new();
        let a = g.int32_constant(1);
        let b = g.int32_constant(2);
        let c = g.int32_constant(3);
        let n = g.binary(Opcode::Int32Sub, a, b);

        g.replace_uses(a, c);

        assert_eq!(g.use_count(a), 0);
        assert_eq!(users(&g, c), vec![n]);
        assert_eq!(g.input(n, 0), c);
        assert_eq!(g.input(n, 1), b);
    }

    #[test]
    fn test_append_input_keeps_earlier_edges() {
        let mut g = Graph::new();
        let start = g.start();
        let merge = g.merge(&[start, start, start, start]);
        assert_eq!(g.node(merge).inputs.capacity(), 4);

        let extra = g.if_true(g.start());
        g.append_input(merge, extra);

        assert_eq!(g.node(merge).inputs.capacity(), 8);
        assert_eq!(g.op(merge).control_in, 5);
        assert_eq!(&g.inputs(merge)[..4], &[start; 4]);
        assert_eq!(g.use_count(start), 5);
        for index in 0..4u32 {
            assert!(g.uses(start).contains(&Use { user: merge, index }));
        }
        assert!(g.uses(extra).contains(&Use { user: merge, index: 4 }));
    }

    #[test]
    #[should_panic(expected = "cannot append")]
    fn test_append_to_fixed_arity_panics() {
        let mut g = Graph::new();
        let c = g.int32_constant(1);
        let add = g.binary(Opcode::Int32Add, c, c);
        g.append_input(add, c);
    }

    #[test]
    #[should_panic(expected = "expects 2 inputs")]
    fn test_arity_is_checked() {
        let mut g = Graph::new();
        let c = g.int32_constant(1);
        g.new_node(Operator::new(Opcode::Int32Add), &[c]);
    }

    #[test]
    fn test_kill_detaches_inputs() {
        let mut g = Graph::new();
        let a = g.int32_constant(1);
        let n = g.binary(Opcode::Int32Add, a, a);
        g.kill(n);

        assert!(g.is_dead(n));
        assert_eq!(g.use_count(a), 0);
        assert_eq!(g.input_count(n), 0);
        // The id is retired, not reused.
        let m = g.int32_constant(2);
        assert_ne!(m, n);
    }

    #[test]
    fn test_replace_with_value_splits_edge_kinds() {
        let mut g = Graph::new();
        let start = g.start();
        let obj = g.parameter(0, NodeType::Int32);
        let field = crate::ir::operators::FieldAccess {
            offset: 8,
            width: seaflow_bytecode::Width::I32,
            holder: seaflow_bytecode::TypeHandle(1),
        };
        let load = g.new_node(Operator::load_field(field), &[start, obj, start]);
        let value = g.int32_constant(4);
        let ret = g.return_value(start, load, load);

        g.replace_with_value(load, value, None, None);

        assert_eq!(g.value_input(ret, 0), value);
        assert_eq!(g.effect_input(ret, 0), start);
        assert_eq!(g.use_count(load), 0);
    }

    #[test]
    fn test_remove_input_reindexes_uses() {
        let mut g = Graph::new();
        let start = g.start();
        let merge = g.merge(&[start, start]);
        let a = g.int32_constant(1);
        let b = g.int32_constant(2);
        let c = g.int32_constant(3);
        let phi = g.phi(NodeType::Int32, merge, &[a, b, c]);

        g.remove_input(phi, 1);

        assert_eq!(g.inputs(phi), &[merge, b, c]);
        assert_eq!(g.op(phi).value_in, 2);
        assert_eq!(g.use_count(a), 0);
        assert_eq!(g.uses(c), &[Use { user: phi, index: 2 }]);
    }

    #[test]
    fn test_reachable_from_end() {
        let mut g = Graph::new();
        let start = g.start();
        let p = g.parameter(0, NodeType::Int32);
        let orphan = g.int32_constant(9);
        g.return_value(start, p, start);

        let live = g.live_nodes();
        assert!(live.contains(&p));
        assert!(!live.contains(&orphan));
    }
}
