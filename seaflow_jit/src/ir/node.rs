//! IR node definitions for the Sea-of-Nodes IR.
//!
//! Control flow, data flow and effects are all input edges of a node. The
//! inputs of every node are laid out by group:
//!
//! ```text
//! [ control inputs .. | value inputs .. | effect inputs .. ]
//! ```
//!
//! with the group sizes taken from the node's [`Operator`]. Use lists (who
//! uses a node) are owned by the [`Graph`](super::graph::Graph), not by the
//! node, so nodes never point at each other directly.

use smallvec::SmallVec;
use std::fmt;

use super::arena::Id;
use super::operators::{Opcode, Operator};
use super::types::NodeType;

/// Unique identifier for a node in the graph.
pub type NodeId = Id<Node>;

// =============================================================================
// Input List
// =============================================================================

/// Inputs stored inline before spilling to the heap.
pub const INLINE_INPUTS: usize = 4;

/// Growable input array with explicit capacity doubling.
///
/// Appending to a full list doubles its capacity (4 → 8 → 16 ...). Existing
/// entries keep their positions, and since use lists reference inputs by
/// `(user, index)`, nothing has to be re-linked when the storage moves.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct InputList {
    items: SmallVec<[NodeId; INLINE_INPUTS]>,
}

impl InputList {
    pub fn new() -> Self {
        InputList {
            items: SmallVec::new(),
        }
    }

    pub fn from_slice(inputs: &[NodeId]) -> Self {
        InputList {
            items: SmallVec::from_slice(inputs),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Slots available before the next reallocation.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<NodeId> {
        self.items.get(index).copied()
    }

    /// Overwrite an existing slot. Panics when out of range.
    #[inline]
    pub fn set(&mut self, index: usize, value: NodeId) {
        self.items[index] = value;
    }

    /// Append, doubling the capacity when full.
    pub fn push(&mut self, value: NodeId) {
        if self.items.len() == self.items.capacity() {
            let grow = self.items.capacity().max(1);
            self.items.reserve_exact(grow);
        }
        self.items.push(value);
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    #[inline]
    pub fn as_slice(&self) -> &[NodeId] {
        &self.items
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = NodeId> + '_ {
        self.items.iter().copied()
    }
}

impl fmt::Debug for InputList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.iter()).finish()
    }
}

// =============================================================================
// Node
// =============================================================================

/// A node in the Sea-of-Nodes IR graph.
#[derive(Clone)]
pub struct Node {
    /// The operation this node performs.
    pub op: Operator,
    /// Input edges, grouped control/value/effect.
    pub inputs: InputList,
    /// Result type tag.
    pub ty: NodeType,
    pub flags: NodeFlags,
}

impl Node {
    pub fn new(op: Operator, inputs: InputList, ty: NodeType) -> Self {
        Node {
            op,
            inputs,
            ty,
            flags: NodeFlags::empty(),
        }
    }

    #[inline]
    pub fn opcode(&self) -> Opcode {
        self.op.opcode
    }

    #[inline]
    pub fn is_dead(&self) -> bool {
        self.flags.contains(NodeFlags::DEAD)
    }

    #[inline]
    pub fn mark_dead(&mut self) {
        self.flags.insert(NodeFlags::DEAD);
    }

    /// Control inputs.
    pub fn control_inputs(&self) -> &[NodeId] {
        &self.inputs.as_slice()[..self.op.control_in as usize]
    }

    /// Value inputs.
    pub fn value_inputs(&self) -> &[NodeId] {
        let start = self.op.control_in as usize;
        &self.inputs.as_slice()[start..start + self.op.value_in as usize]
    }

    /// Effect inputs.
    pub fn effect_inputs(&self) -> &[NodeId] {
        let start = (self.op.control_in + self.op.value_in) as usize;
        &self.inputs.as_slice()[start..start + self.op.effect_in as usize]
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op)?;
        if !self.inputs.is_empty() {
            write!(f, " {:?}", self.inputs)?;
        }
        write!(f, " : {:?}", self.ty)?;
        if self.is_dead() {
            f.write_str(" (dead)")?;
        }
        Ok(())
    }
}

// =============================================================================
// Node Flags
// =============================================================================

bitflags::bitflags! {
    /// Flags for node properties.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct NodeFlags: u8 {
        /// Killed: no inputs, unreachable, id retired.
        const DEAD = 0b0000_0001;
    }
}

// =============================================================================
// Tests
// =============================================================================
