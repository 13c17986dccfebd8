//! The schedule: basic blocks, the node→block map and the block order.
//!
//! Besides plain construction this holds the CFG clean-ups that run on a
//! finished block graph: critical edge splitting, redundant phi removal and
//! deferred mark propagation.

use std::fmt;

use crate::ir::arena::{Arena, SecondaryMap};
use crate::ir::graph::Graph;
use crate::ir::node::{Node, NodeId};
use crate::ir::operators::Opcode;

use super::block::{BasicBlock, BlockId, Control};

/// Basic blocks produced by the scheduler, ready for code generation.
#[derive(Debug, Clone)]
pub struct Schedule {
    blocks: Arena<BasicBlock>,
    node_to_block: SecondaryMap<Node, Option<BlockId>>,
    rpo_order: Vec<BlockId>,
    start: BlockId,
    end: BlockId,
}

impl Schedule {
    /// Create a schedule holding only the start and end blocks.
    pub fn new() -> Self {
        let mut schedule = Schedule {
            blocks: Arena::new(),
            node_to_block: SecondaryMap::new(),
            rpo_order: Vec::new(),
            start: BlockId::INVALID,
            end: BlockId::INVALID,
        };
        schedule.start = schedule.new_block();
        schedule.end = schedule.new_block();
        schedule
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[inline]
    pub fn start(&self) -> BlockId {
        self.start
    }

    #[inline]
    pub fn end(&self) -> BlockId {
        self.end
    }

    #[inline]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id]
    }

    #[inline]
    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id]
    }

    #[inline]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// All blocks in creation order.
    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.iter().map(|(_, b)| b)
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + use<> {
        self.blocks.ids()
    }

    /// Blocks in reverse post-order. Empty until the scheduler numbers them.
    #[inline]
    pub fn rpo_order(&self) -> &[BlockId] {
        &self.rpo_order
    }

    /// Block a node was planned or placed in.
    #[inline]
    pub fn block_for_node(&self, node: NodeId) -> Option<BlockId> {
        *self.node_to_block.get(node)
    }

    /// Like [`block_for_node`](Self::block_for_node), for nodes that must
    /// have a block.
    pub fn block_of(&self, node: NodeId) -> BlockId {
        match self.block_for_node(node) {
            Some(block) => block,
            None => panic!("{node} has no block"),
        }
    }

    #[inline]
    pub fn is_scheduled(&self, node: NodeId) -> bool {
        self.block_for_node(node).is_some()
    }

    // =========================================================================
    // Construction
    // =========================================================================

    pub fn new_block(&mut self) -> BlockId {
        let id = self.blocks.next_id();
        self.blocks.alloc(BasicBlock::new(id))
    }

    /// Map `node` to `block` without adding it to the block's node list.
    pub fn plan_node(&mut self, block: BlockId, node: NodeId) {
        self.set_block_for_node(block, node);
    }

    /// Append `node` to `block`.
    pub fn add_node(&mut self, block: BlockId, node: NodeId) {
        self.blocks[block].nodes.push(node);
        self.set_block_for_node(block, node);
    }

    pub fn set_block_for_node(&mut self, block: BlockId, node: NodeId) {
        self.node_to_block.set(node, Some(block));
    }

    pub fn add_goto(&mut self, block: BlockId, succ: BlockId) {
        self.set_control(block, Control::Goto);
        self.add_successor(block, succ);
    }

    pub fn add_branch(&mut self, block: BlockId, branch: NodeId, if_true: BlockId, if_false: BlockId) {
        self.set_control(block, Control::Branch);
        self.add_successor(block, if_true);
        self.add_successor(block, if_false);
        self.set_control_input(block, branch);
    }

    pub fn add_return(&mut self, block: BlockId, node: NodeId) {
        self.add_exit(block, Control::Return, node);
    }

    pub fn add_throw(&mut self, block: BlockId, node: NodeId) {
        self.add_exit(block, Control::Throw, node);
    }

    pub fn add_deoptimize(&mut self, block: BlockId, node: NodeId) {
        self.add_exit(block, Control::Deoptimize, node);
    }

    pub fn add_tail_call(&mut self, block: BlockId, node: NodeId) {
        self.add_exit(block, Control::TailCall, node);
    }

    /// Split `block` at its end with `branch`.
    ///
    /// `block`'s control, control input and successors move to `end`, which
    /// must not be terminated yet; `block` then branches to `if_true` and
    /// `if_false`.
    pub fn insert_branch(
        &mut self,
        block: BlockId,
        end: BlockId,
        branch: NodeId,
        if_true: BlockId,
        if_false: BlockId,
    ) {
        assert_ne!(self.blocks[block].control, Control::None, "{block} is not terminated");
        assert_eq!(self.blocks[end].control, Control::None, "{end} is already terminated");
        self.blocks[end].control = self.blocks[block].control;
        self.blocks[block].control = Control::Branch;
        self.move_successors(block, end);
        self.add_successor(block, if_true);
        self.add_successor(block, if_false);
        if let Some(input) = self.blocks[block].control_input {
            self.set_control_input(end, input);
        }
        self.set_control_input(block, branch);
    }

    fn add_exit(&mut self, block: BlockId, control: Control, node: NodeId) {
        self.set_control(block, control);
        self.set_control_input(block, node);
        let end = self.end;
        self.add_successor(block, end);
    }

    fn set_control(&mut self, block: BlockId, control: Control) {
        assert_eq!(
            self.blocks[block].control,
            Control::None,
            "{block} is already terminated"
        );
        self.blocks[block].control = control;
    }

    fn set_control_input(&mut self, block: BlockId, node: NodeId) {
        self.blocks[block].control_input = Some(node);
        self.set_block_for_node(block, node);
    }

    fn add_successor(&mut self, block: BlockId, succ: BlockId) {
        self.blocks[block].successors.push(succ);
        self.blocks[succ].predecessors.push(block);
    }

    fn move_successors(&mut self, from: BlockId, to: BlockId) {
        let successors = std::mem::take(&mut self.blocks[from].successors);
        for &succ in &successors {
            for pred in self.blocks[succ].predecessors.iter_mut() {
                if *pred == from {
                    *pred = to;
                }
            }
        }
        self.blocks[to].successors.extend(successors);
    }

    // =========================================================================
    // Ordering and Dominators
    // =========================================================================

    /// Install the block order and number the blocks.
    pub(crate) fn set_rpo_order(&mut self, order: Vec<BlockId>) {
        for block in self.blocks.ids() {
            self.blocks[block].rpo_number = None;
        }
        for (number, &block) in order.iter().enumerate() {
            self.blocks[block].rpo_number = Some(number as u32);
        }
        self.rpo_order = order;
    }

    #[inline]
    fn depth(&self, block: BlockId) -> u32 {
        self.blocks[block].dominator_depth.unwrap_or(0)
    }

    fn idom(&self, block: BlockId) -> BlockId {
        match self.blocks[block].dominator {
            Some(dominator) => dominator,
            None => panic!("{block} has no dominator"),
        }
    }

    /// Nearest block dominating both `b1` and `b2`.
    pub fn common_dominator(&self, mut b1: BlockId, mut b2: BlockId) -> BlockId {
        while b1 != b2 {
            if self.depth(b1) < self.depth(b2) {
                b2 = self.idom(b2);
            } else {
                b1 = self.idom(b1);
            }
        }
        b1
    }

    /// Whether `a` dominates `b` (every block dominates itself).
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.common_dominator(a, b) == a
    }

    // =========================================================================
    // Well-formedness
    // =========================================================================

    /// Split every critical edge and drop redundant phis. Returns the number
    /// of blocks inserted and phis removed.
    pub fn ensure_cfg_well_formedness(&mut self, graph: &mut Graph) -> (usize, usize) {
        let mut split = 0;
        for block in self.blocks.ids() {
            if block != self.end && self.blocks[block].predecessor_count() > 1 {
                split += self.ensure_split_edge_form(block);
            }
        }
        (split, self.eliminate_redundant_phi_nodes(graph))
    }

    /// Give every edge into `block` from a block with several successors a
    /// forwarding block of its own. Returns the number of blocks inserted.
    pub fn ensure_split_edge_form(&mut self, block: BlockId) -> usize {
        assert!(
            self.blocks[block].predecessor_count() > 1 && block != self.end,
            "{block} is not a join"
        );
        let mut split = 0;
        for i in 0..self.blocks[block].predecessor_count() {
            let pred = self.blocks[block].predecessors[i];
            if self.blocks[pred].successor_count() <= 1 {
                continue;
            }
            let forward = self.new_block();
            let deferred = self.blocks[block].deferred;
            let forward_block = &mut self.blocks[forward];
            forward_block.control = Control::Goto;
            forward_block.successors.push(block);
            forward_block.predecessors.push(pred);
            forward_block.deferred = deferred;
            self.blocks[block].predecessors[i] = forward;
            if let Some(succ) = self.blocks[pred].successors.iter_mut().find(|s| **s == block) {
                *succ = forward;
            }
            split += 1;
            tracing::trace!(%pred, %block, %forward, "split critical edge");
        }
        split
    }

    /// Remove phis whose inputs are all the same node, ignoring references
    /// to the phi itself, until none are left. Uses are redirected to the
    /// surviving input. Returns the number of phis removed.
    pub fn eliminate_redundant_phi_nodes(&mut self, graph: &mut Graph) -> usize {
        let mut eliminated = 0;
        loop {
            let mut changed = false;
            for block in self.blocks.ids() {
                let mut pos = 0;
                while pos < self.blocks[block].nodes.len() {
                    let node = self.blocks[block].nodes[pos];
                    match redundant_phi_input(graph, node) {
                        Some(survivor) => {
                            tracing::trace!(phi = %node, %survivor, "redundant phi");
                            graph.replace_uses(node, survivor);
                            graph.kill(node);
                            self.blocks[block].nodes.remove(pos);
                            self.node_to_block.set(node, None);
                            eliminated += 1;
                            changed = true;
                        }
                        None => pos += 1,
                    }
                }
            }
            if !changed {
                return eliminated;
            }
        }
    }

    /// Mark blocks deferred when every predecessor reached before them in
    /// RPO is deferred, until nothing changes.
    pub fn propagate_deferred_mark(&mut self) -> usize {
        let mut marked = 0;
        loop {
            let mut changed = false;
            for block in self.blocks.ids() {
                let b = &self.blocks[block];
                if b.deferred || b.predecessors.is_empty() {
                    continue;
                }
                let deferred = b.predecessors.iter().all(|&pred| {
                    let p = &self.blocks[pred];
                    p.deferred || p.rpo_number >= b.rpo_number
                });
                if deferred {
                    self.blocks[block].deferred = true;
                    marked += 1;
                    changed = true;
                }
            }
            if !changed {
                return marked;
            }
        }
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self::new()
    }
}

/// The single distinct non-self input of a redundant `Phi`.
fn redundant_phi_input(graph: &Graph, node: NodeId) -> Option<NodeId> {
    if graph.is_dead(node) || graph.opcode(node) != Opcode::Phi {
        return None;
    }
    let values = graph.node(node).value_inputs();
    let mut survivor = None;
    for &value in values {
        if value == node {
            continue;
        }
        match survivor {
            None => survivor = Some(value),
            Some(s) if s == value => {}
            Some(_) => return None,
        }
    }
    survivor
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let order: Vec<BlockId> = if self.rpo_order.is_empty() {
            self.blocks.ids().collect()
        } else {
            self.rpo_order.clone()
        };
        for id in order {
            let block = &self.blocks[id];
            write!(f, "--- block {id}")?;
            if let Some(rpo) = block.rpo_number {
                write!(f, " rpo {rpo}")?;
            }
            if block.deferred {
                f.write_str(" (deferred)")?;
            }
            if block.loop_depth > 0 {
                write!(f, " loop depth {}", block.loop_depth)?;
            }
            f.write_str(" <-")?;
            for pred in &block.predecessors {
                write!(f, " {pred}")?;
            }
            writeln!(f, " ---")?;
            for node in &block.nodes {
                writeln!(f, "  {node}")?;
            }
            write!(f, "  {}", block.control)?;
            if let Some(input) = block.control_input {
                write!(f, " {input}")?;
            }
            if !block.successors.is_empty() {
                f.write_str(" ->")?;
                for succ in &block.successors {
                    write!(f, " {succ}")?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
