//! Builds basic blocks from the control skeleton of the graph.
//!
//! A breadth-first walk backwards over control inputs creates a block for
//! every `Start`, `End`, `Merge`, `Loop` and branch projection, then a second
//! pass wires the blocks together according to each control node's kind.
//! The same walk, restricted to a single-entry single-exit region, splices a
//! floating diamond into an existing block.

use std::collections::VecDeque;

use crate::ir::arena::BitSet;
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::{BranchHint, Opcode};

use super::block::BlockId;
use super::scheduler::{Placement, Scheduler};

/// Region being spliced in by [`CfgBuilder::run_region`].
#[derive(Debug, Clone, Copy)]
struct Component {
    entry: NodeId,
    start: BlockId,
    end: BlockId,
}

pub(super) struct CfgBuilder {
    queue: VecDeque<NodeId>,
    queued: BitSet,
    /// Every control node reached, in queue order.
    pub(super) control: Vec<NodeId>,
    component: Option<Component>,
}

impl CfgBuilder {
    pub(super) fn new() -> Self {
        CfgBuilder {
            queue: VecDeque::new(),
            queued: BitSet::new(),
            control: Vec::new(),
            component: None,
        }
    }

    /// Build the block graph for everything `End` reaches over control
    /// edges.
    pub(super) fn run(&mut self, s: &mut Scheduler<'_>) {
        let graph = s.graph;
        self.queue_node(s, graph.end());
        while let Some(node) = self.queue.pop_front() {
            for &input in graph.node(node).control_inputs() {
                self.queue_node(s, input);
            }
        }
        self.connect_all(s);
    }

    /// Splice the floating region ending at `exit` into `block`.
    ///
    /// The region's entry is the unique control node equivalent to `exit`;
    /// `block` is split at its end by the entry's branch, and whatever
    /// `block` ended with moves to the block of `exit`.
    pub(super) fn run_region(&mut self, s: &mut Scheduler<'_>, block: BlockId, exit: NodeId) {
        let graph = s.graph;
        self.queue_node(s, exit);
        let end = s.schedule.block_of(exit);
        s.equivalence.run(graph, exit);
        let exit_class = s.equivalence.class_of(exit);

        let mut entry = None;
        while let Some(node) = self.queue.pop_front() {
            if node != exit && exit_class.is_some() && s.equivalence.class_of(node) == exit_class {
                assert!(entry.is_none(), "region ending at {exit} has two entries");
                tracing::trace!(%node, %exit, "found region entry");
                entry = Some(node);
                continue;
            }
            for &input in graph.node(node).control_inputs() {
                self.queue_node(s, input);
            }
        }
        let Some(entry) = entry else {
            panic!("region ending at {exit} has no entry");
        };
        self.component = Some(Component {
            entry,
            start: block,
            end,
        });
        self.connect_all(s);
    }

    fn queue_node(&mut self, s: &mut Scheduler<'_>, node: NodeId) {
        if self.queued.insert(node.as_usize()) {
            self.build_blocks(s, node);
            self.queue.push_back(node);
            self.control.push(node);
        }
    }

    fn connect_all(&mut self, s: &mut Scheduler<'_>) {
        for i in 0..self.control.len() {
            let node = self.control[i];
            self.connect_blocks(s, node);
        }
    }

    // =========================================================================
    // Block Creation
    // =========================================================================

    fn build_blocks(&mut self, s: &mut Scheduler<'_>, node: NodeId) {
        let graph = s.graph;
        match graph.opcode(node) {
            Opcode::End => {
                let end = s.schedule.end();
                s.fix_node(end, node);
            }
            Opcode::Start => {
                let start = s.schedule.start();
                s.fix_node(start, node);
            }
            Opcode::Loop | Opcode::Merge => {
                Self::build_block_for_node(s, node);
            }
            Opcode::Branch => {
                let (if_true, if_false) = projections(graph, node);
                Self::build_block_for_node(s, if_true);
                Self::build_block_for_node(s, if_false);
            }
            _ => {}
        }
    }

    fn build_block_for_node(s: &mut Scheduler<'_>, node: NodeId) -> BlockId {
        if let Some(block) = s.schedule.block_for_node(node) {
            return block;
        }
        let block = s.schedule.new_block();
        tracing::trace!(%node, %block, "new block");
        s.fix_node(block, node);
        block
    }

    // =========================================================================
    // Block Wiring
    // =========================================================================

    fn connect_blocks(&mut self, s: &mut Scheduler<'_>, node: NodeId) {
        match s.graph.opcode(node) {
            Opcode::Loop | Opcode::Merge => Self::connect_merge(s, node),
            Opcode::Branch => {
                s.update_placement(node, Placement::Fixed);
                self.connect_branch(s, node);
            }
            opcode @ (Opcode::Return | Opcode::Throw | Opcode::Deoptimize | Opcode::TailCall) => {
                s.update_placement(node, Placement::Fixed);
                let control = s.graph.control_input(node, 0);
                let block = s.find_predecessor_block(control);
                match opcode {
                    Opcode::Return => s.schedule.add_return(block, node),
                    Opcode::Throw => s.schedule.add_throw(block, node),
                    Opcode::Deoptimize => s.schedule.add_deoptimize(block, node),
                    _ => s.schedule.add_tail_call(block, node),
                }
            }
            Opcode::Start | Opcode::End | Opcode::IfTrue | Opcode::IfFalse => {}
            opcode => unreachable!("{opcode} {node} on the control chain"),
        }
    }

    fn connect_merge(s: &mut Scheduler<'_>, merge: NodeId) {
        let graph = s.graph;
        let block = s.schedule.block_of(merge);
        for &input in graph.node(merge).control_inputs() {
            let pred = s.find_predecessor_block(input);
            s.schedule.add_goto(pred, block);
        }
    }

    fn connect_branch(&mut self, s: &mut Scheduler<'_>, branch: NodeId) {
        let graph = s.graph;
        let (if_true, if_false) = projections(graph, branch);
        let true_block = s.schedule.block_of(if_true);
        let false_block = s.schedule.block_of(if_false);

        match graph.op_param::<BranchHint>(branch) {
            BranchHint::None => {}
            BranchHint::True => s.schedule.block_mut(false_block).set_deferred(true),
            BranchHint::False => s.schedule.block_mut(true_block).set_deferred(true),
        }

        match self.component {
            Some(component) if component.entry == branch => {
                s.schedule
                    .insert_branch(component.start, component.end, branch, true_block, false_block);
            }
            _ => {
                let control = graph.control_input(branch, 0);
                let block = s.find_predecessor_block(control);
                s.schedule.add_branch(block, branch, true_block, false_block);
            }
        }
    }
}

/// The `IfTrue` and `IfFalse` projections of `branch`.
fn projections(graph: &Graph, branch: NodeId) -> (NodeId, NodeId) {
    let mut if_true = None;
    let mut if_false = None;
    for user in graph.users(branch) {
        match graph.opcode(user) {
            Opcode::IfTrue => if_true = Some(user),
            Opcode::IfFalse => if_false = Some(user),
            _ => {}
        }
    }
    match (if_true, if_false) {
        (Some(t), Some(f)) => (t, f),
        _ => panic!("{branch} lacks a projection"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::ir::types::NodeType;
    use crate::schedule::control_equivalence::ControlEquivalence;

    #[test]
    #[should_panic(expected = "has no entry")]
    fn test_region_without_entry_panics() {
        // Two control chains that never meet above the merge.
        let mut g = Graph::new();
        let a = g.merge(&[]);
        let b = g.merge(&[]);
        let exit = g.merge(&[a, b]);

        let mut s = Scheduler::new(&g, SchedulerConfig::default());
        let block = s.schedule.start();
        CfgBuilder::new().run_region(&mut s, block, exit);
    }

    #[test]
    #[should_panic(expected = "has two entries")]
    fn test_region_with_two_entries_panics() {
        let mut g = Graph::new();
        let start = g.start();
        let p = g.parameter(0, NodeType::Int32);
        let branch = g.branch(p, start, BranchHint::None);
        let t = g.if_true(branch);
        let f = g.if_false(branch);
        let merge = g.merge(&[t, f]);

        let mut equivalence = ControlEquivalence::new();
        equivalence.run(&g, merge);
        assert_eq!(equivalence.class_of(start), equivalence.class_of(merge));
        assert_eq!(equivalence.class_of(branch), equivalence.class_of(merge));

        // Rewired after classification, so both `start` and `branch` are
        // reached from the merge on separate paths.
        g.replace_input(merge, 0, start);
        let mut s = Scheduler::new(&g, SchedulerConfig::default());
        s.equivalence = equivalence;
        let block = s.schedule.start();
        CfgBuilder::new().run_region(&mut s, block, merge);
    }
}
