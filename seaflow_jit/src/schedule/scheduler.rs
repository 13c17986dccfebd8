//! Global code motion: places every node of the graph into a basic block.
//!
//! # Phases
//!
//! 1. **CFG**: blocks are built from the fixed control skeleton
//!    ([`CfgBuilder`]).
//! 2. **Block order**: reverse post-order, loop membership and depth, then
//!    the dominator tree.
//! 3. **Prepare uses**: a walk from `End` classifies every node as fixed
//!    (control, parameters, phis on fixed merges), coupled (phis on floating
//!    merges) or schedulable, and counts the uses not yet placed.
//! 4. **Schedule early**: starting at the fixed nodes, each node learns the
//!    deepest dominator-tree block its inputs allow.
//! 5. **Schedule late**: nodes are placed once all their uses are, in the
//!    common dominator of those uses, then hoisted out of loops as far as
//!    the early position allows. A floating merge reached here is fused into
//!    the block graph, which repeats phases 1, 2 and 4 for that region.
//! 6. **Seal**: planned nodes are appended to their blocks in dependency
//!    order.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use seaflow_bytecode::BinaryOp;

use crate::config::SchedulerConfig;
use crate::ir::arena::{BitSet, SecondaryMap};
use crate::ir::graph::{Graph, Use};
use crate::ir::node::{Node, NodeId};
use crate::ir::operators::Opcode;

use super::block::BlockId;
use super::cfg_builder::CfgBuilder;
use super::control_equivalence::ControlEquivalence;
use super::schedule::Schedule;

// =============================================================================
// Per-node State
// =============================================================================

/// Scheduling status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(super) enum Placement {
    /// Not reached from `End`.
    #[default]
    Unknown,
    /// Placed by the CFG or pinned to a fixed block.
    Fixed,
    /// A phi on a floating merge; moves with its merge.
    Coupled,
    /// Free to move between its early and late positions.
    Schedulable,
    /// Placed by schedule late.
    Scheduled,
}

#[derive(Debug, Clone, Copy)]
struct SchedulerData {
    /// Earliest legal block, deepest in the dominator tree.
    minimum_block: BlockId,
    /// Uses not yet scheduled.
    unscheduled_count: u32,
    placement: Placement,
}

#[derive(Debug, Clone)]
struct LoopInfo {
    header: BlockId,
    members: BitSet,
    /// Blocks outside the loop reached directly from inside it.
    outgoing: Vec<BlockId>,
}

/// Counters from one scheduler run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub blocks: usize,
    pub scheduled_nodes: usize,
    pub split_edges: usize,
    pub eliminated_phis: usize,
    pub fused_regions: usize,
    pub loops: usize,
    /// Nodes placed outside the loop their uses are in.
    pub hoisted: usize,
}

// =============================================================================
// Scheduler
// =============================================================================

/// Computes a [`Schedule`] for a graph.
pub struct Scheduler<'g> {
    pub(super) graph: &'g Graph,
    pub(super) schedule: Schedule,
    pub(super) equivalence: ControlEquivalence,
    config: SchedulerConfig,
    node_data: SecondaryMap<Node, SchedulerData>,
    root_nodes: Vec<NodeId>,
    schedule_queue: VecDeque<NodeId>,
    /// Nodes planned per block, uses before definitions.
    scheduled_nodes: Vec<Vec<NodeId>>,
    loops: Vec<LoopInfo>,
    loop_index: FxHashMap<BlockId, usize>,
    stats: SchedulerStats,
}

impl<'g> Scheduler<'g> {
    /// Schedule `graph`. Redundant phis are removed from the graph itself
    /// when the config asks for it.
    pub fn compute_schedule(graph: &mut Graph, config: &SchedulerConfig) -> (Schedule, SchedulerStats) {
        let mut scheduler = Scheduler::new(graph, config.clone());
        scheduler.build_cfg();
        if config.split_critical_edges {
            scheduler.split_critical_edges();
        }
        scheduler.compute_block_order();
        scheduler.prepare_uses();
        let roots = scheduler.root_nodes.clone();
        scheduler.schedule_early(roots);
        scheduler.schedule_late();
        scheduler.seal_final_schedule();

        let Scheduler {
            mut schedule,
            mut stats,
            ..
        } = scheduler;
        if config.eliminate_redundant_phis {
            stats.eliminated_phis = schedule.eliminate_redundant_phi_nodes(graph);
        }
        stats.blocks = schedule.block_count();
        stats.scheduled_nodes = schedule
            .blocks()
            .map(|b| b.node_count() + usize::from(b.control_input().is_some()))
            .sum();
        tracing::debug!(
            blocks = stats.blocks,
            nodes = stats.scheduled_nodes,
            loops = stats.loops,
            fused = stats.fused_regions,
            hoisted = stats.hoisted,
            "scheduled graph"
        );
        (schedule, stats)
    }

    pub(super) fn new(graph: &'g Graph, config: SchedulerConfig) -> Self {
        let schedule = Schedule::new();
        let node_data = SecondaryMap::with_default(SchedulerData {
            minimum_block: schedule.start(),
            unscheduled_count: 0,
            placement: Placement::Unknown,
        });
        Scheduler {
            graph,
            schedule,
            equivalence: ControlEquivalence::new(),
            config,
            node_data,
            root_nodes: Vec::new(),
            schedule_queue: VecDeque::new(),
            scheduled_nodes: Vec::new(),
            loops: Vec::new(),
            loop_index: FxHashMap::default(),
            stats: SchedulerStats::default(),
        }
    }

    #[inline]
    fn placement(&self, node: NodeId) -> Placement {
        self.node_data[node].placement
    }

    #[inline]
    fn is_live(&self, node: NodeId) -> bool {
        self.placement(node) != Placement::Unknown
    }

    #[inline]
    fn depth(&self, block: BlockId) -> u32 {
        self.schedule.block(block).dominator_depth().unwrap_or(0)
    }

    /// Add `node` to `block` and pin it there.
    pub(super) fn fix_node(&mut self, block: BlockId, node: NodeId) {
        self.schedule.add_node(block, node);
        self.update_placement(node, Placement::Fixed);
    }

    /// First block found walking up the control chain from `node`.
    pub(super) fn find_predecessor_block(&self, mut node: NodeId) -> BlockId {
        loop {
            if let Some(block) = self.schedule.block_for_node(node) {
                return block;
            }
            node = self.graph.control_input(node, 0);
        }
    }

    // =========================================================================
    // Phase 1: Control Flow Graph
    // =========================================================================

    fn build_cfg(&mut self) {
        let mut builder = CfgBuilder::new();
        builder.run(self);
        self.scheduled_nodes.resize(self.schedule.block_count(), Vec::new());
        tracing::trace!(blocks = self.schedule.block_count(), "built CFG");
    }

    fn split_critical_edges(&mut self) {
        let end = self.schedule.end();
        for block in self.schedule.block_ids() {
            if block != end && self.schedule.block(block).predecessor_count() > 1 {
                self.stats.split_edges += self.schedule.ensure_split_edge_form(block);
            }
        }
        self.scheduled_nodes.resize(self.schedule.block_count(), Vec::new());
    }

    // =========================================================================
    // Phase 2: Block Order, Loops and Dominators
    // =========================================================================

    fn compute_block_order(&mut self) {
        let back_edges = self.compute_rpo();
        self.compute_loops(&back_edges);
        self.compute_dominators();
        if self.config.propagate_deferred {
            self.schedule.propagate_deferred_mark();
        }
    }

    /// Number the blocks in reverse post-order and return the back edges
    /// as `(tail, header)` pairs.
    fn compute_rpo(&mut self) -> Vec<(BlockId, BlockId)> {
        let count = self.schedule.block_count();
        let start = self.schedule.start();
        let mut visited = BitSet::with_capacity(count);
        let mut on_stack = BitSet::with_capacity(count);
        let mut post_order = Vec::with_capacity(count);
        let mut back_edges = Vec::new();

        let mut stack: Vec<(BlockId, usize)> = vec![(start, 0)];
        visited.insert(start.as_usize());
        on_stack.insert(start.as_usize());
        while let Some(top) = stack.last_mut() {
            let (block, index) = *top;
            let successors = self.schedule.block(block).successors();
            if index < successors.len() {
                top.1 += 1;
                let succ = successors[index];
                if on_stack.contains(succ.as_usize()) {
                    back_edges.push((block, succ));
                } else if visited.insert(succ.as_usize()) {
                    on_stack.insert(succ.as_usize());
                    stack.push((succ, 0));
                }
            } else {
                stack.pop();
                on_stack.remove(block.as_usize());
                post_order.push(block);
            }
        }

        post_order.reverse();
        let end = self.schedule.end();
        if !visited.contains(end.as_usize()) {
            post_order.push(end);
        }
        self.schedule.set_rpo_order(post_order);
        back_edges
    }

    fn compute_loops(&mut self, back_edges: &[(BlockId, BlockId)]) {
        self.loops.clear();
        self.loop_index.clear();
        for block in self.schedule.block_ids() {
            let b = self.schedule.block_mut(block);
            b.is_loop_header = false;
            b.loop_header = None;
            b.loop_depth = 0;
        }

        for &(tail, header) in back_edges {
            let index = match self.loop_index.get(&header) {
                Some(&index) => index,
                None => {
                    let mut members = BitSet::new();
                    members.insert(header.as_usize());
                    self.loops.push(LoopInfo {
                        header,
                        members,
                        outgoing: Vec::new(),
                    });
                    self.loop_index.insert(header, self.loops.len() - 1);
                    self.loops.len() - 1
                }
            };
            let members = &mut self.loops[index].members;
            let mut worklist = vec![tail];
            while let Some(block) = worklist.pop() {
                if self.schedule.block(block).rpo_number().is_none() || !members.insert(block.as_usize()) {
                    continue;
                }
                worklist.extend_from_slice(self.schedule.block(block).predecessors());
            }
        }

        for info in &mut self.loops {
            for member in info.members.iter() {
                let member = BlockId::new(member as u32);
                for &succ in self.schedule.block(member).successors() {
                    if !info.members.contains(succ.as_usize()) && !info.outgoing.contains(&succ) {
                        info.outgoing.push(succ);
                    }
                }
            }
        }

        for block in self.schedule.block_ids() {
            let mut depth = 0;
            let mut innermost: Option<&LoopInfo> = None;
            for info in &self.loops {
                if !info.members.contains(block.as_usize()) {
                    continue;
                }
                depth += 1;
                if info.header != block && innermost.is_none_or(|i| info.members.count() < i.members.count()) {
                    innermost = Some(info);
                }
            }
            let loop_header = innermost.map(|info| info.header);
            let is_header = self.loop_index.contains_key(&block);
            let b = self.schedule.block_mut(block);
            b.loop_depth = depth;
            b.loop_header = loop_header;
            b.is_loop_header = is_header;
        }
        self.stats.loops = self.loops.len();
    }

    fn compute_dominators(&mut self) {
        for block in self.schedule.block_ids() {
            let b = self.schedule.block_mut(block);
            b.dominator = None;
            b.dominator_depth = None;
        }
        let start = self.schedule.start();
        self.schedule.block_mut(start).dominator_depth = Some(0);

        let order = self.schedule.rpo_order().to_vec();
        for &block in order.iter().filter(|&&b| b != start) {
            let mut dominator = None;
            for &pred in self.schedule.block(block).predecessors() {
                // Back edges come from blocks not yet numbered.
                if self.schedule.block(pred).dominator_depth().is_none() {
                    continue;
                }
                dominator = Some(match dominator {
                    None => pred,
                    Some(d) => self.schedule.common_dominator(d, pred),
                });
            }
            let dominator = dominator.unwrap_or(start);
            let depth = self.depth(dominator) + 1;
            let b = self.schedule.block_mut(block);
            b.dominator = Some(dominator);
            b.dominator_depth = Some(depth);
        }
    }

    // =========================================================================
    // Phase 3: Prepare Uses
    // =========================================================================

    fn prepare_uses(&mut self) {
        let graph = self.graph;
        let end = graph.end();
        let mut visited = BitSet::with_capacity(graph.len());
        let mut stack = vec![end];
        visited.insert(end.as_usize());
        self.prepare_node(end);

        while let Some(node) = stack.pop() {
            for (index, &input) in graph.inputs(node).iter().enumerate() {
                if visited.insert(input.as_usize()) {
                    self.prepare_node(input);
                    stack.push(input);
                }
                // Edges from placed nodes never hold anything back.
                if !self.schedule.is_scheduled(node) && !self.is_coupled_control_edge(node, index) {
                    self.increment_unscheduled_use_count(input);
                }
            }
        }
    }

    fn prepare_node(&mut self, node: NodeId) {
        if self.initialize_placement(node) != Placement::Fixed {
            return;
        }
        self.root_nodes.push(node);
        if !self.schedule.is_scheduled(node) {
            let block = if self.graph.opcode(node) == Opcode::Parameter {
                self.schedule.start()
            } else {
                self.schedule.block_of(self.graph.control_input(node, 0))
            };
            self.schedule.add_node(block, node);
        }
    }

    fn initialize_placement(&mut self, node: NodeId) -> Placement {
        if self.placement(node) == Placement::Fixed {
            return Placement::Fixed;
        }
        let placement = match self.graph.opcode(node) {
            Opcode::Parameter => Placement::Fixed,
            Opcode::Phi | Opcode::EffectPhi => {
                let control = self.graph.control_input(node, 0);
                if self.placement(control) == Placement::Fixed {
                    Placement::Fixed
                } else {
                    Placement::Coupled
                }
            }
            _ => Placement::Schedulable,
        };
        self.node_data[node].placement = placement;
        placement
    }

    #[inline]
    fn is_coupled_control_edge(&self, node: NodeId, index: usize) -> bool {
        index == 0 && self.placement(node) == Placement::Coupled
    }

    fn increment_unscheduled_use_count(&mut self, node: NodeId) {
        let node = match self.placement(node) {
            Placement::Fixed => return,
            // Coupled nodes count on their control.
            Placement::Coupled => self.graph.control_input(node, 0),
            _ => node,
        };
        self.node_data[node].unscheduled_count += 1;
    }

    fn decrement_unscheduled_use_count(&mut self, node: NodeId) {
        let node = match self.placement(node) {
            Placement::Fixed => return,
            Placement::Coupled => self.graph.control_input(node, 0),
            _ => node,
        };
        let data = &mut self.node_data[node];
        debug_assert!(data.unscheduled_count > 0, "{node} has no unscheduled uses");
        data.unscheduled_count -= 1;
        if data.unscheduled_count == 0 {
            self.schedule_queue.push_back(node);
        }
    }

    /// Move `node` to `placement`, releasing its inputs.
    pub(super) fn update_placement(&mut self, node: NodeId, placement: Placement) {
        let current = self.placement(node);
        if current == Placement::Unknown {
            // Only control nodes seen by the CFG builder start out unknown.
            debug_assert_eq!(placement, Placement::Fixed);
            self.node_data[node].placement = placement;
            return;
        }

        let graph = self.graph;
        match graph.opcode(node) {
            Opcode::Parameter => unreachable!("parameters are fixed before scheduling"),
            Opcode::Phi | Opcode::EffectPhi => {
                debug_assert_eq!(current, Placement::Coupled);
                debug_assert_eq!(placement, Placement::Fixed);
                let block = self.schedule.block_of(graph.control_input(node, 0));
                self.schedule.add_node(block, node);
            }
            opcode if opcode.is_control() => {
                // Coupled phis follow their control.
                for edge in graph.uses(node) {
                    if self.placement(edge.user) == Placement::Coupled {
                        self.update_placement(edge.user, placement);
                    }
                }
            }
            _ => {
                debug_assert_eq!(current, Placement::Schedulable);
                debug_assert_eq!(placement, Placement::Scheduled);
            }
        }

        for (index, &input) in graph.inputs(node).iter().enumerate() {
            if !(index == 0 && current == Placement::Coupled) {
                self.decrement_unscheduled_use_count(input);
            }
        }
        self.node_data[node].placement = placement;
    }

    // =========================================================================
    // Phase 4: Schedule Early
    // =========================================================================

    fn schedule_early(&mut self, roots: Vec<NodeId>) {
        let graph = self.graph;
        let mut queue: VecDeque<NodeId> = roots.into();
        while let Some(node) = queue.pop_front() {
            if self.placement(node) == Placement::Fixed {
                self.node_data[node].minimum_block = self.schedule.block_of(node);
            }
            let minimum = self.node_data[node].minimum_block;
            if minimum == self.schedule.start() {
                continue;
            }
            for edge in graph.uses(node) {
                if self.is_live(edge.user) {
                    self.propagate_minimum_position(minimum, edge.user, &mut queue);
                }
            }
        }
    }

    fn propagate_minimum_position(&mut self, block: BlockId, node: NodeId, queue: &mut VecDeque<NodeId>) {
        match self.placement(node) {
            Placement::Fixed => return,
            Placement::Coupled => {
                let control = self.graph.control_input(node, 0);
                self.propagate_minimum_position(block, control, queue);
            }
            _ => {}
        }
        let current = self.node_data[node].minimum_block;
        debug_assert!(
            self.schedule.dominates(block, current) || self.schedule.dominates(current, block),
            "{node}: early positions {block} and {current} are unrelated"
        );
        if self.depth(block) > self.depth(current) {
            self.node_data[node].minimum_block = block;
            queue.push_back(node);
        }
    }

    // =========================================================================
    // Phase 5: Schedule Late
    // =========================================================================

    fn schedule_late(&mut self) {
        for i in 0..self.root_nodes.len() {
            let root = self.root_nodes[i];
            self.process_queue(root);
        }
    }

    fn process_queue(&mut self, root: NodeId) {
        let graph = self.graph;
        for &input in graph.inputs(root) {
            let node = if self.placement(input) == Placement::Coupled {
                graph.control_input(input, 0)
            } else {
                input
            };
            if self.node_data[node].unscheduled_count != 0 {
                continue;
            }
            self.schedule_queue.push_back(node);
            while let Some(next) = self.schedule_queue.pop_front() {
                self.visit_late(next);
            }
        }
    }

    fn visit_late(&mut self, node: NodeId) {
        if self.schedule.is_scheduled(node) {
            return;
        }
        debug_assert_eq!(self.placement(node), Placement::Schedulable);

        let minimum = self.node_data[node].minimum_block;
        let mut block = self.common_dominator_of_uses(node).unwrap_or(minimum);
        debug_assert!(
            self.schedule.dominates(minimum, block),
            "{node}: early block {minimum} does not dominate late block {block}"
        );

        if self.config.hoist_out_of_loops {
            let late = block;
            block = if can_trap(self.graph.opcode(node)) {
                self.guarded_hoist(late, minimum)
            } else {
                self.shallowest_dominator(late, minimum)
            };
            if block != late {
                tracing::trace!(%node, from = %late, to = %block, "hoisted out of loop");
                self.stats.hoisted += 1;
            }
        }

        match self.graph.opcode(node) {
            Opcode::Merge | Opcode::Loop => self.fuse_floating_control(block, node),
            _ => self.schedule_node(block, node),
        }
    }

    fn schedule_node(&mut self, block: BlockId, node: NodeId) {
        self.schedule.plan_node(block, node);
        self.scheduled_nodes[block.as_usize()].push(node);
        self.update_placement(node, Placement::Scheduled);
    }

    /// Block with the smallest loop depth on the dominator chain from `late`
    /// up to `minimum`. Ties keep the block closest to `late`.
    fn shallowest_dominator(&self, late: BlockId, minimum: BlockId) -> BlockId {
        let mut best = late;
        let mut best_depth = self.schedule.block(late).loop_depth();
        let mut current = late;
        while current != minimum && best_depth > 0 {
            let Some(dominator) = self.schedule.block(current).dominator() else {
                break;
            };
            current = dominator;
            let depth = self.schedule.block(current).loop_depth();
            if depth < best_depth {
                best = current;
                best_depth = depth;
            }
        }
        best
    }

    /// Hoisting for nodes that may trap: a loop is only left when the
    /// candidate block runs on every trip through it.
    fn guarded_hoist(&self, late: BlockId, minimum: BlockId) -> BlockId {
        let minimum_depth = self.depth(minimum);
        let mut block = late;
        while let Some(hoist) = self.hoist_block(block) {
            if self.depth(hoist) < minimum_depth {
                break;
            }
            block = hoist;
        }
        block
    }

    /// Block just outside the innermost loop around `block`, if code there
    /// runs on every trip that reaches `block`.
    fn hoist_block(&self, block: BlockId) -> Option<BlockId> {
        if self.loops.is_empty() {
            return None;
        }
        let b = self.schedule.block(block);
        if b.is_loop_header() {
            return b.dominator();
        }
        let header = b.loop_header()?;
        let info = &self.loops[*self.loop_index.get(&header)?];
        // A loop exit not dominated by `block` would make the hoisted code
        // run on paths that skipped it.
        if info.outgoing.iter().all(|&out| self.schedule.dominates(block, out)) {
            self.schedule.block(header).dominator()
        } else {
            None
        }
    }

    fn common_dominator_of_uses(&self, node: NodeId) -> Option<BlockId> {
        let mut block = None;
        for &edge in self.graph.uses(node) {
            if !self.is_live(edge.user) {
                continue;
            }
            let Some(use_block) = self.block_for_use(node, edge) else {
                continue;
            };
            block = Some(match block {
                None => use_block,
                Some(b) => self.schedule.common_dominator(b, use_block),
            });
        }
        block
    }

    fn block_for_use(&self, node: NodeId, edge: Use) -> Option<BlockId> {
        let user = edge.user;
        match self.graph.opcode(user) {
            Opcode::Phi | Opcode::EffectPhi => match self.placement(user) {
                Placement::Coupled => return self.common_dominator_of_uses(user),
                // A phi input is used at the end of the matching predecessor.
                Placement::Fixed if edge.index > 0 => {
                    let merge = self.graph.control_input(user, 0);
                    let input = self.graph.control_input(merge, edge.index as usize - 1);
                    return Some(self.find_predecessor_block(input));
                }
                _ => {}
            },
            Opcode::Merge | Opcode::Loop if self.placement(user) == Placement::Fixed => {
                return Some(self.find_predecessor_block(node));
            }
            _ => {}
        }
        self.schedule.block_for_node(user)
    }

    // =========================================================================
    // Floating Control
    // =========================================================================

    fn fuse_floating_control(&mut self, block: BlockId, node: NodeId) {
        tracing::debug!(merge = %node, %block, "fusing floating control");
        let mut builder = CfgBuilder::new();
        builder.run_region(self, block, node);
        self.compute_block_order();

        let graph = self.graph;
        let mut roots = builder.control.clone();
        for &control in &builder.control {
            for user in graph.users(control) {
                if graph.opcode(user).is_phi() && self.is_live(user) {
                    roots.push(user);
                }
            }
        }
        self.schedule_early(roots);

        self.scheduled_nodes.resize(self.schedule.block_count(), Vec::new());
        let merge_block = self.schedule.block_of(node);
        self.move_planned_nodes(block, merge_block);
        self.stats.fused_regions += 1;
    }

    fn move_planned_nodes(&mut self, from: BlockId, to: BlockId) {
        let nodes = std::mem::take(&mut self.scheduled_nodes[from.as_usize()]);
        for &node in &nodes {
            self.schedule.set_block_for_node(to, node);
        }
        self.scheduled_nodes[to.as_usize()].extend(nodes);
    }

    // =========================================================================
    // Phase 6: Seal
    // =========================================================================

    fn seal_final_schedule(&mut self) {
        for (index, nodes) in self.scheduled_nodes.iter().enumerate() {
            let block = BlockId::new(index as u32);
            for &node in nodes.iter().rev() {
                self.schedule.add_node(block, node);
            }
        }
    }
}

/// Division and remainder fault on a zero divisor.
#[inline]
fn can_trap(opcode: Opcode) -> bool {
    matches!(
        opcode.arith_parts(),
        Some((BinaryOp::Div | BinaryOp::Mod, _))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::operators::BranchHint;
    use crate::ir::types::NodeType;
    use crate::schedule::block::Control;

    fn schedule(graph: &mut Graph) -> (Schedule, SchedulerStats) {
        Scheduler::compute_schedule(graph, &SchedulerConfig::default())
    }

    fn position(schedule: &Schedule, node: NodeId) -> usize {
        let block = schedule.block(schedule.block_of(node));
        block
            .nodes()
            .iter()
            .position(|&n| n == node)
            .unwrap_or_else(|| panic!("{node} not in its block"))
    }

    #[test]
    fn test_straight_line() {
        let mut g = Graph::new();
        let start = g.start();
        let p = g.parameter(0, NodeType::Int32);
        let k = g.int32_constant(3);
        let add = g.binary(Opcode::Int32Add, p, k);
        let ret = g.return_value(start, add, start);

        let (s, stats) = schedule(&mut g);
        let entry = s.start();
        for node in [start, p, k, add] {
            assert_eq!(s.block_for_node(node), Some(entry), "{node}");
        }
        assert_eq!(s.block(entry).control(), Control::Return);
        assert_eq!(s.block(entry).control_input(), Some(ret));
        assert_eq!(s.block(entry).successors(), &[s.end()]);
        assert_eq!(s.block_for_node(g.end()), Some(s.end()));
        assert_eq!(s.rpo_order(), &[entry, s.end()]);
        assert!(position(&s, start) < position(&s, p));
        assert!(position(&s, k) < position(&s, add));
        assert!(position(&s, p) < position(&s, add));
        assert_eq!(stats.blocks, 2);
        assert_eq!(stats.fused_regions, 0);
    }

    #[test]
    fn test_diamond_places_phi_inputs_in_predecessors() {
        let mut g = Graph::new();
        let start = g.start();
        let p = g.parameter(0, NodeType::Int32);
        let branch = g.branch(p, start, BranchHint::False);
        let t = g.if_true(branch);
        let f = g.if_false(branch);
        let merge = g.merge(&[t, f]);
        let k1 = g.int32_constant(1);
        let k2 = g.int32_constant(2);
        let phi = g.phi(NodeType::Int32, merge, &[k1, k2]);
        let ret = g.return_value(merge, phi, start);

        let (s, _) = schedule(&mut g);
        let (tb, fb, mb) = (s.block_of(t), s.block_of(f), s.block_of(merge));
        assert_eq!(s.block(s.start()).control(), Control::Branch);
        assert_eq!(s.block(s.start()).control_input(), Some(branch));
        assert_eq!(s.block(s.start()).successors(), &[tb, fb]);
        assert_eq!(s.block(mb).predecessors(), &[tb, fb]);
        assert_eq!(s.block_of(k1), tb);
        assert_eq!(s.block_of(k2), fb);
        assert_eq!(s.block_of(phi), mb);
        assert_eq!(s.block_of(ret), mb);
        assert_eq!(s.block(mb).dominator(), Some(s.start()));

        // `BranchHint::False` makes the true side cold.
        assert!(s.block(tb).deferred());
        assert!(!s.block(fb).deferred());
        assert!(!s.block(mb).deferred());
    }

    /// `for (i = 0; i < p * 10; i += 1) {}; return i`
    fn counting_loop(g: &mut Graph) -> [NodeId; 8] {
        let start = g.start();
        let p = g.parameter(0, NodeType::Int32);
        let zero = g.int32_constant(0);
        let ten = g.int32_constant(10);
        let one = g.int32_constant(1);
        let header = g.loop_header(start);
        let i = g.phi(NodeType::Int32, header, &[zero]);
        let limit = g.binary(Opcode::Int32Mul, p, ten);
        let cmp = g.binary(Opcode::Int32LessThan, i, limit);
        let branch = g.branch(cmp, header, BranchHint::True);
        let body = g.if_true(branch);
        let exit = g.if_false(branch);
        let next = g.binary(Opcode::Int32Add, i, one);
        g.append_input(header, body);
        g.append_input(i, next);
        g.return_value(exit, i, start);
        [header, i, limit, cmp, body, exit, next, one]
    }

    #[test]
    fn test_loop_structure_and_hoisting() {
        let mut g = Graph::new();
        let [header, i, limit, cmp, body, exit, next, one] = counting_loop(&mut g);

        let (s, stats) = schedule(&mut g);
        let (hb, bb, xb) = (s.block_of(header), s.block_of(body), s.block_of(exit));
        assert!(s.block(hb).is_loop_header());
        assert_eq!(s.block(hb).loop_depth(), 1);
        assert_eq!(s.block(bb).loop_depth(), 1);
        assert_eq!(s.block(bb).loop_header(), Some(hb));
        assert_eq!(s.block(xb).loop_depth(), 0);
        assert_eq!(s.block(hb).predecessors(), &[s.start(), bb]);
        assert_eq!(stats.loops, 1);

        assert_eq!(s.block_of(i), hb);
        assert_eq!(s.block_of(cmp), hb);
        assert_eq!(s.block_of(next), bb);
        // Loop invariant, computed once before the loop.
        assert_eq!(s.block_of(limit), s.start());
        assert_eq!(s.block_of(one), s.start());
        assert_eq!(stats.hoisted, 2);

        // The exit is cold under `BranchHint::True`.
        assert!(s.block(xb).deferred());
    }

    /// `k = p <op> 10; i = 0; while (i < p) i += k; return i`
    fn while_loop_using(g: &mut Graph, op: Opcode) -> [NodeId; 4] {
        let start = g.start();
        let p = g.parameter(0, NodeType::Int32);
        let ten = g.int32_constant(10);
        let k = g.binary(op, p, ten);
        let zero = g.int32_constant(0);
        let header = g.loop_header(start);
        let i = g.phi(NodeType::Int32, header, &[zero]);
        let cmp = g.binary(Opcode::Int32LessThan, i, p);
        let branch = g.branch(cmp, header, BranchHint::True);
        let body = g.if_true(branch);
        let exit = g.if_false(branch);
        let next = g.binary(Opcode::Int32Add, i, k);
        g.append_input(header, body);
        g.append_input(i, next);
        g.return_value(exit, i, start);
        [header, body, k, next]
    }

    #[test]
    fn test_invariant_used_in_loop_body_is_hoisted() {
        let mut g = Graph::new();
        let [header, body, k, next] = while_loop_using(&mut g, Opcode::Int32Mul);

        let (s, stats) = schedule(&mut g);
        let bb = s.block_of(body);
        assert_ne!(bb, s.block_of(header));
        assert_eq!(s.block(bb).loop_depth(), 1);
        assert_eq!(s.block_of(next), bb);
        assert_eq!(s.block(s.block_of(k)).loop_depth(), 0);
        assert_eq!(s.block_of(k), s.start());
        assert_eq!(stats.hoisted, 1);
    }

    #[test]
    fn test_division_stays_behind_the_loop_test() {
        let mut g = Graph::new();
        let [_, body, k, _] = while_loop_using(&mut g, Opcode::Int32Div);

        // Hoisting would divide even when the loop runs zero times.
        let (s, stats) = schedule(&mut g);
        assert_eq!(s.block_of(k), s.block_of(body));
        assert_eq!(stats.hoisted, 0);
    }

    #[test]
    fn test_hoisting_can_be_disabled() {
        let mut g = Graph::new();
        let [header, _, limit, ..] = counting_loop(&mut g);
        let config = SchedulerConfig {
            hoist_out_of_loops: false,
            ..SchedulerConfig::default()
        };
        let (s, stats) = Scheduler::compute_schedule(&mut g, &config);
        assert_eq!(s.block_of(limit), s.block_of(header));
        assert_eq!(stats.hoisted, 0);
    }

    #[test]
    fn test_floating_diamond_is_fused() {
        let mut g = Graph::new();
        let start = g.start();
        let p = g.parameter(0, NodeType::Int32);
        let branch = g.branch(p, start, BranchHint::True);
        let t = g.if_true(branch);
        let f = g.if_false(branch);
        let merge = g.merge(&[t, f]);
        let k1 = g.int32_constant(1);
        let k2 = g.int32_constant(2);
        let phi = g.phi(NodeType::Int32, merge, &[k1, k2]);
        // Control goes straight from start to the return.
        let ret = g.return_value(start, phi, start);

        let (s, stats) = schedule(&mut g);
        assert_eq!(stats.fused_regions, 1);

        let entry = s.start();
        let mb = s.block_of(merge);
        assert_ne!(mb, entry);
        assert_eq!(s.block(entry).control(), Control::Branch);
        assert_eq!(s.block(entry).control_input(), Some(branch));
        assert_eq!(s.block_of(ret), mb);
        assert_eq!(s.block(mb).control(), Control::Return);
        assert_eq!(s.block(mb).successors(), &[s.end()]);
        assert_eq!(s.block_of(phi), mb);
        assert_eq!(s.block_of(k1), s.block_of(t));
        assert_eq!(s.block_of(k2), s.block_of(f));
        assert!(s.block(s.block_of(f)).deferred());
        assert_eq!(s.block(mb).dominator(), Some(entry));
        assert_eq!(s.rpo_order().first(), Some(&entry));
        assert_eq!(s.rpo_order().len(), 5);
    }

    #[test]
    fn test_redundant_phi_is_removed() {
        let mut g = Graph::new();
        let start = g.start();
        let p = g.parameter(0, NodeType::Int32);
        let branch = g.branch(p, start, BranchHint::None);
        let t = g.if_true(branch);
        let f = g.if_false(branch);
        let merge = g.merge(&[t, f]);
        let k = g.int32_constant(9);
        let phi = g.phi(NodeType::Int32, merge, &[k, k]);
        let ret = g.return_value(merge, phi, start);

        let (s, stats) = schedule(&mut g);
        assert_eq!(stats.eliminated_phis, 1);
        assert!(g.is_dead(phi));
        assert_eq!(g.value_input(ret, 0), k);
        assert!(!s.block(s.block_of(merge)).nodes().contains(&phi));
        // Both predecessors use `k`, so it lands in their dominator.
        assert_eq!(s.block_of(k), s.start());
    }

    #[test]
    fn test_phi_elimination_can_be_disabled() {
        let mut g = Graph::new();
        let start = g.start();
        let merge = g.merge(&[start]);
        let k = g.int32_constant(9);
        let phi = g.phi(NodeType::Int32, merge, &[k]);
        g.return_value(merge, phi, start);

        let config = SchedulerConfig {
            eliminate_redundant_phis: false,
            ..SchedulerConfig::default()
        };
        let (s, stats) = Scheduler::compute_schedule(&mut g, &config);
        assert_eq!(stats.eliminated_phis, 0);
        assert!(!g.is_dead(phi));
        assert_eq!(s.block_of(phi), s.block_of(merge));
    }
}
