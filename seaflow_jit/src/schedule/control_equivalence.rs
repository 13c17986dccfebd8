//! Control equivalence classes.
//!
//! Two control nodes are equivalent when every path through one also passes
//! through the other (each dominates the other in the control flow graph and
//! post-dominates it too). The scheduler uses this to find where a floating
//! control region starts: the entry of a diamond is the control node that
//! shares a class with the diamond's merge.
//!
//! Classes come from the cycle-equivalence algorithm of Johnson, Pearson and
//! Pingali: an undirected depth-first walk over control edges that keeps, per
//! node, the list of "brackets" (back edges) spanning it. Nodes spanned by the
//! same topmost bracket set at the same list size are equivalent. An
//! artificial back edge to `End` closes the graph into a strongly connected
//! one.

use crate::ir::arena::SecondaryMap;
use crate::ir::graph::Graph;
use crate::ir::node::{Node, NodeId};

/// Direction in which the walk reached a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Input,
    Use,
}

#[derive(Debug, Clone, Copy)]
struct Bracket {
    direction: Direction,
    /// Class handed out when the list last had `recent_size` entries.
    recent_class: Option<u32>,
    recent_size: usize,
    to: NodeId,
}

#[derive(Debug, Clone, Default)]
struct NodeData {
    class: Option<u32>,
    brackets: Vec<Bracket>,
    visited: bool,
    on_stack: bool,
    participates: bool,
}

struct DfsEntry {
    node: NodeId,
    parent: Option<NodeId>,
    direction: Direction,
    next_input: usize,
    next_use: usize,
}

/// Assigns control equivalence classes to the control nodes above an exit.
#[derive(Debug, Default)]
pub struct ControlEquivalence {
    data: SecondaryMap<Node, NodeData>,
    class_count: u32,
}

impl ControlEquivalence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify every control node `exit` reaches over control inputs.
    /// Nodes classified by an earlier run keep their classes.
    pub fn run(&mut self, graph: &Graph, exit: NodeId) {
        if !self.data[exit].participates || self.data[exit].class.is_none() {
            self.determine_participation(graph, exit);
            self.run_undirected_dfs(graph, exit);
        }
    }

    /// Equivalence class of `node`, if it has been classified.
    #[inline]
    pub fn class_of(&self, node: NodeId) -> Option<u32> {
        self.data[node].class
    }

    /// Number of classes handed out so far.
    #[inline]
    pub fn class_count(&self) -> u32 {
        self.class_count
    }

    fn determine_participation(&mut self, graph: &Graph, exit: NodeId) {
        let mut queue = std::collections::VecDeque::new();
        self.enqueue_participant(&mut queue, exit);
        while let Some(node) = queue.pop_front() {
            for &input in graph.node(node).control_inputs() {
                self.enqueue_participant(&mut queue, input);
            }
        }
    }

    fn enqueue_participant(&mut self, queue: &mut std::collections::VecDeque<NodeId>, node: NodeId) {
        let data = &mut self.data[node];
        if !data.participates {
            *data = NodeData {
                participates: true,
                ..NodeData::default()
            };
            queue.push_back(node);
        }
    }

    fn run_undirected_dfs(&mut self, graph: &Graph, exit: NodeId) {
        let mut stack = Vec::new();
        self.push(&mut stack, exit, None, Direction::Input);

        while let Some(entry) = stack.last_mut() {
            let node = entry.node;
            let inputs = graph.inputs(node);
            let uses = graph.uses(node);
            let control_in = graph.op(node).control_in as usize;

            if entry.direction == Direction::Input {
                if entry.next_input < inputs.len() {
                    let index = entry.next_input;
                    entry.next_input += 1;
                    if index < control_in {
                        let parent = entry.parent;
                        self.visit_edge(&mut stack, node, parent, inputs[index], Direction::Input);
                    }
                    continue;
                }
                if entry.next_use < uses.len() {
                    entry.direction = Direction::Use;
                    self.visit_mid(graph, node, Direction::Input);
                    continue;
                }
            }

            if entry.direction == Direction::Use {
                if entry.next_use < uses.len() {
                    let edge = uses[entry.next_use];
                    entry.next_use += 1;
                    if (edge.index as usize) < graph.op(edge.user).control_in as usize {
                        let parent = entry.parent;
                        self.visit_edge(&mut stack, node, parent, edge.user, Direction::Use);
                    }
                    continue;
                }
                if entry.next_input < inputs.len() {
                    entry.direction = Direction::Input;
                    self.visit_mid(graph, node, Direction::Use);
                    continue;
                }
            }

            // Every edge seen; pop.
            let Some(entry) = stack.pop() else { break };
            if self.data[node].class.is_none() {
                self.visit_mid(graph, node, entry.direction);
            }
            let data = &mut self.data[node];
            data.on_stack = false;
            data.visited = true;
            self.visit_post(node, entry.parent, entry.direction);
        }
    }

    /// Follow an edge from `node` to `next` during the walk.
    fn visit_edge(
        &mut self,
        stack: &mut Vec<DfsEntry>,
        node: NodeId,
        parent: Option<NodeId>,
        next: NodeId,
        direction: Direction,
    ) {
        let data = &self.data[next];
        if !data.participates || data.visited {
            return;
        }
        if data.on_stack {
            if Some(next) != parent {
                self.add_backedge(node, next, direction);
            }
        } else {
            self.push(stack, next, Some(node), direction);
        }
    }

    fn push(&mut self, stack: &mut Vec<DfsEntry>, node: NodeId, parent: Option<NodeId>, direction: Direction) {
        self.data[node].on_stack = true;
        stack.push(DfsEntry {
            node,
            parent,
            direction,
            next_input: 0,
            next_use: 0,
        });
    }

    fn visit_mid(&mut self, graph: &Graph, node: NodeId, direction: Direction) {
        delete_brackets(&mut self.data[node].brackets, node, direction);
        if self.data[node].brackets.is_empty() {
            self.add_backedge(node, graph.end(), Direction::Input);
        }
        let size = self.data[node].brackets.len();
        let Some(recent) = self.data[node].brackets.last_mut() else {
            return;
        };
        if recent.recent_size != size {
            recent.recent_size = size;
            recent.recent_class = Some(self.class_count);
            self.class_count += 1;
        }
        let class = recent.recent_class;
        self.data[node].class = class;
    }

    fn visit_post(&mut self, node: NodeId, parent: Option<NodeId>, direction: Direction) {
        let mut brackets = std::mem::take(&mut self.data[node].brackets);
        delete_brackets(&mut brackets, node, direction);
        match parent {
            Some(parent) => self.data[parent].brackets.append(&mut brackets),
            None => self.data[node].brackets = brackets,
        }
    }

    fn add_backedge(&mut self, from: NodeId, to: NodeId, direction: Direction) {
        self.data[from].brackets.push(Bracket {
            direction,
            recent_class: None,
            recent_size: 0,
            to,
        });
    }
}

/// Drop the brackets ending at `to` that were opened from the other side.
fn delete_brackets(brackets: &mut Vec<Bracket>, to: NodeId, direction: Direction) {
    brackets.retain(|b| !(b.to == to && b.direction != direction));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::operators::BranchHint;
    use crate::ir::types::NodeType;

    #[test]
    fn test_diamond_classes() {
        let mut g = Graph::new();
        let start = g.start();
        let p = g.parameter(0, NodeType::Int32);
        let branch = g.branch(p, start, BranchHint::None);
        let t = g.if_true(branch);
        let f = g.if_false(branch);
        let merge = g.merge(&[t, f]);
        g.return_value(merge, p, start);

        let mut ce = ControlEquivalence::new();
        ce.run(&g, merge);

        let class = ce.class_of(merge);
        assert!(class.is_some());
        assert_eq!(ce.class_of(branch), class);
        assert_eq!(ce.class_of(start), class);
        assert_ne!(ce.class_of(t), class);
        assert_ne!(ce.class_of(f), class);
        assert_ne!(ce.class_of(t), ce.class_of(f));
        assert!(ce.class_of(t).is_some() && ce.class_of(f).is_some());
        // The parameter is not a control node.
        assert_eq!(ce.class_of(p), None);
    }

    #[test]
    fn test_straight_line_is_one_class() {
        let mut g = Graph::new();
        let start = g.start();
        let p = g.parameter(0, NodeType::Int32);
        let merge = g.merge(&[start]);
        g.return_value(merge, p, start);

        let mut ce = ControlEquivalence::new();
        ce.run(&g, merge);
        assert!(ce.class_of(merge).is_some());
        assert_eq!(ce.class_of(start), ce.class_of(merge));
    }

    #[test]
    fn test_rerun_keeps_classes() {
        let mut g = Graph::new();
        let start = g.start();
        let p = g.parameter(0, NodeType::Int32);
        let branch = g.branch(p, start, BranchHint::None);
        let t = g.if_true(branch);
        let f = g.if_false(branch);
        let merge = g.merge(&[t, f]);
        g.return_value(merge, p, start);

        let mut ce = ControlEquivalence::new();
        ce.run(&g, merge);
        let before = (ce.class_of(t), ce.class_of(merge), ce.class_count());
        ce.run(&g, merge);
        assert_eq!(before, (ce.class_of(t), ce.class_of(merge), ce.class_count()));
    }

    #[test]
    fn test_run_from_end_closes_the_graph() {
        let mut g = Graph::new();
        let start = g.start();
        let p = g.parameter(0, NodeType::Int32);
        let b1 = g.branch(p, start, BranchHint::None);
        let t1 = g.if_true(b1);
        let f1 = g.if_false(b1);
        let m1 = g.merge(&[t1, f1]);
        let b2 = g.branch(p, m1, BranchHint::None);
        let t2 = g.if_true(b2);
        let f2 = g.if_false(b2);
        let m2 = g.merge(&[t2, f2]);
        let ret = g.return_value(m2, p, start);

        let mut ce = ControlEquivalence::new();
        ce.run(&g, g.end());

        // Every path runs the spine, `End` included.
        let spine = ce.class_of(start);
        assert!(spine.is_some());
        for node in [b1, m1, b2, m2, ret, g.end()] {
            assert_eq!(ce.class_of(node), spine, "{node}");
        }
        let arms = [t1, f1, t2, f2].map(|n| ce.class_of(n));
        for (i, class) in arms.iter().enumerate() {
            assert!(class.is_some());
            assert_ne!(*class, spine);
            assert!(!arms[i + 1..].contains(class));
        }
        assert_eq!(ce.class_count(), 5);
    }
}
