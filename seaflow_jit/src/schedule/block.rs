//! Basic blocks of a schedule.

use std::fmt;

use smallvec::SmallVec;

use crate::ir::arena::Id;
use crate::ir::node::NodeId;

/// Block identifier.
pub type BlockId = Id<BasicBlock>;

/// Predecessor/successor list. Most blocks have one or two.
pub type BlockList = SmallVec<[BlockId; 2]>;

// =============================================================================
// Control Kind
// =============================================================================

/// How a block ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Control {
    /// Not yet terminated.
    #[default]
    None,
    /// Unconditional jump to the single successor.
    Goto,
    /// Two-way branch; successors are `[if_true, if_false]`.
    Branch,
    Return,
    Throw,
    Deoptimize,
    TailCall,
}

impl Control {
    /// Whether the block leaves the function.
    #[inline]
    pub fn is_exit(self) -> bool {
        matches!(
            self,
            Control::Return | Control::Throw | Control::Deoptimize | Control::TailCall
        )
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Control::None => "none",
            Control::Goto => "goto",
            Control::Branch => "branch",
            Control::Return => "return",
            Control::Throw => "throw",
            Control::Deoptimize => "deoptimize",
            Control::TailCall => "tail-call",
        })
    }
}

// =============================================================================
// Basic Block
// =============================================================================

/// A basic block: a straight-line node sequence ending in one control
/// transfer.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    id: BlockId,
    pub(crate) nodes: Vec<NodeId>,
    pub(crate) successors: BlockList,
    pub(crate) predecessors: BlockList,
    pub(crate) control: Control,
    /// Node that ends the block (`Branch`, `Return`, ...).
    pub(crate) control_input: Option<NodeId>,
    pub(crate) rpo_number: Option<u32>,
    pub(crate) deferred: bool,

    // Loop structure.
    pub(crate) is_loop_header: bool,
    /// Innermost loop containing this block, not counting a loop it heads.
    pub(crate) loop_header: Option<BlockId>,
    pub(crate) loop_depth: u32,

    // Dominator tree.
    pub(crate) dominator: Option<BlockId>,
    pub(crate) dominator_depth: Option<u32>,
}

impl BasicBlock {
    pub(crate) fn new(id: BlockId) -> Self {
        BasicBlock {
            id,
            nodes: Vec::new(),
            successors: BlockList::new(),
            predecessors: BlockList::new(),
            control: Control::None,
            control_input: None,
            rpo_number: None,
            deferred: false,
            is_loop_header: false,
            loop_header: None,
            loop_depth: 0,
            dominator: None,
            dominator_depth: None,
        }
    }

    #[inline]
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Nodes in execution order, excluding the control input.
    #[inline]
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn successors(&self) -> &[BlockId] {
        &self.successors
    }

    #[inline]
    pub fn predecessors(&self) -> &[BlockId] {
        &self.predecessors
    }

    #[inline]
    pub fn successor_count(&self) -> usize {
        self.successors.len()
    }

    #[inline]
    pub fn predecessor_count(&self) -> usize {
        self.predecessors.len()
    }

    #[inline]
    pub fn control(&self) -> Control {
        self.control
    }

    #[inline]
    pub fn control_input(&self) -> Option<NodeId> {
        self.control_input
    }

    /// Position in the reverse post-order, once computed.
    #[inline]
    pub fn rpo_number(&self) -> Option<u32> {
        self.rpo_number
    }

    /// Cold path hint for code layout.
    #[inline]
    pub fn deferred(&self) -> bool {
        self.deferred
    }

    pub fn set_deferred(&mut self, deferred: bool) {
        self.deferred = deferred;
    }

    #[inline]
    pub fn is_loop_header(&self) -> bool {
        self.is_loop_header
    }

    #[inline]
    pub fn loop_header(&self) -> Option<BlockId> {
        self.loop_header
    }

    /// Number of loops containing this block (a header counts its own loop).
    #[inline]
    pub fn loop_depth(&self) -> u32 {
        self.loop_depth
    }

    /// Immediate dominator; `None` for the start block.
    #[inline]
    pub fn dominator(&self) -> Option<BlockId> {
        self.dominator
    }

    /// Depth in the dominator tree; the start block is 0.
    #[inline]
    pub fn dominator_depth(&self) -> Option<u32> {
        self.dominator_depth
    }

    /// Index of `pred` among the predecessors.
    pub fn predecessor_index(&self, pred: BlockId) -> Option<usize> {
        self.predecessors.iter().position(|&p| p == pred)
    }
}
