//! The unit of work handed from bytecode generation to the JIT.

use crate::function::{FunctionId, FunctionInfo};
use crate::instruction::{Instruction, Register};
use rustc_hash::FxHashMap;

/// Metadata for an inlined call that starts at a path position.
///
/// From that position on, registers belong to `function` and are rebased by
/// `local_base` until the callee executes `Return`, which writes the value
/// into `result` of the caller frame and resumes the caller numbering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationInfo {
    /// The callee that becomes active.
    pub function: FunctionId,
    /// Nesting depth of the callee (the root function is depth 0).
    pub depth: u16,
    /// First frame slot used by the callee's registers.
    pub local_base: u16,
    /// Caller registers copied into the callee's parameters, in order.
    pub arguments: Vec<Register>,
    /// Caller register that receives the callee's return value.
    pub result: Option<Register>,
}

/// Everything the graph builder consumes for one compilation.
#[derive(Debug, Clone)]
pub struct CompilationInfo {
    /// The function being compiled (depth 0).
    pub function: FunctionId,
    /// Metadata for the root function and every inlined callee.
    pub functions: FxHashMap<FunctionId, FunctionInfo>,
    /// Linear sequence of decoded instructions.
    pub path: Vec<Instruction>,
    /// `pcs[i]` is the original program counter of `path[i]`.
    pub pcs: Vec<u32>,
    /// Inlined calls keyed by the path position where they begin.
    pub invocations: FxHashMap<u32, InvocationInfo>,
}

impl CompilationInfo {
    /// Create compilation info for a root function with an empty path.
    pub fn new(root: FunctionInfo) -> Self {
        let function = root.id;
        let mut functions = FxHashMap::default();
        functions.insert(function, root);
        Self {
            function,
            functions,
            path: Vec::new(),
            pcs: Vec::new(),
            invocations: FxHashMap::default(),
        }
    }

    /// Metadata of the root function.
    pub fn root(&self) -> Option<&FunctionInfo> {
        self.functions.get(&self.function)
    }

    /// Metadata of any function on the path.
    pub fn function_info(&self, id: FunctionId) -> Option<&FunctionInfo> {
        self.functions.get(&id)
    }

    /// Inlined call starting at `position`, if any.
    pub fn invocation_at(&self, position: u32) -> Option<&InvocationInfo> {
        self.invocations.get(&position)
    }

    /// Original program counter of a path position.
    pub fn pc_at(&self, position: u32) -> Option<u32> {
        self.pcs.get(position as usize).copied()
    }

    /// Number of instructions on the path.
    pub fn len(&self) -> usize {
        self.path.len()
    }

    /// Whether the path is empty.
    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    /// Number of frame slots needed to hold every active frame at once.
    pub fn frame_slot_count(&self) -> usize {
        let root = self
            .root()
            .map(|info| info.register_count as usize)
            .unwrap_or(0);
        self.invocations
            .values()
            .filter_map(|inv| {
                self.function_info(inv.function)
                    .map(|info| inv.local_base as usize + info.register_count as usize)
            })
            .fold(root, usize::max)
    }
}
