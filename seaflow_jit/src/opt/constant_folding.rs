//! Constant folding for integer arithmetic.
//!
//! Folds `Add/Sub/Mul/Div/Mod` at the four integer widths when both value
//! inputs are constants of that width. Results wrap at the declared width
//! (two's complement for the signed kinds, so `i32::MIN / -1` is `i32::MIN`
//! and the remainder is `0`). A zero divisor is left alone for the lowering
//! to turn into a runtime trap.

use seaflow_bytecode::{BinaryOp, Width};

use super::{Editor, Reducer, Reduction};
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::{Constant8Value, Constant32Value, Opcode};

/// Evaluate `$op` on two integers of one primitive type, wrapping.
/// `None` for division or modulo by zero.
macro_rules! wrapping_eval {
    ($op:expr, $a:expr, $b:expr) => {
        match $op {
            BinaryOp::Add => Some($a.wrapping_add($b)),
            BinaryOp::Sub => Some($a.wrapping_sub($b)),
            BinaryOp::Mul => Some($a.wrapping_mul($b)),
            BinaryOp::Div | BinaryOp::Mod if $b == 0 => None,
            BinaryOp::Div => Some($a.wrapping_div($b)),
            BinaryOp::Mod => Some($a.wrapping_rem($b)),
        }
    };
}

/// Replaces arithmetic on constants with a fresh constant.
#[derive(Debug, Default)]
pub struct ConstantFoldingReducer {
    folded: usize,
}

impl ConstantFoldingReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes folded so far.
    #[inline]
    pub fn folded(&self) -> usize {
        self.folded
    }

    fn fold(graph: &mut Graph, op: BinaryOp, width: Width, lhs: NodeId, rhs: NodeId) -> Option<NodeId> {
        match width {
            Width::I8 | Width::U8 => {
                let a = constant8(graph, lhs)?;
                let b = constant8(graph, rhs)?;
                Some(if width.is_signed() {
                    let value = wrapping_eval!(op, a.as_i8(), b.as_i8())?;
                    graph.int8_constant(value)
                } else {
                    let value = wrapping_eval!(op, a.as_u8(), b.as_u8())?;
                    graph.uint8_constant(value)
                })
            }
            Width::I32 | Width::U32 => {
                let a = constant32(graph, lhs)?;
                let b = constant32(graph, rhs)?;
                Some(if width.is_signed() {
                    let value = wrapping_eval!(op, a.as_i32(), b.as_i32())?;
                    graph.int32_constant(value)
                } else {
                    let value = wrapping_eval!(op, a.as_u32(), b.as_u32())?;
                    graph.uint32_constant(value)
                })
            }
        }
    }
}

impl Reducer for ConstantFoldingReducer {
    fn name(&self) -> &'static str {
        "ConstantFolding"
    }

    fn reduce(&mut self, node: NodeId, editor: &mut Editor<'_>) -> Reduction {
        let graph = editor.graph_mut();
        let Some((op, width)) = graph.opcode(node).arith_parts() else {
            return Reduction::NoChange;
        };
        let lhs = graph.value_input(node, 0);
        let rhs = graph.value_input(node, 1);
        match Self::fold(graph, op, width, lhs, rhs) {
            Some(constant) => {
                self.folded += 1;
                tracing::trace!(%node, %constant, "folded {}", graph.opcode(node));
                Reduction::replace(constant)
            }
            None => Reduction::NoChange,
        }
    }
}

#[inline]
fn constant8(graph: &Graph, node: NodeId) -> Option<Constant8Value> {
    (graph.opcode(node) == Opcode::Constant8).then(|| graph.op_param::<Constant8Value>(node))
}

#[inline]
fn constant32(graph: &Graph, node: NodeId) -> Option<Constant32Value> {
    (graph.opcode(node) == Opcode::Constant32).then(|| graph.op_param::<Constant32Value>(node))
}
