//! Path builder for assembling compilation paths.
//!
//! The `PathBuilder` offers label-based jumps (patched in `finish`), automatic
//! pc numbering and bookkeeping for inlined invocations. It is what tests and
//! tooling use to produce `CompilationInfo` without a real bytecode generator.

use crate::compilation_info::{CompilationInfo, InvocationInfo};
use crate::function::{FunctionId, FunctionInfo};
use crate::instruction::{
    BinaryOp, CompareOp, FieldRef, Immediate, Instruction, Likelihood, Register, Width,
};
use rustc_hash::FxHashMap;
use thiserror::Error;

/// A label for jump targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

/// A jump emitted before its label was bound.
#[derive(Debug)]
struct ForwardRef {
    /// Path position of the jump.
    position: usize,
    /// The label being jumped to.
    label: Label,
}

/// Errors raised while finishing a path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// A jump refers to a label that was never bound.
    #[error("label {0} was never bound")]
    UnboundLabel(u32),
    /// An inlined invocation names a function without metadata.
    #[error("no metadata registered for inlined function {0}")]
    UnknownFunction(FunctionId),
    /// `exit_inlined` without a matching `enter_inlined`.
    #[error("exit_inlined called at depth 0")]
    UnbalancedInline,
}

/// Builder for [`CompilationInfo`] paths.
///
/// # Example
/// ```
/// use seaflow_bytecode::{FunctionId, FunctionInfo, Immediate, PathBuilder, Register, Width, BinaryOp};
///
/// let mut b = PathBuilder::new(FunctionInfo::new(FunctionId(0), "add", 2, 3));
/// b.load_parameter(Register(0), 0);
/// b.load_parameter(Register(1), 1);
/// b.binary(BinaryOp::Add, Width::I32, Register(2), Register(0), Register(1));
/// b.ret(Register(2));
/// let info = b.finish().unwrap();
/// assert_eq!(info.path.len(), 4);
/// ```
#[derive(Debug)]
pub struct PathBuilder {
    info: CompilationInfo,
    /// Program counter assigned to the next instruction.
    next_pc: u32,
    next_label: u32,
    labels: FxHashMap<Label, u32>,
    forward_refs: Vec<ForwardRef>,
    /// Active inlined frames, innermost last.
    depth: u16,
}

impl PathBuilder {
    /// Create a builder for the given root function.
    pub fn new(root: FunctionInfo) -> Self {
        Self {
            info: CompilationInfo::new(root),
            next_pc: 0,
            next_label: 0,
            labels: FxHashMap::default(),
            forward_refs: Vec::new(),
            depth: 0,
        }
    }

    /// Register metadata for a function that will be inlined.
    pub fn add_function(&mut self, info: FunctionInfo) {
        self.info.functions.insert(info.id, info);
    }

    /// Override the program counter of the next instruction.
    pub fn set_pc(&mut self, pc: u32) {
        self.next_pc = pc;
    }

    /// Current path position (index of the next instruction).
    pub fn position(&self) -> u32 {
        self.info.path.len() as u32
    }

    // =========================================================================
    // Labels
    // =========================================================================

    /// Create a new label for a jump target.
    pub fn create_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Mark the current position as the target for a label.
    pub fn bind_label(&mut self, label: Label) {
        let position = self.position();
        self.labels.insert(label, position);
    }

    // =========================================================================
    // Emission
    // =========================================================================

    /// Emit a raw instruction and return its path position.
    pub fn emit(&mut self, inst: Instruction) -> u32 {
        let position = self.position();
        self.info.path.push(inst);
        self.info.pcs.push(self.next_pc);
        self.next_pc += 1;
        position
    }

    /// `dst = value`
    pub fn load_immediate(&mut self, dst: Register, value: Immediate) -> u32 {
        self.emit(Instruction::LoadImmediate { dst, value })
    }

    /// `dst = parameter[index]`
    pub fn load_parameter(&mut self, dst: Register, index: u16) -> u32 {
        self.emit(Instruction::LoadParameter { dst, index })
    }

    /// `dst = src`
    pub fn mov(&mut self, dst: Register, src: Register) -> u32 {
        self.emit(Instruction::Move { dst, src })
    }

    /// `dst = lhs <op> rhs`
    pub fn binary(
        &mut self,
        op: BinaryOp,
        width: Width,
        dst: Register,
        lhs: Register,
        rhs: Register,
    ) -> u32 {
        self.emit(Instruction::Binary {
            op,
            width,
            dst,
            lhs,
            rhs,
        })
    }

    /// `dst = lhs <op> rhs` as 0/1.
    pub fn compare(
        &mut self,
        op: CompareOp,
        width: Width,
        dst: Register,
        lhs: Register,
        rhs: Register,
    ) -> u32 {
        self.emit(Instruction::Compare {
            op,
            width,
            dst,
            lhs,
            rhs,
        })
    }

    /// `dst = object.field`
    pub fn load_field(&mut self, dst: Register, object: Register, field: FieldRef) -> u32 {
        self.emit(Instruction::LoadField { dst, object, field })
    }

    /// `object.field = value`
    pub fn store_field(&mut self, object: Register, field: FieldRef, value: Register) -> u32 {
        self.emit(Instruction::StoreField {
            object,
            field,
            value,
        })
    }

    /// Unconditional jump to label.
    pub fn jump(&mut self, label: Label) -> u32 {
        let position = self.emit(Instruction::Jump { target: u32::MAX });
        self.forward_refs.push(ForwardRef {
            position: position as usize,
            label,
        });
        position
    }

    /// Conditional jump to label.
    pub fn jump_if(&mut self, condition: Register, label: Label, likelihood: Likelihood) -> u32 {
        let position = self.emit(Instruction::JumpIf {
            condition,
            target: u32::MAX,
            likelihood,
        });
        self.forward_refs.push(ForwardRef {
            position: position as usize,
            label,
        });
        position
    }

    /// Return `value` from the active function.
    pub fn ret(&mut self, value: Register) -> u32 {
        let position = self.emit(Instruction::Return { value });
        if self.depth > 0 {
            self.depth -= 1;
        }
        position
    }

    // =========================================================================
    // Inlining
    // =========================================================================

    /// Begin an inlined call at the next position.
    ///
    /// The callee's registers are rebased to `local_base`; its `Return`
    /// writes into the caller's `result` register.
    pub fn enter_inlined(
        &mut self,
        function: FunctionId,
        local_base: u16,
        arguments: Vec<Register>,
        result: Option<Register>,
    ) -> Result<(), PathError> {
        if !self.info.functions.contains_key(&function) {
            return Err(PathError::UnknownFunction(function));
        }
        self.depth += 1;
        let position = self.position();
        self.info.invocations.insert(
            position,
            InvocationInfo {
                function,
                depth: self.depth,
                local_base,
                arguments,
                result,
            },
        );
        Ok(())
    }

    /// Leave an inlined call without emitting a `Return`.
    ///
    /// Only needed when the callee ends in a deopt or throw.
    pub fn exit_inlined(&mut self) -> Result<(), PathError> {
        if self.depth == 0 {
            return Err(PathError::UnbalancedInline);
        }
        self.depth -= 1;
        Ok(())
    }

    /// Patch jump targets and produce the compilation info.
    pub fn finish(mut self) -> Result<CompilationInfo, PathError> {
        for fwd in self.forward_refs {
            let target = *self
                .labels
                .get(&fwd.label)
                .ok_or(PathError::UnboundLabel(fwd.label.0))?;
            match &mut self.info.path[fwd.position] {
                Instruction::Jump { target: t } | Instruction::JumpIf { target: t, .. } => {
                    *t = target
                }
                other => unreachable!("forward reference on non-jump {}", other.mnemonic()),
            }
        }
        Ok(self.info)
    }
}
