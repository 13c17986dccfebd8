//! Decoded bytecode instructions.
//!
//! The JIT never sees packed bytecode. The producer hands over a linear
//! *path* of already-decoded instructions; jump targets are path positions,
//! not program counters.

use crate::function::FunctionId;
use std::fmt;

// =============================================================================
// Operands
// =============================================================================

/// A virtual register of the function that is active at a path position.
///
/// Register numbers are frame-relative: the graph builder rebases them with
/// the `local_base` of the active invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Register(pub u16);

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Integer width and signedness of an arithmetic operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    /// Signed 8-bit.
    I8,
    /// Unsigned 8-bit.
    U8,
    /// Signed 32-bit.
    I32,
    /// Unsigned 32-bit.
    U32,
}

impl Width {
    /// Number of bits.
    #[inline]
    pub const fn bits(self) -> u32 {
        match self {
            Width::I8 | Width::U8 => 8,
            Width::I32 | Width::U32 => 32,
        }
    }

    /// Whether values of this width are interpreted as signed.
    #[inline]
    pub const fn is_signed(self) -> bool {
        matches!(self, Width::I8 | Width::I32)
    }
}

/// Binary arithmetic operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Comparison operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// `lhs == rhs`
    Eq,
    /// `lhs < rhs`
    Lt,
    /// `lhs <= rhs`
    Le,
}

/// Immediate operand of `LoadImmediate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Immediate {
    I8(i8),
    U8(u8),
    I32(i32),
    U32(u32),
}

impl Immediate {
    /// Width of the immediate.
    pub const fn width(self) -> Width {
        match self {
            Immediate::I8(_) => Width::I8,
            Immediate::U8(_) => Width::U8,
            Immediate::I32(_) => Width::I32,
            Immediate::U32(_) => Width::U32,
        }
    }

    /// Raw two's-complement bits, zero-extended to 32 bits.
    pub const fn bits(self) -> u32 {
        match self {
            Immediate::I8(v) => v as u8 as u32,
            Immediate::U8(v) => v as u32,
            Immediate::I32(v) => v as u32,
            Immediate::U32(v) => v,
        }
    }
}

/// Static likelihood annotation attached to a conditional jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Likelihood {
    /// No information.
    #[default]
    Unknown,
    /// The jump is usually taken.
    Likely,
    /// The jump is rarely taken (error paths, guards).
    Unlikely,
}

/// Opaque handle into the object model's type metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeHandle(pub u32);

/// A resolved field reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldRef {
    /// Byte offset inside the object.
    pub offset: u32,
    /// Width of the stored value.
    pub width: Width,
    /// Declaring type.
    pub holder: TypeHandle,
}

// =============================================================================
// Instruction
// =============================================================================

/// A single decoded instruction on the compilation path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// `dst = value`
    LoadImmediate { dst: Register, value: Immediate },
    /// `dst = parameter[index]` of the active function.
    LoadParameter { dst: Register, index: u16 },
    /// `dst = src`
    Move { dst: Register, src: Register },
    /// `dst = lhs <op> rhs` at the given width.
    Binary {
        op: BinaryOp,
        width: Width,
        dst: Register,
        lhs: Register,
        rhs: Register,
    },
    /// `dst = (lhs <op> rhs) ? 1 : 0`
    Compare {
        op: CompareOp,
        width: Width,
        dst: Register,
        lhs: Register,
        rhs: Register,
    },
    /// `dst = object.field`
    LoadField {
        dst: Register,
        object: Register,
        field: FieldRef,
    },
    /// `object.field = value`
    StoreField {
        object: Register,
        field: FieldRef,
        value: Register,
    },
    /// Out-of-line call that was not inlined into the path.
    Call {
        dst: Register,
        callee: FunctionId,
        args: Vec<Register>,
    },
    /// Unconditional jump to a path position.
    Jump { target: u32 },
    /// Jump to `target` when `condition` is non-zero, fall through otherwise.
    JumpIf {
        condition: Register,
        target: u32,
        likelihood: Likelihood,
    },
    /// Return from the active function.
    Return { value: Register },
    /// Throw `value` out of the compiled function.
    Throw { value: Register },
    /// Bail out to the interpreter at the current pc.
    Deoptimize,
    /// Tail call replacing the compiled frame.
    TailCall { callee: FunctionId, args: Vec<Register> },
}

impl Instruction {
    /// Mnemonic used by disassembly and diagnostics.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instruction::LoadImmediate { .. } => "LOAD_IMM",
            Instruction::LoadParameter { .. } => "LOAD_PARAM",
            Instruction::Move { .. } => "MOVE",
            Instruction::Binary { .. } => "BINARY",
            Instruction::Compare { .. } => "COMPARE",
            Instruction::LoadField { .. } => "LOAD_FIELD",
            Instruction::StoreField { .. } => "STORE_FIELD",
            Instruction::Call { .. } => "CALL",
            Instruction::Jump { .. } => "JUMP",
            Instruction::JumpIf { .. } => "JUMP_IF",
            Instruction::Return { .. } => "RETURN",
            Instruction::Throw { .. } => "THROW",
            Instruction::Deoptimize => "DEOPTIMIZE",
            Instruction::TailCall { .. } => "TAIL_CALL",
        }
    }

    /// Jump target, if this instruction transfers control inside the path.
    pub fn jump_target(&self) -> Option<u32> {
        match self {
            Instruction::Jump { target } | Instruction::JumpIf { target, .. } => Some(*target),
            _ => None,
        }
    }

    /// Whether control never falls through to the next path position.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instruction::Jump { .. }
                | Instruction::Return { .. }
                | Instruction::Throw { .. }
                | Instruction::Deoptimize
                | Instruction::TailCall { .. }
        )
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<12}", self.mnemonic())?;
        match self {
            Instruction::LoadImmediate { dst, value } => write!(f, "{}, {:?}", dst, value),
            Instruction::LoadParameter { dst, index } => write!(f, "{}, param[{}]", dst, index),
            Instruction::Move { dst, src } => write!(f, "{}, {}", dst, src),
            Instruction::Binary {
                op,
                width,
                dst,
                lhs,
                rhs,
            } => write!(f, "{:?}.{:?} {}, {}, {}", op, width, dst, lhs, rhs),
            Instruction::Compare {
                op,
                width,
                dst,
                lhs,
                rhs,
            } => write!(f, "{:?}.{:?} {}, {}, {}", op, width, dst, lhs, rhs),
            Instruction::LoadField { dst, object, field } => {
                write!(f, "{}, {}+{}", dst, object, field.offset)
            }
            Instruction::StoreField {
                object,
                field,
                value,
            } => write!(f, "{}+{}, {}", object, field.offset, value),
            Instruction::Call { dst, callee, args } => {
                write!(f, "{}, {}({} args)", dst, callee, args.len())
            }
            Instruction::Jump { target } => write!(f, "@{}", target),
            Instruction::JumpIf {
                condition,
                target,
                likelihood,
            } => write!(f, "{}, @{} ({:?})", condition, target, likelihood),
            Instruction::Return { value } | Instruction::Throw { value } => write!(f, "{}", value),
            Instruction::Deoptimize => Ok(()),
            Instruction::TailCall { callee, args } => {
                write!(f, "{}({} args)", callee, args.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immediate_bits_zero_extend() {
        assert_eq!(Immediate::I8(-1).bits(), 0xFF);
        assert_eq!(Immediate::I32(-1).bits(), u32::MAX);
        assert_eq!(Immediate::U8(200).width(), Width::U8);
    }

    #[test]
    fn test_terminators() {
        assert!(Instruction::Jump { target: 0 }.is_terminator());
        assert!(Instruction::Deoptimize.is_terminator());
        assert!(
            !Instruction::JumpIf {
                condition: Register(0),
                target: 3,
                likelihood: Likelihood::Unknown,
            }
            .is_terminator()
        );
    }

    #[test]
    fn test_display() {
        let inst = Instruction::Binary {
            op: BinaryOp::Add,
            width: Width::I32,
            dst: Register(2),
            lhs: Register(0),
            rhs: Register(1),
        };
        assert_eq!(inst.to_string(), "BINARY      Add.I32 r2, r0, r1");
    }
}
