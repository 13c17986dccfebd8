//! Operator registry for the Sea-of-Nodes IR.
//!
//! Every opcode is declared exactly once in the `define_opcodes!` list below,
//! which produces:
//! - The [`Opcode`] enum
//! - The static [`OPCODE_TABLE`] (name and control/value/effect arities)
//!
//! An [`Operator`] is the per-node descriptor: an opcode, the arities of
//! *this* instance (variadic nodes grow) and optional instance data such as
//! a constant or a branch hint. Instance data is read back through the typed
//! [`OpParameter`] accessor, which checks the opcode first.

use seaflow_bytecode::{BinaryOp, CompareOp, FunctionId, TypeHandle, Width};
use std::fmt;

use super::types::NodeType;

// =============================================================================
// Opcode Properties
// =============================================================================

/// Which group of a node's inputs an edge belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputKind {
    Control,
    Value,
    Effect,
}

bitflags::bitflags! {
    /// Static properties of an opcode.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct OpProperties: u8 {
        /// Part of the control skeleton.
        const CONTROL = 0b0000_0001;
        /// No side effects; free to float.
        const PURE = 0b0000_0010;
        /// Constant leaf.
        const CONSTANT = 0b0000_0100;
        /// Leaves the function (block terminator with no successor).
        const TERMINATOR = 0b0000_1000;
        /// Begins a basic block.
        const BLOCK_START = 0b0001_0000;
        /// Merges values or effects at a control join.
        const PHI = 0b0010_0000;
        /// `a op b == b op a`.
        const COMMUTATIVE = 0b0100_0000;
    }
}

/// Registry entry for one opcode.
#[derive(Debug, Clone, Copy)]
pub struct OpcodeInfo {
    pub name: &'static str,
    pub control_in: u16,
    pub value_in: u16,
    pub effect_in: u16,
    /// Input group that `append_input` extends, if the opcode is variadic.
    pub variadic: Option<InputKind>,
    pub properties: OpProperties,
}

const CTRL: OpProperties = OpProperties::CONTROL;
const BLOCK: OpProperties = OpProperties::CONTROL.union(OpProperties::BLOCK_START);
const TERM: OpProperties = OpProperties::CONTROL.union(OpProperties::TERMINATOR);
const CONST: OpProperties = OpProperties::PURE.union(OpProperties::CONSTANT);
const PURE: OpProperties = OpProperties::PURE;
const COMM: OpProperties = OpProperties::PURE.union(OpProperties::COMMUTATIVE);
const PHI: OpProperties = OpProperties::PHI;
const EFFECTFUL: OpProperties = OpProperties::empty();

macro_rules! define_opcodes {
    ($(
        $(#[$doc:meta])*
        $variant:ident = ($c:expr, $v:expr, $e:expr, $var:expr, $props:expr),
    )*) => {
        /// Symbolic operation of a node.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum Opcode {
            $( $(#[$doc])* $variant, )*
        }

        /// Process-wide opcode registry, indexed by `Opcode as usize`.
        pub static OPCODE_TABLE: &[OpcodeInfo] = &[
            $(
                OpcodeInfo {
                    name: stringify!($variant),
                    control_in: $c,
                    value_in: $v,
                    effect_in: $e,
                    variadic: $var,
                    properties: $props,
                },
            )*
        ];

        impl Opcode {
            /// Every opcode in declaration order.
            pub const ALL: &'static [Opcode] = &[$(Opcode::$variant,)*];
        }
    };
}

define_opcodes! {
    // Control
    /// Function entry; the graph's start node.
    Start = (0, 0, 0, None, BLOCK),
    /// Function exit; collects every terminator.
    End = (0, 0, 0, Some(InputKind::Control), CTRL),
    /// Loop header: entry edge first, back edges after.
    Loop = (1, 0, 0, Some(InputKind::Control), BLOCK),
    /// Forward control join.
    Merge = (0, 0, 0, Some(InputKind::Control), BLOCK),
    /// Two-way branch on a value.
    Branch = (1, 1, 0, None, CTRL),
    /// Taken projection of a branch.
    IfTrue = (1, 0, 0, None, BLOCK),
    /// Fall-through projection of a branch.
    IfFalse = (1, 0, 0, None, BLOCK),
    Return = (1, 1, 1, None, TERM),
    Throw = (1, 1, 1, None, TERM),
    /// Bail out to the interpreter; the value input is a `FrameState`.
    Deoptimize = (1, 1, 1, None, TERM),
    TailCall = (1, 0, 1, None, TERM),

    // Leaves
    Parameter = (1, 0, 0, None, PURE),
    Constant8 = (0, 0, 0, None, CONST),
    Constant32 = (0, 0, 0, None, CONST),

    // SSA
    Phi = (1, 0, 0, Some(InputKind::Value), PHI),
    EffectPhi = (1, 0, 0, Some(InputKind::Effect), PHI),

    // Frame and memory
    FrameState = (0, 0, 0, None, PURE),
    Call = (1, 0, 1, None, EFFECTFUL),
    LoadField = (1, 1, 1, None, EFFECTFUL),
    StoreField = (1, 2, 1, None, EFFECTFUL),

    // Arithmetic
    Int8Add = (0, 2, 0, None, COMM),
    Int8Sub = (0, 2, 0, None, PURE),
    Int8Mul = (0, 2, 0, None, COMM),
    Int8Div = (0, 2, 0, None, PURE),
    Int8Mod = (0, 2, 0, None, PURE),
    Uint8Add = (0, 2, 0, None, COMM),
    Uint8Sub = (0, 2, 0, None, PURE),
    Uint8Mul = (0, 2, 0, None, COMM),
    Uint8Div = (0, 2, 0, None, PURE),
    Uint8Mod = (0, 2, 0, None, PURE),
    Int32Add = (0, 2, 0, None, COMM),
    Int32Sub = (0, 2, 0, None, PURE),
    Int32Mul = (0, 2, 0, None, COMM),
    Int32Div = (0, 2, 0, None, PURE),
    Int32Mod = (0, 2, 0, None, PURE),
    Uint32Add = (0, 2, 0, None, COMM),
    Uint32Sub = (0, 2, 0, None, PURE),
    Uint32Mul = (0, 2, 0, None, COMM),
    Uint32Div = (0, 2, 0, None, PURE),
    Uint32Mod = (0, 2, 0, None, PURE),

    // Comparison
    Int32Equal = (0, 2, 0, None, COMM),
    Int32LessThan = (0, 2, 0, None, PURE),
    Int32LessThanOrEqual = (0, 2, 0, None, PURE),
    Uint32LessThan = (0, 2, 0, None, PURE),
    Uint32LessThanOrEqual = (0, 2, 0, None, PURE),
}

impl Opcode {
    /// Registry entry.
    #[inline]
    pub fn info(self) -> &'static OpcodeInfo {
        &OPCODE_TABLE[self as usize]
    }

    #[inline]
    pub fn name(self) -> &'static str {
        self.info().name
    }

    #[inline]
    pub fn properties(self) -> OpProperties {
        self.info().properties
    }

    #[inline]
    pub fn is_control(self) -> bool {
        self.properties().contains(OpProperties::CONTROL)
    }

    #[inline]
    pub fn is_phi(self) -> bool {
        self.properties().contains(OpProperties::PHI)
    }

    #[inline]
    pub fn is_constant(self) -> bool {
        self.properties().contains(OpProperties::CONSTANT)
    }

    #[inline]
    pub fn is_terminator(self) -> bool {
        self.properties().contains(OpProperties::TERMINATOR)
    }

    /// Arithmetic opcode for a bytecode operation and width.
    pub const fn arith(op: BinaryOp, width: Width) -> Opcode {
        use BinaryOp::*;
        use Width::*;
        match (width, op) {
            (I8, Add) => Opcode::Int8Add,
            (I8, Sub) => Opcode::Int8Sub,
            (I8, Mul) => Opcode::Int8Mul,
            (I8, Div) => Opcode::Int8Div,
            (I8, Mod) => Opcode::Int8Mod,
            (U8, Add) => Opcode::Uint8Add,
            (U8, Sub) => Opcode::Uint8Sub,
            (U8, Mul) => Opcode::Uint8Mul,
            (U8, Div) => Opcode::Uint8Div,
            (U8, Mod) => Opcode::Uint8Mod,
            (I32, Add) => Opcode::Int32Add,
            (I32, Sub) => Opcode::Int32Sub,
            (I32, Mul) => Opcode::Int32Mul,
            (I32, Div) => Opcode::Int32Div,
            (I32, Mod) => Opcode::Int32Mod,
            (U32, Add) => Opcode::Uint32Add,
            (U32, Sub) => Opcode::Uint32Sub,
            (U32, Mul) => Opcode::Uint32Mul,
            (U32, Div) => Opcode::Uint32Div,
            (U32, Mod) => Opcode::Uint32Mod,
        }
    }

    /// Inverse of [`Opcode::arith`].
    pub const fn arith_parts(self) -> Option<(BinaryOp, Width)> {
        use BinaryOp::*;
        use Width::*;
        Some(match self {
            Opcode::Int8Add => (Add, I8),
            Opcode::Int8Sub => (Sub, I8),
            Opcode::Int8Mul => (Mul, I8),
            Opcode::Int8Div => (Div, I8),
            Opcode::Int8Mod => (Mod, I8),
            Opcode::Uint8Add => (Add, U8),
            Opcode::Uint8Sub => (Sub, U8),
            Opcode::Uint8Mul => (Mul, U8),
            Opcode::Uint8Div => (Div, U8),
            Opcode::Uint8Mod => (Mod, U8),
            Opcode::Int32Add => (Add, I32),
            Opcode::Int32Sub => (Sub, I32),
            Opcode::Int32Mul => (Mul, I32),
            Opcode::Int32Div => (Div, I32),
            Opcode::Int32Mod => (Mod, I32),
            Opcode::Uint32Add => (Add, U32),
            Opcode::Uint32Sub => (Sub, U32),
            Opcode::Uint32Mul => (Mul, U32),
            Opcode::Uint32Div => (Div, U32),
            Opcode::Uint32Mod => (Mod, U32),
            _ => return None,
        })
    }

    /// Comparison opcode for a bytecode comparison.
    ///
    /// 8-bit operands are compared with the 32-bit opcode of the same
    /// signedness.
    pub const fn compare(op: CompareOp, width: Width) -> Opcode {
        match (op, width.is_signed()) {
            (CompareOp::Eq, _) => Opcode::Int32Equal,
            (CompareOp::Lt, true) => Opcode::Int32LessThan,
            (CompareOp::Le, true) => Opcode::Int32LessThanOrEqual,
            (CompareOp::Lt, false) => Opcode::Uint32LessThan,
            (CompareOp::Le, false) => Opcode::Uint32LessThanOrEqual,
        }
    }

    /// Type tag a node of this opcode produces by default.
    pub fn default_type(self) -> NodeType {
        if self.is_control() {
            return NodeType::Control;
        }
        if let Some((_, width)) = self.arith_parts() {
            return NodeType::from_width(width);
        }
        match self {
            Opcode::EffectPhi | Opcode::StoreField => NodeType::Effect,
            Opcode::Constant8 => NodeType::Int8,
            Opcode::Constant32 => NodeType::Int32,
            Opcode::Int32Equal
            | Opcode::Int32LessThan
            | Opcode::Int32LessThanOrEqual
            | Opcode::Uint32LessThan
            | Opcode::Uint32LessThanOrEqual => NodeType::Bool,
            _ => NodeType::None,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Instance Data
// =============================================================================

/// Static prediction attached to a `Branch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BranchHint {
    #[default]
    None,
    /// The true projection is the likely one.
    True,
    /// The false projection is the likely one.
    False,
}

/// Index of a `Parameter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParameterIndex(pub u16);

/// Raw bits of a `Constant8`; the signedness comes from the user opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Constant8Value(pub u8);

impl Constant8Value {
    #[inline]
    pub const fn as_i8(self) -> i8 {
        self.0 as i8
    }

    #[inline]
    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

/// Raw bits of a `Constant32`; the signedness comes from the user opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Constant32Value(pub u32);

impl Constant32Value {
    #[inline]
    pub const fn as_i32(self) -> i32 {
        self.0 as i32
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

/// Deoptimization metadata: where to resume in which function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameStateInfo {
    /// Original program counter to resume at.
    pub pc: u32,
    /// Function active at that pc.
    pub function: FunctionId,
}

/// Field accessed by `LoadField`/`StoreField`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldAccess {
    pub offset: u32,
    pub width: Width,
    pub holder: TypeHandle,
}

/// Target and argument count of `Call`/`TailCall`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallDescriptor {
    pub target: FunctionId,
    pub arg_count: u16,
}

/// Tagged union of every kind of instance data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OpData {
    #[default]
    None,
    Index(ParameterIndex),
    Int8(Constant8Value),
    Int32(Constant32Value),
    BranchHint(BranchHint),
    FrameState(FrameStateInfo),
    Field(FieldAccess),
    Call(CallDescriptor),
}

/// Typed view of an operator's instance data.
pub trait OpParameter: Copy {
    /// Opcodes whose operators carry this kind of data.
    const OPCODES: &'static [Opcode];

    fn from_data(data: OpData) -> Option<Self>;
}

macro_rules! op_parameter {
    ($ty:ty, $variant:ident, [$($op:ident),+]) => {
        impl OpParameter for $ty {
            const OPCODES: &'static [Opcode] = &[$(Opcode::$op),+];

            #[inline]
            fn from_data(data: OpData) -> Option<Self> {
                match data {
                    OpData::$variant(value) => Some(value),
                    _ => None,
                }
            }
        }
    };
}

op_parameter!(ParameterIndex, Index, [Parameter]);
op_parameter!(Constant8Value, Int8, [Constant8]);
op_parameter!(Constant32Value, Int32, [Constant32]);
op_parameter!(BranchHint, BranchHint, [Branch]);
op_parameter!(FrameStateInfo, FrameState, [FrameState]);
op_parameter!(FieldAccess, Field, [LoadField, StoreField]);
op_parameter!(CallDescriptor, Call, [Call, TailCall]);

// =============================================================================
// Operator
// =============================================================================

/// Per-node operator descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operator {
    pub opcode: Opcode,
    pub control_in: u16,
    pub value_in: u16,
    pub effect_in: u16,
    pub data: OpData,
}

impl Operator {
    /// Operator with the registry arities and no data.
    pub fn new(opcode: Opcode) -> Self {
        let info = opcode.info();
        Operator {
            opcode,
            control_in: info.control_in,
            value_in: info.value_in,
            effect_in: info.effect_in,
            data: OpData::None,
        }
    }

    /// Operator carrying instance data.
    pub fn with_data(opcode: Opcode, data: OpData) -> Self {
        Operator {
            data,
            ..Operator::new(opcode)
        }
    }

    /// Variadic operator with `count` inputs in its variadic group.
    pub fn variadic(opcode: Opcode, count: u16) -> Self {
        let mut op = Operator::new(opcode);
        match opcode.info().variadic {
            Some(InputKind::Control) => op.control_in = count,
            Some(InputKind::Value) => op.value_in = count,
            Some(InputKind::Effect) => op.effect_in = count,
            None => panic!("{} is not variadic", opcode),
        }
        op
    }

    pub fn parameter(index: u16) -> Self {
        Operator::with_data(Opcode::Parameter, OpData::Index(ParameterIndex(index)))
    }

    pub fn constant8(bits: u8) -> Self {
        Operator::with_data(Opcode::Constant8, OpData::Int8(Constant8Value(bits)))
    }

    pub fn constant32(bits: u32) -> Self {
        Operator::with_data(Opcode::Constant32, OpData::Int32(Constant32Value(bits)))
    }

    pub fn branch(hint: BranchHint) -> Self {
        Operator::with_data(Opcode::Branch, OpData::BranchHint(hint))
    }

    pub fn frame_state(pc: u32, function: FunctionId) -> Self {
        Operator::with_data(
            Opcode::FrameState,
            OpData::FrameState(FrameStateInfo { pc, function }),
        )
    }

    pub fn load_field(field: FieldAccess) -> Self {
        Operator::with_data(Opcode::LoadField, OpData::Field(field))
    }

    pub fn store_field(field: FieldAccess) -> Self {
        Operator::with_data(Opcode::StoreField, OpData::Field(field))
    }

    /// `Call` or `TailCall`; the value arity is the argument count.
    pub fn call(opcode: Opcode, target: FunctionId, arg_count: u16) -> Self {
        assert!(matches!(opcode, Opcode::Call | Opcode::TailCall));
        Operator {
            value_in: arg_count,
            ..Operator::with_data(opcode, OpData::Call(CallDescriptor { target, arg_count }))
        }
    }

    /// Total number of inputs.
    #[inline]
    pub fn input_count(&self) -> usize {
        (self.control_in + self.value_in + self.effect_in) as usize
    }

    /// Group of the input at `index` in `[control.., value.., effect..]`.
    pub fn input_kind(&self, index: usize) -> InputKind {
        let control = self.control_in as usize;
        let value = control + self.value_in as usize;
        if index < control {
            InputKind::Control
        } else if index < value {
            InputKind::Value
        } else {
            assert!(
                index < self.input_count(),
                "input {} out of range for {}",
                index,
                self.opcode
            );
            InputKind::Effect
        }
    }

    /// Record one more input in the variadic group.
    pub(crate) fn grow(&mut self) -> InputKind {
        let kind = self
            .opcode
            .info()
            .variadic
            .unwrap_or_else(|| panic!("cannot append an input to fixed-arity {}", self.opcode));
        match kind {
            InputKind::Control => {
                assert!(
                    self.value_in == 0 && self.effect_in == 0,
                    "control group of {} is not last",
                    self.opcode
                );
                self.control_in += 1;
            }
            InputKind::Value => {
                assert!(self.effect_in == 0, "value group of {} is not last", self.opcode);
                self.value_in += 1;
            }
            InputKind::Effect => self.effect_in += 1,
        }
        kind
    }

    /// Typed instance data. Panics if the opcode does not carry `T`.
    pub fn param<T: OpParameter>(&self) -> T {
        assert!(
            T::OPCODES.contains(&self.opcode),
            "{} does not carry {}",
            self.opcode,
            std::any::type_name::<T>()
        );
        match T::from_data(self.data) {
            Some(value) => value,
            None => panic!("{} has mismatched data {:?}", self.opcode, self.data),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.opcode.name())?;
        match self.data {
            OpData::None => Ok(()),
            OpData::Index(ParameterIndex(i)) => write!(f, "[{}]", i),
            OpData::Int8(v) => write!(f, "[{}]", v.0),
            OpData::Int32(v) => write!(f, "[{}]", v.0),
            OpData::BranchHint(h) => write!(f, "[{:?}]", h),
            OpData::FrameState(fs) => write!(f, "[pc={}, {}]", fs.pc, fs.function),
            OpData::Field(fa) => write!(f, "[+{}:{:?}]", fa.offset, fa.width),
            OpData::Call(cd) => write!(f, "[{}/{}]", cd.target, cd.arg_count),
        }
    }
}
