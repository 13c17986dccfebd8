//! Decoded bytecode paths for the seaflow JIT.
//!
//! Bytecode generation is a producer of:
//! - A linear path of decoded instructions
//! - A path-position → program-counter table
//! - Inlined-invocation metadata keyed by path position
//!
//! bundled as a [`CompilationInfo`].

pub mod compilation_info;
pub mod function;
pub mod instruction;
pub mod path_builder;

pub use compilation_info::{CompilationInfo, InvocationInfo};
pub use function::{FunctionId, FunctionInfo};
pub use instruction::{
    BinaryOp, CompareOp, FieldRef, Immediate, Instruction, Likelihood, Register, TypeHandle,
    Width,
};
pub use path_builder::{Label, PathBuilder, PathError};
