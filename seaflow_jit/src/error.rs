//! Error types for the JIT.
//!
//! Only graph construction can fail recoverably: a malformed
//! `CompilationInfo` is reported as a [`BuildError`]. Invariant violations
//! inside the graph, the reducers and the scheduler are panics.

use seaflow_bytecode::{FunctionId, Register};
use thiserror::Error;

/// Malformed compilation input detected by the graph builder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("compilation path is empty")]
    EmptyPath,

    #[error("pc table has {pcs} entries for a path of {path} instructions")]
    PcTableMismatch { path: usize, pcs: usize },

    #[error("no function metadata for {0}")]
    MissingFunctionInfo(FunctionId),

    #[error("jump at position {position} targets {target}, outside the path")]
    JumpTargetOutOfRange { position: u32, target: u32 },

    #[error("read of undefined register {register} at position {position}")]
    UndefinedRegister { position: u32, register: Register },

    #[error("register {register} at position {position} exceeds the frame")]
    RegisterOutOfRange { position: u32, register: Register },

    #[error("parameter {index} at position {position} is out of range")]
    ParameterOutOfRange { position: u32, index: u16 },

    #[error("control reaches position {position} with mismatched inlined frames")]
    UnbalancedFrames { position: u32 },

    #[error("back edge at position {position} enters a loop header that was never reached")]
    IrreducibleLoop { position: u32 },

    #[error("control falls off the end of the path")]
    FallsOffEnd,
}

/// Errors surfaced by the compilation pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JitError {
    #[error("graph construction failed: {0}")]
    Build(#[from] BuildError),
}

/// Result type for JIT entry points.
pub type JitResult<T> = Result<T, JitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = BuildError::UndefinedRegister {
            position: 3,
            register: Register(7),
        };
        assert_eq!(err.to_string(), "read of undefined register r7 at position 3");

        let jit: JitError = BuildError::EmptyPath.into();
        assert_eq!(
            jit.to_string(),
            "graph construction failed: compilation path is empty"
        );
    }
}
