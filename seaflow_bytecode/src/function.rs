//! Function metadata visible to the JIT.

use std::fmt;
use std::sync::Arc;

/// Identity of a function known to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u32);

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn#{}", self.0)
    }
}

/// Shape of a function's frame.
///
/// Only what graph construction needs: how many parameters arrive and how
/// many registers the frame uses.
#[derive(Debug, Clone)]
pub struct FunctionInfo {
    /// Function identity.
    pub id: FunctionId,
    /// Human-readable name (diagnostics only).
    pub name: Arc<str>,
    /// Number of incoming parameters.
    pub parameter_count: u16,
    /// Number of frame registers.
    pub register_count: u16,
}

impl FunctionInfo {
    /// Create function metadata.
    pub fn new(
        id: FunctionId,
        name: impl Into<Arc<str>>,
        parameter_count: u16,
        register_count: u16,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            parameter_count,
            register_count,
        }
    }
}
