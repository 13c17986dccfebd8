//! Result type tags carried by nodes.
//!
//! The graph does not do type inference; the tag is assigned when a node is
//! created (from the opcode, or explicitly by the graph builder) and read by
//! reducers and code generation.

use seaflow_bytecode::{TypeHandle, Width};
use std::fmt;

/// Result type of a node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NodeType {
    /// No value (stores, frame states).
    #[default]
    None,
    /// Control token.
    Control,
    /// Effect token.
    Effect,
    /// Signed 8-bit integer.
    Int8,
    /// Unsigned 8-bit integer.
    Uint8,
    /// Signed 32-bit integer.
    Int32,
    /// Unsigned 32-bit integer.
    Uint32,
    /// Result of a comparison (0 or 1).
    Bool,
    /// Reference to a heap object of the given class.
    Object(TypeHandle),
}

impl NodeType {
    /// Integer type of a bytecode width.
    #[inline]
    pub const fn from_width(width: Width) -> Self {
        match width {
            Width::I8 => NodeType::Int8,
            Width::U8 => NodeType::Uint8,
            Width::I32 => NodeType::Int32,
            Width::U32 => NodeType::Uint32,
        }
    }

    /// Whether this is one of the four integer tags.
    #[inline]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            NodeType::Int8 | NodeType::Uint8 | NodeType::Int32 | NodeType::Uint32
        )
    }

    /// Whether the node produces a value (as opposed to a token).
    #[inline]
    pub const fn is_value(self) -> bool {
        !matches!(self, NodeType::None | NodeType::Control | NodeType::Effect)
    }
}

impl fmt::Debug for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::None => f.write_str("none"),
            NodeType::Control => f.write_str("ctrl"),
            NodeType::Effect => f.write_str("effect"),
            NodeType::Int8 => f.write_str("i8"),
            NodeType::Uint8 => f.write_str("u8"),
            NodeType::Int32 => f.write_str("i32"),
            NodeType::Uint32 => f.write_str("u32"),
            NodeType::Bool => f.write_str("bool"),
            NodeType::Object(h) => write!(f, "object<{}>", h.0),
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_width() {
        assert_eq!(NodeType::from_width(Width::U8), NodeType::Uint8);
        assert_eq!(NodeType::from_width(Width::I32), NodeType::Int32);
    }

    #[test]
    fn test_value_tags() {
        assert!(NodeType::Bool.is_value());
        assert!(NodeType::Object(TypeHandle(3)).is_value());
        assert!(!NodeType::Effect.is_value());
        assert!(!NodeType::Bool.is_integer());
        assert_eq!(NodeType::Object(TypeHandle(3)).to_string(), "object<3>");
    }
}
