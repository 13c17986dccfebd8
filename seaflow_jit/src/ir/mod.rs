//! Sea-of-Nodes intermediate representation.
//!
//! # Core Components
//!
//! - **Arena** (`arena.rs`): typed ids, side tables and bit sets
//! - **Types** (`types.rs`): result type tags
//! - **Operators** (`operators.rs`): opcode registry and per-instance data
//! - **Node** (`node.rs`): nodes and their input lists
//! - **Graph** (`graph.rs`): the graph, use lists and editing
//! - **Builder** (`builder/`): compilation path to graph translation
//!
//! Every node lists its inputs as `[control.., value.., effect..]`, with the
//! group sizes taken from its operator.

pub mod arena;
pub mod builder;
pub mod graph;
pub mod node;
pub mod operators;
pub mod types;

pub use arena::{Arena, BitSet, Id, SecondaryMap};
pub use builder::GraphBuilder;
pub use graph::{Graph, Use};
pub use node::{InputList, Node, NodeFlags, NodeId};
pub use operators::{
    BranchHint, CallDescriptor, Constant8Value, Constant32Value, FieldAccess, FrameStateInfo,
    InputKind, OpData, OpParameter, Opcode, Operator, ParameterIndex,
};
pub use types::NodeType;
