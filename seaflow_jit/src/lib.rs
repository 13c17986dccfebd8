//! Optimizing JIT tier for seaflow bytecode.
//!
//! A compilation path flows through:
//! - **Graph building**: bytecode path → sea-of-nodes graph ([`ir`])
//! - **Reduction**: fixed-point graph rewriting ([`opt`])
//! - **Scheduling**: graph → basic blocks in RPO ([`schedule`])
//!
//! [`pipeline::Pipeline`] drives all three.

pub mod config;
pub mod error;
pub mod ir;
pub mod opt;
pub mod pipeline;
pub mod schedule;

pub use config::{JitConfig, ReducerConfig, SchedulerConfig};
pub use error::{BuildError, JitError, JitResult};
pub use ir::{Graph, GraphBuilder, NodeId, Opcode};
pub use opt::{ConstantFoldingReducer, GraphReducer, Reducer, Reduction, ReductionStats};
pub use pipeline::{compile, CompiledFunction, Pipeline, PipelineStats};
pub use schedule::{BasicBlock, BlockId, Control, Schedule, Scheduler, SchedulerStats};
