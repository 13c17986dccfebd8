//! Block scheduling of a sea-of-nodes graph.
//!
//! [`Scheduler::compute_schedule`] turns a graph into a [`Schedule`]: basic
//! blocks in reverse post-order, each holding its nodes in an order that
//! respects every data, effect and control dependency.

mod block;
mod cfg_builder;
mod control_equivalence;
#[allow(clippy::module_inception)]
mod schedule;
mod scheduler;

pub use block::{BasicBlock, BlockId, BlockList, Control};
pub use control_equivalence::ControlEquivalence;
pub use schedule::Schedule;
pub use scheduler::{Scheduler, SchedulerStats};
