//! Compilation pipeline.
//!
//! Runs the three stages of the optimizing tier over one compilation path:
//!
//! 1. **Build**: `CompilationInfo` → sea-of-nodes graph
//! 2. **Reduce**: the enabled reducers run to a fixed point
//! 3. **Schedule**: the graph is placed into basic blocks

use std::time::{Duration, Instant};

use seaflow_bytecode::CompilationInfo;

use crate::config::JitConfig;
use crate::error::JitResult;
use crate::ir::builder::GraphBuilder;
use crate::ir::graph::Graph;
use crate::opt::{ConstantFoldingReducer, GraphReducer, ReductionStats};
use crate::schedule::{Schedule, Scheduler, SchedulerStats};

// =============================================================================
// Results
// =============================================================================

/// A scheduled graph, ready for instruction selection.
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    pub graph: Graph,
    pub schedule: Schedule,
    pub stats: PipelineStats,
}

/// Statistics from one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Live nodes right after graph construction.
    pub initial_size: usize,
    /// Live nodes after scheduling.
    pub final_size: usize,
    /// Nodes folded by constant folding.
    pub folded: usize,
    pub reduction: ReductionStats,
    pub scheduling: SchedulerStats,
    pub build_time: Duration,
    pub reduce_time: Duration,
    pub schedule_time: Duration,
}

impl PipelineStats {
    /// Final over initial live node count.
    pub fn size_reduction(&self) -> f64 {
        if self.initial_size == 0 {
            1.0
        } else {
            self.final_size as f64 / self.initial_size as f64
        }
    }

    pub fn total_time(&self) -> Duration {
        self.build_time + self.reduce_time + self.schedule_time
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Build → reduce → schedule driver.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    config: JitConfig,
}

impl Pipeline {
    pub fn new(config: JitConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    /// Compile one path.
    pub fn run(&self, info: &CompilationInfo) -> JitResult<CompiledFunction> {
        let mut stats = PipelineStats::default();

        let started = Instant::now();
        let mut graph = GraphBuilder::build(info)?;
        stats.build_time = started.elapsed();
        stats.initial_size = graph.live_nodes().len();
        tracing::debug!(nodes = stats.initial_size, "built graph");

        let started = Instant::now();
        self.reduce(&mut graph, &mut stats);
        stats.reduce_time = started.elapsed();

        let started = Instant::now();
        let (schedule, scheduling) = Scheduler::compute_schedule(&mut graph, &self.config.scheduler);
        stats.schedule_time = started.elapsed();
        stats.scheduling = scheduling;
        stats.final_size = graph.live_nodes().len();

        tracing::debug!(
            initial = stats.initial_size,
            r#final = stats.final_size,
            blocks = stats.scheduling.blocks,
            elapsed = ?stats.total_time(),
            "compiled path"
        );
        Ok(CompiledFunction {
            graph,
            schedule,
            stats,
        })
    }

    fn reduce(&self, graph: &mut Graph, stats: &mut PipelineStats) {
        let mut folding = ConstantFoldingReducer::new();
        let mut reducer = GraphReducer::new();
        if self.config.reducer.enable_constant_folding {
            reducer.add_reducer(&mut folding);
        }
        if reducer.is_empty() {
            return;
        }
        stats.reduction = reducer.reduce_graph(graph);
        drop(reducer);
        stats.folded = folding.folded();
    }
}

/// Compile `info` with the default configuration.
pub fn compile(info: &CompilationInfo) -> JitResult<CompiledFunction> {
    Pipeline::default().run(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BuildError, JitError};
    use crate::ir::operators::{Constant32Value, Opcode};
    use seaflow_bytecode::{BinaryOp, FunctionId, FunctionInfo, Immediate, PathBuilder, Register, Width};

    fn constant_sum() -> CompilationInfo {
        let mut b = PathBuilder::new(FunctionInfo::new(FunctionId(0), "sum", 0, 3));
        b.load_immediate(Register(0), Immediate::I32(2));
        b.load_immediate(Register(1), Immediate::I32(40));
        b.binary(BinaryOp::Add, Width::I32, Register(2), Register(0), Register(1));
        b.ret(Register(2));
        b.finish().unwrap()
    }

    #[test]
    fn test_pipeline_folds_and_schedules() {
        let compiled = compile(&constant_sum()).unwrap();
        let g = &compiled.graph;
        let ret = g.input(g.end(), 0);
        let value = g.value_input(ret, 0);
        assert_eq!(g.opcode(value), Opcode::Constant32);
        assert_eq!(g.op_param::<Constant32Value>(value).as_i32(), 42);

        assert_eq!(compiled.stats.folded, 1);
        assert_eq!(compiled.schedule.block_for_node(value), Some(compiled.schedule.start()));
        assert!(compiled.stats.final_size < compiled.stats.initial_size);
        assert!(compiled.stats.size_reduction() < 1.0);
    }

    #[test]
    fn test_minimal_config_keeps_arithmetic() {
        let compiled = Pipeline::new(JitConfig::minimal()).run(&constant_sum()).unwrap();
        let g = &compiled.graph;
        let value = g.value_input(g.input(g.end(), 0), 0);
        assert_eq!(g.opcode(value), Opcode::Int32Add);
        assert_eq!(compiled.stats.folded, 0);
        assert_eq!(compiled.stats.reduction, ReductionStats::default());
    }

    #[test]
    fn test_build_errors_surface() {
        let info = CompilationInfo::new(FunctionInfo::new(FunctionId(0), "empty", 0, 0));
        let err = compile(&info).unwrap_err();
        assert_eq!(err, JitError::Build(BuildError::EmptyPath));
    }
}
