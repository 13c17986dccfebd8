//! Compiler configuration.

/// Configuration for the whole build → reduce → schedule pipeline.
#[derive(Debug, Clone, Default)]
pub struct JitConfig {
    pub reducer: ReducerConfig,
    pub scheduler: SchedulerConfig,
}

impl JitConfig {
    /// Skip every optional transformation.
    pub fn minimal() -> Self {
        Self {
            reducer: ReducerConfig::minimal(),
            scheduler: SchedulerConfig::minimal(),
        }
    }

    /// Everything enabled; the same as the default today.
    pub fn for_testing() -> Self {
        Self {
            reducer: ReducerConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Which reducers the graph reducer runs.
#[derive(Debug, Clone)]
pub struct ReducerConfig {
    /// Fold integer arithmetic on constants.
    pub enable_constant_folding: bool,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            enable_constant_folding: true,
        }
    }
}

impl ReducerConfig {
    pub fn minimal() -> Self {
        Self {
            enable_constant_folding: false,
        }
    }
}

/// Scheduler options.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Give every critical edge a block of its own.
    pub split_critical_edges: bool,

    /// Drop phis whose inputs are all the same node.
    pub eliminate_redundant_phis: bool,

    /// Mark blocks reachable only through deferred blocks as deferred.
    pub propagate_deferred: bool,

    /// Move loop-invariant nodes in front of their loop.
    pub hoist_out_of_loops: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            split_critical_edges: true,
            eliminate_redundant_phis: true,
            propagate_deferred: true,
            hoist_out_of_loops: true,
        }
    }
}

impl SchedulerConfig {
    /// Plain placement with no clean-ups or hoisting.
    pub fn minimal() -> Self {
        Self {
            split_critical_edges: false,
            eliminate_redundant_phis: false,
            propagate_deferred: false,
            hoist_out_of_loops: false,
        }
    }
}
