//! Top-level planning entry point.
//!
//! Runs the full pipeline once per (graph, device-assignment) pair:
//! ordering, liveness, reuse allocation, free scheduling, fence annotation,
//! assembly. Planning is a pure function of the graph and the options:
//! re-running it on the same input always yields an identical plan. There is
//! no partial output; either a fully validated plan is returned or planning
//! fails and the graph must not be executed.

use tracing::debug;

use crate::error::PlanResult;
use crate::graph::ValueGraph;
use crate::plan::assemble::assemble_plan;
use crate::plan::fence::annotate_fences;
use crate::plan::free_schedule::schedule_frees;
use crate::plan::liveness::compute_liveness;
use crate::plan::order::compute_execution_order;
use crate::plan::reuse::assign_buffers;
use crate::plan::types::Plan;

/// Planning policy knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerOptions {
    /// Allow graph-output buffers to be recycled once their last in-graph
    /// consumer has run. Off by default: the usual contract is that output
    /// buffers survive untouched until the caller reads them.
    pub reuse_graph_outputs: bool,
    /// Allow same-step in-place reuse through operations marked in-place-safe
    pub enable_inplace_reuse: bool,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            reuse_graph_outputs: false,
            enable_inplace_reuse: true,
        }
    }
}

impl PlannerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable recycling of graph-output buffers.
    pub fn with_reuse_graph_outputs(mut self, enabled: bool) -> Self {
        self.reuse_graph_outputs = enabled;
        self
    }

    /// Enable or disable in-place reuse.
    pub fn with_inplace_reuse(mut self, enabled: bool) -> Self {
        self.enable_inplace_reuse = enabled;
        self
    }
}

/// Static execution-and-memory planner.
///
/// Cheap to construct; holds only policy. The produced [`Plan`] is immutable
/// and may be shared read-only across any number of concurrent executions.
#[derive(Debug, Clone, Default)]
pub struct Planner {
    options: PlannerOptions,
}

impl Planner {
    /// Planner with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Planner with explicit options.
    pub fn with_options(options: PlannerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PlannerOptions {
        &self.options
    }

    /// Plan the given graph.
    ///
    /// Fails with a graph-structure error on a malformed graph (cycle,
    /// missing producer) before any plan exists, or with a plan-validation
    /// error if an internal invariant is violated after assembly.
    pub fn plan(&self, graph: &ValueGraph) -> PlanResult<Plan> {
        debug!(
            nodes = graph.num_nodes(),
            values = graph.num_values(),
            "planning graph"
        );
        graph.validate()?;

        let order = compute_execution_order(graph)?;
        let liveness = compute_liveness(graph, &order, self.options.reuse_graph_outputs)?;
        let assignments = assign_buffers(graph, &order, &liveness, &self.options)?;
        let schedule = schedule_frees(&liveness, order.len())?;
        let fences = annotate_fences(graph, &assignments);
        assemble_plan(graph, order, &liveness, &assignments, schedule, fences)
    }
}

/// Plan a graph with default options.
pub fn plan_graph(graph: &ValueGraph) -> PlanResult<Plan> {
    Planner::new().plan(graph)
}
