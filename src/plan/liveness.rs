//! Per-value liveness analysis over a fixed execution order.
//!
//! One pass over the nodes, linear in the edge count. Positions are explicit
//! [`Position`] values keyed to the order passed in; nothing here mutates
//! shared state.

use tracing::debug;

use crate::error::PlanResult;
use crate::graph::{NodeId, ValueGraph, ValueKind};
use crate::plan::types::{LiveInterval, Position};

/// Compute `[first_use, last_use]` for every value.
///
/// - Graph inputs and initializers are alive from [`Position::Start`].
/// - Computed values come alive at their producing node's position.
/// - `last_use` is the position of the last consuming node; a value with no
///   consumers dies at its own `first_use`.
/// - Graph outputs are kept alive past the end ([`Position::End`]) unless
///   `recycle_outputs` is set, in which case their lifetime ends at their
///   last in-graph consumer and their buffer becomes recyclable.
pub fn compute_liveness(
    graph: &ValueGraph,
    order: &[NodeId],
    recycle_outputs: bool,
) -> PlanResult<Vec<LiveInterval>> {
    let mut position_of_node = vec![0usize; graph.num_nodes()];
    for (step, &node) in order.iter().enumerate() {
        position_of_node[node.0] = step;
    }

    let mut intervals = Vec::new();
    intervals.try_reserve_exact(graph.num_values())?;
    for (index, value) in graph.values().iter().enumerate() {
        let first_use = if value.kind.is_externally_supplied() {
            Position::Start
        } else {
            match graph.producer(crate::graph::ValueId(index)) {
                Some(producer) => Position::At(position_of_node[producer.0]),
                // Unreachable on a validated graph; treat as alive from start.
                None => Position::Start,
            }
        };
        intervals.push(LiveInterval {
            first_use,
            last_use: first_use,
        });
    }

    for (step, &node) in order.iter().enumerate() {
        for &input in &graph.node(node).inputs {
            let interval = &mut intervals[input.0];
            interval.last_use = interval.last_use.max(Position::At(step));
        }
    }

    if !recycle_outputs {
        for (index, value) in graph.values().iter().enumerate() {
            if value.kind == ValueKind::GraphOutput {
                intervals[index].last_use = Position::End;
            }
        }
    }

    debug!(values = intervals.len(), "computed live intervals");
    Ok(intervals)
}
