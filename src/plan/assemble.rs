//! Final plan assembly and invariant validation.
//!
//! Combines the outputs of ordering, liveness, reuse allocation, free
//! scheduling and fence annotation into one immutable [`Plan`], then checks
//! every cross-component invariant. A violation here is a planner defect:
//! planning is deterministic, so the error is surfaced as-is, never patched
//! and never retried.

use tracing::debug;

use crate::error::{PlanError, PlanResult};
use crate::graph::{NodeId, ValueGraph, ValueId, ValueKind};
use crate::plan::fence::FenceFlags;
use crate::plan::free_schedule::FreeSchedule;
use crate::plan::reuse::BufferAssignment;
use crate::plan::types::{AllocKind, AllocationRecord, ExecutionStep, LiveInterval, Plan};

/// Assemble and validate the immutable plan.
pub fn assemble_plan(
    graph: &ValueGraph,
    order: Vec<NodeId>,
    liveness: &[LiveInterval],
    assignments: &[BufferAssignment],
    schedule: FreeSchedule,
    fences: FenceFlags,
) -> PlanResult<Plan> {
    validate_order(graph, &order)?;
    validate_reuse(liveness, assignments)?;
    validate_free_schedule(liveness, &schedule)?;

    let mut allocations = Vec::new();
    allocations.try_reserve_exact(graph.num_values())?;
    for (index, assignment) in assignments.iter().enumerate() {
        allocations.push(AllocationRecord {
            kind: assignment.kind,
            reused_value: assignment.reused,
            mem_space: graph.value(ValueId(index)).mem_space,
            needs_fence: fences.value_fences[index],
            interval: liveness[index],
        });
    }

    let mut steps = Vec::new();
    steps.try_reserve_exact(order.len())?;
    for (&node, range) in order.iter().zip(schedule.ranges.iter()) {
        steps.push(ExecutionStep {
            node,
            free_range: range.clone(),
        });
    }

    // Initializers are arena-allocated in ascending id order; activations in
    // def-site execution order. Both orders are fixed properties of the plan.
    let initializer_order: Vec<ValueId> = graph
        .values()
        .iter()
        .enumerate()
        .filter(|(_, value)| value.kind == ValueKind::Initializer)
        .map(|(index, _)| ValueId(index))
        .collect();

    let mut activation_order = Vec::new();
    for &node in &order {
        for &output in &graph.node(node).outputs {
            if assignments[output.0].kind == AllocKind::Allocate {
                activation_order.push(output);
            }
        }
    }

    debug!(
        steps = steps.len(),
        values = allocations.len(),
        "plan assembled"
    );
    Ok(Plan {
        steps,
        allocations,
        free_list: schedule.free_list,
        node_fences: fences.node_fences,
        initializer_order,
        activation_order,
    })
}

/// The node order must be a permutation of the graph's nodes.
fn validate_order(graph: &ValueGraph, order: &[NodeId]) -> PlanResult<()> {
    if order.len() != graph.num_nodes() {
        return Err(PlanError::OrderNotPermutation {
            reason: format!(
                "{} nodes ordered, graph has {}",
                order.len(),
                graph.num_nodes()
            ),
        });
    }
    let mut seen = vec![false; graph.num_nodes()];
    for &node in order {
        match seen.get_mut(node.0) {
            Some(slot) if !*slot => *slot = true,
            Some(_) => {
                return Err(PlanError::OrderNotPermutation {
                    reason: format!("{node:?} appears twice"),
                })
            }
            None => return Err(PlanError::UnknownNode(node)),
        }
    }
    Ok(())
}

/// No reuse chains, and values sharing a buffer must have disjoint live
/// intervals except for explicitly permitted same-step in-place aliases.
/// `NoAllocation` views join their owner's chain: they never write, but they
/// pin the buffer until their own last use.
fn validate_reuse(liveness: &[LiveInterval], assignments: &[BufferAssignment]) -> PlanResult<()> {
    // Collect chain members per owner, then walk each chain in first-use
    // order tracking the buffer's extended end.
    let mut chains: Vec<Vec<ValueId>> = vec![Vec::new(); assignments.len()];

    for (index, assignment) in assignments.iter().enumerate() {
        let value = ValueId(index);
        match (assignment.kind, assignment.reused) {
            (AllocKind::Reuse, Some(target)) => {
                if assignments[target.0].kind == AllocKind::Reuse {
                    return Err(PlanError::ReuseChain { value, target });
                }
                chains[target.0].push(value);
            }
            (AllocKind::Reuse, None) => {
                return Err(PlanError::ReuseTargetMissing { value });
            }
            (AllocKind::NoAllocation, _) => {
                if let Some(owner) = assignment.alias_owner {
                    chains[owner.0].push(value);
                }
            }
            _ => {}
        }
    }

    for (owner_index, members) in chains.iter().enumerate() {
        if members.is_empty() {
            continue;
        }
        let owner = ValueId(owner_index);
        let mut ordered: Vec<ValueId> = members.clone();
        ordered.sort_by_key(|value| (liveness[value.0].first_use, *value));

        let mut buffer_end = liveness[owner.0].last_use;
        for &member in &ordered {
            let interval = liveness[member.0];
            if assignments[member.0].kind == AllocKind::NoAllocation {
                // A view overlaps its owner legally; it only extends the
                // span during which the buffer must not be overwritten.
                buffer_end = buffer_end.max(interval.last_use);
                continue;
            }
            let same_step_inplace =
                assignments[member.0].inplace && interval.first_use == buffer_end;
            if interval.first_use <= buffer_end && !same_step_inplace {
                return Err(PlanError::OverlappingLiveness {
                    value: member,
                    owner,
                });
            }
            buffer_end = buffer_end.max(interval.last_use);
        }
    }
    Ok(())
}

/// Free ranges must tile the free list in increasing step order, and the
/// list must name every finite-lifetime value exactly once.
fn validate_free_schedule(liveness: &[LiveInterval], schedule: &FreeSchedule) -> PlanResult<()> {
    let mut cursor = 0usize;
    for (step, range) in schedule.ranges.iter().enumerate() {
        if range.start != cursor || range.end < range.start {
            return Err(PlanError::BadFreeRange {
                step,
                reason: format!("range {range:?} does not start at offset {cursor}"),
            });
        }
        cursor = range.end;
    }
    if cursor != schedule.free_list.len() {
        return Err(PlanError::IncompleteFreeList {
            reason: format!(
                "ranges cover {cursor} entries, free list has {}",
                schedule.free_list.len()
            ),
        });
    }

    let mut seen = vec![0usize; liveness.len()];
    for &value in &schedule.free_list {
        match seen.get_mut(value.0) {
            Some(count) => *count += 1,
            None => {
                return Err(PlanError::IncompleteFreeList {
                    reason: format!("{value:?} is not a graph value"),
                })
            }
        }
    }
    for (index, interval) in liveness.iter().enumerate() {
        let expected = usize::from(interval.last_use.is_finite());
        if seen[index] != expected {
            return Err(PlanError::IncompleteFreeList {
                reason: format!(
                    "ValueId({index}) released {} time(s), expected {expected}",
                    seen[index]
                ),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DType, NodeDesc, ValueDesc, ValueType};
    use crate::plan::free_schedule::schedule_frees;
    use crate::plan::liveness::compute_liveness;
    use crate::plan::order::compute_execution_order;
    use crate::plan::reuse::assign_buffers;
    use crate::plan::types::Position;
    use crate::planner::PlannerOptions;

    fn f32_tensor() -> ValueType {
        ValueType::tensor(DType::F32, 2)
    }

    struct Pipeline {
        graph: ValueGraph,
        order: Vec<NodeId>,
        liveness: Vec<LiveInterval>,
        assignments: Vec<BufferAssignment>,
        schedule: FreeSchedule,
        fences: FenceFlags,
    }

    fn pipeline() -> Pipeline {
        let mut graph = ValueGraph::new();
        let x = graph.add_value(ValueDesc::new("x", f32_tensor(), ValueKind::GraphInput));
        let v0 = graph.add_value(ValueDesc::new("v0", f32_tensor(), ValueKind::Computed));
        let v1 = graph.add_value(ValueDesc::new("v1", f32_tensor(), ValueKind::Computed));
        let v2 = graph.add_value(ValueDesc::new("v2", f32_tensor(), ValueKind::Computed));
        let out = graph.add_value(ValueDesc::new("out", f32_tensor(), ValueKind::GraphOutput));
        graph.add_node(NodeDesc::new("n0", vec![x], vec![v0])).unwrap();
        graph.add_node(NodeDesc::new("n1", vec![v0], vec![v1])).unwrap();
        graph.add_node(NodeDesc::new("n2", vec![v1], vec![v2])).unwrap();
        graph.add_node(NodeDesc::new("n3", vec![v2], vec![out])).unwrap();

        let order = compute_execution_order(&graph).unwrap();
        let liveness = compute_liveness(&graph, &order, false).unwrap();
        let assignments =
            assign_buffers(&graph, &order, &liveness, &PlannerOptions::default()).unwrap();
        let schedule = schedule_frees(&liveness, order.len()).unwrap();
        let fences = crate::plan::fence::annotate_fences(&graph, &assignments);
        Pipeline {
            graph,
            order,
            liveness,
            assignments,
            schedule,
            fences,
        }
    }

    #[test]
    fn test_valid_pipeline_assembles() {
        let p = pipeline();
        let plan = assemble_plan(
            &p.graph,
            p.order,
            &p.liveness,
            &p.assignments,
            p.schedule,
            p.fences,
        )
        .unwrap();
        assert_eq!(plan.num_steps(), 4);
        assert_eq!(plan.num_values(), 5);
    }

    #[test]
    fn test_truncated_order_rejected() {
        let mut p = pipeline();
        p.order.pop();
        let err = assemble_plan(
            &p.graph,
            p.order,
            &p.liveness,
            &p.assignments,
            p.schedule,
            p.fences,
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::OrderNotPermutation { .. }));
        assert!(err.is_validation_error());
    }

    #[test]
    fn test_duplicate_node_in_order_rejected() {
        let mut p = pipeline();
        let n = p.order[0];
        *p.order.last_mut().unwrap() = n;
        let err = assemble_plan(
            &p.graph,
            p.order,
            &p.liveness,
            &p.assignments,
            p.schedule,
            p.fences,
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::OrderNotPermutation { .. }));
    }

    #[test]
    fn test_reuse_chain_rejected() {
        let mut p = pipeline();
        // v2 legitimately reuses v0 (ValueId(1)); corrupt v1 to reuse v2,
        // forming a chain.
        assert_eq!(p.assignments[3].kind, AllocKind::Reuse);
        p.assignments[2] = BufferAssignment {
            kind: AllocKind::Reuse,
            reused: Some(ValueId(3)),
            inplace: false,
            alias_owner: None,
        };
        let err = assemble_plan(
            &p.graph,
            p.order,
            &p.liveness,
            &p.assignments,
            p.schedule,
            p.fences,
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::ReuseChain { .. }));
    }

    #[test]
    fn test_overlapping_reuse_rejected() {
        let mut p = pipeline();
        // v1 (live [1,2]) claims v0's buffer (live [0,1]): first use not
        // strictly after the buffer's end and not an in-place alias.
        p.assignments[2] = BufferAssignment {
            kind: AllocKind::Reuse,
            reused: Some(ValueId(1)),
            inplace: false,
            alias_owner: None,
        };
        let err = assemble_plan(
            &p.graph,
            p.order,
            &p.liveness,
            &p.assignments,
            p.schedule,
            p.fences,
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::OverlappingLiveness { .. }));
    }

    #[test]
    fn test_reuse_without_target_rejected() {
        let mut p = pipeline();
        p.assignments[3] = BufferAssignment {
            kind: AllocKind::Reuse,
            reused: None,
            inplace: false,
            alias_owner: None,
        };
        let err = assemble_plan(
            &p.graph,
            p.order,
            &p.liveness,
            &p.assignments,
            p.schedule,
            p.fences,
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::ReuseTargetMissing { .. }));
    }

    #[test]
    fn test_reuse_overlapping_live_view_rejected() {
        // x is recyclable and `view` aliases its buffer through step 2. A
        // plan handing that buffer to a value live from step 1 must be
        // rejected even though x's own interval ended at step 0.
        let mut graph = ValueGraph::new();
        let x = graph.add_value(
            ValueDesc::new("x", f32_tensor(), ValueKind::GraphInput)
                .with_externally_owned(false),
        );
        let view = graph.add_value(ValueDesc::new("view", f32_tensor(), ValueKind::Computed));
        let a = graph.add_value(ValueDesc::new("a", f32_tensor(), ValueKind::Computed));
        let out = graph.add_value(ValueDesc::new("out", f32_tensor(), ValueKind::GraphOutput));
        graph
            .add_node(NodeDesc::new("identity", vec![x], vec![view]).aliasing_input(0))
            .unwrap();
        graph.add_node(NodeDesc::new("n1", vec![view], vec![a])).unwrap();
        graph
            .add_node(NodeDesc::new("n2", vec![view, a], vec![out]))
            .unwrap();

        let order = compute_execution_order(&graph).unwrap();
        let liveness = compute_liveness(&graph, &order, false).unwrap();
        let mut assignments =
            assign_buffers(&graph, &order, &liveness, &PlannerOptions::default()).unwrap();
        assert_eq!(assignments[a.0].kind, AllocKind::Allocate);
        assignments[a.0] = BufferAssignment {
            kind: AllocKind::Reuse,
            reused: Some(x),
            inplace: false,
            alias_owner: None,
        };

        let schedule = schedule_frees(&liveness, order.len()).unwrap();
        let fences = crate::plan::fence::annotate_fences(&graph, &assignments);
        let err = assemble_plan(&graph, order, &liveness, &assignments, schedule, fences)
            .unwrap_err();
        assert!(matches!(err, PlanError::OverlappingLiveness { .. }));
    }

    #[test]
    fn test_gapped_free_ranges_rejected() {
        let mut p = pipeline();
        p.schedule.ranges[1] = (p.schedule.ranges[1].start + 1)..p.schedule.ranges[1].end;
        let err = assemble_plan(
            &p.graph,
            p.order,
            &p.liveness,
            &p.assignments,
            p.schedule,
            p.fences,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PlanError::BadFreeRange { .. } | PlanError::IncompleteFreeList { .. }
        ));
    }

    #[test]
    fn test_missing_release_rejected() {
        let mut p = pipeline();
        // Drop the last released value and shrink the final range to match
        // the tiling, leaving a finite-lifetime value never released.
        p.schedule.free_list.pop();
        let last = p.schedule.ranges.last().cloned().unwrap();
        *p.schedule.ranges.last_mut().unwrap() = last.start..last.end - 1;
        let err = assemble_plan(
            &p.graph,
            p.order,
            &p.liveness,
            &p.assignments,
            p.schedule,
            p.fences,
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::IncompleteFreeList { .. }));
    }

    #[test]
    fn test_infinite_value_in_free_list_rejected() {
        let mut p = pipeline();
        // `out` (ValueId(4)) is a graph output and must never be released.
        assert_eq!(p.liveness[4].last_use, Position::End);
        p.schedule.free_list.push(ValueId(4));
        let last = p.schedule.ranges.last().cloned().unwrap();
        *p.schedule.ranges.last_mut().unwrap() = last.start..last.end + 1;
        let err = assemble_plan(
            &p.graph,
            p.order,
            &p.liveness,
            &p.assignments,
            p.schedule,
            p.fences,
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::IncompleteFreeList { .. }));
    }

    #[test]
    fn test_auxiliary_orders() {
        let mut graph = ValueGraph::new();
        let w0 = graph.add_value(ValueDesc::new("w0", f32_tensor(), ValueKind::Initializer));
        let x = graph.add_value(ValueDesc::new("x", f32_tensor(), ValueKind::GraphInput));
        let w1 = graph.add_value(ValueDesc::new("w1", f32_tensor(), ValueKind::Initializer));
        let a = graph.add_value(ValueDesc::new("a", f32_tensor(), ValueKind::Computed));
        let out = graph.add_value(ValueDesc::new("out", f32_tensor(), ValueKind::GraphOutput));
        graph
            .add_node(NodeDesc::new("n0", vec![x, w0], vec![a]))
            .unwrap();
        graph
            .add_node(NodeDesc::new("n1", vec![a, w1], vec![out]))
            .unwrap();

        let order = compute_execution_order(&graph).unwrap();
        let liveness = compute_liveness(&graph, &order, false).unwrap();
        let assignments =
            assign_buffers(&graph, &order, &liveness, &PlannerOptions::default()).unwrap();
        let schedule = schedule_frees(&liveness, order.len()).unwrap();
        let fences = crate::plan::fence::annotate_fences(&graph, &assignments);
        let plan =
            assemble_plan(&graph, order, &liveness, &assignments, schedule, fences).unwrap();

        assert_eq!(plan.initializer_allocation_order(), &[w0, w1]);
        assert_eq!(plan.activation_allocation_order(), &[a, out]);
    }
}
