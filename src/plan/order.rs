//! Deterministic topological ordering of graph nodes.
//!
//! Later reuse decisions depend on the exact order chosen, so the tie-break
//! among ready nodes must be stable: the lowest original node id (declaration
//! order) always wins. Re-running on the same graph yields the same order.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use tracing::debug;

use crate::error::{PlanError, PlanResult};
use crate::graph::{NodeId, ValueGraph};

/// Compute one total node order in which every node appears strictly after
/// every node producing one of its inputs.
///
/// Kahn's algorithm with a min-heap of ready node ids. Fails with
/// [`PlanError::CycleDetected`] if the graph is cyclic.
pub fn compute_execution_order(graph: &ValueGraph) -> PlanResult<Vec<NodeId>> {
    let num_nodes = graph.num_nodes();
    let mut indegree = vec![0usize; num_nodes];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); num_nodes];

    for (index, node) in graph.nodes().iter().enumerate() {
        for &input in &node.inputs {
            if let Some(producer) = graph.producer(input) {
                successors[producer.0].push(index);
                indegree[index] += 1;
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = (0..num_nodes)
        .filter(|&index| indegree[index] == 0)
        .map(Reverse)
        .collect();

    let mut order = Vec::new();
    order.try_reserve_exact(num_nodes)?;

    while let Some(Reverse(index)) = ready.pop() {
        order.push(NodeId(index));
        for &succ in &successors[index] {
            indegree[succ] -= 1;
            if indegree[succ] == 0 {
                ready.push(Reverse(succ));
            }
        }
    }

    if order.len() != num_nodes {
        return Err(PlanError::CycleDetected {
            remaining: num_nodes - order.len(),
        });
    }

    debug!(nodes = num_nodes, "computed execution order");
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DType, NodeDesc, ValueDesc, ValueKind, ValueType};

    fn val(graph: &mut ValueGraph, name: &str, kind: ValueKind) -> crate::graph::ValueId {
        graph.add_value(ValueDesc::new(name, ValueType::tensor(DType::F32, 2), kind))
    }

    #[test]
    fn test_producers_precede_consumers() {
        let mut graph = ValueGraph::new();
        let x = val(&mut graph, "x", ValueKind::GraphInput);
        let v1 = val(&mut graph, "v1", ValueKind::Computed);
        let v2 = val(&mut graph, "v2", ValueKind::Computed);
        let v3 = val(&mut graph, "v3", ValueKind::GraphOutput);
        graph.add_node(NodeDesc::new("n1", vec![x], vec![v1])).unwrap();
        graph.add_node(NodeDesc::new("n2", vec![v1], vec![v2])).unwrap();
        graph
            .add_node(NodeDesc::new("n3", vec![v1, v2], vec![v3]))
            .unwrap();

        let order = compute_execution_order(&graph).unwrap();
        assert_eq!(order, vec![NodeId(0), NodeId(1), NodeId(2)]);
    }

    #[test]
    fn test_tie_break_is_declaration_order() {
        // Two independent branches off one input: both ready at once,
        // declaration order decides.
        let mut graph = ValueGraph::new();
        let x = val(&mut graph, "x", ValueKind::GraphInput);
        let a = val(&mut graph, "a", ValueKind::Computed);
        let b = val(&mut graph, "b", ValueKind::Computed);
        let c = val(&mut graph, "c", ValueKind::GraphOutput);
        graph.add_node(NodeDesc::new("branch_a", vec![x], vec![a])).unwrap();
        graph.add_node(NodeDesc::new("branch_b", vec![x], vec![b])).unwrap();
        graph
            .add_node(NodeDesc::new("join", vec![a, b], vec![c]))
            .unwrap();

        let order = compute_execution_order(&graph).unwrap();
        assert_eq!(order, vec![NodeId(0), NodeId(1), NodeId(2)]);
    }

    #[test]
    fn test_order_is_stable_across_runs() {
        let mut graph = ValueGraph::new();
        let x = val(&mut graph, "x", ValueKind::GraphInput);
        let mut outs = Vec::new();
        for i in 0..8 {
            let v = val(&mut graph, &format!("v{i}"), ValueKind::Computed);
            graph
                .add_node(NodeDesc::new(format!("n{i}"), vec![x], vec![v]))
                .unwrap();
            outs.push(v);
        }

        let first = compute_execution_order(&graph).unwrap();
        let second = compute_execution_order(&graph).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_cycle_detected() {
        let mut graph = ValueGraph::new();
        let a = val(&mut graph, "a", ValueKind::Computed);
        let b = val(&mut graph, "b", ValueKind::Computed);
        graph.add_node(NodeDesc::new("n0", vec![b], vec![a])).unwrap();
        graph.add_node(NodeDesc::new("n1", vec![a], vec![b])).unwrap();

        let err = compute_execution_order(&graph).unwrap_err();
        assert!(matches!(err, PlanError::CycleDetected { remaining: 2 }));
        assert!(err.is_graph_error());
    }

    #[test]
    fn test_empty_graph() {
        let graph = ValueGraph::new();
        let order = compute_execution_order(&graph).unwrap();
        assert!(order.is_empty());
    }
}
