//! Fence annotation for reuse across asynchronous boundaries.
//!
//! When a buffer is handed from one value to another and either side may
//! still be in flight (asynchronous execution), the executor must wait on a
//! fence before the buffer is touched again. The planner only signals where
//! that wait is required; it never inserts the synchronization itself.
//!
//! The policy is fail-safe: a node whose synchronicity is unknown is treated
//! as asynchronous. Over-fencing costs a wait; under-fencing corrupts data.

use std::collections::BTreeMap;

use tracing::debug;

use crate::graph::{NodeId, ValueGraph, ValueId};
use crate::plan::reuse::{resolve_owner, BufferAssignment};
use crate::plan::types::AllocKind;

/// Fence flags per value and per node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FenceFlags {
    /// Indexed by value id; true for every member of a fenced reuse chain
    pub value_fences: Vec<bool>,
    /// Indexed by node id; true for every node touching a fenced chain
    pub node_fences: Vec<bool>,
}

/// Mark reuse chains (and the nodes touching them) that cross an
/// asynchronous boundary.
///
/// One fence per chain: if any node producing or consuming any chain member
/// may run asynchronously, every member of that chain gets `needs_fence` and
/// every touching node gets its node-level flag.
pub fn annotate_fences(graph: &ValueGraph, assignments: &[BufferAssignment]) -> FenceFlags {
    let num_values = graph.num_values();
    let mut value_fences = vec![false; num_values];
    let mut node_fences = vec![false; graph.num_nodes()];

    let consumers = graph.consumer_map();

    // Group reuse-chain members under their owner. Values that never share a
    // buffer need no fence. BTreeMap keeps chain processing in id order.
    let mut chains: BTreeMap<ValueId, Vec<ValueId>> = BTreeMap::new();
    for (index, assignment) in assignments.iter().enumerate() {
        if assignment.kind == AllocKind::Reuse {
            let value = ValueId(index);
            let owner = resolve_owner(assignments, value);
            let chain = chains.entry(owner).or_default();
            if chain.is_empty() {
                chain.push(owner);
            }
            chain.push(value);
        }
    }
    // Views share their owner's buffer too; they join the chain wherever a
    // reuse handoff exists. A pure view without reuse needs no fence.
    for (index, assignment) in assignments.iter().enumerate() {
        if assignment.kind != AllocKind::NoAllocation {
            continue;
        }
        if let Some(owner) = assignment.alias_owner {
            if let Some(chain) = chains.get_mut(&owner) {
                chain.push(ValueId(index));
            }
        }
    }

    let touching_nodes = |value: ValueId| {
        graph
            .producer(value)
            .into_iter()
            .chain(consumers[value.0].iter().copied())
    };

    let mut fenced_chains = 0usize;
    for (_, members) in chains {
        let crosses_async = members.iter().any(|&member| {
            touching_nodes(member).any(|node: NodeId| graph.node(node).effectively_async())
        });
        if !crosses_async {
            continue;
        }
        fenced_chains += 1;
        for &member in &members {
            value_fences[member.0] = true;
            for node in touching_nodes(member) {
                node_fences[node.0] = true;
            }
        }
    }

    debug!(fenced_chains, "fence annotation complete");
    FenceFlags {
        value_fences,
        node_fences,
    }
}
