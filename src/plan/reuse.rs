//! Buffer-reuse allocation over a fixed order and liveness result.
//!
//! Walks the nodes in execution order and decides, for every computed value,
//! whether it gets a fresh buffer, recycles a retired one, or needs no buffer
//! at all. Retired buffers sit in a free-list keyed by type-compatibility
//! class (declared type + memory space, never byte size, since shapes may be
//! symbolic) and are handed out first-fit, FIFO within a class.
//!
//! Aliasing is a union-find-style relation: a reuse target is always the
//! chain's ultimate owner, never itself a reuser, so resolving a value to its
//! buffer is a single hop and the relation stays acyclic.
//!
//! Everything here is deterministic: identical order + liveness input yields
//! an identical assignment. No unordered container feeds any decision.

use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, trace};

use crate::error::PlanResult;
use crate::graph::{MemorySpace, NodeId, ValueGraph, ValueId, ValueKind, ValueType};
use crate::plan::types::{AllocKind, LiveInterval, Position};
use crate::planner::PlannerOptions;

/// Per-value outcome of reuse allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferAssignment {
    /// Chosen allocation strategy
    pub kind: AllocKind,
    /// Chain owner whose buffer backs this value; `Some` iff `kind` is Reuse
    pub reused: Option<ValueId>,
    /// The reuse is a same-step in-place alias over a dying input
    pub inplace: bool,
    /// Ultimate external owner whose buffer this value reads without a copy;
    /// `Some` iff `kind` is NoAllocation. The alias pins that buffer for its
    /// whole lifetime.
    pub alias_owner: Option<ValueId>,
}

impl BufferAssignment {
    fn new(kind: AllocKind) -> Self {
        Self {
            kind,
            reused: None,
            inplace: false,
            alias_owner: None,
        }
    }
}

/// Free-list key: buffers are interchangeable only within one memory space
/// and one declared type.
type TypeClass = (MemorySpace, ValueType);

struct RetiredPool {
    pools: BTreeMap<TypeClass, VecDeque<ValueId>>,
}

impl RetiredPool {
    fn new() -> Self {
        Self {
            pools: BTreeMap::new(),
        }
    }

    fn offer(&mut self, class: TypeClass, owner: ValueId) {
        self.pools.entry(class).or_default().push_back(owner);
    }

    /// First-fit: the oldest retired buffer of the exact class.
    fn take(&mut self, class: &TypeClass) -> Option<ValueId> {
        self.pools.get_mut(class).and_then(|pool| pool.pop_front())
    }
}

/// Assign an allocation strategy to every value.
///
/// `liveness` must come from the same `order`. Graph inputs and initializers
/// are `External`; untransformed aliases of external values are
/// `NoAllocation`; everything else is `Allocate` or `Reuse`.
pub fn assign_buffers(
    graph: &ValueGraph,
    order: &[NodeId],
    liveness: &[LiveInterval],
    options: &PlannerOptions,
) -> PlanResult<Vec<BufferAssignment>> {
    let num_values = graph.num_values();

    let mut assignments = Vec::new();
    assignments.try_reserve_exact(num_values)?;
    for value in graph.values() {
        let kind = if value.kind.is_externally_supplied() {
            AllocKind::External
        } else {
            AllocKind::Allocate
        };
        assignments.push(BufferAssignment::new(kind));
    }

    // Per-owner end of the buffer's extended lifetime (max over all values
    // sharing it). Only meaningful for chain owners.
    let mut buffer_end: Vec<Position> = liveness.iter().map(|l| l.last_use).collect();
    // Owners currently sitting in the free list.
    let mut retired = vec![false; num_values];
    let mut free = RetiredPool::new();

    for (step, &node_id) in order.iter().enumerate() {
        let node = graph.node(node_id);

        for (out_index, &value) in node.outputs.iter().enumerate() {
            let desc = graph.value(value);

            // Untransformed alias of an externally supplied value: no buffer.
            // The alias pins its owner's buffer, so the owner must not retire
            // before the alias's last use.
            if out_index == 0 {
                if let Some(alias_index) = node.alias_of_input {
                    let source = node.inputs[alias_index];
                    let source_kind = assignments[source.0].kind;
                    if matches!(source_kind, AllocKind::External | AllocKind::NoAllocation) {
                        let owner = assignments[source.0].alias_owner.unwrap_or(source);
                        buffer_end[owner.0] =
                            buffer_end[owner.0].max(liveness[value.0].last_use);
                        assignments[value.0] = BufferAssignment {
                            kind: AllocKind::NoAllocation,
                            reused: None,
                            inplace: false,
                            alias_owner: Some(owner),
                        };
                        trace!(?value, ?owner, "no allocation (external alias)");
                        continue;
                    }
                }
            }

            // Graph outputs always get their own buffer: their content
            // outlives the graph and must never back another value's writes.
            if desc.kind == ValueKind::GraphOutput {
                continue;
            }

            // Same-step in-place reuse of a dying input.
            if options.enable_inplace_reuse && node.inplace_safe && out_index == 0 {
                if let Some(owner) = find_inplace_target(
                    graph,
                    node.inputs.as_slice(),
                    value,
                    step,
                    liveness,
                    &assignments,
                    &buffer_end,
                ) {
                    buffer_end[owner.0] = buffer_end[owner.0].max(liveness[value.0].last_use);
                    assignments[value.0] = BufferAssignment {
                        kind: AllocKind::Reuse,
                        reused: Some(owner),
                        inplace: true,
                        alias_owner: None,
                    };
                    trace!(?value, ?owner, step, "in-place reuse");
                    continue;
                }
            }

            // Retired buffer of the same type class, oldest first.
            let class = (desc.mem_space, desc.ty.clone());
            if let Some(owner) = free.take(&class) {
                retired[owner.0] = false;
                buffer_end[owner.0] = liveness[value.0].last_use;
                assignments[value.0] = BufferAssignment {
                    kind: AllocKind::Reuse,
                    reused: Some(owner),
                    inplace: false,
                    alias_owner: None,
                };
                trace!(?value, ?owner, step, "reusing retired buffer");
            }
            // Otherwise the default Allocate stands.
        }

        // Offer buffers whose last user just ran to the free list.
        for &candidate in node.inputs.iter().chain(node.outputs.iter()) {
            if liveness[candidate.0].last_use != Position::At(step) {
                continue;
            }
            if graph.value(candidate).in_subgraph {
                continue;
            }
            let owner = resolve_owner(&assignments, candidate);
            if retired[owner.0] || buffer_end[owner.0] != Position::At(step) {
                continue;
            }
            if !reuse_source_eligible(graph, &assignments, owner) {
                continue;
            }
            let owner_desc = graph.value(owner);
            free.offer((owner_desc.mem_space, owner_desc.ty.clone()), owner);
            retired[owner.0] = true;
            trace!(?owner, step, "buffer retired to free list");
        }
    }

    let reused = assignments
        .iter()
        .filter(|a| a.kind == AllocKind::Reuse)
        .count();
    let fresh = assignments
        .iter()
        .filter(|a| a.kind == AllocKind::Allocate)
        .count();
    debug!(values = num_values, fresh, reused, "buffer assignment complete");

    Ok(assignments)
}

/// Resolve a value to the ultimate owner of its buffer (single hop: reuse
/// targets and alias owners are never themselves reusers or aliases).
pub fn resolve_owner(assignments: &[BufferAssignment], value: ValueId) -> ValueId {
    let assignment = &assignments[value.0];
    match assignment.kind {
        AllocKind::Reuse => assignment.reused.unwrap_or(value),
        AllocKind::NoAllocation => assignment.alias_owner.unwrap_or(value),
        _ => value,
    }
}

/// Whether a chain owner's buffer may be recycled once it dies.
///
/// Externally owned values and control-flow-subgraph values are never reuse
/// sources. An external value explicitly marked not-externally-owned is the
/// one sanctioned exception.
fn reuse_source_eligible(
    graph: &ValueGraph,
    assignments: &[BufferAssignment],
    owner: ValueId,
) -> bool {
    let desc = graph.value(owner);
    if desc.externally_owned || desc.in_subgraph {
        return false;
    }
    matches!(
        assignments[owner.0].kind,
        AllocKind::Allocate | AllocKind::External
    )
}

/// First input whose buffer dies at this step and is compatible with `value`.
fn find_inplace_target(
    graph: &ValueGraph,
    inputs: &[ValueId],
    value: ValueId,
    step: usize,
    liveness: &[LiveInterval],
    assignments: &[BufferAssignment],
    buffer_end: &[Position],
) -> Option<ValueId> {
    let desc = graph.value(value);
    for &input in inputs {
        if liveness[input.0].last_use != Position::At(step) {
            continue;
        }
        if graph.value(input).in_subgraph {
            continue;
        }
        let owner = resolve_owner(assignments, input);
        // Only planner-allocated buffers may be overwritten in place.
        if assignments[owner.0].kind != AllocKind::Allocate {
            continue;
        }
        let owner_desc = graph.value(owner);
        if owner_desc.externally_owned || owner_desc.in_subgraph {
            continue;
        }
        if buffer_end[owner.0] != Position::At(step) {
            continue;
        }
        if owner_desc.ty == desc.ty && owner_desc.mem_space == desc.mem_space {
            return Some(owner);
        }
    }
    None
}
