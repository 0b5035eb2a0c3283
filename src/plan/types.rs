//! Plan data model: positions, allocation records, and the immutable Plan.

use std::collections::BTreeSet;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::graph::{MemorySpace, NodeId, ValueId};

/// A position in the execution order.
///
/// `Start` sorts before every step and marks values alive before the first
/// node runs (graph inputs, initializers). `End` sorts after every step and
/// marks values kept alive past the last node (graph outputs). The derived
/// ordering is relied on throughout liveness and reuse analysis.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Position {
    /// Alive before step 0
    Start,
    /// At the node executed at this step
    At(usize),
    /// Kept alive past the last step
    End,
}

impl Position {
    /// True for `At(_)`: the value's lifetime ends inside the graph.
    pub fn is_finite(&self) -> bool {
        matches!(self, Position::At(_))
    }

    /// The step index, if finite.
    pub fn step(&self) -> Option<usize> {
        match self {
            Position::At(step) => Some(*step),
            _ => None,
        }
    }
}

/// Allocation strategy chosen for a value's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocKind {
    /// Allocate a fresh buffer when the value is produced
    Allocate,
    /// Back the value with another value's retired (or in-place dying) buffer
    Reuse,
    /// The buffer is supplied externally (graph input, initializer)
    External,
    /// No buffer at all: the value is an untransformed alias of an
    /// externally supplied value
    NoAllocation,
}

/// Span of execution positions during which a value's buffer must stay live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveInterval {
    /// Position of the producing node (`Start` for externally supplied values)
    pub first_use: Position,
    /// Position of the last consuming node (`End` for graph outputs;
    /// equals `first_use` for values nothing consumes)
    pub last_use: Position,
}

/// Per-value allocation plan entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRecord {
    /// Chosen allocation strategy
    pub kind: AllocKind,
    /// The value whose buffer backs this one; `Some` iff `kind` is `Reuse`.
    /// The target is always the chain's ultimate owner, never itself a reuser.
    pub reused_value: Option<ValueId>,
    /// Memory space of the buffer
    pub mem_space: MemorySpace,
    /// The executor must wait on a fence before touching this buffer across
    /// an asynchronous boundary. Shared by every value on one reuse chain.
    pub needs_fence: bool,
    /// Execution-order span the buffer must stay live for this value
    pub interval: LiveInterval,
}

/// One step of the execution order: the node to run, plus the slice of the
/// shared free list naming values to release once it has run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStep {
    /// Node to execute
    pub node: NodeId,
    /// Half-open range into [`Plan::free_list`]
    pub free_range: Range<usize>,
}

/// The immutable planning artifact.
///
/// Produced once per (graph, device-assignment) pair and replayed by the
/// executor on every inference call. All tables are dense and read-only, so
/// one plan may back unlimited concurrent executions without locks. The
/// planner signals *where* synchronization is required (fence flags) but
/// never inserts it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub(crate) steps: Vec<ExecutionStep>,
    pub(crate) allocations: Vec<AllocationRecord>,
    pub(crate) free_list: Vec<ValueId>,
    pub(crate) node_fences: Vec<bool>,
    pub(crate) initializer_order: Vec<ValueId>,
    pub(crate) activation_order: Vec<ValueId>,
}

impl Plan {
    /// Execution steps in order.
    pub fn steps(&self) -> &[ExecutionStep] {
        &self.steps
    }

    /// Node ids in execution order.
    pub fn execution_order(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.steps.iter().map(|step| step.node)
    }

    /// Number of execution steps (= number of nodes).
    pub fn num_steps(&self) -> usize {
        self.steps.len()
    }

    /// Number of planned values.
    pub fn num_values(&self) -> usize {
        self.allocations.len()
    }

    /// Allocation record for a value.
    pub fn allocation(&self, value: ValueId) -> Option<&AllocationRecord> {
        self.allocations.get(value.0)
    }

    /// The full allocation table, indexed by value id.
    pub fn allocations(&self) -> &[AllocationRecord] {
        &self.allocations
    }

    /// Values to release after the node at `step` has run.
    pub fn freed_after(&self, step: usize) -> &[ValueId] {
        match self.steps.get(step) {
            Some(s) => &self.free_list[s.free_range.clone()],
            None => &[],
        }
    }

    /// The shared free list underlying the per-step ranges.
    pub fn free_list(&self) -> &[ValueId] {
        &self.free_list
    }

    /// Whether the given node requires a fence check before execution.
    pub fn node_needs_fence(&self, node: NodeId) -> bool {
        self.node_fences.get(node.0).copied().unwrap_or(false)
    }

    /// Memory space of a value's buffer.
    pub fn memory_space(&self, value: ValueId) -> Option<MemorySpace> {
        self.allocations.get(value.0).map(|record| record.mem_space)
    }

    /// The set of distinct memory spaces used by the plan.
    pub fn memory_spaces(&self) -> BTreeSet<MemorySpace> {
        self.allocations
            .iter()
            .map(|record| record.mem_space)
            .collect()
    }

    /// Fixed order for sequentially allocating initializer values from a
    /// pooled arena.
    pub fn initializer_allocation_order(&self) -> &[ValueId] {
        &self.initializer_order
    }

    /// Fixed order for sequentially allocating activation (fresh computed)
    /// values from a pooled arena.
    pub fn activation_allocation_order(&self) -> &[ValueId] {
        &self.activation_order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_ordering() {
        assert!(Position::Start < Position::At(0));
        assert!(Position::At(0) < Position::At(1));
        assert!(Position::At(usize::MAX) < Position::End);
        assert!(Position::Start < Position::End);
    }

    #[test]
    fn test_position_finite() {
        assert!(!Position::Start.is_finite());
        assert!(Position::At(3).is_finite());
        assert!(!Position::End.is_finite());
        assert_eq!(Position::At(3).step(), Some(3));
        assert_eq!(Position::End.step(), None);
    }

    #[test]
    fn test_freed_after_out_of_range() {
        let plan = Plan {
            steps: vec![ExecutionStep {
                node: NodeId(0),
                free_range: 0..1,
            }],
            allocations: vec![],
            free_list: vec![ValueId(0)],
            node_fences: vec![false],
            initializer_order: vec![],
            activation_order: vec![],
        };
        assert_eq!(plan.freed_after(0), &[ValueId(0)]);
        assert_eq!(plan.freed_after(5), &[] as &[ValueId]);
    }

    #[test]
    fn test_memory_spaces_deduplicated() {
        let record = |space| AllocationRecord {
            kind: AllocKind::Allocate,
            reused_value: None,
            mem_space: space,
            needs_fence: false,
            interval: LiveInterval {
                first_use: Position::At(0),
                last_use: Position::At(0),
            },
        };
        let plan = Plan {
            steps: vec![],
            allocations: vec![
                record(MemorySpace::Host),
                record(MemorySpace::Device(0)),
                record(MemorySpace::Host),
            ],
            free_list: vec![],
            node_fences: vec![],
            initializer_order: vec![],
            activation_order: vec![],
        };
        let spaces = plan.memory_spaces();
        assert_eq!(spaces.len(), 2);
        assert!(spaces.contains(&MemorySpace::Host));
        assert!(spaces.contains(&MemorySpace::Device(0)));
    }
}
