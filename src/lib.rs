//! memplan - Static execution-and-memory planner for computation graphs
//!
//! Runs once per (graph, device-assignment) pair and produces an immutable
//! [`Plan`] that an execution engine replays on every inference call without
//! re-planning. The plan fixes one deterministic node order, assigns an
//! allocation strategy to every intermediate value (fresh buffer, reuse of a
//! retired buffer, externally supplied, or no buffer at all), schedules when
//! each buffer may be released, and flags where buffer reuse crosses an
//! asynchronous execution boundary and therefore needs a synchronization
//! fence.
//!
//! The plan never encodes byte sizes; shapes may be unknown at planning time.
//! It encodes allocation strategy and buffer identity only.
//!
//! # Example
//!
//! ```
//! use memplan::{plan_graph, AllocKind, NodeDesc, ValueDesc, ValueGraph, ValueKind};
//! use memplan::{DType, ValueType};
//!
//! let mut graph = ValueGraph::new();
//! let ty = ValueType::tensor(DType::F32, 2);
//! let x = graph.add_value(ValueDesc::new("x", ty.clone(), ValueKind::GraphInput));
//! let y = graph.add_value(ValueDesc::new("y", ty.clone(), ValueKind::Computed));
//! let z = graph.add_value(ValueDesc::new("z", ty, ValueKind::GraphOutput));
//! graph.add_node(NodeDesc::new("square", vec![x], vec![y]))?;
//! graph.add_node(NodeDesc::new("scale", vec![y], vec![z]))?;
//!
//! let plan = plan_graph(&graph)?;
//! assert_eq!(plan.allocation(y).unwrap().kind, AllocKind::Allocate);
//! # Ok::<(), memplan::PlanError>(())
//! ```

pub mod error;
pub mod graph;
pub mod logging;
pub mod plan;
pub mod planner;

pub use error::{ErrorKind, PlanError, PlanResult};
pub use graph::{
    DType, MemorySpace, NodeDesc, NodeId, ValueDesc, ValueGraph, ValueId, ValueKind, ValueType,
};
pub use plan::{
    AllocKind, AllocationRecord, ExecutionStep, LiveInterval, Plan, Position,
};
pub use planner::{plan_graph, Planner, PlannerOptions};
