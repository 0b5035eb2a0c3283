//! Planning pipeline: ordering, liveness, reuse, release scheduling, fences,
//! assembly.
//!
//! Each stage is a pure function taking the execution order (and earlier
//! stage outputs) as explicit inputs and returning position-keyed results;
//! there is no shared mutable state between stages.

pub mod assemble;
pub mod fence;
pub mod free_schedule;
pub mod liveness;
pub mod order;
pub mod reuse;
pub mod types;

pub use fence::FenceFlags;
pub use free_schedule::FreeSchedule;
pub use reuse::BufferAssignment;
pub use types::{AllocKind, AllocationRecord, ExecutionStep, LiveInterval, Plan, Position};
