//! Unified error handling for memplan
//!
//! This module provides a centralized error type covering the two failure
//! kinds of the planner:
//! - Graph-structure errors (cycle, dangling reference): raised before any
//!   plan exists, actionable by the caller who built the graph.
//! - Plan-validation errors (an internal invariant fails after assembly):
//!   defect signals. Planning is a pure function of its input, so these are
//!   never retried or silently corrected.
//!
//! A third, rarer kind covers exhaustion of the planner's own bookkeeping
//! structures on pathologically large graphs. This is unrelated to
//! target-device memory exhaustion, which the planner never touches.

use std::collections::TryReserveError;
use std::fmt;

use crate::graph::{NodeId, ValueId};

/// Unified error type for memplan
///
/// Use [`PlanError::kind`] to classify an error for handling decisions.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    // ========== Graph-structure errors ==========
    /// The dependency graph contains a cycle
    #[error("cycle detected: {remaining} node(s) could not be ordered")]
    CycleDetected { remaining: usize },

    /// A node references a value id that was never added to the graph
    #[error("node {node:?} references unknown value {value:?}")]
    UnknownValue { node: NodeId, value: ValueId },

    /// A query or record references a node id outside the graph
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),

    /// A computed value has no producing node
    #[error("value {value:?} ({name}) has no producing node")]
    MissingProducer { value: ValueId, name: String },

    /// Two nodes claim to produce the same value
    #[error("value {value:?} is produced by both {first:?} and {second:?}")]
    DuplicateProducer {
        value: ValueId,
        first: NodeId,
        second: NodeId,
    },

    /// An externally supplied value (graph input or initializer) appears as a
    /// node output
    #[error("externally supplied value {value:?} must not have a producer")]
    ExternalValueProduced { value: ValueId },

    /// A node's alias attribute points past its input list
    #[error("node {node:?} aliases input #{index} but has only {inputs} input(s)")]
    AliasIndexOutOfRange {
        node: NodeId,
        index: usize,
        inputs: usize,
    },

    // ========== Plan-validation errors ==========
    /// The assembled execution order is not a permutation of the graph's nodes
    #[error("execution order is not a permutation of graph nodes: {reason}")]
    OrderNotPermutation { reason: String },

    /// A reuse target itself reuses another buffer (alias chains are forbidden)
    #[error("value {value:?} reuses {target:?}, which itself reuses another buffer")]
    ReuseChain { value: ValueId, target: ValueId },

    /// A record claims reuse but names no target buffer
    #[error("value {value:?} is marked Reuse but names no target")]
    ReuseTargetMissing { value: ValueId },

    /// Two values sharing a buffer are live at the same time
    #[error("value {value:?} overlaps buffer of {owner:?} (buffer still live at its first use)")]
    OverlappingLiveness { value: ValueId, owner: ValueId },

    /// Per-step free ranges are not disjoint or not in increasing order
    #[error("malformed free range at step {step}: {reason}")]
    BadFreeRange { step: usize, reason: String },

    /// The free list does not cover exactly the finite-lifetime values
    #[error("free list incomplete: {reason}")]
    IncompleteFreeList { reason: String },

    // ========== Resource errors ==========
    /// Allocation of the planner's own bookkeeping structures failed
    #[error("planner bookkeeping allocation failed: {0}")]
    Bookkeeping(String),
}

impl PlanError {
    /// Classify the error for handling decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlanError::CycleDetected { .. }
            | PlanError::UnknownValue { .. }
            | PlanError::UnknownNode(_)
            | PlanError::MissingProducer { .. }
            | PlanError::DuplicateProducer { .. }
            | PlanError::ExternalValueProduced { .. }
            | PlanError::AliasIndexOutOfRange { .. } => ErrorKind::GraphStructure,

            PlanError::OrderNotPermutation { .. }
            | PlanError::ReuseChain { .. }
            | PlanError::ReuseTargetMissing { .. }
            | PlanError::OverlappingLiveness { .. }
            | PlanError::BadFreeRange { .. }
            | PlanError::IncompleteFreeList { .. } => ErrorKind::PlanValidation,

            PlanError::Bookkeeping(_) => ErrorKind::Resource,
        }
    }

    /// True for errors caused by the input graph (caller can fix the graph).
    pub fn is_graph_error(&self) -> bool {
        self.kind() == ErrorKind::GraphStructure
    }

    /// True for internal invariant violations (a planner defect; report it,
    /// never retry).
    pub fn is_validation_error(&self) -> bool {
        self.kind() == ErrorKind::PlanValidation
    }
}

impl From<TryReserveError> for PlanError {
    fn from(err: TryReserveError) -> Self {
        PlanError::Bookkeeping(err.to_string())
    }
}

/// Error classification
///
/// - GraphStructure: the input graph is malformed, fix and re-plan
/// - PlanValidation: an internal invariant failed, a planner defect
/// - Resource: bookkeeping allocation failed during planning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input graph
    GraphStructure,
    /// Internal invariant violation after assembly
    PlanValidation,
    /// Planner bookkeeping allocation failure
    Resource,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::GraphStructure => write!(f, "GraphStructure"),
            ErrorKind::PlanValidation => write!(f, "PlanValidation"),
            ErrorKind::Resource => write!(f, "Resource"),
        }
    }
}

/// Result alias for planner operations
pub type PlanResult<T> = std::result::Result<T, PlanError>;
