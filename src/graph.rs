//! Dependency graph of nodes and typed values, the planner's input.
//!
//! The graph is built once by the host (the graph-construction collaborator)
//! and is read-only to the planner. Values carry a declared type but no byte
//! size: shapes may be unknown at planning time, and the plan only ever
//! encodes allocation strategy and buffer identity, never sizes.

use serde::{Deserialize, Serialize};

use crate::error::{PlanError, PlanResult};

/// Dense index of a value (an edge payload) in the graph.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ValueId(pub usize);

/// Dense index of a node (an operation) in the graph.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NodeId(pub usize);

/// Element type of a tensor-valued edge.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum DType {
    I32,
    U32,
    F32,
    F16,
    Q8_0,
    Q4_0,
}

/// Declared type of a value.
///
/// Type compatibility for buffer reuse is plain equality of this type; byte
/// sizes never enter the comparison because shapes may be symbolic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ValueType {
    /// A tensor with known element type and rank
    Tensor { dtype: DType, rank: usize },
    /// An opaque type tag for non-tensor values (e.g. sequences, maps)
    Opaque(String),
}

impl ValueType {
    /// Shorthand for a tensor type.
    pub fn tensor(dtype: DType, rank: usize) -> Self {
        ValueType::Tensor { dtype, rank }
    }
}

/// Memory space a value's buffer lives in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum MemorySpace {
    /// Host (CPU) memory
    #[default]
    Host,
    /// Device memory, by device ordinal
    Device(u32),
}

/// How a value comes into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    /// Produced by a node, consumed within the graph
    Computed,
    /// Supplied by the caller at execution time
    GraphInput,
    /// A weight or constant, supplied before execution
    Initializer,
    /// Produced by a node and read by the caller after execution
    GraphOutput,
}

impl ValueKind {
    /// True for values whose buffer exists before the first node runs.
    pub fn is_externally_supplied(&self) -> bool {
        matches!(self, ValueKind::GraphInput | ValueKind::Initializer)
    }
}

/// Descriptor for one value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueDesc {
    /// Stable name, for diagnostics only
    pub name: String,
    /// Declared type, the reuse-compatibility key
    pub ty: ValueType,
    /// How the value comes into existence
    pub kind: ValueKind,
    /// Memory space the value's buffer lives in
    pub mem_space: MemorySpace,
    /// Owned outside the planner; never offered as a reuse source.
    /// Defaults to true for graph inputs and initializers. Clearing it on an
    /// external value explicitly marks its buffer eligible for recycling.
    pub externally_owned: bool,
    /// Belongs to a control-flow subgraph; never offered as a reuse source
    pub in_subgraph: bool,
}

impl ValueDesc {
    /// Create a value descriptor. `externally_owned` defaults from the kind.
    pub fn new(name: impl Into<String>, ty: ValueType, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            ty,
            kind,
            mem_space: MemorySpace::default(),
            externally_owned: kind.is_externally_supplied(),
            in_subgraph: false,
        }
    }

    /// Set the memory space.
    pub fn with_mem_space(mut self, mem_space: MemorySpace) -> Self {
        self.mem_space = mem_space;
        self
    }

    /// Override the externally-owned flag.
    pub fn with_externally_owned(mut self, owned: bool) -> Self {
        self.externally_owned = owned;
        self
    }

    /// Mark the value as part of a control-flow subgraph.
    pub fn in_subgraph(mut self) -> Self {
        self.in_subgraph = true;
        self
    }
}

/// Descriptor for one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDesc {
    /// Stable name, for diagnostics only
    pub name: String,
    /// Values read by the node
    pub inputs: Vec<ValueId>,
    /// Values produced by the node
    pub outputs: Vec<ValueId>,
    /// Whether the node may still be in flight when a later node starts.
    /// `None` means unknown, which the planner treats as asynchronous.
    pub may_run_async: Option<bool>,
    /// The operation may safely write its first output over a dying input
    pub inplace_safe: bool,
    /// The first output is the named input, untransformed (identity/view)
    pub alias_of_input: Option<usize>,
}

impl NodeDesc {
    /// Create a synchronous node descriptor.
    pub fn new(
        name: impl Into<String>,
        inputs: Vec<ValueId>,
        outputs: Vec<ValueId>,
    ) -> Self {
        Self {
            name: name.into(),
            inputs,
            outputs,
            may_run_async: Some(false),
            inplace_safe: false,
            alias_of_input: None,
        }
    }

    /// Set the asynchronous-execution attribute (`None` = unknown).
    pub fn with_may_run_async(mut self, may_run_async: Option<bool>) -> Self {
        self.may_run_async = may_run_async;
        self
    }

    /// Mark the operation as safe to run in place over a dying input.
    pub fn inplace_safe(mut self) -> Self {
        self.inplace_safe = true;
        self
    }

    /// Declare the first output an untransformed alias of the given input.
    pub fn aliasing_input(mut self, index: usize) -> Self {
        self.alias_of_input = Some(index);
        self
    }

    /// Unknown synchronicity is treated as asynchronous (fail-safe).
    pub fn effectively_async(&self) -> bool {
        self.may_run_async.unwrap_or(true)
    }
}

/// Dependency graph of values and nodes.
///
/// Ids are dense: the first `add_value` returns `ValueId(0)` and so on, which
/// lets the plan use flat arrays indexed by id at execution time.
#[derive(Debug, Default, Clone)]
pub struct ValueGraph {
    values: Vec<ValueDesc>,
    nodes: Vec<NodeDesc>,
    producers: Vec<Option<NodeId>>,
}

impl ValueGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value, returning its dense id.
    pub fn add_value(&mut self, desc: ValueDesc) -> ValueId {
        let id = ValueId(self.values.len());
        self.values.push(desc);
        self.producers.push(None);
        id
    }

    /// Add a node, recording it as the producer of its outputs.
    ///
    /// Fails with a graph-structure error if the node references an unknown
    /// value, claims an output that already has a producer, produces an
    /// externally supplied value, or carries an out-of-range alias attribute.
    pub fn add_node(&mut self, desc: NodeDesc) -> PlanResult<NodeId> {
        let id = NodeId(self.nodes.len());

        for &value in desc.inputs.iter().chain(desc.outputs.iter()) {
            if value.0 >= self.values.len() {
                return Err(PlanError::UnknownValue { node: id, value });
            }
        }
        if let Some(index) = desc.alias_of_input {
            if index >= desc.inputs.len() {
                return Err(PlanError::AliasIndexOutOfRange {
                    node: id,
                    index,
                    inputs: desc.inputs.len(),
                });
            }
        }
        for &output in &desc.outputs {
            if self.values[output.0].kind.is_externally_supplied() {
                return Err(PlanError::ExternalValueProduced { value: output });
            }
            if let Some(first) = self.producers[output.0] {
                return Err(PlanError::DuplicateProducer {
                    value: output,
                    first,
                    second: id,
                });
            }
            self.producers[output.0] = Some(id);
        }

        self.nodes.push(desc);
        Ok(id)
    }

    /// Check the graph is complete: every computed value has a producer.
    ///
    /// Dangling references and duplicate producers are already rejected by
    /// [`ValueGraph::add_node`]; cycles are detected during ordering.
    pub fn validate(&self) -> PlanResult<()> {
        for (index, value) in self.values.iter().enumerate() {
            if !value.kind.is_externally_supplied() && self.producers[index].is_none() {
                return Err(PlanError::MissingProducer {
                    value: ValueId(index),
                    name: value.name.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// The descriptor for `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not minted by this graph's
    /// [`ValueGraph::add_value`]. Use [`ValueGraph::get_value`] for ids of
    /// uncertain provenance.
    pub fn value(&self, id: ValueId) -> &ValueDesc {
        &self.values[id.0]
    }

    /// The descriptor for `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not minted by this graph's
    /// [`ValueGraph::add_node`]. Use [`ValueGraph::get_node`] for ids of
    /// uncertain provenance.
    pub fn node(&self, id: NodeId) -> &NodeDesc {
        &self.nodes[id.0]
    }

    /// Fallible value lookup.
    pub fn get_value(&self, id: ValueId) -> Option<&ValueDesc> {
        self.values.get(id.0)
    }

    /// Fallible node lookup.
    pub fn get_node(&self, id: NodeId) -> Option<&NodeDesc> {
        self.nodes.get(id.0)
    }

    pub fn values(&self) -> &[ValueDesc] {
        &self.values
    }

    pub fn nodes(&self) -> &[NodeDesc] {
        &self.nodes
    }

    /// The node producing a value, if any (def site).
    pub fn producer(&self, id: ValueId) -> Option<NodeId> {
        self.producers[id.0]
    }

    /// Consuming nodes per value, in node-id order.
    pub fn consumer_map(&self) -> Vec<Vec<NodeId>> {
        let mut consumers = vec![Vec::new(); self.values.len()];
        for (index, node) in self.nodes.iter().enumerate() {
            for &input in &node.inputs {
                consumers[input.0].push(NodeId(index));
            }
        }
        consumers
    }
}
