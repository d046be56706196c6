use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::Display;

/// Unique identifier for a node placement in a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// Unique identifier for an operation instance
///
/// Assigned once when the `Operation` is created and stable for the life of
/// the process, so it can serve as a map key across compiled functions and
/// serialized sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpId(pub usize);

/// Identifier of a compiled function inside a `FunctionRegistry`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FnId(pub usize);

static NEXT_NODE_ID: AtomicUsize = AtomicUsize::new(0);
static NEXT_OP_ID: AtomicUsize = AtomicUsize::new(0);

pub(crate) fn next_node_id() -> NodeId {
    NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
}

fn next_op_id() -> OpId {
    OpId(NEXT_OP_ID.fetch_add(1, Ordering::Relaxed))
}

/// Element types flowing along graph edges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum DataType {
    Float16,
    BFloat16,
    Float32,
    Float64,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Bool,
}

impl DataType {
    /// Check if the data type is a floating point type
    pub fn is_floating_point(&self) -> bool {
        matches!(
            self,
            DataType::Float16 | DataType::BFloat16 | DataType::Float32 | DataType::Float64
        )
    }

    /// Check if the data type is an integer type
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::Uint8
                | DataType::Uint16
                | DataType::Uint32
                | DataType::Uint64
        )
    }

    /// Check if the data type is the high-precision float type targeted by
    /// the promotion scan
    pub fn is_high_precision(&self) -> bool {
        matches!(self, DataType::Float64)
    }
}

/// Where an operation class executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum ExecutionLocale {
    /// Runs on the host CPU
    Host,
    /// Runs on an accelerator device
    Device,
    /// Moves data between host and device
    Transfer,
}

/// The category shared by many operation instances
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OpClass {
    pub name: String,
    pub locale: ExecutionLocale,
}

impl OpClass {
    pub fn new(name: &str, locale: ExecutionLocale) -> Self {
        Self {
            name: name.to_string(),
            locale,
        }
    }

    /// Host-resident class, the common case
    pub fn host(name: &str) -> Self {
        Self::new(name, ExecutionLocale::Host)
    }
}

/// A concrete, parameterized computational unit
///
/// One operation instance may back several nodes, possibly across multiple
/// compiled functions. Equality is by the stable `OpId` assigned at
/// construction, never by address.
#[derive(Debug, Clone)]
pub struct Operation {
    id: OpId,
    class: OpClass,
    label: String,
    /// Static work estimate per call (e.g. flop count), used for the
    /// throughput column when present
    flops_hint: Option<f64>,
}

impl Operation {
    pub fn new(class: OpClass, label: &str) -> Arc<Self> {
        Arc::new(Self {
            id: next_op_id(),
            class,
            label: label.to_string(),
            flops_hint: None,
        })
    }

    pub fn with_flops_hint(class: OpClass, label: &str, flops: f64) -> Arc<Self> {
        Arc::new(Self {
            id: next_op_id(),
            class,
            label: label.to_string(),
            flops_hint: Some(flops),
        })
    }

    pub fn id(&self) -> OpId {
        self.id
    }

    pub fn class(&self) -> &OpClass {
        &self.class
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn flops_hint(&self) -> Option<f64> {
        self.flops_hint
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)
    }
}

/// One placement of an operation in a graph's execution order
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub op: Arc<Operation>,
    pub input_dtypes: Vec<DataType>,
    pub output_dtypes: Vec<DataType>,
}

impl Node {
    /// True when some output carries the high-precision type while no input
    /// does. Flags likely unintended precision promotion; a heuristic, not
    /// a correctness check.
    pub fn promotes_precision(&self) -> bool {
        self.output_dtypes.iter().any(DataType::is_high_precision)
            && !self.input_dtypes.iter().any(DataType::is_high_precision)
    }
}
