pub mod error;
pub mod execution;
pub mod graph;
pub mod model;
pub mod profiling;

// Re-export commonly used types
pub use error::{Error, Result};
pub use execution::engine::{
    CompiledFunction, ExecutionStrategy, FunctionRegistry, Linker, NodeCallback, Thunk,
};
pub use graph::OpGraph;
pub use model::{DataType, ExecutionLocale, FnId, Node, NodeId, OpClass, OpId, Operation};
pub use profiling::{
    ApplyKey, ModeRegistry, ProfileMode, ProfileSession, ReportLimits, SessionSnapshot,
};
