use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error(
        "native thunk reported a failure at node '{node}' (op {op}). The native \
         boundary does not preserve stack-level diagnostics, so the underlying \
         fault cannot be shown here; re-run the function under a non-instrumented \
         execution strategy to see it"
    )]
    NativeExecution { node: String, op: String },

    #[error("operation failed: {0}")]
    Operation(String),

    #[error("graph contains a dependency cycle through node '{0}'")]
    CyclicGraph(String),

    #[error("execution strategy produced no thunk for node '{0}'")]
    MissingThunk(String),

    #[error("no compiled function with id {0}")]
    UnknownFunction(usize),

    #[error("profiling mode '{0}' is already registered")]
    DuplicateMode(String),

    #[error("session snapshot version {0} is not supported")]
    UnsupportedSnapshot(u32),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
