use std::fmt;

use log::debug;

use crate::error::{Error, Result};
use crate::graph::OpGraph;
use crate::model::{FnId, Node, NodeId};

/// An executable unit implementing one node's computation
///
/// Two flavors exist. Native thunks enter compiled code through a primitive
/// that reports failure as a flag (`true` = failed) instead of a structured
/// error. Interpreted thunks are plain fallible closures whose errors carry
/// full detail and pass through callers unmodified.
pub enum Thunk {
    Native(Box<dyn FnMut() -> bool + Send>),
    Interpreted(Box<dyn FnMut() -> Result<()> + Send>),
}

impl Thunk {
    pub fn native(f: impl FnMut() -> bool + Send + 'static) -> Self {
        Thunk::Native(Box::new(f))
    }

    pub fn interpreted(f: impl FnMut() -> Result<()> + Send + 'static) -> Self {
        Thunk::Interpreted(Box::new(f))
    }

    /// Capability probe: does this thunk run through the native path?
    pub fn is_native(&self) -> bool {
        matches!(self, Thunk::Native(_))
    }

    /// Execute once without instrumentation
    pub fn run(&mut self, node: &Node) -> Result<()> {
        match self {
            Thunk::Native(f) => {
                if f() {
                    Err(Error::Operation(format!(
                        "native thunk failed at node '{}'",
                        node.name
                    )))
                } else {
                    Ok(())
                }
            }
            Thunk::Interpreted(f) => f(),
        }
    }
}

impl fmt::Debug for Thunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Thunk::Native(_) => f.write_str("Thunk::Native"),
            Thunk::Interpreted(_) => f.write_str("Thunk::Interpreted"),
        }
    }
}

/// One underlying way of executing nodes
///
/// A linker is built from a list of strategies; each strategy resolves one
/// thunk per node, and the resolved thunks for a node form its thunk group.
pub trait ExecutionStrategy {
    fn thunk_for(&self, node: &Node) -> Result<Thunk>;
}

/// Callback invoked around each node's execution
///
/// Receives the node's position in the topological order, the node, and its
/// thunk. The profiling wrapper is exactly such a callback.
pub type NodeCallback<'a> = &'a mut dyn FnMut(usize, &Node, &mut Thunk) -> Result<()>;

/// Compiles an `OpGraph` into a callable `CompiledFunction`
pub struct Linker {
    strategies: Vec<Box<dyn ExecutionStrategy>>,
}

impl Linker {
    pub fn new(strategies: Vec<Box<dyn ExecutionStrategy>>) -> Self {
        Self { strategies }
    }

    /// Freeze the graph's topological order and resolve thunks for every node
    pub fn link(&self, graph: &OpGraph, name: &str) -> Result<CompiledFunction> {
        let order = graph.toposort()?;
        let mut nodes = Vec::with_capacity(order.len());
        let mut thunk_groups = Vec::with_capacity(order.len());

        for id in order {
            let node = graph
                .node(id)
                .ok_or_else(|| Error::Operation(format!("node {:?} missing from graph", id)))?
                .clone();
            let mut group = Vec::with_capacity(self.strategies.len());
            for strategy in &self.strategies {
                group.push(strategy.thunk_for(&node)?);
            }
            if group.is_empty() {
                return Err(Error::MissingThunk(node.name.clone()));
            }
            nodes.push(node);
            thunk_groups.push(group);
        }

        debug!("linked function '{}' with {} nodes", name, nodes.len());
        Ok(CompiledFunction {
            id: FnId(0),
            name: name.to_string(),
            nodes,
            thunk_groups,
        })
    }
}

/// One compiled, callable instantiation of a graph
///
/// Owns its nodes in execution order and their thunk groups. Call counts
/// and cumulative call time are tracked in the profiling session, not here.
pub struct CompiledFunction {
    id: FnId,
    name: String,
    nodes: Vec<Node>,
    thunk_groups: Vec<Vec<Thunk>>,
}

impl CompiledFunction {
    pub fn id(&self) -> FnId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The node sequence in execution order, stable across queries
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn thunk_group(&self, index: usize) -> &[Thunk] {
        &self.thunk_groups[index]
    }

    /// Drive every node in topological order through `callback`
    ///
    /// The callback decides how the thunk runs; an error aborts the call at
    /// the failing node.
    pub fn call_with(&mut self, callback: NodeCallback<'_>) -> Result<()> {
        for (index, node) in self.nodes.iter().enumerate() {
            let thunk = &mut self.thunk_groups[index][0];
            callback(index, node, thunk)?;
        }
        Ok(())
    }

    /// Execute once without instrumentation
    pub fn call(&mut self) -> Result<()> {
        self.call_with(&mut |_, node, thunk| thunk.run(node))
    }
}

impl fmt::Debug for CompiledFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledFunction")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

/// Registry of compiled functions
///
/// Exposes, per function, its node list and name, and resolves which
/// function owns a given node. The profiling session keys its per-function
/// counters by the `FnId` assigned here.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: Vec<CompiledFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, mut function: CompiledFunction) -> FnId {
        let id = FnId(self.functions.len());
        function.id = id;
        self.functions.push(function);
        id
    }

    pub fn get(&self, id: FnId) -> Option<&CompiledFunction> {
        self.functions.get(id.0)
    }

    pub fn get_mut(&mut self, id: FnId) -> Option<&mut CompiledFunction> {
        self.functions.get_mut(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledFunction> {
        self.functions.iter()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Find the function owning `node`, with the node itself
    pub fn find_node(&self, node: NodeId) -> Option<(&CompiledFunction, &Node)> {
        for function in &self.functions {
            if let Some(n) = function.nodes.iter().find(|n| n.id == node) {
                return Some((function, n));
            }
        }
        None
    }
}
