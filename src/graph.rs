use std::collections::HashMap;
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::{Error, Result};
use crate::model::{next_node_id, DataType, Node, NodeId, Operation};

/// A user-built dependency graph over operation applications
///
/// Nodes are added in any order; edges express data dependencies. The
/// linker asks for the topological order once, at compile time, and the
/// compiled function keeps that order for the rest of its life.
#[derive(Debug, Default)]
pub struct OpGraph {
    graph: DiGraph<NodeId, ()>,
    nodes: HashMap<NodeId, Node>,
    indices: HashMap<NodeId, NodeIndex>,
}

impl OpGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place an operation in the graph and return the new node's id
    pub fn add_node(
        &mut self,
        op: &Arc<Operation>,
        name: &str,
        input_dtypes: &[DataType],
        output_dtypes: &[DataType],
    ) -> NodeId {
        let id = next_node_id();
        let node = Node {
            id,
            name: name.to_string(),
            op: Arc::clone(op),
            input_dtypes: input_dtypes.to_vec(),
            output_dtypes: output_dtypes.to_vec(),
        };
        let index = self.graph.add_node(id);
        self.nodes.insert(id, node);
        self.indices.insert(id, index);
        id
    }

    /// Record that `node` consumes an output of `dependency`
    pub fn add_dependency(&mut self, node: NodeId, dependency: NodeId) -> Result<()> {
        let from = self.index_of(dependency)?;
        let to = self.index_of(node)?;
        self.graph.add_edge(from, to, ());
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node ids in a valid execution order
    pub fn toposort(&self) -> Result<Vec<NodeId>> {
        match toposort(&self.graph, None) {
            Ok(order) => Ok(order.into_iter().map(|ix| self.graph[ix]).collect()),
            Err(cycle) => {
                let id = self.graph[cycle.node_id()];
                let name = self
                    .nodes
                    .get(&id)
                    .map(|n| n.name.clone())
                    .unwrap_or_else(|| format!("{:?}", id));
                Err(Error::CyclicGraph(name))
            }
        }
    }

    fn index_of(&self, id: NodeId) -> Result<NodeIndex> {
        self.indices
            .get(&id)
            .copied()
            .ok_or_else(|| Error::Operation(format!("node {:?} is not part of this graph", id)))
    }
}
