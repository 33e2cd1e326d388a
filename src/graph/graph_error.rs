use super::NodeId;
use crate::errors::{ErrorKind, InferError};

/// Errors that occur when inferring the shapes of a graph.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum GraphError {
    /// Some nodes could not be ordered because they depend on each other.
    ///
    /// `nodes` lists every node that could not be ordered, including nodes
    /// downstream of a cycle.
    #[error("graph contains a cycle involving nodes {nodes:?}")]
    CyclicGraph { nodes: Vec<NodeId> },

    /// An input of `node` references a node or output slot that does not
    /// exist.
    #[error("input {input} of node {node} references output {output} of node {source_node}, which does not exist")]
    InvalidEdge {
        node: NodeId,
        input: usize,
        source_node: NodeId,
        output: usize,
    },

    /// Validation or shape inference failed for a node.
    #[error("node {node}{} ({op_kind}) failed: {error}", fmt_name(.name))]
    NodeFailed {
        node: NodeId,
        name: Option<String>,
        op_kind: String,
        #[source]
        error: InferError,
    },
}

fn fmt_name(name: &Option<String>) -> String {
    name.as_ref()
        .map(|name| format!(" \"{}\"", name))
        .unwrap_or_default()
}

impl GraphError {
    /// Return the general category of error.
    ///
    /// For node failures this is the kind of the underlying [`InferError`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CyclicGraph { .. } => ErrorKind::CyclicGraph,
            Self::InvalidEdge { .. } => ErrorKind::InvalidEdge,
            Self::NodeFailed { error, .. } => error.kind(),
        }
    }

    /// Return the ID of the node this error relates to.
    ///
    /// Returns `None` for cycles, which involve several nodes.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::CyclicGraph { .. } => None,
            Self::InvalidEdge { node, .. } | Self::NodeFailed { node, .. } => Some(*node),
        }
    }

    /// Return the error from the failed node's rule, if a rule failed.
    pub fn infer_error(&self) -> Option<&InferError> {
        match self {
            Self::NodeFailed { error, .. } => Some(error),
            _ => None,
        }
    }
}
