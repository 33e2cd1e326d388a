use super::NodeId;
use crate::attrs::Attrs;
use crate::tensor_desc::TensorDesc;

/// Source of an operator node's input.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeInput {
    /// Output `output` of another node in the same graph.
    Edge { node: NodeId, output: usize },

    /// A descriptor supplied directly, such as a graph input or constant.
    Value(TensorDesc),
}

impl NodeInput {
    pub fn edge(node: NodeId, output: usize) -> Self {
        NodeInput::Edge { node, output }
    }
}

impl From<TensorDesc> for NodeInput {
    fn from(desc: TensorDesc) -> Self {
        NodeInput::Value(desc)
    }
}

/// An operator in a [`Graph`](crate::Graph).
#[derive(Clone, Debug)]
pub struct Node {
    pub(super) name: Option<String>,
    pub(super) op_kind: String,
    pub(super) attrs: Attrs,
    pub(super) inputs: Vec<NodeInput>,
}

impl Node {
    /// Return the debug name of this node.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Return the operator kind, used to look up the node's rule.
    pub fn op_kind(&self) -> &str {
        &self.op_kind
    }

    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    pub fn inputs(&self) -> &[NodeInput] {
        &self.inputs
    }
}
