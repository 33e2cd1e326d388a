use rayon::prelude::*;

use crate::attrs::Attrs;
use crate::diagnostics::{DiagnosticLevel, Diagnostics};
use crate::errors::InferError;
use crate::infer_shapes::run_rule;
use crate::op_registry::OpRegistry;
use crate::options::InferOptions;
use crate::tensor_desc::TensorDesc;

mod graph_error;
mod node;
mod node_id;
mod planner;

#[cfg(test)]
mod tests;

pub use graph_error::GraphError;
pub use node::{Node, NodeInput};
pub use node_id::NodeId;
use planner::Planner;

/// A graph of operators whose output descriptors are to be inferred.
///
/// Each node has an operator kind, attributes and a list of inputs. An input
/// is either an output of another node or a descriptor supplied directly.
/// Graphs may be built in any order. Use [`GraphInferencer`] to infer the
/// outputs of every node.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    nodes: Vec<Node>,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Graph {
        Graph { nodes: Vec::new() }
    }

    /// Add an operator node to the graph.
    ///
    /// `name` is an identifier for this node that is used in diagnostics and
    /// errors. `op_kind` selects the rule used to infer the node's outputs.
    ///
    /// Returns the ID of the added node.
    pub fn add_node(
        &mut self,
        name: Option<&str>,
        op_kind: &str,
        attrs: Attrs,
        inputs: Vec<NodeInput>,
    ) -> NodeId {
        let id = NodeId::from_u32(self.nodes.len() as u32);
        self.nodes.push(Node {
            name: name.map(|s| s.to_owned()),
            op_kind: op_kind.to_owned(),
            attrs,
            inputs,
        });
        id
    }

    /// Retrieve a node by ID.
    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.as_usize())
    }

    /// Return the debug name for a node.
    pub fn node_name(&self, id: NodeId) -> String {
        self.get_node(id)
            .and_then(|node| node.name())
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("[ID: {}]", id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Return the IDs of all nodes in the order they were added.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId::from_u32)
    }

    /// Iterate over `(id, node)` pairs in the order nodes were added.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.node_ids().zip(self.nodes.iter())
    }
}

/// Output descriptors of every node in a graph, produced by
/// [`GraphInferencer::infer`].
#[derive(Clone, Debug, PartialEq)]
pub struct InferredShapes {
    outputs: Vec<Vec<TensorDesc>>,
}

impl InferredShapes {
    /// Return the output descriptors of a node.
    pub fn outputs(&self, id: NodeId) -> Option<&[TensorDesc]> {
        self.outputs.get(id.as_usize()).map(|outputs| outputs.as_slice())
    }

    /// Return the descriptor of output `index` of a node.
    pub fn output(&self, id: NodeId, index: usize) -> Option<&TensorDesc> {
        self.outputs(id)?.get(index)
    }

    /// Iterate over `(id, outputs)` pairs in node ID order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &[TensorDesc])> {
        self.outputs
            .iter()
            .enumerate()
            .map(|(i, outputs)| (NodeId::from_u32(i as u32), outputs.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

/// Infers the output descriptors of every node in a graph using the rules
/// from a registry.
///
/// Inference seals the registry, so that rules cannot change during or after
/// a run.
pub struct GraphInferencer<'a> {
    registry: &'a OpRegistry,
    options: InferOptions,
}

impl<'a> GraphInferencer<'a> {
    pub fn new(registry: &'a OpRegistry) -> Self {
        GraphInferencer {
            registry,
            options: InferOptions::default(),
        }
    }

    pub fn with_options(mut self, options: InferOptions) -> Self {
        self.options = options;
        self
    }

    /// Infer the outputs of every node in `graph`.
    ///
    /// Nodes are processed in dependency order. The first node that fails
    /// aborts the run with [`GraphError::NodeFailed`], and later nodes are
    /// not attempted.
    pub fn infer(&self, graph: &Graph) -> Result<InferredShapes, GraphError> {
        let span = tracing::debug_span!("infer_graph", nodes = graph.len());
        let _guard = span.enter();

        self.registry.seal();
        let plan = Planner::with_graph(graph).create_plan()?;
        let diagnostics = Diagnostics::new(self.options.diagnostics());

        let mut outputs: Vec<Option<Vec<TensorDesc>>> = vec![None; graph.len()];
        for id in plan {
            let Some(node) = graph.get_node(id) else {
                continue;
            };
            let inputs = gather_inputs(id, node, &outputs)?;

            let node_outputs = match self.infer_node(node, &inputs) {
                Ok(node_outputs) => node_outputs,
                Err(error) => {
                    diagnostics.warn(graph, id, format_args!("inference failed: {}", error));
                    return Err(GraphError::NodeFailed {
                        node: id,
                        name: node.name.clone(),
                        op_kind: node.op_kind.clone(),
                        error,
                    });
                }
            };

            report_outputs(&diagnostics, graph, id, &inputs, &node_outputs);
            outputs[id.as_usize()] = Some(node_outputs);
        }

        tracing::debug!(warnings = diagnostics.warned_count(), "inferred graph");

        Ok(InferredShapes {
            outputs: outputs.into_iter().map(Option::unwrap_or_default).collect(),
        })
    }

    /// Infer the outputs of several independent graphs in parallel.
    ///
    /// Returns one result per graph, in the same order as `graphs`.
    pub fn infer_all(&self, graphs: &[Graph]) -> Vec<Result<InferredShapes, GraphError>> {
        graphs.par_iter().map(|graph| self.infer(graph)).collect()
    }

    fn infer_node(&self, node: &Node, inputs: &[TensorDesc]) -> Result<Vec<TensorDesc>, InferError> {
        if self.options.check_descriptors() {
            for input in inputs {
                input.check()?;
            }
        }

        let rule = self.registry.lookup(node.op_kind())?;
        let outputs = run_rule(rule, inputs, node.attrs())?;

        if self.options.check_outputs() {
            for output in &outputs {
                output.check()?;
            }
        }

        Ok(outputs)
    }
}

/// Collect the descriptors of a node's inputs from the outputs of nodes
/// inferred so far.
fn gather_inputs(
    id: NodeId,
    node: &Node,
    outputs: &[Option<Vec<TensorDesc>>],
) -> Result<Vec<TensorDesc>, GraphError> {
    node.inputs()
        .iter()
        .enumerate()
        .map(|(input_index, input)| match input {
            NodeInput::Value(desc) => Ok(desc.clone()),
            NodeInput::Edge {
                node: source,
                output,
            } => outputs
                .get(source.as_usize())
                .and_then(|outputs| outputs.as_ref())
                .and_then(|outputs| outputs.get(*output))
                .cloned()
                .ok_or(GraphError::InvalidEdge {
                    node: id,
                    input: input_index,
                    source_node: *source,
                    output: *output,
                }),
        })
        .collect()
}

fn report_outputs(
    diagnostics: &Diagnostics,
    graph: &Graph,
    id: NodeId,
    inputs: &[TensorDesc],
    outputs: &[TensorDesc],
) {
    if diagnostics.enabled(DiagnosticLevel::Info) {
        let descs: Vec<String> = outputs.iter().map(|desc| desc.to_string()).collect();
        diagnostics.info(graph, id, format_args!("outputs [{}]", descs.join("; ")));
    }

    let inputs_ranked = inputs.iter().all(|input| input.rank().is_some());
    if inputs_ranked && outputs.iter().any(|output| output.rank().is_none()) {
        diagnostics.warn(
            graph,
            id,
            format_args!("output rank is unknown although all input ranks are known"),
        );
    }
}
