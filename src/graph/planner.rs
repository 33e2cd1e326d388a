use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::{Graph, GraphError, NodeId, NodeInput};

/// Planner determines the order in which a graph's nodes are inferred.
pub struct Planner<'a> {
    graph: &'a Graph,
}

impl<'a> Planner<'a> {
    pub fn with_graph(graph: &'a Graph) -> Self {
        Planner { graph }
    }

    /// Return the IDs of all nodes in the graph, ordered so that each node
    /// comes after the nodes whose outputs it consumes.
    ///
    /// Nodes which are ready at the same time are ordered by ID. Fails with
    /// [`GraphError::InvalidEdge`] if an input references a node that is not
    /// in the graph, or [`GraphError::CyclicGraph`] if some nodes depend on
    /// each other.
    pub fn create_plan(&self) -> Result<Vec<NodeId>, GraphError> {
        let node_count = self.graph.len();

        // Number of unresolved edges into each node.
        let mut pending_inputs = vec![0usize; node_count];

        // Map of node to the nodes which consume its outputs.
        let mut consumers: FxHashMap<NodeId, SmallVec<[NodeId; 2]>> = FxHashMap::default();

        for (id, node) in self.graph.iter() {
            for (input_index, input) in node.inputs().iter().enumerate() {
                let NodeInput::Edge {
                    node: source,
                    output,
                } = input
                else {
                    continue;
                };
                if self.graph.get_node(*source).is_none() {
                    return Err(GraphError::InvalidEdge {
                        node: id,
                        input: input_index,
                        source_node: *source,
                        output: *output,
                    });
                }
                pending_inputs[id.as_usize()] += 1;
                consumers.entry(*source).or_default().push(id);
            }
        }

        let mut ready: VecDeque<NodeId> = self
            .graph
            .node_ids()
            .filter(|id| pending_inputs[id.as_usize()] == 0)
            .collect();
        let mut plan = Vec::with_capacity(node_count);

        while let Some(id) = ready.pop_front() {
            plan.push(id);
            let Some(node_consumers) = consumers.get(&id) else {
                continue;
            };
            for consumer in node_consumers {
                let pending = &mut pending_inputs[consumer.as_usize()];
                *pending -= 1;
                if *pending == 0 {
                    ready.push_back(*consumer);
                }
            }
        }

        if plan.len() < node_count {
            let nodes = self
                .graph
                .node_ids()
                .filter(|id| pending_inputs[id.as_usize()] > 0)
                .collect();
            return Err(GraphError::CyclicGraph { nodes });
        }

        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::Planner;
    use crate::attrs::Attrs;
    use crate::dtype::DataType;
    use crate::errors::ErrorKind;
    use crate::graph::{Graph, GraphError, NodeId, NodeInput};
    use crate::tensor_desc::TensorDesc;

    #[test]
    fn test_plan_orders_producers_first() {
        let mut g = Graph::new();
        let x = NodeInput::Value(TensorDesc::from_dims(&[2], DataType::Float32));

        // Add the consumer before its producers by referencing IDs that are
        // allocated afterwards.
        let c = g.add_node(
            Some("c"),
            "Add",
            Attrs::new(),
            vec![
                NodeInput::edge(NodeId::from_u32(1), 0),
                NodeInput::edge(NodeId::from_u32(2), 0),
            ],
        );
        let a = g.add_node(Some("a"), "Relu", Attrs::new(), vec![x.clone()]);
        let b = g.add_node(
            Some("b"),
            "Relu",
            Attrs::new(),
            vec![NodeInput::edge(a, 0)],
        );

        let plan = Planner::with_graph(&g).create_plan().unwrap();
        assert_eq!(plan, [a, b, c]);
    }

    #[test]
    fn test_plan_detects_cycle() {
        let mut g = Graph::new();
        let x = NodeInput::Value(TensorDesc::from_dims(&[2], DataType::Float32));
        let a = g.add_node(Some("a"), "Relu", Attrs::new(), vec![x]);
        let b = g.add_node(
            Some("b"),
            "Add",
            Attrs::new(),
            vec![NodeInput::edge(a, 0), NodeInput::edge(NodeId::from_u32(2), 0)],
        );
        let c = g.add_node(Some("c"), "Relu", Attrs::new(), vec![NodeInput::edge(b, 0)]);

        let err = Planner::with_graph(&g).create_plan().err().unwrap();
        assert_eq!(err.kind(), ErrorKind::CyclicGraph);
        assert_eq!(err, GraphError::CyclicGraph { nodes: vec![b, c] });
    }

    #[test]
    fn test_plan_detects_missing_node() {
        let mut g = Graph::new();
        let a = g.add_node(
            None,
            "Relu",
            Attrs::new(),
            vec![NodeInput::edge(NodeId::from_u32(7), 0)],
        );

        let err = Planner::with_graph(&g).create_plan().err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidEdge);
        assert_eq!(err.node(), Some(a));
    }
}
