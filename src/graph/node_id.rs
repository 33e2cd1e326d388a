use std::num::NonZero;

/// Handle for a node in a [`Graph`](crate::Graph).
///
/// The ID is the position of the node in the graph, starting from zero, and
/// is also the index of the node's outputs in
/// [`InferredShapes`](crate::InferredShapes). IDs can be created for nodes
/// that don't exist yet, which allows graphs to reference nodes that are
/// added later.
#[derive(Copy, Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeId(NonZero<u32>);

impl NodeId {
    /// Return the position of the node in its graph.
    pub fn as_u32(self) -> u32 {
        self.0.get() - 1
    }

    pub fn as_usize(self) -> usize {
        self.as_u32() as usize
    }

    /// Return the ID of the node at position `index` in a graph.
    ///
    /// Panics if `index` is `u32::MAX`.
    pub fn from_u32(index: u32) -> NodeId {
        // Zero is reserved so that `Option<NodeId>` needs no extra space.
        match NonZero::new(index.wrapping_add(1)) {
            Some(offset) => NodeId(offset),
            None => panic!("node index {} is too large", index),
        }
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({})", self.as_u32())
    }
}
