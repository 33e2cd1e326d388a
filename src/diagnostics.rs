use std::cell::RefCell;

use rustc_hash::FxHashSet;

use crate::graph::{Graph, NodeId};

/// Verbosity of diagnostics reported during graph inference.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticLevel {
    /// Don't report any diagnostics.
    #[default]
    Off,
    /// Report only failed nodes and nodes whose outputs lost shape
    /// information.
    Warn,
    /// Report the inferred outputs of every node.
    Info,
}

impl DiagnosticLevel {
    /// Parse a level name such as "warn". Names are case-insensitive.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "off" | "0" => Some(Self::Off),
            "warn" => Some(Self::Warn),
            "info" | "1" => Some(Self::Info),
            _ => None,
        }
    }
}

/// Diagnostic reporter for a graph inference run.
///
/// Messages are emitted as `tracing` events with the node's ID, name and
/// operator kind as fields.
pub struct Diagnostics {
    /// Nodes against which diagnostics have been reported at the `Warn` level.
    warned_nodes: RefCell<FxHashSet<NodeId>>,
    level: DiagnosticLevel,
}

impl Diagnostics {
    pub fn new(level: DiagnosticLevel) -> Self {
        Self {
            warned_nodes: RefCell::new(FxHashSet::default()),
            level,
        }
    }

    /// Return true if diagnostic messages are enabled at a given level.
    pub fn enabled(&self, level: DiagnosticLevel) -> bool {
        level != DiagnosticLevel::Off && self.level >= level
    }

    /// Log a diagnostic message for a given node at the [`Info`](DiagnosticLevel::Info) level.
    pub fn info(&self, graph: &Graph, node: NodeId, message: std::fmt::Arguments<'_>) {
        if !self.enabled(DiagnosticLevel::Info) {
            return;
        }
        let (name, op_kind) = node_fields(graph, node);
        tracing::info!(node = %node, name, op_kind, "{}", message);
    }

    /// Log a diagnostic message for a given node at the [`Warn`](DiagnosticLevel::Warn) level.
    ///
    /// Only the first warning for each node is reported.
    pub fn warn(&self, graph: &Graph, node: NodeId, message: std::fmt::Arguments<'_>) {
        if !self.enabled(DiagnosticLevel::Warn) || !self.warned_nodes.borrow_mut().insert(node) {
            return;
        }
        let (name, op_kind) = node_fields(graph, node);
        tracing::warn!(node = %node, name, op_kind, "{}", message);
    }

    /// Return the number of nodes that have been warned about.
    pub fn warned_count(&self) -> usize {
        self.warned_nodes.borrow().len()
    }
}

fn node_fields(graph: &Graph, id: NodeId) -> (&str, &str) {
    graph
        .get_node(id)
        .map(|n| (n.name().unwrap_or_default(), n.op_kind()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::{DiagnosticLevel, Diagnostics};
    use crate::attrs::Attrs;
    use crate::graph::Graph;

    #[test]
    fn test_parse_level() {
        assert_eq!(DiagnosticLevel::parse("off"), Some(DiagnosticLevel::Off));
        assert_eq!(DiagnosticLevel::parse("WARN"), Some(DiagnosticLevel::Warn));
        assert_eq!(DiagnosticLevel::parse("info"), Some(DiagnosticLevel::Info));
        assert_eq!(DiagnosticLevel::parse("verbose"), None);
    }

    #[test]
    fn test_levels() {
        let diag = Diagnostics::new(DiagnosticLevel::Warn);
        assert!(diag.enabled(DiagnosticLevel::Warn));
        assert!(!diag.enabled(DiagnosticLevel::Info));
        assert!(!diag.enabled(DiagnosticLevel::Off));

        let diag = Diagnostics::new(DiagnosticLevel::Off);
        assert!(!diag.enabled(DiagnosticLevel::Warn));
    }

    #[test]
    fn test_warn_once_per_node() {
        let mut graph = Graph::new();
        let a = graph.add_node(Some("a"), "Relu", Attrs::new(), Vec::new());
        let b = graph.add_node(Some("b"), "Relu", Attrs::new(), Vec::new());

        let diag = Diagnostics::new(DiagnosticLevel::Warn);
        diag.warn(&graph, a, format_args!("first"));
        diag.warn(&graph, a, format_args!("second"));
        diag.warn(&graph, b, format_args!("third"));
        assert_eq!(diag.warned_count(), 2);

        let diag = Diagnostics::new(DiagnosticLevel::Off);
        diag.warn(&graph, a, format_args!("ignored"));
        assert_eq!(diag.warned_count(), 0);
    }
}
