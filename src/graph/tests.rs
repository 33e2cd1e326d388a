use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{Graph, GraphError, GraphInferencer, NodeId, NodeInput};
use crate::attrs::Attrs;
use crate::dtype::{DataType, Format};
use crate::errors::{ErrorKind, InferError};
use crate::op_registry::OpRegistry;
use crate::ops::Conv;
use crate::options::InferOptions;
use crate::shape::{DimRange, RangedDim};
use crate::tensor_desc::TensorDesc;

fn float(dims: &[usize]) -> NodeInput {
    TensorDesc::from_dims(dims, DataType::Float16).into()
}

fn conv_attrs() -> Attrs {
    Attrs::new()
        .with("strides", [1i64, 1, 1, 1])
        .with("data_format", "NHWC")
}

/// Rule which counts how many times it runs and passes its first input
/// through.
struct CountingRule(Arc<AtomicUsize>);

impl crate::infer_shapes::InferShapes for CountingRule {
    fn infer_shapes(
        &self,
        inputs: &[TensorDesc],
        _attrs: &Attrs,
    ) -> Result<Vec<TensorDesc>, InferError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(inputs[..1].to_vec())
    }
}

#[test]
fn test_infer_chain() {
    let mut g = Graph::new();
    let conv = g.add_node(
        Some("conv"),
        "Conv2D",
        conv_attrs(),
        vec![float(&[1, 32, 32, 3]), float(&[3, 3, 3, 16])],
    );
    let relu = g.add_node(Some("relu"), "Relu", Attrs::new(), vec![NodeInput::edge(conv, 0)]);
    let grad = g.add_node(
        Some("grad"),
        "BiasAddGrad",
        Attrs::new().with("data_format", "NHWC"),
        vec![NodeInput::edge(relu, 0)],
    );

    let shapes = GraphInferencer::new(OpRegistry::global())
        .infer(&g)
        .unwrap();

    assert_eq!(shapes.len(), 3);
    let conv_out = shapes.output(conv, 0).unwrap();
    assert_eq!(conv_out.shape().to_i64s(), [1, 30, 30, 16]);
    assert_eq!(conv_out.format(), Format::NHWC);
    assert_eq!(shapes.output(relu, 0), Some(conv_out));
    assert_eq!(shapes.output(grad, 0).unwrap().shape().to_i64s(), [16]);
    assert_eq!(shapes.output(grad, 1), None);
}

#[test]
fn test_failing_node_stops_inference() {
    let bias_grad_calls = Arc::new(AtomicUsize::new(0));
    let mut registry = OpRegistry::new();
    registry.register("Conv2D", Conv::conv_2d()).unwrap();
    registry
        .register("BiasAddGrad", CountingRule(bias_grad_calls.clone()))
        .unwrap();

    let mut g = Graph::new();
    let conv = g.add_node(
        Some("conv"),
        "Conv2D",
        conv_attrs(),
        vec![float(&[1, 4, 32, 32, 3]), float(&[3, 3, 3, 16])],
    );
    g.add_node(
        Some("grad"),
        "BiasAddGrad",
        Attrs::new(),
        vec![NodeInput::edge(conv, 0)],
    );

    let err = GraphInferencer::new(&registry).infer(&g).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::RankMismatch);
    assert_eq!(err.node(), Some(conv));
    let GraphError::NodeFailed { name, op_kind, .. } = &err else {
        panic!("unexpected error {:?}", err);
    };
    assert_eq!(name.as_deref(), Some("conv"));
    assert_eq!(op_kind, "Conv2D");
    assert_eq!(bias_grad_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_rank_mismatch_with_builtin_rules() {
    let mut g = Graph::new();
    let conv = g.add_node(
        None,
        "Conv2D",
        conv_attrs(),
        vec![float(&[1, 4, 32, 32, 3]), float(&[3, 3, 3, 16])],
    );
    g.add_node(None, "BiasAddGrad", Attrs::new(), vec![NodeInput::edge(conv, 0)]);

    let err = GraphInferencer::new(OpRegistry::global())
        .infer(&g)
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::RankMismatch);
    assert_eq!(err.node(), Some(conv));
}

#[test]
fn test_validation_error_reported_for_node() {
    let mut g = Graph::new();
    let x = g.add_node(None, "Relu", Attrs::new(), vec![float(&[1, 19, 19, 19, 4])]);
    let quant = g.add_node(
        Some("quant"),
        "FakeQuantWithMinMaxArgs",
        Attrs::new()
            .with("min", -6.0f32)
            .with("max", 6.0f32)
            .with("num_bits", "eight"),
        vec![NodeInput::edge(x, 0)],
    );

    let err = GraphInferencer::new(OpRegistry::global())
        .infer(&g)
        .err()
        .unwrap();
    assert_eq!(err.node(), Some(quant));
    assert_eq!(err.kind(), ErrorKind::AttributeTypeMismatch);
    assert!(err.kind().is_validation());
}

#[test]
fn test_unknown_operator() {
    let mut g = Graph::new();
    let node = g.add_node(Some("mystery"), "Mystery", Attrs::new(), vec![float(&[2])]);

    let err = GraphInferencer::new(OpRegistry::global())
        .infer(&g)
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::UnknownOperator);
    assert_eq!(err.node(), Some(node));
}

#[test]
fn test_invalid_edges() {
    // Reference to a missing node.
    let mut g = Graph::new();
    g.add_node(
        None,
        "Relu",
        Attrs::new(),
        vec![NodeInput::edge(NodeId::from_u32(4), 0)],
    );
    let err = GraphInferencer::new(OpRegistry::global())
        .infer(&g)
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidEdge);

    // Reference to a missing output of an existing node.
    let mut g = Graph::new();
    let relu = g.add_node(None, "Relu", Attrs::new(), vec![float(&[2])]);
    let abs = g.add_node(None, "Abs", Attrs::new(), vec![NodeInput::edge(relu, 1)]);
    let err = GraphInferencer::new(OpRegistry::global())
        .infer(&g)
        .err()
        .unwrap();
    assert_eq!(
        err,
        GraphError::InvalidEdge {
            node: abs,
            input: 0,
            source_node: relu,
            output: 1,
        }
    );
}

#[test]
fn test_cycle() {
    let mut g = Graph::new();
    let a = g.add_node(
        None,
        "Relu",
        Attrs::new(),
        vec![NodeInput::edge(NodeId::from_u32(1), 0)],
    );
    let b = g.add_node(None, "Relu", Attrs::new(), vec![NodeInput::edge(a, 0)]);

    let err = GraphInferencer::new(OpRegistry::global())
        .infer(&g)
        .err()
        .unwrap();
    assert_eq!(err, GraphError::CyclicGraph { nodes: vec![a, b] });
}

#[test]
fn test_infer_seals_registry() {
    let mut registry = OpRegistry::with_all_ops();
    let g = Graph::new();
    let shapes = GraphInferencer::new(&registry).infer(&g).unwrap();
    assert!(shapes.is_empty());

    let err = registry
        .register(
            "Custom",
            |inputs: &[TensorDesc], _attrs: &Attrs| -> Result<Vec<TensorDesc>, InferError> {
                Ok(inputs.to_vec())
            },
        )
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::RegistrySealed);
}

#[test]
fn test_dynamic_ranges_flow_through_graph() {
    let input = TensorDesc::from_i64s(&[-1, 8, 375], DataType::Float32)
        .unwrap()
        .with_value_range(vec![
            DimRange::new(15, 16),
            DimRange::fixed(8),
            DimRange::fixed(375),
        ])
        .unwrap();

    let mut g = Graph::new();
    let add = g.add_node(
        None,
        "Add",
        Attrs::new(),
        vec![
            input.into(),
            TensorDesc::from_dims(&[16, 8, 375], DataType::Float32).into(),
        ],
    );
    let exp = g.add_node(None, "Exp", Attrs::new(), vec![NodeInput::edge(add, 0)]);

    let shapes = GraphInferencer::new(OpRegistry::global())
        .infer(&g)
        .unwrap();
    let out = shapes.output(exp, 0).unwrap();
    assert_eq!(out.shape().to_i64s(), [-1, 8, 375]);
    assert_eq!(
        out.ranged_dim(0),
        Some(RangedDim::dynamic(DimRange::new(15, 16)))
    );
}

#[test]
fn test_check_descriptors() {
    let bad_input = TensorDesc::from_ranged_dims(
        &[RangedDim::dynamic(DimRange::new(8, 4))],
        DataType::Float32,
        true,
    );
    let mut g = Graph::new();
    g.add_node(None, "Relu", Attrs::new(), vec![bad_input.into()]);

    // Without checks the invalid range passes through.
    assert!(GraphInferencer::new(OpRegistry::global()).infer(&g).is_ok());

    let err = GraphInferencer::new(OpRegistry::global())
        .with_options(InferOptions::default().with_check_descriptors(true))
        .infer(&g)
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidDescriptor);
}

#[test]
fn test_check_outputs() {
    let mut registry = OpRegistry::new();
    registry
        .register(
            "Broken",
            |_inputs: &[TensorDesc], _attrs: &Attrs| -> Result<Vec<TensorDesc>, InferError> {
                Ok(vec![TensorDesc::from_ranged_dims(
                    &[RangedDim::dynamic(DimRange::new(3, 1))],
                    DataType::Int32,
                    true,
                )])
            },
        )
        .unwrap();

    let mut g = Graph::new();
    let node = g.add_node(None, "Broken", Attrs::new(), Vec::new());

    assert!(GraphInferencer::new(&registry).infer(&g).is_ok());

    let err = GraphInferencer::new(&registry)
        .with_options(InferOptions::default().with_check_outputs(true))
        .infer(&g)
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidDescriptor);
    assert_eq!(err.node(), Some(node));
}

#[test]
fn test_infer_all() {
    let mut ok_graph = Graph::new();
    let relu = ok_graph.add_node(None, "Relu", Attrs::new(), vec![float(&[4, 4])]);

    let mut bad_graph = Graph::new();
    bad_graph.add_node(None, "Unknown", Attrs::new(), vec![float(&[4, 4])]);

    let graphs = vec![ok_graph.clone(), bad_graph, ok_graph];
    let results = GraphInferencer::new(OpRegistry::global()).infer_all(&graphs);

    assert_eq!(results.len(), 3);
    let first = results[0].as_ref().unwrap();
    assert_eq!(first.output(relu, 0).unwrap().shape().to_i64s(), [4, 4]);
    assert_eq!(
        results[1].as_ref().err().map(|e| e.kind()),
        Some(ErrorKind::UnknownOperator)
    );
    assert_eq!(results[2].as_ref().ok(), Some(first));
}

#[test]
fn test_inferred_shapes_iter() {
    let mut g = Graph::new();
    let a = g.add_node(Some("a"), "Relu", Attrs::new(), vec![float(&[2, 3])]);
    let b = g.add_node(
        Some("b"),
        "SquareSumV2",
        Attrs::new().with("axis", [1i64]).with("keep_dims", false),
        vec![NodeInput::edge(a, 0)],
    );

    let shapes = GraphInferencer::new(OpRegistry::global())
        .infer(&g)
        .unwrap();
    let counts: Vec<(NodeId, usize)> = shapes.iter().map(|(id, out)| (id, out.len())).collect();
    assert_eq!(counts, [(a, 1), (b, 2)]);
    assert_eq!(g.node_name(b), "b");
    assert_eq!(g.node_name(NodeId::from_u32(9)), "[ID: 9]");
}
