//! opshape infers the shapes, element types and value ranges of tensors in
//! operator graphs, without executing them.
//!
//! # Describing tensors
//!
//! A [`TensorDesc`] describes a tensor at compile time: its [`Shape`], which
//! may have unknown dimensions or an unknown rank, its [`DataType`] and
//! memory layout ([`Format`]). A descriptor may also carry:
//!
//! - A value range for each dimension, giving bounds on its runtime size.
//!   Descriptors with ranges are in _dynamic mode_. Operators whose inputs
//!   are in dynamic mode produce outputs with ranges too.
//! - The values of a small integer tensor, when known. These let shape
//!   computations such as `Reshape(x, Concat(Shape(y)[0], -1))` produce
//!   known shapes.
//!
//! # Inferring a single operator
//!
//! Shape inference rules implement [`InferShapes`]. Rules for built-in
//! operators are registered in an [`OpRegistry`], which maps operator kinds
//! such as `"Conv2D"` to rules. Use [`OpRegistry::global`] for a shared
//! registry of the built-in operators, or [`OpRegistry::with_all_ops`] to
//! create one that can be extended with custom rules.
//!
//! Rules first validate the operator's [`Attrs`] and then compute output
//! descriptors from input descriptors. Failures are reported as an
//! [`InferError`], whose [`kind`](InferError::kind) gives a coarse
//! [`ErrorKind`].
//!
//! # Inferring graphs
//!
//! A [`Graph`] is a set of operator nodes whose inputs are either outputs of
//! other nodes or descriptors supplied directly. [`GraphInferencer`] visits
//! the nodes in dependency order and infers the outputs of each. The first
//! node that fails stops inference with a [`GraphError`] identifying it.
//!
//! Independent graphs can be inferred in parallel using
//! [`GraphInferencer::infer_all`].
//!
//! # Configuration
//!
//! [`InferOptions`] enables extra checks and diagnostics. These can also be
//! set using environment variables, see [`InferOptions::from_env`].
//! Diagnostics are emitted using [`tracing`](https://docs.rs/tracing).

mod diagnostics;
mod env;
mod errors;
mod graph;
mod infer_shapes;
mod op_registry;
mod options;
mod tensor_desc;

pub mod attrs;
pub mod dtype;
pub mod ops;
pub mod shape;
pub mod shape_expr;
pub mod validate;

pub use attrs::{AttrType, AttrValue, Attrs};
pub use diagnostics::DiagnosticLevel;
pub use dtype::{DataType, Format};
pub use errors::{Cardinality, ErrorKind, InferError};
pub use graph::{Graph, GraphError, GraphInferencer, InferredShapes, Node, NodeId, NodeInput};
pub use infer_shapes::{is_dynamic, run_rule, InferShapes};
pub use op_registry::OpRegistry;
pub use options::InferOptions;
pub use shape::{Dim, DimRange, RangedDim, Shape};
pub use tensor_desc::TensorDesc;
