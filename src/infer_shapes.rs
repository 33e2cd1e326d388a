//! The trait implemented by operator shape inference rules.

use crate::attrs::Attrs;
use crate::dtype::DataType;
use crate::errors::InferError;
use crate::shape::RangedDim;
use crate::tensor_desc::TensorDesc;

/// Infer the descriptors of an operator's outputs given its inputs and
/// attributes.
///
/// Rules are invoked in two steps. [`validate`](InferShapes::validate) checks
/// the attributes on their own and [`infer_shapes`](InferShapes::infer_shapes)
/// then computes the outputs. A failure at either step rejects the node.
///
/// Closures with the signature of `infer_shapes` implement this trait, with
/// no separate validation step.
pub trait InferShapes: Send + Sync {
    /// Check the operator's attributes before any inputs are examined.
    fn validate(&self, _attrs: &Attrs) -> Result<(), InferError> {
        Ok(())
    }

    /// Compute the output descriptors.
    ///
    /// Implementations may assume that `validate` has succeeded for `attrs`.
    fn infer_shapes(
        &self,
        inputs: &[TensorDesc],
        attrs: &Attrs,
    ) -> Result<Vec<TensorDesc>, InferError>;
}

impl<F> InferShapes for F
where
    F: Fn(&[TensorDesc], &Attrs) -> Result<Vec<TensorDesc>, InferError> + Send + Sync,
{
    fn infer_shapes(
        &self,
        inputs: &[TensorDesc],
        attrs: &Attrs,
    ) -> Result<Vec<TensorDesc>, InferError> {
        self(inputs, attrs)
    }
}

/// Validate attributes and then infer outputs.
pub fn run_rule(
    rule: &dyn InferShapes,
    inputs: &[TensorDesc],
    attrs: &Attrs,
) -> Result<Vec<TensorDesc>, InferError> {
    rule.validate(attrs)?;
    rule.infer_shapes(inputs, attrs)
}

/// Return true if any input carries value ranges.
///
/// Outputs of an operator carry value ranges only in this case.
pub fn is_dynamic(inputs: &[TensorDesc]) -> bool {
    inputs.iter().any(|input| input.has_value_range())
}

/// Create an output descriptor from computed dimensions, attaching value
/// ranges if any input has them.
pub(crate) fn output_desc(dims: &[RangedDim], dtype: DataType, inputs: &[TensorDesc]) -> TensorDesc {
    TensorDesc::from_ranged_dims(dims, dtype, is_dynamic(inputs))
}
