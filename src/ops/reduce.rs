use crate::attrs::{AttrType, Attrs};
use crate::dtype::DataType;
use crate::errors::{Cardinality, InferError};
use crate::infer_shapes::{output_desc, InferShapes};
use crate::ops::{dim_in_range, same_dtype, unranked_output, IntsOperand};
use crate::shape::{DimRange, RangedShape};
use crate::shape_expr::{reduce_shape, unify_dims};
use crate::tensor_desc::TensorDesc;
use crate::validate::{check_dtype, check_input_count, validate_attrs, AttrSpec, Domain};

const REDUCE_ATTRS: &[AttrSpec] = &[AttrSpec::optional("keep_dims", AttrType::Bool)];

const REDUCE_D_ATTRS: &[AttrSpec] = &[
    AttrSpec::required("axes", AttrType::Ints),
    AttrSpec::optional("keep_dims", AttrType::Bool),
];

/// Reduction operators such as `ReduceSum` and `ReduceMeanD`.
///
/// The axes come from the second input (`ReduceSum`) or the `axes`
/// attribute (`ReduceSumD`). Reduced axes are removed, or kept with size 1
/// if `keep_dims` is set. An empty list of axes leaves the input unchanged.
#[derive(Copy, Clone, Debug)]
pub struct Reduce {
    axes: IntsOperand,
}

impl Reduce {
    pub fn from_input() -> Self {
        Reduce {
            axes: IntsOperand::Input(1),
        }
    }

    pub fn from_attr() -> Self {
        Reduce {
            axes: IntsOperand::Attr("axes"),
        }
    }
}

impl InferShapes for Reduce {
    fn validate(&self, attrs: &Attrs) -> Result<(), InferError> {
        match self.axes {
            IntsOperand::Attr(_) => validate_attrs(attrs, REDUCE_D_ATTRS),
            IntsOperand::Input(_) => validate_attrs(attrs, REDUCE_ATTRS),
        }
    }

    fn infer_shapes(
        &self,
        inputs: &[TensorDesc],
        attrs: &Attrs,
    ) -> Result<Vec<TensorDesc>, InferError> {
        check_input_count(inputs, Cardinality::Exactly(self.axes.input_count(1)))?;
        let input = &inputs[0];
        let keep_dims = attrs.get_bool("keep_dims")?.unwrap_or(false);
        let axes = self.axes.values(inputs, attrs)?;

        let Some(dims) = input.ranged_dims() else {
            return Ok(unranked_output(input.dtype()));
        };

        let output = match axes {
            Some(axes) => output_desc(&reduce_shape(&dims, axes, keep_dims)?, input.dtype(), inputs),
            None if self.axes.known_len(inputs, attrs) == Some(0) => {
                output_desc(&dims, input.dtype(), inputs)
            }
            // Each dim either keeps its size or becomes 1.
            None if keep_dims => {
                let dims: RangedShape = dims
                    .iter()
                    .map(|d| dim_in_range(d.range.hull(&DimRange::fixed(1))))
                    .collect();
                TensorDesc::from_ranged_dims(&dims, input.dtype(), true)
            }
            None => TensorDesc::unranked(input.dtype()),
        };
        Ok([output].into())
    }
}

const SQUARE_SUM_ATTRS: &[AttrSpec] = &[
    AttrSpec::required("axis", AttrType::Ints),
    AttrSpec::optional("keep_dims", AttrType::Bool),
];

/// SquareSumV2 operator.
///
/// Computes the sum of squares over the axes in the `axis` attribute,
/// together with the elementwise squares. The first output has the reduced
/// shape and the second has the input shape.
pub struct SquareSumV2;

impl InferShapes for SquareSumV2 {
    fn validate(&self, attrs: &Attrs) -> Result<(), InferError> {
        validate_attrs(attrs, SQUARE_SUM_ATTRS)
    }

    fn infer_shapes(
        &self,
        inputs: &[TensorDesc],
        attrs: &Attrs,
    ) -> Result<Vec<TensorDesc>, InferError> {
        check_input_count(inputs, Cardinality::Exactly(1))?;
        let input = &inputs[0];
        let axes = attrs.require_ints("axis")?;
        let keep_dims = attrs.get_bool("keep_dims")?.unwrap_or(false);
        let squares = input.clone().without_const_value();

        let sum = match input.ranged_dims() {
            Some(dims) => output_desc(&reduce_shape(&dims, axes, keep_dims)?, input.dtype(), inputs),
            None => TensorDesc::unranked(input.dtype()),
        };
        Ok([sum, squares].into())
    }
}

const KL_DIV_ATTRS: &[AttrSpec] = &[AttrSpec::required("reduction", AttrType::String)
    .with_domain(Domain::OneOf(&["none", "sum", "batchmean", "mean"]))];

/// KLDiv operator.
///
/// Computes the Kullback-Leibler divergence between two tensors of the
/// same shape. With `reduction` set to `none` the output has the input
/// shape. The other reductions (`sum`, `batchmean`, `mean`) produce a
/// scalar.
pub struct KLDiv;

impl InferShapes for KLDiv {
    fn validate(&self, attrs: &Attrs) -> Result<(), InferError> {
        validate_attrs(attrs, KL_DIV_ATTRS)
    }

    fn infer_shapes(
        &self,
        inputs: &[TensorDesc],
        attrs: &Attrs,
    ) -> Result<Vec<TensorDesc>, InferError> {
        check_input_count(inputs, Cardinality::Exactly(2))?;
        let dtype = same_dtype(inputs, 0..2)?;
        check_dtype(0, &inputs[0], DataType::is_float, "a float type")?;

        let dims = match (inputs[0].ranged_dims(), inputs[1].ranged_dims()) {
            (Some(x), Some(target)) => {
                if x.len() != target.len() {
                    return Err(InferError::RankMismatch {
                        input: 1,
                        expected: Cardinality::Exactly(x.len()),
                        actual: target.len(),
                    });
                }
                let dims = x
                    .iter()
                    .zip(&target)
                    .map(|(a, b)| unify_dims(a, b))
                    .collect::<Option<RangedShape>>()
                    .ok_or_else(|| {
                        InferError::incompatible(format!(
                            "input shape {} does not match target shape {}",
                            inputs[0].shape(),
                            inputs[1].shape()
                        ))
                    })?;
                Some(dims)
            }
            (x, target) => x.or(target),
        };

        let output = if attrs.require_str("reduction")? == "none" {
            match dims {
                Some(dims) => output_desc(&dims, dtype, inputs),
                None => TensorDesc::unranked(dtype),
            }
        } else {
            TensorDesc::from_dims(&[], dtype)
        };
        Ok([output].into())
    }
}
