use smallvec::smallvec;

use crate::attrs::{AttrType, Attrs};
use crate::errors::{Cardinality, InferError};
use crate::infer_shapes::{output_desc, InferShapes};
use crate::ops::{same_dtype, unranked_output};
use crate::shape::{fmt_dims, RangedDim, RangedShape};
use crate::shape_expr::{broadcast_shapes, unify_dims};
use crate::tensor_desc::TensorDesc;
use crate::validate::{check_input_count, check_rank, validate_attrs, AttrSpec};

/// Return the `(rows, columns)` of the matrices in a shape of rank >= 2,
/// after an optional transpose.
fn matrix_dims(dims: &[RangedDim], transpose: bool) -> (RangedDim, RangedDim) {
    let [.., rows, cols] = dims else {
        return (RangedDim::unknown(), RangedDim::unknown());
    };
    if transpose {
        (*cols, *rows)
    } else {
        (*rows, *cols)
    }
}

/// Check that the inner dims of a matrix product agree.
fn inner_dim(
    a: &[RangedDim],
    a_k: &RangedDim,
    b: &[RangedDim],
    b_k: &RangedDim,
) -> Result<RangedDim, InferError> {
    unify_dims(a_k, b_k).ok_or_else(|| {
        InferError::incompatible(format!(
            "cannot multiply {} by {}, inner dims do not match",
            fmt_dims(a),
            fmt_dims(b)
        ))
    })
}

/// Check an optional bias against the number of output columns.
fn check_bias(bias: Option<&TensorDesc>, cols: &RangedDim) -> Result<(), InferError> {
    let Some(bias) = bias else {
        return Ok(());
    };
    check_rank(2, bias, Cardinality::Exactly(1))?;
    if let Some(bias_len) = bias.ranged_dim(0) {
        if unify_dims(&bias_len, cols).is_none() {
            return Err(InferError::incompatible(format!(
                "bias of length {} does not match {} output columns",
                bias_len.dim, cols.dim
            )));
        }
    }
    Ok(())
}

const MATMUL_ATTRS: &[AttrSpec] = &[
    AttrSpec::optional("transpose_x1", AttrType::Bool),
    AttrSpec::optional("transpose_x2", AttrType::Bool),
];

/// MatMul operator.
///
/// Multiplies two matrices, transposing either first if `transpose_x1` or
/// `transpose_x2` is set. An optional third input is a bias with one entry
/// per output column.
pub struct MatMul;

impl InferShapes for MatMul {
    fn validate(&self, attrs: &Attrs) -> Result<(), InferError> {
        validate_attrs(attrs, MATMUL_ATTRS)
    }

    fn infer_shapes(
        &self,
        inputs: &[TensorDesc],
        attrs: &Attrs,
    ) -> Result<Vec<TensorDesc>, InferError> {
        check_input_count(inputs, Cardinality::Between(2, 3))?;
        let (a, b) = (&inputs[0], &inputs[1]);
        check_rank(0, a, Cardinality::Exactly(2))?;
        check_rank(1, b, Cardinality::Exactly(2))?;
        let dtype = same_dtype(inputs, 0..2)?;

        let transpose_a = attrs.get_bool("transpose_x1")?.unwrap_or(false);
        let transpose_b = attrs.get_bool("transpose_x2")?.unwrap_or(false);

        let unknown_matrix = || -> RangedShape { smallvec![RangedDim::unknown(); 2] };
        let a_dims = a.ranged_dims().unwrap_or_else(unknown_matrix);
        let b_dims = b.ranged_dims().unwrap_or_else(unknown_matrix);

        let (m, a_k) = matrix_dims(&a_dims, transpose_a);
        let (b_k, n) = matrix_dims(&b_dims, transpose_b);
        inner_dim(&a_dims, &a_k, &b_dims, &b_k)?;
        check_bias(inputs.get(2), &n)?;

        Ok([output_desc(&[m, n], dtype, inputs)].into())
    }
}

const BATCH_MATMUL_ATTRS: &[AttrSpec] = &[
    AttrSpec::optional("adj_x1", AttrType::Bool),
    AttrSpec::optional("adj_x2", AttrType::Bool),
];

/// BatchMatMulV2 operator.
///
/// Multiplies batches of matrices stored in the last two dims of each
/// input. The batch dims are broadcast together. `adj_x1` and `adj_x2`
/// transpose the corresponding matrices.
pub struct BatchMatMul;

impl InferShapes for BatchMatMul {
    fn validate(&self, attrs: &Attrs) -> Result<(), InferError> {
        validate_attrs(attrs, BATCH_MATMUL_ATTRS)
    }

    fn infer_shapes(
        &self,
        inputs: &[TensorDesc],
        attrs: &Attrs,
    ) -> Result<Vec<TensorDesc>, InferError> {
        check_input_count(inputs, Cardinality::Between(2, 3))?;
        let (a, b) = (&inputs[0], &inputs[1]);
        check_rank(0, a, Cardinality::AtLeast(2))?;
        check_rank(1, b, Cardinality::AtLeast(2))?;
        let dtype = same_dtype(inputs, 0..2)?;

        let (Some(a_dims), Some(b_dims)) = (a.ranged_dims(), b.ranged_dims()) else {
            return Ok(unranked_output(dtype));
        };

        let adj_a = attrs.get_bool("adj_x1")?.unwrap_or(false);
        let adj_b = attrs.get_bool("adj_x2")?.unwrap_or(false);
        let (m, a_k) = matrix_dims(&a_dims, adj_a);
        let (b_k, n) = matrix_dims(&b_dims, adj_b);
        inner_dim(&a_dims, &a_k, &b_dims, &b_k)?;
        check_bias(inputs.get(2), &n)?;

        let mut out_dims = broadcast_shapes(
            &a_dims[..a_dims.len() - 2],
            &b_dims[..b_dims.len() - 2],
        )?;
        out_dims.push(m);
        out_dims.push(n);
        Ok([output_desc(&out_dims, dtype, inputs)].into())
    }
}
