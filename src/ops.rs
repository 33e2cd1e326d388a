//! Shape inference rules for the built-in operators.
//!
//! Each rule is a type implementing [`InferShapes`](crate::InferShapes).
//! Rules shared by several operator kinds (eg. every elementwise arithmetic
//! operator) are configured when they are registered. See
//! [`OpRegistry::with_all_ops`](crate::OpRegistry::with_all_ops) for the
//! mapping from operator kinds to rules.

use smallvec::SmallVec;

use crate::attrs::Attrs;
use crate::dtype::DataType;
use crate::errors::{Cardinality, InferError};
use crate::shape::{Dim, DimRange, RangedDim};
use crate::tensor_desc::TensorDesc;
use crate::validate::check_dtype;

mod binary;
mod conv_pool;
mod layout;
mod matmul;
mod reduce;
mod unary;

pub use binary::{AddN, BinaryOp, Select};
pub use conv_pool::{BiasAddGrad, Conv, GlobalAvgPool, Pool, PoolKind};
pub use layout::{
    Concat, Expand, Gather, MatrixDiag, Reshape, Squeeze, Tile, TopK, Transpose, Unsqueeze,
};
pub use matmul::{BatchMatMul, MatMul};
pub use reduce::{KLDiv, Reduce, SquareSumV2};
pub use unary::{Cast, FakeQuantWithMinMaxArgs, UnaryOp};

/// Return the result of a rule whose single output has unknown rank.
fn unranked_output(dtype: DataType) -> Vec<TensorDesc> {
    [TensorDesc::unranked(dtype)].into()
}

/// Return a dim whose size is only known to be in `range`.
fn dim_in_range(range: DimRange) -> RangedDim {
    match range.fixed_value() {
        Some(size) => RangedDim::fixed(size),
        None => RangedDim::dynamic(range),
    }
}

/// Return the compile-time value of an integer input, such as the `axis`
/// input of a gather, if it is known.
///
/// Fails with [`InferError::DTypeMismatch`] if the input does not have an
/// index type.
fn const_ints(inputs: &[TensorDesc], index: usize) -> Result<Option<&[i64]>, InferError> {
    let Some(input) = inputs.get(index) else {
        return Ok(None);
    };
    check_dtype(index, input, DataType::is_index, "int32 or int64")?;
    Ok(input.const_value())
}

/// Return the single value of a scalar or one-element constant.
fn single_int(values: &[i64], name: &str) -> Result<i64, InferError> {
    match values {
        [value] => Ok(*value),
        _ => Err(InferError::out_of_domain(
            name,
            format!("expected a single value, got {:?}", values),
        )),
    }
}

/// A list of integers, such as the axes of a reduction, given either as an
/// attribute or as an input whose value may be known at compile time.
///
/// Operators that exist in both forms (eg. `Tile` and `TileD`) share a rule
/// configured with the appropriate source.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum IntsOperand {
    Input(usize),
    Attr(&'static str),
}

impl IntsOperand {
    /// Return the values, or `None` if they come from an input whose value
    /// is not known.
    fn values<'a>(
        &self,
        inputs: &'a [TensorDesc],
        attrs: &'a Attrs,
    ) -> Result<Option<&'a [i64]>, InferError> {
        match *self {
            Self::Input(index) => const_ints(inputs, index),
            Self::Attr(name) => attrs.require_ints(name).map(Some),
        }
    }

    /// Return the number of values, if known.
    fn known_len(&self, inputs: &[TensorDesc], attrs: &Attrs) -> Option<usize> {
        match *self {
            Self::Input(index) => match inputs.get(index)?.dims()? {
                [] => Some(1),
                [Dim::Fixed(len)] => Some(*len),
                _ => None,
            },
            Self::Attr(name) => attrs.get_ints(name).ok().flatten().map(|v| v.len()),
        }
    }

    /// Return the number of operator inputs, given the number of data
    /// inputs.
    fn input_count(&self, data_inputs: usize) -> usize {
        match self {
            Self::Input(_) => data_inputs + 1,
            Self::Attr(_) => data_inputs,
        }
    }
}

/// Read a list attribute of sizes, such as strides or pads.
fn usize_list(attrs: &Attrs, name: &str) -> Result<Option<SmallVec<[usize; 6]>>, InferError> {
    let Some(values) = attrs.get_ints(name)? else {
        return Ok(None);
    };
    values
        .iter()
        .map(|&v| {
            usize::try_from(v)
                .map_err(|_| InferError::out_of_domain(name, format!("{} is negative", v)))
        })
        .collect::<Result<_, _>>()
        .map(Some)
}

/// Check that every input in `indices` has the same element type as the
/// first, and return it.
fn same_dtype(
    inputs: &[TensorDesc],
    indices: impl IntoIterator<Item = usize>,
) -> Result<DataType, InferError> {
    let mut dtype = None;
    for index in indices {
        let Some(input) = inputs.get(index) else {
            continue;
        };
        match dtype {
            None => dtype = Some(input.dtype()),
            Some(expected) if expected != input.dtype() => {
                return Err(InferError::dtype_mismatch(
                    index,
                    expected.name(),
                    input.dtype(),
                ));
            }
            Some(_) => {}
        }
    }
    dtype.ok_or(InferError::IncorrectInputCount {
        expected: Cardinality::AtLeast(1),
        actual: inputs.len(),
    })
}
