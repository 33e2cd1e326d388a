use crate::attrs::{AttrType, Attrs};
use crate::dtype::DataType;
use crate::errors::{Cardinality, InferError};
use crate::infer_shapes::{output_desc, InferShapes};
use crate::ops::{same_dtype, unranked_output};
use crate::shape::{RangedDim, RangedShape};
use crate::shape_expr::{broadcast_all, broadcast_shapes};
use crate::tensor_desc::TensorDesc;
use crate::validate::{check_dtype, check_input_count, validate_attrs, AttrSpec, Domain};

/// Element types accepted by an elementwise operator.
#[derive(Copy, Clone, Debug, PartialEq)]
enum Operands {
    /// Any type, as long as both operands agree.
    Any,
    Integer,
    Bool,
}

impl Operands {
    fn accepts(self, dtype: DataType) -> bool {
        match self {
            Self::Any => true,
            Self::Integer => dtype.is_integer(),
            Self::Bool => dtype == DataType::Bool,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::Any => "any type",
            Self::Integer => "an integer type",
            Self::Bool => "bool",
        }
    }
}

/// Function used to evaluate an operator on constant integer inputs.
type FoldFn = fn(i64, i64) -> Option<i64>;

/// Shape inference for binary elementwise operators.
///
/// The inputs are broadcast together following NumPy rules. Both inputs must
/// have the same element type. When both inputs are small integer constants
/// and the operator has a fold function, the output is a constant too. This
/// lets shape computations such as `Mul(Shape(x)[0], 2)` stay constant.
#[derive(Copy, Clone, Debug)]
pub struct BinaryOp {
    operands: Operands,
    bool_output: bool,
    fold: Option<FoldFn>,
}

impl BinaryOp {
    /// Arithmetic operator whose output type matches the inputs.
    pub fn arithmetic() -> Self {
        BinaryOp {
            operands: Operands::Any,
            bool_output: false,
            fold: None,
        }
    }

    /// Bitwise operator which accepts integer types only.
    pub fn bitwise() -> Self {
        BinaryOp {
            operands: Operands::Integer,
            ..Self::arithmetic()
        }
    }

    /// Comparison operator with a bool output.
    pub fn comparison() -> Self {
        BinaryOp {
            bool_output: true,
            ..Self::arithmetic()
        }
    }

    /// Logical operator with bool inputs and output.
    pub fn logical() -> Self {
        BinaryOp {
            operands: Operands::Bool,
            bool_output: true,
            fold: None,
        }
    }

    /// Evaluate the operator with `fold` when both inputs are constants.
    pub fn with_fold(self, fold: FoldFn) -> Self {
        BinaryOp {
            fold: Some(fold),
            ..self
        }
    }

    fn fold_consts(
        &self,
        a: &TensorDesc,
        b: &TensorDesc,
        out_dims: &[RangedDim],
    ) -> Option<TensorDesc> {
        let fold = self.fold?;
        if !a.dtype().is_integer() || out_dims.len() > 1 {
            return None;
        }
        let (x, y) = (a.const_value()?, b.const_value()?);
        let values: Option<Vec<i64>> = match (x.len(), y.len()) {
            (1, _) => y.iter().map(|&y| fold(x[0], y)).collect(),
            (_, 1) => x.iter().map(|&x| fold(x, y[0])).collect(),
            (n, m) if n == m => x.iter().zip(y).map(|(&x, &y)| fold(x, y)).collect(),
            _ => None,
        };
        let values = values?;
        match out_dims {
            [] => Some(TensorDesc::from_const_scalar(*values.first()?, a.dtype())),
            _ => Some(TensorDesc::from_const_vec(values, a.dtype())),
        }
    }
}

impl InferShapes for BinaryOp {
    fn infer_shapes(
        &self,
        inputs: &[TensorDesc],
        _attrs: &Attrs,
    ) -> Result<Vec<TensorDesc>, InferError> {
        let [a, b] = inputs else {
            return Err(InferError::IncorrectInputCount {
                expected: Cardinality::Exactly(2),
                actual: inputs.len(),
            });
        };

        check_dtype(0, a, |dtype| self.operands.accepts(dtype), self.operands.describe())?;
        let in_dtype = same_dtype(inputs, 0..2)?;
        let out_dtype = if self.bool_output {
            DataType::Bool
        } else {
            in_dtype
        };

        let (Some(a_dims), Some(b_dims)) = (a.ranged_dims(), b.ranged_dims()) else {
            return Ok(unranked_output(out_dtype));
        };
        let out_dims = broadcast_shapes(&a_dims, &b_dims)?;

        if let Some(folded) = self.fold_consts(a, b, &out_dims) {
            return Ok([folded].into());
        }

        Ok([output_desc(&out_dims, out_dtype, inputs)].into())
    }
}

/// Broadcast the shapes of several inputs, or return `None` if any input has
/// unknown rank.
fn broadcast_inputs(inputs: &[TensorDesc]) -> Result<Option<RangedShape>, InferError> {
    let Some(shapes) = inputs
        .iter()
        .map(|input| input.ranged_dims())
        .collect::<Option<Vec<_>>>()
    else {
        return Ok(None);
    };
    broadcast_all(shapes.iter().map(|s| s.as_slice())).map(Some)
}

/// Select operator.
///
/// Chooses elements from `x` or `y` depending on a bool `condition`. All
/// three inputs are broadcast together.
pub struct Select;

impl InferShapes for Select {
    fn infer_shapes(
        &self,
        inputs: &[TensorDesc],
        _attrs: &Attrs,
    ) -> Result<Vec<TensorDesc>, InferError> {
        let [condition, _x, _y] = inputs else {
            return Err(InferError::IncorrectInputCount {
                expected: Cardinality::Exactly(3),
                actual: inputs.len(),
            });
        };
        check_dtype(0, condition, |dtype| dtype == DataType::Bool, "bool")?;
        let dtype = same_dtype(inputs, 1..3)?;

        match broadcast_inputs(inputs)? {
            Some(dims) => Ok([output_desc(&dims, dtype, inputs)].into()),
            None => Ok(unranked_output(dtype)),
        }
    }
}

/// AddN operator.
///
/// Sums `N` inputs of the same type. The `N` attribute must match the number
/// of inputs.
pub struct AddN;

const ADD_N_ATTRS: &[AttrSpec] =
    &[AttrSpec::required("N", AttrType::Int).with_domain(Domain::Positive)];

impl InferShapes for AddN {
    fn validate(&self, attrs: &Attrs) -> Result<(), InferError> {
        validate_attrs(attrs, ADD_N_ATTRS)
    }

    fn infer_shapes(
        &self,
        inputs: &[TensorDesc],
        attrs: &Attrs,
    ) -> Result<Vec<TensorDesc>, InferError> {
        check_input_count(inputs, Cardinality::AtLeast(1))?;
        let n = attrs.require_int("N")?;
        if n as usize != inputs.len() {
            return Err(InferError::inconsistent(format!(
                "N is {} but the operator has {} inputs",
                n,
                inputs.len()
            )));
        }
        let dtype = same_dtype(inputs, 0..inputs.len())?;

        match broadcast_inputs(inputs)? {
            Some(dims) => Ok([output_desc(&dims, dtype, inputs)].into()),
            None => Ok(unranked_output(dtype)),
        }
    }
}
