use std::cmp::Ordering;

use crate::attrs::{AttrType, Attrs};
use crate::dtype::DataType;
use crate::errors::{Cardinality, InferError};
use crate::infer_shapes::InferShapes;
use crate::tensor_desc::TensorDesc;
use crate::validate::{check_dtype, check_input_count, validate_attrs, AttrSpec, Domain};

/// Shape inference for unary elementwise operators.
///
/// The output has the same shape, type, layout and value ranges as the
/// input.
#[derive(Copy, Clone, Debug, Default)]
pub struct UnaryOp {
    float_only: bool,
    keep_value: bool,
}

impl UnaryOp {
    /// Operator which accepts any element type (eg. `Relu`, `Neg`).
    pub fn new() -> Self {
        Self::default()
    }

    /// Operator which accepts only floating point types (eg. `Exp`).
    pub fn float_only() -> Self {
        UnaryOp {
            float_only: true,
            keep_value: false,
        }
    }

    /// Operator which passes its input through unchanged, including any
    /// compile-time value.
    pub fn identity() -> Self {
        UnaryOp {
            float_only: false,
            keep_value: true,
        }
    }
}

impl InferShapes for UnaryOp {
    fn infer_shapes(
        &self,
        inputs: &[TensorDesc],
        _attrs: &Attrs,
    ) -> Result<Vec<TensorDesc>, InferError> {
        check_input_count(inputs, Cardinality::Exactly(1))?;
        let input = &inputs[0];
        if self.float_only {
            check_dtype(0, input, DataType::is_float, "a float type")?;
        }

        let output = if self.keep_value {
            input.clone()
        } else {
            input.clone().without_const_value()
        };
        Ok([output].into())
    }
}

/// Cast operator.
///
/// Converts the input to the type named by the `dst_type` attribute.
pub struct Cast;

const CAST_ATTRS: &[AttrSpec] = &[AttrSpec::required("dst_type", AttrType::String)];

impl Cast {
    fn dst_type(attrs: &Attrs) -> Result<DataType, InferError> {
        attrs
            .require_str("dst_type")?
            .parse()
            .map_err(|err: InferError| match err {
                InferError::OutOfDomain { reason, .. } => {
                    InferError::out_of_domain("dst_type", reason)
                }
                other => other,
            })
    }
}

impl InferShapes for Cast {
    fn validate(&self, attrs: &Attrs) -> Result<(), InferError> {
        validate_attrs(attrs, CAST_ATTRS)?;
        Self::dst_type(attrs).map(|_| ())
    }

    fn infer_shapes(
        &self,
        inputs: &[TensorDesc],
        attrs: &Attrs,
    ) -> Result<Vec<TensorDesc>, InferError> {
        check_input_count(inputs, Cardinality::Exactly(1))?;
        let input = &inputs[0];
        let dst_type = Self::dst_type(attrs)?;

        // Integer constants remain valid after an integer-to-integer cast.
        let output = if input.dtype().is_integer() && dst_type.is_integer() {
            input.clone().with_dtype(dst_type)
        } else {
            input.clone().without_const_value().with_dtype(dst_type)
        };
        Ok([output].into())
    }
}

/// FakeQuantWithMinMaxArgs operator.
///
/// Simulates quantization of a float tensor to `num_bits` bits over the
/// interval `[min, max]`. The output has the same shape as the input.
pub struct FakeQuantWithMinMaxArgs;

const FAKE_QUANT_ATTRS: &[AttrSpec] = &[
    AttrSpec::optional("min", AttrType::Float),
    AttrSpec::optional("max", AttrType::Float),
    AttrSpec::optional("num_bits", AttrType::Int).with_domain(Domain::Range(2, 16)),
    AttrSpec::optional("narrow_range", AttrType::Bool),
];

impl InferShapes for FakeQuantWithMinMaxArgs {
    fn validate(&self, attrs: &Attrs) -> Result<(), InferError> {
        validate_attrs(attrs, FAKE_QUANT_ATTRS)?;

        let min = attrs.get_float("min")?.unwrap_or(-6.);
        let max = attrs.get_float("max")?.unwrap_or(6.);
        if min.partial_cmp(&max) != Some(Ordering::Less) {
            return Err(InferError::inconsistent(format!(
                "min ({}) must be less than max ({})",
                min, max
            )));
        }
        Ok(())
    }

    fn infer_shapes(
        &self,
        inputs: &[TensorDesc],
        _attrs: &Attrs,
    ) -> Result<Vec<TensorDesc>, InferError> {
        check_input_count(inputs, Cardinality::Exactly(1))?;
        check_dtype(0, &inputs[0], DataType::is_float, "a float type")?;
        Ok([inputs[0].clone().without_const_value()].into())
    }
}

#[cfg(test)]
mod tests {
    use opshape_testing::TestCases;

    use super::{Cast, FakeQuantWithMinMaxArgs, UnaryOp};
    use crate::attrs::Attrs;
    use crate::dtype::DataType;
    use crate::errors::{ErrorKind, InferError};
    use crate::infer_shapes::{run_rule, InferShapes};
    use crate::shape::DimRange;
    use crate::tensor_desc::TensorDesc;

    #[test]
    fn test_unary_op() {
        let input = TensorDesc::from_i64s(&[-1, 16], DataType::Float16)
            .unwrap()
            .with_value_range(vec![DimRange::new(1, 4), DimRange::fixed(16)])
            .unwrap();

        let outputs = UnaryOp::new()
            .infer_shapes(&[input.clone()], &Attrs::new())
            .unwrap();
        assert_eq!(outputs, [input.clone()]);

        let outputs = UnaryOp::float_only()
            .infer_shapes(&[input.clone()], &Attrs::new())
            .unwrap();
        assert_eq!(outputs, [input]);

        let int_input = TensorDesc::from_dims(&[3], DataType::Int32);
        let err = UnaryOp::float_only()
            .infer_shapes(&[int_input], &Attrs::new())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::DTypeMismatch);

        let err = UnaryOp::new()
            .infer_shapes(&[], &Attrs::new())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::IncorrectInputCount);
    }

    #[test]
    fn test_identity_keeps_value() {
        let input = TensorDesc::from_const_vec(vec![4, 5], DataType::Int32);

        let outputs = UnaryOp::identity()
            .infer_shapes(&[input.clone()], &Attrs::new())
            .unwrap();
        assert_eq!(outputs[0].const_value(), Some([4, 5].as_slice()));

        let outputs = UnaryOp::new()
            .infer_shapes(&[input], &Attrs::new())
            .unwrap();
        assert_eq!(outputs[0].const_value(), None);
    }

    #[test]
    fn test_cast() {
        #[derive(Debug)]
        struct Case {
            input: TensorDesc,
            dst_type: &'static str,
            expected: Result<(DataType, bool), ErrorKind>,
        }

        let cases = [
            Case {
                input: TensorDesc::from_const_vec(vec![1, 2], DataType::Int32),
                dst_type: "int64",
                expected: Ok((DataType::Int64, true)),
            },
            Case {
                input: TensorDesc::from_const_vec(vec![1, 2], DataType::Int32),
                dst_type: "float16",
                expected: Ok((DataType::Float16, false)),
            },
            Case {
                input: TensorDesc::from_dims(&[2], DataType::Float32),
                dst_type: "complex128",
                expected: Err(ErrorKind::OutOfDomain),
            },
        ];

        cases.test_each(|case| {
            let attrs = Attrs::new().with("dst_type", case.dst_type);
            let result = run_rule(&Cast, &[case.input.clone()], &attrs)
                .map(|outputs| (outputs[0].dtype(), outputs[0].const_value().is_some()))
                .map_err(|e| e.kind());
            assert_eq!(result, case.expected);
        });

        let err = run_rule(
            &Cast,
            &[TensorDesc::from_dims(&[2], DataType::Float32)],
            &Attrs::new(),
        )
        .err()
        .unwrap();
        assert_eq!(err.kind(), ErrorKind::MissingAttribute);
    }

    #[test]
    fn test_fake_quant_attrs() {
        #[derive(Debug)]
        struct Case {
            attrs: Attrs,
            expected: Option<ErrorKind>,
        }

        let cases = [
            Case {
                attrs: Attrs::new(),
                expected: None,
            },
            Case {
                attrs: Attrs::new()
                    .with("min", -1.0f32)
                    .with("max", 1.0f32)
                    .with("num_bits", 4i64)
                    .with("narrow_range", true),
                expected: None,
            },
            Case {
                attrs: Attrs::new().with("num_bits", "8"),
                expected: Some(ErrorKind::AttributeTypeMismatch),
            },
            Case {
                attrs: Attrs::new().with("num_bits", 1i64),
                expected: Some(ErrorKind::OutOfDomain),
            },
            Case {
                attrs: Attrs::new().with("min", 2.0f32).with("max", 2.0f32),
                expected: Some(ErrorKind::InconsistentAttributes),
            },
            Case {
                attrs: Attrs::new().with("min", 10.0f32),
                expected: Some(ErrorKind::InconsistentAttributes),
            },
        ];

        cases.test_each(|case| {
            let input = TensorDesc::from_dims(&[2, 3], DataType::Float32);
            let result = run_rule(&FakeQuantWithMinMaxArgs, &[input.clone()], &case.attrs);
            match case.expected {
                None => assert_eq!(result, Ok(vec![input])),
                Some(kind) => assert_eq!(result.err().map(|e| e.kind()), Some(kind)),
            }
        });
    }

    #[test]
    fn test_fake_quant_num_bits_type() {
        let input = TensorDesc::from_dims(&[8], DataType::Float32);
        let attrs = Attrs::new().with("num_bits", "eight");
        let err = run_rule(&FakeQuantWithMinMaxArgs, &[input], &attrs)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            InferError::AttributeTypeMismatch { ref name, .. } if name == "num_bits"
        ));
    }
}
