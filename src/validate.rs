//! Declarative attribute schemas and checks shared by operator rules.
//!
//! Rules describe their attributes with a list of [`AttrSpec`]s. These are
//! checked by [`validate_attrs`] before any shape arithmetic runs, so a
//! malformed node is rejected with a validation error regardless of its
//! inputs.

use crate::attrs::{AttrType, AttrValue, Attrs};
use crate::dtype::{DataType, Format};
use crate::errors::{Cardinality, InferError};
use crate::tensor_desc::TensorDesc;

/// Set of values an attribute may take.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Domain {
    /// Numbers greater than zero. For lists, applies to every element.
    Positive,
    /// Numbers greater than or equal to zero.
    NonNegative,
    /// Integers in an inclusive range.
    Range(i64, i64),
    /// One of a fixed set of strings.
    OneOf(&'static [&'static str]),
}

impl Domain {
    fn check_int(&self, name: &str, value: i64) -> Result<(), InferError> {
        let ok = match *self {
            Self::Positive => value > 0,
            Self::NonNegative => value >= 0,
            Self::Range(lo, hi) => value >= lo && value <= hi,
            Self::OneOf(_) => true,
        };
        if ok {
            Ok(())
        } else {
            Err(InferError::out_of_domain(
                name,
                format!("{} is not {}", value, self),
            ))
        }
    }

    fn check_float(&self, name: &str, value: f32) -> Result<(), InferError> {
        let ok = match *self {
            Self::Positive => value > 0.,
            Self::NonNegative => value >= 0.,
            Self::Range(lo, hi) => value >= lo as f32 && value <= hi as f32,
            Self::OneOf(_) => true,
        };
        if ok {
            Ok(())
        } else {
            Err(InferError::out_of_domain(
                name,
                format!("{} is not {}", value, self),
            ))
        }
    }

    fn check_str(&self, name: &str, value: &str) -> Result<(), InferError> {
        match self {
            Self::OneOf(options) if !options.iter().any(|o| *o == value) => Err(
                InferError::out_of_domain(name, format!("\"{}\" is not {}", value, self)),
            ),
            _ => Ok(()),
        }
    }

    fn check(&self, name: &str, value: &AttrValue) -> Result<(), InferError> {
        match value {
            AttrValue::Int(v) => self.check_int(name, *v),
            AttrValue::Ints(vs) => vs.iter().try_for_each(|v| self.check_int(name, *v)),
            AttrValue::Float(v) => self.check_float(name, *v),
            AttrValue::Floats(vs) => vs.iter().try_for_each(|v| self.check_float(name, *v)),
            AttrValue::String(v) => self.check_str(name, v),
            AttrValue::Strings(vs) => vs.iter().try_for_each(|v| self.check_str(name, v)),
            AttrValue::Bool(_) | AttrValue::Bools(_) => Ok(()),
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Positive => write!(f, "positive"),
            Self::NonNegative => write!(f, "non-negative"),
            Self::Range(lo, hi) => write!(f, "in [{}, {}]", lo, hi),
            Self::OneOf(options) => write!(f, "one of {:?}", options),
        }
    }
}

/// Schema for a single operator attribute.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AttrSpec {
    pub name: &'static str,
    pub attr_type: AttrType,
    pub required: bool,

    /// Permitted list lengths. Only meaningful for list types.
    pub len: Option<Cardinality>,

    pub domain: Option<Domain>,
}

impl AttrSpec {
    pub const fn required(name: &'static str, attr_type: AttrType) -> Self {
        AttrSpec {
            name,
            attr_type,
            required: true,
            len: None,
            domain: None,
        }
    }

    pub const fn optional(name: &'static str, attr_type: AttrType) -> Self {
        AttrSpec {
            required: false,
            ..Self::required(name, attr_type)
        }
    }

    pub const fn with_len(self, len: Cardinality) -> Self {
        AttrSpec {
            len: Some(len),
            ..self
        }
    }

    pub const fn with_domain(self, domain: Domain) -> Self {
        AttrSpec {
            domain: Some(domain),
            ..self
        }
    }
}

/// Check `attrs` against a list of schemas.
///
/// Checks run in phases: presence of required attributes, then type tags,
/// then list lengths, then value domains. The first failure is returned.
/// Attributes not named in `specs` are ignored.
pub fn validate_attrs(attrs: &Attrs, specs: &[AttrSpec]) -> Result<(), InferError> {
    for spec in specs {
        if spec.required && !attrs.contains(spec.name) {
            return Err(InferError::missing(spec.name));
        }
    }

    let present: Vec<(&AttrSpec, &AttrValue)> = specs
        .iter()
        .filter_map(|spec| attrs.get(spec.name).map(|value| (spec, value)))
        .collect();

    for (spec, value) in &present {
        if value.attr_type() != spec.attr_type {
            return Err(InferError::AttributeTypeMismatch {
                name: spec.name.to_string(),
                expected: spec.attr_type,
                actual: value.attr_type(),
            });
        }
    }

    for (spec, value) in &present {
        if let (Some(len), Some(actual)) = (spec.len, value.list_len()) {
            check_list_len(spec.name, actual, len)?;
        }
    }

    for (spec, value) in &present {
        if let Some(domain) = &spec.domain {
            domain.check(spec.name, value)?;
        }
    }

    Ok(())
}

/// Check the length of a list attribute.
pub fn check_list_len(name: &str, actual: usize, expected: Cardinality) -> Result<(), InferError> {
    if expected.accepts(actual) {
        Ok(())
    } else {
        Err(InferError::WrongListLength {
            name: name.to_string(),
            expected,
            actual,
        })
    }
}

/// Read a layout attribute, using `default` if it is absent.
pub fn format_attr(attrs: &Attrs, name: &str, default: Format) -> Result<Format, InferError> {
    match attrs.get_str(name)? {
        Some(value) => value.parse::<Format>().map_err(|_| {
            InferError::out_of_domain(name, format!("unrecognized format \"{}\"", value))
        }),
        None => Ok(default),
    }
}

/// Check that a layout is supported by an operator and matches the rank of
/// the tensor it describes.
pub fn check_format(format: Format, allowed: &[Format], rank: usize) -> Result<(), InferError> {
    if !allowed.contains(&format) {
        let allowed: Vec<&str> = allowed.iter().map(|f| f.name()).collect();
        return Err(InferError::inconsistent(format!(
            "data_format {} is not supported, expected one of {:?}",
            format, allowed
        )));
    }
    if let Some(format_rank) = format.rank() {
        if format_rank != rank {
            return Err(InferError::inconsistent(format!(
                "data_format {} requires rank {}, input has rank {}",
                format, format_rank, rank
            )));
        }
    }
    Ok(())
}

/// Check the rank of input `index`.
///
/// Returns the rank, or `None` if it is unknown, in which case the check
/// passes.
pub fn check_rank(
    index: usize,
    input: &TensorDesc,
    expected: Cardinality,
) -> Result<Option<usize>, InferError> {
    match input.rank() {
        Some(rank) if !expected.accepts(rank) => Err(InferError::RankMismatch {
            input: index,
            expected,
            actual: rank,
        }),
        rank => Ok(rank),
    }
}

/// Check the number of inputs passed to an operator.
pub fn check_input_count(inputs: &[TensorDesc], expected: Cardinality) -> Result<(), InferError> {
    if expected.accepts(inputs.len()) {
        Ok(())
    } else {
        Err(InferError::IncorrectInputCount {
            expected,
            actual: inputs.len(),
        })
    }
}

/// Check the element type of input `index` against a predicate.
///
/// `expected` describes the accepted types in error messages.
pub fn check_dtype(
    index: usize,
    input: &TensorDesc,
    accepts: impl Fn(DataType) -> bool,
    expected: &str,
) -> Result<(), InferError> {
    if accepts(input.dtype()) {
        Ok(())
    } else {
        Err(InferError::dtype_mismatch(index, expected, input.dtype()))
    }
}

#[cfg(test)]
mod tests {
    use opshape_testing::TestCases;

    use super::{
        check_format, check_input_count, check_rank, format_attr, validate_attrs, AttrSpec, Domain,
    };
    use crate::attrs::{AttrType, Attrs};
    use crate::dtype::{DataType, Format};
    use crate::errors::{Cardinality, ErrorKind};
    use crate::tensor_desc::TensorDesc;

    const FAKE_QUANT_ATTRS: &[AttrSpec] = &[
        AttrSpec::optional("min", AttrType::Float),
        AttrSpec::optional("max", AttrType::Float),
        AttrSpec::optional("num_bits", AttrType::Int).with_domain(Domain::Range(2, 16)),
        AttrSpec::optional("narrow_range", AttrType::Bool),
    ];

    const POOL_ATTRS: &[AttrSpec] = &[
        AttrSpec::required("ksize", AttrType::Ints)
            .with_len(Cardinality::OneOf(&[4, 5]))
            .with_domain(Domain::Positive),
        AttrSpec::required("padding", AttrType::String)
            .with_domain(Domain::OneOf(&["SAME", "VALID", "CALCULATED"])),
    ];

    #[test]
    fn test_validate_attrs() {
        #[derive(Debug)]
        struct Case {
            attrs: Attrs,
            specs: &'static [AttrSpec],
            expected: Option<ErrorKind>,
        }

        let cases = [
            Case {
                attrs: Attrs::new(),
                specs: FAKE_QUANT_ATTRS,
                expected: None,
            },
            Case {
                attrs: Attrs::new().with("num_bits", "8"),
                specs: FAKE_QUANT_ATTRS,
                expected: Some(ErrorKind::AttributeTypeMismatch),
            },
            Case {
                attrs: Attrs::new().with("num_bits", 17i64),
                specs: FAKE_QUANT_ATTRS,
                expected: Some(ErrorKind::OutOfDomain),
            },
            Case {
                attrs: Attrs::new().with("padding", "SAME"),
                specs: POOL_ATTRS,
                expected: Some(ErrorKind::MissingAttribute),
            },
            Case {
                attrs: Attrs::new()
                    .with("ksize", [1i64, 3, 3])
                    .with("padding", "SAME"),
                specs: POOL_ATTRS,
                expected: Some(ErrorKind::WrongListLength),
            },
            Case {
                attrs: Attrs::new()
                    .with("ksize", [1i64, 0, 3, 1])
                    .with("padding", "SAME"),
                specs: POOL_ATTRS,
                expected: Some(ErrorKind::OutOfDomain),
            },
            Case {
                attrs: Attrs::new()
                    .with("ksize", [1i64, 3, 3, 1])
                    .with("padding", "EXPLICIT"),
                specs: POOL_ATTRS,
                expected: Some(ErrorKind::OutOfDomain),
            },
            // Type tags are checked for every attribute before list lengths.
            Case {
                attrs: Attrs::new().with("ksize", [1i64, 3]).with("padding", 1i64),
                specs: POOL_ATTRS,
                expected: Some(ErrorKind::AttributeTypeMismatch),
            },
        ];

        cases.test_each(|case| {
            let result = validate_attrs(&case.attrs, case.specs);
            assert_eq!(result.err().map(|e| e.kind()), case.expected);
        });
    }

    #[test]
    fn test_check_format() {
        let allowed = [Format::NCHW, Format::NHWC];
        assert!(check_format(Format::NHWC, &allowed, 4).is_ok());

        let err = check_format(Format::NCDHW, &allowed, 5).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InconsistentAttributes);

        let err = check_format(Format::NCHW, &allowed, 3).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InconsistentAttributes);

        let attrs = Attrs::new().with("data_format", "NWHC");
        let err = format_attr(&attrs, "data_format", Format::NHWC)
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::OutOfDomain);
        assert_eq!(
            format_attr(&Attrs::new(), "data_format", Format::NHWC).unwrap(),
            Format::NHWC
        );
    }

    #[test]
    fn test_check_rank_and_inputs() {
        let input = TensorDesc::from_dims(&[1, 2, 3, 4, 5], DataType::Float32);
        let err = check_rank(0, &input, Cardinality::Exactly(4)).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::RankMismatch);
        assert_eq!(
            check_rank(0, &input, Cardinality::AtLeast(2)).unwrap(),
            Some(5)
        );

        let unranked = TensorDesc::unranked(DataType::Float32);
        assert_eq!(
            check_rank(0, &unranked, Cardinality::Exactly(4)).unwrap(),
            None
        );

        let err = check_input_count(&[input], Cardinality::Exactly(2))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::IncorrectInputCount);
    }
}
