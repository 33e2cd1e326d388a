//! Error types reported by shape inference.

use std::fmt;

use crate::attrs::AttrType;
use crate::dtype::DataType;

/// Expected number of items: inputs, list elements or dimensions.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Cardinality {
    Exactly(usize),
    AtLeast(usize),
    /// Inclusive range.
    Between(usize, usize),
    OneOf(&'static [usize]),
}

impl Cardinality {
    /// Return true if `n` items satisfy this requirement.
    pub fn accepts(&self, n: usize) -> bool {
        match *self {
            Self::Exactly(expected) => n == expected,
            Self::AtLeast(min) => n >= min,
            Self::Between(min, max) => n >= min && n <= max,
            Self::OneOf(options) => options.contains(&n),
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exactly(n) => write!(f, "{}", n),
            Self::AtLeast(n) => write!(f, "at least {}", n),
            Self::Between(min, max) => write!(f, "between {} and {}", min, max),
            Self::OneOf(options) => write!(f, "one of {:?}", options),
        }
    }
}

/// Errors that occur when validating or inferring a single operator.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum InferError {
    /// Too many or too few inputs were provided for this operator.
    #[error("expected {expected} inputs, got {actual}")]
    IncorrectInputCount {
        expected: Cardinality,
        actual: usize,
    },

    /// A required attribute is absent.
    #[error("missing required attribute \"{name}\"")]
    MissingAttribute { name: String },

    /// An attribute is stored with a different type than the operator
    /// expects.
    #[error("attribute \"{name}\" has type {actual}, expected {expected}")]
    AttributeTypeMismatch {
        name: String,
        expected: AttrType,
        actual: AttrType,
    },

    /// A list attribute has the wrong number of elements.
    #[error("attribute \"{name}\" has {actual} elements, expected {expected}")]
    WrongListLength {
        name: String,
        expected: Cardinality,
        actual: usize,
    },

    /// An attribute or input value is outside the set of permitted values.
    #[error("invalid value for \"{name}\": {reason}")]
    OutOfDomain { name: String, reason: String },

    /// Attributes are individually valid but contradict each other or the
    /// inputs.
    #[error("inconsistent attributes: {0}")]
    InconsistentAttributes(String),

    /// The input shapes are incompatible.
    ///
    /// Operator execution will fail if given inputs with these shapes.
    #[error("incompatible shapes: {0}")]
    IncompatibleShapes(String),

    /// An input's rank does not match that expected by the operator.
    #[error("input {input} has rank {actual}, expected {expected}")]
    RankMismatch {
        input: usize,
        expected: Cardinality,
        actual: usize,
    },

    /// An input has an element type the operator does not accept.
    #[error("input {input} has type {actual}, expected {expected}")]
    DTypeMismatch {
        input: usize,
        expected: String,
        actual: DataType,
    },

    /// A tensor descriptor violates its own invariants.
    #[error("invalid tensor descriptor: {0}")]
    InvalidDescriptor(String),

    /// No rule is registered for an operator kind.
    #[error("no shape inference rule for operator \"{0}\"")]
    UnknownOperator(String),

    /// A rule is already registered for an operator kind.
    #[error("operator \"{0}\" is already registered")]
    DuplicateRegistration(String),

    /// Registration was attempted after inference started.
    #[error("cannot register \"{0}\" after the registry has been sealed")]
    RegistrySealed(String),
}

impl InferError {
    pub(crate) fn missing(name: &str) -> Self {
        Self::MissingAttribute {
            name: name.to_string(),
        }
    }

    pub(crate) fn out_of_domain(name: &str, reason: impl Into<String>) -> Self {
        Self::OutOfDomain {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn incompatible(msg: impl Into<String>) -> Self {
        Self::IncompatibleShapes(msg.into())
    }

    pub(crate) fn inconsistent(msg: impl Into<String>) -> Self {
        Self::InconsistentAttributes(msg.into())
    }

    pub(crate) fn dtype_mismatch(input: usize, expected: impl Into<String>, actual: DataType) -> Self {
        Self::DTypeMismatch {
            input,
            expected: expected.into(),
            actual,
        }
    }

    /// Return the general category of error.
    pub fn kind(&self) -> ErrorKind {
        type Kind = ErrorKind;

        match self {
            Self::IncorrectInputCount { .. } => Kind::IncorrectInputCount,
            Self::MissingAttribute { .. } => Kind::MissingAttribute,
            Self::AttributeTypeMismatch { .. } => Kind::AttributeTypeMismatch,
            Self::WrongListLength { .. } => Kind::WrongListLength,
            Self::OutOfDomain { .. } => Kind::OutOfDomain,
            Self::InconsistentAttributes(_) => Kind::InconsistentAttributes,
            Self::IncompatibleShapes(_) => Kind::IncompatibleShapes,
            Self::RankMismatch { .. } => Kind::RankMismatch,
            Self::DTypeMismatch { .. } => Kind::DTypeMismatch,
            Self::InvalidDescriptor(_) => Kind::InvalidDescriptor,
            Self::UnknownOperator(_) => Kind::UnknownOperator,
            Self::DuplicateRegistration(_) => Kind::DuplicateRegistration,
            Self::RegistrySealed(_) => Kind::RegistrySealed,
        }
    }
}

/// The category of an inference error.
///
/// See [`InferError::kind`] and [`GraphError::kind`](crate::GraphError::kind).
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    MissingAttribute,
    AttributeTypeMismatch,
    WrongListLength,
    OutOfDomain,
    InconsistentAttributes,
    IncompatibleShapes,
    RankMismatch,
    IncorrectInputCount,
    DTypeMismatch,
    InvalidDescriptor,
    UnknownOperator,
    DuplicateRegistration,
    RegistrySealed,
    CyclicGraph,
    InvalidEdge,
}

impl ErrorKind {
    /// Return true for errors detected by attribute validation, before any
    /// shape arithmetic runs.
    pub fn is_validation(self) -> bool {
        matches!(
            self,
            Self::MissingAttribute
                | Self::AttributeTypeMismatch
                | Self::WrongListLength
                | Self::OutOfDomain
                | Self::InconsistentAttributes
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{Cardinality, ErrorKind, InferError};
    use crate::attrs::AttrType;
    use crate::dtype::DataType;

    #[test]
    fn test_cardinality() {
        assert!(Cardinality::Exactly(4).accepts(4));
        assert!(!Cardinality::Exactly(4).accepts(5));
        assert!(Cardinality::AtLeast(2).accepts(7));
        assert!(!Cardinality::AtLeast(2).accepts(1));
        assert!(Cardinality::Between(2, 3).accepts(3));
        assert!(!Cardinality::Between(2, 3).accepts(4));
        assert!(Cardinality::OneOf(&[3, 5]).accepts(5));
        assert!(!Cardinality::OneOf(&[3, 5]).accepts(4));

        assert_eq!(Cardinality::AtLeast(2).to_string(), "at least 2");
        assert_eq!(Cardinality::OneOf(&[3, 5]).to_string(), "one of [3, 5]");
    }

    #[test]
    fn test_error_display() {
        let err = InferError::AttributeTypeMismatch {
            name: "num_bits".to_string(),
            expected: AttrType::Int,
            actual: AttrType::String,
        };
        assert_eq!(
            err.to_string(),
            "attribute \"num_bits\" has type string, expected int"
        );
        assert_eq!(err.kind(), ErrorKind::AttributeTypeMismatch);
        assert!(err.kind().is_validation());

        let err = InferError::RankMismatch {
            input: 0,
            expected: Cardinality::Exactly(4),
            actual: 5,
        };
        assert_eq!(err.to_string(), "input 0 has rank 5, expected 4");
        assert!(!err.kind().is_validation());

        let err = InferError::dtype_mismatch(1, "an integer type", DataType::Float32);
        assert_eq!(
            err.to_string(),
            "input 1 has type float32, expected an integer type"
        );
    }
}
