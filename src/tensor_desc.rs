use std::fmt;

use crate::dtype::{DataType, Format};
use crate::errors::InferError;
use crate::shape::{Dim, DimRange, RangedDim, RangedShape, Shape};

/// Compile-time description of a tensor.
///
/// Descriptors are immutable values. Operator rules read the descriptors of
/// their inputs and produce fresh descriptors for their outputs.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TensorDesc {
    shape: Shape,
    dtype: DataType,
    format: Format,

    /// Bounds on each dimension's runtime size.
    ///
    /// Present only in dynamic mode. Has one entry per dimension.
    value_range: Option<Vec<DimRange>>,

    /// Contents of a small integer tensor whose values are known at compile
    /// time, in row-major order.
    const_value: Option<Vec<i64>>,
}

impl TensorDesc {
    pub fn new(shape: Shape, dtype: DataType) -> Self {
        TensorDesc {
            shape,
            dtype,
            format: Format::ND,
            value_range: None,
            const_value: None,
        }
    }

    /// Create a descriptor with every dimension known.
    pub fn from_dims(dims: &[usize], dtype: DataType) -> Self {
        Self::new(Shape::fixed(dims), dtype)
    }

    /// Create a descriptor from a shape using the `-1` / `[-2]` convention.
    ///
    /// See [`Shape::from_i64s`].
    pub fn from_i64s(dims: &[i64], dtype: DataType) -> Result<Self, InferError> {
        Ok(Self::new(Shape::from_i64s(dims)?, dtype))
    }

    /// Create a descriptor whose rank is unknown.
    pub fn unranked(dtype: DataType) -> Self {
        Self::new(Shape::Unranked, dtype)
    }

    /// Create a rank-0 descriptor for a constant integer.
    pub fn from_const_scalar(value: i64, dtype: DataType) -> Self {
        TensorDesc {
            const_value: Some(vec![value]),
            ..Self::new(Shape::scalar(), dtype)
        }
    }

    /// Create a rank-1 descriptor for a constant integer vector.
    pub fn from_const_vec(values: Vec<i64>, dtype: DataType) -> Self {
        TensorDesc {
            shape: Shape::fixed(&[values.len()]),
            const_value: Some(values),
            ..Self::new(Shape::scalar(), dtype)
        }
    }

    /// Create a descriptor from dimensions computed by shape arithmetic.
    ///
    /// If `with_ranges` is true the descriptor carries a value range for
    /// every dimension.
    pub fn from_ranged_dims(dims: &[RangedDim], dtype: DataType, with_ranges: bool) -> Self {
        let shape = Shape::new(dims.iter().map(|d| d.dim));
        let value_range = with_ranges.then(|| {
            dims.iter()
                .map(|d| match d.dim {
                    Dim::Fixed(size) => DimRange::fixed(size),
                    Dim::Unknown => d.range,
                })
                .collect()
        });
        TensorDesc {
            value_range,
            ..Self::new(shape, dtype)
        }
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn with_dtype(mut self, dtype: DataType) -> Self {
        self.dtype = dtype;
        self
    }

    /// Discard the compile-time value, keeping only the metadata.
    pub fn without_const_value(mut self) -> Self {
        self.const_value = None;
        self
    }

    /// Attach a compile-time value.
    ///
    /// Fails with [`InferError::InvalidDescriptor`] if the number of values
    /// does not match the shape.
    pub fn with_const_value(mut self, values: Vec<i64>) -> Result<Self, InferError> {
        self.const_value = Some(values);
        self.check()?;
        Ok(self)
    }

    /// Attach per-dimension value ranges.
    ///
    /// Fails with [`InferError::InvalidDescriptor`] if the ranges do not
    /// match the shape.
    pub fn with_value_range(mut self, ranges: Vec<DimRange>) -> Result<Self, InferError> {
        self.value_range = Some(ranges);
        self.check()?;
        Ok(self)
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn value_range(&self) -> Option<&[DimRange]> {
        self.value_range.as_deref()
    }

    pub fn const_value(&self) -> Option<&[i64]> {
        self.const_value.as_deref()
    }

    /// Return the value of a constant with a single element.
    pub fn const_scalar(&self) -> Option<i64> {
        match self.const_value() {
            Some(&[value]) => Some(value),
            _ => None,
        }
    }

    pub fn rank(&self) -> Option<usize> {
        self.shape.rank()
    }

    pub fn dims(&self) -> Option<&[Dim]> {
        self.shape.dims()
    }

    /// Return true if this descriptor is in dynamic mode, ie. carries value
    /// ranges.
    pub fn has_value_range(&self) -> bool {
        self.value_range.is_some()
    }

    /// Return the effective range of dimension `index`.
    ///
    /// This is `(d, d)` for a fixed dimension. For an unknown dimension it is
    /// the explicit range if present or `(0, inf)` otherwise.
    pub fn ranged_dim(&self, index: usize) -> Option<RangedDim> {
        let dim = *self.dims()?.get(index)?;
        let range = match (dim, &self.value_range) {
            (Dim::Fixed(size), _) => DimRange::fixed(size),
            (Dim::Unknown, Some(ranges)) => ranges.get(index).copied().unwrap_or(DimRange::ANY),
            (Dim::Unknown, None) => DimRange::ANY,
        };
        Some(RangedDim { dim, range })
    }

    /// Return every dimension with its effective range, or `None` if the rank
    /// is unknown.
    pub fn ranged_dims(&self) -> Option<RangedShape> {
        let rank = self.rank()?;
        (0..rank).map(|i| self.ranged_dim(i)).collect()
    }

    /// Verify the descriptor's invariants.
    pub fn check(&self) -> Result<(), InferError> {
        if let Some(ranges) = &self.value_range {
            let Some(dims) = self.dims() else {
                return Err(InferError::InvalidDescriptor(
                    "value range given for a tensor of unknown rank".to_string(),
                ));
            };
            if ranges.len() != dims.len() {
                return Err(InferError::InvalidDescriptor(format!(
                    "{} value ranges given for a tensor of rank {}",
                    ranges.len(),
                    dims.len()
                )));
            }
            for (i, (dim, range)) in dims.iter().zip(ranges).enumerate() {
                if !range.is_valid() {
                    return Err(InferError::InvalidDescriptor(format!(
                        "range {} of dim {} has min > max",
                        range, i
                    )));
                }
                if let Dim::Fixed(size) = dim {
                    if !range.contains(*size) {
                        return Err(InferError::InvalidDescriptor(format!(
                            "range {} of dim {} does not contain its size {}",
                            range, i, size
                        )));
                    }
                }
            }
        }

        if let Some(values) = &self.const_value {
            if self.shape.num_elements() != Some(values.len()) {
                return Err(InferError::InvalidDescriptor(format!(
                    "constant has {} values but shape {}",
                    values.len(),
                    self.shape
                )));
            }
        }

        Ok(())
    }
}

impl fmt::Display for TensorDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.dtype, self.shape)?;
        if self.format != Format::ND {
            write!(f, " {}", self.format)?;
        }
        if let Some(ranges) = &self.value_range {
            let ranges: Vec<String> = ranges.iter().map(|r| r.to_string()).collect();
            write!(f, " range [{}]", ranges.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::TensorDesc;
    use crate::dtype::{DataType, Format};
    use crate::errors::ErrorKind;
    use crate::shape::{Dim, DimRange, RangedDim, Shape};

    #[test]
    fn test_ranged_dims() {
        let desc = TensorDesc::from_i64s(&[-1, 8], DataType::Float32).unwrap();
        assert_eq!(
            desc.ranged_dims().unwrap().as_slice(),
            [RangedDim::unknown(), RangedDim::fixed(8)]
        );
        assert!(!desc.has_value_range());

        let desc = desc
            .with_value_range(vec![DimRange::new(15, 16), DimRange::fixed(8)])
            .unwrap();
        assert_eq!(
            desc.ranged_dim(0),
            Some(RangedDim::dynamic(DimRange::new(15, 16)))
        );
        assert_eq!(desc.ranged_dim(2), None);

        assert_eq!(TensorDesc::unranked(DataType::Int32).ranged_dims(), None);
    }

    #[test]
    fn test_value_range_invariants() {
        let desc = TensorDesc::from_i64s(&[-1, 8], DataType::Float32).unwrap();

        let err = desc
            .clone()
            .with_value_range(vec![DimRange::ANY])
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidDescriptor);

        let err = desc
            .clone()
            .with_value_range(vec![DimRange::new(4, 2), DimRange::fixed(8)])
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidDescriptor);

        let err = desc
            .with_value_range(vec![DimRange::ANY, DimRange::new(1, 4)])
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidDescriptor);

        let err = TensorDesc::unranked(DataType::Float32)
            .with_value_range(vec![])
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidDescriptor);
    }

    #[test]
    fn test_with_const_value() {
        let desc = TensorDesc::from_dims(&[2, 2], DataType::Int64)
            .with_const_value(vec![1, 2, 3, 4])
            .unwrap();
        assert_eq!(desc.const_value(), Some([1, 2, 3, 4].as_slice()));

        let err = TensorDesc::from_dims(&[2, 2], DataType::Int64)
            .with_const_value(vec![1, 2])
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidDescriptor);
    }

    #[test]
    fn test_from_ranged_dims() {
        let dims = [
            RangedDim::dynamic(DimRange::new(3, 32)),
            RangedDim::fixed(6),
        ];
        let desc = TensorDesc::from_ranged_dims(&dims, DataType::Int64, true);
        assert_eq!(desc.dims().unwrap(), [Dim::Unknown, Dim::Fixed(6)]);
        assert_eq!(
            desc.value_range().unwrap(),
            [DimRange::new(3, 32), DimRange::fixed(6)]
        );
        assert!(desc.check().is_ok());

        let desc = TensorDesc::from_ranged_dims(&dims, DataType::Int64, false);
        assert_eq!(desc.value_range(), None);
    }

    #[test]
    fn test_const_values() {
        let scalar = TensorDesc::from_const_scalar(-1, DataType::Int32);
        assert_eq!(scalar.shape(), &Shape::scalar());
        assert_eq!(scalar.const_scalar(), Some(-1));

        let vec = TensorDesc::from_const_vec(vec![0, 2, 1], DataType::Int64);
        assert_eq!(vec.shape(), &Shape::fixed(&[3]));
        assert_eq!(vec.const_value(), Some([0, 2, 1].as_slice()));
        assert_eq!(vec.const_scalar(), None);
        assert!(vec.check().is_ok());
    }

    #[test]
    fn test_display() {
        let desc = TensorDesc::from_i64s(&[-1, 8, 375], DataType::Float32)
            .unwrap()
            .with_format(Format::NCHW);
        assert_eq!(desc.to_string(), "float32 [?, 8, 375] NCHW");

        let desc = TensorDesc::from_dims(&[2], DataType::Int8)
            .with_value_range(vec![DimRange::fixed(2)])
            .unwrap();
        assert_eq!(desc.to_string(), "int8 [2] range [(2, 2)]");
    }
}
