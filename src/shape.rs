//! Dimensions, value ranges and shapes.

use std::fmt;

use smallvec::SmallVec;

use crate::errors::InferError;

/// Size of a single dimension.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Dim {
    /// Dimension with a size known at compile time.
    Fixed(usize),
    /// Dimension whose size is only known at runtime.
    Unknown,
}

impl Dim {
    /// Return the size of this dimension if it is known.
    pub fn fixed(self) -> Option<usize> {
        match self {
            Self::Fixed(size) => Some(size),
            Self::Unknown => None,
        }
    }

    pub fn is_known(self) -> bool {
        matches!(self, Self::Fixed(_))
    }
}

impl From<usize> for Dim {
    fn from(size: usize) -> Self {
        Self::Fixed(size)
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(size) => write!(f, "{}", size),
            Self::Unknown => write!(f, "?"),
        }
    }
}

/// Inclusive bounds `[min, max]` on the size of a dimension.
///
/// `max` is `None` if the dimension is unbounded above.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DimRange {
    pub min: usize,
    pub max: Option<usize>,
}

impl DimRange {
    /// Range which admits any size.
    pub const ANY: DimRange = DimRange { min: 0, max: None };

    /// Create a bounded range.
    pub const fn new(min: usize, max: usize) -> Self {
        DimRange {
            min,
            max: Some(max),
        }
    }

    /// Create a range which is unbounded above.
    pub const fn unbounded(min: usize) -> Self {
        DimRange { min, max: None }
    }

    /// Create a range containing a single value.
    pub const fn fixed(value: usize) -> Self {
        Self::new(value, value)
    }

    /// Return true if `min <= max`.
    pub fn is_valid(&self) -> bool {
        self.max.map_or(true, |max| self.min <= max)
    }

    pub fn is_bounded(&self) -> bool {
        self.max.is_some()
    }

    /// Return the single value in this range, if `min == max`.
    pub fn fixed_value(&self) -> Option<usize> {
        match self.max {
            Some(max) if max == self.min => Some(max),
            _ => None,
        }
    }

    pub fn contains(&self, value: usize) -> bool {
        value >= self.min && self.max.map_or(true, |max| value <= max)
    }

    /// Return the smallest range that contains both `self` and `other`.
    pub fn hull(&self, other: &DimRange) -> DimRange {
        DimRange {
            min: self.min.min(other.min),
            max: match (self.max, other.max) {
                (Some(a), Some(b)) => Some(a.max(b)),
                _ => None,
            },
        }
    }

    /// Return the values contained in both `self` and `other`, or `None` if
    /// the ranges are disjoint.
    pub fn intersect(&self, other: &DimRange) -> Option<DimRange> {
        let min = self.min.max(other.min);
        let max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) | (None, Some(a)) => Some(a),
            (None, None) => None,
        };
        let range = DimRange { min, max };
        range.is_valid().then_some(range)
    }

    /// Return the range of `x + y` for `x` in `self` and `y` in `other`.
    ///
    /// An upper bound that overflows becomes unbounded.
    pub fn add(&self, other: &DimRange) -> DimRange {
        DimRange {
            min: self.min.saturating_add(other.min),
            max: match (self.max, other.max) {
                (Some(a), Some(b)) => a.checked_add(b),
                _ => None,
            },
        }
    }

    /// Return the range of `x * y` for `x` in `self` and `y` in `other`.
    ///
    /// An upper bound that overflows becomes unbounded.
    pub fn mul(&self, other: &DimRange) -> DimRange {
        DimRange {
            min: self.min.saturating_mul(other.min),
            max: match (self.max, other.max) {
                (Some(a), Some(b)) => a.checked_mul(b),
                (Some(0), None) | (None, Some(0)) => Some(0),
                _ => None,
            },
        }
    }

    /// Apply a non-decreasing function to both endpoints.
    pub fn map_monotonic(&self, f: impl Fn(usize) -> usize) -> DimRange {
        DimRange {
            min: f(self.min),
            max: self.max.map(f),
        }
    }
}

impl fmt::Display for DimRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "({}, {})", self.min, max),
            None => write!(f, "({}, inf)", self.min),
        }
    }
}

/// A dimension together with the range of sizes it may take.
///
/// This is the unit that shape arithmetic operates on, so that a formula is
/// applied to a dimension and its bounds in one place. For fixed dimensions
/// the range contains only the fixed size.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RangedDim {
    pub dim: Dim,
    pub range: DimRange,
}

impl RangedDim {
    pub fn fixed(size: usize) -> Self {
        RangedDim {
            dim: Dim::Fixed(size),
            range: DimRange::fixed(size),
        }
    }

    /// Create an unknown dimension with no bounds.
    pub fn unknown() -> Self {
        Self::dynamic(DimRange::ANY)
    }

    /// Create an unknown dimension with the given bounds.
    pub fn dynamic(range: DimRange) -> Self {
        RangedDim {
            dim: Dim::Unknown,
            range,
        }
    }

    pub fn is_one(&self) -> bool {
        self.dim == Dim::Fixed(1)
    }
}

impl From<usize> for RangedDim {
    fn from(size: usize) -> Self {
        Self::fixed(size)
    }
}

/// Dimensions of a ranked tensor, with their ranges.
pub type RangedShape = SmallVec<[RangedDim; 5]>;

/// Format a list of dimensions as `[2, ?, 3]` for error messages.
pub(crate) fn fmt_dims(dims: &[RangedDim]) -> String {
    let dims: Vec<String> = dims.iter().map(|d| d.dim.to_string()).collect();
    format!("[{}]", dims.join(", "))
}

/// Shape of a tensor.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Shape {
    /// Shape with a known number of dimensions.
    Ranked(SmallVec<[Dim; 5]>),
    /// Shape whose rank is unknown.
    Unranked,
}

impl Shape {
    pub fn new(dims: impl IntoIterator<Item = Dim>) -> Self {
        Self::Ranked(dims.into_iter().collect())
    }

    /// Create a shape where every dimension is known.
    pub fn fixed(dims: &[usize]) -> Self {
        Self::new(dims.iter().map(|&size| Dim::Fixed(size)))
    }

    /// Create a rank-0 shape.
    pub fn scalar() -> Self {
        Self::Ranked(SmallVec::new())
    }

    /// Create a shape from the integer convention used by many model formats,
    /// where `-1` is an unknown dimension and `[-2]` is an unknown rank.
    pub fn from_i64s(dims: &[i64]) -> Result<Self, InferError> {
        if dims == [-2] {
            return Ok(Self::Unranked);
        }
        let dims = dims
            .iter()
            .map(|&size| match size {
                -1 => Ok(Dim::Unknown),
                size if size >= 0 => Ok(Dim::Fixed(size as usize)),
                size => Err(InferError::out_of_domain(
                    "shape",
                    format!("dimension size {} is negative", size),
                )),
            })
            .collect::<Result<SmallVec<_>, _>>()?;
        Ok(Self::Ranked(dims))
    }

    /// Convert this shape to the `-1` / `[-2]` integer convention.
    pub fn to_i64s(&self) -> Vec<i64> {
        match self {
            Self::Ranked(dims) => dims
                .iter()
                .map(|dim| match dim {
                    Dim::Fixed(size) => *size as i64,
                    Dim::Unknown => -1,
                })
                .collect(),
            Self::Unranked => vec![-2],
        }
    }

    /// Return the number of dimensions, if known.
    pub fn rank(&self) -> Option<usize> {
        self.dims().map(|dims| dims.len())
    }

    /// Return the dimensions, or `None` if the rank is unknown.
    pub fn dims(&self) -> Option<&[Dim]> {
        match self {
            Self::Ranked(dims) => Some(dims),
            Self::Unranked => None,
        }
    }

    /// Return true if the rank and every dimension are known.
    pub fn is_fully_known(&self) -> bool {
        self.dims()
            .is_some_and(|dims| dims.iter().all(|dim| dim.is_known()))
    }

    /// Return the number of elements, if every dimension is known.
    pub fn num_elements(&self) -> Option<usize> {
        self.dims()?
            .iter()
            .try_fold(1usize, |acc, dim| acc.checked_mul(dim.fixed()?))
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ranked(dims) => {
                write!(f, "[")?;
                for (i, dim) in dims.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", dim)?;
                }
                write!(f, "]")
            }
            Self::Unranked => write!(f, "[unranked]"),
        }
    }
}
