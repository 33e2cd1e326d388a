//! Shape arithmetic shared by operator rules.
//!
//! Functions here operate on [`RangedDim`]s, so each formula is applied to a
//! dimension's size and to the endpoints of its value range together.

use smallvec::SmallVec;

use crate::errors::{Cardinality, InferError};
use crate::shape::{fmt_dims, Dim, DimRange, RangedDim, RangedShape};

/// Broadcast two dimensions following NumPy rules.
///
/// Sizes form the order `1 < ? < k` for any fixed `k != 1`, and the result
/// is the larger of the two. An unknown dimension broadcast against a fixed
/// size `k` must equal `k` at runtime, so it resolves to `k` unless it carries
/// a bounded range. In that case the dimension stays unknown and its range is
/// widened to include `k`.
pub fn broadcast_dims(a: &RangedDim, b: &RangedDim) -> Result<RangedDim, InferError> {
    match (a.dim, b.dim) {
        (Dim::Fixed(x), Dim::Fixed(y)) if x == y => Ok(*a),

        // A 1-sized dim is broadcast against the other side without
        // affecting its range.
        (Dim::Fixed(1), _) => Ok(*b),
        (_, Dim::Fixed(1)) => Ok(*a),

        (Dim::Fixed(x), Dim::Fixed(y)) => Err(InferError::incompatible(format!(
            "dimensions {} and {} cannot be broadcast",
            x, y
        ))),

        (Dim::Unknown, Dim::Fixed(k)) => broadcast_unknown(&a.range, k),
        (Dim::Fixed(k), Dim::Unknown) => broadcast_unknown(&b.range, k),

        (Dim::Unknown, Dim::Unknown) => Ok(RangedDim::dynamic(a.range.hull(&b.range))),
    }
}

fn broadcast_unknown(range: &DimRange, size: usize) -> Result<RangedDim, InferError> {
    if !range.contains(size) && !range.contains(1) {
        return Err(InferError::incompatible(format!(
            "dimension with range {} cannot be broadcast to {}",
            range, size
        )));
    }
    if range.is_bounded() {
        Ok(RangedDim::dynamic(range.hull(&DimRange::fixed(size))))
    } else {
        Ok(RangedDim::fixed(size))
    }
}

/// Broadcast two shapes following NumPy rules.
///
/// The shorter shape is left-padded with 1s. See [`broadcast_dims`].
pub fn broadcast_shapes(a: &[RangedDim], b: &[RangedDim]) -> Result<RangedShape, InferError> {
    let ndim = a.len().max(b.len());
    let a_pad = ndim - a.len();
    let b_pad = ndim - b.len();

    let one = RangedDim::fixed(1);
    let a_iter = std::iter::repeat_n(&one, a_pad).chain(a);
    let b_iter = std::iter::repeat_n(&one, b_pad).chain(b);

    a_iter
        .zip(b_iter)
        .map(|(a_dim, b_dim)| {
            broadcast_dims(a_dim, b_dim).map_err(|_| {
                InferError::incompatible(format!(
                    "cannot broadcast {} and {}",
                    fmt_dims(a),
                    fmt_dims(b)
                ))
            })
        })
        .collect()
}

/// Broadcast any number of shapes together.
///
/// Returns a rank-0 shape if `shapes` is empty.
pub fn broadcast_all<'a>(
    shapes: impl IntoIterator<Item = &'a [RangedDim]>,
) -> Result<RangedShape, InferError> {
    shapes
        .into_iter()
        .try_fold(RangedShape::new(), |acc, shape| broadcast_shapes(&acc, shape))
}

/// Sliding window parameters for one spatial axis of a convolution or
/// pooling operator.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Window {
    pub kernel: usize,
    pub stride: usize,
    pub dilation: usize,
    pub pad_before: usize,
    pub pad_after: usize,

    /// Round the output size up instead of down. The last window must still
    /// start inside the input or leading padding.
    pub ceil_mode: bool,
}

impl Window {
    pub fn new(kernel: usize, stride: usize) -> Self {
        Window {
            kernel,
            stride,
            dilation: 1,
            pad_before: 0,
            pad_after: 0,
            ceil_mode: false,
        }
    }

    pub fn with_dilation(self, dilation: usize) -> Self {
        Window { dilation, ..self }
    }

    pub fn with_padding(self, pad_before: usize, pad_after: usize) -> Self {
        Window {
            pad_before,
            pad_after,
            ..self
        }
    }

    pub fn with_ceil_mode(self, ceil_mode: bool) -> Self {
        Window { ceil_mode, ..self }
    }

    /// Return the kernel size with dilation applied.
    pub fn effective_kernel(&self) -> usize {
        self.dilation * (self.kernel - 1) + 1
    }

    fn check(&self) -> Result<(), InferError> {
        for (name, value) in [
            ("kernel", self.kernel),
            ("stride", self.stride),
            ("dilation", self.dilation),
        ] {
            if value == 0 {
                return Err(InferError::out_of_domain(name, "must be positive"));
            }
        }
        Ok(())
    }

    /// Smallest input size for which the window fits in the padded input.
    fn min_input(&self) -> usize {
        self.effective_kernel()
            .saturating_sub(self.pad_before + self.pad_after)
    }
}

/// Compute the output size of a sliding window over an input of known size.
pub fn conv_output_size(input: usize, window: &Window) -> Result<usize, InferError> {
    window.check()?;

    let padded = input + window.pad_before + window.pad_after;
    let kernel = window.effective_kernel();
    if padded < kernel {
        return Err(InferError::incompatible(format!(
            "window of size {} does not fit in padded input of size {}",
            kernel, padded
        )));
    }

    let span = padded - kernel;
    let stride = window.stride;
    let mut out = if window.ceil_mode {
        span.div_ceil(stride) + 1
    } else {
        span / stride + 1
    };
    if window.ceil_mode && (out - 1) * stride >= input + window.pad_before {
        out -= 1;
    }
    Ok(out)
}

/// Compute the output size of a sliding window over a dimension.
///
/// For unknown dimensions the formula is applied to both endpoints of the
/// range. Inputs smaller than the window are excluded from the range, and
/// it is an error if that leaves no valid input sizes.
pub fn conv_output_dim(dim: &RangedDim, window: &Window) -> Result<RangedDim, InferError> {
    match dim.dim {
        Dim::Fixed(size) => conv_output_size(size, window).map(RangedDim::fixed),
        Dim::Unknown => {
            window.check()?;
            let min_input = window.min_input();
            if let Some(max) = dim.range.max {
                if max < min_input {
                    return Err(InferError::incompatible(format!(
                        "window of size {} does not fit in input with range {}",
                        window.effective_kernel(),
                        dim.range
                    )));
                }
            }
            let min = conv_output_size(dim.range.min.max(min_input), window)?;
            let max = dim
                .range
                .max
                .map(|max| conv_output_size(max, window))
                .transpose()?;
            Ok(RangedDim::dynamic(DimRange { min, max }))
        }
    }
}

/// Compute `(pad_before, pad_after)` for SAME padding.
///
/// The total padding is `(ceil(in / stride) - 1) * stride + dilation *
/// (kernel - 1) + 1 - in`, clamped at zero. When it is odd the extra unit goes
/// at the end.
pub fn same_padding(
    input: usize,
    kernel: usize,
    stride: usize,
    dilation: usize,
) -> Result<(usize, usize), InferError> {
    let window = Window::new(kernel, stride).with_dilation(dilation);
    window.check()?;
    if input == 0 {
        return Err(InferError::out_of_domain(
            "input",
            "SAME padding requires a non-empty input",
        ));
    }

    let out = input.div_ceil(stride);
    let needed = (out - 1) * stride + window.effective_kernel();
    let total = needed.saturating_sub(input);
    let before = total / 2;
    Ok((before, total - before))
}

/// Compute the output size of a window with SAME padding, `ceil(in /
/// stride)`.
pub fn same_output_dim(dim: &RangedDim, stride: usize) -> Result<RangedDim, InferError> {
    if stride == 0 {
        return Err(InferError::out_of_domain("stride", "must be positive"));
    }
    Ok(match dim.dim {
        Dim::Fixed(size) => RangedDim::fixed(size.div_ceil(stride)),
        Dim::Unknown => RangedDim::dynamic(dim.range.map_monotonic(|v| v.div_ceil(stride))),
    })
}

/// Resolve an index given as a value in `[-len, len-1]` to a positive index in
/// `[0, len)`, or return None if the index is out of bounds.
fn resolve_index(len: usize, index: i64) -> Option<usize> {
    let len = len.min(i64::MAX as usize) as i64;
    if index < -len || index >= len {
        return None;
    }

    if index >= 0 {
        Some(index as usize)
    } else {
        Some((len + index) as usize)
    }
}

/// Resolve an axis given as a value in `[-ndim, ndim-1]` to the zero-based
/// dimension of a tensor with `ndim` dimensions.
///
/// `name` identifies the attribute or input in errors.
pub fn resolve_axis(ndim: usize, axis: i64, name: &str) -> Result<usize, InferError> {
    resolve_index(ndim, axis).ok_or_else(|| {
        InferError::out_of_domain(
            name,
            format!("axis {} is out of range for rank {}", axis, ndim),
        )
    })
}

/// Resolve a list of axes, then sort and de-duplicate them.
pub fn resolve_axes(
    ndim: usize,
    axes: &[i64],
    name: &str,
) -> Result<SmallVec<[usize; 4]>, InferError> {
    let mut resolved = axes
        .iter()
        .map(|&axis| resolve_axis(ndim, axis, name))
        .collect::<Result<SmallVec<[usize; 4]>, _>>()?;
    resolved.sort();
    resolved.dedup();
    Ok(resolved)
}

/// Compute the shape after reducing over `axes`.
///
/// Reduced axes are kept as 1-sized dims if `keep_dims` is true and removed
/// otherwise. An empty list of axes leaves the shape unchanged.
pub fn reduce_shape(
    shape: &[RangedDim],
    axes: &[i64],
    keep_dims: bool,
) -> Result<RangedShape, InferError> {
    let axes = resolve_axes(shape.len(), axes, "axes")?;
    let mut out_shape = RangedShape::with_capacity(shape.len());
    for (i, dim) in shape.iter().enumerate() {
        if !axes.contains(&i) {
            out_shape.push(*dim);
        } else if keep_dims {
            out_shape.push(RangedDim::fixed(1));
        }
    }
    Ok(out_shape)
}

/// Resolve and check the `batch_dims` argument of a gather.
///
/// `batch_dims` must be in `[-rank, rank)` of the indices. Zero is always
/// accepted so that scalar indices can be gathered.
fn resolve_batch_dims(indices_ndim: usize, batch_dims: i64) -> Result<usize, InferError> {
    let ndim = indices_ndim as i64;
    let resolved = if batch_dims < 0 {
        batch_dims + ndim
    } else {
        batch_dims
    };
    if resolved != 0 && (resolved < 0 || resolved >= ndim) {
        return Err(InferError::out_of_domain(
            "batch_dims",
            format!(
                "{} is out of range for indices of rank {}",
                batch_dims, indices_ndim
            ),
        ));
    }
    Ok(resolved as usize)
}

/// Combine two dims which must have the same runtime size.
///
/// Returns `None` if the sizes or ranges show that they cannot be equal.
pub fn unify_dims(a: &RangedDim, b: &RangedDim) -> Option<RangedDim> {
    match (a.dim, b.dim) {
        (Dim::Fixed(x), Dim::Fixed(y)) => (x == y).then_some(*a),
        (Dim::Fixed(x), Dim::Unknown) => b.range.contains(x).then_some(*a),
        (Dim::Unknown, Dim::Fixed(y)) => a.range.contains(y).then_some(*b),
        (Dim::Unknown, Dim::Unknown) => a.range.intersect(&b.range).map(RangedDim::dynamic),
    }
}

/// Compute the shape of a concatenation along `axis`.
///
/// All shapes must have the same rank and agree on every other axis.
pub fn concat_shapes(shapes: &[&[RangedDim]], axis: i64) -> Result<RangedShape, InferError> {
    let [first, rest @ ..] = shapes else {
        return Err(InferError::IncorrectInputCount {
            expected: Cardinality::AtLeast(1),
            actual: 0,
        });
    };
    let axis = resolve_axis(first.len(), axis, "axis")?;

    let mut out_shape: RangedShape = first.iter().copied().collect();
    for (i, shape) in rest.iter().enumerate() {
        if shape.len() != first.len() {
            return Err(InferError::RankMismatch {
                input: i + 1,
                expected: Cardinality::Exactly(first.len()),
                actual: shape.len(),
            });
        }
        for (d, (out_dim, dim)) in out_shape.iter_mut().zip(shape.iter()).enumerate() {
            *out_dim = if d == axis {
                match (out_dim.dim, dim.dim) {
                    (Dim::Fixed(a), Dim::Fixed(b)) => RangedDim::fixed(a + b),
                    _ => RangedDim::dynamic(out_dim.range.add(&dim.range)),
                }
            } else {
                unify_dims(out_dim, dim).ok_or_else(|| {
                    InferError::incompatible(format!(
                        "cannot concatenate {} and {} along axis {}",
                        fmt_dims(first),
                        fmt_dims(shape),
                        axis
                    ))
                })?
            };
        }
    }
    Ok(out_shape)
}

/// Unify the leading `batch_dims` dims of gather params and indices.
fn gather_batch_dims(
    params: &[RangedDim],
    indices: &[RangedDim],
    batch_dims: usize,
) -> Result<RangedShape, InferError> {
    params[..batch_dims]
        .iter()
        .zip(&indices[..batch_dims])
        .map(|(p, i)| {
            unify_dims(p, i).ok_or_else(|| {
                InferError::incompatible(format!(
                    "batch dims of params {} and indices {} do not match",
                    fmt_dims(params),
                    fmt_dims(indices)
                ))
            })
        })
        .collect()
}

/// Compute the output shape of a gather along `axis`.
///
/// The output is `params[..axis] ++ indices[batch_dims..] ++
/// params[axis + 1..]`. The leading `batch_dims` dimensions of params and
/// indices must match.
pub fn gather_shape(
    params: &[RangedDim],
    indices: &[RangedDim],
    axis: i64,
    batch_dims: i64,
) -> Result<RangedShape, InferError> {
    let axis = resolve_axis(params.len(), axis, "axis")?;
    let batch_dims = resolve_batch_dims(indices.len(), batch_dims)?;
    if batch_dims > axis {
        return Err(InferError::inconsistent(format!(
            "batch_dims {} must not exceed axis {}",
            batch_dims, axis
        )));
    }

    let mut out_shape = RangedShape::with_capacity(params.len() - 1 + indices.len() - batch_dims);
    out_shape.extend(gather_batch_dims(params, indices, batch_dims)?);
    out_shape.extend_from_slice(&params[batch_dims..axis]);
    out_shape.extend_from_slice(&indices[batch_dims..]);
    out_shape.extend_from_slice(&params[axis + 1..]);
    Ok(out_shape)
}

/// Compute the output shape of a gather whose axis is not known at compile
/// time.
///
/// The rank is the same as for [`gather_shape`]. The leading batch dims are
/// unified as in [`gather_shape`]; every other dim is unknown with a range covering every dim of
/// `params` and `indices`.
pub fn gather_shape_unknown_axis(
    params: &[RangedDim],
    indices: &[RangedDim],
    batch_dims: i64,
) -> Result<RangedShape, InferError> {
    let batch_dims = resolve_batch_dims(indices.len(), batch_dims)?;
    if params.len() <= batch_dims {
        return Err(InferError::inconsistent(format!(
            "params of rank {} cannot be gathered with batch_dims {}",
            params.len(),
            batch_dims
        )));
    }

    let out_ndim = params.len() - 1 + indices.len() - batch_dims;
    let range = params
        .iter()
        .chain(indices)
        .map(|d| d.range)
        .reduce(|acc, r| acc.hull(&r))
        .unwrap_or(DimRange::ANY);

    let mut out_shape = RangedShape::with_capacity(out_ndim);
    out_shape.extend(gather_batch_dims(params, indices, batch_dims)?);
    out_shape.resize(out_ndim, RangedDim::dynamic(range));
    Ok(out_shape)
}

/// Compute the output shape of a tile.
///
/// The input is left-padded with 1s to the length of `multiples`.
pub fn tile_shape(shape: &[RangedDim], multiples: &[i64]) -> Result<RangedShape, InferError> {
    if multiples.len() < shape.len() {
        return Err(InferError::WrongListLength {
            name: "multiples".to_string(),
            expected: Cardinality::AtLeast(shape.len()),
            actual: multiples.len(),
        });
    }
    if let Some(m) = multiples.iter().find(|&&m| m < 0) {
        return Err(InferError::out_of_domain(
            "multiples",
            format!("multiple {} is negative", m),
        ));
    }

    let pad = multiples.len() - shape.len();
    let one = RangedDim::fixed(1);
    std::iter::repeat_n(&one, pad)
        .chain(shape)
        .zip(multiples)
        .map(|(dim, &m)| {
            let m = m as usize;
            match dim.dim {
                Dim::Fixed(size) => size.checked_mul(m).map(RangedDim::fixed).ok_or_else(|| {
                    InferError::out_of_domain("multiples", "tiled size overflows")
                }),
                Dim::Unknown => Ok(RangedDim::dynamic(dim.range.mul(&DimRange::fixed(m)))),
            }
        })
        .collect()
}

/// Permute the dimensions of a shape.
///
/// `perm` must contain each axis of the shape exactly once. Negative entries
/// count back from the last axis.
pub fn permute_shape(shape: &[RangedDim], perm: &[i64]) -> Result<RangedShape, InferError> {
    if perm.len() != shape.len() {
        return Err(InferError::WrongListLength {
            name: "perm".to_string(),
            expected: Cardinality::Exactly(shape.len()),
            actual: perm.len(),
        });
    }

    let mut seen: SmallVec<[bool; 5]> = SmallVec::from_elem(false, shape.len());
    perm.iter()
        .map(|&axis| {
            let axis = resolve_axis(shape.len(), axis, "perm")?;
            if std::mem::replace(&mut seen[axis], true) {
                return Err(InferError::out_of_domain(
                    "perm",
                    format!("axis {} appears more than once", axis),
                ));
            }
            Ok(shape[axis])
        })
        .collect()
}
