use smallvec::{smallvec, SmallVec};

use crate::attrs::{AttrType, Attrs};
use crate::dtype::DataType;
use crate::errors::{Cardinality, InferError};
use crate::infer_shapes::{is_dynamic, output_desc, InferShapes};
use crate::ops::{
    const_ints, dim_in_range, same_dtype, single_int, unranked_output, IntsOperand,
};
use crate::shape::{DimRange, RangedDim, RangedShape};
use crate::shape_expr::{
    broadcast_shapes, concat_shapes, gather_shape, gather_shape_unknown_axis, permute_shape,
    resolve_axes, resolve_axis, tile_shape,
};
use crate::tensor_desc::TensorDesc;
use crate::validate::{check_dtype, check_input_count, check_rank, validate_attrs, AttrSpec, Domain};

/// Return the smallest range containing every dim of a shape.
fn hull_range(dims: &[RangedDim]) -> DimRange {
    dims.iter()
        .map(|d| d.range)
        .reduce(|acc, r| acc.hull(&r))
        .unwrap_or(DimRange::ANY)
}

fn unknown_dims(ndim: usize) -> RangedShape {
    smallvec![RangedDim::unknown(); ndim]
}

/// Keep the value of a constant input whose elements are only rearranged.
fn keep_const(output: TensorDesc, input: &TensorDesc) -> Result<TensorDesc, InferError> {
    match input.const_value() {
        Some(values) if output.shape().is_fully_known() => output.with_const_value(values.to_vec()),
        _ => Ok(output),
    }
}

const GATHER_ATTRS: &[AttrSpec] = &[
    AttrSpec::optional("axis", AttrType::Int),
    AttrSpec::optional("batch_dims", AttrType::Int),
];

/// Gather operators `GatherV2` and `Gather`.
///
/// `GatherV2` takes the axis as a third input, which must be an integer
/// scalar. If its value is not known at compile time the output rank is
/// still known, and the output carries value ranges covering every dim of
/// the inputs. `Gather` takes the axis from the `axis` attribute, which
/// defaults to 0.
///
/// Gathering from a constant vector with constant indices produces a
/// constant.
#[derive(Copy, Clone, Debug)]
pub struct Gather {
    axis_input: bool,
}

impl Gather {
    pub fn v2() -> Self {
        Gather { axis_input: true }
    }

    pub fn with_axis_attr() -> Self {
        Gather { axis_input: false }
    }

    fn axis(&self, inputs: &[TensorDesc], attrs: &Attrs) -> Result<Option<i64>, InferError> {
        if self.axis_input {
            const_ints(inputs, 2)?
                .map(|values| single_int(values, "axis"))
                .transpose()
        } else {
            Ok(Some(attrs.get_int("axis")?.unwrap_or(0)))
        }
    }
}

/// Evaluate a gather from a constant vector.
///
/// Returns `None` if the inputs are not constants or an index is out of
/// bounds.
fn gather_const(params: &TensorDesc, indices: &TensorDesc) -> Option<Vec<i64>> {
    if params.rank() != Some(1) {
        return None;
    }
    let values = params.const_value()?;
    let len = values.len() as i64;
    indices
        .const_value()?
        .iter()
        .map(|&index| {
            let index = if index < 0 { index + len } else { index };
            usize::try_from(index)
                .ok()
                .and_then(|index| values.get(index).copied())
        })
        .collect()
}

impl InferShapes for Gather {
    fn validate(&self, attrs: &Attrs) -> Result<(), InferError> {
        validate_attrs(attrs, GATHER_ATTRS)
    }

    fn infer_shapes(
        &self,
        inputs: &[TensorDesc],
        attrs: &Attrs,
    ) -> Result<Vec<TensorDesc>, InferError> {
        let count = if self.axis_input { 3 } else { 2 };
        check_input_count(inputs, Cardinality::Exactly(count))?;
        let (params, indices) = (&inputs[0], &inputs[1]);
        check_dtype(1, indices, DataType::is_index, "int32 or int64")?;

        let axis = self.axis(inputs, attrs)?;
        let batch_dims = attrs.get_int("batch_dims")?.unwrap_or(0);

        let (Some(params_dims), Some(indices_dims)) = (params.ranged_dims(), indices.ranged_dims())
        else {
            return Ok(unranked_output(params.dtype()));
        };

        let Some(axis) = axis else {
            let dims = gather_shape_unknown_axis(&params_dims, &indices_dims, batch_dims)?;
            return Ok([TensorDesc::from_ranged_dims(&dims, params.dtype(), true)].into());
        };

        let dims = gather_shape(&params_dims, &indices_dims, axis, batch_dims)?;
        let output = output_desc(&dims, params.dtype(), inputs);
        let output = match gather_const(params, indices) {
            Some(values) => output.with_const_value(values)?,
            None => output,
        };
        Ok([output].into())
    }
}

const TILE_D_ATTRS: &[AttrSpec] = &[AttrSpec::required("multiples", AttrType::Ints)];

/// Tile operators `Tile` and `TileD`.
///
/// `Tile` takes the multiples as a second input and `TileD` as the
/// `multiples` attribute. If the multiples are not known at compile time but
/// their count is, the output rank is known and every dim is unknown.
#[derive(Copy, Clone, Debug)]
pub struct Tile {
    multiples: IntsOperand,
}

impl Tile {
    pub fn from_input() -> Self {
        Tile {
            multiples: IntsOperand::Input(1),
        }
    }

    pub fn from_attr() -> Self {
        Tile {
            multiples: IntsOperand::Attr("multiples"),
        }
    }
}

impl InferShapes for Tile {
    fn validate(&self, attrs: &Attrs) -> Result<(), InferError> {
        match self.multiples {
            IntsOperand::Attr(_) => validate_attrs(attrs, TILE_D_ATTRS),
            IntsOperand::Input(_) => Ok(()),
        }
    }

    fn infer_shapes(
        &self,
        inputs: &[TensorDesc],
        attrs: &Attrs,
    ) -> Result<Vec<TensorDesc>, InferError> {
        check_input_count(inputs, Cardinality::Exactly(self.multiples.input_count(1)))?;
        let input = &inputs[0];
        let multiples = self.multiples.values(inputs, attrs)?;

        let dims = match (input.ranged_dims(), multiples) {
            (Some(dims), Some(multiples)) => tile_shape(&dims, multiples)?,
            (dims, _) => {
                let Some(len) = self.multiples.known_len(inputs, attrs) else {
                    return Ok(unranked_output(input.dtype()));
                };
                if let Some(dims) = dims {
                    if len < dims.len() {
                        return Err(InferError::WrongListLength {
                            name: "multiples".to_string(),
                            expected: Cardinality::AtLeast(dims.len()),
                            actual: len,
                        });
                    }
                }
                unknown_dims(len)
            }
        };
        Ok([output_desc(&dims, input.dtype(), inputs)].into())
    }
}

const TRANSPOSE_D_ATTRS: &[AttrSpec] = &[AttrSpec::required("perm", AttrType::Ints)];

/// Transpose operators `Transpose` and `TransposeD`.
///
/// `Transpose` takes the permutation as a second input and `TransposeD` as
/// the `perm` attribute. If the permutation is not known at compile time,
/// each output dim may be any input dim, so it is unknown with a range
/// covering all of them.
#[derive(Copy, Clone, Debug)]
pub struct Transpose {
    perm: IntsOperand,
}

impl Transpose {
    pub fn from_input() -> Self {
        Transpose {
            perm: IntsOperand::Input(1),
        }
    }

    pub fn from_attr() -> Self {
        Transpose {
            perm: IntsOperand::Attr("perm"),
        }
    }
}

impl InferShapes for Transpose {
    fn validate(&self, attrs: &Attrs) -> Result<(), InferError> {
        match self.perm {
            IntsOperand::Attr(_) => validate_attrs(attrs, TRANSPOSE_D_ATTRS),
            IntsOperand::Input(_) => Ok(()),
        }
    }

    fn infer_shapes(
        &self,
        inputs: &[TensorDesc],
        attrs: &Attrs,
    ) -> Result<Vec<TensorDesc>, InferError> {
        check_input_count(inputs, Cardinality::Exactly(self.perm.input_count(1)))?;
        let input = &inputs[0];
        let dtype = input.dtype();
        let perm = self.perm.values(inputs, attrs)?;

        let output = match (input.ranged_dims(), perm) {
            (Some(dims), Some(perm)) => output_desc(&permute_shape(&dims, perm)?, dtype, inputs),
            (Some(dims), None) => {
                if let Some(len) = self.perm.known_len(inputs, attrs) {
                    if len != dims.len() {
                        return Err(InferError::WrongListLength {
                            name: "perm".to_string(),
                            expected: Cardinality::Exactly(dims.len()),
                            actual: len,
                        });
                    }
                }
                let dim = dim_in_range(hull_range(&dims));
                let dims: RangedShape = smallvec![dim; dims.len()];
                TensorDesc::from_ranged_dims(&dims, dtype, true)
            }
            (None, _) => match self.perm.known_len(inputs, attrs) {
                Some(len) => output_desc(&unknown_dims(len), dtype, inputs),
                None => TensorDesc::unranked(dtype),
            },
        };
        Ok([output].into())
    }
}

/// Expand operator.
///
/// Broadcasts the input to the shape given by the second input. If the
/// target shape is not known at compile time but its length is, the output
/// rank is known. Input dims larger than 1 keep their size in that case.
pub struct Expand;

impl InferShapes for Expand {
    fn infer_shapes(
        &self,
        inputs: &[TensorDesc],
        attrs: &Attrs,
    ) -> Result<Vec<TensorDesc>, InferError> {
        check_input_count(inputs, Cardinality::Exactly(2))?;
        let input = &inputs[0];
        let shape = IntsOperand::Input(1);
        let target = shape.values(inputs, attrs)?;

        let Some(dims) = input.ranged_dims() else {
            return Ok(unranked_output(input.dtype()));
        };

        let out_dims = if let Some(target) = target {
            let target = target
                .iter()
                .map(|&size| {
                    usize::try_from(size).map(RangedDim::fixed).map_err(|_| {
                        InferError::out_of_domain("shape", format!("{} is not a valid size", size))
                    })
                })
                .collect::<Result<RangedShape, _>>()?;
            broadcast_shapes(&dims, &target)?
        } else if let Some(len) = shape.known_len(inputs, attrs) {
            let out_ndim = len.max(dims.len());
            let pad = out_ndim - dims.len();
            std::iter::repeat_n(RangedDim::unknown(), pad)
                .chain(dims.iter().map(|dim| match dim.dim.fixed() {
                    Some(size) if size > 1 => *dim,
                    _ => RangedDim::unknown(),
                }))
                .collect()
        } else {
            return Ok(unranked_output(input.dtype()));
        };

        Ok([output_desc(&out_dims, input.dtype(), inputs)].into())
    }
}

const RESHAPE_ATTRS: &[AttrSpec] =
    &[AttrSpec::optional("allowzero", AttrType::Int).with_domain(Domain::Range(0, 1))];

/// Reshape operator.
///
/// The target shape is the second input. A 0 entry copies the input dim at
/// the same index unless `allowzero` is set, and a single -1 entry is
/// inferred from the element count. If the target is not known at compile
/// time but its length is, the output rank is known.
///
/// Reshaping a constant keeps its values.
pub struct Reshape;

/// Compute the output dims of a reshape with a known target.
fn reshape_dims(
    input: Option<&[RangedDim]>,
    target: &[i64],
    allow_zero: bool,
) -> Result<RangedShape, InferError> {
    let mut infer_index = None;
    let mut dims = RangedShape::with_capacity(target.len());
    for (i, &size) in target.iter().enumerate() {
        let dim = match size {
            -1 => {
                if infer_index.replace(i).is_some() {
                    return Err(InferError::out_of_domain(
                        "shape",
                        "more than one dim is -1",
                    ));
                }
                RangedDim::unknown()
            }
            0 if !allow_zero => match input {
                Some(input) => *input.get(i).ok_or_else(|| {
                    InferError::out_of_domain(
                        "shape",
                        format!("0 at index {} has no matching input dim", i),
                    )
                })?,
                None => RangedDim::unknown(),
            },
            size => usize::try_from(size).map(RangedDim::fixed).map_err(|_| {
                InferError::out_of_domain("shape", format!("{} is not a valid size", size))
            })?,
        };
        dims.push(dim);
    }

    if allow_zero && infer_index.is_some() && target.contains(&0) {
        return Err(InferError::out_of_domain(
            "shape",
            "-1 cannot be combined with 0 when allowzero is set",
        ));
    }

    let Some(input) = input else {
        return Ok(dims);
    };

    let input_elems = input
        .iter()
        .fold(DimRange::fixed(1), |acc, d| acc.mul(&d.range));
    let known_product = dims
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != infer_index)
        .try_fold(1usize, |acc, (_, d)| acc.checked_mul(d.dim.fixed()?));

    let mismatch = || {
        InferError::incompatible(format!(
            "cannot reshape {} elements into {:?}",
            match input_elems.fixed_value() {
                Some(n) => n.to_string(),
                None => input_elems.to_string(),
            },
            target
        ))
    };

    match (infer_index, known_product, input_elems.fixed_value()) {
        (Some(index), Some(product), Some(total)) => {
            if product == 0 || total % product != 0 {
                return Err(mismatch());
            }
            dims[index] = RangedDim::fixed(total / product);
        }
        (Some(index), Some(product), None) if product > 0 => {
            let range = DimRange {
                min: input_elems.min.div_ceil(product),
                max: input_elems.max.map(|max| max / product),
            };
            if !range.is_valid() {
                return Err(mismatch());
            }
            dims[index] = RangedDim::dynamic(range);
        }
        (None, Some(product), _) if !input_elems.contains(product) => {
            return Err(mismatch());
        }
        _ => {}
    }
    Ok(dims)
}

impl InferShapes for Reshape {
    fn validate(&self, attrs: &Attrs) -> Result<(), InferError> {
        validate_attrs(attrs, RESHAPE_ATTRS)
    }

    fn infer_shapes(
        &self,
        inputs: &[TensorDesc],
        attrs: &Attrs,
    ) -> Result<Vec<TensorDesc>, InferError> {
        check_input_count(inputs, Cardinality::Exactly(2))?;
        let input = &inputs[0];
        let shape = IntsOperand::Input(1);
        let allow_zero = attrs.get_int("allowzero")?.unwrap_or(0) != 0;

        let Some(target) = shape.values(inputs, attrs)? else {
            return Ok(match shape.known_len(inputs, attrs) {
                Some(len) => [output_desc(&unknown_dims(len), input.dtype(), inputs)].into(),
                None => unranked_output(input.dtype()),
            });
        };

        let input_dims = input.ranged_dims();
        let dims = reshape_dims(input_dims.as_deref(), target, allow_zero)?;
        let output = keep_const(output_desc(&dims, input.dtype(), inputs), input)?;
        Ok([output].into())
    }
}

const CONCAT_D_ATTRS: &[AttrSpec] = &[
    AttrSpec::required("concat_dim", AttrType::Int),
    AttrSpec::optional("N", AttrType::Int).with_domain(Domain::Positive),
];

const CONCAT_V2_ATTRS: &[AttrSpec] =
    &[AttrSpec::optional("N", AttrType::Int).with_domain(Domain::Positive)];

/// Concatenation operators `ConcatD` and `ConcatV2`.
///
/// `ConcatD` takes the axis from the `concat_dim` attribute and `ConcatV2`
/// from its last input. If the optional `N` attribute is present it must
/// equal the number of tensors being joined. Joining constant vectors
/// produces a constant.
#[derive(Copy, Clone, Debug)]
pub struct Concat {
    axis_input: bool,
}

impl Concat {
    pub fn with_axis_attr() -> Self {
        Concat { axis_input: false }
    }

    pub fn v2() -> Self {
        Concat { axis_input: true }
    }
}

impl InferShapes for Concat {
    fn validate(&self, attrs: &Attrs) -> Result<(), InferError> {
        if self.axis_input {
            validate_attrs(attrs, CONCAT_V2_ATTRS)
        } else {
            validate_attrs(attrs, CONCAT_D_ATTRS)
        }
    }

    fn infer_shapes(
        &self,
        inputs: &[TensorDesc],
        attrs: &Attrs,
    ) -> Result<Vec<TensorDesc>, InferError> {
        let min_inputs = if self.axis_input { 2 } else { 1 };
        check_input_count(inputs, Cardinality::AtLeast(min_inputs))?;

        let (values, axis) = if self.axis_input {
            let axis_index = inputs.len() - 1;
            let axis = const_ints(inputs, axis_index)?
                .map(|values| single_int(values, "axis"))
                .transpose()?;
            (&inputs[..axis_index], axis)
        } else {
            (inputs, Some(attrs.require_int("concat_dim")?))
        };

        if let Some(n) = attrs.get_int("N")? {
            if n != values.len() as i64 {
                return Err(InferError::inconsistent(format!(
                    "N is {} but {} tensors are being joined",
                    n,
                    values.len()
                )));
            }
        }
        let dtype = same_dtype(values, 0..values.len())?;

        let shapes: Option<Vec<RangedShape>> = values.iter().map(|v| v.ranged_dims()).collect();
        let (Some(shapes), Some(axis)) = (shapes, axis) else {
            return Ok(match values.iter().find_map(|v| v.rank()) {
                Some(rank) => [output_desc(&unknown_dims(rank), dtype, inputs)].into(),
                None => unranked_output(dtype),
            });
        };

        let shape_refs: SmallVec<[&[RangedDim]; 4]> = shapes.iter().map(|s| s.as_slice()).collect();
        let dims = concat_shapes(&shape_refs, axis)?;
        let mut output = output_desc(&dims, dtype, inputs);

        if dims.len() == 1 {
            let consts: Option<Vec<&[i64]>> = values.iter().map(|v| v.const_value()).collect();
            if let Some(consts) = consts {
                output = output.with_const_value(consts.concat())?;
            }
        }
        Ok([output].into())
    }
}

const SQUEEZE_ATTRS: &[AttrSpec] = &[AttrSpec::optional("axis", AttrType::Ints)];

/// Squeeze operator.
///
/// Removes the size-1 dims listed in the `axis` attribute, or every size-1
/// dim if it is absent or empty. Listed dims which are unknown are assumed
/// to have size 1 if their range allows it. When no axes are given and an
/// unknown dim may have size 1, the output rank cannot be determined.
pub struct Squeeze;

impl InferShapes for Squeeze {
    fn validate(&self, attrs: &Attrs) -> Result<(), InferError> {
        validate_attrs(attrs, SQUEEZE_ATTRS)
    }

    fn infer_shapes(
        &self,
        inputs: &[TensorDesc],
        attrs: &Attrs,
    ) -> Result<Vec<TensorDesc>, InferError> {
        check_input_count(inputs, Cardinality::Exactly(1))?;
        let input = &inputs[0];
        let Some(dims) = input.ranged_dims() else {
            return Ok(unranked_output(input.dtype()));
        };
        let axes = attrs.get_ints("axis")?.unwrap_or(&[]);

        let out_dims: RangedShape = if axes.is_empty() {
            if dims.iter().any(|d| !d.dim.is_known() && d.range.contains(1)) {
                return Ok(unranked_output(input.dtype()));
            }
            dims.iter().filter(|d| !d.is_one()).copied().collect()
        } else {
            let axes = resolve_axes(dims.len(), axes, "axis")?;
            if let Some(&axis) = axes.iter().find(|&&axis| !dims[axis].range.contains(1)) {
                return Err(InferError::incompatible(format!(
                    "cannot squeeze axis {} with size {}",
                    axis, dims[axis].dim
                )));
            }
            dims.iter()
                .enumerate()
                .filter(|(i, _)| !axes.contains(i))
                .map(|(_, d)| *d)
                .collect()
        };

        let output = keep_const(output_desc(&out_dims, input.dtype(), inputs), input)?;
        Ok([output].into())
    }
}

const UNSQUEEZE_ATTRS: &[AttrSpec] = &[AttrSpec::required("axes", AttrType::Ints)];

/// Unsqueeze operator.
///
/// Inserts size-1 dims at the positions in the `axes` attribute, which index
/// the output shape.
pub struct Unsqueeze;

impl InferShapes for Unsqueeze {
    fn validate(&self, attrs: &Attrs) -> Result<(), InferError> {
        validate_attrs(attrs, UNSQUEEZE_ATTRS)
    }

    fn infer_shapes(
        &self,
        inputs: &[TensorDesc],
        attrs: &Attrs,
    ) -> Result<Vec<TensorDesc>, InferError> {
        check_input_count(inputs, Cardinality::Exactly(1))?;
        let input = &inputs[0];
        let axes = attrs.require_ints("axes")?;
        let Some(mut dims) = input.ranged_dims() else {
            return Ok(unranked_output(input.dtype()));
        };

        let resolved = resolve_axes(dims.len() + axes.len(), axes, "axes")?;
        if resolved.len() != axes.len() {
            return Err(InferError::out_of_domain(
                "axes",
                format!("{:?} contains duplicate axes", axes),
            ));
        }
        for axis in resolved {
            dims.insert(axis, RangedDim::fixed(1));
        }

        let output = keep_const(output_desc(&dims, input.dtype(), inputs), input)?;
        Ok([output].into())
    }
}

/// MatrixDiag operator.
///
/// Builds a batch of square matrices from a batch of diagonals, mapping
/// `[..., N]` to `[..., N, N]`.
pub struct MatrixDiag;

impl InferShapes for MatrixDiag {
    fn infer_shapes(
        &self,
        inputs: &[TensorDesc],
        _attrs: &Attrs,
    ) -> Result<Vec<TensorDesc>, InferError> {
        check_input_count(inputs, Cardinality::Exactly(1))?;
        let input = &inputs[0];
        check_rank(0, input, Cardinality::AtLeast(1))?;
        let Some(mut dims) = input.ranged_dims() else {
            return Ok(unranked_output(input.dtype()));
        };
        if let Some(&last) = dims.last() {
            dims.push(last);
        }
        Ok([output_desc(&dims, input.dtype(), inputs)].into())
    }
}

const TOPK_ATTRS: &[AttrSpec] = &[
    AttrSpec::optional("dim", AttrType::Int),
    AttrSpec::optional("sorted", AttrType::Bool),
    AttrSpec::optional("largest", AttrType::Bool),
];

/// TopK operator.
///
/// Selects `k` entries along the axis given by the `dim` attribute, which
/// defaults to the last axis. `k` is the second input. The outputs are the
/// selected values and their int32 indices. If `k` is not known at compile
/// time the selected dim is unknown, with a range bounded by the input
/// size.
pub struct TopK;

impl InferShapes for TopK {
    fn validate(&self, attrs: &Attrs) -> Result<(), InferError> {
        validate_attrs(attrs, TOPK_ATTRS)
    }

    fn infer_shapes(
        &self,
        inputs: &[TensorDesc],
        attrs: &Attrs,
    ) -> Result<Vec<TensorDesc>, InferError> {
        check_input_count(inputs, Cardinality::Exactly(2))?;
        let (input, k) = (&inputs[0], &inputs[1]);
        check_rank(1, k, Cardinality::OneOf(&[0, 1]))?;
        let k = const_ints(inputs, 1)?
            .map(|values| single_int(values, "k"))
            .transpose()?;

        let Some(mut dims) = input.ranged_dims() else {
            return Ok([
                TensorDesc::unranked(input.dtype()),
                TensorDesc::unranked(DataType::Int32),
            ]
            .into());
        };
        let axis = resolve_axis(dims.len(), attrs.get_int("dim")?.unwrap_or(-1), "dim")?;
        let dim = dims[axis];

        let (out_dim, force_ranges) = match k {
            Some(k) => {
                let k = usize::try_from(k)
                    .map_err(|_| InferError::out_of_domain("k", format!("{} is negative", k)))?;
                if dim.range.max.is_some_and(|max| k > max) {
                    return Err(InferError::incompatible(format!(
                        "k ({}) exceeds size {} of axis {}",
                        k, dim.dim, axis
                    )));
                }
                (RangedDim::fixed(k), false)
            }
            None => (
                dim_in_range(DimRange {
                    min: 0,
                    max: dim.range.max,
                }),
                true,
            ),
        };
        dims[axis] = out_dim;

        let with_ranges = force_ranges || is_dynamic(inputs);
        Ok([
            TensorDesc::from_ranged_dims(&dims, input.dtype(), with_ranges),
            TensorDesc::from_ranged_dims(&dims, DataType::Int32, with_ranges),
        ]
        .into())
    }
}
