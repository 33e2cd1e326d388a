use smallvec::{smallvec, SmallVec};

use crate::attrs::{AttrType, Attrs};
use crate::dtype::{DataType, Format};
use crate::errors::{Cardinality, InferError};
use crate::infer_shapes::{output_desc, InferShapes};
use crate::ops::{same_dtype, unranked_output, usize_list};
use crate::shape::{Dim, DimRange, RangedDim, RangedShape};
use crate::shape_expr::{conv_output_dim, same_output_dim, Window};
use crate::tensor_desc::TensorDesc;
use crate::validate::{
    check_dtype, check_format, check_input_count, check_list_len, check_rank, format_attr,
    validate_attrs, AttrSpec, Domain,
};

/// Specifies the padding mode used by a convolution or pooling operator.
///
/// This is derived from the `padding` attribute.
#[derive(Copy, Clone, Debug, PartialEq)]
enum Padding {
    /// Pad the input so that the size of each output spatial dimension is
    /// `ceil(input_size / stride)`.
    Same,

    /// No padding.
    Valid,

    /// Padding given by the `pads` attribute. This is the mode used when
    /// `padding` is `CALCULATED` or absent.
    Explicit,
}

impl Padding {
    fn from_attrs(attrs: &Attrs) -> Result<Self, InferError> {
        match attrs.get_str("padding")? {
            Some("SAME") => Ok(Self::Same),
            Some("VALID") => Ok(Self::Valid),
            Some("CALCULATED") | None => Ok(Self::Explicit),
            Some(other) => Err(InferError::out_of_domain(
                "padding",
                format!("unsupported padding mode \"{}\"", other),
            )),
        }
    }
}

/// Window attributes shared by convolution and pooling operators.
///
/// `strides` and `dilations` have one entry per input axis, in the order
/// given by `format`. `pads` has a `(before, after)` pair per spatial axis.
struct WindowAttrs {
    format: Format,
    strides: SmallVec<[usize; 6]>,
    dilations: SmallVec<[usize; 6]>,
    pads: SmallVec<[usize; 6]>,
    padding: Padding,
    ceil_mode: bool,
}

impl WindowAttrs {
    fn from_attrs(
        attrs: &Attrs,
        format: Format,
        rank: usize,
        dilation_name: &str,
    ) -> Result<Self, InferError> {
        let spatial_dims = rank - 2;
        let strides = usize_list(attrs, "strides")?.ok_or_else(|| InferError::missing("strides"))?;
        let dilations = usize_list(attrs, dilation_name)?.unwrap_or_else(|| smallvec![1; rank]);
        let pads = usize_list(attrs, "pads")?.unwrap_or_else(|| smallvec![0; 2 * spatial_dims]);
        check_list_len("strides", strides.len(), Cardinality::Exactly(rank))?;
        check_list_len(dilation_name, dilations.len(), Cardinality::Exactly(rank))?;
        check_list_len("pads", pads.len(), Cardinality::Exactly(2 * spatial_dims))?;
        check_non_spatial(format, "strides", &strides)?;
        check_non_spatial(format, dilation_name, &dilations)?;

        Ok(WindowAttrs {
            format,
            strides,
            dilations,
            pads,
            padding: Padding::from_attrs(attrs)?,
            ceil_mode: attrs.get_int("ceil_mode")?.unwrap_or(0) != 0,
        })
    }

    /// Compute the output dims for an input, given the kernel size along
    /// each spatial axis.
    ///
    /// Spatial axes with an unknown kernel size have an unknown output size,
    /// unless the padding mode makes the output independent of the kernel.
    fn output_dims(
        &self,
        input: &[RangedDim],
        kernel: &[Option<usize>],
    ) -> Result<RangedShape, InferError> {
        let mut output: RangedShape = input.into();
        for (i, (&axis, &kernel)) in self.format.spatial_axes().iter().zip(kernel).enumerate() {
            let stride = self.strides[axis];
            output[axis] = match (self.padding, kernel) {
                (Padding::Same, _) => same_output_dim(&input[axis], stride)?,
                (_, None) => RangedDim::dynamic(DimRange::unbounded(1)),
                (padding, Some(kernel)) => {
                    let mut window = Window::new(kernel, stride)
                        .with_dilation(self.dilations[axis])
                        .with_ceil_mode(self.ceil_mode);
                    if padding == Padding::Explicit {
                        window = window.with_padding(self.pads[2 * i], self.pads[2 * i + 1]);
                    }
                    conv_output_dim(&input[axis], &window)?
                }
            };
        }
        Ok(output)
    }
}

/// Check that a per-axis list leaves the batch and channel axes alone.
fn check_non_spatial(format: Format, name: &str, values: &[usize]) -> Result<(), InferError> {
    for axis in [format.batch_axis(), format.channel_axis()]
        .into_iter()
        .flatten()
    {
        if values.get(axis).is_some_and(|&v| v != 1) {
            return Err(InferError::inconsistent(format!(
                "{} {:?} must be 1 on the batch and channel axes of {} data",
                name, values, format
            )));
        }
    }
    Ok(())
}

/// Return the channel axis of a layout which is known to have one.
fn channel_axis(format: Format) -> Result<usize, InferError> {
    format.channel_axis().ok_or_else(|| {
        InferError::inconsistent(format!("data_format {} has no channel axis", format))
    })
}

macro_rules! conv_attrs {
    ($rank:literal, $formats:expr) => {
        &[
            AttrSpec::required("strides", AttrType::Ints)
                .with_len(Cardinality::Exactly($rank))
                .with_domain(Domain::Positive),
            AttrSpec::optional("pads", AttrType::Ints)
                .with_len(Cardinality::Exactly(2 * ($rank - 2)))
                .with_domain(Domain::NonNegative),
            AttrSpec::optional("dilations", AttrType::Ints)
                .with_len(Cardinality::Exactly($rank))
                .with_domain(Domain::Positive),
            AttrSpec::optional("groups", AttrType::Int).with_domain(Domain::Positive),
            AttrSpec::optional("data_format", AttrType::String).with_domain(Domain::OneOf($formats)),
            AttrSpec::optional("padding", AttrType::String)
                .with_domain(Domain::OneOf(&["SAME", "VALID", "CALCULATED"])),
        ]
    };
}

const CONV2D_ATTRS: &[AttrSpec] = conv_attrs!(4, &["NHWC", "NCHW"]);
const CONV3D_ATTRS: &[AttrSpec] = conv_attrs!(5, &["NDHWC", "NCDHW"]);

/// Convolution operators `Conv2D` and `Conv3D`.
///
/// Inputs are the data, the filter and an optional 1-D bias. The data layout
/// is given by the `data_format` attribute. The filter layout is taken from
/// the filter descriptor's format, and is `HWCN` (`DHWCN` for 3D) if that is
/// [`Format::ND`].
#[derive(Copy, Clone, Debug)]
pub struct Conv {
    spatial_dims: usize,
}

impl Conv {
    pub fn conv_2d() -> Self {
        Conv { spatial_dims: 2 }
    }

    pub fn conv_3d() -> Self {
        Conv { spatial_dims: 3 }
    }

    fn rank(&self) -> usize {
        self.spatial_dims + 2
    }

    fn data_formats(&self) -> &'static [Format] {
        if self.spatial_dims == 2 {
            &[Format::NHWC, Format::NCHW]
        } else {
            &[Format::NDHWC, Format::NCDHW]
        }
    }

    fn filter_formats(&self) -> &'static [Format] {
        if self.spatial_dims == 2 {
            &[Format::HWCN, Format::NCHW, Format::NHWC]
        } else {
            &[Format::DHWCN, Format::NCDHW, Format::NDHWC]
        }
    }
}

impl InferShapes for Conv {
    fn validate(&self, attrs: &Attrs) -> Result<(), InferError> {
        let specs = if self.spatial_dims == 2 {
            CONV2D_ATTRS
        } else {
            CONV3D_ATTRS
        };
        validate_attrs(attrs, specs)
    }

    fn infer_shapes(
        &self,
        inputs: &[TensorDesc],
        attrs: &Attrs,
    ) -> Result<Vec<TensorDesc>, InferError> {
        check_input_count(inputs, Cardinality::Between(2, 3))?;
        let rank = self.rank();
        let (input, filter, bias) = (&inputs[0], &inputs[1], inputs.get(2));

        check_rank(0, input, Cardinality::Exactly(rank))?;
        check_rank(1, filter, Cardinality::Exactly(rank))?;
        if let Some(bias) = bias {
            check_rank(2, bias, Cardinality::Exactly(1))?;
        }
        let dtype = same_dtype(inputs, 0..2)?;

        let format = format_attr(attrs, "data_format", self.data_formats()[0])?;
        check_format(format, self.data_formats(), rank)?;
        let filter_format = match filter.format() {
            Format::ND => self.filter_formats()[0],
            format => format,
        };
        check_format(filter_format, self.filter_formats(), rank)?;

        let window = WindowAttrs::from_attrs(attrs, format, rank, "dilations")?;
        let groups = usize::try_from(attrs.get_int("groups")?.unwrap_or(1))
            .ok()
            .filter(|&g| g > 0)
            .ok_or_else(|| InferError::out_of_domain("groups", "must be positive"))?;

        let Some(input_dims) = input.ranged_dims() else {
            return Ok([TensorDesc::unranked(dtype).with_format(format)].into());
        };
        let filter_dims = filter.ranged_dims();

        let c_axis = channel_axis(format)?;
        let filter_in_axis = channel_axis(filter_format)?;
        let filter_out_axis = filter_format.batch_axis().unwrap_or(0);

        let out_channels = filter_dims
            .as_ref()
            .map_or(RangedDim::dynamic(DimRange::unbounded(1)), |dims| {
                dims[filter_out_axis]
            });

        if let Some(filter_dims) = &filter_dims {
            if let (Dim::Fixed(in_channels), Dim::Fixed(filter_channels)) =
                (input_dims[c_axis].dim, filter_dims[filter_in_axis].dim)
            {
                if in_channels != filter_channels * groups {
                    return Err(InferError::incompatible(format!(
                        "input has {} channels, filter expects {} with {} groups",
                        in_channels,
                        filter_channels * groups,
                        groups
                    )));
                }
            }
        }

        if let Dim::Fixed(out_channels) = out_channels.dim {
            if out_channels % groups != 0 {
                return Err(InferError::inconsistent(format!(
                    "{} output channels are not divisible into {} groups",
                    out_channels, groups
                )));
            }
            if let Some(&Dim::Fixed(bias_len)) = bias.and_then(|b| b.dims()).and_then(|d| d.first())
            {
                if bias_len != out_channels {
                    return Err(InferError::incompatible(format!(
                        "bias has length {}, expected {} output channels",
                        bias_len, out_channels
                    )));
                }
            }
        }

        let kernel: SmallVec<[Option<usize>; 3]> = filter_format
            .spatial_axes()
            .iter()
            .map(|&axis| filter_dims.as_ref().and_then(|dims| dims[axis].dim.fixed()))
            .collect();
        let mut output = window.output_dims(&input_dims, &kernel)?;
        output[c_axis] = out_channels;

        Ok([output_desc(&output, dtype, inputs).with_format(format)].into())
    }
}

/// Reduction applied by a pooling window.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PoolKind {
    Max,
    Avg,
}

macro_rules! pool_attrs {
    ($rank:literal, $formats:expr) => {
        &[
            AttrSpec::required("ksize", AttrType::Ints)
                .with_len(Cardinality::Exactly($rank))
                .with_domain(Domain::Positive),
            AttrSpec::required("strides", AttrType::Ints)
                .with_len(Cardinality::Exactly($rank))
                .with_domain(Domain::Positive),
            AttrSpec::required("padding", AttrType::String)
                .with_domain(Domain::OneOf(&["SAME", "VALID", "CALCULATED"])),
            AttrSpec::optional("pads", AttrType::Ints)
                .with_len(Cardinality::Exactly(2 * ($rank - 2)))
                .with_domain(Domain::NonNegative),
            AttrSpec::optional("dilation", AttrType::Ints)
                .with_len(Cardinality::Exactly($rank))
                .with_domain(Domain::Positive),
            AttrSpec::optional("ceil_mode", AttrType::Int).with_domain(Domain::Range(0, 1)),
            AttrSpec::optional("data_format", AttrType::String).with_domain(Domain::OneOf($formats)),
        ]
    };
}

const POOL2D_ATTRS: &[AttrSpec] = pool_attrs!(4, &["NHWC", "NCHW"]);
const POOL3D_ATTRS: &[AttrSpec] = pool_attrs!(5, &["NDHWC", "NCDHW"]);

/// Pooling operators `MaxPool`, `MaxPool3D`, `AvgPool` and `AvgPool3D`.
///
/// The window size is given per input axis by `ksize`. With `CALCULATED`
/// padding the `pads` attribute is required. Only max pooling supports a
/// `dilation` other than 1.
#[derive(Copy, Clone, Debug)]
pub struct Pool {
    kind: PoolKind,
    spatial_dims: usize,
}

impl Pool {
    pub fn pool_2d(kind: PoolKind) -> Self {
        Pool {
            kind,
            spatial_dims: 2,
        }
    }

    pub fn pool_3d(kind: PoolKind) -> Self {
        Pool {
            kind,
            spatial_dims: 3,
        }
    }

    fn rank(&self) -> usize {
        self.spatial_dims + 2
    }

    fn data_formats(&self) -> &'static [Format] {
        if self.spatial_dims == 2 {
            &[Format::NHWC, Format::NCHW]
        } else {
            &[Format::NDHWC, Format::NCDHW]
        }
    }
}

impl InferShapes for Pool {
    fn validate(&self, attrs: &Attrs) -> Result<(), InferError> {
        let specs = if self.spatial_dims == 2 {
            POOL2D_ATTRS
        } else {
            POOL3D_ATTRS
        };
        validate_attrs(attrs, specs)?;

        if Padding::from_attrs(attrs)? == Padding::Explicit && !attrs.contains("pads") {
            return Err(InferError::missing("pads"));
        }
        if self.kind == PoolKind::Avg
            && attrs
                .get_ints("dilation")?
                .is_some_and(|d| d.iter().any(|&v| v != 1))
        {
            return Err(InferError::inconsistent(
                "average pooling does not support dilation",
            ));
        }
        Ok(())
    }

    fn infer_shapes(
        &self,
        inputs: &[TensorDesc],
        attrs: &Attrs,
    ) -> Result<Vec<TensorDesc>, InferError> {
        check_input_count(inputs, Cardinality::Exactly(1))?;
        let rank = self.rank();
        let input = &inputs[0];
        check_rank(0, input, Cardinality::Exactly(rank))?;

        let format = format_attr(attrs, "data_format", self.data_formats()[0])?;
        check_format(format, self.data_formats(), rank)?;
        let window = WindowAttrs::from_attrs(attrs, format, rank, "dilation")?;

        let ksize = usize_list(attrs, "ksize")?.ok_or_else(|| InferError::missing("ksize"))?;
        check_list_len("ksize", ksize.len(), Cardinality::Exactly(rank))?;
        check_non_spatial(format, "ksize", &ksize)?;

        let Some(input_dims) = input.ranged_dims() else {
            return Ok([TensorDesc::unranked(input.dtype()).with_format(format)].into());
        };
        let kernel: SmallVec<[Option<usize>; 3]> = format
            .spatial_axes()
            .iter()
            .map(|&axis| Some(ksize[axis]))
            .collect();
        let output = window.output_dims(&input_dims, &kernel)?;

        Ok([output_desc(&output, input.dtype(), inputs).with_format(format)].into())
    }
}

const GLOBAL_POOL_ATTRS: &[AttrSpec] = &[AttrSpec::optional("data_format", AttrType::String)
    .with_domain(Domain::OneOf(&["NCHW", "NHWC", "NCDHW", "NDHWC"]))];

/// GlobalAvgPool operator.
///
/// Averages over all spatial axes, which have size 1 in the output. The
/// layout defaults to channels-first.
pub struct GlobalAvgPool;

impl InferShapes for GlobalAvgPool {
    fn validate(&self, attrs: &Attrs) -> Result<(), InferError> {
        validate_attrs(attrs, GLOBAL_POOL_ATTRS)
    }

    fn infer_shapes(
        &self,
        inputs: &[TensorDesc],
        attrs: &Attrs,
    ) -> Result<Vec<TensorDesc>, InferError> {
        check_input_count(inputs, Cardinality::Exactly(1))?;
        let input = &inputs[0];
        check_rank(0, input, Cardinality::OneOf(&[4, 5]))?;
        check_dtype(0, input, DataType::is_float, "a float type")?;

        let Some(mut dims) = input.ranged_dims() else {
            return Ok(unranked_output(input.dtype()));
        };
        let default_format = if dims.len() == 4 {
            Format::NCHW
        } else {
            Format::NCDHW
        };
        let format = format_attr(attrs, "data_format", default_format)?;
        check_format(
            format,
            &[Format::NCHW, Format::NHWC, Format::NCDHW, Format::NDHWC],
            dims.len(),
        )?;

        for &axis in format.spatial_axes() {
            dims[axis] = RangedDim::fixed(1);
        }
        Ok([output_desc(&dims, input.dtype(), inputs).with_format(format)].into())
    }
}

const BIAS_ADD_GRAD_ATTRS: &[AttrSpec] = &[AttrSpec::optional("data_format", AttrType::String)
    .with_domain(Domain::OneOf(&["NHWC", "NCHW"]))];

/// BiasAddGrad operator.
///
/// Sums the gradient over every axis except the channel axis, producing a
/// 1-D output. With `NHWC` layout the channel axis is the last one, with
/// `NCHW` it is axis 1, for inputs of any rank.
pub struct BiasAddGrad;

impl InferShapes for BiasAddGrad {
    fn validate(&self, attrs: &Attrs) -> Result<(), InferError> {
        validate_attrs(attrs, BIAS_ADD_GRAD_ATTRS)
    }

    fn infer_shapes(
        &self,
        inputs: &[TensorDesc],
        attrs: &Attrs,
    ) -> Result<Vec<TensorDesc>, InferError> {
        check_input_count(inputs, Cardinality::Exactly(1))?;
        let input = &inputs[0];
        check_rank(0, input, Cardinality::AtLeast(2))?;
        let format = format_attr(attrs, "data_format", Format::NHWC)?;

        let channels = match input.ranged_dims() {
            Some(dims) if format == Format::NCHW => dims[1],
            Some(dims) => dims[dims.len() - 1],
            None => RangedDim::unknown(),
        };
        Ok([output_desc(&[channels], input.dtype(), inputs)].into())
    }
}
