//! Element types and layout tags carried by tensor descriptors.

use std::fmt;
use std::str::FromStr;

use crate::errors::InferError;

/// Element type of a tensor.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DataType {
    Float16,
    Float32,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Bool,
    String,
    Resource,
    Variant,
}

impl DataType {
    /// Return the lowercase name of this type, as used in attributes.
    pub fn name(self) -> &'static str {
        match self {
            Self::Float16 => "float16",
            Self::Float32 => "float32",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Resource => "resource",
            Self::Variant => "variant",
        }
    }

    /// Return true if this is a signed or unsigned integer type.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Int8
                | Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::UInt8
                | Self::UInt16
                | Self::UInt32
                | Self::UInt64
        )
    }

    /// Return true if this is a floating point type.
    pub fn is_float(self) -> bool {
        matches!(self, Self::Float16 | Self::Float32)
    }

    /// Return true if values of this type can be used as indices or sizes.
    pub fn is_index(self) -> bool {
        matches!(self, Self::Int32 | Self::Int64)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = InferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dtype = match s {
            "float16" | "half" => Self::Float16,
            "float32" | "float" => Self::Float32,
            "int8" => Self::Int8,
            "int16" => Self::Int16,
            "int32" => Self::Int32,
            "int64" => Self::Int64,
            "uint8" => Self::UInt8,
            "uint16" => Self::UInt16,
            "uint32" => Self::UInt32,
            "uint64" => Self::UInt64,
            "bool" => Self::Bool,
            "string" => Self::String,
            "resource" => Self::Resource,
            "variant" => Self::Variant,
            _ => {
                return Err(InferError::out_of_domain(
                    "dtype",
                    format!("unrecognized data type \"{}\"", s),
                ))
            }
        };
        Ok(dtype)
    }
}

/// Layout tag describing the meaning of each axis of a tensor.
///
/// Only operators whose output size depends on which axes are spatial (eg.
/// convolution and pooling) look at the format.
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(clippy::upper_case_acronyms)]
pub enum Format {
    /// No axis semantics.
    #[default]
    ND,
    NCHW,
    NHWC,
    NCDHW,
    NDHWC,
    /// Filter layout with the output channel last.
    HWCN,
    DHWCN,
}

impl Format {
    pub fn name(self) -> &'static str {
        match self {
            Self::ND => "ND",
            Self::NCHW => "NCHW",
            Self::NHWC => "NHWC",
            Self::NCDHW => "NCDHW",
            Self::NDHWC => "NDHWC",
            Self::HWCN => "HWCN",
            Self::DHWCN => "DHWCN",
        }
    }

    /// Return the rank of tensors in this format, or `None` for [`Format::ND`].
    pub fn rank(self) -> Option<usize> {
        match self {
            Self::ND => None,
            Self::NCHW | Self::NHWC | Self::HWCN => Some(4),
            Self::NCDHW | Self::NDHWC | Self::DHWCN => Some(5),
        }
    }

    /// Index of the batch axis. For filter formats this is the output
    /// channel axis.
    pub fn batch_axis(self) -> Option<usize> {
        match self {
            Self::ND => None,
            Self::NCHW | Self::NHWC | Self::NCDHW | Self::NDHWC => Some(0),
            Self::HWCN => Some(3),
            Self::DHWCN => Some(4),
        }
    }

    /// Index of the channel axis. For filter formats this is the input
    /// channel axis.
    pub fn channel_axis(self) -> Option<usize> {
        match self {
            Self::ND => None,
            Self::NCHW | Self::NCDHW => Some(1),
            Self::NHWC => Some(3),
            Self::NDHWC => Some(4),
            Self::HWCN => Some(2),
            Self::DHWCN => Some(3),
        }
    }

    /// Indices of the spatial axes, outermost first.
    pub fn spatial_axes(self) -> &'static [usize] {
        match self {
            Self::ND => &[],
            Self::NCHW => &[2, 3],
            Self::NHWC => &[1, 2],
            Self::NCDHW => &[2, 3, 4],
            Self::NDHWC => &[1, 2, 3],
            Self::HWCN => &[0, 1],
            Self::DHWCN => &[0, 1, 2],
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Format {
    type Err = InferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format = match s {
            "ND" => Self::ND,
            "NCHW" => Self::NCHW,
            "NHWC" => Self::NHWC,
            "NCDHW" => Self::NCDHW,
            "NDHWC" => Self::NDHWC,
            "HWCN" => Self::HWCN,
            "DHWCN" => Self::DHWCN,
            _ => {
                return Err(InferError::out_of_domain(
                    "data_format",
                    format!("unrecognized format \"{}\"", s),
                ))
            }
        };
        Ok(format)
    }
}
