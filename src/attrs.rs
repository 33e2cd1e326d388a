//! Operator attributes.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::errors::InferError;

/// Value of an operator attribute.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f32),
    String(String),
    Bools(Vec<bool>),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
    Strings(Vec<String>),
}

impl AttrValue {
    /// Return the type tag of this value.
    pub fn attr_type(&self) -> AttrType {
        match self {
            Self::Bool(_) => AttrType::Bool,
            Self::Int(_) => AttrType::Int,
            Self::Float(_) => AttrType::Float,
            Self::String(_) => AttrType::String,
            Self::Bools(_) => AttrType::Bools,
            Self::Ints(_) => AttrType::Ints,
            Self::Floats(_) => AttrType::Floats,
            Self::Strings(_) => AttrType::Strings,
        }
    }

    /// Return the number of elements if this is a list.
    pub fn list_len(&self) -> Option<usize> {
        match self {
            Self::Bools(v) => Some(v.len()),
            Self::Ints(v) => Some(v.len()),
            Self::Floats(v) => Some(v.len()),
            Self::Strings(v) => Some(v.len()),
            Self::Bool(_) | Self::Int(_) | Self::Float(_) | Self::String(_) => None,
        }
    }
}

/// Type tag of an [`AttrValue`].
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum AttrType {
    Bool,
    Int,
    Float,
    String,
    Bools,
    Ints,
    Floats,
    Strings,
}

impl AttrType {
    pub fn is_list(self) -> bool {
        matches!(self, Self::Bools | Self::Ints | Self::Floats | Self::Strings)
    }
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::Bools => "list(bool)",
            Self::Ints => "list(int)",
            Self::Floats => "list(float)",
            Self::Strings => "list(string)",
        };
        f.write_str(name)
    }
}

macro_rules! impl_from_value {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for AttrValue {
            fn from(val: $ty) -> Self {
                AttrValue::$variant(val.into())
            }
        }
    };
}

impl_from_value!(bool, Bool);
impl_from_value!(i64, Int);
impl_from_value!(i32, Int);
impl_from_value!(f32, Float);
impl_from_value!(&str, String);
impl_from_value!(String, String);
impl_from_value!(Vec<bool>, Bools);
impl_from_value!(Vec<i64>, Ints);
impl_from_value!(&[i64], Ints);
impl_from_value!(Vec<f32>, Floats);
impl_from_value!(Vec<String>, Strings);

impl<const N: usize> From<[i64; N]> for AttrValue {
    fn from(val: [i64; N]) -> Self {
        AttrValue::Ints(val.to_vec())
    }
}

impl<const N: usize> From<[&str; N]> for AttrValue {
    fn from(val: [&str; N]) -> Self {
        AttrValue::Strings(val.iter().map(|s| s.to_string()).collect())
    }
}

/// Set of named attributes attached to an operator node.
///
/// Lookups are typed. Reading an attribute as a different type than the one
/// it is stored with fails with [`InferError::AttributeTypeMismatch`].
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Attrs {
    values: FxHashMap<String, AttrValue>,
}

/// Generate `get_*` and `require_*` accessors for one attribute type.
macro_rules! typed_getters {
    ($get:ident, $require:ident, $variant:ident, $ty:ty, |$val:ident| $conv:expr) => {
        /// Get an optional attribute.
        pub fn $get(&self, name: &str) -> Result<Option<$ty>, InferError> {
            match self.values.get(name) {
                None => Ok(None),
                Some(AttrValue::$variant($val)) => Ok(Some($conv)),
                Some(other) => Err(InferError::AttributeTypeMismatch {
                    name: name.to_string(),
                    expected: AttrType::$variant,
                    actual: other.attr_type(),
                }),
            }
        }

        /// Get a required attribute.
        pub fn $require(&self, name: &str) -> Result<$ty, InferError> {
            self.$get(name)?.ok_or_else(|| InferError::missing(name))
        }
    };
}

impl Attrs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an attribute, returning the updated set.
    pub fn with(mut self, name: &str, value: impl Into<AttrValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Add or replace an attribute.
    pub fn set(&mut self, name: &str, value: impl Into<AttrValue>) {
        self.values.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over `(name, value)` pairs in an unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    typed_getters!(get_bool, require_bool, Bool, bool, |v| *v);
    typed_getters!(get_int, require_int, Int, i64, |v| *v);
    typed_getters!(get_float, require_float, Float, f32, |v| *v);
    typed_getters!(get_str, require_str, String, &str, |v| v.as_str());
    typed_getters!(get_bools, require_bools, Bools, &[bool], |v| v.as_slice());
    typed_getters!(get_ints, require_ints, Ints, &[i64], |v| v.as_slice());
    typed_getters!(get_floats, require_floats, Floats, &[f32], |v| v.as_slice());
    typed_getters!(get_strings, require_strings, Strings, &[String], |v| v.as_slice());
}

impl<'a> FromIterator<(&'a str, AttrValue)> for Attrs {
    fn from_iter<I: IntoIterator<Item = (&'a str, AttrValue)>>(iter: I) -> Self {
        Attrs {
            values: iter
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        }
    }
}
