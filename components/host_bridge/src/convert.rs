//! Conversion traits between Rust types and [`HostValue`]s.
//!
//! - [`FromHost`]: extract a Rust value from a translated [`HostValue`] and
//!   describe the [`HostType`] the translator should aim for
//! - [`IntoHost`]: turn a Rust return value into a [`HostValue`]
//! - [`HostArgs`] / [`IntoHostArgs`]: the same for whole argument tuples
//!
//! Numeric extraction accepts narrower host numbers and widens them, so an
//! `i64` parameter takes a `HostValue::Int` as well as a `HostValue::Long`.

use crate::class::HostClass;
use crate::error::{BridgeError, BridgeResult, HostError};
use crate::types::{HostArray, HostObject, HostType, HostValue, Primitive};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::sync::Arc;

/// A Rust type that host closures accept from script.
pub trait FromHost: Sized + 'static {
    /// The type the translator converts script values to.
    fn host_type() -> HostType;

    /// Extracts the value from its translated form.
    fn from_host(value: HostValue) -> BridgeResult<Self>;

    /// Extracts the elements of a host array.
    ///
    /// Primitive types take their unboxed vector as is.
    fn from_array(array: HostArray) -> BridgeResult<Vec<Self>> {
        array.into_values().into_iter().map(Self::from_host).collect()
    }

    /// Returns true if this type collects trailing arguments.
    fn is_varargs() -> bool {
        false
    }
}

/// A Rust type that host closures return to script.
pub trait IntoHost {
    /// Converts the value. An `Err` is reported as a host method failure.
    fn into_host(self) -> Result<HostValue, HostError>;
}

fn mismatch<T>(expected: HostType, value: &HostValue) -> BridgeResult<T> {
    Err(BridgeError::incompatible(expected, value.type_name()))
}

// ============================================================================
// Primitive implementations
// ============================================================================

macro_rules! impl_primitive {
    ($ty:ty, $primitive:ident, $array:ident, { $($variant:ident),* }) => {
        impl FromHost for $ty {
            fn host_type() -> HostType {
                HostType::Primitive(Primitive::$primitive)
            }

            fn from_host(value: HostValue) -> BridgeResult<Self> {
                match value {
                    $(HostValue::$variant(v) => Ok(v as $ty),)*
                    other => mismatch(Self::host_type(), &other),
                }
            }

            fn from_array(array: HostArray) -> BridgeResult<Vec<Self>> {
                match array {
                    HostArray::$array(items) => Ok(items),
                    other => other.into_values().into_iter().map(Self::from_host).collect(),
                }
            }
        }

        impl IntoHost for $ty {
            fn into_host(self) -> Result<HostValue, HostError> {
                Ok(HostValue::$array(self))
            }
        }
    };
}

impl_primitive!(bool, Bool, Bool, { Bool });
impl_primitive!(i16, Short, Short, { Short });
impl_primitive!(i32, Int, Int, { Int, Short });
impl_primitive!(i64, Long, Long, { Long, Int, Short });
impl_primitive!(f32, Float, Float, { Float, Long, Int, Short });
impl_primitive!(f64, Double, Double, { Double, Float, Long, Int, Short });

// ============================================================================
// Strings, unit and dynamic values
// ============================================================================

impl FromHost for String {
    fn host_type() -> HostType {
        HostType::String
    }

    fn from_host(value: HostValue) -> BridgeResult<Self> {
        match value {
            HostValue::String(s) => Ok(s),
            other => mismatch(Self::host_type(), &other),
        }
    }
}

impl IntoHost for String {
    fn into_host(self) -> Result<HostValue, HostError> {
        Ok(HostValue::String(self))
    }
}

impl IntoHost for &str {
    fn into_host(self) -> Result<HostValue, HostError> {
        Ok(HostValue::String(self.to_string()))
    }
}

impl FromHost for () {
    fn host_type() -> HostType {
        HostType::Void
    }

    fn from_host(_value: HostValue) -> BridgeResult<Self> {
        Ok(())
    }
}

impl IntoHost for () {
    fn into_host(self) -> Result<HostValue, HostError> {
        Ok(HostValue::Undefined)
    }
}

impl FromHost for HostValue {
    fn host_type() -> HostType {
        HostType::Any
    }

    fn from_host(value: HostValue) -> BridgeResult<Self> {
        Ok(value)
    }
}

impl IntoHost for HostValue {
    fn into_host(self) -> Result<HostValue, HostError> {
        Ok(self)
    }
}

impl IntoHost for HostObject {
    fn into_host(self) -> Result<HostValue, HostError> {
        Ok(HostValue::Object(self))
    }
}

impl<T: FromHost> FromHost for Option<T> {
    fn host_type() -> HostType {
        HostType::Optional(Box::new(T::host_type()))
    }

    fn from_host(value: HostValue) -> BridgeResult<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_host(value).map(Some)
        }
    }
}

impl<T: IntoHost> IntoHost for Option<T> {
    fn into_host(self) -> Result<HostValue, HostError> {
        match self {
            Some(value) => value.into_host(),
            None => Ok(HostValue::Null),
        }
    }
}

impl<T: IntoHost, E: Into<HostError>> IntoHost for Result<T, E> {
    fn into_host(self) -> Result<HostValue, HostError> {
        self.map_err(Into::into)?.into_host()
    }
}

// ============================================================================
// Host class instances
// ============================================================================

impl<T: HostClass> FromHost for Arc<T> {
    fn host_type() -> HostType {
        HostType::Class(crate::types::ClassKey::of::<T>())
    }

    fn from_host(value: HostValue) -> BridgeResult<Self> {
        match &value {
            HostValue::Object(object) => match object.downcast::<T>() {
                Some(instance) => Ok(instance),
                None => mismatch(Self::host_type(), &value),
            },
            _ => mismatch(Self::host_type(), &value),
        }
    }
}

impl<T: HostClass> IntoHost for Arc<T> {
    fn into_host(self) -> Result<HostValue, HostError> {
        Ok(HostValue::Object(HostObject::new(self)))
    }
}

// ============================================================================
// Collections
// ============================================================================

/// Trailing arguments of a variadic host method.
///
/// As the last parameter of a signature it collects every remaining script
/// argument, translated with `T`'s type.
#[derive(Debug, Clone, PartialEq)]
pub struct VarArgs<T>(pub Vec<T>);

impl<T> VarArgs<T> {
    /// Consumes the wrapper.
    pub fn into_inner(self) -> Vec<T> {
        self.0
    }
}

impl<T> std::ops::Deref for VarArgs<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

impl<T: FromHost> FromHost for VarArgs<T> {
    fn host_type() -> HostType {
        HostType::Array(Box::new(T::host_type()))
    }

    fn from_host(value: HostValue) -> BridgeResult<Self> {
        Box::<[T]>::from_host(value).map(|items| VarArgs(items.into_vec()))
    }

    fn is_varargs() -> bool {
        true
    }
}

impl<T: FromHost> FromHost for Box<[T]> {
    fn host_type() -> HostType {
        HostType::Array(Box::new(T::host_type()))
    }

    fn from_host(value: HostValue) -> BridgeResult<Self> {
        match value {
            HostValue::Array(array) => T::from_array(array).map(Vec::into_boxed_slice),
            HostValue::List(items) => items
                .into_iter()
                .map(T::from_host)
                .collect::<BridgeResult<Vec<_>>>()
                .map(Vec::into_boxed_slice),
            other => mismatch(Self::host_type(), &other),
        }
    }
}

impl<T: IntoHost> IntoHost for Box<[T]> {
    fn into_host(self) -> Result<HostValue, HostError> {
        let items = self
            .into_vec()
            .into_iter()
            .map(IntoHost::into_host)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(HostValue::Array(HostArray::Boxed(items)))
    }
}

impl<T: FromHost> FromHost for Vec<T> {
    fn host_type() -> HostType {
        HostType::List(Some(Box::new(T::host_type())))
    }

    fn from_host(value: HostValue) -> BridgeResult<Self> {
        match value {
            HostValue::List(items) => items.into_iter().map(T::from_host).collect(),
            HostValue::Array(array) => T::from_array(array),
            other => mismatch(Self::host_type(), &other),
        }
    }
}

impl<T: IntoHost> IntoHost for Vec<T> {
    fn into_host(self) -> Result<HostValue, HostError> {
        self.into_iter()
            .map(IntoHost::into_host)
            .collect::<Result<Vec<_>, _>>()
            .map(HostValue::List)
    }
}

impl<T: FromHost> FromHost for IndexMap<String, T> {
    fn host_type() -> HostType {
        HostType::Map(Some(Box::new(T::host_type())))
    }

    fn from_host(value: HostValue) -> BridgeResult<Self> {
        match value {
            HostValue::Map(entries) => entries
                .into_iter()
                .map(|(key, value)| T::from_host(value).map(|value| (key, value)))
                .collect(),
            other => mismatch(Self::host_type(), &other),
        }
    }
}

impl<T: IntoHost> IntoHost for IndexMap<String, T> {
    fn into_host(self) -> Result<HostValue, HostError> {
        self.into_iter()
            .map(|(key, value)| value.into_host().map(|value| (key, value)))
            .collect::<Result<IndexMap<_, _>, _>>()
            .map(HostValue::Map)
    }
}

impl<T: FromHost, S: BuildHasher + Default + 'static> FromHost for HashMap<String, T, S> {
    fn host_type() -> HostType {
        HostType::Map(Some(Box::new(T::host_type())))
    }

    fn from_host(value: HostValue) -> BridgeResult<Self> {
        IndexMap::<String, T>::from_host(value).map(|entries| entries.into_iter().collect())
    }
}

impl<T: IntoHost, S> IntoHost for HashMap<String, T, S> {
    fn into_host(self) -> Result<HostValue, HostError> {
        self.into_iter()
            .map(|(key, value)| value.into_host().map(|value| (key, value)))
            .collect::<Result<IndexMap<_, _>, _>>()
            .map(HostValue::Map)
    }
}

// ============================================================================
// Argument tuples
// ============================================================================

/// A parameter list of a host closure.
///
/// Implemented for tuples of up to eight [`FromHost`] types. When the last
/// element is a [`VarArgs`], the signature is variadic.
pub trait HostArgs: Sized {
    /// Parameter types in order.
    fn param_types() -> Vec<HostType>;

    /// Returns true if the last parameter collects trailing arguments.
    fn is_varargs() -> bool;

    /// Extracts the tuple from translated arguments.
    fn from_values(values: Vec<HostValue>) -> BridgeResult<Self>;
}

/// Arguments passed from host code to a script function.
pub trait IntoHostArgs {
    /// Converts the arguments.
    fn into_host_args(self) -> BridgeResult<Vec<HostValue>>;
}

impl IntoHostArgs for Vec<HostValue> {
    fn into_host_args(self) -> BridgeResult<Vec<HostValue>> {
        Ok(self)
    }
}

fn into_argument<T: IntoHost>(value: T) -> BridgeResult<HostValue> {
    value.into_host().map_err(|source| BridgeError::HostMethod {
        method: "argument conversion".to_string(),
        source,
    })
}

macro_rules! impl_host_args {
    ($($name:ident),*) => {
        impl<$($name: FromHost),*> HostArgs for ($($name,)*) {
            fn param_types() -> Vec<HostType> {
                vec![$($name::host_type()),*]
            }

            fn is_varargs() -> bool {
                let flags: &[bool] = &[$($name::is_varargs()),*];
                flags.last().copied().unwrap_or(false)
            }

            #[allow(unused_mut, unused_variables)]
            fn from_values(values: Vec<HostValue>) -> BridgeResult<Self> {
                let mut values = values.into_iter();
                Ok(($($name::from_host(values.next().unwrap_or(HostValue::Undefined))?,)*))
            }
        }

        impl<$($name: IntoHost),*> IntoHostArgs for ($($name,)*) {
            #[allow(non_snake_case)]
            fn into_host_args(self) -> BridgeResult<Vec<HostValue>> {
                let ($($name,)*) = self;
                Ok(vec![$(into_argument($name)?),*])
            }
        }
    };
}

impl_host_args!();
impl_host_args!(A);
impl_host_args!(A, B);
impl_host_args!(A, B, C);
impl_host_args!(A, B, C, D);
impl_host_args!(A, B, C, D, E);
impl_host_args!(A, B, C, D, E, F);
impl_host_args!(A, B, C, D, E, F, G);
impl_host_args!(A, B, C, D, E, F, G, H);
