//! Runtime values the codec engine can carry.
//!
//! Anything sent through a [`Protocol`] implements [`Value`]. Types that encode
//! themselves implement [`Marshallable`]; enum-like types with a stable numeric
//! flag implement [`Enumerable`]. Both capabilities are discovered at runtime by
//! the built-in marshaller filters.

use crate::core::buffer::{Decoder, Encoder};
use crate::error::{ProtocolError, Result};
use crate::serialization::Protocol;
use std::any::{self, Any};
use std::fmt::Debug;

/// Object-safe view over any encodable value.
///
/// Implementations only need `as_any`, usually `fn as_any(&self) -> &dyn Any { self }`.
pub trait Value: Any + Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn type_name(&self) -> &'static str {
        any::type_name::<Self>()
    }

    fn as_marshallable(&self) -> Option<&dyn Marshallable> {
        None
    }

    fn as_enumerable(&self) -> Option<&dyn Enumerable> {
        None
    }
}

/// A type that writes and reads its own fields.
///
/// The marshaller for these values tags the payload with the type's registered
/// [`TypeId`](crate::serialization::TypeId), so the type must be registered
/// with [`TypeDescriptor::marshallable`](crate::serialization::TypeDescriptor::marshallable).
pub trait Marshallable: Value {
    fn marshall(&self, encoder: &mut Encoder<'_>, protocol: &Protocol) -> Result<()>;

    fn unmarshall(decoder: &mut Decoder<'_>, protocol: &Protocol) -> Result<Self>
    where
        Self: Sized;
}

/// An enum-like type identified on the wire by its type id and an `i32` flag.
pub trait Enumerable: Value {
    fn flag(&self) -> i32;

    fn from_flag(flag: i32) -> Option<Self>
    where
        Self: Sized;
}

/// Rust type identity of a runtime value
pub(crate) fn rust_type_of(value: &dyn Value) -> any::TypeId {
    value.as_any().type_id()
}

/// Downcast a runtime value, failing with a typed error instead of panicking.
pub fn downcast_value<T: Value>(value: &dyn Value) -> Result<&T> {
    value
        .as_any()
        .downcast_ref::<T>()
        .ok_or(ProtocolError::UnexpectedValue {
            expected: any::type_name::<T>(),
            found: value.type_name(),
        })
}

impl Value for i8 {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Value for i16 {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Value for i32 {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Value for i64 {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Value for f32 {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Value for f64 {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Value for bool {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Value for String {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Value for Vec<u8> {
    fn as_any(&self) -> &dyn Any {
        self
    }
}
