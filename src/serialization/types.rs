//! Type ids and the registry mapping Rust types to them.
//!
//! Type ids live in their own id space, separate from marshaller ids. They tag
//! which concrete type a polymorphic field holds and are written with
//! [`Protocol::write_type_id`](crate::serialization::Protocol::write_type_id).

use crate::core::buffer::Decoder;
use crate::error::{constants::ERR_TYPE_NOT_REGISTERED, ProtocolError, Result};
use crate::serialization::value::{rust_type_of, Enumerable, Marshallable, Value};
use crate::serialization::Protocol;
use std::any;
use std::collections::HashMap;
use std::fmt;
use std::io::BufRead;
use tracing::debug;

/// Stable numeric identifier of a registered domain type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u16);

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Builds a value of a registered type from its remaining wire fields.
pub type ReaderFn = fn(&mut Decoder<'_>, &Protocol) -> Result<Box<dyn Value>>;

/// Builds an enumerable value from its flag.
pub type FlagFn = fn(i32) -> Option<Box<dyn Value>>;

/// Registration metadata for one domain type.
#[derive(Clone)]
pub struct TypeDescriptor {
    name: &'static str,
    rust_type: any::TypeId,
    type_id: Option<TypeId>,
    reader: Option<ReaderFn>,
    from_flag: Option<FlagFn>,
}

fn read_marshallable<T: Marshallable>(
    decoder: &mut Decoder<'_>,
    protocol: &Protocol,
) -> Result<Box<dyn Value>> {
    Ok(Box::new(T::unmarshall(decoder, protocol)?))
}

fn enumerable_from_flag<T: Enumerable>(flag: i32) -> Option<Box<dyn Value>> {
    T::from_flag(flag).map(|value| Box::new(value) as Box<dyn Value>)
}

impl TypeDescriptor {
    /// A plain type carried by a dedicated marshaller.
    pub fn new<T: Value>(name: &'static str, id: u16) -> Self {
        Self {
            name,
            rust_type: any::TypeId::of::<T>(),
            type_id: Some(TypeId(id)),
            reader: None,
            from_flag: None,
        }
    }

    /// A type that never declared an id. Registering it fails.
    pub fn without_id<T: Value>(name: &'static str) -> Self {
        Self {
            name,
            rust_type: any::TypeId::of::<T>(),
            type_id: None,
            reader: None,
            from_flag: None,
        }
    }

    /// A self-encoding type; its reader is `T::unmarshall`.
    pub fn marshallable<T: Marshallable>(name: &'static str, id: u16) -> Self {
        Self {
            reader: Some(read_marshallable::<T>),
            ..Self::new::<T>(name, id)
        }
    }

    /// An enum-like type rebuilt from its flag.
    pub fn enumerable<T: Enumerable>(name: &'static str, id: u16) -> Self {
        Self {
            from_flag: Some(enumerable_from_flag::<T>),
            ..Self::new::<T>(name, id)
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn rust_type(&self) -> any::TypeId {
        self.rust_type
    }

    pub fn type_id(&self) -> Option<TypeId> {
        self.type_id
    }

    /// Read a value of this type using its registered reader.
    pub fn read(&self, decoder: &mut Decoder<'_>, protocol: &Protocol) -> Result<Box<dyn Value>> {
        let reader = self.reader.ok_or_else(|| {
            ProtocolError::UnknownType(format!("{} has no reader", self.name))
        })?;
        reader(decoder, protocol)
    }

    /// Construct a value of this type from an enumerable flag.
    pub fn construct_from_flag(&self, flag: i32) -> Result<Box<dyn Value>> {
        let from_flag = self.from_flag.ok_or_else(|| {
            ProtocolError::UnknownType(format!("{} is not enumerable", self.name))
        })?;
        from_flag(flag)
            .ok_or_else(|| ProtocolError::UnknownType(format!("{} flag {}", self.name, flag)))
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("type_id", &self.type_id)
            .field("marshallable", &self.reader.is_some())
            .field("enumerable", &self.from_flag.is_some())
            .finish()
    }
}

/// Named descriptors available to manifests.
#[derive(Debug, Default, Clone)]
pub struct TypeCatalog {
    entries: HashMap<&'static str, TypeDescriptor>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, descriptor: TypeDescriptor) {
        self.entries.insert(descriptor.name, descriptor);
    }

    pub fn get(&self, name: &str) -> Option<&TypeDescriptor> {
        self.entries.get(name)
    }
}

/// Bijective mapping between Rust types and [`TypeId`]s.
///
/// Populated while a protocol is built and read-only afterwards, so lookups
/// need no locking.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    by_id: HashMap<TypeId, TypeDescriptor>,
    by_rust_type: HashMap<any::TypeId, TypeId>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a descriptor to its declared id.
    ///
    /// Re-registering the same binding is accepted; binding either side to a
    /// different counterpart fails with `DuplicateRegistration`.
    pub fn register(&mut self, descriptor: TypeDescriptor) -> Result<TypeId> {
        let id = descriptor
            .type_id
            .ok_or_else(|| ProtocolError::MissingTypeId(descriptor.name.to_string()))?;

        if let Some(existing) = self.by_id.get(&id) {
            if existing.rust_type == descriptor.rust_type {
                return Ok(id);
            }
            return Err(ProtocolError::DuplicateRegistration(format!(
                "type id {} already bound to {}, cannot bind {}",
                id, existing.name, descriptor.name
            )));
        }
        if let Some(existing) = self.by_rust_type.get(&descriptor.rust_type) {
            return Err(ProtocolError::DuplicateRegistration(format!(
                "type {} already bound to id {}, cannot bind {}",
                descriptor.name, existing, id
            )));
        }

        debug!(type_name = descriptor.name, type_id = id.0, "Registered type");
        self.by_rust_type.insert(descriptor.rust_type, id);
        self.by_id.insert(id, descriptor);
        Ok(id)
    }

    /// Register every type named by a line-oriented manifest.
    ///
    /// Lines are trimmed; blank lines and `#` comments are skipped. Returns the
    /// number of entries read.
    pub fn load_manifest<R: BufRead>(&mut self, reader: R, catalog: &TypeCatalog) -> Result<usize> {
        let mut count = 0;
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let name = line.trim();
            if name.is_empty() || name.starts_with('#') {
                continue;
            }
            let descriptor = catalog.get(name).ok_or_else(|| {
                ProtocolError::ConfigError(format!(
                    "manifest line {}: unknown type '{}'",
                    index + 1,
                    name
                ))
            })?;
            self.register(descriptor.clone())?;
            count += 1;
        }
        Ok(count)
    }

    pub fn id_of(&self, rust_type: any::TypeId) -> Option<TypeId> {
        self.by_rust_type.get(&rust_type).copied()
    }

    pub fn id_of_type<T: any::Any>(&self) -> Result<TypeId> {
        self.id_of(any::TypeId::of::<T>()).ok_or_else(|| {
            ProtocolError::UnknownType(format!("{}: {}", ERR_TYPE_NOT_REGISTERED, any::type_name::<T>()))
        })
    }

    pub fn id_of_value(&self, value: &dyn Value) -> Result<TypeId> {
        self.id_of(rust_type_of(value)).ok_or_else(|| {
            ProtocolError::UnknownType(format!("{}: {}", ERR_TYPE_NOT_REGISTERED, value.type_name()))
        })
    }

    pub fn find(&self, id: TypeId) -> Option<&TypeDescriptor> {
        self.by_id.get(&id)
    }

    pub fn type_of(&self, id: TypeId) -> Result<&TypeDescriptor> {
        self.find(id)
            .ok_or_else(|| ProtocolError::UnknownType(format!("type id {}", id)))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
