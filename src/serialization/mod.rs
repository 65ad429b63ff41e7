//! # Serialization Protocol
//!
//! Typed binary encoding of registered values.
//!
//! ## Components
//! - **TypeRegistry**: domain types ↔ compact [`TypeId`]s, loaded from manifests
//! - **MarshallerRegistry**: marshaller ids ↔ [`Marshaller`]s, plus filter based
//!   resolution with a per-type cache
//! - **Protocol**: the codec engine tying both together
//!
//! ## Wire Format
//! ```text
//! value    : [marshaller id: u16 BE][marshaller payload]
//! type tag : [type id: u16 BE]   (written by marshallers of polymorphic values)
//! ```
//!
//! Marshaller ids and type ids are separate id spaces.

pub mod builtin;
pub mod marshaller;
pub mod protocol;
pub mod registry;
pub mod types;
pub mod value;

pub use marshaller::{
    filter_fn, DebuggableMarshaller, FilterDecision, Marshaller, MarshallerConfiguration,
    MarshallerFilter, MarshallerId, Selector,
};
pub use protocol::{Protocol, ProtocolBuilder};
pub use registry::{Binding, MarshallerRegistry};
pub use types::{TypeCatalog, TypeDescriptor, TypeId, TypeRegistry};
pub use value::{downcast_value, Enumerable, Marshallable, Value};
