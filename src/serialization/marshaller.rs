//! Marshaller, filter and configuration traits.

use crate::core::buffer::{Decoder, Encoder};
use crate::error::Result;
use crate::serialization::types::TypeDescriptor;
use crate::serialization::value::Value;
use crate::serialization::Protocol;
use std::any;
use std::fmt;
use std::sync::Arc;

/// Numeric marshaller identifier, written fixed-width before every encoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarshallerId(pub u16);

impl fmt::Display for MarshallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Converts one family of values to and from the wire format.
pub trait Marshaller: Send + Sync + 'static {
    /// Diagnostic name
    fn name(&self) -> &'static str;

    /// Self-supplied id. Marshallers without one take the id from their
    /// [`MarshallerConfiguration`].
    fn identifier(&self) -> Option<MarshallerId> {
        None
    }

    fn marshall(&self, value: &dyn Value, encoder: &mut Encoder<'_>, protocol: &Protocol) -> Result<()>;

    fn unmarshall(&self, decoder: &mut Decoder<'_>, protocol: &Protocol) -> Result<Box<dyn Value>>;

    fn as_debuggable(&self) -> Option<&dyn DebuggableMarshaller> {
        None
    }
}

/// Diagnostic capabilities over undecoded data.
pub trait DebuggableMarshaller: Marshaller {
    /// Identify the concrete type of the value at the decoder position. The
    /// marshaller id has already been consumed.
    fn find_type<'p>(&self, decoder: &mut Decoder<'_>, protocol: &'p Protocol) -> Option<&'p TypeDescriptor>;

    fn debug_value(&self, value: &dyn Value) -> String {
        format!("{:?}", value)
    }
}

/// Outcome of a filter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Rejected,
    Accepted,
    /// Accepted, and the decision holds for every value of the same concrete type.
    AcceptedAndCache,
}

/// Selects a marshaller for values whose type is not registered directly.
pub trait MarshallerFilter: Send + Sync + 'static {
    fn accept(&self, value: &dyn Value) -> FilterDecision;
}

/// Filter backed by a closure.
pub struct FnFilter<F>(F);

impl<F> MarshallerFilter for FnFilter<F>
where
    F: Fn(&dyn Value) -> FilterDecision + Send + Sync + 'static,
{
    fn accept(&self, value: &dyn Value) -> FilterDecision {
        (self.0)(value)
    }
}

pub fn filter_fn<F>(f: F) -> Arc<dyn MarshallerFilter>
where
    F: Fn(&dyn Value) -> FilterDecision + Send + Sync + 'static,
{
    Arc::new(FnFilter(f))
}

/// How a configured marshaller is selected.
#[derive(Clone)]
pub enum Selector {
    Type {
        rust_type: any::TypeId,
        name: &'static str,
    },
    Filter(Arc<dyn MarshallerFilter>),
}

/// One binding supplied by the embedding application.
#[derive(Clone)]
pub struct MarshallerConfiguration {
    pub selector: Selector,
    pub marshaller: Arc<dyn Marshaller>,
    pub id: Option<MarshallerId>,
}

impl MarshallerConfiguration {
    pub fn for_type<T: Value>(marshaller: Arc<dyn Marshaller>, id: Option<u16>) -> Self {
        Self {
            selector: Selector::Type {
                rust_type: any::TypeId::of::<T>(),
                name: any::type_name::<T>(),
            },
            marshaller,
            id: id.map(MarshallerId),
        }
    }

    pub fn for_filter(
        filter: Arc<dyn MarshallerFilter>,
        marshaller: Arc<dyn Marshaller>,
        id: Option<u16>,
    ) -> Self {
        Self {
            selector: Selector::Filter(filter),
            marshaller,
            id: id.map(MarshallerId),
        }
    }

    /// The id this binding registers under: the configured one, else the
    /// marshaller's own.
    pub fn effective_id(&self) -> Option<MarshallerId> {
        self.id.or_else(|| self.marshaller.identifier())
    }
}

impl fmt::Debug for MarshallerConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let selector = match &self.selector {
            Selector::Type { name, .. } => *name,
            Selector::Filter(_) => "<filter>",
        };
        f.debug_struct("MarshallerConfiguration")
            .field("selector", &selector)
            .field("marshaller", &self.marshaller.name())
            .field("id", &self.id)
            .finish()
    }
}
