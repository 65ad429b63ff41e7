use crate::error::{constants::ERR_MARSHALLER_NOT_REGISTERED, ProtocolError, Result};
use crate::serialization::marshaller::{
    FilterDecision, Marshaller, MarshallerConfiguration, MarshallerFilter, MarshallerId, Selector,
};
use crate::serialization::value::{rust_type_of, Value};
use std::any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, trace};

/// A marshaller together with the id it is written under.
#[derive(Clone)]
pub struct Binding {
    pub id: MarshallerId,
    pub marshaller: Arc<dyn Marshaller>,
}

impl Binding {
    fn same_marshaller(&self, other: &Arc<dyn Marshaller>) -> bool {
        Arc::as_ptr(&self.marshaller) as *const () == Arc::as_ptr(other) as *const ()
    }
}

/// Resolves marshallers by concrete type, by filter and by id.
///
/// The direct-type map doubles as the cache for `AcceptedAndCache` filter
/// decisions. It is the only part that changes after startup, so it sits
/// behind a `RwLock` while everything else is plain owned state.
#[derive(Default)]
pub struct MarshallerRegistry {
    by_id: HashMap<MarshallerId, Arc<dyn Marshaller>>,
    by_type: RwLock<HashMap<any::TypeId, Binding>>,
    filters: Vec<(Arc<dyn MarshallerFilter>, Binding)>,
}

impl MarshallerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one configuration entry.
    pub fn configure(&mut self, configuration: MarshallerConfiguration) -> Result<MarshallerId> {
        let id = configuration.effective_id().ok_or_else(|| {
            ProtocolError::MissingMarshallerId(configuration.marshaller.name().to_string())
        })?;
        match configuration.selector {
            Selector::Type { rust_type, name } => {
                self.register_by_type(rust_type, name, id, configuration.marshaller)?
            }
            Selector::Filter(filter) => self.register_by_filter(filter, id, configuration.marshaller)?,
        }
        Ok(id)
    }

    pub fn register_by_type(
        &mut self,
        rust_type: any::TypeId,
        type_name: &'static str,
        id: MarshallerId,
        marshaller: Arc<dyn Marshaller>,
    ) -> Result<()> {
        self.bind_id(id, &marshaller)?;

        let by_type = self.by_type.get_mut()?;
        if let Some(existing) = by_type.get(&rust_type) {
            if existing.same_marshaller(&marshaller) {
                return Ok(());
            }
            return Err(ProtocolError::DuplicateRegistration(format!(
                "{} already bound to marshaller {}",
                type_name,
                existing.marshaller.name()
            )));
        }
        debug!(type_name, marshaller = marshaller.name(), marshaller_id = id.0, "Registered marshaller by type");
        by_type.insert(rust_type, Binding { id, marshaller });
        Ok(())
    }

    pub fn register_by_filter(
        &mut self,
        filter: Arc<dyn MarshallerFilter>,
        id: MarshallerId,
        marshaller: Arc<dyn Marshaller>,
    ) -> Result<()> {
        self.bind_id(id, &marshaller)?;
        debug!(marshaller = marshaller.name(), marshaller_id = id.0, "Registered marshaller by filter");
        self.filters.push((filter, Binding { id, marshaller }));
        Ok(())
    }

    fn bind_id(&mut self, id: MarshallerId, marshaller: &Arc<dyn Marshaller>) -> Result<()> {
        if let Some(existing) = self.by_id.get(&id) {
            if Arc::as_ptr(existing) as *const () == Arc::as_ptr(marshaller) as *const () {
                return Ok(());
            }
            return Err(ProtocolError::DuplicateRegistration(format!(
                "marshaller id {} already bound to {}, cannot bind {}",
                id,
                existing.name(),
                marshaller.name()
            )));
        }
        self.by_id.insert(id, Arc::clone(marshaller));
        Ok(())
    }

    /// Marshaller for a runtime value: direct type binding or cached decision
    /// first, then filters in registration order.
    pub fn resolve(&self, value: &dyn Value) -> Result<Binding> {
        let rust_type = rust_type_of(value);
        if let Some(binding) = self.by_type.read()?.get(&rust_type) {
            return Ok(binding.clone());
        }

        for (filter, binding) in &self.filters {
            match filter.accept(value) {
                FilterDecision::Rejected => continue,
                FilterDecision::Accepted => return Ok(binding.clone()),
                FilterDecision::AcceptedAndCache => {
                    let mut by_type = self.by_type.write()?;
                    // a concurrent resolve may have cached first; keep its entry
                    let cached = by_type.entry(rust_type).or_insert_with(|| binding.clone());
                    trace!(type_name = value.type_name(), marshaller = cached.marshaller.name(), "Cached marshaller");
                    return Ok(cached.clone());
                }
            }
        }

        Err(ProtocolError::NoSuchMarshaller(value.type_name().to_string()))
    }

    pub fn by_id(&self, id: MarshallerId) -> Result<&Arc<dyn Marshaller>> {
        self.by_id.get(&id).ok_or_else(|| {
            ProtocolError::NoSuchMarshaller(format!("{} {}", ERR_MARSHALLER_NOT_REGISTERED, id))
        })
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::buffer::{Decoder, Encoder};
    use crate::serialization::marshaller::filter_fn;
    use crate::serialization::Protocol;
    use std::any::Any;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug)]
    struct Widget;
    impl Value for Widget {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct Named(&'static str);
    impl Marshaller for Named {
        fn name(&self) -> &'static str {
            self.0
        }
        fn marshall(&self, _: &dyn Value, _: &mut Encoder<'_>, _: &Protocol) -> Result<()> {
            Ok(())
        }
        fn unmarshall(&self, _: &mut Decoder<'_>, _: &Protocol) -> Result<Box<dyn Value>> {
            Ok(Box::new(Widget))
        }
    }

    #[test]
    fn test_duplicate_id_is_fatal() {
        let mut registry = MarshallerRegistry::new();
        let first: Arc<dyn Marshaller> = Arc::new(Named("first"));
        let second: Arc<dyn Marshaller> = Arc::new(Named("second"));

        registry
            .register_by_type(any::TypeId::of::<Widget>(), "Widget", MarshallerId(5), first.clone())
            .unwrap();
        // the same marshaller may serve several types under one id
        registry
            .register_by_type(any::TypeId::of::<i8>(), "i8", MarshallerId(5), first)
            .unwrap();

        let err = registry
            .register_by_filter(filter_fn(|_| FilterDecision::Accepted), MarshallerId(5), second)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::DuplicateRegistration(_)));
    }

    #[test]
    fn test_first_accepting_filter_wins() {
        let mut registry = MarshallerRegistry::new();
        registry
            .register_by_filter(filter_fn(|_| FilterDecision::Rejected), MarshallerId(1), Arc::new(Named("never")))
            .unwrap();
        registry
            .register_by_filter(filter_fn(|_| FilterDecision::Accepted), MarshallerId(2), Arc::new(Named("early")))
            .unwrap();
        registry
            .register_by_filter(filter_fn(|_| FilterDecision::AcceptedAndCache), MarshallerId(3), Arc::new(Named("late")))
            .unwrap();

        for _ in 0..3 {
            let binding = registry.resolve(&Widget).unwrap();
            assert_eq!(binding.id, MarshallerId(2));
            assert_eq!(binding.marshaller.name(), "early");
        }
    }

    #[test]
    fn test_cached_decision_survives_filter_change() {
        let enabled = Arc::new(AtomicBool::new(true));
        let toggle = Arc::clone(&enabled);

        let mut registry = MarshallerRegistry::new();
        registry
            .register_by_filter(
                filter_fn(move |_| {
                    if toggle.load(Ordering::SeqCst) {
                        FilterDecision::AcceptedAndCache
                    } else {
                        FilterDecision::Rejected
                    }
                }),
                MarshallerId(7),
                Arc::new(Named("cached")),
            )
            .unwrap();

        assert_eq!(registry.resolve(&Widget).unwrap().id, MarshallerId(7));

        enabled.store(false, Ordering::SeqCst);
        registry
            .register_by_filter(filter_fn(|_| FilterDecision::AcceptedAndCache), MarshallerId(8), Arc::new(Named("newer")))
            .unwrap();

        assert_eq!(registry.resolve(&Widget).unwrap().id, MarshallerId(7));
        // a type never resolved before follows the current filters
        assert_eq!(registry.resolve(&3i8).unwrap().id, MarshallerId(8));
    }

    #[test]
    fn test_unresolvable_and_unknown_id() {
        let registry = MarshallerRegistry::new();
        assert!(matches!(registry.resolve(&Widget), Err(ProtocolError::NoSuchMarshaller(_))));
        assert!(matches!(registry.by_id(MarshallerId(99)), Err(ProtocolError::NoSuchMarshaller(_))));
    }
}
