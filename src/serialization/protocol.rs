use crate::core::buffer::{Decoder, Encoder};
use crate::error::{ProtocolError, Result};
use crate::serialization::builtin;
use crate::serialization::marshaller::{MarshallerConfiguration, MarshallerId};
use crate::serialization::registry::MarshallerRegistry;
use crate::serialization::types::{TypeCatalog, TypeDescriptor, TypeId, TypeRegistry};
use crate::serialization::value::{downcast_value, Value};
use bytes::{Bytes, BytesMut};
use std::any;
use std::path::Path;
use tracing::{debug, info};

/// Codec engine combining the type and marshaller registries.
///
/// Built once through [`ProtocolBuilder`] and shared behind an `Arc`. Every
/// value is written as `[marshaller id: u16 BE][marshaller payload]`.
pub struct Protocol {
    types: TypeRegistry,
    marshallers: MarshallerRegistry,
}

impl Protocol {
    pub fn builder() -> ProtocolBuilder {
        ProtocolBuilder::default()
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn marshallers(&self) -> &MarshallerRegistry {
        &self.marshallers
    }

    /// Write `value` tagged with its marshaller id. On failure nothing is left
    /// in the encoder.
    pub fn encode(&self, value: &dyn Value, encoder: &mut Encoder<'_>) -> Result<()> {
        let start = encoder.len();
        let result = self.marshallers.resolve(value).and_then(|binding| {
            encoder.write_u16(binding.id.0);
            binding.marshaller.marshall(value, encoder, self)
        });
        if result.is_err() {
            encoder.truncate(start);
        }
        result
    }

    /// Read one value. On failure the decoder position is restored.
    pub fn decode(&self, decoder: &mut Decoder<'_>) -> Result<Box<dyn Value>> {
        let start = decoder.position();
        let result = self.decode_inner(decoder);
        if result.is_err() {
            decoder.set_position(start);
        }
        result
    }

    fn decode_inner(&self, decoder: &mut Decoder<'_>) -> Result<Box<dyn Value>> {
        let id = MarshallerId(decoder.read_u16()?);
        self.marshallers.by_id(id)?.unmarshall(decoder, self)
    }

    pub fn decode_as<T: Value + Clone>(&self, decoder: &mut Decoder<'_>) -> Result<T> {
        let start = decoder.position();
        let value = self.decode(decoder)?;
        match downcast_value::<T>(value.as_ref()) {
            Ok(typed) => Ok(typed.clone()),
            Err(e) => {
                decoder.set_position(start);
                Err(e)
            }
        }
    }

    /// `0` for absent, else `1` followed by the encoded value.
    pub fn encode_nullable(&self, value: Option<&dyn Value>, encoder: &mut Encoder<'_>) -> Result<()> {
        match value {
            None => {
                encoder.write_u8(0);
                Ok(())
            }
            Some(value) => {
                encoder.write_u8(1);
                self.encode(value, encoder)
            }
        }
    }

    pub fn decode_nullable(&self, decoder: &mut Decoder<'_>) -> Result<Option<Box<dyn Value>>> {
        match decoder.read_u8()? {
            0 => Ok(None),
            _ => self.decode(decoder).map(Some),
        }
    }

    pub fn encode_to_bytes(&self, value: &dyn Value) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        self.encode(value, &mut Encoder::new(&mut buf))?;
        Ok(buf.freeze())
    }

    /// Tag which concrete type `value` is, in the type id space.
    pub fn write_type_id(&self, value: &dyn Value, encoder: &mut Encoder<'_>) -> Result<()> {
        let id = self.types.id_of_value(value)?;
        encoder.write_u16(id.0);
        Ok(())
    }

    pub fn write_type_id_of<T: any::Any>(&self, encoder: &mut Encoder<'_>) -> Result<()> {
        let id = self.types.id_of_type::<T>()?;
        encoder.write_u16(id.0);
        Ok(())
    }

    pub fn read_type_id(&self, decoder: &mut Decoder<'_>) -> Result<&TypeDescriptor> {
        let id = TypeId(decoder.read_u16()?);
        self.types.type_of(id)
    }

    /// Read a type id, then the value through that type's registered reader.
    pub fn read_typed_value(&self, decoder: &mut Decoder<'_>) -> Result<Box<dyn Value>> {
        let descriptor = self.read_type_id(decoder)?;
        descriptor.read(decoder, self)
    }

    /// Lookahead for the type of the next value; the decoder position is
    /// unchanged afterwards.
    ///
    /// A leading id naming a registered type resolves directly. Otherwise it
    /// is taken as a marshaller id and that marshaller's `find_type` decides.
    pub fn peek_type(&self, decoder: &mut Decoder<'_>) -> Option<&TypeDescriptor> {
        let start = decoder.position();
        let found = self.peek_type_inner(decoder);
        decoder.set_position(start);
        found
    }

    fn peek_type_inner(&self, decoder: &mut Decoder<'_>) -> Option<&TypeDescriptor> {
        let id = decoder.read_u16().ok()?;
        if let Some(descriptor) = self.types.find(TypeId(id)) {
            return Some(descriptor);
        }
        let marshaller = self.marshallers.by_id(MarshallerId(id)).ok()?;
        marshaller.as_debuggable()?.find_type(decoder, self)
    }

    /// Render the next value for diagnostics without consuming it.
    pub fn debug_value(&self, decoder: &mut Decoder<'_>) -> Result<String> {
        let start = decoder.position();
        let rendered = self.debug_value_inner(decoder);
        decoder.set_position(start);
        rendered
    }

    fn debug_value_inner(&self, decoder: &mut Decoder<'_>) -> Result<String> {
        let id = MarshallerId(decoder.read_u16()?);
        let marshaller = self.marshallers.by_id(id)?;
        let value = marshaller.unmarshall(decoder, self)?;
        Ok(match marshaller.as_debuggable() {
            Some(debuggable) => debuggable.debug_value(value.as_ref()),
            None => format!("{:?}", value),
        })
    }
}

/// Collects registrations and builds an immutable [`Protocol`].
///
/// Types come from manifests in the order given, then explicit descriptors.
/// Built-in marshallers are registered ahead of application configurations,
/// so their filters are consulted first.
#[derive(Default)]
pub struct ProtocolBuilder {
    catalog: TypeCatalog,
    manifests: Vec<String>,
    types: Vec<TypeDescriptor>,
    configurations: Vec<MarshallerConfiguration>,
}

impl ProtocolBuilder {
    /// Make a descriptor resolvable by name from manifests.
    pub fn catalog(mut self, descriptor: TypeDescriptor) -> Self {
        self.catalog.insert(descriptor);
        self
    }

    /// Add a line-oriented manifest of type names.
    pub fn manifest(mut self, text: impl Into<String>) -> Self {
        self.manifests.push(text.into());
        self
    }

    pub fn manifest_file<P: AsRef<Path>>(self, path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ProtocolError::ConfigError(format!(
                "failed to read manifest {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Ok(self.manifest(text))
    }

    pub fn register_type(mut self, descriptor: TypeDescriptor) -> Self {
        self.types.push(descriptor);
        self
    }

    pub fn marshaller(mut self, configuration: MarshallerConfiguration) -> Self {
        self.configurations.push(configuration);
        self
    }

    pub fn build(self) -> Result<Protocol> {
        let mut types = TypeRegistry::new();
        for manifest in &self.manifests {
            types.load_manifest(manifest.as_bytes(), &self.catalog)?;
        }
        for descriptor in self.types {
            types.register(descriptor)?;
        }

        let mut marshallers = MarshallerRegistry::new();
        for configuration in builtin::builtin_marshallers() {
            marshallers.configure(configuration)?;
        }
        for configuration in self.configurations {
            debug!(configuration = ?configuration, "Applying marshaller configuration");
            marshallers.configure(configuration)?;
        }

        info!(
            types = types.len(),
            marshallers = marshallers.len(),
            "Protocol built"
        );
        Ok(Protocol { types, marshallers })
    }
}
