//! Named registry of transport factories.
//!
//! Maps backend names to factories for dynamic selection. `register`
//! overwrites silently; lookups of unregistered names fail with the
//! unknown-backend error kind.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{PynectorError, Result};
use crate::transport::factory::TransportFactory;
use crate::transport::http::HttpTransportFactory;
use crate::transport::sdk::SdkTransportFactory;
use crate::transport::{RequestOptions, Transport};

/// Registry for transport factories.
///
/// # Example
///
/// ```
/// use pynector::transport::TransportFactoryRegistry;
/// use std::collections::HashMap;
///
/// let registry = TransportFactoryRegistry::with_defaults();
/// let transport = registry.create_transport("http", &HashMap::new()).unwrap();
/// # let _ = transport;
/// ```
#[derive(Default, Clone)]
pub struct TransportFactoryRegistry {
    factories: BTreeMap<String, Arc<dyn TransportFactory>>,
}

impl TransportFactoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in backends registered:
    /// `"http"` and `"sdk"`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("http", Arc::new(HttpTransportFactory::default()));
        registry.register("sdk", Arc::new(SdkTransportFactory::default()));
        registry
    }

    /// Register a factory under `name`. A later registration under the
    /// same name replaces the earlier one.
    pub fn register(&mut self, name: impl Into<String>, factory: Arc<dyn TransportFactory>) {
        self.factories.insert(name.into(), factory);
    }

    /// Look up a factory by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn TransportFactory>> {
        self.factories
            .get(name)
            .cloned()
            .ok_or_else(|| PynectorError::UnknownBackend {
                name: name.to_string(),
                available: self.registered_names().join(", "),
            })
    }

    /// Create a transport through the factory registered under `name`.
    pub fn create_transport(
        &self,
        name: &str,
        options: &RequestOptions,
    ) -> Result<Box<dyn Transport>> {
        self.get(name)?.create_transport(options)
    }

    /// Names of all registered backends, sorted.
    pub fn registered_names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}
