//! Runtime registry
//!
//! One [`Registry`] is owned by the embedding runtime and handed to every
//! cache it builds. It maps factory names to constructor closures and keeps
//! one metrics sink per cache name, so nothing in the engine lives in a
//! process-wide static.

use crate::config::ConfigSnapshot;
use crate::error::{CacheError, ObjectError, Result};
use crate::metrics::CacheMetrics;
use crate::objects::{BlobFactory, CounterFactory, BLOB_CLASS, COUNTER_CLASS};
use crate::storage::{FactoryWrapper, ObjectFactory};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Builds a factory instance from the configuration in force.
pub type FactoryConstructor = Arc<
    dyn Fn(&ConfigSnapshot) -> std::result::Result<Arc<dyn ObjectFactory>, ObjectError>
        + Send
        + Sync,
>;

#[derive(Default)]
pub struct Registry {
    constructors: RwLock<HashMap<String, FactoryConstructor>>,
    metrics: RwLock<HashMap<String, Arc<CacheMetrics>>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("factories", &self.factory_names())
            .field("caches", &self.metrics.read().len())
            .finish()
    }
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the bundled `blob` and `counter` classes.
    pub fn with_bundled() -> Self {
        let registry = Self::new();
        registry.register_factory(BLOB_CLASS, |snapshot| {
            Ok(Arc::new(BlobFactory::from_snapshot(snapshot)?) as Arc<dyn ObjectFactory>)
        });
        registry.register_factory(COUNTER_CLASS, |_| {
            Ok(Arc::new(CounterFactory::new()) as Arc<dyn ObjectFactory>)
        });
        registry
    }

    /// Registers (or replaces) the constructor for `name`.
    pub fn register_factory<F>(&self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&ConfigSnapshot) -> std::result::Result<Arc<dyn ObjectFactory>, ObjectError>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        debug!(factory = %name, "Registered object factory");
        self.constructors.write().insert(name, Arc::new(constructor));
    }

    /// Looks up the constructor registered under `name`.
    pub fn resolve(&self, name: &str) -> Result<FactoryConstructor> {
        self.constructors
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError::UnknownFactory(name.to_string()))
    }

    /// Resolves `name` and builds a factory for the given configuration.
    pub fn create_factory(&self, name: &str, snapshot: &ConfigSnapshot) -> Result<FactoryWrapper> {
        let constructor = self.resolve(name)?;
        let factory = constructor(snapshot).map_err(|e| CacheError::Creation {
            key: format!("<factory {}>", name),
            reason: e.to_string(),
        })?;
        Ok(FactoryWrapper::new(name, factory))
    }

    pub fn factory_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// The metrics sink for `cache_name`, created on first use.
    pub fn metrics_for(&self, cache_name: &str) -> Arc<CacheMetrics> {
        if let Some(metrics) = self.metrics.read().get(cache_name) {
            return Arc::clone(metrics);
        }
        Arc::clone(
            self.metrics
                .write()
                .entry(cache_name.to_string())
                .or_insert_with(|| Arc::new(CacheMetrics::new())),
        )
    }
}
