//! Collection registry.
//!
//! Collections are registered on a [`RegistryBuilder`] during start-up, then
//! sealed into an immutable [`Registry`] that the server shares as
//! `Arc<Registry>` across every connection without locking.

mod collection;
mod function;
pub mod params;

pub use collection::{Collection, CollectionSummary, DispatchHook, FunctionSummary};
pub use function::{
    blocking, BlockingHandler, CallContext, FunctionDescriptor, Handler, HandlerError,
    HandlerResult,
};

use crate::builtin;
use crate::{ProcallError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Mutable registry used while the host wires up its collections.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    collections: HashMap<String, Collection>,
    system: bool,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a collection. A name that is already taken is a start-up error.
    pub fn register_collection(&mut self, collection: Collection) -> Result<()> {
        if self.collections.contains_key(collection.name()) {
            return Err(ProcallError::DuplicateCollection {
                name: collection.name().to_string(),
            });
        }
        debug!(
            "Registered collection {} ({} functions)",
            collection.name(),
            collection.len()
        );
        self.collections
            .insert(collection.name().to_string(), collection);
        Ok(())
    }

    pub fn with_collection(mut self, collection: Collection) -> Result<Self> {
        self.register_collection(collection)?;
        Ok(self)
    }

    /// Install the built-in `System` collection when sealing.
    pub fn with_system(mut self) -> Self {
        self.system = true;
        self
    }

    /// Freeze the registry. No collection can be added afterwards.
    pub fn seal(mut self) -> Result<Registry> {
        let description = if self.system {
            let (system, description) = builtin::system_collection()?;
            self.register_collection(system)?;
            Some(description)
        } else {
            None
        };

        let registry = Registry {
            collections: self.collections,
        };

        if let Some(description) = description {
            let json = serde_json::to_string(&registry.summaries())?;
            // Only this function fills the cell.
            let _ = description.set(json);
        }

        info!(
            "Registry sealed with {} collections",
            registry.collections.len()
        );
        Ok(registry)
    }
}

/// Immutable name -> collection -> function lookup.
#[derive(Debug)]
pub struct Registry {
    collections: HashMap<String, Collection>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn collection(&self, name: &str) -> Option<&Collection> {
        self.collections.get(name)
    }

    /// All collections, sorted by name.
    pub fn collections(&self) -> Vec<&Collection> {
        let mut collections: Vec<&Collection> = self.collections.values().collect();
        collections.sort_by(|a, b| a.name().cmp(b.name()));
        collections
    }

    /// Look up a function. Repeated calls return the same descriptor.
    pub fn resolve(&self, collection: &str, function: &str) -> Result<&Arc<FunctionDescriptor>> {
        self.lookup(collection, function).map(|(_, descriptor)| descriptor)
    }

    pub(crate) fn lookup(
        &self,
        collection: &str,
        function: &str,
    ) -> Result<(&Collection, &Arc<FunctionDescriptor>)> {
        let found = self
            .collections
            .get(collection)
            .ok_or_else(|| ProcallError::NotFound {
                message: format!("Unknown collection: {}", collection),
            })?;
        let descriptor = found
            .get(function)
            .ok_or_else(|| ProcallError::NotFound {
                message: format!("Unknown function: {}.{}", collection, function),
            })?;
        Ok((found, descriptor))
    }

    pub fn summaries(&self) -> Vec<CollectionSummary> {
        self.collections()
            .into_iter()
            .map(Collection::summary)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}
