//! Provider registry -- a named collection of available KanbanProvider
//! adapters.
//!
//! Allows the ProjectBuilder and Scheduler to look up a provider by name at
//! runtime (e.g. a project's `provider` field, "github-projects").

use std::collections::HashMap;

use super::KanbanProvider;

/// A collection of registered [`KanbanProvider`] implementations, keyed by
/// name.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Box<dyn KanbanProvider>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider adapter. If a provider with the same name is
    /// already registered, it is replaced and the old one is returned.
    pub fn register(
        &mut self,
        provider: impl KanbanProvider + 'static,
    ) -> Option<Box<dyn KanbanProvider>> {
        let name = provider.name().to_string();
        self.providers.insert(name, Box::new(provider))
    }

    /// Look up a provider by name.
    pub fn get(&self, name: &str) -> Option<&dyn KanbanProvider> {
        self.providers.get(name).map(|b| b.as_ref())
    }

    /// List the names of all registered providers. Order is not
    /// guaranteed.
    pub fn list(&self) -> Vec<&str> {
        self.providers.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}
