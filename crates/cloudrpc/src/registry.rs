use std::sync::Arc;

use dashmap::DashMap;

use crate::RpcHandler;

/// Concurrent map from wire type identifier to handler.
///
/// Lookups may run on any thread while registrations happen; a lookup sees
/// either the old or the new handler, never a partial one.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<RpcHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under its type identifier. A later registration for
    /// the same identifier replaces the earlier one, which is returned.
    pub fn register(&self, handler: RpcHandler) -> Option<Arc<RpcHandler>> {
        let name = handler.type_name().to_string();
        let previous = self.handlers.insert(name.clone(), Arc::new(handler));
        if previous.is_some() {
            tracing::debug!(type_name = %name, "replaced rpc handler");
        }
        previous
    }

    pub fn unregister(&self, type_name: &str) -> Option<Arc<RpcHandler>> {
        self.handlers.remove(type_name).map(|(_, handler)| handler)
    }

    pub fn lookup(&self, type_name: &str) -> Option<Arc<RpcHandler>> {
        self.handlers.get(type_name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.handlers.contains_key(type_name)
    }

    /// Snapshot of every registered handler.
    pub fn all(&self) -> Vec<Arc<RpcHandler>> {
        self.handlers.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry").field("handlers", &self.handlers.len()).finish()
    }
}
