//! Method name → handler registry for one session.

use crate::domain::error::RpcError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Type-erased handler: positional structured values in, structured value or failure out.
pub type BoxedHandler =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Handlers registered on one processor.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, BoxedHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler. Fails with `DuplicateHandler` if the name is taken.
    pub fn insert(&self, method: &str, handler: BoxedHandler) -> Result<(), RpcError> {
        match self.handlers.entry(method.to_string()) {
            Entry::Occupied(_) => Err(RpcError::DuplicateHandler(method.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(handler);
                debug!(method = method, "Registered handler");
                Ok(())
            }
        }
    }

    /// Clone out the handler so no map guard is held while it runs.
    pub fn get(&self, method: &str) -> Option<BoxedHandler> {
        self.handlers.get(method).map(|h| Arc::clone(h.value()))
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn clear(&self) {
        self.handlers.clear();
    }
}
