//! In-memory registry of replicated collection definitions.
//!
//! Maintained by the state machine as `CreateCollection` / `DropCollection`
//! commands are applied, and consulted by the write path to reject
//! dimension-mismatched inserts before they reach consensus. Best-effort
//! after a restart or snapshot restore: a miss only degrades validation, the
//! backend remains the source of truth and still rejects at apply time.

use crate::backend::types::CollectionSpec;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Clone, Default)]
pub struct CollectionCatalog {
    inner: Arc<RwLock<HashMap<String, CollectionSpec>>>,
}

impl CollectionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, spec: CollectionSpec) {
        self.inner.write().unwrap().insert(spec.name.clone(), spec);
    }

    pub fn remove(&self, name: &str) {
        self.inner.write().unwrap().remove(name);
    }

    pub fn get(&self, name: &str) -> Option<CollectionSpec> {
        self.inner.read().unwrap().get(name).cloned()
    }

    pub fn dimension_of(&self, name: &str) -> Option<i32> {
        self.inner.read().unwrap().get(name).map(|s| s.dimension)
    }

    /// Forget everything. Called after a snapshot restore replaces the
    /// backend state underneath us.
    pub fn clear(&self) {
        self.inner.write().unwrap().clear();
    }
}
