//! Per-build middleware context
//!
//! One [`MiddlewareContext`] lives for the duration of a single build. Middleware can
//! read the logger, see which middleware already ran, and coordinate through the
//! [`ContextStore`]: a type-keyed map with one set-once slot per Rust type, so two
//! independent plugins cannot overwrite each other's data by picking the same key.

use crate::error::ContextError;
use crate::logger::{default_logger, Logger};
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Default)]
pub struct ContextStore {
    slots: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the slot for `T`. Fails if the slot is already set; the first value stays.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) -> Result<(), ContextError> {
        let key = TypeId::of::<T>();
        if self.slots.contains_key(&key) {
            return Err(ContextError::SlotOccupied {
                type_name: type_name::<T>(),
            });
        }
        self.slots.insert(key, Box::new(value));
        Ok(())
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.slots
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.slots.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextStore")
            .field("slots", &self.slots.len())
            .finish()
    }
}

pub struct MiddlewareContext {
    pub logger: Arc<dyn Logger>,
    /// Names of middleware that have started, in execution order
    pub middleware_names: Vec<String>,
    pub store: ContextStore,
}

impl MiddlewareContext {
    pub fn new() -> Self {
        Self::with_logger(default_logger())
    }

    pub fn with_logger(logger: Arc<dyn Logger>) -> Self {
        Self {
            logger,
            middleware_names: Vec::new(),
            store: ContextStore::new(),
        }
    }

    pub fn has_run(&self, name: &str) -> bool {
        self.middleware_names.iter().any(|n| n == name)
    }
}

impl Default for MiddlewareContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MiddlewareContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareContext")
            .field("middleware_names", &self.middleware_names)
            .field("store", &self.store)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct ExchangeNames(Vec<String>);

    #[test]
    fn slot_is_set_once_and_keeps_first_value() {
        let mut store = ContextStore::new();
        store.insert(ExchangeNames(vec!["a".into()])).unwrap();

        let err = store.insert(ExchangeNames(vec!["b".into()])).unwrap_err();
        assert!(matches!(err, ContextError::SlotOccupied { type_name } if type_name.contains("ExchangeNames")));
        assert_eq!(store.get::<ExchangeNames>(), Some(&ExchangeNames(vec!["a".into()])));
    }

    #[test]
    fn distinct_types_get_distinct_slots() {
        let mut store = ContextStore::new();
        store.insert(1u32).unwrap();
        store.insert("text").unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get::<u32>(), Some(&1));
        assert!(store.get::<u64>().is_none());
    }

    #[test]
    fn fresh_context_is_empty() {
        let context = MiddlewareContext::new();
        assert!(context.middleware_names.is_empty());
        assert!(context.store.is_empty());
        assert!(!context.has_run("anything"));
    }
}
