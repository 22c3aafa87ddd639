//! Per-session cache of resolved type system metadata.

use crate::commands::{FieldInfo, MethodInfo, TypeInfo};
use crate::error::Result;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Inner {
    /// Bumped on every clear, so a lookup that straddles a disconnect does
    /// not repopulate the next session.
    epoch: u64,
    types: HashMap<u32, TypeInfo>,
    fields: HashMap<u32, FieldInfo>,
    methods: HashMap<u32, MethodInfo>,
}

#[derive(Default)]
pub(crate) struct TypeCache {
    inner: Mutex<Inner>,
}

impl TypeCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn clear(&self) {
        let mut inner = self.lock();
        inner.epoch += 1;
        inner.types.clear();
        inner.fields.clear();
        inner.methods.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        let inner = self.lock();
        inner.types.len() + inner.fields.len() + inner.methods.len()
    }

    pub(crate) fn type_info(&self, index: u32, fetch: impl FnOnce() -> Result<TypeInfo>) -> Result<TypeInfo> {
        self.cached(index, |inner| &mut inner.types, fetch)
    }

    pub(crate) fn field_info(&self, index: u32, fetch: impl FnOnce() -> Result<FieldInfo>) -> Result<FieldInfo> {
        self.cached(index, |inner| &mut inner.fields, fetch)
    }

    pub(crate) fn method_info(&self, index: u32, fetch: impl FnOnce() -> Result<MethodInfo>) -> Result<MethodInfo> {
        self.cached(index, |inner| &mut inner.methods, fetch)
    }

    /// Look `key` up, fetching it without holding the lock on a miss.
    fn cached<K, V>(
        &self,
        key: K,
        map: impl Fn(&mut Inner) -> &mut HashMap<K, V>,
        fetch: impl FnOnce() -> Result<V>,
    ) -> Result<V>
    where
        K: Eq + Hash,
        V: Clone,
    {
        let epoch = {
            let mut inner = self.lock();
            if let Some(value) = map(&mut *inner).get(&key) {
                return Ok(value.clone());
            }
            inner.epoch
        };
        let value = fetch()?;
        let mut inner = self.lock();
        if inner.epoch == epoch {
            map(&mut *inner).insert(key, value.clone());
        }
        Ok(value)
    }
}
