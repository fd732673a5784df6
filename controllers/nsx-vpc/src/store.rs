//! In-memory mirror of NSX resources owned by this cluster.
//!
//! A [`ResourceStore`] is keyed by a per-type key (usually the policy path)
//! and maintains any number of secondary indexes computed from the object
//! (owner UID tag, parent path, ...). Stores are populated from NSX at
//! startup and updated by the owning service after every successful NSX
//! write. Readers never see a partially applied update.

use nsx_client::{
    LbService, SubnetConnectionBindingMap, SubnetPort, Tag, Vpc, VpcSubnet, combine_key, find_tag,
    vpc_id_from_path,
};
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

/// Errors raised by a [`ResourceStore`]
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store lock poisoned")]
    Poisoned,

    #[error("unknown index {0}")]
    UnknownIndex(String),

    #[error("object has no store key: {0}")]
    MissingKey(String),
}

/// Object that can live in a [`ResourceStore`]
pub trait StoreResource: Clone + Send + Sync + 'static {
    /// Primary key; an empty key is rejected
    fn store_key(&self) -> String;
}

/// Object carrying NSX tags
pub trait HasTags {
    fn tags(&self) -> &[Tag];
}

/// Secondary index function: every value returned indexes the object
pub type IndexFn<T> = Box<dyn Fn(&T) -> Vec<String> + Send + Sync>;

struct StoreInner<T> {
    items: HashMap<String, T>,
    indices: HashMap<&'static str, HashMap<String, HashSet<String>>>,
}

/// Keyed, indexed, thread-safe resource cache
pub struct ResourceStore<T: StoreResource> {
    inner: RwLock<StoreInner<T>>,
    indexers: HashMap<&'static str, IndexFn<T>>,
}

impl<T: StoreResource> std::fmt::Debug for ResourceStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceStore")
            .field("len", &self.len())
            .field("indexes", &self.indexers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<T: StoreResource> Default for ResourceStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: StoreResource> ResourceStore<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                items: HashMap::new(),
                indices: HashMap::new(),
            }),
            indexers: HashMap::new(),
        }
    }

    /// Register a secondary index. Must be called before the store is populated.
    #[must_use]
    pub fn with_index(mut self, name: &'static str, index: IndexFn<T>) -> Self {
        self.indexers.insert(name, index);
        self
    }

    /// Insert or replace an object
    pub fn apply(&self, item: T) -> Result<(), StoreError> {
        let key = item.store_key();
        if key.is_empty() {
            return Err(StoreError::MissingKey(std::any::type_name::<T>().to_string()));
        }
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        if let Some(old) = inner.items.remove(&key) {
            self.unindex(&mut inner, &key, &old);
        }
        self.index(&mut inner, &key, &item);
        inner.items.insert(key, item);
        Ok(())
    }

    /// Remove an object by key, returning it when present
    pub fn delete(&self, key: &str) -> Result<Option<T>, StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        let removed = inner.items.remove(key);
        if let Some(old) = &removed {
            self.unindex(&mut inner, key, old);
        }
        Ok(removed)
    }

    /// Replace the whole content (startup sync)
    pub fn replace_all(&self, items: Vec<T>) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        inner.items.clear();
        inner.indices.clear();
        for item in items {
            let key = item.store_key();
            if key.is_empty() {
                continue;
            }
            self.index(&mut inner, &key, &item);
            inner.items.insert(key, item);
        }
        Ok(())
    }

    pub fn get_by_key(&self, key: &str) -> Option<T> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.items.get(key).cloned()
    }

    pub fn list(&self) -> Vec<T> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.items.values().cloned().collect()
    }

    pub fn keys(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.items.keys().cloned().collect()
    }

    /// Objects whose index `name` contains `value`
    pub fn by_index(&self, name: &str, value: &str) -> Result<Vec<T>, StoreError> {
        if !self.indexers.contains_key(name) {
            return Err(StoreError::UnknownIndex(name.to_string()));
        }
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let Some(keys) = inner.indices.get(name).and_then(|idx| idx.get(value)) else {
            return Ok(Vec::new());
        };
        Ok(keys.iter().filter_map(|k| inner.items.get(k).cloned()).collect())
    }

    /// Distinct values currently present in index `name`
    pub fn index_values(&self, name: &str) -> Result<Vec<String>, StoreError> {
        if !self.indexers.contains_key(name) {
            return Err(StoreError::UnknownIndex(name.to_string()));
        }
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner
            .indices
            .get(name)
            .map(|idx| idx.keys().cloned().collect())
            .unwrap_or_default())
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn index(&self, inner: &mut StoreInner<T>, key: &str, item: &T) {
        for (name, indexer) in &self.indexers {
            let idx = inner.indices.entry(*name).or_default();
            for value in indexer(item) {
                idx.entry(value).or_default().insert(key.to_string());
            }
        }
    }

    fn unindex(&self, inner: &mut StoreInner<T>, key: &str, item: &T) {
        for (name, indexer) in &self.indexers {
            let Some(idx) = inner.indices.get_mut(name) else {
                continue;
            };
            for value in indexer(item) {
                if let Some(keys) = idx.get_mut(&value) {
                    keys.remove(key);
                    if keys.is_empty() {
                        idx.remove(&value);
                    }
                }
            }
        }
    }
}

/// Index on the value of a tag scope
pub fn tag_index<T: HasTags + 'static>(scope: &'static str) -> IndexFn<T> {
    Box::new(move |item: &T| {
        find_tag(item.tags(), scope)
            .filter(|v| !v.is_empty())
            .map(|v| vec![v.to_string()])
            .unwrap_or_default()
    })
}

impl HasTags for Vpc {
    fn tags(&self) -> &[Tag] {
        &self.tags
    }
}

impl HasTags for VpcSubnet {
    fn tags(&self) -> &[Tag] {
        &self.tags
    }
}

impl HasTags for SubnetPort {
    fn tags(&self) -> &[Tag] {
        &self.tags
    }
}

impl HasTags for SubnetConnectionBindingMap {
    fn tags(&self) -> &[Tag] {
        &self.tags
    }
}

impl HasTags for LbService {
    fn tags(&self) -> &[Tag] {
        &self.tags
    }
}

impl StoreResource for Vpc {
    fn store_key(&self) -> String {
        self.path.clone()
    }
}

/// Load balancer services are keyed `{vpc_id}_{lbs_id}`
impl StoreResource for LbService {
    fn store_key(&self) -> String {
        match self.connectivity_path.as_deref().and_then(vpc_id_from_path) {
            Some(vpc_id) => combine_key(vpc_id, &self.id),
            None => self.id.clone(),
        }
    }
}

impl StoreResource for VpcSubnet {
    fn store_key(&self) -> String {
        self.path.clone()
    }
}

impl StoreResource for SubnetPort {
    fn store_key(&self) -> String {
        self.path.clone()
    }
}

impl StoreResource for SubnetConnectionBindingMap {
    fn store_key(&self) -> String {
        self.path.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subnet(path: &str, owner: &str) -> VpcSubnet {
        VpcSubnet {
            id: path.rsplit('/').next().unwrap_or_default().to_string(),
            path: path.to_string(),
            tags: vec![Tag::new("nsx-op/subnetset_uid", owner)],
            ..Default::default()
        }
    }

    fn store() -> ResourceStore<VpcSubnet> {
        ResourceStore::new().with_index("owner", tag_index("nsx-op/subnetset_uid"))
    }

    #[test]
    fn test_apply_and_index_lookup() {
        let store = store();
        store.apply(subnet("/v/subnets/a", "uid-1")).unwrap();
        store.apply(subnet("/v/subnets/b", "uid-1")).unwrap();
        store.apply(subnet("/v/subnets/c", "uid-2")).unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.by_index("owner", "uid-1").unwrap().len(), 2);
        assert_eq!(store.by_index("owner", "uid-3").unwrap().len(), 0);
        assert!(matches!(store.by_index("missing", "x"), Err(StoreError::UnknownIndex(_))));
    }

    #[test]
    fn test_reapply_moves_index_entry() {
        let store = store();
        store.apply(subnet("/v/subnets/a", "uid-1")).unwrap();
        store.apply(subnet("/v/subnets/a", "uid-2")).unwrap();

        assert!(store.by_index("owner", "uid-1").unwrap().is_empty());
        assert_eq!(store.by_index("owner", "uid-2").unwrap().len(), 1);
        assert_eq!(store.index_values("owner").unwrap(), vec!["uid-2".to_string()]);
    }

    #[test]
    fn test_delete_unindexes() {
        let store = store();
        store.apply(subnet("/v/subnets/a", "uid-1")).unwrap();
        let removed = store.delete("/v/subnets/a").unwrap();

        assert!(removed.is_some());
        assert!(store.is_empty());
        assert!(store.by_index("owner", "uid-1").unwrap().is_empty());
        assert!(store.delete("/v/subnets/a").unwrap().is_none());
    }

    #[test]
    fn test_empty_key_rejected() {
        let store = store();
        assert!(matches!(store.apply(VpcSubnet::default()), Err(StoreError::MissingKey(_))));
    }

    #[test]
    fn test_lb_service_key_combines_vpc_id() {
        let lbs = LbService {
            id: "default".to_string(),
            connectivity_path: Some("/orgs/o/projects/p/vpcs/vpc-1".to_string()),
            ..Default::default()
        };
        assert_eq!(lbs.store_key(), "vpc-1_default");
    }

    #[test]
    fn test_poisoned_store_rejects_writes() {
        let store = std::sync::Arc::new(store());
        let poison = std::sync::Arc::clone(&store);
        let _ = std::thread::spawn(move || {
            let _guard = poison.inner.write().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert!(matches!(store.apply(subnet("/v/subnets/a", "u")), Err(StoreError::Poisoned)));
        // Reads still work
        assert!(store.list().is_empty());
    }
}
