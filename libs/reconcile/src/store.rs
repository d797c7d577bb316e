//! Store boundary and an in-memory implementation.
//!
//! The reconciler only talks to the outside world through [`Store`]. The
//! [`MemoryStore`] backs the controller binary and the tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::types::{Instance, ObservedStatus, Parent, ParentKey, INSTANCE_KIND, PARENT_KIND};

/// Operations the reconciler needs from the backing store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch a parent. Returns [`StoreError::NotFound`] once it is deleted.
    async fn get_parent(&self, key: &ParentKey) -> StoreResult<Parent>;

    /// List the instances controlled by `parent`, in no particular order.
    async fn list_instances(&self, parent: &Parent) -> StoreResult<Vec<Instance>>;

    /// Create an instance. The owner reference is already set.
    async fn create_instance(&self, instance: &Instance) -> StoreResult<()>;

    /// Delete an instance.
    async fn delete_instance(&self, instance: &Instance) -> StoreResult<()>;

    /// Replace the observed status of a parent.
    async fn update_status(&self, key: &ParentKey, status: &ObservedStatus) -> StoreResult<()>;
}

type InstanceKey = (String, String);

#[derive(Debug, Default)]
struct State {
    parents: BTreeMap<ParentKey, Parent>,
    instances: BTreeMap<InstanceKey, Instance>,
}

/// In-memory store.
///
/// Instances are indexed by their controlling owner's uid when listed, and
/// removing a parent garbage-collects the instances it controls.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with parents.
    pub fn with_parents(parents: impl IntoIterator<Item = Parent>) -> Self {
        let parents = parents.into_iter().map(|p| (p.key.clone(), p)).collect();
        Self {
            state: RwLock::new(State {
                parents,
                instances: BTreeMap::new(),
            }),
        }
    }

    /// Insert a parent, or replace the spec of an existing one.
    ///
    /// The status and uid of an existing parent are kept.
    pub async fn apply_parent(&self, parent: Parent) {
        let mut state = self.state.write().await;
        match state.parents.get_mut(&parent.key) {
            Some(existing) => existing.spec = parent.spec,
            None => {
                state.parents.insert(parent.key.clone(), parent);
            }
        }
    }

    /// Remove a parent and every instance it controls.
    pub async fn remove_parent(&self, key: &ParentKey) -> Option<Parent> {
        let mut state = self.state.write().await;
        let removed = state.parents.remove(key)?;

        let before = state.instances.len();
        state
            .instances
            .retain(|_, instance| !instance.is_owned_by(&removed));
        debug!(
            parent = %key,
            collected = before - state.instances.len(),
            "Garbage collected owned instances"
        );

        Some(removed)
    }

    /// Snapshot of a parent.
    pub async fn parent(&self, key: &ParentKey) -> Option<Parent> {
        self.state.read().await.parents.get(key).cloned()
    }

    /// Keys of every stored parent, sorted.
    pub async fn parent_keys(&self) -> Vec<ParentKey> {
        self.state.read().await.parents.keys().cloned().collect()
    }

    /// Snapshot of every stored instance, sorted by namespace and name.
    pub async fn instances(&self) -> Vec<Instance> {
        self.state.read().await.instances.values().cloned().collect()
    }

    /// Insert an instance directly, bypassing duplicate checks.
    pub async fn put_instance(&self, instance: Instance) {
        let key = instance_key(&instance);
        self.state.write().await.instances.insert(key, instance);
    }
}

fn instance_key(instance: &Instance) -> InstanceKey {
    (instance.namespace.clone(), instance.name.clone())
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_parent(&self, key: &ParentKey) -> StoreResult<Parent> {
        self.parent(key).await.ok_or_else(|| StoreError::NotFound {
            kind: PARENT_KIND,
            name: key.to_string(),
        })
    }

    async fn list_instances(&self, parent: &Parent) -> StoreResult<Vec<Instance>> {
        let state = self.state.read().await;
        Ok(state
            .instances
            .values()
            .filter(|i| i.namespace == parent.key.namespace && i.is_owned_by(parent))
            .cloned()
            .collect())
    }

    async fn create_instance(&self, instance: &Instance) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let key = instance_key(instance);
        if state.instances.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: INSTANCE_KIND,
                name: instance.name.clone(),
            });
        }
        state.instances.insert(key, instance.clone());
        Ok(())
    }

    async fn delete_instance(&self, instance: &Instance) -> StoreResult<()> {
        let mut state = self.state.write().await;
        match state.instances.remove(&instance_key(instance)) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound {
                kind: INSTANCE_KIND,
                name: instance.name.clone(),
            }),
        }
    }

    async fn update_status(&self, key: &ParentKey, status: &ObservedStatus) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let parent = state
            .parents
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound {
                kind: PARENT_KIND,
                name: key.to_string(),
            })?;
        parent.status = status.clone();
        Ok(())
    }
}
