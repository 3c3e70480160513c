//! Object CRUD used by the reconciler.
//!
//! [`ObjectStore`] is the only path through which the controller reads or writes cluster
//! state. [`KubeStore`] talks to the API server; tests run against an in-memory fake.

use std::fmt::Debug;

use async_trait::async_trait;
use kube::core::NamespaceResourceScope;
use kube::{Resource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};

use crate::{Error, Result};

mod kube_store;
pub use kube_store::KubeStore;

#[cfg(test)]
pub(crate) mod memory;

/// Any namespaced, statically typed Kubernetes object the store can hold
pub trait Object:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> Object for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Absence is `Ok(None)`
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    /// Fails with [`Error::AlreadyExists`] if an object with the same name is present
    async fn create<K: Object>(&self, obj: &K) -> Result<K>;

    /// Replaces everything but status. Fails with [`Error::Conflict`] when `obj` carries a stale resourceVersion
    async fn update<K: Object>(&self, obj: &K) -> Result<K>;

    /// Writes only the status subresource, guarded by the resourceVersion of `obj`
    async fn update_status<K: Object>(&self, obj: &K) -> Result<K>;

    /// Fails with [`Error::NotFound`] if the object is absent
    async fn delete<K: Object>(&self, namespace: &str, name: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Created,
    Updated,
    Unchanged,
}

/// Fetch the live object named like `desired`, or start from `desired` if there is none,
/// apply `mutate` and write the result back. No write is issued if `mutate` changed nothing.
pub async fn create_or_update<S, K, F>(store: &S, desired: K, mutate: F) -> Result<(K, Operation)>
where
    S: ObjectStore,
    K: Object,
    F: FnOnce(&mut K) -> Result<()>,
{
    let (namespace, name) = object_key(&desired)?;

    match store.get::<K>(&namespace, &name).await? {
        None => {
            let mut obj = desired;
            mutate(&mut obj)?;
            Ok((store.create(&obj).await?, Operation::Created))
        }
        Some(mut existing) => {
            let before = serde_json::to_value(&existing)?;
            mutate(&mut existing)?;
            if serde_json::to_value(&existing)? == before {
                return Ok((existing, Operation::Unchanged));
            }
            Ok((store.update(&existing).await?, Operation::Updated))
        }
    }
}

/// Delete an object, treating absence as success
pub async fn delete_if_exists<S: ObjectStore, K: Object>(
    store: &S,
    namespace: &str,
    name: &str,
) -> Result<()> {
    match store.delete::<K>(namespace, name).await {
        Err(err) if err.is_not_found() => Ok(()),
        other => other,
    }
}

pub(crate) fn object_key<K: Object>(obj: &K) -> Result<(String, String)> {
    match (obj.namespace(), obj.meta().name.clone()) {
        (Some(namespace), Some(name)) => Ok((namespace, name)),
        _ => Err(Error::MissingObjectKey(K::kind(&()).into_owned())),
    }
}
