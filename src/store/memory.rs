use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use kube::core::ErrorResponse;
use serde_json::{json, Value};

use super::{object_key, Object, ObjectStore};
use crate::{Error, Result};

type Key = (String, String, String);

/// In-memory [`ObjectStore`] with API server semantics the reconciler relies on:
/// resourceVersion preconditions, status kept apart from the rest of the object,
/// and finalizer-gated deletion.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<Key, Value>,
    revision: u64,
    failures: BTreeSet<(String, String, String)>,
    log: Vec<String>,
}

impl Inner {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }
}

fn key_of<K: Object>(namespace: &str, name: &str) -> Key {
    (K::kind(&()).into_owned(), namespace.into(), name.into())
}

fn injected_failure() -> Error {
    Error::KubeError(kube::Error::Api(ErrorResponse {
        status: "Failure".into(),
        message: "injected failure".into(),
        reason: "InternalError".into(),
        code: 500,
    }))
}

fn has_finalizers(value: &Value) -> bool {
    value["metadata"]["finalizers"]
        .as_array()
        .is_some_and(|f| !f.is_empty())
}

impl MemoryStore {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert an object as-is, bypassing the write log
    pub fn seed<K: Object>(&self, obj: K) {
        let (namespace, name) = object_key(&obj).unwrap();
        let mut value = serde_json::to_value(&obj).unwrap();
        let mut inner = self.lock();
        let revision = inner.next_revision();
        let meta = &mut value["metadata"];
        meta["resourceVersion"] = json!(revision);
        if meta["uid"].is_null() {
            meta["uid"] = json!(format!("uid-{namespace}-{name}"));
        }
        if meta["generation"].is_null() {
            meta["generation"] = json!(1);
        }
        inner.objects.insert(key_of::<K>(&namespace, &name), value);
    }

    /// Overwrite the status of a stored object, as another controller would
    pub fn set_status<K: Object, S: serde::Serialize>(&self, namespace: &str, name: &str, status: S) {
        let mut inner = self.lock();
        let revision = inner.next_revision();
        let value = inner
            .objects
            .get_mut(&key_of::<K>(namespace, name))
            .expect("object to be seeded");
        value["status"] = serde_json::to_value(status).unwrap();
        value["metadata"]["resourceVersion"] = json!(revision);
    }

    /// Synchronous read for assertions
    pub fn peek<K: Object>(&self, namespace: &str, name: &str) -> Option<K> {
        self.lock()
            .objects
            .get(&key_of::<K>(namespace, name))
            .map(|v| serde_json::from_value(v.clone()).unwrap())
    }

    /// Make every `op` ("create", "update", "update_status", "delete") on the named object fail
    pub fn fail_on(&self, op: &str, kind: &str, name: &str) {
        self.lock()
            .failures
            .insert((op.into(), kind.into(), name.into()));
    }

    /// Record a marker between writes, used to check ordering
    pub fn mark(&self, marker: impl Into<String>) {
        self.lock().log.push(marker.into());
    }

    /// Every write and marker, in order, as `"<op> <Kind> <namespace>/<name>"`
    pub fn writes(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    fn check<K: Object>(inner: &mut Inner, op: &str, namespace: &str, name: &str) -> Result<()> {
        let kind = K::kind(&()).into_owned();
        inner.log.push(format!("{op} {kind} {namespace}/{name}"));
        if inner
            .failures
            .contains(&(op.to_owned(), kind, name.to_owned()))
        {
            return Err(injected_failure());
        }
        Ok(())
    }

    fn not_found<K: Object>(namespace: &str, name: &str) -> Error {
        Error::NotFound {
            kind: K::kind(&()).into_owned(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    fn conflict<K: Object>(namespace: &str, name: &str) -> Error {
        Error::Conflict {
            kind: K::kind(&()).into_owned(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        tokio::task::yield_now().await;
        let inner = self.lock();
        match inner.objects.get(&key_of::<K>(namespace, name)) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<K> {
        tokio::task::yield_now().await;
        let (namespace, name) = object_key(obj)?;
        let mut inner = self.lock();
        Self::check::<K>(&mut inner, "create", &namespace, &name)?;

        let key = key_of::<K>(&namespace, &name);
        if inner.objects.contains_key(&key) {
            return Err(Error::AlreadyExists {
                kind: key.0,
                namespace,
                name,
            });
        }

        let mut value = serde_json::to_value(obj)?;
        let revision = inner.next_revision();
        let meta = &mut value["metadata"];
        meta["resourceVersion"] = json!(revision);
        meta["uid"] = json!(format!("uid-{namespace}-{name}"));
        meta["generation"] = json!(1);
        meta["creationTimestamp"] = json!(Utc::now());
        // the server never accepts status on create
        if let Some(fields) = value.as_object_mut() {
            fields.remove("status");
        }

        inner.objects.insert(key, value.clone());
        Ok(serde_json::from_value(value)?)
    }

    async fn update<K: Object>(&self, obj: &K) -> Result<K> {
        tokio::task::yield_now().await;
        let (namespace, name) = object_key(obj)?;
        let mut inner = self.lock();
        Self::check::<K>(&mut inner, "update", &namespace, &name)?;

        let key = key_of::<K>(&namespace, &name);
        let Some(stored) = inner.objects.get(&key).cloned() else {
            return Err(Self::not_found::<K>(&namespace, &name));
        };

        let mut value = serde_json::to_value(obj)?;
        let sent_version = &value["metadata"]["resourceVersion"];
        if !sent_version.is_null() && *sent_version != stored["metadata"]["resourceVersion"] {
            return Err(Self::conflict::<K>(&namespace, &name));
        }

        let mut generation = stored["metadata"]["generation"].as_i64().unwrap_or(1);
        if value["spec"] != stored["spec"] {
            generation += 1;
        }
        let revision = inner.next_revision();
        {
            let meta = &mut value["metadata"];
            meta["resourceVersion"] = json!(revision);
            meta["generation"] = json!(generation);
            meta["uid"] = stored["metadata"]["uid"].clone();
            meta["creationTimestamp"] = stored["metadata"]["creationTimestamp"].clone();
            meta["deletionTimestamp"] = stored["metadata"]["deletionTimestamp"].clone();
        }
        match stored.get("status") {
            Some(status) => value["status"] = status.clone(),
            None => {
                if let Some(fields) = value.as_object_mut() {
                    fields.remove("status");
                }
            }
        }

        // releasing the last finalizer of a terminating object completes its deletion
        if !value["metadata"]["deletionTimestamp"].is_null() && !has_finalizers(&value) {
            inner.objects.remove(&key);
        } else {
            inner.objects.insert(key, value.clone());
        }
        Ok(serde_json::from_value(value)?)
    }

    async fn update_status<K: Object>(&self, obj: &K) -> Result<K> {
        tokio::task::yield_now().await;
        let (namespace, name) = object_key(obj)?;
        let mut inner = self.lock();
        Self::check::<K>(&mut inner, "update_status", &namespace, &name)?;

        let key = key_of::<K>(&namespace, &name);
        let sent = serde_json::to_value(obj)?;
        let revision = inner.next_revision();
        let Some(stored) = inner.objects.get_mut(&key) else {
            return Err(Self::not_found::<K>(&namespace, &name));
        };

        let sent_version = &sent["metadata"]["resourceVersion"];
        if !sent_version.is_null() && *sent_version != stored["metadata"]["resourceVersion"] {
            return Err(Self::conflict::<K>(&namespace, &name));
        }

        stored["status"] = sent["status"].clone();
        stored["metadata"]["resourceVersion"] = json!(revision);
        Ok(serde_json::from_value(stored.clone())?)
    }

    async fn delete<K: Object>(&self, namespace: &str, name: &str) -> Result<()> {
        tokio::task::yield_now().await;
        let mut inner = self.lock();
        Self::check::<K>(&mut inner, "delete", namespace, name)?;

        let key = key_of::<K>(namespace, name);
        let revision = inner.next_revision();
        let Some(stored) = inner.objects.get_mut(&key) else {
            return Err(Self::not_found::<K>(namespace, name));
        };

        if has_finalizers(stored) {
            if stored["metadata"]["deletionTimestamp"].is_null() {
                stored["metadata"]["deletionTimestamp"] = json!(Utc::now());
                stored["metadata"]["resourceVersion"] = json!(revision);
            }
        } else {
            inner.objects.remove(&key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use kube::ResourceExt;

    use super::*;
    use crate::resources::nodepools::{NodePool, NodePoolSpec, NodePoolStatus};

    fn pool() -> NodePool {
        let mut np = NodePool::new("pool", NodePoolSpec::default());
        np.metadata.namespace = Some("clusters".into());
        np
    }

    #[tokio::test]
    async fn stale_resource_version_conflicts() {
        let store = MemoryStore::default();
        let created = store.create(&pool()).await.unwrap();

        let mut first = created.clone();
        first.labels_mut().insert("a".into(), "b".into());
        store.update(&first).await.unwrap();

        let err = store.update(&created).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
        let err = store.update_status(&created).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn update_keeps_status_and_update_status_keeps_spec() {
        let store = MemoryStore::default();
        let mut created = store.create(&pool()).await.unwrap();

        created.status = Some(NodePoolStatus {
            node_count: 3,
            ..Default::default()
        });
        let mut with_status = store.update_status(&created).await.unwrap();
        assert_eq!(with_status.status.as_ref().unwrap().node_count, 3);

        with_status.spec.node_count = Some(5);
        with_status.status = None;
        let updated = store.update(&with_status).await.unwrap();
        assert_eq!(updated.spec.node_count, Some(5));
        assert_eq!(updated.status.unwrap().node_count, 3);
        assert_eq!(updated.metadata.generation, Some(2));
    }

    #[tokio::test]
    async fn finalizers_gate_deletion() {
        let store = MemoryStore::default();
        let mut np = pool();
        np.finalizers_mut().push("example.com/finalizer".into());
        store.seed(np);

        store.delete::<NodePool>("clusters", "pool").await.unwrap();
        let mut terminating = store.peek::<NodePool>("clusters", "pool").unwrap();
        assert!(terminating.metadata.deletion_timestamp.is_some());

        terminating.finalizers_mut().clear();
        store.update(&terminating).await.unwrap();
        assert!(store.peek::<NodePool>("clusters", "pool").is_none());
    }
}
