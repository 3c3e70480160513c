use async_trait::async_trait;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::debug;

use super::{object_key, Object, ObjectStore};
use crate::{Error, Result};

const FIELD_MANAGER: &str = "nodepool-operator";

/// [`ObjectStore`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: Object>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.into()),
        ..Default::default()
    }
}

// Classify API errors into the store's error vocabulary so callers can match on them
fn from_api_error<K: Object>(err: kube::Error, namespace: &str, name: &str) -> Error {
    let (code, reason) = match &err {
        kube::Error::Api(response) => (response.code, response.reason.clone()),
        _ => return Error::KubeError(err),
    };
    let kind = K::kind(&()).into_owned();
    let (namespace, name) = (namespace.to_owned(), name.to_owned());

    match (code, reason.as_str()) {
        (404, _) => Error::NotFound {
            kind,
            namespace,
            name,
        },
        (409, "AlreadyExists") => Error::AlreadyExists {
            kind,
            namespace,
            name,
        },
        (409, _) => Error::Conflict {
            kind,
            namespace,
            name,
        },
        _ => Error::KubeError(err),
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<K> {
        let (namespace, name) = object_key(obj)?;
        debug!("Creating {} {namespace}/{name}", K::kind(&()));
        self.api::<K>(&namespace)
            .create(&post_params(), obj)
            .await
            .map_err(|err| from_api_error::<K>(err, &namespace, &name))
    }

    async fn update<K: Object>(&self, obj: &K) -> Result<K> {
        let (namespace, name) = object_key(obj)?;
        debug!("Updating {} {namespace}/{name}", K::kind(&()));
        self.api::<K>(&namespace)
            .replace(&name, &post_params(), obj)
            .await
            .map_err(|err| from_api_error::<K>(err, &namespace, &name))
    }

    async fn update_status<K: Object>(&self, obj: &K) -> Result<K> {
        let (namespace, name) = object_key(obj)?;
        let status = serde_json::to_value(obj)?
            .get("status")
            .cloned()
            .unwrap_or_default();

        // a merge patch carrying resourceVersion is rejected with 409 when the object has moved on
        let patch = Patch::Merge(json!({
            "metadata": { "resourceVersion": obj.resource_version() },
            "status": status,
        }));
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.into()),
            ..Default::default()
        };

        debug!("Updating status of {} {namespace}/{name}", K::kind(&()));
        self.api::<K>(&namespace)
            .patch_status(&name, &params, &patch)
            .await
            .map_err(|err| from_api_error::<K>(err, &namespace, &name))
    }

    async fn delete<K: Object>(&self, namespace: &str, name: &str) -> Result<()> {
        debug!("Deleting {} {namespace}/{name}", K::kind(&()));
        self.api::<K>(namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|err| from_api_error::<K>(err, namespace, name))
    }
}

#[cfg(test)]
mod tests {
    use kube::core::ErrorResponse;

    use super::*;
    use crate::resources::nodepools::NodePool;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: "rejected".into(),
            reason: reason.into(),
            code,
        })
    }

    #[test]
    fn api_errors_map_onto_store_errors() {
        let not_found = from_api_error::<NodePool>(api_error(404, "NotFound"), "ns", "np");
        assert!(matches!(not_found, Error::NotFound { ref kind, .. } if kind == "NodePool"));

        let exists = from_api_error::<NodePool>(api_error(409, "AlreadyExists"), "ns", "np");
        assert!(matches!(exists, Error::AlreadyExists { .. }));

        let conflict = from_api_error::<NodePool>(api_error(409, "Conflict"), "ns", "np");
        assert!(matches!(conflict, Error::Conflict { .. }));

        let other = from_api_error::<NodePool>(api_error(500, "InternalError"), "ns", "np");
        assert!(matches!(other, Error::KubeError(_)));
    }
}
