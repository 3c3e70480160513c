use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// MachineConfigServer serves ignition payloads for a release image; nodes bootstrap from its user-data secret
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "hypershift.openshift.io",
    version = "v1alpha1",
    kind = "MachineConfigServer",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct MachineConfigServerSpec {
    pub release_image: String,
}
