use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::nodepools::AWSResourceReference;

/// Cluster API Provider AWS machine template
/// API: infrastructure.cluster.x-k8s.io/v1alpha3
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1alpha3",
    kind = "AWSMachineTemplate",
    namespaced
)]
pub struct AWSMachineTemplateSpec {
    pub template: AWSMachineTemplateResource,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct AWSMachineTemplateResource {
    pub spec: AWSMachineSpec,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AWSMachineSpec {
    pub ami: AWSResourceReference,

    pub instance_type: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub iam_instance_profile: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_security_groups: Vec<AWSResourceReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<AWSResourceReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncompressed_user_data: Option<bool>,

    #[serde(default)]
    pub cloud_init: CloudInit,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CloudInit {
    #[serde(default)]
    pub insecure_skip_secrets_manager: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secure_secrets_backend: String,
}
