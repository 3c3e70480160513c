use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::nodepools::Release;

/// The subset of the HostedCluster API that NodePools depend on.
/// HostedClusters are owned by another controller; this operator only reads them.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    kind = "HostedCluster",
    group = "hypershift.openshift.io",
    version = "v1alpha1",
    namespaced
)]
#[kube(status = "HostedClusterStatus", shortname = "hc")]
pub struct HostedClusterSpec {
    /// infraID identifies the cloud infrastructure shared by the control plane and its workers
    #[serde(rename = "infraID")]
    pub infra_id: String,

    #[serde(default)]
    pub release: Release,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<HostedClusterPlatform>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct HostedClusterPlatform {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AWSPlatformSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct AWSPlatformSpec {
    pub region: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct HostedClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<ClusterVersionStatus>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct ClusterVersionStatus {
    /// history lists the releases applied to the cluster, most recent first
    #[serde(default)]
    pub history: Vec<UpdateHistory>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct UpdateHistory {
    #[serde(default)]
    pub state: String,
    pub image: String,
    #[serde(default)]
    pub version: String,
}

impl HostedCluster {
    /// The namespace that hosts this cluster's control plane and all machine resources
    pub fn control_plane_namespace(&self) -> String {
        format!(
            "{}-{}",
            self.namespace().unwrap_or_default(),
            self.name_any()
        )
    }

    /// The most recently applied release image, falling back to the one requested in the spec
    pub fn latest_release_image(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.version.as_ref())
            .and_then(|v| v.history.first())
            .map(|h| h.image.as_str())
            .or(Some(self.spec.release.image.as_str()))
            .filter(|image| !image.is_empty())
    }

    pub fn aws_region(&self) -> Option<&str> {
        self.spec
            .platform
            .as_ref()
            .and_then(|p| p.aws.as_ref())
            .map(|aws| aws.region.as_str())
    }
}
