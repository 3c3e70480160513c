use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub static NODEPOOL_FINALIZER: &str = "hypershift.openshift.io/finalizer";

pub const AUTOSCALING_ENABLED_CONDITION: &str = "AutoscalingEnabled";
pub const AUTOREPAIR_ENABLED_CONDITION: &str = "AutorepairEnabled";
pub const UPGRADING_CONDITION: &str = "Upgrading";

pub const AS_EXPECTED_REASON: &str = "AsExpected";
pub const VALIDATION_FAILED_REASON: &str = "ValidationFailed";

/// NodePool describes a pool of worker machines attached to a HostedCluster.
/// The operator turns it into Cluster API machine resources in the hosted control plane namespace.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "NodePool",
    group = "hypershift.openshift.io",
    version = "v1alpha1",
    namespaced,
    printcolumn = r#"{"name":"Cluster", "type":"string", "jsonPath":".spec.clusterName"}"#,
    printcolumn = r#"{"name":"NodeCount", "type":"integer", "jsonPath":".status.nodeCount"}"#,
    printcolumn = r#"{"name":"Autoscaling", "type":"string", "jsonPath":".status.conditions[?(@.type==\"AutoscalingEnabled\")].status"}"#,
    printcolumn = r#"{"name":"Autorepair", "type":"string", "jsonPath":".status.conditions[?(@.type==\"AutorepairEnabled\")].status"}"#,
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".status.version"}"#,
    printcolumn = r#"{"name":"Upgrading", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Upgrading\")].status", "priority": 1}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[kube(status = "NodePoolStatus", shortname = "np")]
#[serde(rename_all = "camelCase")]
pub struct NodePoolSpec {
    /// clusterName is the name of the HostedCluster, in the same namespace, that this NodePool belongs to
    pub cluster_name: String,

    /// nodeCount is the fixed number of nodes in the pool. Mutually exclusive with autoScaling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 0))]
    pub node_count: Option<i32>,

    /// autoScaling hands the node count over to the cluster autoscaler within the given bounds.
    /// Mutually exclusive with nodeCount.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_scaling: Option<NodePoolAutoScaling>,

    #[serde(default)]
    pub management: NodePoolManagement,

    #[serde(default)]
    pub platform: NodePoolPlatform,

    /// release is the release image the nodes should run. Defaults to the HostedCluster's current release.
    #[serde(default)]
    pub release: Release,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct NodePoolAutoScaling {
    #[schemars(range(min = 0))]
    pub min: Option<i32>,
    #[schemars(range(min = 0))]
    pub max: Option<i32>,
}

/// How machines in the pool are maintained and rolled out
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolManagement {
    /// autoRepair creates a MachineHealthCheck that replaces unhealthy machines
    #[serde(default)]
    pub auto_repair: bool,

    /// maxUnavailable is the number of machines that may be unavailable during a rolling update
    #[serde(default)]
    #[schemars(range(min = 0))]
    pub max_unavailable: i32,

    /// maxSurge is the number of machines that may be created above the desired count during a rolling update
    #[serde(default = "default_max_surge")]
    #[schemars(default = "default_max_surge", range(min = 0))]
    pub max_surge: i32,
}

fn default_max_surge() -> i32 {
    1
}

impl Default for NodePoolManagement {
    fn default() -> Self {
        Self {
            auto_repair: false,
            max_unavailable: 0,
            max_surge: default_max_surge(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct NodePoolPlatform {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AWSNodePoolPlatform>,
}

/// AWS machine shape for the pool
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AWSNodePoolPlatform {
    pub instance_type: String,

    /// instanceProfile defaults to `<infraID>-worker-profile`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_profile: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<AWSResourceReference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_groups: Vec<AWSResourceReference>,
}

/// Reference to an AWS resource by id, ARN, or filters
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct AWSResourceReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct Filter {
    pub name: String,
    pub values: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct Release {
    /// image is the pull spec of the release payload
    #[serde(default)]
    pub image: String,
}

/// Status of the NodePool
/// This is set and managed automatically by the controller
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolStatus {
    /// Number of available nodes in the pool
    #[serde(default)]
    pub node_count: i32,

    /// The release version every machine in the pool has converged to
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Represents the latest available observations of current state
    #[serde(default)]
    pub conditions: Vec<NodePoolCondition>,
}

/// Conditions for the NodePool status
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolCondition {
    /// Last time the condition transitioned from one status to another
    pub last_transition_time: Option<Time>,

    /// Human-readable message indicating details about last transition
    #[serde(default)]
    pub message: String,

    /// Reason for the condition's last transition
    pub reason: String,

    /// Status is the status of the condition (True, False, Unknown)
    pub status: String,

    /// Type of condition (AutoscalingEnabled, AutorepairEnabled, Upgrading)
    pub r#type: String,
}

impl NodePoolStatus {
    pub fn condition(&self, r#type: &str) -> Option<&NodePoolCondition> {
        self.conditions.iter().find(|c| c.r#type == r#type)
    }

    /// Upsert a condition by type, keeping its position in the list.
    /// The transition time only moves when the status changes.
    pub fn set_condition(
        &mut self,
        r#type: &str,
        status: bool,
        reason: &str,
        message: impl Into<String>,
    ) {
        let status = if status { "True" } else { "False" };
        let message = message.into();

        match self.conditions.iter_mut().find(|c| c.r#type == r#type) {
            Some(existing) => {
                if existing.status != status {
                    existing.status = status.into();
                    existing.last_transition_time = Some(Time(Utc::now()));
                }
                existing.reason = reason.into();
                existing.message = message;
            }
            None => self.conditions.push(NodePoolCondition {
                last_transition_time: Some(Time(Utc::now())),
                message,
                reason: reason.into(),
                status: status.into(),
                r#type: r#type.into(),
            }),
        }
    }

    pub fn is_condition_true(&self, r#type: &str) -> bool {
        self.condition(r#type).is_some_and(|c| c.status == "True")
    }
}

impl NodePool {
    /// `<namespace>/<name>`, the form stored in the back-reference annotation of derived resources
    pub fn object_key(&self) -> String {
        format!(
            "{}/{}",
            self.namespace().unwrap_or_default(),
            self.name_any()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_condition_appends_new_types_in_order() {
        let mut status = NodePoolStatus::default();
        status.set_condition(AUTOREPAIR_ENABLED_CONDITION, true, AS_EXPECTED_REASON, "");
        status.set_condition(AUTOSCALING_ENABLED_CONDITION, false, AS_EXPECTED_REASON, "");
        status.set_condition(UPGRADING_CONDITION, true, AS_EXPECTED_REASON, "rolling");

        let types: Vec<_> = status.conditions.iter().map(|c| c.r#type.as_str()).collect();
        assert_eq!(
            types,
            vec![
                AUTOREPAIR_ENABLED_CONDITION,
                AUTOSCALING_ENABLED_CONDITION,
                UPGRADING_CONDITION
            ]
        );
    }

    #[test]
    fn set_condition_replaces_by_type_and_keeps_position() {
        let mut status = NodePoolStatus::default();
        status.set_condition(UPGRADING_CONDITION, true, AS_EXPECTED_REASON, "rolling");
        status.set_condition(AUTOREPAIR_ENABLED_CONDITION, true, AS_EXPECTED_REASON, "");
        status.set_condition(UPGRADING_CONDITION, false, AS_EXPECTED_REASON, "");

        assert_eq!(status.conditions.len(), 2);
        assert_eq!(status.conditions[0].r#type, UPGRADING_CONDITION);
        assert_eq!(status.conditions[0].status, "False");
        assert_eq!(status.conditions[0].message, "");
    }

    #[test]
    fn set_condition_keeps_transition_time_when_status_is_unchanged() {
        let mut status = NodePoolStatus::default();
        status.set_condition(AUTOREPAIR_ENABLED_CONDITION, true, AS_EXPECTED_REASON, "");
        let first = status.conditions[0].last_transition_time.clone();

        status.set_condition(AUTOREPAIR_ENABLED_CONDITION, true, AS_EXPECTED_REASON, "again");

        assert_eq!(status.conditions[0].last_transition_time, first);
        assert_eq!(status.conditions[0].message, "again");
    }

    #[test]
    fn spec_accepts_the_legacy_wire_format() {
        let spec: NodePoolSpec = serde_json::from_value(serde_json::json!({
            "clusterName": "example",
            "autoScaling": {"min": 1, "max": 3},
            "management": {"autoRepair": true, "maxUnavailable": 1},
            "platform": {"aws": {"instanceType": "m5.large"}},
        }))
        .unwrap();

        assert_eq!(spec.node_count, None);
        assert_eq!(
            spec.auto_scaling,
            Some(NodePoolAutoScaling {
                min: Some(1),
                max: Some(3)
            })
        );
        assert_eq!(spec.management.max_surge, 1);
        assert_eq!(spec.release.image, "");
    }
}
