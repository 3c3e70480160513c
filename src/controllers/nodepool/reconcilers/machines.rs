use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};

use crate::resources::awsmachinetemplates::{
    AWSMachineSpec, AWSMachineTemplate, AWSMachineTemplateResource, AWSMachineTemplateSpec,
    CloudInit,
};
use crate::resources::machineconfigservers::{MachineConfigServer, MachineConfigServerSpec};
use crate::resources::machinedeployments::{
    Bootstrap, MachineDeployment, MachineDeploymentSpec, MachineDeploymentStrategy,
    MachineObjectMeta, MachineRollingUpdateDeployment, MachineSpec, MachineTemplateSpec,
};
use crate::resources::machinehealthchecks::{
    MachineHealthCheck, MachineHealthCheckSpec, UnhealthyCondition,
};
use crate::resources::nodepools::{AWSResourceReference, NodePool, NodePoolManagement};
use crate::{Error, Result};

use super::naming::resource_name;

pub const NODEPOOL_ANNOTATION: &str = "hypershift.openshift.io/nodePool";
pub const AUTOSCALER_MIN_ANNOTATION: &str =
    "cluster.x-k8s.io/cluster-api-autoscaler-node-group-min-size";
pub const AUTOSCALER_MAX_ANNOTATION: &str =
    "cluster.x-k8s.io/cluster-api-autoscaler-node-group-max-size";
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";
const EXCLUDE_NODE_DRAINING_ANNOTATION: &str = "machine.cluster.x-k8s.io/exclude-node-draining";

const ROLLING_UPDATE_STRATEGY: &str = "RollingUpdate";
const SECRETS_MANAGER_BACKEND: &str = "secrets-manager";

const UNHEALTHY_NODE_TIMEOUT: Duration = Duration::from_secs(8 * 60);
const NODE_STARTUP_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const MAX_UNHEALTHY_MACHINES: i32 = 2;

/// Everything the generator needs to know about where a pool's machines go
#[derive(Clone, Copy, Debug)]
pub struct MachineInputs<'a> {
    pub infra_id: &'a str,
    pub ami: &'a str,
    pub pool: &'a NodePool,
    pub target_namespace: &'a str,
}

impl MachineInputs<'_> {
    /// The name every generated resource shares
    pub fn resource_name(&self) -> String {
        resource_name(
            self.infra_id,
            &self.pool.spec.cluster_name,
            &self.pool.name_any(),
        )
    }

    fn metadata(&self) -> ObjectMeta {
        ObjectMeta {
            name: Some(self.resource_name()),
            namespace: Some(self.target_namespace.into()),
            ..Default::default()
        }
    }
}

/// The resources regenerated for a pool on every reconcile
#[derive(Clone, Debug)]
pub struct MachineResources {
    pub deployment: MachineDeployment,
    pub template: AWSMachineTemplate,
    pub config_server: MachineConfigServer,
}

pub fn generate(inputs: &MachineInputs) -> Result<MachineResources> {
    let pool = inputs.pool;
    let aws = pool
        .spec
        .platform
        .aws
        .as_ref()
        .ok_or_else(|| Error::UnsupportedPlatform(pool.object_key()))?;
    let name = inputs.resource_name();

    let template = AWSMachineTemplate {
        metadata: inputs.metadata(),
        spec: AWSMachineTemplateSpec {
            template: AWSMachineTemplateResource {
                spec: AWSMachineSpec {
                    ami: AWSResourceReference {
                        id: Some(inputs.ami.into()),
                        ..Default::default()
                    },
                    instance_type: aws.instance_type.clone(),
                    iam_instance_profile: aws
                        .instance_profile
                        .clone()
                        .filter(|profile| !profile.is_empty())
                        .unwrap_or_else(|| format!("{}-worker-profile", inputs.infra_id)),
                    additional_security_groups: aws.security_groups.clone(),
                    subnet: Some(aws.subnet.clone().unwrap_or_default()),
                    uncompressed_user_data: Some(true),
                    cloud_init: CloudInit {
                        insecure_skip_secrets_manager: true,
                        secure_secrets_backend: SECRETS_MANAGER_BACKEND.into(),
                    },
                },
            },
        },
    };

    let mut annotations = BTreeMap::from([(NODEPOOL_ANNOTATION.to_string(), pool.object_key())]);
    if let Some(bounds) = &pool.spec.auto_scaling {
        if let (Some(min), Some(max)) = (bounds.min, bounds.max) {
            if max > 0 {
                annotations.insert(AUTOSCALER_MIN_ANNOTATION.into(), min.to_string());
                annotations.insert(AUTOSCALER_MAX_ANNOTATION.into(), max.to_string());
            }
        }
    }

    let deployment = MachineDeployment {
        metadata: ObjectMeta {
            annotations: Some(annotations),
            labels: Some(BTreeMap::from([(
                CLUSTER_NAME_LABEL.to_string(),
                inputs.infra_id.to_string(),
            )])),
            ..inputs.metadata()
        },
        spec: MachineDeploymentSpec {
            cluster_name: inputs.infra_id.into(),
            replicas: pool.spec.node_count,
            selector: machine_selector(&name),
            template: MachineTemplateSpec {
                metadata: MachineObjectMeta {
                    labels: Some(BTreeMap::from([
                        (name.clone(), name.clone()),
                        (CLUSTER_NAME_LABEL.to_string(), inputs.infra_id.to_string()),
                    ])),
                    annotations: Some(BTreeMap::from([(
                        EXCLUDE_NODE_DRAINING_ANNOTATION.to_string(),
                        "true".to_string(),
                    )])),
                },
                spec: MachineSpec {
                    cluster_name: inputs.infra_id.into(),
                    bootstrap: Bootstrap {
                        data_secret_name: Some(format!("{}-user-data", pool.spec.cluster_name)),
                    },
                    infrastructure_ref: ObjectReference {
                        api_version: Some(AWSMachineTemplate::api_version(&()).into_owned()),
                        kind: Some(AWSMachineTemplate::kind(&()).into_owned()),
                        name: Some(name.clone()),
                        namespace: Some(inputs.target_namespace.into()),
                        ..Default::default()
                    },
                    version: None,
                },
            },
            strategy: Some(rolling_update_strategy(&pool.spec.management)),
        },
        status: None,
    };

    let config_server = MachineConfigServer {
        metadata: inputs.metadata(),
        spec: MachineConfigServerSpec {
            release_image: pool.spec.release.image.clone(),
        },
    };

    Ok(MachineResources {
        deployment,
        template,
        config_server,
    })
}

/// MachineHealthCheck that replaces machines whose node stays unready
pub fn generate_health_check(inputs: &MachineInputs) -> MachineHealthCheck {
    let name = inputs.resource_name();
    let unhealthy = |status: &str| UnhealthyCondition {
        type_: "Ready".into(),
        status: status.into(),
        timeout: go_duration(UNHEALTHY_NODE_TIMEOUT),
    };

    MachineHealthCheck {
        metadata: inputs.metadata(),
        spec: MachineHealthCheckSpec {
            cluster_name: inputs.infra_id.into(),
            selector: machine_selector(&name),
            unhealthy_conditions: vec![unhealthy("False"), unhealthy("Unknown")],
            max_unhealthy: Some(IntOrString::Int(MAX_UNHEALTHY_MACHINES)),
            node_startup_timeout: Some(go_duration(NODE_STARTUP_TIMEOUT)),
        },
    }
}

pub fn rolling_update_strategy(management: &NodePoolManagement) -> MachineDeploymentStrategy {
    MachineDeploymentStrategy {
        type_: Some(ROLLING_UPDATE_STRATEGY.into()),
        rolling_update: Some(MachineRollingUpdateDeployment {
            max_unavailable: Some(IntOrString::Int(management.max_unavailable)),
            max_surge: Some(IntOrString::Int(management.max_surge)),
        }),
    }
}

fn machine_selector(name: &str) -> LabelSelector {
    LabelSelector {
        match_labels: Some(BTreeMap::from([(name.to_string(), name.to_string())])),
        match_expressions: None,
    }
}

/// Render a duration the way Go's `time.Duration` prints, e.g. `10m0s`
fn go_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, secs % 3600 / 60, secs % 60);
    match (hours, minutes) {
        (0, 0) => format!("{seconds}s"),
        (0, _) => format!("{minutes}m{seconds}s"),
        _ => format!("{hours}h{minutes}m{seconds}s"),
    }
}
