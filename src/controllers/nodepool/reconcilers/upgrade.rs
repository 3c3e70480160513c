use kube::ResourceExt;

use crate::resources::machinedeployments::MachineDeployment;
use crate::resources::nodepools::{NodePoolStatus, AS_EXPECTED_REASON, UPGRADING_CONDITION};
use crate::{Error, Result};

/// Where a pool stands relative to its target release
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeStep {
    /// The machine template does not carry the target version yet
    BeginRollout { target: String },
    /// Machines are being replaced
    Rolling { target: String },
    /// Every machine runs the target version; the pool version can advance
    Complete { target: String },
    /// The MachineDeployment is gone while the pool is at target; bring it back at that version
    Recreate { target: String },
    /// Nothing to do
    AtTarget,
}

/// Decide the next upgrade step.
///
/// `observed` is the version recorded on the pool, `template_version` the version on the
/// machine template and `template_exists` whether that template is live rather than freshly
/// generated. The pool version only ever moves to `target`, and only once the rollout has converged.
pub fn plan_upgrade(
    observed: &str,
    target: &str,
    template_version: Option<&str>,
    template_exists: bool,
    converged: bool,
) -> Result<UpgradeStep> {
    let upgrading = observed != target;

    if !template_exists {
        let target = target.to_owned();
        return Ok(if upgrading {
            UpgradeStep::BeginRollout { target }
        } else {
            UpgradeStep::Recreate { target }
        });
    }

    let template_version = template_version.unwrap_or_default();

    if !upgrading && template_version != target {
        return Err(Error::InvariantViolation {
            observed: observed.into(),
            template: template_version.into(),
        });
    }

    let target = target.to_owned();
    Ok(match (template_version == target, upgrading, converged) {
        (false, _, _) => UpgradeStep::BeginRollout { target },
        (true, true, false) => UpgradeStep::Rolling { target },
        (true, true, true) => UpgradeStep::Complete { target },
        (true, false, _) => UpgradeStep::AtTarget,
    })
}

/// All desired machines are updated and available, no old ones remain,
/// and the deployment controller has seen the latest spec
pub fn machines_converged(deployment: &MachineDeployment) -> bool {
    let desired = deployment.spec.replicas.unwrap_or_default();
    let status = deployment.status.clone().unwrap_or_default();
    let generation = deployment.metadata.generation.unwrap_or_default();

    status.updated_replicas == desired
        && status.replicas == desired
        && status.available_replicas == desired
        && status.observed_generation.unwrap_or_default() >= generation
}

impl UpgradeStep {
    /// Apply the machine template side of the step
    pub fn apply_to_deployment(&self, deployment: &mut MachineDeployment, config_server_name: &str) {
        if let UpgradeStep::BeginRollout { target } | UpgradeStep::Recreate { target } = self {
            let spec = &mut deployment.spec.template.spec;
            spec.version = Some(target.clone());
            spec.bootstrap.data_secret_name = Some(format!("user-data-{config_server_name}"));
        }
    }

    /// Apply the pool status side of the step
    pub fn apply_to_status(&self, status: &mut NodePoolStatus) {
        match self {
            UpgradeStep::BeginRollout { target } => status.set_condition(
                UPGRADING_CONDITION,
                true,
                AS_EXPECTED_REASON,
                format!("Upgrade in progress. Target version: {target}"),
            ),
            UpgradeStep::Complete { target } => {
                status.version = target.clone();
                status.set_condition(UPGRADING_CONDITION, false, AS_EXPECTED_REASON, "");
            }
            UpgradeStep::Rolling { .. } | UpgradeStep::Recreate { .. } | UpgradeStep::AtTarget => {}
        }
    }

    pub fn describe(&self, deployment: &MachineDeployment) -> Option<String> {
        match self {
            UpgradeStep::BeginRollout { target } => Some(format!(
                "Starting upgrade of {} to {target}",
                deployment.name_any()
            )),
            UpgradeStep::Rolling { target } => Some(format!(
                "Upgrading {} to {target}",
                deployment.name_any()
            )),
            UpgradeStep::Complete { target } => Some(format!(
                "Upgrade of {} to {target} complete",
                deployment.name_any()
            )),
            UpgradeStep::Recreate { target } => Some(format!(
                "Recreating {} at {target}",
                deployment.name_any()
            )),
            UpgradeStep::AtTarget => None,
        }
    }
}
