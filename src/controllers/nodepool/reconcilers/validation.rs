use thiserror::Error;

use crate::resources::nodepools::NodePoolSpec;

/// How the replica count of a pool is decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaPolicy {
    /// `spec.nodeCount`, or zero when neither field is set
    Fixed { count: i32 },
    /// `spec.autoScaling`; the cluster autoscaler owns the count within these bounds
    Autoscaled { min: i32, max: i32 },
}

impl ReplicaPolicy {
    pub fn is_autoscaled(&self) -> bool {
        matches!(self, ReplicaPolicy::Autoscaled { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("only one of nodePool.Spec.NodeCount or nodePool.Spec.AutoScaling can be set")]
    ConflictingReplicaPolicy,

    #[error("max and min must be not nil. Max: {max:?}, Min: {min:?}")]
    MissingBounds { min: Option<i32>, max: Option<i32> },

    #[error("max must be equal or greater than min. Max: {max}, Min: {min}")]
    InvertedBounds { min: i32, max: i32 },

    #[error("max and min must be not zero. Max: {max}, Min: {min}")]
    ZeroBounds { min: i32, max: i32 },

    #[error("{field} must not be negative, got {value}")]
    Negative { field: &'static str, value: i32 },
}

fn non_negative(field: &'static str, value: i32) -> Result<i32, ValidationError> {
    if value < 0 {
        return Err(ValidationError::Negative { field, value });
    }
    Ok(value)
}

/// Turn the wire form of the replica settings into a [`ReplicaPolicy`]
pub fn validate(spec: &NodePoolSpec) -> Result<ReplicaPolicy, ValidationError> {
    match (spec.node_count, spec.auto_scaling.as_ref()) {
        (Some(_), Some(_)) => Err(ValidationError::ConflictingReplicaPolicy),
        (count, None) => Ok(ReplicaPolicy::Fixed {
            count: non_negative("nodeCount", count.unwrap_or(0))?,
        }),
        (None, Some(bounds)) => {
            let (min, max) = match (bounds.min, bounds.max) {
                (Some(min), Some(max)) => (min, max),
                (min, max) => return Err(ValidationError::MissingBounds { min, max }),
            };
            let min = non_negative("autoScaling.min", min)?;
            let max = non_negative("autoScaling.max", max)?;
            if max < min {
                return Err(ValidationError::InvertedBounds { min, max });
            }
            if max == 0 && min == 0 {
                return Err(ValidationError::ZeroBounds { min, max });
            }
            Ok(ReplicaPolicy::Autoscaled { min, max })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::nodepools::NodePoolAutoScaling;

    fn spec(node_count: Option<i32>, min: Option<i32>, max: Option<i32>, autoscale: bool) -> NodePoolSpec {
        NodePoolSpec {
            cluster_name: "example".into(),
            node_count,
            auto_scaling: autoscale.then_some(NodePoolAutoScaling { min, max }),
            ..Default::default()
        }
    }

    #[test]
    fn neither_field_means_zero_fixed_replicas() {
        assert_eq!(
            validate(&spec(None, None, None, false)),
            Ok(ReplicaPolicy::Fixed { count: 0 })
        );
    }

    #[test]
    fn fixed_count_is_accepted() {
        assert_eq!(
            validate(&spec(Some(3), None, None, false)),
            Ok(ReplicaPolicy::Fixed { count: 3 })
        );
    }

    #[test]
    fn both_policies_are_rejected() {
        assert_eq!(
            validate(&spec(Some(1), Some(1), Some(2), true)),
            Err(ValidationError::ConflictingReplicaPolicy)
        );
    }

    #[test]
    fn autoscaling_needs_both_bounds() {
        assert_eq!(
            validate(&spec(None, Some(1), None, true)),
            Err(ValidationError::MissingBounds {
                min: Some(1),
                max: None
            })
        );
        assert!(validate(&spec(None, None, Some(2), true)).is_err());
    }

    #[test]
    fn autoscaling_bounds_rules() {
        assert_eq!(
            validate(&spec(None, Some(3), Some(2), true)),
            Err(ValidationError::InvertedBounds { min: 3, max: 2 })
        );
        assert_eq!(
            validate(&spec(None, Some(0), Some(0), true)),
            Err(ValidationError::ZeroBounds { min: 0, max: 0 })
        );
        assert_eq!(
            validate(&spec(None, Some(0), Some(1), true)),
            Ok(ReplicaPolicy::Autoscaled { min: 0, max: 1 })
        );
        assert_eq!(
            validate(&spec(None, Some(2), Some(2), true)),
            Ok(ReplicaPolicy::Autoscaled { min: 2, max: 2 })
        );
    }

    #[test]
    fn negative_counts_are_rejected() {
        assert_eq!(
            validate(&spec(Some(-1), None, None, false)),
            Err(ValidationError::Negative {
                field: "nodeCount",
                value: -1
            })
        );
        assert!(matches!(
            validate(&spec(None, Some(-2), Some(3), true)),
            Err(ValidationError::Negative { field: "autoScaling.min", .. })
        ));
    }
}
