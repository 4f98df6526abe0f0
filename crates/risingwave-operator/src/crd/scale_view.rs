use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::{Component, status::GroupReplicasStatus};

/// Overrides the replicas of some groups of one RisingWave component.
///
/// While a scale view holds the lock on its target, the groups it lists are scaled through the
/// scale view only.
#[derive(CustomResource, Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "risingwave.risingwavelabs.com",
    version = "v1alpha1",
    kind = "RisingWaveScaleView",
    plural = "risingwavescaleviews",
    shortname = "rwsv",
    status = "RisingWaveScaleViewStatus",
    namespaced,
    crates(
        kube_core = "kube::core",
        k8s_openapi = "k8s_openapi",
        schemars = "schemars"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct RisingWaveScaleViewSpec {
    pub target_ref: ScaleViewTargetRef,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scale_policy: Vec<ScalePolicy>,
}

#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleViewTargetRef {
    /// Name of the RisingWave in the same namespace.
    pub name: String,

    /// One of `meta`, `frontend`, `compute` or `compactor`.
    pub component: Component,
}

#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalePolicy {
    #[serde(default)]
    pub group: String,

    pub replicas: i32,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RisingWaveScaleViewStatus {
    /// Whether the lock on the target is held.
    #[serde(default)]
    pub locked: bool,

    /// Running replicas summed over the listed groups.
    #[serde(default)]
    pub replicas: i32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<GroupReplicasStatus>,
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn parse_scale_view() {
        let view: RisingWaveScaleView = serde_yaml::from_str(indoc! {"
            apiVersion: risingwave.risingwavelabs.com/v1alpha1
            kind: RisingWaveScaleView
            metadata:
              name: compute-view
              namespace: default
            spec:
              targetRef:
                name: rw
                component: compute
              scalePolicy:
              - replicas: 2
        "})
        .unwrap();

        assert_eq!(view.spec.target_ref.component, Component::Compute);
        assert_eq!(view.spec.scale_policy[0].group, "");
        assert!(view.status.is_none());
    }
}
