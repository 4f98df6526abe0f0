use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::{
        Affinity, EnvVar, PodDNSConfig, PodSecurityContext, ResourceRequirements, Toleration,
        Volume, VolumeDevice, VolumeMount,
    },
    apimachinery::pkg::{apis::meta::v1::Time, util::intstr::IntOrString},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Labels and annotations attached to rendered objects.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialObjectMeta {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// The subset of a pod template that users can set, either globally or per node group.
///
/// A node group's template overrides the global one field by field: a field set on the group
/// wins, an unset (or empty) field falls back to the global value.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<PodSecurityContext>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_config: Option<PodDNSConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_grace_period_seconds: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_devices: Vec<VolumeDevice>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_strategy: Option<UpgradeStrategy>,

    #[serde(default)]
    pub metadata: PartialObjectMeta,
}

fn pick<T: Clone>(group: &Option<T>, global: &Option<T>) -> Option<T> {
    group.as_ref().or(global.as_ref()).cloned()
}

fn pick_non_empty<T: Clone>(group: &[T], global: &[T]) -> Vec<T> {
    if group.is_empty() {
        global.to_vec()
    } else {
        group.to_vec()
    }
}

fn pick_map(
    group: &BTreeMap<String, String>,
    global: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    if group.is_empty() {
        global.clone()
    } else {
        group.clone()
    }
}

impl PodTemplate {
    /// Overlays `self` (the group template) on top of `global`.
    pub fn merged_over(&self, global: &Self) -> Self {
        let mut labels = global.metadata.labels.clone();
        labels.extend(self.metadata.labels.clone());
        let mut annotations = global.metadata.annotations.clone();
        annotations.extend(self.metadata.annotations.clone());

        Self {
            image: pick(&self.image, &global.image),
            image_pull_policy: pick(&self.image_pull_policy, &global.image_pull_policy),
            image_pull_secrets: pick_non_empty(
                &self.image_pull_secrets,
                &global.image_pull_secrets,
            ),
            resources: pick(&self.resources, &global.resources),
            node_selector: pick_map(&self.node_selector, &global.node_selector),
            tolerations: pick_non_empty(&self.tolerations, &global.tolerations),
            affinity: pick(&self.affinity, &global.affinity),
            priority_class_name: pick(&self.priority_class_name, &global.priority_class_name),
            service_account_name: pick(&self.service_account_name, &global.service_account_name),
            security_context: pick(&self.security_context, &global.security_context),
            dns_config: pick(&self.dns_config, &global.dns_config),
            termination_grace_period_seconds: pick(
                &self.termination_grace_period_seconds,
                &global.termination_grace_period_seconds,
            ),
            env: pick_non_empty(&self.env, &global.env),
            volumes: pick_non_empty(&self.volumes, &global.volumes),
            volume_mounts: pick_non_empty(&self.volume_mounts, &global.volume_mounts),
            volume_devices: pick_non_empty(&self.volume_devices, &global.volume_devices),
            upgrade_strategy: pick(&self.upgrade_strategy, &global.upgrade_strategy),
            metadata: PartialObjectMeta {
                labels,
                annotations,
            },
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub enum UpgradeStrategyType {
    #[default]
    RollingUpdate,
    Recreate,
    InPlaceIfPossible,
    InPlaceOnly,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollingUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrString>,

    /// Ordinal (or percentage of replicas) below which pods are not updated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<IntOrString>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_surge: Option<IntOrString>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeStrategy {
    #[serde(default, rename = "type")]
    pub type_: UpgradeStrategyType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolling_update: Option<RollingUpdate>,

    /// Grace period before an in-place update, only honoured by the advanced workloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_place_grace_period_seconds: Option<i32>,
}

/// A named subset of a component's pods.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroup {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub replicas: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<PodTemplate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_at: Option<Time>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentPorts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard: Option<i32>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    #[serde(default)]
    pub ports: ComponentPorts,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_at: Option<Time>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<NodeGroup>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentsSpec {
    #[serde(default)]
    pub meta: ComponentSpec,

    #[serde(default)]
    pub frontend: ComponentSpec,

    #[serde(default)]
    pub compute: ComponentSpec,

    #[serde(default)]
    pub compactor: ComponentSpec,

    #[serde(default)]
    pub connector: ComponentSpec,

    /// Only used when standalone mode is enabled. The groups are ignored.
    #[serde(default)]
    pub standalone: ComponentSpec,
}

/// Replicas of the default (empty-named) group of each component.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalReplicas {
    #[serde(default)]
    pub meta: i32,

    #[serde(default)]
    pub frontend: i32,

    #[serde(default)]
    pub compute: i32,

    #[serde(default)]
    pub compactor: i32,

    #[serde(default)]
    pub connector: i32,

    #[serde(default)]
    pub standalone: i32,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSpec {
    #[serde(flatten)]
    pub template: PodTemplate,

    #[serde(default)]
    pub replicas: GlobalReplicas,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_template_wins_when_set() {
        let global = PodTemplate {
            image: Some("risingwave:v1".to_owned()),
            image_pull_policy: Some("IfNotPresent".to_owned()),
            node_selector: [("zone".to_owned(), "a".to_owned())].into(),
            metadata: PartialObjectMeta {
                labels: [("team".to_owned(), "db".to_owned())].into(),
                ..Default::default()
            },
            ..Default::default()
        };
        let group = PodTemplate {
            image: Some("risingwave:v2".to_owned()),
            metadata: PartialObjectMeta {
                labels: [("tier".to_owned(), "hot".to_owned())].into(),
                ..Default::default()
            },
            ..Default::default()
        };

        let merged = group.merged_over(&global);

        assert_eq!(merged.image.as_deref(), Some("risingwave:v2"));
        assert_eq!(merged.image_pull_policy.as_deref(), Some("IfNotPresent"));
        assert_eq!(merged.node_selector, global.node_selector);
        assert_eq!(merged.metadata.labels.len(), 2);
    }
}
