use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::crd::{Component, meta_store::MetaStoreType, state_store::StateStoreType};

#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Display,
    EnumString,
    Eq,
    Hash,
    JsonSchema,
    PartialEq,
    Serialize,
)]
pub enum ConditionType {
    Initializing,
    Running,
    Upgrading,
    Failed,
    Unknown,
}

#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Display,
    EnumString,
    Eq,
    Hash,
    JsonSchema,
    PartialEq,
    Serialize,
)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,

    pub status: ConditionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Condition {
    pub fn new(type_: ConditionType, status: impl Into<ConditionStatus>) -> Self {
        Self {
            type_,
            status: status.into(),
            last_transition_time: None,
            reason: None,
            message: None,
        }
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>, message: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self.message = Some(message.into());
        self
    }
}

/// Where a RisingWave is in its lifecycle, reconstructed from its conditions.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum Phase {
    /// No lifecycle condition has been recorded yet.
    FirstSeen,
    Initializing,
    /// Neither initializing nor running, the components are being brought back.
    Recovering,
    Running,
    Upgrading,
    Failed,
}

impl Phase {
    pub fn from_conditions(conditions: &[Condition]) -> Self {
        let status_of = |type_| {
            conditions
                .iter()
                .find(|cond| cond.type_ == type_)
                .map(|cond| cond.status)
        };

        if status_of(ConditionType::Failed) == Some(ConditionStatus::True) {
            return Self::Failed;
        }

        match (
            status_of(ConditionType::Initializing),
            status_of(ConditionType::Running),
            status_of(ConditionType::Upgrading),
        ) {
            (None, None, _) => Self::FirstSeen,
            (Some(ConditionStatus::True), ..) => Self::Initializing,
            (_, Some(ConditionStatus::True), Some(ConditionStatus::True)) => Self::Upgrading,
            (_, Some(ConditionStatus::True), _) => Self::Running,
            _ => Self::Recovering,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupReplicasStatus {
    pub name: String,

    #[serde(default)]
    pub target: i32,

    #[serde(default)]
    pub running: i32,

    #[serde(default)]
    pub exists: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentReplicasStatus {
    #[serde(default)]
    pub target: i32,

    #[serde(default)]
    pub running: i32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<GroupReplicasStatus>,
}

impl ComponentReplicasStatus {
    pub fn from_groups(mut groups: Vec<GroupReplicasStatus>) -> Self {
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            target: groups.iter().map(|g| g.target).sum(),
            running: groups.iter().map(|g| g.running).sum(),
            groups,
        }
    }

    pub fn group(&self, name: &str) -> Option<&GroupReplicasStatus> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn is_under_target(&self) -> bool {
        self.groups.iter().any(|g| !g.exists || g.running < g.target)
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentsReplicasStatus {
    #[serde(default)]
    pub meta: ComponentReplicasStatus,

    #[serde(default)]
    pub frontend: ComponentReplicasStatus,

    #[serde(default)]
    pub compute: ComponentReplicasStatus,

    #[serde(default)]
    pub compactor: ComponentReplicasStatus,

    #[serde(default)]
    pub connector: ComponentReplicasStatus,

    #[serde(default)]
    pub standalone: ComponentReplicasStatus,
}

impl ComponentsReplicasStatus {
    pub fn get(&self, component: Component) -> Option<&ComponentReplicasStatus> {
        match component {
            Component::Meta => Some(&self.meta),
            Component::Frontend => Some(&self.frontend),
            Component::Compute => Some(&self.compute),
            Component::Compactor => Some(&self.compactor),
            Component::Connector => Some(&self.connector),
            Component::Standalone => Some(&self.standalone),
            Component::Config => None,
        }
    }

    pub fn get_mut(&mut self, component: Component) -> Option<&mut ComponentReplicasStatus> {
        match component {
            Component::Meta => Some(&mut self.meta),
            Component::Frontend => Some(&mut self.frontend),
            Component::Compute => Some(&mut self.compute),
            Component::Compactor => Some(&mut self.compactor),
            Component::Connector => Some(&mut self.connector),
            Component::Standalone => Some(&mut self.standalone),
            Component::Config => None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaStoreStatus {
    #[serde(rename = "type")]
    pub type_: MetaStoreType,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateStoreStatus {
    #[serde(rename = "type")]
    pub type_: StateStoreType,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoragesStatus {
    #[serde(default)]
    pub meta_store: MetaStoreStatus,

    #[serde(default)]
    pub state_store: StateStoreStatus,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupLock {
    pub name: String,
    pub replicas: i32,
}

/// A lock held by a scale view over some groups of one component.
#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleViewLock {
    pub name: String,
    pub uid: String,
    pub component: Component,

    /// Generation of the scale view when the lock was last refreshed.
    #[serde(default)]
    pub generation: i64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_locks: Vec<GroupLock>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state_store_root_path: String,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RisingWaveStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub component_replicas: ComponentsReplicasStatus,

    #[serde(default)]
    pub storages: StoragesStatus,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scale_views: Vec<ScaleViewLock>,

    #[serde(default)]
    pub internal: InternalStatus,

    /// Tag of the global image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl RisingWaveStatus {
    pub fn condition(&self, type_: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|cond| cond.type_ == type_)
    }

    /// Whether the condition is present with the given status.
    pub fn has_condition(&self, type_: ConditionType, status: bool) -> bool {
        self.condition(type_)
            .is_some_and(|cond| cond.status == ConditionStatus::from(status))
    }
}
