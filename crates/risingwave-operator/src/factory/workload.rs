//! The workload kinds a RisingWave component can run on.
//!
//! Components are rendered either as native workloads or, with OpenKruise enabled, as their
//! advanced counterparts. [`WorkloadDriver`] is the narrow seam between both families: rendering,
//! observing rollout progress and reading replicas. Everything else in the operator is generic
//! over it.

use std::fmt::Debug;

use k8s_openapi::{
    NamespaceResourceScope,
    api::{
        apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec},
        core::v1::PodTemplateSpec,
    },
    apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta},
};
use kube::Resource;
use serde::{Serialize, de::DeserializeOwned};

use super::{NotAWorkloadSnafu, ObjectFactory, Result, upgrade};
use crate::crd::{
    Component,
    external::kruise::{AdvancedStatefulSet, AdvancedStatefulSetSpec, CloneSet, CloneSetSpec},
    template::UpgradeStrategy,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    CloneSet,
    AdvancedStatefulSet,
}

impl WorkloadKind {
    /// The kind rendered for `component`, `None` for components without pods.
    pub fn for_component(component: Component, open_kruise: bool) -> Option<Self> {
        let stateful = match component {
            Component::Meta | Component::Compute | Component::Standalone => true,
            Component::Frontend | Component::Compactor | Component::Connector => false,
            Component::Config => return None,
        };

        Some(match (stateful, open_kruise) {
            (true, false) => Self::StatefulSet,
            (true, true) => Self::AdvancedStatefulSet,
            (false, false) => Self::Deployment,
            (false, true) => Self::CloneSet,
        })
    }
}

/// Everything a workload is made of, independent of its kind.
#[derive(Clone, Debug)]
pub struct WorkloadParts {
    pub metadata: ObjectMeta,
    pub replicas: i32,
    pub selector: LabelSelector,
    pub template: PodTemplateSpec,
    pub upgrade_strategy: Option<UpgradeStrategy>,
    pub service_name: String,
}

/// Rollout progress of a workload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkloadObservation {
    pub generation: i64,
    pub observed_generation: i64,
    /// Desired replicas.
    pub replicas: i32,
    pub updated: i32,
    pub ready: i32,
    pub available: i32,
}

impl WorkloadObservation {
    /// Whether the controller of the workload has caught up with its `spec` and every updated pod
    /// is available.
    pub fn is_ready(&self) -> bool {
        self.observed_generation >= self.generation
            && self.updated >= self.replicas
            && self.available >= self.updated
    }
}

pub trait WorkloadDriver:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
    const KIND: WorkloadKind;

    fn render(parts: WorkloadParts) -> Result<Self>;

    fn observe(&self) -> WorkloadObservation;

    /// Revision the pods are being updated to, for kinds that track revisions.
    fn update_revision(&self) -> Option<&str> {
        None
    }
}

fn generation<K: Resource>(obj: &K) -> i64 {
    obj.meta().generation.unwrap_or_default()
}

impl WorkloadDriver for Deployment {
    const KIND: WorkloadKind = WorkloadKind::Deployment;

    fn render(parts: WorkloadParts) -> Result<Self> {
        Ok(Self {
            metadata: parts.metadata,
            spec: Some(DeploymentSpec {
                replicas: Some(parts.replicas),
                selector: parts.selector,
                template: parts.template,
                strategy: upgrade::deployment_strategy(parts.upgrade_strategy.as_ref()),
                ..DeploymentSpec::default()
            }),
            status: None,
        })
    }

    fn observe(&self) -> WorkloadObservation {
        let status = self.status.clone().unwrap_or_default();
        WorkloadObservation {
            generation: generation(self),
            observed_generation: status.observed_generation.unwrap_or_default(),
            replicas: self.spec.as_ref().and_then(|s| s.replicas).unwrap_or_default(),
            updated: status.updated_replicas.unwrap_or_default(),
            ready: status.ready_replicas.unwrap_or_default(),
            available: status.available_replicas.unwrap_or_default(),
        }
    }
}

impl WorkloadDriver for StatefulSet {
    const KIND: WorkloadKind = WorkloadKind::StatefulSet;

    fn render(parts: WorkloadParts) -> Result<Self> {
        Ok(Self {
            metadata: parts.metadata,
            spec: Some(StatefulSetSpec {
                replicas: Some(parts.replicas),
                selector: parts.selector,
                service_name: Some(parts.service_name),
                template: parts.template,
                pod_management_policy: Some("Parallel".to_owned()),
                update_strategy: upgrade::stateful_set_strategy(parts.upgrade_strategy.as_ref())?,
                ..StatefulSetSpec::default()
            }),
            status: None,
        })
    }

    fn observe(&self) -> WorkloadObservation {
        let status = self.status.clone().unwrap_or_default();
        WorkloadObservation {
            generation: generation(self),
            observed_generation: status.observed_generation.unwrap_or_default(),
            replicas: self.spec.as_ref().and_then(|s| s.replicas).unwrap_or_default(),
            updated: status.updated_replicas.unwrap_or_default(),
            ready: status.ready_replicas.unwrap_or_default(),
            available: status.available_replicas.unwrap_or_default(),
        }
    }

    fn update_revision(&self) -> Option<&str> {
        self.status.as_ref()?.update_revision.as_deref()
    }
}

impl WorkloadDriver for CloneSet {
    const KIND: WorkloadKind = WorkloadKind::CloneSet;

    fn render(parts: WorkloadParts) -> Result<Self> {
        let mut clone_set = Self::new("", CloneSetSpec {
            replicas: Some(parts.replicas),
            selector: parts.selector,
            template: parts.template,
            update_strategy: upgrade::clone_set_strategy(parts.upgrade_strategy.as_ref()),
        });
        clone_set.metadata = parts.metadata;
        Ok(clone_set)
    }

    fn observe(&self) -> WorkloadObservation {
        let status = self.status.clone().unwrap_or_default();
        WorkloadObservation {
            generation: generation(self),
            observed_generation: status.observed_generation,
            replicas: self.spec.replicas.unwrap_or_default(),
            updated: status.updated_replicas,
            ready: status.ready_replicas,
            available: status.available_replicas,
        }
    }

    fn update_revision(&self) -> Option<&str> {
        self.status.as_ref()?.update_revision.as_deref()
    }
}

impl WorkloadDriver for AdvancedStatefulSet {
    const KIND: WorkloadKind = WorkloadKind::AdvancedStatefulSet;

    fn render(parts: WorkloadParts) -> Result<Self> {
        let mut sts = Self::new("", AdvancedStatefulSetSpec {
            replicas: Some(parts.replicas),
            selector: parts.selector,
            service_name: Some(parts.service_name),
            template: parts.template,
            volume_claim_templates: Vec::new(),
            update_strategy: upgrade::advanced_stateful_set_strategy(
                parts.upgrade_strategy.as_ref(),
            )?,
        });
        sts.metadata = parts.metadata;
        Ok(sts)
    }

    fn observe(&self) -> WorkloadObservation {
        let status = self.status.clone().unwrap_or_default();
        WorkloadObservation {
            generation: generation(self),
            observed_generation: status.observed_generation.unwrap_or_default(),
            replicas: self.spec.replicas.unwrap_or_default(),
            updated: status.updated_replicas,
            ready: status.ready_replicas,
            available: status.available_replicas.unwrap_or(status.ready_replicas),
        }
    }

    fn update_revision(&self) -> Option<&str> {
        self.status.as_ref()?.update_revision.as_deref()
    }
}

impl ObjectFactory<'_> {
    /// The kind of workload `component` runs on for this RisingWave.
    pub fn workload_kind(&self, component: Component) -> Option<WorkloadKind> {
        WorkloadKind::for_component(component, self.risingwave.spec.enable_open_kruise)
    }

    /// Renders the workload of one group, `None` when the group is not declared.
    pub fn new_workload<W: WorkloadDriver>(
        &self,
        component: Component,
        group: &str,
    ) -> Result<Option<W>> {
        let matches_kind = WorkloadKind::for_component(component, false) == Some(W::KIND)
            || WorkloadKind::for_component(component, true) == Some(W::KIND);
        if !matches_kind {
            return NotAWorkloadSnafu { component }.fail();
        }
        let Some(group) = self.group(component, group) else {
            return Ok(None);
        };

        let parts = WorkloadParts {
            metadata: self.group_object_meta(component, &group.name),
            replicas: group.replicas,
            selector: LabelSelector {
                match_labels: Some(self.group_selector(component, &group.name)),
                ..LabelSelector::default()
            },
            template: self.pod_template_spec(component, &group)?,
            upgrade_strategy: group.template.upgrade_strategy.clone(),
            service_name: self.service_name(component),
        };
        W::render(parts).map(Some)
    }

    /// Renders every workload once, so that a broken configuration is reported before any object
    /// is written.
    pub fn validate(&self) -> Result<()> {
        for component in self.workload_components() {
            for group in self.groups(component) {
                match self.workload_kind(component) {
                    Some(WorkloadKind::StatefulSet) => {
                        self.new_workload::<StatefulSet>(component, &group.name)?;
                    }
                    Some(WorkloadKind::AdvancedStatefulSet) => {
                        self.new_workload::<AdvancedStatefulSet>(component, &group.name)?;
                    }
                    Some(WorkloadKind::Deployment) => {
                        self.new_workload::<Deployment>(component, &group.name)?;
                    }
                    Some(WorkloadKind::CloneSet) => {
                        self.new_workload::<CloneSet>(component, &group.name)?;
                    }
                    None => {}
                }
            }
        }
        Ok(())
    }

    pub fn new_meta_stateful_set(&self, group: &str) -> Result<Option<StatefulSet>> {
        self.new_workload(Component::Meta, group)
    }

    pub fn new_compute_stateful_set(&self, group: &str) -> Result<Option<StatefulSet>> {
        self.new_workload(Component::Compute, group)
    }

    pub fn new_standalone_stateful_set(&self, group: &str) -> Result<Option<StatefulSet>> {
        self.new_workload(Component::Standalone, group)
    }

    pub fn new_frontend_deployment(&self, group: &str) -> Result<Option<Deployment>> {
        self.new_workload(Component::Frontend, group)
    }

    pub fn new_compactor_deployment(&self, group: &str) -> Result<Option<Deployment>> {
        self.new_workload(Component::Compactor, group)
    }

    pub fn new_connector_deployment(&self, group: &str) -> Result<Option<Deployment>> {
        self.new_workload(Component::Connector, group)
    }

    pub fn new_meta_advanced_stateful_set(
        &self,
        group: &str,
    ) -> Result<Option<AdvancedStatefulSet>> {
        self.new_workload(Component::Meta, group)
    }

    pub fn new_compute_advanced_stateful_set(
        &self,
        group: &str,
    ) -> Result<Option<AdvancedStatefulSet>> {
        self.new_workload(Component::Compute, group)
    }

    pub fn new_standalone_advanced_stateful_set(
        &self,
        group: &str,
    ) -> Result<Option<AdvancedStatefulSet>> {
        self.new_workload(Component::Standalone, group)
    }

    pub fn new_frontend_clone_set(&self, group: &str) -> Result<Option<CloneSet>> {
        self.new_workload(Component::Frontend, group)
    }

    pub fn new_compactor_clone_set(&self, group: &str) -> Result<Option<CloneSet>> {
        self.new_workload(Component::Compactor, group)
    }

    pub fn new_connector_clone_set(&self, group: &str) -> Result<Option<CloneSet>> {
        self.new_workload(Component::Connector, group)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use indoc::indoc;
    use k8s_openapi::api::apps::v1::{DeploymentStatus, StatefulSetStatus};
    use kube::ResourceExt;
    use rstest::rstest;

    use super::*;
    use crate::{
        consts::{LABEL_RISINGWAVE_GENERATION, LABEL_RISINGWAVE_GROUP},
        factory::tests::{OPERATOR_VERSION, minimal, risingwave},
    };

    #[rstest]
    #[case(Component::Meta, false, Some(WorkloadKind::StatefulSet))]
    #[case(Component::Compute, true, Some(WorkloadKind::AdvancedStatefulSet))]
    #[case(Component::Frontend, false, Some(WorkloadKind::Deployment))]
    #[case(Component::Connector, true, Some(WorkloadKind::CloneSet))]
    #[case(Component::Config, false, None)]
    fn kinds(
        #[case] component: Component,
        #[case] kruise: bool,
        #[case] expected: Option<WorkloadKind>,
    ) {
        assert_eq!(WorkloadKind::for_component(component, kruise), expected);
    }

    #[test]
    fn one_workload_per_group() {
        let rw = risingwave(indoc! {"
            global:
              image: risingwave:v1
              replicas:
                compute: 1
            components:
              compute:
                groups:
                - name: a
                  replicas: 2
                - name: b
                  replicas: 3
            stateStore:
              memory: true
        "});
        let factory = ObjectFactory::new(&rw, OPERATOR_VERSION).unwrap();

        let workloads: Vec<StatefulSet> = factory
            .groups(Component::Compute)
            .iter()
            .map(|group| factory.new_compute_stateful_set(&group.name).unwrap().unwrap())
            .collect();

        let names: HashSet<String> = workloads.iter().map(ResourceExt::name_any).collect();
        assert_eq!(names, HashSet::from([
            "rw-compute".to_owned(),
            "rw-compute-a".to_owned(),
            "rw-compute-b".to_owned()
        ]));
        for sts in &workloads {
            assert_eq!(sts.owner_references()[0].name, "rw");
            assert_eq!(sts.labels()[LABEL_RISINGWAVE_GENERATION], "3");
            assert!(factory.is_up_to_date(sts));
        }
        assert_eq!(workloads[2].labels()[LABEL_RISINGWAVE_GROUP], "b");
        assert_eq!(workloads[2].spec.as_ref().unwrap().replicas, Some(3));
        assert_eq!(
            workloads[2].spec.as_ref().unwrap().service_name.as_deref(),
            Some("rw-compute")
        );
        assert!(factory.new_compute_stateful_set("missing").unwrap().is_none());
    }

    #[test]
    fn wrong_kind_is_rejected() {
        let rw = minimal();
        let factory = ObjectFactory::new(&rw, OPERATOR_VERSION).unwrap();
        assert!(factory.new_workload::<Deployment>(Component::Meta, "").is_err());
    }

    #[test]
    fn rendering_is_idempotent() {
        let rw = minimal();
        let factory = ObjectFactory::new(&rw, OPERATOR_VERSION).unwrap();
        assert_eq!(
            factory.new_frontend_clone_set("").unwrap(),
            factory.new_frontend_clone_set("").unwrap()
        );
        assert_eq!(
            factory.new_meta_advanced_stateful_set("").unwrap(),
            factory.new_meta_advanced_stateful_set("").unwrap()
        );
    }

    #[rstest]
    #[case(3, 3, 3, 3, 3, true)]
    #[case(2, 3, 3, 3, 3, false)]
    #[case(3, 3, 2, 2, 2, false)]
    #[case(3, 3, 3, 3, 2, false)]
    fn deployment_readiness(
        #[case] observed: i64,
        #[case] replicas: i32,
        #[case] updated: i32,
        #[case] ready: i32,
        #[case] available: i32,
        #[case] expected: bool,
    ) {
        let mut deployment = Deployment::render(WorkloadParts {
            metadata: ObjectMeta {
                generation: Some(3),
                ..ObjectMeta::default()
            },
            replicas,
            selector: LabelSelector::default(),
            template: PodTemplateSpec::default(),
            upgrade_strategy: None,
            service_name: String::new(),
        })
        .unwrap();
        deployment.status = Some(DeploymentStatus {
            observed_generation: Some(observed),
            updated_replicas: Some(updated),
            ready_replicas: Some(ready),
            available_replicas: Some(available),
            ..DeploymentStatus::default()
        });

        assert_eq!(deployment.observe().is_ready(), expected);
    }

    #[test]
    fn stateful_set_revision() {
        let mut sts = StatefulSet::default();
        assert_eq!(sts.update_revision(), None);
        sts.status = Some(StatefulSetStatus {
            update_revision: Some("rw-compute-abc".to_owned()),
            ..StatefulSetStatus::default()
        });
        assert_eq!(sts.update_revision(), Some("rw-compute-abc"));
    }

    #[test]
    fn validate_reports_invalid_partition() {
        assert!(ObjectFactory::new(&minimal(), OPERATOR_VERSION).unwrap().validate().is_ok());

        let rw = risingwave(indoc! {"
            global:
              image: risingwave:v1
              replicas:
                meta: 1
              upgradeStrategy:
                type: RollingUpdate
                rollingUpdate:
                  partition: half
            metaStore:
              memory: true
            stateStore:
              memory: true
        "});
        let err = ObjectFactory::new(&rw, OPERATOR_VERSION)
            .unwrap()
            .validate()
            .unwrap_err();
        assert!(err.is_invalid_configuration());
    }
}
