//! Renders the child objects of a [`RisingWave`].
//!
//! Rendering is a pure function of the RisingWave object and the operator version: the same
//! input always yields the same objects, so that comparing generation labels is enough to tell
//! whether a child is up to date.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use snafu::{OptionExt, Snafu};

use crate::{
    consts::{
        DEFAULT_COMPACTOR_METRICS_PORT, DEFAULT_COMPACTOR_SERVICE_PORT,
        DEFAULT_COMPUTE_METRICS_PORT, DEFAULT_COMPUTE_SERVICE_PORT, DEFAULT_CONNECTOR_METRICS_PORT,
        DEFAULT_CONNECTOR_SERVICE_PORT, DEFAULT_FRONTEND_METRICS_PORT,
        DEFAULT_FRONTEND_SERVICE_PORT, DEFAULT_META_DASHBOARD_PORT, DEFAULT_META_METRICS_PORT,
        DEFAULT_META_SERVICE_PORT, LABEL_RISINGWAVE_COMPONENT, LABEL_RISINGWAVE_GENERATION,
        LABEL_RISINGWAVE_GROUP, LABEL_RISINGWAVE_NAME, LABEL_RISINGWAVE_OPERATOR_VERSION, NO_SYNC,
    },
    crd::{Component, RisingWave, meta_store, state_store, template::PodTemplate},
};

mod config;
pub mod container;
mod cpu;
mod labels;
mod monitor;
mod services;
mod storage;
mod upgrade;
pub mod workload;

pub use self::workload::{WorkloadDriver, WorkloadKind, WorkloadObservation};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("the RisingWave has no {field}"))]
    MissingMetadata { field: &'static str },

    #[snafu(display("invalid state store"))]
    InvalidStateStore { source: state_store::Error },

    #[snafu(display("invalid meta store"))]
    InvalidMetaStore { source: meta_store::Error },

    #[snafu(display("partition {value:?} is neither an integer nor a percentage"))]
    InvalidPartition { value: String },

    #[snafu(display("{component} is not rendered as a workload"))]
    NotAWorkload { component: Component },
}

impl Error {
    /// Whether the error is caused by the RisingWave object itself and retrying cannot help.
    pub fn is_invalid_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidStateStore { .. }
                | Self::InvalidMetaStore { .. }
                | Self::InvalidPartition { .. }
        )
    }
}

/// Service, metrics and dashboard ports of a component.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ports {
    pub service: i32,
    pub metrics: i32,
    pub dashboard: Option<i32>,
}

/// A node group resolved against the global template.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedGroup {
    pub name: String,
    pub replicas: i32,
    pub template: PodTemplate,
    pub restart_at: Option<k8s_openapi::apimachinery::pkg::apis::meta::v1::Time>,
}

pub struct ObjectFactory<'a> {
    risingwave: &'a RisingWave,
    operator_version: &'a str,
    name: String,
    namespace: String,
    owner: OwnerReference,
    inherited_labels: BTreeMap<String, String>,
}

impl<'a> ObjectFactory<'a> {
    pub fn new(risingwave: &'a RisingWave, operator_version: &'a str) -> Result<Self> {
        let name = risingwave
            .meta()
            .name
            .clone()
            .context(MissingMetadataSnafu { field: "name" })?;
        let namespace = risingwave
            .namespace()
            .context(MissingMetadataSnafu { field: "namespace" })?;
        let owner = risingwave
            .controller_owner_ref(&())
            .context(MissingMetadataSnafu { field: "uid" })?;

        Ok(Self {
            inherited_labels: labels::inherited_labels(risingwave),
            risingwave,
            operator_version,
            name,
            namespace,
            owner,
        })
    }

    pub fn risingwave(&self) -> &RisingWave {
        self.risingwave
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn operator_version(&self) -> &str {
        self.operator_version
    }

    pub fn service_name(&self, component: Component) -> String {
        format!("{}-{component}", self.name)
    }

    pub fn workload_name(&self, component: Component, group: &str) -> String {
        if group.is_empty() {
            self.service_name(component)
        } else {
            format!("{}-{component}-{group}", self.name)
        }
    }

    pub fn config_map_name(&self) -> String {
        format!("{}-config", self.name)
    }

    pub fn service_monitor_name(&self) -> String {
        format!("risingwave-{}", self.name)
    }

    pub fn ports(&self, component: Component) -> Ports {
        let (service, metrics, dashboard) = match component {
            Component::Meta => (
                DEFAULT_META_SERVICE_PORT,
                DEFAULT_META_METRICS_PORT,
                Some(DEFAULT_META_DASHBOARD_PORT),
            ),
            Component::Frontend => {
                (DEFAULT_FRONTEND_SERVICE_PORT, DEFAULT_FRONTEND_METRICS_PORT, None)
            }
            Component::Compute => {
                (DEFAULT_COMPUTE_SERVICE_PORT, DEFAULT_COMPUTE_METRICS_PORT, None)
            }
            Component::Compactor => {
                (DEFAULT_COMPACTOR_SERVICE_PORT, DEFAULT_COMPACTOR_METRICS_PORT, None)
            }
            Component::Connector => {
                (DEFAULT_CONNECTOR_SERVICE_PORT, DEFAULT_CONNECTOR_METRICS_PORT, None)
            }
            Component::Standalone => (
                DEFAULT_FRONTEND_SERVICE_PORT,
                DEFAULT_META_METRICS_PORT,
                Some(DEFAULT_META_DASHBOARD_PORT),
            ),
            Component::Config => (0, 0, None),
        };

        let overrides = self
            .risingwave
            .spec
            .component(component)
            .map(|spec| spec.ports)
            .unwrap_or_default();
        Ports {
            service: overrides.service.unwrap_or(service),
            metrics: overrides.metrics.unwrap_or(metrics),
            dashboard: overrides.dashboard.or(dashboard),
        }
    }

    /// Components rendered as workloads in the current mode.
    pub fn workload_components(&self) -> Vec<Component> {
        if self.risingwave.spec.enable_standalone_mode {
            vec![Component::Standalone]
        } else {
            vec![
                Component::Meta,
                Component::Frontend,
                Component::Compute,
                Component::Compactor,
                Component::Connector,
            ]
        }
    }

    /// Components exposed through a service in the current mode. The connector only has one while
    /// it runs replicas.
    pub fn service_components(&self) -> Vec<Component> {
        let spec = &self.risingwave.spec;
        if spec.enable_standalone_mode {
            return vec![Component::Standalone];
        }

        let mut components = vec![
            Component::Meta,
            Component::Frontend,
            Component::Compute,
            Component::Compactor,
        ];
        if spec.has_connector() {
            components.push(Component::Connector);
        }
        components
    }

    /// Groups of `component` that should have a workload, sorted by name.
    ///
    /// The default (empty-named) group exists when `spec.global.replicas` asks for replicas of the
    /// component, or when it is listed explicitly.
    pub fn groups(&self, component: Component) -> Vec<ResolvedGroup> {
        let spec = &self.risingwave.spec;
        let global_template = &spec.global.template;
        let Some(component_spec) = spec.component(component) else {
            return Vec::new();
        };

        let mut groups: BTreeMap<String, ResolvedGroup> = BTreeMap::new();
        let global_replicas = spec.global_replicas(component);
        if global_replicas > 0 {
            groups.insert(String::new(), ResolvedGroup {
                name: String::new(),
                replicas: global_replicas,
                template: global_template.clone(),
                restart_at: component_spec.restart_at.clone(),
            });
        }

        // Standalone mode runs exactly one workload.
        if component == Component::Standalone {
            return groups.into_values().collect();
        }

        for group in &component_spec.groups {
            let template = group
                .template
                .as_ref()
                .map_or_else(|| global_template.clone(), |t| t.merged_over(global_template));
            groups.insert(group.name.clone(), ResolvedGroup {
                name: group.name.clone(),
                replicas: group.replicas,
                template,
                restart_at: group
                    .restart_at
                    .clone()
                    .or_else(|| component_spec.restart_at.clone()),
            });
        }
        groups.into_values().collect()
    }

    pub fn group(&self, component: Component, group: &str) -> Option<ResolvedGroup> {
        self.groups(component).into_iter().find(|g| g.name == group)
    }

    /// Labels selecting all pods of a component.
    pub fn component_selector(&self, component: Component) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_RISINGWAVE_NAME.to_owned(), self.name.clone()),
            (LABEL_RISINGWAVE_COMPONENT.to_owned(), component.to_string()),
        ])
    }

    /// Labels selecting the pods of one group.
    pub fn group_selector(&self, component: Component, group: &str) -> BTreeMap<String, String> {
        let mut labels = self.component_selector(component);
        labels.insert(LABEL_RISINGWAVE_GROUP.to_owned(), group.to_owned());
        labels
    }

    fn generation_label(&self, sync: bool) -> String {
        match (sync, self.risingwave.meta().generation) {
            (true, Some(generation)) => generation.to_string(),
            _ => NO_SYNC.to_owned(),
        }
    }

    fn object_labels(
        &self,
        mut labels: BTreeMap<String, String>,
        sync: bool,
    ) -> BTreeMap<String, String> {
        let mut all = self.inherited_labels.clone();
        all.append(&mut labels);
        all.insert(LABEL_RISINGWAVE_GENERATION.to_owned(), self.generation_label(sync));
        all.insert(
            LABEL_RISINGWAVE_OPERATOR_VERSION.to_owned(),
            self.operator_version.to_owned(),
        );
        all
    }

    /// Metadata of an object shared by all groups of a component.
    fn component_object_meta(&self, name: String, component: Component, sync: bool) -> ObjectMeta {
        self.object_meta(name, self.object_labels(self.component_selector(component), sync))
    }

    /// Metadata of an object belonging to one group.
    fn group_object_meta(&self, component: Component, group: &str) -> ObjectMeta {
        self.object_meta(
            self.workload_name(component, group),
            self.object_labels(self.group_selector(component, group), true),
        )
    }

    fn object_meta(&self, name: String, labels: BTreeMap<String, String>) -> ObjectMeta {
        ObjectMeta {
            name: Some(name),
            namespace: Some(self.namespace.clone()),
            labels: Some(labels),
            owner_references: Some(vec![self.owner.clone()]),
            ..ObjectMeta::default()
        }
    }

    /// Whether the object was rendered for the current generation by the current operator.
    pub fn is_up_to_date<K: Resource>(&self, obj: &K) -> bool {
        let labels = obj.meta().labels.as_ref();
        let label = |key| labels.and_then(|labels| labels.get(key)).map(String::as_str);

        let generation = self.generation_label(true);
        matches!(label(LABEL_RISINGWAVE_GENERATION), Some(g) if g == generation || g == NO_SYNC)
            && label(LABEL_RISINGWAVE_OPERATOR_VERSION) == Some(self.operator_version)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use indoc::{formatdoc, indoc};
    use rstest::rstest;

    use super::*;

    pub const OPERATOR_VERSION: &str = "v0.1.0";

    pub fn risingwave(spec_yaml: &str) -> RisingWave {
        let spec = spec_yaml
            .lines()
            .map(|line| format!("  {line}"))
            .collect::<Vec<_>>()
            .join("\n");
        serde_yaml::from_str(&formatdoc! {"
            apiVersion: risingwave.risingwavelabs.com/v1alpha1
            kind: RisingWave
            metadata:
              name: rw
              namespace: default
              uid: 3f1b0a4e-0000-4000-8000-000000000001
              generation: 3
            spec:
            {spec}
        "})
        .unwrap()
    }

    pub fn minimal() -> RisingWave {
        risingwave(indoc! {"
            global:
              image: risingwave:v1.9.0
              replicas:
                meta: 1
                frontend: 1
                compute: 1
                compactor: 1
            metaStore:
              memory: true
            stateStore:
              memory: true
        "})
    }

    #[rstest]
    #[case(Component::Meta, "", "rw-meta")]
    #[case(Component::Compute, "big", "rw-compute-big")]
    fn names(#[case] component: Component, #[case] group: &str, #[case] expected: &str) {
        let rw = minimal();
        let factory = ObjectFactory::new(&rw, OPERATOR_VERSION).unwrap();
        assert_eq!(factory.workload_name(component, group), expected);
        assert_eq!(factory.config_map_name(), "rw-config");
        assert_eq!(factory.service_monitor_name(), "risingwave-rw");
    }

    #[test]
    fn groups_include_default_and_named() {
        let rw = risingwave(indoc! {"
            global:
              image: risingwave:v1
              replicas:
                compute: 1
            components:
              compute:
                groups:
                - name: big
                  replicas: 2
                  template:
                    image: risingwave:v2
        "});
        let factory = ObjectFactory::new(&rw, OPERATOR_VERSION).unwrap();

        let groups = factory.groups(Component::Compute);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "");
        assert_eq!(groups[0].template.image.as_deref(), Some("risingwave:v1"));
        assert_eq!(groups[1].replicas, 2);
        assert_eq!(groups[1].template.image.as_deref(), Some("risingwave:v2"));
        assert!(factory.groups(Component::Frontend).is_empty());
    }

    #[rstest]
    #[case(
        "global: {replicas: {meta: 1}}",
        &[Component::Meta, Component::Frontend, Component::Compute, Component::Compactor]
    )]
    #[case(
        "global: {replicas: {connector: 1}}",
        &[
            Component::Meta,
            Component::Frontend,
            Component::Compute,
            Component::Compactor,
            Component::Connector,
        ]
    )]
    #[case("enableStandaloneMode: true", &[Component::Standalone])]
    fn service_components(#[case] spec: &str, #[case] expected: &[Component]) {
        let rw = risingwave(spec);
        let factory = ObjectFactory::new(&rw, OPERATOR_VERSION).unwrap();
        assert_eq!(factory.service_components(), expected);
    }

    #[test]
    fn missing_uid_is_rejected() {
        let mut rw = minimal();
        rw.metadata.uid = None;
        assert!(matches!(
            ObjectFactory::new(&rw, OPERATOR_VERSION),
            Err(Error::MissingMetadata { field: "uid" })
        ));
    }

    #[test]
    fn port_overrides() {
        let rw = risingwave(indoc! {"
            components:
              meta:
                ports:
                  service: 15690
        "});
        let factory = ObjectFactory::new(&rw, OPERATOR_VERSION).unwrap();

        assert_eq!(factory.ports(Component::Meta), Ports {
            service: 15690,
            metrics: DEFAULT_META_METRICS_PORT,
            dashboard: Some(DEFAULT_META_DASHBOARD_PORT),
        });
    }
}
