//! Custom resources served by the operator, plus the foreign ones it renders.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

pub mod external;
pub mod meta_store;
pub mod scale_view;
pub mod state_store;
pub mod status;
pub mod template;

use self::{
    meta_store::MetaStoreBackend,
    state_store::StateStoreBackend,
    status::RisingWaveStatus,
    template::{ComponentSpec, ComponentsSpec, GlobalSpec, PartialObjectMeta},
};

/// A RisingWave cluster.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "risingwave.risingwavelabs.com",
    version = "v1alpha1",
    kind = "RisingWave",
    plural = "risingwaves",
    shortname = "rw",
    status = "RisingWaveStatus",
    namespaced,
    crates(
        kube_core = "kube::core",
        k8s_openapi = "k8s_openapi",
        schemars = "schemars"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct RisingWaveSpec {
    #[serde(default)]
    pub global: GlobalSpec,

    #[serde(default)]
    pub components: ComponentsSpec,

    #[serde(default)]
    pub meta_store: MetaStoreBackend,

    #[serde(default)]
    pub state_store: StateStoreBackend,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,

    /// Service type of the frontend service, `ClusterIP` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend_service_type: Option<String>,

    #[serde(default)]
    pub enable_open_kruise: bool,

    /// Run every component in a single workload.
    #[serde(default)]
    pub enable_standalone_mode: bool,

    #[serde(default)]
    pub additional_frontend_service_metadata: PartialObjectMeta,

    #[serde(default)]
    pub additional_meta_service_metadata: PartialObjectMeta,

    #[serde(default)]
    pub enable_default_service_monitor: bool,
}

fn default_tls_key() -> String {
    "tls.key".to_owned()
}

fn default_tls_cert() -> String {
    "tls.crt".to_owned()
}

#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    #[serde(default)]
    pub secret_name: String,

    #[serde(default = "default_tls_key")]
    pub key: String,

    #[serde(default = "default_tls_cert")]
    pub cert: String,
}

impl TlsConfig {
    pub fn is_enabled(&self) -> bool {
        !self.secret_name.is_empty()
    }
}

#[derive(
    AsRefStr,
    Clone,
    Copy,
    Debug,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
    Eq,
    Hash,
    IntoStaticStr,
    JsonSchema,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Component {
    Meta,
    Frontend,
    Compute,
    Compactor,
    Connector,
    Standalone,
    Config,
}

impl Component {
    /// The components whose node groups can be scaled through a scale view.
    pub const SCALABLE: [Self; 4] = [Self::Meta, Self::Frontend, Self::Compute, Self::Compactor];

    pub fn is_scalable(self) -> bool {
        Self::SCALABLE.contains(&self)
    }
}

impl RisingWaveSpec {
    pub fn component(&self, component: Component) -> Option<&ComponentSpec> {
        let components = &self.components;
        match component {
            Component::Meta => Some(&components.meta),
            Component::Frontend => Some(&components.frontend),
            Component::Compute => Some(&components.compute),
            Component::Compactor => Some(&components.compactor),
            Component::Connector => Some(&components.connector),
            Component::Standalone => Some(&components.standalone),
            Component::Config => None,
        }
    }

    pub fn component_mut(&mut self, component: Component) -> Option<&mut ComponentSpec> {
        let components = &mut self.components;
        match component {
            Component::Meta => Some(&mut components.meta),
            Component::Frontend => Some(&mut components.frontend),
            Component::Compute => Some(&mut components.compute),
            Component::Compactor => Some(&mut components.compactor),
            Component::Connector => Some(&mut components.connector),
            Component::Standalone => Some(&mut components.standalone),
            Component::Config => None,
        }
    }

    /// Replicas of the default group, taken from `spec.global.replicas`.
    pub fn global_replicas(&self, component: Component) -> i32 {
        let replicas = &self.global.replicas;
        match component {
            Component::Meta => replicas.meta,
            Component::Frontend => replicas.frontend,
            Component::Compute => replicas.compute,
            Component::Compactor => replicas.compactor,
            Component::Connector => replicas.connector,
            Component::Standalone => replicas.standalone,
            Component::Config => 0,
        }
    }

    pub fn global_replicas_mut(&mut self, component: Component) -> Option<&mut i32> {
        let replicas = &mut self.global.replicas;
        match component {
            Component::Meta => Some(&mut replicas.meta),
            Component::Frontend => Some(&mut replicas.frontend),
            Component::Compute => Some(&mut replicas.compute),
            Component::Compactor => Some(&mut replicas.compactor),
            Component::Connector => Some(&mut replicas.connector),
            Component::Standalone => Some(&mut replicas.standalone),
            Component::Config => None,
        }
    }

    /// Whether the connector component has at least one replica in any group.
    pub fn has_connector(&self) -> bool {
        self.global.replicas.connector > 0
            || self
                .components
                .connector
                .groups
                .iter()
                .any(|group| group.replicas > 0)
    }
}

impl RisingWave {
    /// The tag part of the global image, e.g. `v1.9.0` for `risingwave:v1.9.0`.
    pub fn image_tag(&self) -> Option<&str> {
        let image = self.spec.global.template.image.as_deref()?;
        let image = image.split_once('@').map_or(image, |(name, _)| name);
        let (_, last_segment) = image.rsplit_once('/').unwrap_or(("", image));
        last_segment.split_once(':').map(|(_, tag)| tag)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("risingwave:v1.9.0", Some("v1.9.0"))]
    #[case("ghcr.io/risingwavelabs/risingwave:nightly", Some("nightly"))]
    #[case("localhost:5000/risingwave", None)]
    #[case("localhost:5000/risingwave:v2@sha256:abc", Some("v2"))]
    fn image_tag(#[case] image: &str, #[case] expected: Option<&str>) {
        let mut rw = RisingWave::new("rw", RisingWaveSpec::default());
        rw.spec.global.template.image = Some(image.to_owned());
        assert_eq!(rw.image_tag(), expected);
    }

    #[test]
    fn parse_minimal() {
        let rw: RisingWave = serde_yaml::from_str(indoc! {"
            apiVersion: risingwave.risingwavelabs.com/v1alpha1
            kind: RisingWave
            metadata:
              name: rw
              namespace: default
            spec:
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
              tls:
                secretName: rw-tls
        "})
        .unwrap();

        assert_eq!(rw.spec.global_replicas(Component::Compute), 1);
        assert_eq!(rw.spec.tls.as_ref().map(|t| t.cert.as_str()), Some("tls.crt"));
        assert!(!rw.spec.has_connector());
        assert_eq!(Component::Compactor.to_string(), "compactor");
        assert!(!Component::Connector.is_scalable());
    }
}
