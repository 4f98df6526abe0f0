use k8s_openapi::{
    api::core::v1::{Service, ServicePort, ServiceSpec},
    apimachinery::pkg::util::intstr::IntOrString,
};

use super::{ObjectFactory, Ports};
use crate::{
    consts::{PORT_DASHBOARD, PORT_METRICS, PORT_SERVICE},
    crd::{Component, template::PartialObjectMeta},
};

const CLUSTER_IP: &str = "ClusterIP";

fn service_ports(ports: Ports) -> Vec<ServicePort> {
    let port = |name: &str, port| ServicePort {
        name: Some(name.to_owned()),
        port,
        target_port: Some(IntOrString::String(name.to_owned())),
        protocol: Some("TCP".to_owned()),
        ..ServicePort::default()
    };

    let mut service_ports = vec![
        port(PORT_SERVICE, ports.service),
        port(PORT_METRICS, ports.metrics),
    ];
    if let Some(dashboard) = ports.dashboard {
        service_ports.push(port(PORT_DASHBOARD, dashboard));
    }
    service_ports
}

impl ObjectFactory<'_> {
    /// A service spanning all groups of `component`.
    pub fn new_service(&self, component: Component) -> Service {
        let spec = &self.risingwave.spec;
        let mut metadata =
            self.component_object_meta(self.service_name(component), component, true);

        let additional = match component {
            Component::Frontend => Some(&spec.additional_frontend_service_metadata),
            Component::Meta => Some(&spec.additional_meta_service_metadata),
            _ => None,
        };
        if let Some(PartialObjectMeta {
            labels,
            annotations,
        }) = additional
        {
            let mut merged = labels.clone();
            merged.extend(metadata.labels.take().unwrap_or_default());
            metadata.labels = Some(merged);
            if !annotations.is_empty() {
                metadata.annotations = Some(annotations.clone());
            }
        }

        let type_ = match component {
            Component::Frontend => spec
                .frontend_service_type
                .clone()
                .unwrap_or_else(|| CLUSTER_IP.to_owned()),
            _ => CLUSTER_IP.to_owned(),
        };

        Service {
            metadata,
            spec: Some(ServiceSpec {
                type_: Some(type_),
                // Meta pods advertise `<pod>.<service>`, which only resolves through a headless
                // service.
                cluster_ip: (component == Component::Meta).then(|| "None".to_owned()),
                selector: Some(self.component_selector(component)),
                ports: Some(service_ports(self.ports(component))),
                ..ServiceSpec::default()
            }),
            ..Service::default()
        }
    }

    pub fn new_meta_service(&self) -> Service {
        self.new_service(Component::Meta)
    }

    pub fn new_frontend_service(&self) -> Service {
        self.new_service(Component::Frontend)
    }

    pub fn new_compute_service(&self) -> Service {
        self.new_service(Component::Compute)
    }

    pub fn new_compactor_service(&self) -> Service {
        self.new_service(Component::Compactor)
    }

    pub fn new_connector_service(&self) -> Service {
        self.new_service(Component::Connector)
    }

    pub fn new_standalone_service(&self) -> Service {
        self.new_service(Component::Standalone)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use kube::ResourceExt;
    use rstest::rstest;

    use super::*;
    use crate::{
        consts::{LABEL_RISINGWAVE_COMPONENT, LABEL_RISINGWAVE_NAME},
        factory::tests::{OPERATOR_VERSION, minimal, risingwave},
    };

    #[rstest]
    #[case(Component::Meta, "rw-meta", &[5690, 1250, 5691])]
    #[case(Component::Frontend, "rw-frontend", &[4567, 8080])]
    #[case(Component::Compute, "rw-compute", &[5688, 1222])]
    #[case(Component::Compactor, "rw-compactor", &[6660, 1260])]
    #[case(Component::Connector, "rw-connector", &[50051, 50052])]
    fn default_services(#[case] component: Component, #[case] name: &str, #[case] ports: &[i32]) {
        let rw = minimal();
        let factory = ObjectFactory::new(&rw, OPERATOR_VERSION).unwrap();

        let service = factory.new_service(component);

        assert_eq!(service.name_any(), name);
        assert_eq!(service.namespace().as_deref(), Some("default"));
        assert_eq!(service.owner_references()[0].uid, rw.metadata.uid.clone().unwrap());
        let spec = service.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
        assert_eq!(
            spec.ports.unwrap().iter().map(|p| p.port).collect::<Vec<_>>(),
            ports
        );
        let selector = spec.selector.unwrap();
        assert_eq!(selector[LABEL_RISINGWAVE_NAME], "rw");
        assert_eq!(selector[LABEL_RISINGWAVE_COMPONENT], component.to_string());
    }

    #[test]
    fn frontend_service_type_and_metadata() {
        let rw = risingwave(indoc! {"
            frontendServiceType: LoadBalancer
            additionalFrontendServiceMetadata:
              labels:
                exposed: 'true'
                risingwave/name: other
              annotations:
                lb.io/internal: 'true'
        "});
        let factory = ObjectFactory::new(&rw, OPERATOR_VERSION).unwrap();

        let frontend = factory.new_frontend_service();
        assert_eq!(frontend.spec.as_ref().unwrap().type_.as_deref(), Some("LoadBalancer"));
        assert_eq!(frontend.labels()["exposed"], "true");
        assert_eq!(frontend.labels()[LABEL_RISINGWAVE_NAME], "rw");
        assert_eq!(frontend.annotations()["lb.io/internal"], "true");

        let compute = factory.new_compute_service();
        assert_eq!(compute.spec.as_ref().unwrap().type_.as_deref(), Some("ClusterIP"));
        assert!(!compute.labels().contains_key("exposed"));
    }

    #[test]
    fn meta_service_is_headless() {
        let rw = minimal();
        let factory = ObjectFactory::new(&rw, OPERATOR_VERSION).unwrap();
        assert_eq!(
            factory.new_meta_service().spec.unwrap().cluster_ip.as_deref(),
            Some("None")
        );
    }
}
