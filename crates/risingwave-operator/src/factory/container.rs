//! Pod templates of the RisingWave workloads.
//!
//! Every pod runs a single container named after its component. The container starts from the
//! user's template and receives the operator's environment on top of it: a variable rendered by
//! the operator replaces a user variable of the same name. Lists are normalized afterwards so
//! that rendering the same RisingWave twice gives identical pod templates.

use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::{
        ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource,
        LocalObjectReference, PodSpec, PodTemplateSpec, Probe, ResourceFieldSelector,
        SecretVolumeSource, TCPSocketAction, Volume, VolumeMount,
    },
    apimachinery::pkg::{apis::meta::v1::ObjectMeta, util::intstr::IntOrString},
};

use super::{ObjectFactory, Ports, ResolvedGroup, Result, cpu::CpuQuantity, storage};
use crate::{
    consts::{
        ANNOTATION_RESTART_AT, CONFIG_FILE_PATH, CONFIG_MOUNT_PATH, CONFIG_VOLUME_NAME,
        CONNECTOR_EXECUTABLE, DEFAULT_COMPACTOR_SERVICE_PORT, DEFAULT_COMPUTE_SERVICE_PORT,
        DEFAULT_META_SERVICE_PORT, HEALTH_CHECK_INITIAL_DELAY_SECONDS, HEALTH_CHECK_PERIOD_SECONDS,
        PORT_DASHBOARD, PORT_METRICS, PORT_SERVICE, RISINGWAVE_EXECUTABLE,
    },
    crd::Component,
    utils::env::{env_from_field, env_value, merge_env, sort_by_dependency},
};

pub const POD_IP: &str = "POD_IP";
pub const POD_NAME: &str = "POD_NAME";
pub const RUST_BACKTRACE: &str = "RUST_BACKTRACE";
pub const RW_WORKER_THREADS: &str = "RW_WORKER_THREADS";
pub const RW_PARALLELISM: &str = "RW_PARALLELISM";
pub const RW_TOTAL_MEMORY_BYTES: &str = "RW_TOTAL_MEMORY_BYTES";
pub const RW_LISTEN_ADDR: &str = "RW_LISTEN_ADDR";
pub const RW_ADVERTISE_ADDR: &str = "RW_ADVERTISE_ADDR";
pub const RW_DASHBOARD_HOST: &str = "RW_DASHBOARD_HOST";
pub const RW_PROMETHEUS_HOST: &str = "RW_PROMETHEUS_HOST";
pub const RW_PROMETHEUS_LISTENER_ADDR: &str = "RW_PROMETHEUS_LISTENER_ADDR";
pub const RW_META_ADDR: &str = "RW_META_ADDR";
pub const RW_CONNECTOR_RPC_ENDPOINT: &str = "RW_CONNECTOR_RPC_ENDPOINT";
pub const RW_SSL_CERT: &str = "RW_SSL_CERT";
pub const RW_SSL_KEY: &str = "RW_SSL_KEY";
pub const RW_STANDALONE_META_OPTS: &str = "RW_STANDALONE_META_OPTS";
pub const RW_STANDALONE_FRONTEND_OPTS: &str = "RW_STANDALONE_FRONTEND_OPTS";
pub const RW_STANDALONE_COMPUTE_OPTS: &str = "RW_STANDALONE_COMPUTE_OPTS";
pub const RW_STANDALONE_COMPACTOR_OPTS: &str = "RW_STANDALONE_COMPACTOR_OPTS";

const TLS_VOLUME_NAME: &str = "risingwave-tls";
const TLS_MOUNT_PATH: &str = "/risingwave/tls";

fn tcp_health_check() -> Probe {
    Probe {
        tcp_socket: Some(TCPSocketAction {
            host: None,
            port: IntOrString::String(PORT_SERVICE.to_owned()),
        }),
        initial_delay_seconds: Some(HEALTH_CHECK_INITIAL_DELAY_SECONDS),
        period_seconds: Some(HEALTH_CHECK_PERIOD_SECONDS),
        ..Probe::default()
    }
}

fn container_ports(ports: Ports) -> Vec<ContainerPort> {
    let port = |name: &str, container_port| ContainerPort {
        name: Some(name.to_owned()),
        container_port,
        protocol: Some("TCP".to_owned()),
        ..ContainerPort::default()
    };

    let mut container_ports = vec![
        port(PORT_SERVICE, ports.service),
        port(PORT_METRICS, ports.metrics),
    ];
    if let Some(dashboard) = ports.dashboard {
        container_ports.push(port(PORT_DASHBOARD, dashboard));
    }
    container_ports
}

fn env_from_resource(name: &str, container: Component, resource: &str) -> EnvVar {
    EnvVar {
        name: name.to_owned(),
        value: None,
        value_from: Some(EnvVarSource {
            resource_field_ref: Some(ResourceFieldSelector {
                container_name: Some(container.to_string()),
                resource: resource.to_owned(),
                divisor: None,
            }),
            ..EnvVarSource::default()
        }),
    }
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    (!items.is_empty()).then_some(items)
}

fn non_empty_map(map: BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    (!map.is_empty()).then_some(map)
}

impl ObjectFactory<'_> {
    fn uses_tls(&self, component: Component) -> bool {
        matches!(component, Component::Frontend | Component::Standalone)
            && self.risingwave.spec.tls.as_ref().is_some_and(|tls| tls.is_enabled())
    }

    fn uses_state_store(component: Component) -> bool {
        matches!(
            component,
            Component::Meta | Component::Compute | Component::Compactor | Component::Standalone
        )
    }

    /// The root path captured in the status wins over `spec.stateStore`, so that changing it never
    /// moves existing data.
    fn data_directory(&self) -> &str {
        self.risingwave
            .status
            .as_ref()
            .map(|status| status.internal.state_store_root_path.as_str())
            .filter(|path| !path.is_empty())
            .unwrap_or_else(|| self.risingwave.spec.state_store.data_directory())
    }

    fn meta_address(&self) -> String {
        format!(
            "load-balance+http://{}:{}",
            self.service_name(Component::Meta),
            self.ports(Component::Meta).service
        )
    }

    fn connector_endpoint(&self) -> Option<EnvVar> {
        self.risingwave.spec.has_connector().then(|| {
            env_value(
                RW_CONNECTOR_RPC_ENDPOINT,
                format!(
                    "{}:{}",
                    self.service_name(Component::Connector),
                    self.ports(Component::Connector).service
                ),
            )
        })
    }

    fn tls_env(&self) -> Vec<EnvVar> {
        match &self.risingwave.spec.tls {
            Some(tls) if tls.is_enabled() => vec![
                env_value(RW_SSL_CERT, format!("{TLS_MOUNT_PATH}/{}", tls.cert)),
                env_value(RW_SSL_KEY, format!("{TLS_MOUNT_PATH}/{}", tls.key)),
            ],
            _ => Vec::new(),
        }
    }

    /// Options of every node in a standalone process. The nodes talk to each other over the
    /// loopback interface and share the metrics port.
    fn standalone_env(&self, ports: Ports) -> Vec<EnvVar> {
        let meta = format!("127.0.0.1:{DEFAULT_META_SERVICE_PORT}");
        let metrics = format!("0.0.0.0:{}", ports.metrics);
        let dashboard = ports.dashboard.map_or_else(String::new, |port| {
            format!(" --dashboard-host 0.0.0.0:{port}")
        });

        vec![
            env_value(
                RW_STANDALONE_META_OPTS,
                format!(
                    "--listen-addr 0.0.0.0:{DEFAULT_META_SERVICE_PORT} \
                     --advertise-addr {meta}{dashboard} \
                     --prometheus-host {metrics} --config-path {CONFIG_FILE_PATH}"
                ),
            ),
            env_value(
                RW_STANDALONE_FRONTEND_OPTS,
                format!(
                    "--listen-addr 0.0.0.0:{svc} --advertise-addr 127.0.0.1:{svc} \
                     --meta-addr http://{meta} \
                     --prometheus-listener-addr {metrics} --config-path {CONFIG_FILE_PATH}",
                    svc = ports.service
                ),
            ),
            env_value(
                RW_STANDALONE_COMPUTE_OPTS,
                format!(
                    "--listen-addr 0.0.0.0:{DEFAULT_COMPUTE_SERVICE_PORT} \
                     --advertise-addr 127.0.0.1:{DEFAULT_COMPUTE_SERVICE_PORT} \
                     --meta-address http://{meta} \
                     --prometheus-listener-addr {metrics} --config-path {CONFIG_FILE_PATH}"
                ),
            ),
            env_value(
                RW_STANDALONE_COMPACTOR_OPTS,
                format!(
                    "--listen-addr 0.0.0.0:{DEFAULT_COMPACTOR_SERVICE_PORT} \
                     --advertise-addr 127.0.0.1:{DEFAULT_COMPACTOR_SERVICE_PORT} \
                     --meta-address http://{meta} \
                     --prometheus-listener-addr {metrics} --config-path {CONFIG_FILE_PATH}"
                ),
            ),
        ]
    }

    /// Environment rendered by the operator, before merging with the user's variables.
    fn operator_env(&self, component: Component, group: &ResolvedGroup) -> Result<Vec<EnvVar>> {
        let ports = self.ports(component);
        let mut env = vec![
            env_from_field(POD_IP, "status.podIP"),
            env_from_field(POD_NAME, "metadata.name"),
            env_value(RUST_BACKTRACE, "full"),
        ];

        let limits = group
            .template
            .resources
            .as_ref()
            .and_then(|resources| resources.limits.as_ref());
        let cores = limits
            .and_then(|limits| limits.get("cpu"))
            .and_then(|cpu| CpuQuantity::try_from(cpu).ok())
            .map(CpuQuantity::ceil_cores);
        if let Some(cores) = cores {
            env.push(env_value(RW_WORKER_THREADS, cores.to_string()));
            if component == Component::Compute {
                env.push(env_value(RW_PARALLELISM, cores.to_string()));
            }
        }
        if matches!(component, Component::Compute | Component::Standalone)
            && limits.is_some_and(|limits| limits.contains_key("memory"))
        {
            env.push(env_from_resource(RW_TOTAL_MEMORY_BYTES, component, "limits.memory"));
        }

        let listen = format!("0.0.0.0:{}", ports.service);
        let metrics = format!("0.0.0.0:{}", ports.metrics);
        match component {
            Component::Meta => {
                env.extend([
                    env_value(RW_LISTEN_ADDR, listen),
                    env_value(
                        RW_ADVERTISE_ADDR,
                        format!(
                            "$({POD_NAME}).{}:{}",
                            self.service_name(Component::Meta),
                            ports.service
                        ),
                    ),
                    env_value(RW_PROMETHEUS_HOST, metrics),
                ]);
                if let Some(dashboard) = ports.dashboard {
                    env.push(env_value(RW_DASHBOARD_HOST, format!("0.0.0.0:{dashboard}")));
                }
                env.extend(storage::meta_store_env(&self.risingwave.spec.meta_store)?);
            }
            Component::Frontend | Component::Compute | Component::Compactor => {
                env.extend([
                    env_value(RW_LISTEN_ADDR, listen),
                    env_value(RW_ADVERTISE_ADDR, format!("$({POD_IP}):{}", ports.service)),
                    env_value(RW_META_ADDR, self.meta_address()),
                    env_value(RW_PROMETHEUS_LISTENER_ADDR, metrics),
                ]);
                if component != Component::Compactor {
                    env.extend(self.connector_endpoint());
                }
            }
            Component::Standalone => {
                env.extend(storage::meta_store_env(&self.risingwave.spec.meta_store)?);
                env.extend(self.standalone_env(ports));
            }
            Component::Connector | Component::Config => {}
        }

        if Self::uses_state_store(component) {
            env.extend(storage::state_store_env(
                &self.risingwave.spec.state_store,
                self.data_directory(),
            )?);
        }
        if self.uses_tls(component) {
            env.extend(self.tls_env());
        }
        Ok(env)
    }

    fn command(&self, component: Component) -> (String, Vec<String>) {
        match component {
            Component::Connector => (
                CONNECTOR_EXECUTABLE.to_owned(),
                vec!["-p".to_owned(), self.ports(component).service.to_string()],
            ),
            Component::Standalone => {
                (RISINGWAVE_EXECUTABLE.to_owned(), vec!["standalone".to_owned()])
            }
            _ => (
                RISINGWAVE_EXECUTABLE.to_owned(),
                vec![
                    format!("{component}-node"),
                    "--config-path".to_owned(),
                    CONFIG_FILE_PATH.to_owned(),
                ],
            ),
        }
    }

    fn container(&self, component: Component, group: &ResolvedGroup) -> Result<Container> {
        let template = &group.template;

        let mut env = merge_env(template.env.clone(), self.operator_env(component, group)?);
        sort_by_dependency(&mut env);

        let mut volume_mounts: Vec<VolumeMount> = template
            .volume_mounts
            .iter()
            .filter(|mount| {
                mount.name != CONFIG_VOLUME_NAME && mount.mount_path != CONFIG_MOUNT_PATH
            })
            .cloned()
            .collect();
        volume_mounts.push(VolumeMount {
            name: CONFIG_VOLUME_NAME.to_owned(),
            mount_path: CONFIG_MOUNT_PATH.to_owned(),
            read_only: Some(true),
            ..VolumeMount::default()
        });
        if self.uses_tls(component) {
            volume_mounts.push(VolumeMount {
                name: TLS_VOLUME_NAME.to_owned(),
                mount_path: TLS_MOUNT_PATH.to_owned(),
                read_only: Some(true),
                ..VolumeMount::default()
            });
        }
        volume_mounts.sort_by(|a, b| a.name.cmp(&b.name));

        let mut volume_devices = template.volume_devices.clone();
        volume_devices.sort_by(|a, b| a.name.cmp(&b.name));

        let (command, args) = self.command(component);
        Ok(Container {
            name: component.to_string(),
            image: template.image.clone(),
            image_pull_policy: template.image_pull_policy.clone(),
            resources: template.resources.clone(),
            command: Some(vec![command]),
            args: Some(args),
            env: Some(env),
            ports: Some(container_ports(self.ports(component))),
            volume_mounts: Some(volume_mounts),
            volume_devices: non_empty(volume_devices),
            readiness_probe: Some(tcp_health_check()),
            liveness_probe: Some(tcp_health_check()),
            ..Container::default()
        })
    }

    fn volumes(&self, component: Component, group: &ResolvedGroup) -> Vec<Volume> {
        let mut volumes: Vec<Volume> = group
            .template
            .volumes
            .iter()
            .filter(|volume| volume.name != CONFIG_VOLUME_NAME)
            .cloned()
            .collect();
        volumes.push(Volume {
            name: CONFIG_VOLUME_NAME.to_owned(),
            config_map: Some(ConfigMapVolumeSource {
                name: self.config_map_name(),
                ..ConfigMapVolumeSource::default()
            }),
            ..Volume::default()
        });
        if let Some(tls) = self.risingwave.spec.tls.as_ref().filter(|_| self.uses_tls(component)) {
            volumes.push(Volume {
                name: TLS_VOLUME_NAME.to_owned(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(tls.secret_name.clone()),
                    ..SecretVolumeSource::default()
                }),
                ..Volume::default()
            });
        }
        volumes.sort_by(|a, b| a.name.cmp(&b.name));
        volumes
    }

    /// The full pod template of one group.
    pub(super) fn pod_template_spec(
        &self,
        component: Component,
        group: &ResolvedGroup,
    ) -> Result<PodTemplateSpec> {
        let template = &group.template;

        // Selector labels are applied last so that no template label can break the selector.
        let mut labels = self.inherited_labels.clone();
        labels.extend(template.metadata.labels.clone());
        labels.extend(self.group_selector(component, &group.name));

        let mut annotations = template.metadata.annotations.clone();
        if let Some(restart_at) = &group.restart_at {
            annotations.insert(ANNOTATION_RESTART_AT.to_owned(), restart_at.0.to_string());
        }

        let image_pull_secrets = template
            .image_pull_secrets
            .iter()
            .map(|name| LocalObjectReference { name: name.clone() })
            .collect();

        Ok(PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(labels),
                annotations: non_empty_map(annotations),
                ..ObjectMeta::default()
            }),
            spec: Some(PodSpec {
                containers: vec![self.container(component, group)?],
                image_pull_secrets: non_empty(image_pull_secrets),
                node_selector: non_empty_map(template.node_selector.clone()),
                tolerations: non_empty(template.tolerations.clone()),
                affinity: template.affinity.clone(),
                priority_class_name: template.priority_class_name.clone(),
                service_account_name: template.service_account_name.clone(),
                security_context: template.security_context.clone(),
                dns_config: template.dns_config.clone(),
                termination_grace_period_seconds: template.termination_grace_period_seconds,
                volumes: Some(self.volumes(component, group)),
                ..PodSpec::default()
            }),
        })
    }
}
