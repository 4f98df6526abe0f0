use std::{collections::BTreeMap, sync::Arc};

use ctrlkit::{Outcome, Workflow};
use k8s_openapi::api::{
    apps::v1::{Deployment, StatefulSet},
    core::v1::{ConfigMap, Service},
};
use kube::{Api, ResourceExt};
use snafu::ResultExt;

use super::{ChildSnafu, ControllerManager, GetScaleViewSnafu, Result, actions};
use crate::{
    consts::LABEL_RISINGWAVE_GROUP,
    crd::{
        Component,
        external::kruise::{AdvancedStatefulSet, CloneSet},
        scale_view::RisingWaveScaleView,
        status::{
            ComponentReplicasStatus, ComponentsReplicasStatus, Condition, ConditionType,
            GroupReplicasStatus, MetaStoreStatus, StateStoreStatus, StoragesStatus,
        },
    },
    event::RisingWaveEvent,
    factory::{ObjectFactory, ResolvedGroup, WorkloadDriver, WorkloadKind, WorkloadObservation},
    utils::k8s::label,
};

/// Replicas of each group, declared or merely observed.
///
/// Declared groups without a workload are reported with `exists: false`, observed groups that are
/// no longer declared with a target of zero.
pub fn group_replicas(
    declared: &[ResolvedGroup],
    observed: &BTreeMap<String, WorkloadObservation>,
) -> Vec<GroupReplicasStatus> {
    let mut groups: Vec<GroupReplicasStatus> = declared
        .iter()
        .map(|group| {
            let observation = observed.get(&group.name);
            GroupReplicasStatus {
                name: group.name.clone(),
                target: group.replicas,
                running: observation.map_or(0, |o| o.ready),
                exists: observation.is_some(),
            }
        })
        .collect();

    for (name, observation) in observed {
        if !declared.iter().any(|group| &group.name == name) {
            groups.push(GroupReplicasStatus {
                name: name.clone(),
                target: 0,
                running: observation.ready,
                exists: true,
            });
        }
    }
    groups
}

/// Describes the components that run fewer replicas than requested.
fn under_target_message(
    replicas: &ComponentsReplicasStatus,
    components: &[Component],
) -> Option<String> {
    let lagging: Vec<String> = components
        .iter()
        .filter_map(|&component| {
            let status = replicas.get(component)?;
            status
                .is_under_target()
                .then(|| format!("{component} ({}/{})", status.running, status.target))
        })
        .collect();

    (!lagging.is_empty()).then(|| format!("components under target: {}", lagging.join(", ")))
}

/// Why the RisingWave is not running: the missing children first, then the components under
/// target.
fn unhealthy_message(
    missing: &[String],
    replicas: &ComponentsReplicasStatus,
    components: &[Component],
) -> Option<String> {
    let missing =
        (!missing.is_empty()).then(|| format!("missing children: {}", missing.join(", ")));
    let reasons: Vec<String> = missing
        .into_iter()
        .chain(under_target_message(replicas, components))
        .collect();
    (!reasons.is_empty()).then(|| reasons.join("; "))
}

impl ControllerManager {
    async fn observe_groups<W: WorkloadDriver>(
        &self,
        factory: &ObjectFactory<'_>,
        component: Component,
    ) -> Result<ComponentReplicasStatus> {
        let workloads: Vec<W> = self
            .client
            .list(&factory.component_selector(component))
            .await
            .context(ChildSnafu)?;

        let observed: BTreeMap<String, WorkloadObservation> = workloads
            .iter()
            .map(|workload| {
                let group = label(workload, LABEL_RISINGWAVE_GROUP).unwrap_or_default();
                (group.to_owned(), workload.observe())
            })
            .collect();

        Ok(ComponentReplicasStatus::from_groups(group_replicas(
            &factory.groups(component),
            &observed,
        )))
    }

    /// Services and the config map the RisingWave should have but does not, as
    /// `Kind(component)`.
    async fn missing_children(&self, factory: &ObjectFactory<'_>) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for component in factory.service_components() {
            let service = self
                .client
                .get::<Service>(&factory.service_name(component))
                .await
                .context(ChildSnafu)?;
            if service.is_none() {
                missing.push(format!("Service({component})"));
            }
        }

        let config_map = self
            .client
            .get::<ConfigMap>(&factory.config_map_name())
            .await
            .context(ChildSnafu)?;
        if config_map.is_none() {
            missing.push(format!("ConfigMap({})", Component::Config));
        }
        Ok(missing)
    }

    /// Fills the replica, storage and version parts of the status, and marks the RisingWave as
    /// not running when a child is missing or a component falls under its target.
    async fn collect_running_statistics(&self) -> Result<Outcome> {
        let factory = self.factory()?;
        let components = factory.workload_components();

        let mut replicas = ComponentsReplicasStatus::default();
        for &component in &components {
            let status = match factory.workload_kind(component) {
                Some(WorkloadKind::StatefulSet) => {
                    self.observe_groups::<StatefulSet>(&factory, component).await?
                }
                Some(WorkloadKind::AdvancedStatefulSet) => {
                    self.observe_groups::<AdvancedStatefulSet>(&factory, component).await?
                }
                Some(WorkloadKind::Deployment) => {
                    self.observe_groups::<Deployment>(&factory, component).await?
                }
                Some(WorkloadKind::CloneSet) => {
                    self.observe_groups::<CloneSet>(&factory, component).await?
                }
                None => continue,
            };
            if let Some(slot) = replicas.get_mut(component) {
                *slot = status;
            }
        }

        let missing = self.missing_children(&factory).await?;
        let unhealthy = unhealthy_message(&missing, &replicas, &components);

        let spec = &self.risingwave().spec;
        self.manager.update_status(|status| {
            status.component_replicas = replicas;
            status.storages = StoragesStatus {
                meta_store: MetaStoreStatus {
                    type_: spec.meta_store.store_type(),
                },
                state_store: StateStoreStatus {
                    type_: spec.state_store.store_type(),
                },
            };
            status.version = self.risingwave().image_tag().map(str::to_owned);
            if status.internal.state_store_root_path.is_empty() {
                status.internal.state_store_root_path =
                    spec.state_store.data_directory().to_owned();
            }
        });

        if let Some(message) = unhealthy {
            if self.manager.does_condition_exist_and_equal(ConditionType::Running, true) {
                tracing::info!(
                    risingwave = self.risingwave().name_any(),
                    message,
                    "RisingWave is unhealthy"
                );
                self.manager.update_condition(
                    Condition::new(ConditionType::Running, false)
                        .with_reason("Unhealthy", message.clone()),
                );
                self.messages.set(RisingWaveEvent::Unhealthy.as_ref(), message);
            }
        }
        Ok(Outcome::CONTINUE)
    }

    /// Drops the locks of scale views that are gone or were recreated.
    async fn release_scale_view_lock(&self) -> Result<Outcome> {
        let locks = self.manager.status_after().scale_views;
        if locks.is_empty() {
            return Ok(Outcome::CONTINUE);
        }

        let views: Api<RisingWaveScaleView> =
            Api::namespaced(self.client.kube_client(), self.client.namespace());
        let mut alive = Vec::with_capacity(locks.len());
        for lock in &locks {
            let view = views
                .get_opt(&lock.name)
                .await
                .context(GetScaleViewSnafu { name: &lock.name })?;
            if view.is_some_and(|view| view.uid().as_deref() == Some(lock.uid.as_str())) {
                alive.push(lock.clone());
            } else {
                tracing::info!(
                    risingwave = self.risingwave().name_any(),
                    scale_view = lock.name,
                    "releasing the lock of a scale view that is gone"
                );
            }
        }

        if alive.len() != locks.len() {
            self.manager.keep_lock(alive);
        }
        Ok(Outcome::CONTINUE)
    }

    pub fn collect_running_statistics_and_sync_status(self: &Arc<Self>) -> Workflow {
        let spec = &self.risingwave().spec;
        let name = actions::collect_running_statistics(
            spec.enable_standalone_mode,
            spec.enable_open_kruise,
        );
        self.act(name, |m| async move { m.collect_running_statistics().await })
    }

    pub fn release_scale_view_lock_action(self: &Arc<Self>) -> Workflow {
        self.act(actions::RELEASE_SCALE_VIEW_LOCK, |m| async move {
            m.release_scale_view_lock().await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crd::{status::ConditionStatus, template::PodTemplate},
        factory::tests::minimal,
        manager::tests::manager,
        utils::mock_client::{mock_client, serve_empty},
    };

    fn declared(name: &str, replicas: i32) -> ResolvedGroup {
        ResolvedGroup {
            name: name.to_owned(),
            replicas,
            template: PodTemplate::default(),
            restart_at: None,
        }
    }

    fn ready(ready: i32) -> WorkloadObservation {
        WorkloadObservation {
            ready,
            ..WorkloadObservation::default()
        }
    }

    #[test]
    fn declared_missing_and_undeclared_groups() {
        let observed = BTreeMap::from([("".to_owned(), ready(1)), ("old".to_owned(), ready(2))]);

        let groups = group_replicas(&[declared("", 2), declared("new", 1)], &observed);

        let status = ComponentReplicasStatus::from_groups(groups);
        assert_eq!(status.groups, vec![
            GroupReplicasStatus {
                name: String::new(),
                target: 2,
                running: 1,
                exists: true,
            },
            GroupReplicasStatus {
                name: "new".to_owned(),
                target: 1,
                running: 0,
                exists: false,
            },
            GroupReplicasStatus {
                name: "old".to_owned(),
                target: 0,
                running: 2,
                exists: true,
            },
        ]);
        assert_eq!(status.target, 3);
        assert_eq!(status.running, 3);
    }

    #[test]
    fn message_lists_lagging_components() {
        let mut replicas = ComponentsReplicasStatus::default();
        replicas.compute = ComponentReplicasStatus::from_groups(group_replicas(
            &[declared("", 3)],
            &BTreeMap::from([(String::new(), ready(1))]),
        ));
        replicas.meta = ComponentReplicasStatus::from_groups(group_replicas(
            &[declared("", 1)],
            &BTreeMap::from([(String::new(), ready(1))]),
        ));

        assert_eq!(
            under_target_message(&replicas, &[Component::Meta, Component::Compute]).as_deref(),
            Some("components under target: compute (1/3)")
        );
        assert_eq!(under_target_message(&replicas, &[Component::Meta]), None);
    }

    #[test]
    fn missing_service_is_unhealthy() {
        let replicas = ComponentsReplicasStatus::default();
        let components = [Component::Meta, Component::Frontend];

        assert_eq!(
            unhealthy_message(&["Service(frontend)".to_owned()], &replicas, &components)
                .as_deref(),
            Some("missing children: Service(frontend)")
        );
        assert_eq!(unhealthy_message(&[], &replicas, &components), None);
    }

    #[test]
    fn missing_children_come_before_lagging_components() {
        let mut replicas = ComponentsReplicasStatus::default();
        replicas.compute = ComponentReplicasStatus::from_groups(group_replicas(
            &[declared("", 2)],
            &BTreeMap::from([(String::new(), ready(1))]),
        ));
        let missing = ["Service(meta)".to_owned(), "ConfigMap(config)".to_owned()];

        assert_eq!(
            unhealthy_message(&missing, &replicas, &[Component::Compute]).as_deref(),
            Some(
                "missing children: Service(meta), ConfigMap(config); \
                 components under target: compute (1/2)"
            )
        );
    }

    #[tokio::test]
    async fn running_turns_false_when_children_are_gone() {
        let (client, handle) = mock_client();
        let requests = serve_empty(handle);
        let mgr = manager(minimal(), client);
        mgr.manager.update_condition(Condition::new(ConditionType::Running, true));

        let factory = mgr.factory().unwrap();
        let missing = mgr.missing_children(&factory).await.unwrap();
        assert_eq!(
            missing,
            [
                "Service(meta)",
                "Service(frontend)",
                "Service(compute)",
                "Service(compactor)",
                "ConfigMap(config)",
            ]
        );

        assert_eq!(mgr.collect_running_statistics().await.unwrap(), Outcome::CONTINUE);

        let running = mgr.manager.get_condition(ConditionType::Running).unwrap();
        assert_eq!(running.status, ConditionStatus::False);
        assert_eq!(running.reason.as_deref(), Some("Unhealthy"));
        assert!(
            running
                .message
                .as_deref()
                .unwrap()
                .starts_with("missing children: Service(meta), Service(frontend)")
        );
        assert!(mgr.messages.is_set(RisingWaveEvent::Unhealthy.as_ref()));
        assert!(
            requests
                .lock()
                .unwrap()
                .contains(&"GET /api/v1/namespaces/default/services/rw-frontend".to_owned())
        );
    }
}
