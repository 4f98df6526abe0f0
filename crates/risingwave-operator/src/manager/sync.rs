use std::{collections::BTreeMap, sync::Arc};

use ctrlkit::{Outcome, Workflow};
use futures::future::join_all;
use k8s_openapi::{
    api::core::v1::ConfigMap,
    apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
};
use kube::{Api, Resource, ResourceExt};
use snafu::ResultExt;

use super::{
    ChildSnafu, ControllerManager, GetCustomResourceDefinitionSnafu, RenderSnafu, Result, actions,
    requeue_on_conflict,
};
use crate::{
    client::ChildObject,
    consts::LABEL_RISINGWAVE_GROUP,
    crd::{
        Component,
        external::monitoring::{SERVICE_MONITOR_CRD_NAME, SERVICE_MONITOR_VERSION},
    },
    factory::{ObjectFactory, WorkloadDriver},
    utils::k8s::label,
};

/// Splits the existing workloads of a component into the one to keep per declared group and the
/// ones to delete.
///
/// Per group, the object carrying the expected name wins, otherwise the first one listed. Objects
/// of undeclared groups and every other duplicate are returned for deletion.
pub fn partition_workloads<W: Resource>(
    existing: Vec<W>,
    is_declared: impl Fn(&str) -> bool,
    expected_name: impl Fn(&str) -> String,
) -> (BTreeMap<String, W>, Vec<W>) {
    let mut by_group: BTreeMap<String, Vec<W>> = BTreeMap::new();
    for obj in existing {
        let group = label(&obj, LABEL_RISINGWAVE_GROUP).unwrap_or_default().to_owned();
        by_group.entry(group).or_default().push(obj);
    }

    let mut keep = BTreeMap::new();
    let mut stale = Vec::new();
    for (group, mut objects) in by_group {
        if !is_declared(&group) {
            stale.append(&mut objects);
            continue;
        }
        let name = expected_name(&group);
        let winner = objects.iter().position(|obj| obj.name_any() == name).unwrap_or(0);
        keep.insert(group, objects.swap_remove(winner));
        stale.append(&mut objects);
    }
    (keep, stale)
}

impl ControllerManager {
    /// Creates `desired` when it is missing and applies it when the existing object was rendered
    /// for another generation or operator version.
    async fn sync_object<K: ChildObject>(
        &self,
        factory: &ObjectFactory<'_>,
        desired: K,
    ) -> Result<Outcome> {
        let current = self
            .client
            .get::<K>(&desired.name_any())
            .await
            .context(ChildSnafu)?;

        let result = match current {
            None => self.client.create(&desired).await.map(drop),
            Some(current) if factory.is_up_to_date(&current) => Ok(()),
            Some(current) => self.client.apply(&current, &desired).await.map(drop),
        };
        requeue_on_conflict(result)
    }

    async fn sync_service(&self, component: Component) -> Result<Outcome> {
        let factory = self.factory()?;
        if !factory.service_components().contains(&component) {
            return Ok(Outcome::NO_REQUEUE);
        }

        self.sync_object(&factory, factory.new_service(component)).await
    }

    async fn sync_config_map(&self) -> Result<Outcome> {
        let factory = self.factory()?;
        let desired = factory.new_config_config_map(&self.config_template);

        let current = self
            .client
            .get::<ConfigMap>(&desired.name_any())
            .await
            .context(ChildSnafu)?;
        let result = match current {
            None => self.client.create(&desired).await.map(drop),
            Some(current) if current.data == desired.data => Ok(()),
            Some(current) => self.client.apply(&current, &desired).await.map(drop),
        };
        requeue_on_conflict(result)
    }

    /// One workload per declared group of `component`. Workloads of other groups, duplicates and
    /// workloads of a kind `component` no longer runs on are deleted.
    async fn sync_workloads<W: WorkloadDriver>(&self, component: Component) -> Result<Outcome> {
        let factory = self.factory()?;
        let active = factory.workload_components().contains(&component)
            && factory.workload_kind(component) == Some(W::KIND);
        let declared: Vec<String> = if active {
            factory.groups(component).into_iter().map(|g| g.name).collect()
        } else {
            Vec::new()
        };

        let existing: Vec<W> = self
            .client
            .list(&factory.component_selector(component))
            .await
            .context(ChildSnafu)?;
        let (mut current, stale) = partition_workloads(
            existing,
            |group| declared.iter().any(|name| name == group),
            |group| factory.workload_name(component, group),
        );

        let mut desired = Vec::with_capacity(declared.len());
        for group in &declared {
            if let Some(workload) = factory
                .new_workload::<W>(component, group)
                .context(RenderSnafu)?
            {
                desired.push((current.remove(group), workload));
            }
        }

        for obj in &stale {
            tracing::info!(
                risingwave = self.risingwave().name_any(),
                %component,
                workload = obj.name_any(),
                "deleting obsolete workload"
            );
        }
        let factory = &factory;
        let deletes = join_all(stale.iter().map(|obj| self.client.delete(obj)));
        let syncs = join_all(desired.into_iter().map(|(current, desired)| async move {
            let result = match current {
                None => self.client.create(&desired).await.map(drop),
                Some(current) if factory.is_up_to_date(&current) => Ok(()),
                Some(current) => self.client.apply(&current, &desired).await.map(drop),
            };
            requeue_on_conflict(result)
        }));
        let (deleted, synced) = futures::join!(deletes, syncs);

        let mut outcome = Outcome::CONTINUE;
        for result in deleted {
            outcome = outcome.join(requeue_on_conflict(result)?);
        }
        for result in synced {
            outcome = outcome.join(result?);
        }
        Ok(outcome)
    }

    async fn sync_service_monitor(&self) -> Result<Outcome> {
        if !self.risingwave().spec.enable_default_service_monitor {
            return Ok(Outcome::EXIT);
        }

        let crds: Api<CustomResourceDefinition> = Api::all(self.client.kube_client());
        let crd = crds
            .get_opt(SERVICE_MONITOR_CRD_NAME)
            .await
            .context(GetCustomResourceDefinitionSnafu {
                name: SERVICE_MONITOR_CRD_NAME,
            })?;
        let served = crd.is_some_and(|crd| {
            crd.spec
                .versions
                .iter()
                .any(|version| version.name == SERVICE_MONITOR_VERSION && version.served)
        });
        if !served {
            tracing::debug!(
                risingwave = self.risingwave().name_any(),
                "service monitors are not served by the cluster, skipping"
            );
            return Ok(Outcome::EXIT);
        }

        let factory = self.factory()?;
        self.sync_object(&factory, factory.new_service_monitor()).await
    }

    pub fn sync_service_action(self: &Arc<Self>, component: Component) -> Workflow {
        self.act(actions::sync_service(component), move |m| async move {
            m.sync_service(component).await
        })
    }

    pub fn sync_meta_service(self: &Arc<Self>) -> Workflow {
        self.sync_service_action(Component::Meta)
    }

    pub fn sync_frontend_service(self: &Arc<Self>) -> Workflow {
        self.sync_service_action(Component::Frontend)
    }

    pub fn sync_compute_service(self: &Arc<Self>) -> Workflow {
        self.sync_service_action(Component::Compute)
    }

    pub fn sync_compactor_service(self: &Arc<Self>) -> Workflow {
        self.sync_service_action(Component::Compactor)
    }

    pub fn sync_connector_service(self: &Arc<Self>) -> Workflow {
        self.sync_service_action(Component::Connector)
    }

    pub fn sync_standalone_service(self: &Arc<Self>) -> Workflow {
        self.sync_service_action(Component::Standalone)
    }

    pub fn sync_config_config_map(self: &Arc<Self>) -> Workflow {
        self.act(actions::SYNC_CONFIG_CONFIG_MAP, |m| async move { m.sync_config_map().await })
    }

    /// `Sync{Component}{Kind}s` for the workload kind `W`.
    pub fn sync_workloads_action<W: WorkloadDriver>(
        self: &Arc<Self>,
        component: Component,
    ) -> Workflow {
        self.act(actions::sync_workloads(component, W::KIND), move |m| async move {
            m.sync_workloads::<W>(component).await
        })
    }

    pub fn sync_service_monitor_action(self: &Arc<Self>) -> Workflow {
        self.act(actions::SYNC_SERVICE_MONITOR, |m| async move { m.sync_service_monitor().await })
    }
}
