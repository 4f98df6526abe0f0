use std::sync::Arc;

use ctrlkit::{Outcome, Workflow};
use kube::ResourceExt;
use snafu::ResultExt;
use tokio::net::TcpStream;

use super::{ChildSnafu, ControllerManager, Result, actions};
use crate::{
    consts::{META_SERVICE_CONNECT_TIMEOUT, WAIT_READY_REQUEUE},
    crd::Component,
    factory::WorkloadDriver,
};

impl ControllerManager {
    /// Requeues while a declared group has no workload yet or its rollout is not done.
    async fn wait_workloads_ready<W: WorkloadDriver>(
        &self,
        component: Component,
    ) -> Result<Outcome> {
        let factory = self.factory()?;
        let workloads: Vec<W> = self
            .client
            .list(&factory.component_selector(component))
            .await
            .context(ChildSnafu)?;

        for group in factory.groups(component) {
            let name = factory.workload_name(component, &group.name);
            let ready = workloads
                .iter()
                .find(|workload| workload.name_any() == name)
                .is_some_and(|workload| workload.observe().is_ready());
            if !ready {
                tracing::debug!(
                    %component,
                    group = group.name,
                    workload = name,
                    "workload not ready yet"
                );
                return Ok(Outcome::requeue_after(WAIT_READY_REQUEUE));
            }
        }
        Ok(Outcome::CONTINUE)
    }

    /// Opens a TCP connection to the meta service. Standalone clusters have no separate meta
    /// service and pass right away.
    async fn wait_meta_service(&self) -> Result<Outcome> {
        let factory = self.factory()?;
        if self.risingwave().spec.enable_standalone_mode {
            return Ok(Outcome::CONTINUE);
        }

        let host = format!(
            "{}.{}",
            factory.service_name(Component::Meta),
            factory.namespace()
        );
        let Ok(port) = u16::try_from(factory.ports(Component::Meta).service) else {
            return Ok(Outcome::requeue_after(WAIT_READY_REQUEUE));
        };

        let connect = TcpStream::connect((host.as_str(), port));
        match tokio::time::timeout(META_SERVICE_CONNECT_TIMEOUT, connect).await {
            Ok(Ok(_)) => Ok(Outcome::CONTINUE),
            Ok(Err(error)) => {
                tracing::debug!(
                    host,
                    port,
                    error = &error as &dyn std::error::Error,
                    "meta service is not reachable yet"
                );
                Ok(Outcome::requeue_after(WAIT_READY_REQUEUE))
            }
            Err(_) => {
                tracing::debug!(host, port, "connecting to the meta service timed out");
                Ok(Outcome::requeue_after(WAIT_READY_REQUEUE))
            }
        }
    }

    /// `WaitBefore{Component}{Kind}sReady` for the workload kind `W`.
    pub fn wait_workloads_ready_action<W: WorkloadDriver>(
        self: &Arc<Self>,
        component: Component,
    ) -> Workflow {
        self.act(actions::wait_workloads_ready(component, W::KIND), move |m| async move {
            m.wait_workloads_ready::<W>(component).await
        })
    }

    pub fn wait_before_meta_service_is_available(self: &Arc<Self>) -> Workflow {
        self.act(actions::WAIT_BEFORE_META_SERVICE_IS_AVAILABLE, |m| async move {
            m.wait_meta_service().await
        })
    }
}
