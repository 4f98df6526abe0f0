//! Faster rollouts of compute StatefulSets.
//!
//! A StatefulSet replaces its pods one at a time and waits for each to become ready. Compute
//! nodes recover on their own after a restart, so every pod still running an old revision is
//! deleted right away instead.

use std::{future::Future, sync::Arc};

use const_format::concatcp;
use futures::{StreamExt, future::try_join_all};
use k8s_openapi::{
    api::{apps::v1::StatefulSet, core::v1::Pod},
    apimachinery::pkg::apis::meta::v1::OwnerReference,
};
use kube::{
    Api, Resource, ResourceExt,
    api::{DeleteParams, ListParams, Preconditions},
    core::{ParseExpressionError, Selector},
    runtime::{
        Controller,
        controller::{self, Action},
        events::{Recorder, Reporter},
        reflector::ObjectRef,
        watcher,
    },
};
use snafu::{OptionExt, ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};

use super::{backoff::Backoff, catch_panic, watched_api};
use crate::{
    consts::{LABEL_RISINGWAVE_COMPONENT, STS_GENERATION_REQUEUE},
    crd::RisingWave,
    logging::controller::{ReconcilerError, report_controller_reconciled},
    utils::k8s::{is_being_deleted, is_not_found, label},
};

pub const CONTROLLER_NAME: &str = "risingwave-compute-sts-update-strategy";

/// Label set by the StatefulSet controller on every pod it creates.
const REVISION_LABEL: &str = "controller-revision-hash";

const COMPUTE_SELECTOR: &str = concatcp!(LABEL_RISINGWAVE_COMPONENT, "=compute");

pub struct Context {
    pub client: kube::Client,
    pub recorder: Recorder,
    pub backoff: Backoff,
}

impl Context {
    pub fn new(client: kube::Client) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_owned(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client.clone(), reporter),
            client,
            backoff: Backoff::new(),
        }
    }
}

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("the StatefulSet has no namespace"))]
    MissingNamespace,

    #[snafu(display("the StatefulSet has no pod selector"))]
    MissingSelector,

    #[snafu(display("the pod selector of the StatefulSet is invalid"))]
    InvalidSelector { source: ParseExpressionError },

    #[snafu(display("failed to list the pods of the StatefulSet"))]
    ListPods { source: kube::Error },

    #[snafu(display("failed to delete pod {name:?}"))]
    DeletePod { source: kube::Error, name: String },

    #[snafu(display("the reconcile panicked: {message}"))]
    ReconcilePanicked { message: String },
}

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

type Result<T, E = Error> = std::result::Result<T, E>;

fn controller_of<K: Resource>(obj: &K) -> Option<&OwnerReference> {
    obj.owner_references()
        .iter()
        .find(|owner| owner.controller == Some(true))
}

/// Whether `sts` is a compute StatefulSet controlled by a RisingWave.
fn is_risingwave_compute(sts: &StatefulSet) -> bool {
    let owned = controller_of(sts).is_some_and(|owner| {
        owner.kind == RisingWave::kind(&()) && owner.api_version == RisingWave::api_version(&())
    });
    owned && label(sts, LABEL_RISINGWAVE_COMPONENT) == Some("compute")
}

#[derive(Debug, PartialEq, Eq)]
enum Rollout {
    /// The StatefulSet controller has not caught up with the latest spec.
    Pending,
    Settled,
    InProgress,
}

fn rollout(sts: &StatefulSet) -> Rollout {
    let status = sts.status.clone().unwrap_or_default();
    if sts.metadata.generation != status.observed_generation {
        Rollout::Pending
    } else if status.updated_replicas.unwrap_or_default() == status.replicas {
        Rollout::Settled
    } else {
        Rollout::InProgress
    }
}

/// Pods of `sts` that run an old revision and are not terminating yet.
fn outdated_pods<'a>(sts: &StatefulSet, pods: &'a [Pod]) -> Vec<&'a Pod> {
    let update_revision = sts
        .status
        .as_ref()
        .and_then(|status| status.update_revision.as_deref());
    let uid = sts.uid();

    pods.iter()
        .filter(|pod| !is_being_deleted(*pod))
        .filter(|pod| controller_of(*pod).is_some_and(|owner| Some(&owner.uid) == uid.as_ref()))
        .filter(|pod| label(*pod, REVISION_LABEL) != update_revision)
        .collect()
}

async fn reconcile_sts(sts: Arc<StatefulSet>, ctx: Arc<Context>) -> Result<Action> {
    if is_being_deleted(sts.as_ref()) || !is_risingwave_compute(&sts) {
        return Ok(Action::await_change());
    }

    match rollout(&sts) {
        Rollout::Pending => return Ok(Action::requeue(STS_GENERATION_REQUEUE)),
        Rollout::Settled => return Ok(Action::await_change()),
        Rollout::InProgress => {}
    }

    let namespace = sts.namespace().context(MissingNamespaceSnafu)?;
    let label_selector = sts
        .spec
        .as_ref()
        .map(|spec| spec.selector.clone())
        .context(MissingSelectorSnafu)?;
    let selector = Selector::try_from(label_selector).context(InvalidSelectorSnafu)?;

    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &namespace);
    let listed = pods
        .list(&ListParams::default().labels_from(&selector))
        .await
        .context(ListPodsSnafu)?;

    let outdated = outdated_pods(&sts, &listed.items);
    if outdated.is_empty() {
        return Ok(Action::await_change());
    }

    tracing::info!(
        statefulset = sts.name_any(),
        pods = ?outdated.iter().map(|pod| pod.name_any()).collect::<Vec<_>>(),
        "deleting outdated compute pods"
    );
    try_join_all(outdated.into_iter().map(|pod| {
        let pods = &pods;
        async move {
            let name = pod.name_any();
            let params = DeleteParams {
                preconditions: Some(Preconditions {
                    uid: pod.uid(),
                    resource_version: None,
                }),
                ..DeleteParams::default()
            };
            match pods.delete(&name, &params).await {
                Ok(_) => Ok(()),
                Err(err) if is_not_found(&err) => Ok(()),
                Err(source) => Err(Error::DeletePod { source, name }),
            }
        }
    }))
    .await?;

    Ok(Action::await_change())
}

pub async fn reconcile(sts: Arc<StatefulSet>, ctx: Arc<Context>) -> Result<Action> {
    let key = ObjectRef::from_obj(sts.as_ref()).to_string();
    let result = catch_panic(reconcile_sts(sts, Arc::clone(&ctx)), |message| {
        Error::ReconcilePanicked { message }
    })
    .await;

    if result.is_ok() {
        ctx.backoff.reset(&key);
    }
    result
}

pub fn error_policy(sts: Arc<StatefulSet>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = ObjectRef::from_obj(sts.as_ref()).to_string();
    let delay = ctx.backoff.next_delay(&key);
    tracing::debug!(
        statefulset = sts.name_any(),
        error = error as &dyn std::error::Error,
        ?delay,
        "retrying after a failed reconcile"
    );
    Action::requeue(delay)
}

/// Runs the controller until `shutdown` resolves.
pub async fn run(
    ctx: Arc<Context>,
    watch_namespace: Option<&str>,
    concurrency: u16,
    shutdown: impl Future<Output = ()> + Send + Sync + 'static,
) {
    let recorder = ctx.recorder.clone();

    Controller::new(
        watched_api::<StatefulSet>(&ctx.client, watch_namespace),
        watcher::Config::default().labels(COMPUTE_SELECTOR),
    )
    .with_config(controller::Config::default().concurrency(concurrency))
    .graceful_shutdown_on(shutdown)
    .run(reconcile, error_policy, Arc::clone(&ctx))
    .for_each(|result| {
        report_controller_reconciled(&recorder, CONTROLLER_NAME, &result);
        futures::future::ready(())
    })
    .await;
}
