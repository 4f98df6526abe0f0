//! Labels meta pods with their role in the meta cluster.
//!
//! Each meta pod is asked for the member list every couple of seconds, and the role it reports for
//! itself ends up in the `risingwave/meta-role` label. Services can then select the leader.

use std::{future::Future, sync::Arc};

use const_format::concatcp;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Container, EnvVar, Pod};
use kube::{
    Api, ResourceExt,
    api::{ListParams, Patch, PatchParams},
    runtime::{
        Controller,
        controller::{self, Action},
        events::{Recorder, Reporter},
        reflector::ObjectRef,
        watcher,
    },
};
use serde_json::json;
use snafu::{OptionExt, ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};

use super::{backoff::Backoff, catch_panic, watched_api};
use crate::{
    consts::{
        FIELD_MANAGER, LABEL_RISINGWAVE_COMPONENT, LABEL_RISINGWAVE_META_ROLE,
        LABEL_RISINGWAVE_NAME, META_ROLE_LEADER, META_ROLE_REQUEUE, PORT_SERVICE,
    },
    crd::Component,
    factory::container::RW_ADVERTISE_ADDR,
    logging::controller::{ReconcilerError, report_controller_reconciled},
    meta_member::{MetaMemberClient, MetaRole},
    utils::k8s::{is_being_deleted, label},
};

pub const CONTROLLER_NAME: &str = "risingwave-meta-role-labeler";

const META_SELECTOR: &str = concatcp!(LABEL_RISINGWAVE_COMPONENT, "=meta");

pub struct Context {
    pub client: kube::Client,
    pub recorder: Recorder,
    pub backoff: Backoff,
    pub members: Arc<dyn MetaMemberClient>,
}

impl Context {
    pub fn new(client: kube::Client, members: Arc<dyn MetaMemberClient>) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_owned(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client.clone(), reporter),
            client,
            backoff: Backoff::new(),
            members,
        }
    }
}

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("the pod has no namespace"))]
    MissingNamespace,

    #[snafu(display("the pod has no meta container"))]
    MissingMetaContainer,

    #[snafu(display("the meta container has no valid service port"))]
    MissingServicePort,

    #[snafu(display("no advertised endpoint found in the meta container"))]
    MissingEndpoint,

    #[snafu(display("failed to patch the meta role of pod {name:?}"))]
    PatchPod { source: kube::Error, name: String },

    #[snafu(display("failed to list the leader pods"))]
    ListLeaders { source: kube::Error },

    #[snafu(display("the reconcile panicked: {message}"))]
    ReconcilePanicked { message: String },
}

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

type Result<T, E = Error> = std::result::Result<T, E>;

fn meta_container(pod: &Pod) -> Option<&Container> {
    let meta = Component::Meta.as_ref();
    pod.spec
        .as_ref()?
        .containers
        .iter()
        .find(|container| container.name == meta)
}

fn pod_ip(pod: &Pod) -> Option<&str> {
    pod.status
        .as_ref()?
        .pod_ip
        .as_deref()
        .filter(|ip| !ip.is_empty())
}

fn is_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        == Some("Running")
}

fn is_risingwave_meta_pod(pod: &Pod) -> bool {
    label(pod, LABEL_RISINGWAVE_NAME).is_some()
        && label(pod, LABEL_RISINGWAVE_COMPONENT) == Some(Component::Meta.as_ref())
        && meta_container(pod).is_some()
}

fn service_port(container: &Container) -> Option<u16> {
    container
        .ports
        .iter()
        .flatten()
        .find(|port| port.name.as_deref() == Some(PORT_SERVICE))
        .and_then(|port| u16::try_from(port.container_port).ok())
}

fn host_of(addr: &str) -> &str {
    addr.split(':').next().unwrap_or_default()
}

fn substitute(endpoint: &str, pod: &Pod) -> String {
    endpoint
        .replace("$(POD_IP)", pod_ip(pod).unwrap_or_default())
        .replace("$(POD_NAME)", &pod.name_any())
        .replace("$(POD_NAMESPACE)", pod.namespace().as_deref().unwrap_or_default())
}

/// The host given by `--host` or `--advertise-addr`, in either the `--flag value` or the
/// `--flag=value` form.
fn endpoint_from_args(args: &[String]) -> Option<&str> {
    args.iter().enumerate().find_map(|(i, arg)| {
        let next = args.get(i + 1).map(String::as_str);
        let endpoint = match arg.as_str() {
            "--host" => next,
            "--advertise-addr" => next.map(host_of),
            arg => arg
                .strip_prefix("--host=")
                .or_else(|| arg.strip_prefix("--advertise-addr=").map(host_of)),
        };
        endpoint.filter(|endpoint| !endpoint.is_empty())
    })
}

fn endpoint_from_env(env: &[EnvVar]) -> Option<&str> {
    env.iter()
        .find(|var| var.name == RW_ADVERTISE_ADDR)
        .and_then(|var| var.value.as_deref())
        .map(host_of)
        .filter(|endpoint| !endpoint.is_empty())
}

/// The endpoint the meta node advertises to its peers, with the pod fields filled in.
fn advertised_endpoint(pod: &Pod, container: &Container) -> Option<String> {
    let endpoint = container
        .args
        .as_deref()
        .and_then(endpoint_from_args)
        .or_else(|| container.env.as_deref().and_then(endpoint_from_env))?;
    Some(substitute(endpoint, pod))
}

/// Asks the pod for the member list and finds its own role in it.
///
/// Failed requests give [`MetaRole::Unknown`].
async fn current_role(members: &dyn MetaMemberClient, pod: &Pod) -> Result<MetaRole> {
    let container = meta_container(pod).context(MissingMetaContainerSnafu)?;
    let port = service_port(container).context(MissingServicePortSnafu)?;
    let endpoint = advertised_endpoint(pod, container).context(MissingEndpointSnafu)?;
    let Some(ip) = pod_ip(pod) else {
        return Ok(MetaRole::Unknown);
    };

    match members.members(ip, port).await {
        Ok(list) => {
            let role = MetaRole::from_members(&list, &endpoint, port);
            if role == MetaRole::Unknown {
                tracing::info!(
                    pod = pod.name_any(),
                    endpoint,
                    port,
                    "the pod is not in the member list"
                );
            }
            Ok(role)
        }
        Err(error) => {
            tracing::info!(
                pod = pod.name_any(),
                error = &error as &dyn std::error::Error,
                "failed to get the role of the meta pod"
            );
            Ok(MetaRole::Unknown)
        }
    }
}

/// Brings the role label of `pod` up to date and returns the role.
async fn sync_role_label(ctx: &Context, pod: &Pod) -> Result<MetaRole> {
    let role = current_role(ctx.members.as_ref(), pod).await?;
    if label(pod, LABEL_RISINGWAVE_META_ROLE) == Some(role.as_label()) {
        return Ok(role);
    }

    let name = pod.name_any();
    let namespace = pod.namespace().context(MissingNamespaceSnafu)?;
    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &namespace);
    let patch = json!({
        "metadata": { "labels": { LABEL_RISINGWAVE_META_ROLE: role.as_label() } }
    });
    let params = PatchParams {
        field_manager: Some(FIELD_MANAGER.to_owned()),
        ..PatchParams::default()
    };
    pods.patch(&name, &params, &Patch::Merge(&patch))
        .await
        .context(PatchPodSnafu { name: &name })?;
    tracing::info!(pod = name, role = role.as_label(), "meta role changed");
    Ok(role)
}

/// Re-checks every other pod of the same RisingWave that still claims to be the leader.
async fn recheck_other_leaders(ctx: &Context, pod: &Pod) -> Result<()> {
    let namespace = pod.namespace().context(MissingNamespaceSnafu)?;
    let risingwave = label(pod, LABEL_RISINGWAVE_NAME).unwrap_or_default();
    let selector = format!(
        "{LABEL_RISINGWAVE_NAME}={risingwave},{LABEL_RISINGWAVE_COMPONENT}={},\
         {LABEL_RISINGWAVE_META_ROLE}={META_ROLE_LEADER}",
        Component::Meta.as_ref()
    );

    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &namespace);
    let leaders = pods
        .list(&ListParams::default().labels(&selector))
        .await
        .context(ListLeadersSnafu)?;

    let current = pod.name_any();
    for other in leaders.items.iter().filter(|other| other.name_any() != current) {
        if let Err(error) = sync_role_label(ctx, other).await {
            tracing::info!(
                pod = other.name_any(),
                error = &error as &dyn std::error::Error,
                "failed to sync the meta role label"
            );
        }
    }
    Ok(())
}

async fn sync_role_labels(ctx: &Context, pod: &Pod) -> Result<()> {
    let before = label(pod, LABEL_RISINGWAVE_META_ROLE);
    let role = sync_role_label(ctx, pod).await?;

    // Two pods may both carry the leader label for a while after a failover.
    if role == MetaRole::Leader && before != Some(META_ROLE_LEADER) {
        recheck_other_leaders(ctx, pod).await?;
    }
    Ok(())
}

async fn reconcile_pod(pod: Arc<Pod>, ctx: Arc<Context>) -> Result<Action> {
    if is_being_deleted(pod.as_ref()) || !is_running(&pod) {
        return Ok(Action::await_change());
    }
    if pod_ip(&pod).is_none() || !is_risingwave_meta_pod(&pod) {
        return Ok(Action::await_change());
    }

    if let Err(error) = sync_role_labels(&ctx, &pod).await {
        tracing::info!(
            pod = pod.name_any(),
            error = &error as &dyn std::error::Error,
            "failed to sync the meta role labels"
        );
    }
    Ok(Action::requeue(META_ROLE_REQUEUE))
}

pub async fn reconcile(pod: Arc<Pod>, ctx: Arc<Context>) -> Result<Action> {
    let key = ObjectRef::from_obj(pod.as_ref()).to_string();
    let result = catch_panic(reconcile_pod(pod, Arc::clone(&ctx)), |message| {
        Error::ReconcilePanicked { message }
    })
    .await;

    if result.is_ok() {
        ctx.backoff.reset(&key);
    }
    result
}

pub fn error_policy(pod: Arc<Pod>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = ObjectRef::from_obj(pod.as_ref()).to_string();
    let delay = ctx.backoff.next_delay(&key);
    tracing::debug!(
        pod = pod.name_any(),
        error = error as &dyn std::error::Error,
        ?delay,
        "retrying after a failed reconcile"
    );
    Action::requeue(delay)
}

/// Runs the labeler until `shutdown` resolves.
pub async fn run(
    ctx: Arc<Context>,
    watch_namespace: Option<&str>,
    concurrency: u16,
    shutdown: impl Future<Output = ()> + Send + Sync + 'static,
) {
    let recorder = ctx.recorder.clone();

    Controller::new(
        watched_api::<Pod>(&ctx.client, watch_namespace),
        watcher::Config::default().labels(META_SELECTOR),
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
