//! The RisingWaveScaleView controller.
//!
//! A scale view takes a lock in `status.scaleViews` of its target RisingWave, then copies the
//! replicas of its groups into the RisingWave spec and reports the running replicas back in its
//! own status. The finalizer makes sure the lock is released before the view goes away.

use std::{
    future::Future,
    sync::{Arc, Mutex, PoisonError},
};

use ctrlkit::{Outcome, Workflow, action, ordered_join, parallel_join, retry, sequential};
use futures::StreamExt;
use kube::{
    Api, ResourceExt,
    api::{Patch, PatchParams},
    runtime::{
        Controller,
        controller::{self, Action},
        events::{Recorder, Reporter},
        reflector::ObjectRef,
        watcher,
    },
};
use serde::Serialize;
use serde_json::{Value, json};
use snafu::{OptionExt, ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};

use super::{backoff::Backoff, catch_panic, watched_api};
use crate::{
    consts::{
        FIELD_MANAGER, SCALE_VIEW_FINALIZER, SCALE_VIEW_LOCK_RETRIES,
        SCALE_VIEW_LOCK_RETRY_INTERVAL, STATUS_CONFLICT_REQUEUE,
    },
    crd::{
        RisingWave, RisingWaveSpec,
        scale_view::{RisingWaveScaleView, RisingWaveScaleViewStatus},
        status::{GroupReplicasStatus, RisingWaveStatus},
    },
    logging::controller::{ReconcilerError, report_controller_reconciled},
    object::scale_view_lock::{self, ScaleViewLockManager},
    scaleview::{ScalableComponent, ScaleViewHelper},
    utils::k8s::{is_being_deleted, is_conflict, is_not_found, merge_patch},
};

pub const CONTROLLER_NAME: &str = "risingwave-scale-view-controller";

pub const GRAB_OR_UPDATE_SCALE_VIEW_LOCK: &str = "GrabOrUpdateScaleViewLock";
pub const SYNC_GROUP_REPLICAS_TO_RISINGWAVE: &str = "SyncGroupReplicasToRisingWave";
pub const SYNC_GROUP_REPLICAS_STATUS_FROM_RISINGWAVE: &str =
    "SyncGroupReplicasStatusFromRisingWave";
pub const UPDATE_SCALE_VIEW_STATUS: &str = "UpdateScaleViewStatus";

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
    #[snafu(display("the scale view has no namespace"))]
    MissingNamespace,

    #[snafu(display("failed to get RisingWave {name:?}"))]
    GetRisingWave { source: kube::Error, name: String },

    #[snafu(display("RisingWave {name:?} does not exist"))]
    TargetNotFound { name: String },

    #[snafu(display("scale views cannot target the {component} component"))]
    UnscalableComponent { component: String },

    #[snafu(display("failed to lock the groups of RisingWave {name:?}"))]
    Lock {
        source: scale_view_lock::Error,
        name: String,
    },

    #[snafu(display("failed to serialize {what}"))]
    Serialize {
        source: serde_json::Error,
        what: &'static str,
    },

    #[snafu(display("failed to patch RisingWave {name:?}"))]
    PatchRisingWave { source: kube::Error, name: String },

    #[snafu(display("failed to patch the scale view"))]
    PatchScaleView { source: kube::Error },

    #[snafu(display("the reconcile workflow failed"))]
    Workflow { source: ctrlkit::Error },

    #[snafu(display("the reconcile panicked: {message}"))]
    ReconcilePanicked { message: String },
}

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

type Result<T, E = Error> = std::result::Result<T, E>;

fn has_finalizer(view: &RisingWaveScaleView) -> bool {
    view.finalizers().iter().any(|f| f == SCALE_VIEW_FINALIZER)
}

fn finalizers_without(view: &RisingWaveScaleView) -> Vec<String> {
    view.finalizers()
        .iter()
        .filter(|f| *f != SCALE_VIEW_FINALIZER)
        .cloned()
        .collect()
}

/// Copies the replicas of the policies into `spec`. Returns whether anything changed.
///
/// Policies for groups the RisingWave does not declare are skipped.
fn write_policies(
    spec: &mut RisingWaveSpec,
    view: &RisingWaveScaleView,
    component: ScalableComponent,
) -> bool {
    let mut helper = ScaleViewHelper::new(spec, component);
    let mut changed = false;
    for policy in &view.spec.scale_policy {
        match helper.write_replicas(&policy.group, policy.replicas) {
            Some(written) => changed |= written,
            None => tracing::warn!(
                scale_view = view.name_any(),
                group = policy.group,
                "the group is not declared by the target, skipping"
            ),
        }
    }
    changed
}

/// The status of `view` derived from the status of its target.
fn view_status(
    view: &RisingWaveScaleView,
    target: &RisingWaveStatus,
    locked: bool,
) -> RisingWaveScaleViewStatus {
    let replicas = target.component_replicas.get(view.spec.target_ref.component);
    let groups: Vec<GroupReplicasStatus> = view
        .spec
        .scale_policy
        .iter()
        .map(|policy| {
            replicas
                .and_then(|replicas| replicas.group(&policy.group))
                .cloned()
                .unwrap_or_else(|| GroupReplicasStatus {
                    name: policy.group.clone(),
                    ..GroupReplicasStatus::default()
                })
        })
        .collect();

    RisingWaveScaleViewStatus {
        locked,
        replicas: groups.iter().map(|group| group.running).sum(),
        groups,
    }
}

/// A merge patch of `field` that only goes through when the object is still at `resource_version`.
fn guarded_patch<T: Serialize>(
    resource_version: Option<String>,
    field: &str,
    before: &T,
    after: &T,
    what: &'static str,
) -> Result<Value> {
    let diff = merge_patch(
        &serde_json::to_value(before).context(SerializeSnafu { what })?,
        &serde_json::to_value(after).context(SerializeSnafu { what })?,
    );
    Ok(json!({
        "metadata": { "resourceVersion": resource_version },
        field: diff,
    }))
}

fn patch_params() -> PatchParams {
    PatchParams {
        field_manager: Some(FIELD_MANAGER.to_owned()),
        ..PatchParams::default()
    }
}

/// State of one pass over a scale view.
struct ScaleViewManager {
    client: kube::Client,
    namespace: String,
    view: Arc<RisingWaveScaleView>,
    target: Mutex<Option<RisingWave>>,
    locked: Mutex<bool>,
    status: Mutex<RisingWaveScaleViewStatus>,
}

impl ScaleViewManager {
    fn new(client: kube::Client, view: Arc<RisingWaveScaleView>) -> Result<Self> {
        let namespace = view.namespace().context(MissingNamespaceSnafu)?;
        let status = view.status.clone().unwrap_or_default();
        Ok(Self {
            client,
            namespace,
            target: Mutex::new(None),
            locked: Mutex::new(status.locked),
            status: Mutex::new(status),
            view,
        })
    }

    fn risingwaves(&self) -> Api<RisingWave> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn target_name(&self) -> &str {
        &self.view.spec.target_ref.name
    }

    fn target(&self) -> Option<RisingWave> {
        self.target.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_target(&self, target: RisingWave) {
        *self.target.lock().unwrap_or_else(PoisonError::into_inner) = Some(target);
    }

    async fn fetch_target(&self) -> Result<Option<RisingWave>> {
        self.risingwaves()
            .get_opt(self.target_name())
            .await
            .context(GetRisingWaveSnafu { name: self.target_name() })
    }

    /// Takes or refreshes the lock. A conflicting write fails so that the surrounding retry
    /// tries again with a fresh copy of the target.
    async fn grab_or_update_lock(&self) -> Result<Outcome> {
        let name = self.target_name();
        let Some(target) = self.fetch_target().await? else {
            tracing::info!(
                scale_view = self.view.name_any(),
                risingwave = name,
                "the target does not exist"
            );
            *self.locked.lock().unwrap_or_else(PoisonError::into_inner) = false;
            return Ok(Outcome::EXIT);
        };

        let before = target.status.clone().unwrap_or_default();
        let mut after = before.clone();
        let changed = ScaleViewLockManager::new(&mut after)
            .grab_or_update(&self.view)
            .context(LockSnafu { name })?;
        if !changed {
            *self.locked.lock().unwrap_or_else(PoisonError::into_inner) = true;
            self.set_target(target);
            return Ok(Outcome::CONTINUE);
        }

        let patch = guarded_patch(
            target.resource_version(),
            "status",
            &before,
            &after,
            "the RisingWave status",
        )?;
        let target = self
            .risingwaves()
            .patch_status(name, &patch_params(), &Patch::Merge(&patch))
            .await
            .context(PatchRisingWaveSnafu { name })?;
        tracing::info!(
            scale_view = self.view.name_any(),
            risingwave = name,
            "scale view lock taken"
        );

        *self.locked.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.set_target(target);
        Ok(Outcome::CONTINUE)
    }

    async fn sync_group_replicas(&self) -> Result<Outcome> {
        let name = self.target_name();
        let target = self.target().context(TargetNotFoundSnafu { name })?;
        let component = self.view.spec.target_ref.component;
        let component = ScalableComponent::new(component).context(UnscalableComponentSnafu {
            component: component.to_string(),
        })?;

        let mut spec = target.spec.clone();
        if !write_policies(&mut spec, &self.view, component) {
            return Ok(Outcome::CONTINUE);
        }

        let patch = guarded_patch(
            target.resource_version(),
            "spec",
            &target.spec,
            &spec,
            "the RisingWave spec",
        )?;
        match self
            .risingwaves()
            .patch(name, &patch_params(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => {
                tracing::info!(
                    scale_view = self.view.name_any(),
                    risingwave = name,
                    "group replicas updated"
                );
                Ok(Outcome::CONTINUE)
            }
            Err(err) if is_conflict(&err) => Ok(Outcome::requeue_after(STATUS_CONFLICT_REQUEUE)),
            Err(source) => Err(Error::PatchRisingWave {
                source,
                name: name.to_owned(),
            }),
        }
    }

    fn sync_status_from_target(&self) -> Outcome {
        let locked = *self.locked.lock().unwrap_or_else(PoisonError::into_inner);
        let target_status = self.target().and_then(|target| target.status).unwrap_or_default();
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        *status = view_status(&self.view, &target_status, locked);
        Outcome::CONTINUE
    }

    async fn update_status(&self) -> Result<Outcome> {
        let before = self.view.status.clone().unwrap_or_default();
        let mut after = self.status.lock().unwrap_or_else(PoisonError::into_inner).clone();
        after.locked = *self.locked.lock().unwrap_or_else(PoisonError::into_inner);
        if before == after {
            return Ok(Outcome::CONTINUE);
        }

        let patch = guarded_patch(
            self.view.resource_version(),
            "status",
            &before,
            &after,
            "the scale view status",
        )?;
        let views: Api<RisingWaveScaleView> = Api::namespaced(self.client.clone(), &self.namespace);
        match views
            .patch_status(&self.view.name_any(), &patch_params(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(Outcome::CONTINUE),
            Err(err) if is_not_found(&err) => Ok(Outcome::NO_REQUEUE),
            Err(err) if is_conflict(&err) => Ok(Outcome::requeue_after(STATUS_CONFLICT_REQUEUE)),
            Err(source) => Err(Error::PatchScaleView { source }),
        }
    }

    /// Drops the lock of the view from its target, if the target still exists.
    async fn release_lock(&self) -> Result<Outcome> {
        let name = self.target_name();
        let Some(target) = self.fetch_target().await? else {
            return Ok(Outcome::CONTINUE);
        };

        let before = target.status.clone().unwrap_or_default();
        let mut after = before.clone();
        if !ScaleViewLockManager::new(&mut after).release(&self.view) {
            return Ok(Outcome::CONTINUE);
        }

        let patch = guarded_patch(
            target.resource_version(),
            "status",
            &before,
            &after,
            "the RisingWave status",
        )?;
        match self
            .risingwaves()
            .patch_status(name, &patch_params(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => {
                tracing::info!(
                    scale_view = self.view.name_any(),
                    risingwave = name,
                    "scale view lock released"
                );
                Ok(Outcome::CONTINUE)
            }
            Err(err) if is_not_found(&err) => Ok(Outcome::CONTINUE),
            Err(err) if is_conflict(&err) => Ok(Outcome::requeue_after(STATUS_CONFLICT_REQUEUE)),
            Err(source) => Err(Error::PatchRisingWave {
                source,
                name: name.to_owned(),
            }),
        }
    }

    async fn patch_finalizers(&self, finalizers: Vec<String>) -> Result<()> {
        let views: Api<RisingWaveScaleView> = Api::namespaced(self.client.clone(), &self.namespace);
        let patch = json!({
            "metadata": {
                "resourceVersion": self.view.resource_version(),
                "finalizers": finalizers,
            }
        });
        views
            .patch(&self.view.name_any(), &patch_params(), &Patch::Merge(&patch))
            .await
            .context(PatchScaleViewSnafu)?;
        Ok(())
    }

    fn act<F, Fut>(self: &Arc<Self>, name: &'static str, f: F) -> Workflow
    where
        F: Fn(Arc<Self>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Outcome>> + Send + 'static,
    {
        let this = Arc::clone(self);
        action(name, move || f(Arc::clone(&this)))
    }

    fn workflow(self: &Arc<Self>) -> Workflow {
        let grab = retry(
            SCALE_VIEW_LOCK_RETRIES,
            SCALE_VIEW_LOCK_RETRY_INTERVAL,
            self.act(GRAB_OR_UPDATE_SCALE_VIEW_LOCK, |m| async move {
                m.grab_or_update_lock().await
            }),
        );
        let sync = parallel_join([
            self.act(SYNC_GROUP_REPLICAS_TO_RISINGWAVE, |m| async move {
                m.sync_group_replicas().await
            }),
            self.act(SYNC_GROUP_REPLICAS_STATUS_FROM_RISINGWAVE, |m| async move {
                Ok(m.sync_status_from_target())
            }),
        ]);

        ordered_join([
            sequential([grab, sync]),
            self.act(UPDATE_SCALE_VIEW_STATUS, |m| async move { m.update_status().await }),
        ])
    }
}

fn action_for(outcome: Outcome) -> Action {
    match outcome.requeue_delay() {
        Some(delay) => Action::requeue(delay),
        None => Action::await_change(),
    }
}

async fn reconcile_scale_view(view: Arc<RisingWaveScaleView>, ctx: Arc<Context>) -> Result<Action> {
    let mgr = Arc::new(ScaleViewManager::new(ctx.client.clone(), Arc::clone(&view))?);

    if is_being_deleted(view.as_ref()) {
        if !has_finalizer(&view) {
            return Ok(Action::await_change());
        }
        let outcome = mgr.release_lock().await?;
        if outcome.requeue_delay().is_some() {
            return Ok(action_for(outcome));
        }
        mgr.patch_finalizers(finalizers_without(&view)).await?;
        return Ok(Action::await_change());
    }

    if !has_finalizer(&view) {
        let mut finalizers = view.finalizers().to_vec();
        finalizers.push(SCALE_VIEW_FINALIZER.to_owned());
        mgr.patch_finalizers(finalizers).await?;
        // The update of the view triggers the next pass.
        return Ok(Action::await_change());
    }

    let outcome = mgr.workflow().optimize().run().await.context(WorkflowSnafu)?;
    Ok(action_for(outcome))
}

pub async fn reconcile(view: Arc<RisingWaveScaleView>, ctx: Arc<Context>) -> Result<Action> {
    let key = ObjectRef::from_obj(view.as_ref()).to_string();
    let result = catch_panic(reconcile_scale_view(view, Arc::clone(&ctx)), |message| {
        Error::ReconcilePanicked { message }
    })
    .await;

    if result.is_ok() {
        ctx.backoff.reset(&key);
    }
    result
}

pub fn error_policy(view: Arc<RisingWaveScaleView>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = ObjectRef::from_obj(view.as_ref()).to_string();
    let delay = ctx.backoff.next_delay(&key);
    tracing::debug!(
        scale_view = view.name_any(),
        error = error as &dyn std::error::Error,
        ?delay,
        "retrying after a failed reconcile"
    );
    Action::requeue(delay)
}

/// Scale views holding a lock in the status of `rw`.
fn locked_views(rw: &RisingWave) -> Vec<ObjectRef<RisingWaveScaleView>> {
    let namespace = rw.namespace();
    rw.status
        .iter()
        .flat_map(|status| &status.scale_views)
        .map(|lock| {
            let reference = ObjectRef::new(&lock.name);
            match &namespace {
                Some(namespace) => reference.within(namespace),
                None => reference,
            }
        })
        .collect()
}

/// Runs the controller until `shutdown` resolves.
pub async fn run(
    ctx: Arc<Context>,
    watch_namespace: Option<&str>,
    concurrency: u16,
    shutdown: impl Future<Output = ()> + Send + Sync + 'static,
) {
    let client = &ctx.client;
    let recorder = ctx.recorder.clone();

    Controller::new(
        watched_api::<RisingWaveScaleView>(client, watch_namespace),
        watcher::Config::default(),
    )
    .watches(
        watched_api::<RisingWave>(client, watch_namespace),
        watcher::Config::default(),
        |rw| locked_views(&rw),
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

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::crd::status::{ComponentReplicasStatus, ScaleViewLock};

    fn view() -> RisingWaveScaleView {
        serde_yaml::from_str(indoc! {"
            apiVersion: risingwave.risingwavelabs.com/v1alpha1
            kind: RisingWaveScaleView
            metadata:
              name: compute-view
              namespace: default
              uid: view-uid
              finalizers:
                - example.com/other
                - risingwave.risingwavelabs.com/scale-view-lock
            spec:
              targetRef:
                name: rw
                component: compute
              scalePolicy:
                - group: ''
                  replicas: 3
                - group: large
                  replicas: 2
                - group: missing
                  replicas: 5
        "})
        .unwrap()
    }

    fn target_spec() -> RisingWaveSpec {
        serde_yaml::from_str(indoc! {"
            global:
              replicas:
                compute: 1
            components:
              compute:
                groups:
                  - name: large
                    replicas: 1
        "})
        .unwrap()
    }

    fn group(name: &str, target: i32, running: i32) -> GroupReplicasStatus {
        GroupReplicasStatus {
            name: name.to_owned(),
            target,
            running,
            exists: true,
        }
    }

    #[test]
    fn finalizer_is_detected_and_removed() {
        let view = view();
        assert!(has_finalizer(&view));
        assert_eq!(finalizers_without(&view), ["example.com/other"]);
    }

    #[test]
    fn policies_are_written_once() {
        let view = view();
        let mut spec = target_spec();

        assert!(write_policies(&mut spec, &view, ScalableComponent::Compute));
        assert_eq!(spec.global.replicas.compute, 3);
        assert_eq!(
            ScaleViewHelper::new(&mut spec, ScalableComponent::Compute).read_replicas("large"),
            Some(2)
        );

        assert!(!write_policies(&mut spec, &view, ScalableComponent::Compute));
    }

    #[test]
    fn status_sums_running_replicas_of_the_listed_groups() {
        let view = view();
        let mut target = RisingWaveStatus::default();
        target.component_replicas.compute = ComponentReplicasStatus::from_groups(vec![
            group("", 3, 2),
            group("large", 2, 2),
            group("other", 4, 4),
        ]);

        let status = view_status(&view, &target, true);

        assert!(status.locked);
        assert_eq!(status.replicas, 4);
        assert_eq!(status.groups, vec![
            group("", 3, 2),
            group("large", 2, 2),
            GroupReplicasStatus {
                name: "missing".to_owned(),
                ..GroupReplicasStatus::default()
            },
        ]);
    }

    #[test]
    fn locks_map_back_to_views() {
        let mut rw: RisingWave = crate::factory::tests::minimal();
        rw.status = Some(RisingWaveStatus {
            scale_views: vec![ScaleViewLock {
                name: "compute-view".to_owned(),
                uid: "view-uid".to_owned(),
                component: crate::crd::Component::Compute,
                generation: 1,
                group_locks: Vec::new(),
            }],
            ..RisingWaveStatus::default()
        });

        let refs = locked_views(&rw);

        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].name, "compute-view");
        assert_eq!(refs[0].namespace, rw.namespace());
    }

    #[test]
    fn guarded_patch_carries_the_resource_version() {
        let before = RisingWaveScaleViewStatus::default();
        let after = RisingWaveScaleViewStatus {
            locked: true,
            ..RisingWaveScaleViewStatus::default()
        };

        let patch =
            guarded_patch(Some("42".to_owned()), "status", &before, &after, "status").unwrap();

        assert_eq!(patch, json!({
            "metadata": { "resourceVersion": "42" },
            "status": { "locked": true },
        }));
    }
}
