//! The RisingWave controller.
//!
//! Each pass reconstructs the [`Phase`] of the RisingWave from its conditions and runs the
//! workflow of that phase, followed by the status collectors and a single status write.

use std::{future::Future, sync::Arc, time::Duration};

use ctrlkit::{ActionHooks, Outcome, Workflow, join, nop, ordered_join, parallel_join, sequential};
use futures::StreamExt;
use k8s_openapi::api::{
    apps::v1::{Deployment, StatefulSet},
    core::v1::{ConfigMap, Service},
};
use kube::{
    Resource, ResourceExt,
    runtime::{
        Controller,
        controller::{self, Action},
        events::{Recorder, Reporter},
        reflector::ObjectRef,
        watcher,
    },
};
use snafu::{ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};

use super::{backoff::Backoff, catch_panic, watched_api};
use crate::{
    client::{self, OwnedClient},
    consts::{ANNOTATION_PAUSE_RECONCILE, LABEL_RISINGWAVE_NAME},
    crd::{
        Component, RisingWave,
        external::kruise::{AdvancedStatefulSet, CloneSet},
        status::{Condition, ConditionType, Phase},
    },
    event::{EventHook, MessageStore, RecorderSink, RisingWaveEvent},
    factory::{self, ObjectFactory, WorkloadKind},
    logging::controller::{ReconcilerError, report_controller_reconciled},
    manager::{self, ControllerManager},
    object::RisingWaveManager,
    utils::k8s::is_being_deleted,
};

pub const CONTROLLER_NAME: &str = "risingwave-controller";

pub const UPDATE_RISINGWAVE_STATUS_VIA_CLIENT: &str = "UpdateRisingWaveStatusViaClient";
pub const SYNC_OBSERVED_GENERATION: &str = "SyncObservedGeneration";
pub const MARK_CONDITION_INITIALIZING_AS_TRUE: &str = "MarkConditionInitializingAsTrue";
pub const REMOVE_CONDITION_INITIALIZING: &str = "RemoveConditionInitializing";
pub const MARK_CONDITION_RUNNING_AS_TRUE: &str = "MarkConditionRunningAsTrue";
pub const MARK_CONDITION_UPGRADING_AS_TRUE: &str = "MarkConditionUpgradingAsTrue";
pub const MARK_CONDITION_UPGRADING_AS_FALSE: &str = "MarkConditionUpgradingAsFalse";
pub const MARK_CONDITION_FAILED_AS_TRUE: &str = "MarkConditionFailedAsTrue";

const INVALID_CONFIGURATION: &str = "InvalidConfiguration";

pub struct Context {
    pub client: kube::Client,
    pub recorder: Recorder,
    pub operator_version: String,
    pub force_update: bool,
    pub config_template: Arc<str>,
    pub backoff: Backoff,
}

impl Context {
    pub fn new(
        client: kube::Client,
        operator_version: impl Into<String>,
        force_update: bool,
        config_template: Arc<str>,
    ) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_owned(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client.clone(), reporter),
            client,
            operator_version: operator_version.into(),
            force_update,
            config_template,
            backoff: Backoff::new(),
        }
    }
}

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to set up the client for the children"))]
    ChildClient { source: client::Error },

    #[snafu(display("failed to render the RisingWave"))]
    Render { source: factory::Error },

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

/// Binds the condition changes and the status write of a pass.
trait Transitions {
    fn mark(&self, name: &'static str, condition: Condition, outcome: Outcome) -> Workflow;
    fn remove(&self, name: &'static str, type_: ConditionType) -> Workflow;
    fn sync_observed_generation(&self) -> Workflow;
    fn update_status(&self) -> Workflow;
}

impl Transitions for Arc<ControllerManager> {
    fn mark(&self, name: &'static str, condition: Condition, outcome: Outcome) -> Workflow {
        self.act(name, move |m| {
            m.risingwave_manager().update_condition(condition.clone());
            async move { Ok::<_, manager::Error>(outcome) }
        })
    }

    fn remove(&self, name: &'static str, type_: ConditionType) -> Workflow {
        self.act(name, move |m| {
            m.risingwave_manager().remove_condition(type_);
            async { Ok::<_, manager::Error>(Outcome::CONTINUE) }
        })
    }

    fn sync_observed_generation(&self) -> Workflow {
        self.act(SYNC_OBSERVED_GENERATION, |m| {
            m.risingwave_manager().sync_observed_generation();
            async { Ok::<_, manager::Error>(Outcome::CONTINUE) }
        })
    }

    fn update_status(&self) -> Workflow {
        self.act(UPDATE_RISINGWAVE_STATUS_VIA_CLIENT, |m| async move {
            m.update_remote_status().await
        })
    }
}

fn sync_workloads(mgr: &Arc<ControllerManager>, component: Component) -> Workflow {
    let open_kruise = mgr.risingwave().spec.enable_open_kruise;
    match WorkloadKind::for_component(component, open_kruise) {
        Some(WorkloadKind::StatefulSet) => mgr.sync_workloads_action::<StatefulSet>(component),
        Some(WorkloadKind::AdvancedStatefulSet) => {
            mgr.sync_workloads_action::<AdvancedStatefulSet>(component)
        }
        Some(WorkloadKind::Deployment) => mgr.sync_workloads_action::<Deployment>(component),
        Some(WorkloadKind::CloneSet) => mgr.sync_workloads_action::<CloneSet>(component),
        None => nop(),
    }
}

fn wait_workloads_ready(mgr: &Arc<ControllerManager>, component: Component) -> Workflow {
    let open_kruise = mgr.risingwave().spec.enable_open_kruise;
    match WorkloadKind::for_component(component, open_kruise) {
        Some(WorkloadKind::StatefulSet) => {
            mgr.wait_workloads_ready_action::<StatefulSet>(component)
        }
        Some(WorkloadKind::AdvancedStatefulSet) => {
            mgr.wait_workloads_ready_action::<AdvancedStatefulSet>(component)
        }
        Some(WorkloadKind::Deployment) => mgr.wait_workloads_ready_action::<Deployment>(component),
        Some(WorkloadKind::CloneSet) => mgr.wait_workloads_ready_action::<CloneSet>(component),
        None => nop(),
    }
}

/// Brings every child in line with the declared `spec` and waits until all workloads are rolled
/// out.
///
/// Components of the inactive mode are synced too, which removes their leftovers after a switch
/// between standalone and distributed mode.
fn sync_all(mgr: &Arc<ControllerManager>) -> Workflow {
    let standalone = mgr.risingwave().spec.enable_standalone_mode;

    let sync_meta = sequential([mgr.sync_meta_service(), sync_workloads(mgr, Component::Meta)]);
    let sync_others = parallel_join(
        [
            Component::Frontend,
            Component::Compute,
            Component::Compactor,
            Component::Connector,
        ]
        .map(|component| {
            sequential([
                mgr.sync_service_action(component),
                sync_workloads(mgr, component),
            ])
        }),
    );
    let sync_standalone = sequential([
        mgr.sync_standalone_service(),
        sync_workloads(mgr, Component::Standalone),
    ]);

    let wait_all_ready = if standalone {
        wait_workloads_ready(mgr, Component::Standalone)
    } else {
        sequential([
            parallel_join(
                [
                    Component::Meta,
                    Component::Frontend,
                    Component::Compute,
                    Component::Compactor,
                    Component::Connector,
                ]
                .map(|component| wait_workloads_ready(mgr, component)),
            ),
            mgr.wait_before_meta_service_is_available(),
        ])
    };

    sequential([
        mgr.sync_observed_generation(),
        mgr.sync_config_config_map(),
        parallel_join([sync_meta, sync_others, sync_standalone]),
        wait_all_ready,
    ])
}

fn phase_workflow(mgr: &Arc<ControllerManager>, phase: Phase) -> Workflow {
    let running = || Condition::new(ConditionType::Running, true);
    let initializing = || {
        sequential([
            sync_all(mgr),
            mgr.remove(REMOVE_CONDITION_INITIALIZING, ConditionType::Initializing),
            mgr.mark(MARK_CONDITION_RUNNING_AS_TRUE, running(), Outcome::CONTINUE),
        ])
    };

    match phase {
        Phase::FirstSeen => {
            let start = mgr.act(MARK_CONDITION_INITIALIZING_AS_TRUE, |m| {
                let rw = m.risingwave_manager();
                rw.update_condition(Condition::new(ConditionType::Initializing, true));
                rw.update_condition(Condition::new(ConditionType::Running, false));
                async { Ok::<_, manager::Error>(Outcome::CONTINUE) }
            });
            sequential([start, initializing()])
        }
        Phase::Initializing => initializing(),
        Phase::Recovering => sequential([
            sync_all(mgr),
            mgr.mark(MARK_CONDITION_RUNNING_AS_TRUE, running(), Outcome::CONTINUE),
        ]),
        Phase::Running if mgr.risingwave_manager().is_observed_generation_outdated() => mgr.mark(
            MARK_CONDITION_UPGRADING_AS_TRUE,
            Condition::new(ConditionType::Upgrading, true),
            Outcome::REQUEUE,
        ),
        Phase::Running | Phase::Failed => nop(),
        Phase::Upgrading => sequential([
            sync_all(mgr),
            mgr.mark(
                MARK_CONDITION_UPGRADING_AS_FALSE,
                Condition::new(ConditionType::Upgrading, false),
                Outcome::CONTINUE,
            ),
        ]),
    }
}

/// The workflow of one pass: the phase, then the collectors, then the status write. The later
/// steps run even when an earlier one fails or exits.
fn reconcile_workflow(mgr: &Arc<ControllerManager>, phase: Phase) -> Workflow {
    ordered_join([
        phase_workflow(mgr, phase),
        join([
            mgr.collect_running_statistics_and_sync_status(),
            mgr.sync_service_monitor_action(),
            mgr.release_scale_view_lock_action(),
        ]),
        mgr.update_status(),
    ])
}

/// Records a configuration that cannot be rendered. Nothing but the status is written, and the
/// RisingWave is not requeued until its spec changes.
fn invalid_configuration_workflow(
    mgr: &Arc<ControllerManager>,
    messages: &MessageStore,
    error: &factory::Error,
) -> Workflow {
    let message = snafu::Report::from_error(error).to_string();
    messages.set(RisingWaveEvent::Unhealthy.as_ref(), message.clone());

    sequential([
        mgr.sync_observed_generation(),
        mgr.mark(
            MARK_CONDITION_FAILED_AS_TRUE,
            Condition::new(ConditionType::Failed, true).with_reason(INVALID_CONFIGURATION, message),
            Outcome::CONTINUE,
        ),
        mgr.update_status(),
    ])
}

fn validate(rw: &RisingWave, operator_version: &str) -> Result<(), factory::Error> {
    ObjectFactory::new(rw, operator_version)?.validate()
}

fn action_for(outcome: Outcome) -> Action {
    match outcome.requeue_delay() {
        Some(delay) => Action::requeue(delay),
        None => Action::await_change(),
    }
}

async fn reconcile_risingwave(rw: Arc<RisingWave>, ctx: Arc<Context>) -> Result<Action, Error> {
    if is_being_deleted(rw.as_ref()) {
        return Ok(Action::await_change());
    }
    if rw.annotations().contains_key(ANNOTATION_PAUSE_RECONCILE) {
        tracing::info!(risingwave = rw.name_any(), "reconciliation is paused");
        return Ok(Action::await_change());
    }

    let invalid = match validate(&rw, &ctx.operator_version) {
        Ok(()) => None,
        Err(error) if error.is_invalid_configuration() => Some(error),
        Err(source) => return Err(Error::Render { source }),
    };

    let risingwave = Arc::new(RisingWaveManager::new(ctx.client.clone(), Arc::clone(&rw)));
    let messages = Arc::new(MessageStore::new());
    let sink = Arc::new(RecorderSink::new(ctx.recorder.clone(), rw.object_ref(&())));
    let hook = Arc::new(EventHook::new(Arc::clone(&risingwave), Arc::clone(&messages), sink));
    let hooks =
        Arc::new(ActionHooks::new().subscribe_to(UPDATE_RISINGWAVE_STATUS_VIA_CLIENT, hook));

    let client = OwnedClient::new(
        ctx.client.clone(),
        &rw,
        ctx.force_update,
        ctx.operator_version.as_str(),
    )
    .context(ChildClientSnafu)?;
    let mgr = Arc::new(ControllerManager::new(
        client,
        Arc::clone(&risingwave),
        Arc::clone(&messages),
        hooks,
        ctx.operator_version.as_str(),
        Arc::clone(&ctx.config_template),
    ));

    let workflow = match invalid {
        Some(error) => {
            tracing::warn!(
                risingwave = rw.name_any(),
                error = &error as &dyn std::error::Error,
                "the RisingWave cannot be rendered"
            );
            invalid_configuration_workflow(&mgr, &messages, &error)
        }
        None => {
            let mut phase = Phase::from_conditions(&risingwave.status_after().conditions);
            if phase == Phase::Failed && risingwave.is_observed_generation_outdated() {
                risingwave.remove_condition(ConditionType::Failed);
                phase = Phase::from_conditions(&risingwave.status_after().conditions);
            }
            tracing::debug!(risingwave = rw.name_any(), %phase, "reconciling");
            reconcile_workflow(&mgr, phase)
        }
    };

    let outcome = workflow.optimize().run().await.context(WorkflowSnafu)?;
    Ok(action_for(outcome))
}

pub async fn reconcile(rw: Arc<RisingWave>, ctx: Arc<Context>) -> Result<Action, Error> {
    let key = ObjectRef::from_obj(rw.as_ref()).to_string();
    let result = catch_panic(reconcile_risingwave(rw, Arc::clone(&ctx)), |message| {
        Error::ReconcilePanicked { message }
    })
    .await;

    if result.is_ok() {
        ctx.backoff.reset(&key);
    }
    result
}

pub fn error_policy(rw: Arc<RisingWave>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = ObjectRef::from_obj(rw.as_ref()).to_string();
    let delay: Duration = ctx.backoff.next_delay(&key);
    tracing::debug!(
        risingwave = rw.name_any(),
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
    let client = &ctx.client;
    let children = watcher::Config::default().labels(LABEL_RISINGWAVE_NAME);
    let recorder = ctx.recorder.clone();

    Controller::new(watched_api::<RisingWave>(client, watch_namespace), watcher::Config::default())
        .owns(watched_api::<StatefulSet>(client, watch_namespace), children.clone())
        .owns(watched_api::<Deployment>(client, watch_namespace), children.clone())
        .owns(watched_api::<Service>(client, watch_namespace), children.clone())
        .owns(watched_api::<ConfigMap>(client, watch_namespace), children)
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
    use rstest::rstest;

    use super::*;
    use crate::{
        crd::status::RisingWaveStatus,
        factory::tests::{OPERATOR_VERSION, minimal},
        manager::tests::manager,
        utils::mock_client::{mock_client, serve_empty},
    };

    const SYNC_ALL: &str = concat!(
        "Sequential(SyncObservedGeneration, SyncConfigConfigMap, ",
        "ParallelJoin(",
        "Sequential(SyncMetaService, SyncMetaStatefulSets), ",
        "ParallelJoin(",
        "Sequential(SyncFrontendService, SyncFrontendDeployments), ",
        "Sequential(SyncComputeService, SyncComputeStatefulSets), ",
        "Sequential(SyncCompactorService, SyncCompactorDeployments), ",
        "Sequential(SyncConnectorService, SyncConnectorDeployments)), ",
        "Sequential(SyncStandaloneService, SyncStandaloneStatefulSets)), ",
        "Sequential(",
        "ParallelJoin(WaitBeforeMetaStatefulSetsReady, WaitBeforeFrontendDeploymentsReady, ",
        "WaitBeforeComputeStatefulSetsReady, WaitBeforeCompactorDeploymentsReady, ",
        "WaitBeforeConnectorDeploymentsReady), ",
        "WaitBeforeMetaServiceIsAvailable))",
    );

    fn is_initializing_and_running(mgr: &ControllerManager) -> bool {
        let rw = mgr.risingwave_manager();
        rw.does_condition_exist_and_equal(ConditionType::Initializing, true)
            && rw.does_condition_exist_and_equal(ConditionType::Running, true)
    }

    #[rstest]
    #[case(
        Phase::FirstSeen,
        "Sequential(MarkConditionInitializingAsTrue, \
         Sequential({sync}, RemoveConditionInitializing, MarkConditionRunningAsTrue))"
    )]
    #[case(
        Phase::Initializing,
        "Sequential({sync}, RemoveConditionInitializing, MarkConditionRunningAsTrue)"
    )]
    #[case(Phase::Recovering, "Sequential({sync}, MarkConditionRunningAsTrue)")]
    #[case(Phase::Upgrading, "Sequential({sync}, MarkConditionUpgradingAsFalse)")]
    #[case(Phase::Failed, "Nop")]
    #[tokio::test]
    async fn workflow_of_each_phase(#[case] phase: Phase, #[case] expected: &str) {
        let (client, _handle) = mock_client();
        let mgr = manager(minimal(), client);

        assert_eq!(
            phase_workflow(&mgr, phase).to_string(),
            expected.replace("{sync}", SYNC_ALL)
        );
    }

    #[tokio::test]
    async fn running_with_a_new_generation_starts_upgrading() {
        let (client, _handle) = mock_client();
        let mgr = manager(minimal(), client);
        mgr.risingwave_manager()
            .update_condition(Condition::new(ConditionType::Running, true));

        let workflow = phase_workflow(&mgr, Phase::Running);
        assert_eq!(workflow.to_string(), MARK_CONDITION_UPGRADING_AS_TRUE);
        assert_eq!(workflow.run().await.unwrap(), Outcome::REQUEUE);

        let conditions = mgr.risingwave_manager().status_after().conditions;
        assert_eq!(Phase::from_conditions(&conditions), Phase::Upgrading);
    }

    #[tokio::test]
    async fn running_in_sync_does_nothing() {
        let mut rw = minimal();
        rw.status = Some(RisingWaveStatus {
            observed_generation: rw.metadata.generation,
            ..RisingWaveStatus::default()
        });
        let (client, _handle) = mock_client();
        let mgr = manager(rw, client);

        assert!(phase_workflow(&mgr, Phase::Running).is_nop());
    }

    #[tokio::test]
    async fn initializing_and_running_are_never_both_true() {
        let (client, handle) = mock_client();
        serve_empty(handle);
        let mgr = manager(minimal(), client);

        // Nothing can be created on the empty API server, so the pass stops in the sync.
        assert!(phase_workflow(&mgr, Phase::FirstSeen).run().await.is_err());
        let rw = mgr.risingwave_manager();
        assert!(rw.does_condition_exist_and_equal(ConditionType::Initializing, true));
        assert!(rw.does_condition_exist_and_equal(ConditionType::Running, false));
        assert!(!is_initializing_and_running(&mgr));

        mgr.remove(REMOVE_CONDITION_INITIALIZING, ConditionType::Initializing)
            .run()
            .await
            .unwrap();
        assert!(!is_initializing_and_running(&mgr));
        mgr.mark(
            MARK_CONDITION_RUNNING_AS_TRUE,
            Condition::new(ConditionType::Running, true),
            Outcome::CONTINUE,
        )
        .run()
        .await
        .unwrap();
        assert!(!is_initializing_and_running(&mgr));
        assert_eq!(
            Phase::from_conditions(&mgr.risingwave_manager().status_after().conditions),
            Phase::Running
        );
    }

    #[tokio::test]
    async fn paused_risingwave_is_not_touched() {
        let (client, handle) = mock_client();
        let requests = serve_empty(handle);
        let ctx = Arc::new(Context::new(client, OPERATOR_VERSION, false, Arc::from("")));
        let mut rw = minimal();
        rw.annotations_mut()
            .insert(ANNOTATION_PAUSE_RECONCILE.to_owned(), "true".to_owned());

        let action = reconcile(Arc::new(rw), Arc::clone(&ctx)).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert!(requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unpaused_risingwave_syncs_its_children() {
        let (client, handle) = mock_client();
        let requests = serve_empty(handle);
        let ctx = Arc::new(Context::new(client, OPERATOR_VERSION, false, Arc::from("")));

        assert!(reconcile(Arc::new(minimal()), Arc::clone(&ctx)).await.is_err());

        let requests = requests.lock().unwrap();
        assert!(
            requests.contains(&"GET /api/v1/namespaces/default/configmaps/rw-config".to_owned())
        );
        assert!(requests.contains(&"POST /api/v1/namespaces/default/configmaps".to_owned()));
    }

    #[rstest]
    #[case(Outcome::CONTINUE, Action::await_change())]
    #[case(Outcome::EXIT, Action::await_change())]
    #[case(Outcome::REQUEUE, Action::requeue(Duration::ZERO))]
    #[case(Outcome::requeue_after(Duration::from_secs(1)), Action::requeue(Duration::from_secs(1)))]
    #[case(
        Outcome::EXIT.join(Outcome::requeue_after(Duration::from_millis(10))),
        Action::requeue(Duration::from_millis(10))
    )]
    fn outcomes_map_to_actions(#[case] outcome: Outcome, #[case] expected: Action) {
        assert_eq!(action_for(outcome), expected);
    }

    #[test]
    fn panics_are_categorized() {
        let err = Error::ReconcilePanicked {
            message: "boom".to_owned(),
        };
        assert_eq!(err.category(), "ReconcilePanicked");
        assert_eq!(err.to_string(), "the reconcile panicked: boom");
    }
}
