//! Names of the actions bound by the [`ControllerManager`](super::ControllerManager).
//!
//! Hooks are subscribed by these names, keep them stable.

use crate::{crd::Component, factory::WorkloadKind};

pub const SYNC_CONFIG_CONFIG_MAP: &str = "SyncConfigConfigMap";
pub const SYNC_SERVICE_MONITOR: &str = "SyncServiceMonitor";
pub const WAIT_BEFORE_META_SERVICE_IS_AVAILABLE: &str = "WaitBeforeMetaServiceIsAvailable";
pub const RELEASE_SCALE_VIEW_LOCK: &str = "ReleaseScaleViewLock";

pub const COLLECT_RUNNING_STATISTICS: &str = "CollectRunningStatisticsAndSyncStatus";
pub const COLLECT_RUNNING_STATISTICS_FOR_OPEN_KRUISE: &str =
    "CollectRunningStatisticsAndSyncStatusForOpenKruise";
pub const COLLECT_RUNNING_STATISTICS_FOR_STANDALONE: &str =
    "CollectRunningStatisticsAndSyncStatusForStandalone";
pub const COLLECT_RUNNING_STATISTICS_FOR_STANDALONE_OPEN_KRUISE: &str =
    "CollectRunningStatisticsAndSyncStatusForStandaloneOpenKruise";

fn title(component: Component) -> &'static str {
    match component {
        Component::Meta => "Meta",
        Component::Frontend => "Frontend",
        Component::Compute => "Compute",
        Component::Compactor => "Compactor",
        Component::Connector => "Connector",
        Component::Standalone => "Standalone",
        Component::Config => "Config",
    }
}

/// `SyncMetaService`, `SyncFrontendService`, ...
pub fn sync_service(component: Component) -> String {
    format!("Sync{}Service", title(component))
}

/// `SyncMetaStatefulSets`, `SyncFrontendCloneSets`, ...
pub fn sync_workloads(component: Component, kind: WorkloadKind) -> String {
    format!("Sync{}{kind}s", title(component))
}

/// `WaitBeforeMetaStatefulSetsReady`, `WaitBeforeFrontendDeploymentsReady`, ...
pub fn wait_workloads_ready(component: Component, kind: WorkloadKind) -> String {
    format!("WaitBefore{}{kind}sReady", title(component))
}

pub fn collect_running_statistics(standalone: bool, open_kruise: bool) -> &'static str {
    match (standalone, open_kruise) {
        (false, false) => COLLECT_RUNNING_STATISTICS,
        (false, true) => COLLECT_RUNNING_STATISTICS_FOR_OPEN_KRUISE,
        (true, false) => COLLECT_RUNNING_STATISTICS_FOR_STANDALONE,
        (true, true) => COLLECT_RUNNING_STATISTICS_FOR_STANDALONE_OPEN_KRUISE,
    }
}
