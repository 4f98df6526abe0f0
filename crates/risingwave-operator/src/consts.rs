//! Well-known names shared by the factory, the controllers and the cluster.

use std::time::Duration;

use const_format::concatcp;

pub const LABEL_PREFIX: &str = "risingwave";
pub const API_GROUP: &str = "risingwave.risingwavelabs.com";

pub const LABEL_RISINGWAVE_NAME: &str = concatcp!(LABEL_PREFIX, "/name");
pub const LABEL_RISINGWAVE_COMPONENT: &str = concatcp!(LABEL_PREFIX, "/component");
pub const LABEL_RISINGWAVE_GROUP: &str = concatcp!(LABEL_PREFIX, "/group");
pub const LABEL_RISINGWAVE_GENERATION: &str = concatcp!(LABEL_PREFIX, "/generation");
pub const LABEL_RISINGWAVE_META_ROLE: &str = concatcp!(LABEL_PREFIX, "/meta-role");
pub const LABEL_RISINGWAVE_OPERATOR_VERSION: &str = concatcp!(LABEL_PREFIX, "/operator-version");

/// Marks objects that must not be re-rendered for every generation.
pub const NO_SYNC: &str = "no-sync";

pub const ANNOTATION_RESTART_AT: &str = concatcp!(LABEL_PREFIX, "/restart-at");
pub const ANNOTATION_PAUSE_RECONCILE: &str = concatcp!(API_GROUP, "/pause-reconcile");
pub const ANNOTATION_INHERIT_LABEL_PREFIX: &str = concatcp!(API_GROUP, "/inherit-label-prefix");

pub const SCALE_VIEW_FINALIZER: &str = concatcp!(API_GROUP, "/scale-view-lock");

pub const META_ROLE_LEADER: &str = "leader";
pub const META_ROLE_FOLLOWER: &str = "follower";
pub const META_ROLE_UNKNOWN: &str = "unknown";

pub const PORT_SERVICE: &str = "service";
pub const PORT_METRICS: &str = "metrics";
pub const PORT_DASHBOARD: &str = "dashboard";

pub const DEFAULT_META_SERVICE_PORT: i32 = 5690;
pub const DEFAULT_META_DASHBOARD_PORT: i32 = 5691;
pub const DEFAULT_META_METRICS_PORT: i32 = 1250;
pub const DEFAULT_FRONTEND_SERVICE_PORT: i32 = 4567;
pub const DEFAULT_FRONTEND_METRICS_PORT: i32 = 8080;
pub const DEFAULT_COMPUTE_SERVICE_PORT: i32 = 5688;
pub const DEFAULT_COMPUTE_METRICS_PORT: i32 = 1222;
pub const DEFAULT_COMPACTOR_SERVICE_PORT: i32 = 6660;
pub const DEFAULT_COMPACTOR_METRICS_PORT: i32 = 1260;
pub const DEFAULT_CONNECTOR_SERVICE_PORT: i32 = 50051;
pub const DEFAULT_CONNECTOR_METRICS_PORT: i32 = 50052;

pub const CONFIG_VOLUME_NAME: &str = "risingwave-config";
pub const CONFIG_FILE_KEY: &str = "risingwave.toml";
pub const CONFIG_MOUNT_PATH: &str = "/risingwave/config";
pub const CONFIG_FILE_PATH: &str = concatcp!(CONFIG_MOUNT_PATH, "/", CONFIG_FILE_KEY);
pub const RISINGWAVE_EXECUTABLE: &str = "/risingwave/bin/risingwave";
pub const CONNECTOR_EXECUTABLE: &str = "/risingwave/bin/connector-node/start-service.sh";

pub const DEFAULT_DATA_DIRECTORY: &str = "hummock";

pub const SERVICE_MONITOR_INTERVAL: &str = "5s";
pub const SERVICE_MONITOR_SCRAPE_TIMEOUT: &str = "5s";

pub const HEALTH_CHECK_INITIAL_DELAY_SECONDS: i32 = 2;
pub const HEALTH_CHECK_PERIOD_SECONDS: i32 = 10;

pub const WAIT_READY_REQUEUE: Duration = Duration::from_secs(1);
pub const META_SERVICE_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
pub const STATUS_CONFLICT_REQUEUE: Duration = Duration::from_millis(10);
pub const META_ROLE_REQUEUE: Duration = Duration::from_secs(2);
pub const META_MEMBER_RPC_TIMEOUT: Duration = Duration::from_secs(2);
pub const STS_GENERATION_REQUEUE: Duration = Duration::from_secs(1);
pub const SCALE_VIEW_LOCK_RETRIES: usize = 2;
pub const SCALE_VIEW_LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(5);

pub const FIELD_MANAGER: &str = "risingwave-operator";
