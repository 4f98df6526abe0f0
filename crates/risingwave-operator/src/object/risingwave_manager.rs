use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ctrlkit::Outcome;
use k8s_openapi::{apimachinery::pkg::apis::meta::v1::Time, jiff::Timestamp};
use kube::{
    Api, ResourceExt,
    api::{Patch, PatchParams},
};
use serde_json::json;
use snafu::{OptionExt, ResultExt, Snafu};

use crate::{
    consts::{FIELD_MANAGER, STATUS_CONFLICT_REQUEUE},
    crd::{
        RisingWave,
        status::{Condition, ConditionType, RisingWaveStatus, ScaleViewLock},
    },
    utils::k8s::{is_conflict, is_not_found, merge_patch},
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("the RisingWave has no namespace"))]
    MissingNamespace,

    #[snafu(display("failed to serialize the status"))]
    SerializeStatus { source: serde_json::Error },

    #[snafu(display("failed to update the status of RisingWave {name:?}"))]
    UpdateStatus { source: kube::Error, name: String },
}

/// Inserts or replaces the condition of the same type. The transition time is stamped with `now`
/// when the condition is new or its status changed, and kept otherwise.
fn upsert_condition(conditions: &mut Vec<Condition>, mut condition: Condition, now: Time) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(current) => {
            condition.last_transition_time = if current.status == condition.status {
                current.last_transition_time.clone()
            } else {
                Some(now)
            };
            *current = condition;
        }
        None => {
            condition.last_transition_time = Some(now);
            conditions.push(condition);
        }
    }
}

/// The RisingWave under reconciliation.
///
/// Holds the object as it was when the pass started and a working copy that actions mutate.
/// Only the status of the working copy is ever written back.
pub struct RisingWaveManager {
    client: kube::Client,
    before: Arc<RisingWave>,
    after: Mutex<RisingWave>,
}

impl RisingWaveManager {
    pub fn new(client: kube::Client, risingwave: Arc<RisingWave>) -> Self {
        Self {
            client,
            after: Mutex::new(risingwave.as_ref().clone()),
            before: risingwave,
        }
    }

    fn after(&self) -> MutexGuard<'_, RisingWave> {
        self.after.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The object as observed at the start of the pass.
    pub fn risingwave(&self) -> &Arc<RisingWave> {
        &self.before
    }

    pub fn status_before(&self) -> RisingWaveStatus {
        self.before.status.clone().unwrap_or_default()
    }

    pub fn status_after(&self) -> RisingWaveStatus {
        self.after().status.clone().unwrap_or_default()
    }

    pub fn get_condition(&self, type_: ConditionType) -> Option<Condition> {
        self.after().status.as_ref()?.condition(type_).cloned()
    }

    pub fn does_condition_exist_and_equal(&self, type_: ConditionType, status: bool) -> bool {
        self.after()
            .status
            .as_ref()
            .is_some_and(|s| s.has_condition(type_, status))
    }

    pub fn update_condition(&self, condition: Condition) {
        let now = Time(Timestamp::now());
        self.update_status(|status| upsert_condition(&mut status.conditions, condition, now));
    }

    pub fn remove_condition(&self, type_: ConditionType) {
        self.update_status(|status| status.conditions.retain(|c| c.type_ != type_));
    }

    pub fn is_observed_generation_outdated(&self) -> bool {
        let after = self.after();
        let observed = after.status.as_ref().and_then(|s| s.observed_generation);
        observed < after.metadata.generation
    }

    pub fn sync_observed_generation(&self) {
        let mut after = self.after();
        let generation = after.metadata.generation;
        let status = after.status.get_or_insert_default();
        status.observed_generation = status.observed_generation.max(generation);
    }

    pub fn update_status(&self, mutate: impl FnOnce(&mut RisingWaveStatus)) {
        mutate(self.after().status.get_or_insert_default());
    }

    /// Keeps only the given scale view locks.
    pub fn keep_lock(&self, alive: Vec<ScaleViewLock>) {
        self.update_status(|status| status.scale_views = alive);
    }

    /// Writes the status of the working copy, if it changed during the pass.
    ///
    /// A missing object is not an error, a conflicting write asks for a short requeue so that
    /// the watch cache catches up.
    pub async fn update_remote_status(&self) -> Result<Outcome> {
        let before = self.status_before();
        let after = self.status_after();
        if before == after {
            return Ok(Outcome::CONTINUE);
        }

        let name = self.before.name_any();
        let namespace = self.before.namespace().context(MissingNamespaceSnafu)?;
        let status_patch = merge_patch(
            &serde_json::to_value(&before).context(SerializeStatusSnafu)?,
            &serde_json::to_value(&after).context(SerializeStatusSnafu)?,
        );
        let patch = json!({
            "metadata": { "resourceVersion": self.before.resource_version() },
            "status": status_patch,
        });

        let api: Api<RisingWave> = Api::namespaced(self.client.clone(), &namespace);
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_owned()),
            ..PatchParams::default()
        };
        match api.patch_status(&name, &params, &Patch::Merge(&patch)).await {
            Ok(_) => Ok(Outcome::CONTINUE),
            Err(err) if is_not_found(&err) => {
                tracing::info!(risingwave = name, "RisingWave is gone, skipping the status update");
                Ok(Outcome::NO_REQUEUE)
            }
            Err(err) if is_conflict(&err) => {
                tracing::info!(risingwave = name, "conflict while updating the status, retrying");
                Ok(Outcome::requeue_after(STATUS_CONFLICT_REQUEUE))
            }
            Err(source) => Err(Error::UpdateStatus { source, name }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rstest::rstest;

    use super::*;
    use crate::crd::status::ConditionStatus;

    fn at(ts: &str) -> Time {
        Time(Timestamp::from_str(ts).unwrap())
    }

    #[rstest]
    #[case(true, false)]
    #[case(false, true)]
    fn transition_time_changes_with_status(#[case] new_status: bool, #[case] stamped: bool) {
        let mut conditions = vec![Condition {
            last_transition_time: Some(at("2024-01-01T00:00:00Z")),
            ..Condition::new(ConditionType::Running, true)
        }];

        upsert_condition(
            &mut conditions,
            Condition::new(ConditionType::Running, new_status).with_reason("Checked", "checked"),
            at("2024-02-01T00:00:00Z"),
        );

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, ConditionStatus::from(new_status));
        assert_eq!(conditions[0].reason.as_deref(), Some("Checked"));
        let expected = if stamped { "2024-02-01T00:00:00Z" } else { "2024-01-01T00:00:00Z" };
        assert_eq!(conditions[0].last_transition_time, Some(at(expected)));
    }

    #[test]
    fn new_condition_is_stamped_and_appended() {
        let mut conditions = vec![Condition::new(ConditionType::Running, false)];
        upsert_condition(
            &mut conditions,
            Condition::new(ConditionType::Initializing, true),
            at("2024-02-01T00:00:00Z"),
        );

        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[1].type_, ConditionType::Initializing);
        assert_eq!(conditions[1].last_transition_time, Some(at("2024-02-01T00:00:00Z")));
    }
}
