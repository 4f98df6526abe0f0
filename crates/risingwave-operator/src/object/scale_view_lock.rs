//! Locks held by scale views in `status.scaleViews` of their target RisingWave.

use kube::ResourceExt;
use snafu::{OptionExt, Snafu};

use crate::crd::{
    scale_view::RisingWaveScaleView,
    status::{GroupLock, RisingWaveStatus, ScaleViewLock},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("the scale view has no uid"))]
    MissingUid,

    #[snafu(display("group {group:?} is already locked by scale view {holder:?}"))]
    LockConflict { group: String, holder: String },
}

fn group_locks(view: &RisingWaveScaleView) -> Vec<GroupLock> {
    view.spec
        .scale_policy
        .iter()
        .map(|policy| GroupLock {
            name: policy.group.clone(),
            replicas: policy.replicas,
        })
        .collect()
}

pub struct ScaleViewLockManager<'a> {
    status: &'a mut RisingWaveStatus,
}

impl<'a> ScaleViewLockManager<'a> {
    pub fn new(status: &'a mut RisingWaveStatus) -> Self {
        Self { status }
    }

    fn position(&self, view: &RisingWaveScaleView) -> Option<usize> {
        let uid = view.uid()?;
        let name = view.name_any();
        self.status
            .scale_views
            .iter()
            .position(|lock| lock.name == name && lock.uid == uid)
    }

    pub fn lock_for(&self, view: &RisingWaveScaleView) -> Option<&ScaleViewLock> {
        self.position(view).map(|i| &self.status.scale_views[i])
    }

    pub fn is_locked(&self, view: &RisingWaveScaleView) -> bool {
        self.position(view).is_some()
    }

    /// Takes the lock for `view`, or refreshes it when the view changed since. Returns whether
    /// the status was modified.
    ///
    /// An entry with the same name but another uid was left behind by a deleted scale view and
    /// is taken over. Groups locked by another scale view of the same component are a conflict.
    pub fn grab_or_update(&mut self, view: &RisingWaveScaleView) -> Result<bool, Error> {
        let uid = view.uid().context(MissingUidSnafu)?;
        let name = view.name_any();
        let generation = view.metadata.generation.unwrap_or_default();
        let component = view.spec.target_ref.component;

        if let Some(i) = self.position(view) {
            let lock = &mut self.status.scale_views[i];
            if lock.generation == generation {
                return Ok(false);
            }
            lock.generation = generation;
            lock.group_locks = group_locks(view);
            return Ok(true);
        }

        for lock in &self.status.scale_views {
            if lock.name == name || lock.component != component {
                continue;
            }
            if let Some(policy) = view
                .spec
                .scale_policy
                .iter()
                .find(|policy| lock.group_locks.iter().any(|g| g.name == policy.group))
            {
                return LockConflictSnafu {
                    group: policy.group.clone(),
                    holder: lock.name.clone(),
                }
                .fail();
            }
        }

        self.status.scale_views.retain(|lock| lock.name != name);
        self.status.scale_views.push(ScaleViewLock {
            name,
            uid,
            component,
            generation,
            group_locks: group_locks(view),
        });
        Ok(true)
    }

    /// Drops the lock of `view`. Returns whether there was one.
    pub fn release(&mut self, view: &RisingWaveScaleView) -> bool {
        match self.position(view) {
            Some(i) => {
                self.status.scale_views.remove(i);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::formatdoc;

    use super::*;
    use crate::crd::Component;

    fn view(
        name: &str,
        uid: &str,
        generation: i64,
        component: &str,
        groups: &[&str],
    ) -> RisingWaveScaleView {
        let policies: String = groups
            .iter()
            .map(|g| format!("\n  - group: '{g}'\n    replicas: 2"))
            .collect();
        serde_yaml::from_str(&formatdoc! {"
            apiVersion: risingwave.risingwavelabs.com/v1alpha1
            kind: RisingWaveScaleView
            metadata:
              name: {name}
              namespace: default
              uid: {uid}
              generation: {generation}
            spec:
              targetRef:
                name: rw
                component: {component}
              scalePolicy:{policies}
        "})
        .unwrap()
    }

    #[test]
    fn grab_update_release() {
        let mut status = RisingWaveStatus::default();
        let mut locks = ScaleViewLockManager::new(&mut status);
        let v1 = view("sv", "uid-1", 1, "compute", &[""]);

        assert!(locks.grab_or_update(&v1).unwrap());
        assert!(!locks.grab_or_update(&v1).unwrap());
        assert!(locks.is_locked(&v1));

        let v2 = view("sv", "uid-1", 2, "compute", &["", "big"]);
        assert!(locks.grab_or_update(&v2).unwrap());
        assert_eq!(locks.lock_for(&v2).unwrap().group_locks.len(), 2);

        assert!(locks.release(&v2));
        assert!(!locks.release(&v2));
        assert!(status.scale_views.is_empty());
    }

    #[test]
    fn stale_entry_is_taken_over() {
        let mut status = RisingWaveStatus::default();
        ScaleViewLockManager::new(&mut status)
            .grab_or_update(&view("sv", "old", 1, "compute", &[""]))
            .unwrap();

        let mut locks = ScaleViewLockManager::new(&mut status);
        let recreated = view("sv", "new", 1, "compute", &[""]);
        assert!(locks.grab_or_update(&recreated).unwrap());

        assert_eq!(status.scale_views.len(), 1);
        assert_eq!(status.scale_views[0].uid, "new");
        assert_eq!(status.scale_views[0].component, Component::Compute);
    }

    #[test]
    fn overlapping_groups_conflict() {
        let mut status = RisingWaveStatus::default();
        let mut locks = ScaleViewLockManager::new(&mut status);
        locks
            .grab_or_update(&view("a", "uid-a", 1, "compute", &["x"]))
            .unwrap();

        let err = locks
            .grab_or_update(&view("b", "uid-b", 1, "compute", &["x", "y"]))
            .unwrap_err();
        assert!(matches!(err, Error::LockConflict { ref holder, .. } if holder == "a"));

        // Same group name on another component is fine.
        assert!(
            locks
                .grab_or_update(&view("c", "uid-c", 1, "frontend", &["x"]))
                .unwrap()
        );
    }
}
