use std::{collections::BTreeMap, fmt::Debug};

use k8s_openapi::NamespaceResourceScope;
use kube::{
    Api, Resource, ResourceExt,
    api::{
        DeleteParams, ListParams, Patch, PatchParams, PostParams, Preconditions, PropagationPolicy,
    },
};
use serde::{Serialize, de::DeserializeOwned};
use snafu::{OptionExt, ResultExt, Snafu};

use crate::{
    consts::{FIELD_MANAGER, LABEL_RISINGWAVE_OPERATOR_VERSION},
    crd::RisingWave,
    utils::k8s::{is_conflict, is_invalid, is_not_found, is_owned_by, label},
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("the RisingWave has no {field}"))]
    MissingOwnerMetadata { field: &'static str },

    #[snafu(display("refusing to touch {kind} {name:?}, it is not owned by the RisingWave"))]
    NotOwned { kind: &'static str, name: String },

    #[snafu(display("failed to get {kind} {name:?}"))]
    Get {
        source: kube::Error,
        kind: &'static str,
        name: String,
    },

    #[snafu(display("failed to list {kind}s"))]
    List { source: kube::Error, kind: &'static str },

    #[snafu(display("failed to create {kind} {name:?}"))]
    Create {
        source: kube::Error,
        kind: &'static str,
        name: String,
    },

    #[snafu(display("failed to apply {kind} {name:?}"))]
    Apply {
        source: kube::Error,
        kind: &'static str,
        name: String,
    },

    #[snafu(display("failed to delete {kind} {name:?}"))]
    Delete {
        source: kube::Error,
        kind: &'static str,
        name: String,
    },
}

impl Error {
    /// Whether the request lost a race against another writer. Such errors are resolved by
    /// reconciling again rather than by backing off.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Create { source, .. }
            | Self::Apply { source, .. }
            | Self::Delete { source, .. } => is_conflict(source),
            _ => false,
        }
    }
}

/// Objects the client can handle: namespaced, statically typed Kubernetes objects.
pub trait ChildObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
}

impl<K> ChildObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static
{
}

fn kind<K: ChildObject>() -> &'static str {
    // Kinds are static strings for every type with a unit dynamic type.
    match K::kind(&()) {
        std::borrow::Cow::Borrowed(kind) => kind,
        std::borrow::Cow::Owned(_) => "object",
    }
}

fn selector_string(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Access to the children of one RisingWave.
///
/// Mutations are refused for objects that are not controlled by that RisingWave, and listings
/// only ever return such objects.
#[derive(Clone)]
pub struct OwnedClient {
    client: kube::Client,
    namespace: String,
    owner_uid: String,
    force_update: bool,
    operator_version: String,
}

impl OwnedClient {
    pub fn new(
        client: kube::Client,
        owner: &RisingWave,
        force_update: bool,
        operator_version: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            client,
            namespace: owner
                .namespace()
                .context(MissingOwnerMetadataSnafu { field: "namespace" })?,
            owner_uid: owner.uid().context(MissingOwnerMetadataSnafu { field: "uid" })?,
            force_update,
            operator_version: operator_version.into(),
        })
    }

    pub fn kube_client(&self) -> kube::Client {
        self.client.clone()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn api<K: ChildObject>(&self) -> Api<K> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn ensure_owned<K: ChildObject>(&self, obj: &K) -> Result<()> {
        if is_owned_by(obj, &self.owner_uid) {
            Ok(())
        } else {
            NotOwnedSnafu {
                kind: kind::<K>(),
                name: obj.name_any(),
            }
            .fail()
        }
    }

    /// The object named `name`, whoever owns it.
    pub async fn get<K: ChildObject>(&self, name: &str) -> Result<Option<K>> {
        self.api::<K>().get_opt(name).await.context(GetSnafu {
            kind: kind::<K>(),
            name,
        })
    }

    /// The owned objects matching all labels of `selector`.
    pub async fn list<K: ChildObject>(
        &self,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<K>> {
        let params = ListParams::default().labels(&selector_string(selector));
        let objects = self
            .api::<K>()
            .list(&params)
            .await
            .context(ListSnafu { kind: kind::<K>() })?;

        Ok(objects
            .items
            .into_iter()
            .filter(|obj| is_owned_by(obj, &self.owner_uid))
            .collect())
    }

    pub async fn create<K: ChildObject>(&self, obj: &K) -> Result<K> {
        self.ensure_owned(obj)?;
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_owned()),
            ..PostParams::default()
        };
        self.api::<K>().create(&params, obj).await.context(CreateSnafu {
            kind: kind::<K>(),
            name: obj.name_any(),
        })
    }

    /// Server-side applies `desired` over `current`. Fields the operator never set stay as they
    /// are.
    ///
    /// With force update enabled, an object rejected as invalid that was written by another
    /// operator version is deleted and created again.
    pub async fn apply<K: ChildObject>(&self, current: &K, desired: &K) -> Result<K> {
        self.ensure_owned(current)?;
        self.ensure_owned(desired)?;

        let name = desired.name_any();
        let params = PatchParams::apply(FIELD_MANAGER).force();
        match self.api::<K>().patch(&name, &params, &Patch::Apply(desired)).await {
            Ok(obj) => Ok(obj),
            Err(err)
                if is_invalid(&err)
                    && self.force_update
                    && label(current, LABEL_RISINGWAVE_OPERATOR_VERSION)
                        != Some(self.operator_version.as_str()) =>
            {
                tracing::info!(
                    kind = kind::<K>(),
                    object = name,
                    error = &err as &dyn std::error::Error,
                    "object rejected after an operator upgrade, recreating it"
                );
                self.delete(current).await?;
                self.create(desired).await
            }
            Err(source) => Err(Error::Apply {
                source,
                kind: kind::<K>(),
                name,
            }),
        }
    }

    /// Deletes `obj` in the background, as long as it is still the same object. An object that
    /// is already gone counts as deleted.
    pub async fn delete<K: ChildObject>(&self, obj: &K) -> Result<()> {
        self.ensure_owned(obj)?;

        let name = obj.name_any();
        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            preconditions: Some(Preconditions {
                uid: obj.uid(),
                resource_version: None,
            }),
            ..DeleteParams::default()
        };
        match self.api::<K>().delete(&name, &params).await {
            Ok(_) => Ok(()),
            Err(err) if is_not_found(&err) => Ok(()),
            Err(source) => Err(Error::Delete {
                source,
                kind: kind::<K>(),
                name,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::{apps::v1::StatefulSet, core::v1::Service};

    use super::*;

    #[test]
    fn selectors_are_comma_joined() {
        let selector = BTreeMap::from([
            ("risingwave/name".to_owned(), "rw".to_owned()),
            ("risingwave/component".to_owned(), "compute".to_owned()),
        ]);
        assert_eq!(
            selector_string(&selector),
            "risingwave/component=compute,risingwave/name=rw"
        );
    }

    #[test]
    fn kinds() {
        assert_eq!(kind::<StatefulSet>(), "StatefulSet");
        assert_eq!(kind::<Service>(), "Service");
    }
}
