//! The controllers run by the operator.

use std::{any::Any, future::Future, panic::AssertUnwindSafe};

use futures::FutureExt;
use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Resource};

pub mod backoff;
pub mod compute_update_strategy;
pub mod meta_role_labeler;
pub mod risingwave;
pub mod scale_view;

/// An [`Api`] over `namespace`, or over the whole cluster when no namespace is given.
pub(crate) fn watched_api<K>(client: &kube::Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    }
}

/// The message of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

/// Runs `reconcile`, turning a panic into the error built by `panicked`.
pub(crate) async fn catch_panic<T, E>(
    reconcile: impl Future<Output = Result<T, E>>,
    panicked: impl FnOnce(String) -> E,
) -> Result<T, E> {
    AssertUnwindSafe(reconcile)
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(panicked(panic_message(payload.as_ref()))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_messages() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42_u8), "unknown panic");
    }

    async fn explode() -> Result<(), String> {
        panic!("boom")
    }

    #[tokio::test]
    async fn panics_become_errors() {
        let result = catch_panic(explode(), |message| message).await;
        assert_eq!(result, Err("boom".to_owned()));

        let result: Result<u8, String> = catch_panic(async { Ok(1) }, |message| message).await;
        assert_eq!(result, Ok(1));
    }
}
