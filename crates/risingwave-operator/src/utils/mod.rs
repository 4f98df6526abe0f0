pub mod env;
pub mod k8s;
#[cfg(test)]
pub(crate) mod mock_client;
pub mod signal;
