//! A Kubernetes operator for RisingWave clusters.
//!
//! The [`controller::risingwave`] controller renders the children of each `RisingWave` through
//! the [`factory`] and drives the cluster through its lifecycle. Scale views, the rolling update
//! of compute nodes and the meta role labels each have a controller of their own.

pub mod cli;
pub mod client;
pub mod consts;
pub mod controller;
pub mod crd;
pub mod event;
pub mod factory;
pub mod logging;
pub mod manager;
pub mod meta_member;
pub mod object;
pub mod scaleview;
pub mod utils;
