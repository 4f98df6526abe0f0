//! Building blocks for reconciliation loops written as workflows of small actions.
//!
//! A [`Workflow`] is a tree of named [`Action`]s glued together by combinators such as
//! [`sequential`], [`parallel_join`] or [`retry`]. Every action produces an [`Outcome`] that
//! tells the surrounding combinator whether to carry on, and eventually tells the controller
//! whether and when to requeue the object.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use ctrlkit::{Outcome, action, parallel_join, sequential, timeout};
//!
//! # #[derive(Debug, snafu::Snafu)] struct Error;
//! # async fn example() -> Result<(), ctrlkit::Error> {
//! let sync = action("SyncConfig", || async { Ok::<_, Error>(Outcome::CONTINUE) });
//! let wait = action("WaitReady", || async {
//!     Ok::<_, Error>(Outcome::requeue_after(Duration::from_secs(1)))
//! });
//!
//! let workflow = sequential([sync, timeout(Duration::from_secs(1), parallel_join([wait]))]);
//! let outcome = workflow.optimize().run().await?;
//! # Ok(())
//! # }
//! ```

mod action;
mod error;
mod hook;
mod optimize;
mod outcome;
mod workflow;

pub use action::{Action, FnAction, HookedAction};
pub use error::{BoxError, Error, Result};
pub use hook::{ActionHook, ActionHooks};
pub use outcome::Outcome;
pub use workflow::{
    JoinMode, Workflow, action, hooked_action, if_else, join, nop, ordered_join, parallel_join,
    retry, sequential, shared, timeout, when,
};
