use std::{
    collections::HashMap,
    fmt,
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::{FutureExt, future::BoxFuture};
use rand::seq::SliceRandom;
use tokio::sync::OnceCell;
use tracing::Instrument;

use crate::{
    action::{Action, FnAction, HookedAction},
    error::{Error, Result},
    hook::ActionHooks,
    outcome::Outcome,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinMode {
    /// One after another in a random order.
    Unordered,
    /// One after another in declaration order.
    Ordered,
    /// Concurrently.
    Parallel,
}

impl JoinMode {
    fn name(self) -> &'static str {
        match self {
            Self::Unordered => "Join",
            Self::Ordered => "OrderedJoin",
            Self::Parallel => "ParallelJoin",
        }
    }
}

/// A composable program of actions.
///
/// Workflows are plain values: the combinators below return new workflows and nothing runs until
/// [`Workflow::run`] is awaited. Clones of a [`Workflow::Shared`] node keep their identity, so a
/// shared sub-workflow referenced from several branches executes at most once per run.
#[derive(Clone)]
pub enum Workflow {
    Nop,
    Action(Arc<dyn Action>),
    Sequential(Vec<Workflow>),
    Join(JoinMode, Vec<Workflow>),
    Shared(Arc<Workflow>),
    Retry {
        limit: usize,
        interval: Duration,
        inner: Box<Workflow>,
    },
    Timeout {
        timeout: Duration,
        inner: Box<Workflow>,
    },
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(f: &mut fmt::Formatter<'_>, name: &str, children: &[Workflow]) -> fmt::Result {
            write!(f, "{name}(")?;
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{child}")?;
            }
            f.write_str(")")
        }

        match self {
            Self::Nop => f.write_str("Nop"),
            Self::Action(action) => f.write_str(action.name()),
            Self::Sequential(children) => list(f, "Sequential", children),
            Self::Join(mode, children) => list(f, mode.name(), children),
            Self::Shared(inner) => write!(f, "Shared({inner})"),
            Self::Retry { limit, inner, .. } => write!(f, "Retry({inner}, limit={limit})"),
            Self::Timeout { timeout, inner } => write!(f, "Timeout({inner}, timeout={timeout:?})"),
        }
    }
}

/// A leaf workflow running `f` under `name`.
pub fn action<F, Fut, E>(name: impl Into<String>, f: F) -> Workflow
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Outcome, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    Workflow::Action(Arc::new(FnAction::new(name, f)))
}

/// Like [`action`], with `hooks` run around every execution.
pub fn hooked_action<F, Fut, E>(name: impl Into<String>, hooks: &Arc<ActionHooks>, f: F) -> Workflow
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Outcome, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let inner: Arc<dyn Action> = Arc::new(FnAction::new(name, f));
    if hooks.is_empty() {
        return Workflow::Action(inner);
    }
    Workflow::Action(Arc::new(HookedAction::new(inner, hooks.clone())))
}

pub fn nop() -> Workflow {
    Workflow::Nop
}

pub fn sequential(children: impl IntoIterator<Item = Workflow>) -> Workflow {
    Workflow::Sequential(children.into_iter().collect())
}

pub fn join(children: impl IntoIterator<Item = Workflow>) -> Workflow {
    Workflow::Join(JoinMode::Unordered, children.into_iter().collect())
}

pub fn ordered_join(children: impl IntoIterator<Item = Workflow>) -> Workflow {
    Workflow::Join(JoinMode::Ordered, children.into_iter().collect())
}

pub fn parallel_join(children: impl IntoIterator<Item = Workflow>) -> Workflow {
    Workflow::Join(JoinMode::Parallel, children.into_iter().collect())
}

/// Chooses `then` when `condition` holds while the workflow is built.
pub fn when(condition: bool, then: Workflow) -> Workflow {
    if condition { then } else { Workflow::Nop }
}

pub fn if_else(condition: bool, then: Workflow, otherwise: Workflow) -> Workflow {
    if condition { then } else { otherwise }
}

pub fn shared(inner: Workflow) -> Workflow {
    match inner {
        already @ Workflow::Shared(_) => already,
        inner => Workflow::Shared(Arc::new(inner)),
    }
}

/// Reruns `inner` on error, at most `limit` more times, waiting `interval` in between.
pub fn retry(limit: usize, interval: Duration, inner: Workflow) -> Workflow {
    Workflow::Retry {
        limit,
        interval,
        inner: Box::new(inner),
    }
}

pub fn timeout(timeout: Duration, inner: Workflow) -> Workflow {
    Workflow::Timeout {
        timeout,
        inner: Box::new(inner),
    }
}

type SharedResult = std::result::Result<Outcome, Arc<Error>>;

/// State of a single workflow run.
#[derive(Default)]
struct Pass {
    shared: Mutex<HashMap<usize, Arc<OnceCell<SharedResult>>>>,
}

impl Pass {
    fn shared_cell(&self, inner: &Arc<Workflow>) -> Arc<OnceCell<SharedResult>> {
        let key = Arc::as_ptr(inner) as usize;
        let mut cells = self
            .shared
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        cells.entry(key).or_default().clone()
    }
}

fn join_results(results: impl IntoIterator<Item = Result<Outcome>>) -> Result<Outcome> {
    let mut outcome = Outcome::CONTINUE;
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(o) => outcome = outcome.join(o),
            Err(err) => errors.push(err),
        }
    }

    match errors.pop() {
        None => Ok(outcome),
        Some(err) if errors.is_empty() => Err(err),
        Some(err) => {
            errors.push(err);
            Err(Error::Joined { errors })
        }
    }
}

impl Workflow {
    /// Runs the workflow to completion.
    pub async fn run(&self) -> Result<Outcome> {
        let pass = Pass::default();
        self.execute(&pass).await
    }

    pub fn is_nop(&self) -> bool {
        matches!(self, Self::Nop)
    }

    fn execute<'a>(&'a self, pass: &'a Pass) -> BoxFuture<'a, Result<Outcome>> {
        async move {
            match self {
                Self::Nop => Ok(Outcome::CONTINUE),
                Self::Action(action) => {
                    let span = tracing::debug_span!("action", name = action.name());
                    let result = action.run().instrument(span).await;
                    match &result {
                        Ok(outcome) => {
                            tracing::debug!(action = action.name(), ?outcome, "action finished");
                        }
                        Err(err) => tracing::debug!(
                            action = action.name(),
                            error = err as &dyn std::error::Error,
                            "action failed"
                        ),
                    }
                    result
                }
                Self::Sequential(children) => {
                    for child in children {
                        let outcome = child.execute(pass).await?;
                        if outcome.halts() {
                            return Ok(outcome);
                        }
                    }
                    Ok(Outcome::CONTINUE)
                }
                Self::Join(JoinMode::Parallel, children) => {
                    let results =
                        futures::future::join_all(children.iter().map(|c| c.execute(pass))).await;
                    join_results(results)
                }
                Self::Join(mode, children) => {
                    let mut order: Vec<&Workflow> = children.iter().collect();
                    if *mode == JoinMode::Unordered {
                        order.shuffle(&mut rand::rng());
                    }

                    let mut results = Vec::with_capacity(order.len());
                    for child in order {
                        results.push(child.execute(pass).await);
                    }
                    join_results(results)
                }
                Self::Shared(inner) => {
                    let cell = pass.shared_cell(inner);
                    let result = cell
                        .get_or_init(|| async { inner.execute(pass).await.map_err(Arc::new) })
                        .await;
                    result.clone().map_err(Error::from)
                }
                Self::Retry {
                    limit,
                    interval,
                    inner,
                } => {
                    let mut attempt = 0;
                    loop {
                        match inner.execute(pass).await {
                            Err(err) if attempt < *limit => {
                                attempt += 1;
                                tracing::debug!(
                                    workflow = %inner,
                                    attempt,
                                    error = &err as &dyn std::error::Error,
                                    "retrying failed workflow"
                                );
                                if !interval.is_zero() {
                                    tokio::time::sleep(*interval).await;
                                }
                            }
                            result => return result,
                        }
                    }
                }
                Self::Timeout { timeout, inner } => {
                    match tokio::time::timeout(*timeout, inner.execute(pass)).await {
                        Ok(result) => result,
                        Err(_) => Err(Error::TimedOut {
                            action: inner.to_string(),
                            timeout: *timeout,
                        }),
                    }
                }
            }
        }
        .boxed()
    }
}
