use std::{collections::HashMap, sync::Arc};

use crate::workflow::Workflow;

impl Workflow {
    /// Returns an equivalent workflow with no-ops folded away and nested identical combinators
    /// collapsed.
    ///
    /// Shared nodes stay shared: every reference to the same node is rewritten to the same
    /// optimized node.
    pub fn optimize(self) -> Self {
        Optimizer::default().optimize(self)
    }
}

#[derive(Default)]
struct Optimizer {
    shared: HashMap<usize, Arc<Workflow>>,
}

impl Optimizer {
    fn optimize(&mut self, workflow: Workflow) -> Workflow {
        match workflow {
            Workflow::Nop | Workflow::Action(_) => workflow,
            Workflow::Sequential(children) => {
                let mut flat = Vec::with_capacity(children.len());
                for child in children {
                    match self.optimize(child) {
                        Workflow::Nop => {}
                        Workflow::Sequential(grandchildren) => flat.extend(grandchildren),
                        other => flat.push(other),
                    }
                }
                collapse(flat, Workflow::Sequential)
            }
            Workflow::Join(mode, children) => {
                let mut flat = Vec::with_capacity(children.len());
                for child in children {
                    match self.optimize(child) {
                        Workflow::Nop => {}
                        Workflow::Join(inner_mode, grandchildren) if inner_mode == mode => {
                            flat.extend(grandchildren);
                        }
                        other => flat.push(other),
                    }
                }
                collapse(flat, |children| Workflow::Join(mode, children))
            }
            Workflow::Shared(inner) => {
                let key = Arc::as_ptr(&inner) as usize;
                if let Some(done) = self.shared.get(&key) {
                    return Workflow::Shared(done.clone());
                }

                let optimized = match self.optimize(Arc::unwrap_or_clone(inner)) {
                    Workflow::Nop => return Workflow::Nop,
                    Workflow::Shared(already) => already,
                    other => Arc::new(other),
                };
                self.shared.insert(key, optimized.clone());
                Workflow::Shared(optimized)
            }
            Workflow::Retry {
                limit,
                interval,
                inner,
            } => match self.optimize(*inner) {
                Workflow::Nop => Workflow::Nop,
                inner => Workflow::Retry {
                    limit,
                    interval,
                    inner: Box::new(inner),
                },
            },
            Workflow::Timeout { timeout, inner } => match self.optimize(*inner) {
                Workflow::Nop => Workflow::Nop,
                Workflow::Timeout {
                    timeout: inner_timeout,
                    inner,
                } => Workflow::Timeout {
                    timeout: timeout.min(inner_timeout),
                    inner,
                },
                inner => Workflow::Timeout {
                    timeout,
                    inner: Box::new(inner),
                },
            },
        }
    }
}

fn collapse(
    mut children: Vec<Workflow>,
    group: impl FnOnce(Vec<Workflow>) -> Workflow,
) -> Workflow {
    match children.len() {
        0 => Workflow::Nop,
        1 => children.pop().unwrap_or(Workflow::Nop),
        _ => group(children),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use rstest::rstest;
    use snafu::Snafu;

    use super::*;
    use crate::{outcome::Outcome, workflow::*};

    #[derive(Debug, Snafu)]
    struct Never;

    fn leaf(name: &'static str) -> Workflow {
        action(name, || async { Ok::<_, Never>(Outcome::CONTINUE) })
    }

    #[rstest]
    #[case(sequential([]), "Nop")]
    #[case(sequential([nop(), nop()]), "Nop")]
    #[case(sequential([leaf("A"), nop()]), "A")]
    #[case(sequential([leaf("A"), sequential([leaf("B"), leaf("C")])]), "Sequential(A, B, C)")]
    #[case(join([nop(), leaf("A"), nop()]), "A")]
    #[case(
        parallel_join([leaf("A"), parallel_join([leaf("B"), leaf("C")])]),
        "ParallelJoin(A, B, C)"
    )]
    #[case(
        parallel_join([leaf("A"), ordered_join([leaf("B"), leaf("C")])]),
        "ParallelJoin(A, OrderedJoin(B, C))"
    )]
    #[case(shared(nop()), "Nop")]
    #[case(retry(3, Duration::ZERO, sequential([nop()])), "Nop")]
    #[case(
        timeout(Duration::from_secs(5), timeout(Duration::from_secs(1), leaf("A"))),
        "Timeout(A, timeout=1s)"
    )]
    #[case(
        timeout(Duration::from_secs(1), timeout(Duration::from_secs(5), leaf("A"))),
        "Timeout(A, timeout=1s)"
    )]
    #[case(shared(shared(leaf("A"))), "Shared(A)")]
    fn optimize(#[case] workflow: Workflow, #[case] expected: &str) {
        assert_eq!(workflow.optimize().to_string(), expected);
    }

    #[tokio::test]
    async fn optimized_shared_nodes_keep_identity() {
        let counter = Arc::new(AtomicUsize::new(0));
        let once = {
            let counter = counter.clone();
            shared(sequential([
                nop(),
                action("Count", move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, Never>(Outcome::CONTINUE)
                    }
                }),
            ]))
        };

        let workflow = join([once.clone(), sequential([once.clone(), leaf("A")])]).optimize();
        workflow.run().await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
