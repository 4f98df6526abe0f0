use std::time::Duration;

/// What a finished action asks of the surrounding workflow and, eventually, of the controller.
///
/// `Continue` and `NoRequeue` are the same value: nothing is left to do. An outcome halts a
/// [`Sequential`](crate::Workflow::Sequential) workflow when it exits or asks for a requeue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    requeue: bool,
    requeue_after: Option<Duration>,
    exit: bool,
}

impl Outcome {
    /// Proceed with the next action.
    pub const CONTINUE: Self = Self {
        requeue: false,
        requeue_after: None,
        exit: false,
    };
    /// Abort the current branch without an error.
    pub const EXIT: Self = Self {
        requeue: false,
        requeue_after: None,
        exit: true,
    };
    /// Alias of [`Outcome::CONTINUE`], used where the intent is "done, nothing to retry".
    pub const NO_REQUEUE: Self = Self::CONTINUE;
    /// Requeue the object immediately.
    pub const REQUEUE: Self = Self {
        requeue: true,
        requeue_after: None,
        exit: false,
    };

    /// Requeue the object after `delay`. A zero delay is an immediate requeue.
    pub fn requeue_after(delay: Duration) -> Self {
        if delay.is_zero() {
            return Self::REQUEUE;
        }

        Self {
            requeue: false,
            requeue_after: Some(delay),
            exit: false,
        }
    }

    /// [`Outcome::EXIT`] when `condition` holds, [`Outcome::CONTINUE`] otherwise.
    pub fn exit_if(condition: bool) -> Self {
        if condition { Self::EXIT } else { Self::CONTINUE }
    }

    pub fn is_exit(&self) -> bool {
        self.exit
    }

    /// Whether a [`Sequential`](crate::Workflow::Sequential) workflow stops after this outcome.
    pub fn halts(&self) -> bool {
        self.exit || self.requeue || self.requeue_after.is_some()
    }

    /// The delay after which the object should be reconciled again, if any.
    pub fn requeue_delay(&self) -> Option<Duration> {
        if self.requeue {
            Some(Duration::ZERO)
        } else {
            self.requeue_after
        }
    }

    /// Drops the exit marker, keeping any requeue request.
    pub fn ignore_exit(self) -> Self {
        Self {
            exit: false,
            ..self
        }
    }

    /// Combines the outcomes of two joined branches.
    ///
    /// Immediate requeues and exits are sticky, delayed requeues take the shortest delay.
    pub fn join(self, other: Self) -> Self {
        let requeue_after = match (self.requeue_after, other.requeue_after) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        Self {
            requeue: self.requeue || other.requeue,
            requeue_after,
            exit: self.exit || other.exit,
        }
    }
}
