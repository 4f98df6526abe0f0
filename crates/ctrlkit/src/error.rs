use std::{fmt::Write, sync::Arc, time::Duration};

use snafu::Snafu;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("action {action:?} failed"))]
    ActionFailed { action: String, source: BoxError },

    #[snafu(display("{action} timed out after {timeout:?}"))]
    TimedOut { action: String, timeout: Duration },

    #[snafu(display("{}", describe_all(errors)))]
    Joined { errors: Vec<Error> },

    #[snafu(transparent)]
    Shared { source: Arc<Error> },
}

impl Error {
    /// Flattens joined errors into the individual failures.
    pub fn failures(&self) -> Vec<&Error> {
        match self {
            Self::Joined { errors } => errors.iter().flat_map(Self::failures).collect(),
            Self::Shared { source } => source.failures(),
            other => vec![other],
        }
    }
}

fn describe_all(errors: &[Error]) -> String {
    let mut buf = format!("{} joined actions failed", errors.len());
    for err in errors {
        let _ = write!(buf, "; {}", chain(err));
    }
    buf
}

fn chain(err: &dyn std::error::Error) -> String {
    let mut buf = err.to_string();
    let mut current = err.source();
    while let Some(source) = current {
        let _ = write!(buf, ": {source}");
        current = source.source();
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Snafu)]
    #[snafu(display("boom"))]
    struct Boom;

    #[test]
    fn joined_message_contains_every_cause() {
        let err = Error::Joined {
            errors: vec![
                Error::ActionFailed {
                    action: "A".to_owned(),
                    source: Box::new(Boom),
                },
                Error::TimedOut {
                    action: "B".to_owned(),
                    timeout: Duration::from_secs(1),
                },
            ],
        };

        assert_eq!(
            err.to_string(),
            "2 joined actions failed; action \"A\" failed: boom; B timed out after 1s"
        );
        assert_eq!(err.failures().len(), 2);
    }
}
