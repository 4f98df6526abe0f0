use std::path::PathBuf;

use snafu::{ResultExt, Snafu};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

pub mod controller;
mod k8s_events;

pub use self::k8s_events::{publish_event, truncate_with_ellipsis};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to parse the default log filter"))]
    DefaultFilter {
        source: tracing_subscriber::filter::ParseError,
    },

    #[snafu(display("failed to create the log file appender in {}", directory.display()))]
    FileAppender {
        source: tracing_appender::rolling::InitError,
        directory: PathBuf,
    },

    #[snafu(display("failed to install the global subscriber"))]
    InstallSubscriber {
        source: tracing_subscriber::util::TryInitError,
    },
}

/// Installs the global `tracing` subscriber.
///
/// The filter is read from the environment variable `env` (e.g. `RISINGWAVE_OPERATOR_LOG`) and
/// falls back to INFO. Setting `{env}_DIRECTORY` additionally writes JSON lines into hourly
/// rotated files under that directory.
pub fn initialize_logging(env: &str, app_name: &str) -> Result<(), Error> {
    let filter = match EnvFilter::try_from_env(env) {
        Ok(env_filter) => env_filter,
        Err(_) => EnvFilter::try_new(tracing::Level::INFO.to_string()).context(DefaultFilterSnafu)?,
    };

    let log_directory = std::env::var_os(format!("{env}_DIRECTORY")).map(PathBuf::from);
    let file = log_directory
        .as_deref()
        .map(|directory| {
            RollingFileAppender::builder()
                .rotation(Rotation::HOURLY)
                .filename_suffix(format!("{app_name}.log"))
                .max_log_files(6)
                .build(directory)
                .context(FileAppenderSnafu { directory })
        })
        .transpose()?
        .map(|appender| tracing_subscriber::fmt::layer().json().with_writer(appender));

    Registry::default()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
        .with(file)
        .try_init()
        .context(InstallSubscriberSnafu)?;

    // Only now there is somewhere to log to.
    match log_directory {
        Some(directory) => tracing::info!(directory = %directory.display(), "file logging enabled"),
        None => tracing::debug!("file logging disabled, no log directory set"),
    }
    Ok(())
}
