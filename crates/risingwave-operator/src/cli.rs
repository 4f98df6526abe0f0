//! Command line of the operator.

use std::{io::Write, path::PathBuf, sync::Arc};

use clap::{Args, Parser};
use kube::CustomResourceExt;
use snafu::{ResultExt, Snafu};

use crate::{
    consts::META_MEMBER_RPC_TIMEOUT,
    controller::{compute_update_strategy, meta_role_labeler, risingwave, scale_view},
    crd::{RisingWave, scale_view::RisingWaveScaleView},
    meta_member::GrpcMetaMemberClient,
    utils::signal::{SignalError, SignalWatcher},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to serialize the CRDs"))]
    SerializeCrd { source: serde_yaml::Error },

    #[snafu(display("failed to write the CRDs"))]
    WriteCrd { source: std::io::Error },

    #[snafu(display("failed to read the config template {}", path.display()))]
    ReadConfigTemplate {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to create the Kubernetes client"))]
    CreateClient { source: kube::Error },

    #[snafu(display("failed to watch for shutdown signals"))]
    InstallSignalHandler { source: SignalError },
}

#[derive(Debug, PartialEq, Eq, Parser)]
#[command(author, version, about)]
pub enum Command {
    /// Print the CRDs served by the operator.
    Crd,

    /// Run the operator.
    Run(RunArguments),
}

#[derive(Debug, PartialEq, Eq, Args)]
pub struct RunArguments {
    /// Namespace to watch, all namespaces when empty.
    #[arg(long, env, default_value = "")]
    pub watch_namespace: String,

    /// Version stamped on the rendered objects.
    #[arg(long, env, default_value = env!("CARGO_PKG_VERSION"))]
    pub operator_version: String,

    /// Recreate children that cannot be patched and were rendered by another operator version.
    #[arg(long, env)]
    pub force_update: bool,

    /// TOML file whose content ends up in the config map of each RisingWave.
    #[arg(long, env = "RISINGWAVE_CONFIG_TEMPLATE", value_name = "FILE")]
    pub config_template: Option<PathBuf>,

    #[arg(long, env)]
    pub disable_compute_update_strategy: bool,

    #[arg(long, env)]
    pub disable_meta_role_labeler: bool,

    /// Concurrent reconciles per controller.
    #[arg(long, env, default_value_t = 64)]
    pub max_concurrent_reconciles: u16,
}

impl RunArguments {
    fn watch_namespace(&self) -> Option<&str> {
        Some(self.watch_namespace.as_str()).filter(|namespace| !namespace.is_empty())
    }
}

/// Writes the CRDs as a multi-document YAML stream.
pub fn write_crds(mut writer: impl Write) -> Result<(), Error> {
    for crd in [RisingWave::crd(), RisingWaveScaleView::crd()] {
        let yaml = serde_yaml::to_string(&crd).context(SerializeCrdSnafu)?;
        writeln!(writer, "---\n{}", yaml.trim_end()).context(WriteCrdSnafu)?;
    }
    Ok(())
}

async fn read_config_template(path: Option<&PathBuf>) -> Result<Arc<str>, Error> {
    match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .map(Arc::from)
            .context(ReadConfigTemplateSnafu { path }),
        None => Ok(Arc::from("")),
    }
}

/// Starts every enabled controller and waits until all of them shut down.
pub async fn run(args: RunArguments) -> Result<(), Error> {
    let config_template = read_config_template(args.config_template.as_ref()).await?;
    let client = kube::Client::try_default().await.context(CreateClientSnafu)?;
    let signals = SignalWatcher::install().context(InstallSignalHandlerSnafu)?;
    let namespace = args.watch_namespace();
    let concurrency = args.max_concurrent_reconciles;

    tracing::info!(
        operator_version = args.operator_version,
        watch_namespace = namespace.unwrap_or("<all>"),
        force_update = args.force_update,
        concurrency,
        "starting controllers"
    );

    let risingwave = risingwave::run(
        Arc::new(risingwave::Context::new(
            client.clone(),
            args.operator_version.as_str(),
            args.force_update,
            config_template,
        )),
        namespace,
        concurrency,
        signals.handle(),
    );
    let scale_view = scale_view::run(
        Arc::new(scale_view::Context::new(client.clone())),
        namespace,
        concurrency,
        signals.handle(),
    );
    let compute_update_strategy = async {
        if args.disable_compute_update_strategy {
            tracing::info!("the compute update strategy is disabled");
            return;
        }
        compute_update_strategy::run(
            Arc::new(compute_update_strategy::Context::new(client.clone())),
            namespace,
            concurrency,
            signals.handle(),
        )
        .await;
    };
    let meta_role_labeler = async {
        if args.disable_meta_role_labeler {
            tracing::info!("the meta role labeler is disabled");
            return;
        }
        let members = Arc::new(GrpcMetaMemberClient::new(META_MEMBER_RPC_TIMEOUT));
        meta_role_labeler::run(
            Arc::new(meta_role_labeler::Context::new(client.clone(), members)),
            namespace,
            concurrency,
            signals.handle(),
        )
        .await;
    };

    futures::join!(risingwave, scale_view, compute_update_strategy, meta_role_labeler);
    tracing::info!("all controllers stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use rstest::rstest;

    use super::*;

    #[test]
    fn verify_cli() {
        Command::command().debug_assert();
    }

    #[rstest]
    #[case(&["risingwave-operator", "run"], None, 64)]
    #[case(
        &[
            "risingwave-operator",
            "run",
            "--watch-namespace",
            "rw",
            "--max-concurrent-reconciles",
            "8"
        ],
        Some("rw"),
        8
    )]
    fn run_arguments(
        #[case] argv: &[&str],
        #[case] namespace: Option<&str>,
        #[case] concurrency: u16,
    ) {
        let Command::Run(args) = Command::try_parse_from(argv).unwrap() else {
            panic!("expected the run command");
        };
        assert_eq!(args.watch_namespace(), namespace);
        assert_eq!(args.max_concurrent_reconciles, concurrency);
        assert!(!args.disable_meta_role_labeler);
    }

    #[test]
    fn crds_are_printed() {
        let mut out = Vec::new();
        write_crds(&mut out).unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(out.contains("name: risingwaves.risingwave.risingwavelabs.com"));
        assert!(out.contains("name: risingwavescaleviews.risingwave.risingwavelabs.com"));
        assert_eq!(out.matches("---\n").count(), 2);
    }

    #[tokio::test]
    async fn missing_template_is_empty() {
        assert_eq!(&*read_config_template(None).await.unwrap(), "");
    }
}
