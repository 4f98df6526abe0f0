use clap::Parser;
use risingwave_operator::{
    cli::{self, Command},
    logging::initialize_logging,
};
use snafu::{ResultExt, Snafu};

const APP_NAME: &str = "risingwave-operator";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to initialize logging"))]
    Logging {
        source: risingwave_operator::logging::Error,
    },

    #[snafu(display("failed to print the CRDs"))]
    PrintCrds { source: cli::Error },

    #[snafu(display("the operator failed"))]
    Run { source: cli::Error },
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), Error> {
    match Command::parse() {
        Command::Crd => cli::write_crds(std::io::stdout().lock()).context(PrintCrdsSnafu),
        Command::Run(args) => {
            initialize_logging("RISINGWAVE_OPERATOR_LOG", APP_NAME).context(LoggingSnafu)?;
            cli::run(args).await.context(RunSnafu)
        }
    }
}
