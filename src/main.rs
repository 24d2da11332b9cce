//! Binary entry point for the Stend CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8Path;
use clap::Parser;
use thiserror::Error;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use stend::{
    CancellationToken, ComputeError, ComputeGateway, ConfigError, LabConfig, LabError, LabFailure,
    LabOrchestrator, Operation, RemoteShell, ShellError, Status,
};

mod cli;

use cli::{Cli, LabArgs};

const LOG_ENV: &str = "STEND_LOG";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("gateway error: {0}")]
    Gateway(#[from] ComputeError),
    #[error("ssh error: {0}")]
    Shell(#[from] ShellError),
    #[error("{operation} failed: {source}")]
    Lab {
        operation: Operation,
        #[source]
        source: LabError<ComputeError>,
    },
    #[error("failed to render status: {0}")]
    Render(#[from] serde_json::Error),
    #[error("failed to write status: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init()
        .ok();
}

fn split(cli: Cli) -> (Operation, LabArgs) {
    match cli {
        Cli::Create(args) => (Operation::Create, args),
        Cli::Reset(args) => (Operation::Reset, args),
        Cli::Stop(args) => (Operation::Stop, args),
        Cli::Teardown(args) => (Operation::Teardown, args),
    }
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let (operation, args) = split(cli);
    let config = LabConfig::resolve(args.config.as_deref().map(Utf8Path::new))?;
    let lab = config.lab_spec(args.instance_name.as_deref(), args.create_custom_image)?;
    let gateway = ComputeGateway::new(config.compute_settings())?;
    let shell = RemoteShell::with_process_runner(config.shell_config())?;

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());
    let orchestrator = LabOrchestrator::new(lab, gateway, shell)
        .with_timings(config.timings())
        .with_cancellation(cancel);

    match orchestrator.run(operation).await {
        Ok(status) => print_status(&status),
        Err(LabFailure { status, error }) => {
            print_status(&status)?;
            Err(CliError::Lab {
                operation,
                source: error,
            })
        }
    }
}

fn cancel_on_interrupt(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling after the current step");
            cancel.cancel();
        }
    });
}

fn print_status(status: &Status) -> Result<(), CliError> {
    write_status(io::stdout(), status)
}

fn write_status(mut target: impl Write, status: &Status) -> Result<(), CliError> {
    let json = status.to_json()?;
    writeln!(target, "{json}")?;
    target.flush()?;
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
