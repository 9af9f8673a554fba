use std::{process::ExitCode, time::Duration};

use anyhow::{Context, Result, bail};
use clap::{Parser, error::ErrorKind};
use tracing::info;

use notify_irc::{
    cli::{Cli, RelayConfig},
    dispatcher::Dispatcher,
    transport,
};

/// How long shutdown waits on a stdin read still parked on a blocking thread.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<ExitCode> {
    init_tracing();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // Missing arguments print usage but are not treated as a failure.
        Err(err) if err.kind() == ErrorKind::MissingRequiredArgument => {
            let _ = err.print();
            return Ok(ExitCode::SUCCESS);
        }
        Err(err) => err.exit(),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    let result = runtime.block_on(run(cli));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    result.map(|()| ExitCode::SUCCESS)
}

async fn run(cli: Cli) -> Result<()> {
    let config = RelayConfig::from(&cli);
    if config.channel.is_empty() {
        bail!("channel name must not be empty");
    }

    let (server, writer) = transport::connect(&cli.host, cli.port, config.line_capacity).await?;

    info!(nick = %config.nick, channel = %config.channel, "relaying stdin");
    Dispatcher::new(config, server, tokio::io::stdin(), writer)
        .run_until_ctrl_c()
        .await
}
