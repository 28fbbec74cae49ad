mod cli;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hx_core::services::deploy::Deployer;
use hx_core::services::ports::PortAllocator;
use hx_core::services::registry::Registry;
use hx_core::services::{control, shutdown};
use hx_core::HaxigonError;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let _guard = setup_logging(cli.verbose, cli.log_file.as_deref());

    let config = cli.resolve_config()?;
    info!(
        listen = %config.listen,
        repo = %config.repo_root.display(),
        bin = %config.bin_root.display(),
        port_base = config.port_base,
        grace_secs = config.grace_period.as_secs(),
        "configuration loaded"
    );

    let listener = TcpListener::bind(config.listen.as_str()).await.map_err(|e| {
        HaxigonError::Config(format!("could not listen on \"{}\": {e}", config.listen))
    })?;
    info!(addr = %listener.local_addr()?, "Waiting for connections...");

    let registry = Arc::new(Registry::new(
        PortAllocator::new(config.port_base),
        config.grace_period,
    ));
    let deployer = Arc::new(Deployer::new(&config, registry.clone()));

    let tracker = TaskTracker::new();
    let cancel = CancellationToken::new();
    shutdown::run_until(
        control::serve(listener, deployer, tracker.clone(), cancel.clone()),
        shutdown::wait_for_signal(),
        &registry,
        &tracker,
        &cancel,
    )
    .await;

    info!("haxigon stopped");
    Ok(())
}

/// Log to stderr, or to `log_file` through a non-blocking appender.
/// The returned guard must be held for the duration of the program.
fn setup_logging(
    verbose: bool,
    log_file: Option<&Path>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let file_name = path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "haxigon.log".into());
            let file_appender = tracing_appender::rolling::never(directory, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            tracing_subscriber::fmt()
                .with_writer(non_blocking)
                .with_env_filter(filter)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
            None
        }
    }
}
