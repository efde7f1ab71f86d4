#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use core::time::Duration;
use relay::{Dispatcher, ShutdownReport};
use server::config::{CliArgs, ServerConfig};
use server::handler::HostsHandler;
use server::hosts::DirectoryHosts;
use server::telemetry::init_telemetry;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// How often the acceptor's liveness is checked while waiting for a signal.
const ACCEPTOR_CHECK_INTERVAL: Duration = Duration::from_secs(1);

fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    init_telemetry()?;

    let hosts = DirectoryHosts::open(&config.content_root).map_err(|e| {
        anyhow::anyhow!(
            "cannot open content root {}: {e}",
            config.content_root.display()
        )
    })?;
    let handler = HostsHandler::new(hosts.clone()).with_read_timeout(config.read_timeout);

    let dispatcher = Dispatcher::with_config(handler, config.bind_addr, config.dispatch.clone())?;
    dispatcher.listen()?;
    log_startup_info(&dispatcher, &hosts, &config);

    // The dispatcher runs on its own threads; the runtime only waits for a
    // signal or for the acceptor to die.
    let acceptor_died = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(async {
            tokio::select! {
                () = shutdown_signal() => false,
                () = acceptor_exit(&dispatcher) => true,
            }
        });

    if acceptor_died {
        #[cfg(feature = "tracing")]
        tracing::error!("Acceptor stopped accepting connections, shutting down");
    }

    let report = dispatcher.close()?;
    log_shutdown_report(&report);

    #[cfg(feature = "tracing")]
    {
        let stats = dispatcher.stats();
        tracing::info!(
            "Served {} of {} accepted connections ({} overloaded, {} refused, {} handler failures)",
            stats.dispatched,
            stats.accepted,
            stats.overloaded,
            stats.refused,
            stats.handler_failures
        );
    }

    if acceptor_died {
        anyhow::bail!("acceptor exited after repeated accept failures");
    }
    Ok(())
}

fn log_startup_info(_dispatcher: &Dispatcher, _hosts: &DirectoryHosts, _config: &ServerConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Serving {} on {} with full config: {:#?}",
            _hosts.root().display(),
            _dispatcher.local_addr(),
            _config
        );
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Serving {} on {} with {} workers",
            _hosts.root().display(),
            _dispatcher.local_addr(),
            _dispatcher.pool_size()
        );
    }
}

fn log_shutdown_report(_report: &ShutdownReport) {
    #[cfg(feature = "tracing")]
    {
        for component in [_report.acceptor, _report.workers] {
            tracing::info!(
                "{} {} in {:?}",
                component.name,
                component.outcome,
                component.elapsed
            );
        }
        if _report.all_stopped() {
            tracing::info!("Dispatcher shut down successfully in {:?}", _report.elapsed);
        } else {
            tracing::warn!(
                "Dispatcher shut down in {:?} with threads still running",
                _report.elapsed
            );
        }
    }
}

/// Resolves once the dispatcher's acceptor thread has left its loop.
async fn acceptor_exit(dispatcher: &Dispatcher) {
    let mut ticks = tokio::time::interval(ACCEPTOR_CHECK_INTERVAL);
    while dispatcher.is_accepting() {
        ticks.tick().await;
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to install SIGTERM handler: {_e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(_e) = signal::ctrl_c().await {
            #[cfg(feature = "tracing")]
            tracing::error!("Failed to install Ctrl+C handler: {_e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Shutdown signal received, terminating gracefully...");
}
