//!
//! fanout-relayd
//!

#![warn(clippy::pedantic)]

use fanout_relay::config::Config;
use fanout_relay::engine::Engine;
use fanout_relay::{bootstrap, logging, server};
use tokio::signal::unix::{signal, SignalKind};
use tracing::error;

fn main() -> fanout_relay::Result<()> {
    let config = Config::parse();
    config.validate()?;

    if config.daemon {
        bootstrap::daemonize(config.pidfile.as_deref())?;
    }

    logging::init(config.debug_level, config.logfile.as_deref(), config.max_logfile_size)?;

    run(config)
}

#[tokio::main]
async fn run(config: Config) -> fanout_relay::Result<()> {
    let budget = bootstrap::compute_rlimit_budget(config.client_limit)?;

    let listeners = bootstrap::bind_dual_stack(config.port).await?;

    if let Some(run_as) = &config.run_as {
        bootstrap::drop_privileges(&run_as.user, run_as.group.as_deref())?;
    }

    let engine = Engine::new(budget.implicit_client_limit, budget.soft, budget.hard);

    server::run(listeners, engine, wait_for_shutdown_signal()).await;

    Ok(())
}

/// Resolve on the first of `SIGINT` or `SIGTERM`, whichever arrives first.
async fn wait_for_shutdown_signal() {
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(sig) => sig,
        Err(err) => {
            error!(cause = %err, "failed to install SIGINT handler");
            return;
        }
    };
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(err) => {
            error!(cause = %err, "failed to install SIGTERM handler");
            return;
        }
    };

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}
