use anyhow::Result;
use clap::ArgMatches;
use tokio_util::sync::CancellationToken;

use maillist::{Config, Session};

pub fn cmd() -> clap::Command {
    clap::Command::new("run")
        .display_order(1)
        .about("Run the scheduler, expanding and delivering campaigns until interrupted")
}

pub async fn run(_matches: &ArgMatches, config: Config, cancel: CancellationToken) -> Result<()> {
    let session = Session::open(config)?;

    // Wait for either ctrl_c signal or cancellation from elsewhere
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("initiating graceful shutdown");
            cancel.cancel();
        },
        _ = cancel.cancelled() => {},
    }

    session.close().await?;

    Ok(())
}
