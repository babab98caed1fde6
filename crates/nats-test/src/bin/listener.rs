//! Joins the queue group and logs `ProductCreated` events until terminated.

use clap::Parser;
use ticketing_contracts::ProductCreated;
use ticketing_events::{Listener, ShutdownCoordinator, wait_for_signal};
use ticketing_nats_test::{ConnectArgs, Error, ListenArgs, ProductCreatedLogger, init_tracing};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    connect: ConnectArgs,

    #[command(flatten)]
    listen: ListenArgs,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();

    let args = Args::parse();
    let connection = args.connect.connect().await?;

    let listener: Listener<_, ProductCreated, _> =
        Listener::builder(connection.clone(), &args.listen.queue_group, ProductCreatedLogger)
            .options(args.listen.options())
            .build()?;
    listener.start().await?;

    let mut coordinator = ShutdownCoordinator::new(connection.clone(), args.listen.drain_timeout());
    coordinator.register(listener);

    let shutdown_token = CancellationToken::new();

    let signal_shutdown_token = shutdown_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_signal().await {
            error!(error = %e, "Failed to install signal handlers");
        }

        info!("Shutting down");
        signal_shutdown_token.cancel();
    });

    let closed_shutdown_token = shutdown_token.clone();
    let watched_connection = connection.clone();
    tokio::spawn(async move {
        watched_connection.closed().await;
        closed_shutdown_token.cancel();
    });

    coordinator.run_until(shutdown_token).await?;

    Ok(())
}
