//! Publishes one `ProductCreated` event and exits.

use clap::Parser;
use ticketing_contracts::ProductCreated;
use ticketing_nats_test::{ConnectArgs, Error, PublishArgs, init_tracing, sample_product};
use tracing::{error, info};

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    connect: ConnectArgs,

    #[command(flatten)]
    publish: PublishArgs,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();

    let args = Args::parse();
    let connection = args.connect.connect().await?;

    let publisher = connection.publisher_with_options::<ProductCreated>(args.publish.options())?;

    match publisher.publish(&sample_product()).await {
        Ok(ack) => info!(sequence = ack.sequence, "Event published"),
        Err(e) => error!(error = %e, "Failed to publish event"),
    }

    connection.close().await?;

    Ok(())
}
