mod simulator;

use anyhow::Result;
use clap::Parser;
use shared::broker::Broker;
use tracing::info;

#[derive(Parser)]
#[command(name = "delivery-service")]
struct Args {
    #[arg(long, env = "KAFKA_BROKERS", default_value = "localhost:9092")]
    kafka_brokers: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let broker = Broker::new(&args.kafka_brokers);
    let simulator = simulator::DeliverySimulator::new(broker);

    info!("Delivery service started");
    simulator.run().await
}
