use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use beacon::communicator::Communicator;
use beacon::config::{BrokerConfig, CommunicatorOptions};
use beacon::role::{Consumer, Producer, RoleBehavior};
use beacon::sink::FileSink;
use beacon::telemetry;
use beacon_core::{
    Rendezvous, Topic, TopicScheme, DEFAULT_RECORD_SEPARATOR, DEFAULT_TOPIC_PREFIX,
};
use clap::{Args, Parser, Subcommand};
use tracing::info;

const DEFAULT_OUTPUT_PATH: &str = "./addr_port_ngrok.txt";

#[derive(Debug, Parser)]
#[command(
    name = "beacon",
    author,
    version,
    about = "Exchange a tunnel endpoint between two machines through an MQTT broker"
)]
struct Cli {
    #[command(flatten)]
    broker: BrokerArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct BrokerArgs {
    /// Broker hostname. The connection always uses TLS.
    #[arg(long, env = "BEACON_BROKER_HOST")]
    broker_host: String,

    /// Broker TLS port.
    #[arg(long, env = "BEACON_BROKER_PORT", default_value_t = 8883)]
    broker_port: u16,

    #[arg(long, env = "BEACON_BROKER_USERNAME")]
    broker_username: String,

    #[arg(long, env = "BEACON_BROKER_PASSWORD", hide_env_values = true)]
    broker_password: String,

    /// Namespace prefix shared by every topic of one deployment.
    #[arg(long, env = "BEACON_TOPIC_PREFIX", default_value = DEFAULT_TOPIC_PREFIX)]
    topic_prefix: String,

    /// Outbound queue capacity.
    #[arg(long, default_value_t = 10)]
    queue_capacity: usize,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Publish the tunnel endpoint handed over by the tunnel provisioner.
    Host(HostArgs),
    /// Wait for the retained tunnel endpoint and persist it.
    Fetch(FetchArgs),
}

#[derive(Debug, Args)]
struct HostArgs {
    /// Public address of the tunnel endpoint.
    #[arg(long, env = "BEACON_TUNNEL_ADDRESS")]
    address: String,

    /// Public port of the tunnel endpoint.
    #[arg(long, env = "BEACON_TUNNEL_PORT")]
    port: String,

    /// Keep running after the endpoint has been published.
    #[arg(long)]
    stay: bool,
}

#[derive(Debug, Args)]
struct FetchArgs {
    /// File the received record is written to.
    #[arg(long, default_value = DEFAULT_OUTPUT_PATH)]
    output: PathBuf,

    /// Also print the record line to stdout.
    #[arg(long)]
    print: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init()?;

    let cli = Cli::parse();
    let broker = BrokerConfig::new(
        cli.broker.broker_host.clone(),
        cli.broker.broker_port,
        cli.broker.broker_username.clone(),
        cli.broker.broker_password.clone(),
    );
    let options = CommunicatorOptions::default()
        .with_topics(TopicScheme::new(cli.broker.topic_prefix.clone()))
        .with_queue_capacity(cli.broker.queue_capacity);

    match cli.command {
        Command::Host(args) => run_host(broker, options, args).await,
        Command::Fetch(args) => run_fetch(broker, options, args).await,
    }
}

async fn run_host(broker: BrokerConfig, options: CommunicatorOptions, args: HostArgs) -> Result<()> {
    let options = options.with_self_terminate(!args.stay);
    let role: Arc<dyn RoleBehavior> = Arc::new(Producer);
    let communicator = Communicator::connect(&broker, options, role)
        .await
        .context("broker connection failed")?;

    let rendezvous = Rendezvous::new(args.address, args.port);
    let payload = rendezvous
        .encode_payload()
        .context("failed to encode the rendezvous payload")?;
    communicator
        .send_to(Topic::Credentials, payload)
        .await
        .context("failed to enqueue the rendezvous payload")?;
    info!(
        address = %rendezvous.address,
        port = %rendezvous.port,
        "rendezvous payload queued"
    );

    communicator.done().await;
    if !communicator.state().sent_rendezvous() {
        bail!("broker session failed before the rendezvous payload was published");
    }
    info!("rendezvous payload published, exiting");
    Ok(())
}

async fn run_fetch(
    broker: BrokerConfig,
    options: CommunicatorOptions,
    args: FetchArgs,
) -> Result<()> {
    let sink = FileSink::new(&args.output);
    let role: Arc<dyn RoleBehavior> = Arc::new(Consumer::new(Arc::new(sink)));
    let communicator = Communicator::connect(&broker, options, role)
        .await
        .context("broker connection failed")?;

    communicator.done().await;
    if !communicator.state().received_rendezvous() {
        bail!("broker session failed before a rendezvous value arrived");
    }

    if args.print {
        let record = tokio::fs::read_to_string(&args.output)
            .await
            .with_context(|| format!("failed to read back {}", args.output.display()))?;
        let rendezvous = Rendezvous::parse_record_line(&record, DEFAULT_RECORD_SEPARATOR)
            .context("persisted record is malformed")?;
        println!("{}", rendezvous.record_line(DEFAULT_RECORD_SEPARATOR));
    }
    info!(path = %args.output.display(), "rendezvous record saved, exiting");
    Ok(())
}
