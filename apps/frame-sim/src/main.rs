mod cli;
mod logging;
mod sim;

use clap::Parser;
use frame_client::ClientConfig;
use frame_host::HostConfig;

use crate::cli::Cli;
use crate::sim::SimOptions;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_level)?;

    let options = SimOptions {
        scenario: cli.scenario,
        host_origin: cli.host_origin,
        iframe_url: cli.iframe_url,
        host: cli.host.apply(HostConfig::from_env()),
        client: cli.client.apply(ClientConfig::from_env()),
    };
    let report = sim::run(options).await?;
    println!("{report}");
    Ok(())
}
