mod analysis;
mod auth;
mod cli;
mod config;
mod controls;
mod error;
mod logging;
mod output;
mod providers;

use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    output::print_banner();
    info!("Starting pipeguard");

    if let Err(e) = cli.execute().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
