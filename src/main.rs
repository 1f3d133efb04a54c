use beacond::app_config::Cli;
use beacond::{logging, Application, Config};
use clap::Parser;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    logging::init(&config.app.log_level, cli.verbose);

    info!(version = env!("CARGO_PKG_VERSION"), "starting beacond");

    if let Err(e) = Application::new(config).run().await {
        error!(error = %e, "fatal error");
        std::process::exit(1);
    }
}
