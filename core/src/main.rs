use anyhow::Result;
use clap::Parser;

use inbox_core::{app, cli::Cli, config::Config, services};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::load(&cli.options)?;
    services::log::init(cfg.logging_enabled);
    app::run(cli.command, cfg).await
}
