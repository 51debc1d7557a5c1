mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(env_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if let Command::Secret { action } = &cli.command {
        return commands::secret(action);
    }

    let cfg = config::load(cli.config.as_deref())?;
    cfg.validate()?;

    match cli.command {
        Command::Serve => commands::serve(&cfg).await,
        Command::Request { user, usd } => commands::request(&cfg, &user, usd).await,
        Command::Status { user, attention } => commands::status(&cfg, user.as_deref(), attention),
        Command::Secret { .. } => Ok(()),
    }
}
