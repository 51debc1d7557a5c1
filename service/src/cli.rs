//! CLI definition for tronpay.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Confirms payments to a shared Tron deposit address and delivers rewards.
#[derive(Parser, Debug)]
#[command(name = "tronpay")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to the platform config dir).
    #[arg(long, short, env = "TRONPAY_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the reconciliation loop until Ctrl-C.
    Serve,
    /// Create a payment intent and print deposit instructions.
    Request {
        /// Telegram chat id of the payer.
        #[arg(long)]
        user: String,
        /// Price in USD (defaults to pricing.price_usd).
        #[arg(long)]
        usd: Option<f64>,
    },
    /// List payment intents, newest first.
    Status {
        #[arg(long)]
        user: Option<String>,
        /// Only intents flagged for manual follow-up.
        #[arg(long)]
        attention: bool,
    },
    /// Manage secrets kept in the OS keychain.
    Secret {
        #[command(subcommand)]
        action: SecretAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum SecretAction {
    /// Store a secret (tron_api_key or telegram_bot_token).
    Set { key: String, value: String },
    Delete { key: String },
}
