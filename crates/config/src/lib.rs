use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tronpay_core::{amounts::USDT_MAINNET_CONTRACT, validate_tron_address, Network, Token};

const APP_NAME: &str = "tronpay";
const KEYCHAIN_SERVICE: &str = "tronpay.credentials";

pub const TRON_API_KEY: &str = "tron_api_key";
pub const TELEGRAM_BOT_TOKEN: &str = "telegram_bot_token";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub tron: TronConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TronConfig {
    #[serde(default = "default_network")]
    pub network: Network,
    /// The shared address every intent is paid to.
    #[serde(default)]
    pub deposit_address: String,
    #[serde(default = "default_token")]
    pub token: Token,
    #[serde(default = "default_usdt_contract")]
    pub usdt_contract: String,
}

impl Default for TronConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            deposit_address: String::new(),
            token: default_token(),
            usdt_contract: default_usdt_contract(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: i64,
    #[serde(default = "default_ledger_timeout")]
    pub ledger_timeout_secs: u64,
    #[serde(default = "default_confirmations")]
    pub required_confirmations: u32,
    #[serde(default = "default_synthetic_prefix")]
    pub synthetic_tx_prefix: String,
    #[serde(default = "default_true")]
    pub lookup_transactions: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            lease_ttl_secs: default_lease_ttl(),
            ledger_timeout_secs: default_ledger_timeout(),
            required_confirmations: default_confirmations(),
            synthetic_tx_prefix: default_synthetic_prefix(),
            lookup_transactions: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    #[serde(default = "default_price_usd")]
    pub price_usd: f64,
    #[serde(default = "default_units_per_usd")]
    pub units_per_usd: i64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            price_usd: default_price_usd(),
            units_per_usd: default_units_per_usd(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub reward_assets: Vec<String>,
    #[serde(default = "default_caption")]
    pub reward_caption: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            reward_assets: Vec::new(),
            reward_caption: default_caption(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// `None` disables the audit trail.
    #[serde(default = "default_audit_log")]
    pub audit_log: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            audit_log: default_audit_log(),
        }
    }
}

fn default_network() -> Network {
    Network::Shasta
}

fn default_token() -> Token {
    Token::Trx
}

fn default_usdt_contract() -> String {
    USDT_MAINNET_CONTRACT.to_string()
}

fn default_poll_interval() -> u64 {
    30
}

fn default_lease_ttl() -> i64 {
    24 * 60 * 60
}

fn default_ledger_timeout() -> u64 {
    10
}

fn default_confirmations() -> u32 {
    25
}

fn default_synthetic_prefix() -> String {
    "synthetic".to_string()
}

fn default_true() -> bool {
    true
}

fn default_price_usd() -> f64 {
    10.0
}

fn default_units_per_usd() -> i64 {
    1_000_000
}

fn default_caption() -> String {
    "Your reward for the payment!".to_string()
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".tronpay_store")
}

fn default_audit_log() -> Option<PathBuf> {
    Some(PathBuf::from("tronpay_audit.jsonl"))
}

impl AppConfig {
    /// Overlays `TRONPAY_*` variables using `lookup` (normally `std::env::var`).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TRONPAY_DEPOSIT_ADDRESS") {
            self.tron.deposit_address = v;
        }
        if let Some(v) = lookup("TRONPAY_NETWORK") {
            self.tron.network = v.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(v) = lookup("TRONPAY_TOKEN") {
            self.tron.token = v.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(v) = lookup("TRONPAY_STORE_PATH") {
            self.storage.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("TRONPAY_POLL_INTERVAL_SECS") {
            self.reconcile.poll_interval_secs = v
                .parse()
                .with_context(|| format!("Invalid TRONPAY_POLL_INTERVAL_SECS: {v}"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.tron.deposit_address.trim().is_empty() {
            bail!("Deposit address not configured (tron.deposit_address or TRONPAY_DEPOSIT_ADDRESS)");
        }
        validate_tron_address(&self.tron.deposit_address).context("Invalid deposit address")?;
        if self.tron.token == Token::Usdt {
            validate_tron_address(&self.tron.usdt_contract).context("Invalid USDT contract")?;
        }

        let r = &self.reconcile;
        if r.poll_interval_secs == 0 {
            bail!("reconcile.poll_interval_secs must be positive");
        }
        if !(1..=10).contains(&r.ledger_timeout_secs) {
            bail!("reconcile.ledger_timeout_secs must be between 1 and 10");
        }
        if r.lease_ttl_secs <= 0 {
            bail!("reconcile.lease_ttl_secs must be positive");
        }

        let p = &self.pricing;
        if !p.price_usd.is_finite() || p.price_usd <= 0.0 {
            bail!("pricing.price_usd must be a positive amount");
        }
        if p.units_per_usd <= 0 {
            bail!("pricing.units_per_usd must be positive");
        }
        Ok(())
    }
}

/// Loads from `path` if given, otherwise from the platform config dir, then
/// applies environment overrides.
pub fn load(path: Option<&Path>) -> Result<AppConfig> {
    let mut cfg: AppConfig = match path {
        Some(p) => confy::load_path(p)
            .with_context(|| format!("Failed to load config from {}", p.display()))?,
        None => confy::load(APP_NAME, None).context("Failed to load app config")?,
    };
    cfg.apply_overrides(|key| std::env::var(key).ok())?;
    Ok(cfg)
}

pub fn store(cfg: &AppConfig) -> Result<()> {
    confy::store(APP_NAME, None, cfg).context("Failed to store app config")?;
    Ok(())
}

/// Env var first (upper-cased key), then the OS keychain.
pub fn resolve_secret(key: &str) -> Option<String> {
    std::env::var(key.to_ascii_uppercase())
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(|| get_secret(key).ok())
}

/// Store a secret in the OS keychain
pub fn store_secret(key: &str, value: &str) -> Result<()> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    entry.set_password(value)?;
    Ok(())
}

/// Retrieve a secret from the OS keychain
pub fn get_secret(key: &str) -> Result<String> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    let password = entry.get_password()?;
    Ok(password)
}

/// Delete a secret from the OS keychain
pub fn delete_secret(key: &str) -> Result<()> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    entry.delete_password()?;
    Ok(())
}
