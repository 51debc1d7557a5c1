use crate::cli::SecretAction;
use anyhow::{Context, Result};
use chrono::Utc;
use config::AppConfig;
use delivery::{catalog::StaticCatalog, logging::LoggingNotifier, telegram::TelegramNotifier, Notifier};
use ledger::trongrid::TronGridClient;
use reconcile::{
    AuditLog, BalanceWatcher, ConfirmationEngine, ConfirmationPolicy, FulfillmentDispatcher,
    IntakeOutcome, LeaseManager, LeasePolicy, PaymentIntake, PaymentStore, ReconciliationLoop,
    Reconciler, SledPaymentStore,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tronpay_core::{Pricing, PaymentIntent};

/// Everything wired together over one store.
struct App {
    store: Arc<SledPaymentStore>,
    intake: PaymentIntake,
    reconciler: Arc<Reconciler>,
}

fn open_store(cfg: &AppConfig) -> Result<Arc<SledPaymentStore>> {
    let store = SledPaymentStore::open(&cfg.storage.path)
        .with_context(|| format!("Failed to open store at {}", cfg.storage.path.display()))?;
    Ok(Arc::new(store))
}

fn create_notifier() -> Result<Arc<dyn Notifier>> {
    match config::resolve_secret(config::TELEGRAM_BOT_TOKEN) {
        Some(token) => {
            info!("Using Telegram notifier");
            Ok(TelegramNotifier::new(token)?)
        }
        None => {
            warn!("No Telegram bot token in env or keychain, deliveries will only be logged");
            Ok(LoggingNotifier::new())
        }
    }
}

fn build(cfg: &AppConfig) -> Result<App> {
    let store = open_store(cfg)?;
    let audit = Arc::new(AuditLog::new(cfg.storage.audit_log.clone()));

    let timeout = Duration::from_secs(cfg.reconcile.ledger_timeout_secs);
    let ledger = TronGridClient::new(
        cfg.tron.network,
        cfg.tron.token,
        cfg.tron.usdt_contract.clone(),
        config::resolve_secret(config::TRON_API_KEY),
        timeout,
    )?;
    info!(network = %cfg.tron.network, token = %cfg.tron.token, address = %cfg.tron.deposit_address, "Using TronGrid ledger");
    let watcher = BalanceWatcher::new(ledger, timeout);

    let engine = Arc::new(ConfirmationEngine::new(
        store.clone(),
        watcher.clone(),
        ConfirmationPolicy {
            required_confirmations: cfg.reconcile.required_confirmations,
            synthetic_tx_prefix: cfg.reconcile.synthetic_tx_prefix.clone(),
            lookup_transactions: cfg.reconcile.lookup_transactions,
        },
        audit.clone(),
    ));
    let leases = Arc::new(LeaseManager::new(
        store.clone(),
        watcher,
        engine.clone(),
        LeasePolicy {
            ttl: chrono::Duration::seconds(cfg.reconcile.lease_ttl_secs),
        },
        audit.clone(),
    ));

    let catalog = StaticCatalog::new(cfg.delivery.reward_assets.clone());
    if catalog.is_empty() {
        warn!("No reward assets configured, confirmed payments will be flagged for follow-up");
    }
    let dispatcher = Arc::new(FulfillmentDispatcher::new(
        store.clone(),
        create_notifier()?,
        catalog,
        cfg.tron.token,
        cfg.delivery.reward_caption.clone(),
        audit.clone(),
    ));

    let reconciler = Arc::new(Reconciler::new(store.clone(), engine, dispatcher, audit));
    let intake = PaymentIntake::new(
        leases,
        cfg.tron.deposit_address.clone(),
        Pricing::new(cfg.pricing.units_per_usd),
    );

    Ok(App {
        store,
        intake,
        reconciler,
    })
}

pub async fn serve(cfg: &AppConfig) -> Result<()> {
    let app = build(cfg)?;
    let pending = app.store.list_pending()?.len();
    info!(pending, address = %app.intake.deposit_address(), "Resuming from store");

    let resumed = app.reconciler.resume_unfulfilled().await?;
    if resumed > 0 {
        info!(resumed, "Delivered rewards left over from a previous run");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let interval = Duration::from_secs(cfg.reconcile.poll_interval_secs);
    let handle = tokio::spawn(ReconciliationLoop::new(app.reconciler.clone(), interval).run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Received Ctrl-C, waiting for the current tick to finish");
    // The loop only exits on this signal, so a closed channel means it is gone already.
    let _ = shutdown_tx.send(true);
    handle.await.context("Reconciliation loop panicked")?;
    Ok(())
}

pub async fn request(cfg: &AppConfig, user: &str, usd: Option<f64>) -> Result<()> {
    let app = build(cfg)?;
    let usd = usd.unwrap_or(cfg.pricing.price_usd);

    match app.intake.create_payment_intent(user, usd, Utc::now()).await? {
        IntakeOutcome::Ready {
            intent_id,
            deposit_address,
            expected_amount,
            expires_at,
        } => {
            println!("Payment intent {intent_id}");
            println!("Network:  {}", cfg.tron.network);
            println!("Send:     {} (${usd:.2})", cfg.tron.token.display(expected_amount));
            println!("To:       {deposit_address}");
            println!("Expires:  {}", expires_at.to_rfc3339());
        }
        IntakeOutcome::Busy { retry_after } => {
            println!(
                "The deposit address is in use by another payment. Try again after {}.",
                retry_after.to_rfc3339()
            );
        }
    }
    Ok(())
}

pub fn status(cfg: &AppConfig, user: Option<&str>, attention: bool) -> Result<()> {
    let store = open_store(cfg)?;
    let intents = match user {
        Some(u) => store.list_by_user(u)?,
        None => store.list_all()?,
    };

    let mut shown = 0;
    for intent in intents.iter().filter(|i| !attention || i.needs_attention) {
        println!("{}", describe(cfg, intent));
        shown += 1;
    }
    if shown == 0 {
        println!("No payment intents.");
    }
    Ok(())
}

fn describe(cfg: &AppConfig, intent: &PaymentIntent) -> String {
    let mut line = format!(
        "{} user={} status={} expected={} created={}",
        intent.id,
        intent.user_id,
        intent.status,
        cfg.tron.token.display(intent.expected_amount),
        intent.created_at.to_rfc3339(),
    );
    if let Some(tx) = &intent.tx_id {
        let kind = if intent.tx_id_synthetic { " (synthetic)" } else { "" };
        line.push_str(&format!(
            " received={} tx={tx}{kind} fulfilled={}",
            cfg.tron.token.display(intent.received_amount),
            intent.fulfilled
        ));
    }
    if intent.needs_attention {
        line.push_str(&format!(
            " NEEDS ATTENTION: {}",
            intent.last_error.as_deref().unwrap_or("unknown")
        ));
    }
    line
}

pub fn secret(action: &SecretAction) -> Result<()> {
    match action {
        SecretAction::Set { key, value } => {
            config::store_secret(key, value)
                .with_context(|| format!("Failed to store {key} in keychain"))?;
            println!("Stored {key}.");
        }
        SecretAction::Delete { key } => {
            config::delete_secret(key)
                .with_context(|| format!("Failed to delete {key} from keychain"))?;
            println!("Deleted {key}.");
        }
    }
    Ok(())
}
