//! SATMINER entry point.
//!
//! Loads configuration, initialises structured logging, wires the
//! wallet, extraction, exchange and notification components together,
//! and runs the two periodic jobs (rotation, withdrawal) with graceful
//! shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rust_decimal::prelude::ToPrimitive;
use secrecy::SecretString;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use satminer::config::AppConfig;
use satminer::engine::Rotator;
use satminer::exchanges::coinbase::CoinbaseClient;
use satminer::exchanges::kraken::KrakenClient;
use satminer::exchanges::okcoin::OkcoinClient;
use satminer::exchanges::{ExchangeClient, WithdrawalLane, WithdrawalPolicy};
use satminer::extractor::OrdinalsBotClient;
use satminer::fees::MempoolClient;
use satminer::notifications::slack::SlackSink;
use satminer::notifications::telegram::TelegramSink;
use satminer::notifications::{NotificationSink, NotificationService};
use satminer::types::NotificationLevel;
use satminer::wallet::rpc::CoreRpcClient;
use satminer::wallet::{ensure_wallet_loaded, Wallet};

const BANNER: &str = r#"
 ____    _  _____ __  __ ___ _   _ _____ ____
/ ___|  / \|_   _|  \/  |_ _| \ | | ____|  _ \
\___ \ / _ \ | | | |\/| || ||  \| |  _| | |_) |
 ___) / ___ \| | | |  | || || |\  | |___|  _ <
|____/_/   \_\_| |_|  |_|___|_| \_|_____|_| \_\

  rare-sat custody & fund-rotation engine
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load("config.toml")?;
    init_logging();

    println!("{BANNER}");
    info!(
        tumbler = %cfg.rotation.tumbler_address,
        exchange = %cfg.exchange.active,
        extract_interval_min = cfg.rotation.extract_interval_min,
        withdraw_interval_min = cfg.withdrawal.interval_min,
        "satminer starting up"
    );

    // -- Wire components -------------------------------------------------

    let network = cfg.network()?;
    let rpc = Arc::new(CoreRpcClient::new(
        &cfg.bitcoin_rpc.host,
        cfg.bitcoin_rpc.port,
        &cfg.bitcoin_rpc.wallet,
        AppConfig::resolve_env(&cfg.bitcoin_rpc.username_env)?,
        SecretString::new(AppConfig::resolve_env(&cfg.bitcoin_rpc.password_env)?),
    )?);
    ensure_wallet_loaded(&*rpc, &cfg.bitcoin_rpc.wallet).await?;
    let wallet = Arc::new(Wallet::new(rpc, network));

    let fee_oracle = Arc::new(MempoolClient::new()?);
    let extractor = Arc::new(OrdinalsBotClient::new(
        &cfg.extraction.base_url,
        SecretString::new(AppConfig::resolve_env(&cfg.extraction.api_key_env)?),
    )?);
    let notifications = build_notifications(&cfg)?;

    let rotator = Arc::new(Rotator::new(
        wallet.clone(),
        fee_oracle,
        extractor,
        notifications.clone(),
        cfg.rotation.clone(),
        cfg.deposit_address()?.to_string(),
    ));

    let lane = Arc::new(WithdrawalLane::new(
        build_exchange_client(&cfg)?,
        notifications.clone(),
        WithdrawalPolicy {
            min_btc: cfg.withdrawal.min_btc,
            max_btc: cfg.withdrawal.max_btc,
        },
    ));

    // -- Startup runs ----------------------------------------------------

    // Withdraw on startup only when the wallet holds next to nothing;
    // otherwise funds already in flight would be cycled twice.
    let startup_threshold = cfg.withdrawal.min_btc.to_f64().unwrap_or(0.0) / 2.0;
    match wallet.total_balance().await {
        Ok(total) if total < startup_threshold => {
            info!(total, "wallet near empty, initiating a withdrawal on startup");
            run_withdrawal(&lane, &notifications).await;
        }
        Ok(total) => info!(total, "skipping withdrawal on startup"),
        Err(err) => error!(error = %err, "failed to read wallet balance on startup"),
    }

    rotator.run_and_report().await;

    // -- Periodic jobs ---------------------------------------------------

    info!("starting jobs, press Ctrl+C to stop");

    let rotation_job = tokio::spawn({
        let rotator = rotator.clone();
        let period = Duration::from_secs(cfg.rotation.extract_interval_min * 60);
        async move {
            let mut interval = tokio::time::interval(period);
            // A slow cycle delays the next tick instead of stacking runs.
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await; // the startup run covered the first tick
            loop {
                interval.tick().await;
                rotator.run_and_report().await;
            }
        }
    });

    let withdrawal_job = tokio::spawn({
        let lane = lane.clone();
        let notifications = notifications.clone();
        let period = Duration::from_secs(cfg.withdrawal.interval_min * 60);
        async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                run_withdrawal(&lane, &notifications).await;
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("shutdown signal received");
    rotation_job.abort();
    withdrawal_job.abort();

    Ok(())
}

/// Run the withdrawal lane once, reporting transport-level failures the
/// same way the rotator reports cycle failures.
async fn run_withdrawal(lane: &WithdrawalLane, notifications: &NotificationService) {
    match lane.withdraw_available_funds().await {
        Ok(submitted) => info!(submitted, "withdrawal job finished"),
        Err(err) => {
            error!(error = %err, "withdrawal job failed");
            notifications
                .notify(
                    &format!("withdrawal job failed: {err}"),
                    NotificationLevel::Verbose,
                )
                .await;
        }
    }
}

fn build_exchange_client(cfg: &AppConfig) -> Result<Box<dyn ExchangeClient>> {
    match cfg.exchange.active.as_str() {
        "kraken" => {
            let kraken = cfg
                .exchange
                .kraken
                .as_ref()
                .context("[exchange.kraken] section missing")?;
            Ok(Box::new(KrakenClient::new(
                SecretString::new(AppConfig::resolve_env(&kraken.api_key_env)?),
                SecretString::new(AppConfig::resolve_env(&kraken.api_secret_env)?),
                kraken.withdrawal_wallet.clone(),
                kraken.currency.clone(),
            )?))
        }
        "okcoin" => {
            let okcoin = cfg
                .exchange
                .okcoin
                .as_ref()
                .context("[exchange.okcoin] section missing")?;
            Ok(Box::new(OkcoinClient::new(
                SecretString::new(AppConfig::resolve_env(&okcoin.api_key_env)?),
                SecretString::new(AppConfig::resolve_env(&okcoin.api_secret_env)?),
                SecretString::new(AppConfig::resolve_env(&okcoin.passphrase_env)?),
                okcoin.withdrawal_wallet.clone(),
                okcoin.currency.clone(),
            )?))
        }
        "coinbase" => {
            let coinbase = cfg
                .exchange
                .coinbase
                .as_ref()
                .context("[exchange.coinbase] section missing")?;
            Ok(Box::new(CoinbaseClient::new(
                SecretString::new(AppConfig::resolve_env(&coinbase.api_key_env)?),
                SecretString::new(AppConfig::resolve_env(&coinbase.api_secret_env)?),
                coinbase.withdrawal_wallet.clone(),
                coinbase.currency.clone(),
            )?))
        }
        other => anyhow::bail!("unknown exchange: {other}"),
    }
}

fn build_notifications(cfg: &AppConfig) -> Result<Arc<NotificationService>> {
    let mut sinks: Vec<Box<dyn NotificationSink>> = Vec::new();

    if let Some(env) = &cfg.notifications.slack_webhook_env {
        if let Ok(url) = std::env::var(env) {
            info!("enabling slack webhook notifications");
            sinks.push(Box::new(SlackSink::new(SecretString::new(url))?));
        }
    }
    if let (Some(token_env), Some(chat_id_env)) = (
        &cfg.notifications.telegram_token_env,
        &cfg.notifications.telegram_chat_id_env,
    ) {
        if let (Ok(token), Ok(chat_id)) = (std::env::var(token_env), std::env::var(chat_id_env)) {
            info!("enabling telegram notifications");
            sinks.push(Box::new(TelegramSink::new(SecretString::new(token), chat_id)?));
        }
    }

    Ok(Arc::new(NotificationService::new(
        cfg.notifications.level,
        sinks,
    )))
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("satminer=info"));

    if std::env::var("SATMINER_LOG_JSON").is_ok() {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
