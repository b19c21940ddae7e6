//! Per-cycle fund-rotation orchestrator.
//!
//! One run per scheduler tick, no state carried between runs:
//! fee check, extraction request, custody validation of the proposal,
//! sign, broadcast, notify. Every fatal condition aborts the current
//! cycle only; the scheduler fires the next one at the next interval.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, error, info, warn};

use crate::config::RotationConfig;
use crate::engine::validator;
use crate::extractor::ExtractionClient;
use crate::fees::FeeOracle;
use crate::notifications::NotificationService;
use crate::types::{ExtractionRequest, NotificationLevel, RotationError, SpecialRange};
use crate::wallet::Wallet;

pub struct Rotator {
    wallet: Arc<Wallet>,
    fee_oracle: Arc<dyn FeeOracle>,
    extractor: Arc<dyn ExtractionClient>,
    notifications: Arc<NotificationService>,
    config: RotationConfig,
    /// Exchange deposit address of the active lane; common sats sweep here.
    deposit_address: String,
    /// Every address a proposal is allowed to pay. Custody validation
    /// rejects anything outside this set.
    user_controlled: HashSet<String>,
}

impl Rotator {
    pub fn new(
        wallet: Arc<Wallet>,
        fee_oracle: Arc<dyn FeeOracle>,
        extractor: Arc<dyn ExtractionClient>,
        notifications: Arc<NotificationService>,
        config: RotationConfig,
        deposit_address: String,
    ) -> Self {
        let mut user_controlled: HashSet<String> = [
            config.tumbler_address.clone(),
            config.inventory_address.clone(),
            deposit_address.clone(),
        ]
        .into_iter()
        .collect();
        user_controlled.extend(config.rare_sat_wallets.iter().map(|w| w.address.clone()));

        Self {
            wallet,
            fee_oracle,
            extractor,
            notifications,
            config,
            deposit_address,
            user_controlled,
        }
    }

    /// Pick the destination for special sats: first custom wallet whose
    /// satribute appears in `satributes` wins, scanning wallets in
    /// priority order. Falls back to the default inventory address.
    pub fn resolve_special_sat_address(&self, satributes: &[String]) -> &str {
        for wallet in &self.config.rare_sat_wallets {
            for satribute in satributes {
                if wallet.satribute == *satribute {
                    return &wallet.address;
                }
            }
        }
        &self.config.inventory_address
    }

    /// Run one rotation cycle. `Ok(Some(txid))` on broadcast,
    /// `Ok(None)` when the tumbler address held nothing.
    pub async fn cycle(&self) -> Result<Option<String>, RotationError> {
        info!(address = %self.config.tumbler_address, "scanning for rare sats");

        let fees = self.fee_oracle.estimate_fee().await?;
        if fees.fastest_fee > self.config.max_fee_rate {
            return Err(RotationError::FeeCeilingExceeded {
                fastest: fees.fastest_fee,
                ceiling: self.config.max_fee_rate,
            });
        }

        // With a satribute filter every extracted range matches the
        // filter, so the destination can be resolved up front. Without
        // one the ranges are unknown until the proposal arrives, and the
        // default inventory wallet takes everything.
        let special_address = match &self.config.include_satributes {
            Some(filter) => self.resolve_special_sat_address(filter).to_string(),
            None => self.config.inventory_address.clone(),
        };

        let request = ExtractionRequest {
            scan_address: self.config.tumbler_address.clone(),
            address_to_send_special_sats: special_address,
            address_to_send_common_sats: self.deposit_address.clone(),
            fee_per_byte: fees.fastest_fee,
            filter_satributes: self.config.include_satributes.clone(),
        };
        debug!(?request, "requesting extraction proposal");
        let proposal = self.extractor.extract(&request).await?;

        if proposal.scan_address_empty() {
            info!("tumbler address is empty, nothing to rotate");
            return Ok(None);
        }

        if proposal.special_ranges.is_empty() {
            info!("no special sats found, sending funds back to exchange");
            self.notifications
                .notify(
                    "no special sats found, sending funds back to exchange",
                    NotificationLevel::Verbose,
                )
                .await;
            self.check_local_balance().await;
        }

        let tx = proposal
            .tx
            .as_deref()
            .ok_or_else(|| anyhow!("extraction proposal carried no transaction"))?;

        let decoded = self.wallet.decode_raw_transaction(tx).await?;
        validator::validate(
            &decoded,
            &self.user_controlled,
            &self.deposit_address,
            self.config.min_deposit_btc,
        )?;

        let signed = self.wallet.sign_raw_transaction(tx).await?;
        let txid = self.wallet.send_raw_transaction(&signed).await?;
        info!(txid = %txid, "rotation transaction broadcast");

        if !proposal.special_ranges.is_empty() {
            let summary = special_ranges_summary(&proposal.special_ranges);
            self.notifications
                .notify(
                    &format!("found and extracted special ranges in {txid}\n{summary}"),
                    NotificationLevel::Info,
                )
                .await;
        }
        self.notifications
            .notify(
                &format!("rotation cycle complete: {txid}"),
                NotificationLevel::Verbose,
            )
            .await;

        Ok(Some(txid))
    }

    /// Scheduler entry point: run a cycle and report the outcome. Every
    /// fatal condition produces exactly one verbose notification.
    pub async fn run_and_report(&self) {
        match self.cycle().await {
            Ok(Some(txid)) => info!(txid = %txid, "rotation cycle finished"),
            Ok(None) => info!("rotation cycle finished, nothing to do"),
            Err(err) => {
                error!(error = %err, "rotation cycle failed");
                self.notifications
                    .notify(
                        &format!("rotation cycle failed: {err}"),
                        NotificationLevel::Verbose,
                    )
                    .await;
            }
        }
    }

    // Observability only: a low balance with no rare sats around is
    // still rotated normally.
    async fn check_local_balance(&self) {
        match self.wallet.get_balance(1).await {
            Ok(balance) if balance < self.config.min_deposit_btc => {
                warn!(
                    balance,
                    minimum = self.config.min_deposit_btc,
                    "wallet balance below minimum deposit"
                );
            }
            Ok(balance) => debug!(balance, "local wallet balance"),
            Err(err) => warn!(error = %err, "failed to read local wallet balance"),
        }
    }
}

/// One line per range: `"<size> x <satribute1>, <satribute2>"`.
pub fn special_ranges_summary(ranges: &[SpecialRange]) -> String {
    ranges
        .iter()
        .map(|range| format!("{} x {}", range.size, range.satributes.join(", ")))
        .collect::<Vec<_>>()
        .join("\n")
}
