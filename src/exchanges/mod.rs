//! Exchange integrations.
//!
//! Defines the `ExchangeClient` trait and provides implementations for:
//! - Kraken — balance + withdrawal by registered key (fee deducted server-side)
//! - OKCoin — balance + withdrawal with quoted on-chain fee
//! - Coinbase — balance + send with a flat fee estimate
//!
//! The withdrawal lane on top of the trait is exchange-agnostic: clamp
//! the balance into the configured window, subtract the fee, truncate
//! to satoshi precision and submit.

pub mod coinbase;
pub mod kraken;
pub mod okcoin;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{error, info};

use crate::notifications::NotificationService;
use crate::types::{NotificationLevel, WithdrawalReceipt};

#[cfg(test)]
use mockall::automock;

/// Abstraction over exchange accounts funds are rotated out of.
///
/// Implementors provide an authenticated balance read and a withdrawal
/// submission. The fee model differs per exchange: some quote the
/// on-chain fee, some deduct it server-side, some need a flat estimate.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Available balance for the withdrawal currency, in BTC.
    async fn get_account_balance(&self) -> Result<Decimal>;

    /// Quoted maximum on-chain fee for a withdrawal, when the exchange
    /// exposes a quote endpoint.
    async fn get_withdrawal_fee(&self) -> Result<Option<Decimal>> {
        Ok(None)
    }

    /// Fixed fee estimate used when no quote endpoint exists.
    fn flat_fee_estimate(&self) -> Decimal {
        Decimal::ZERO
    }

    /// Submit a withdrawal of `amount` to the configured wallet.
    async fn withdraw_funds(&self, amount: Decimal) -> Result<WithdrawalReceipt>;

    /// Withdrawal currency code, for logging.
    fn currency(&self) -> &str;

    /// Destination wallet name or address, for logging.
    fn withdrawal_wallet(&self) -> &str;

    /// Exchange name for logging and identification.
    fn name(&self) -> &str;
}

/// Withdrawal bounds in BTC.
#[derive(Debug, Clone, Copy)]
pub struct WithdrawalPolicy {
    pub min_btc: Decimal,
    pub max_btc: Decimal,
}

pub struct WithdrawalLane {
    client: Box<dyn ExchangeClient>,
    notifications: Arc<NotificationService>,
    policy: WithdrawalPolicy,
}

impl WithdrawalLane {
    pub fn new(
        client: Box<dyn ExchangeClient>,
        notifications: Arc<NotificationService>,
        policy: WithdrawalPolicy,
    ) -> Self {
        Self {
            client,
            notifications,
            policy,
        }
    }

    /// Move available funds off the exchange. Returns whether a
    /// withdrawal was submitted and accepted; a balance below the
    /// minimum is a no-op, not an error.
    pub async fn withdraw_available_funds(&self) -> Result<bool> {
        let balance = self.client.get_account_balance().await?;
        if balance < self.policy.min_btc {
            info!(
                exchange = self.client.name(),
                %balance,
                "insufficient funds to withdraw"
            );
            return Ok(false);
        }

        let clamped = balance.min(self.policy.max_btc);
        let fee = match self.client.get_withdrawal_fee().await? {
            Some(quoted) => quoted,
            None => self.client.flat_fee_estimate(),
        };
        // Truncate after the fee subtraction so the submitted amount
        // never exceeds what the balance covers.
        let amount = (clamped - fee).round_dp_with_strategy(8, RoundingStrategy::ToZero);

        info!(
            exchange = self.client.name(),
            %amount,
            currency = self.client.currency(),
            wallet = self.client.withdrawal_wallet(),
            "withdrawing funds"
        );

        let receipt = self.client.withdraw_funds(amount).await?;
        if !receipt.is_success() {
            let reason = receipt.error.unwrap_or_else(|| "no reference id".to_string());
            error!(exchange = self.client.name(), reason = %reason, "withdrawal rejected");
            self.notifications
                .notify(
                    &format!("withdrawal from {} rejected: {reason}", self.client.name()),
                    NotificationLevel::Verbose,
                )
                .await;
            return Ok(false);
        }

        self.notifications
            .notify(
                &format!(
                    "withdrew {amount} {} from {} to wallet {}",
                    self.client.currency(),
                    self.client.name(),
                    self.client.withdrawal_wallet()
                ),
                NotificationLevel::Verbose,
            )
            .await;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::MockNotificationSink;
    use rust_decimal_macros::dec;

    fn policy() -> WithdrawalPolicy {
        WithdrawalPolicy {
            min_btc: dec!(0.01),
            max_btc: dec!(1),
        }
    }

    fn client_with_balance(balance: Decimal) -> MockExchangeClient {
        let mut client = MockExchangeClient::new();
        client
            .expect_get_account_balance()
            .returning(move || Ok(balance));
        client.expect_name().return_const("testex".to_string());
        client.expect_currency().return_const("BTC".to_string());
        client
            .expect_withdrawal_wallet()
            .return_const("cold-storage".to_string());
        client
    }

    fn service(sink: MockNotificationSink) -> Arc<NotificationService> {
        Arc::new(NotificationService::new(
            NotificationLevel::Verbose,
            vec![Box::new(sink)],
        ))
    }

    fn success_sink() -> MockNotificationSink {
        let mut sink = MockNotificationSink::new();
        sink.expect_name().return_const("mock".to_string());
        sink.expect_send()
            .withf(|text| text.contains("withdrew"))
            .times(1)
            .returning(|_| Ok(()));
        sink
    }

    #[tokio::test]
    async fn test_balance_clamped_to_maximum() {
        let mut client = client_with_balance(dec!(10));
        client.expect_get_withdrawal_fee().returning(|| Ok(None));
        client.expect_flat_fee_estimate().return_const(Decimal::ZERO);
        client
            .expect_withdraw_funds()
            .withf(|&amount| amount == dec!(1))
            .times(1)
            .returning(|_| {
                Ok(WithdrawalReceipt {
                    reference: Some("ref-1".to_string()),
                    error: None,
                })
            });

        let lane = WithdrawalLane::new(Box::new(client), service(success_sink()), policy());
        assert!(lane.withdraw_available_funds().await.unwrap());
    }

    #[tokio::test]
    async fn test_below_minimum_is_noop() {
        let mut client = client_with_balance(dec!(0.001));
        client.expect_withdraw_funds().times(0);
        client.expect_get_withdrawal_fee().times(0);

        let mut sink = MockNotificationSink::new();
        sink.expect_name().return_const("mock".to_string());
        sink.expect_send().times(0);

        let lane = WithdrawalLane::new(Box::new(client), service(sink), policy());
        assert!(!lane.withdraw_available_funds().await.unwrap());
    }

    #[tokio::test]
    async fn test_quoted_fee_subtracted() {
        let mut client = client_with_balance(dec!(0.5));
        client
            .expect_get_withdrawal_fee()
            .returning(|| Ok(Some(dec!(0.0005))));
        client
            .expect_withdraw_funds()
            .withf(|&amount| amount == dec!(0.4995))
            .times(1)
            .returning(|_| {
                Ok(WithdrawalReceipt {
                    reference: Some("ref-2".to_string()),
                    error: None,
                })
            });

        let lane = WithdrawalLane::new(Box::new(client), service(success_sink()), policy());
        assert!(lane.withdraw_available_funds().await.unwrap());
    }

    #[tokio::test]
    async fn test_flat_fee_truncated_to_satoshi_precision() {
        let mut client = client_with_balance(dec!(0.123456789123));
        client.expect_get_withdrawal_fee().returning(|| Ok(None));
        client
            .expect_flat_fee_estimate()
            .return_const(dec!(0.001));
        client
            .expect_withdraw_funds()
            .withf(|&amount| amount == dec!(0.12245678))
            .times(1)
            .returning(|_| {
                Ok(WithdrawalReceipt {
                    reference: Some("ref-3".to_string()),
                    error: None,
                })
            });

        let lane = WithdrawalLane::new(Box::new(client), service(success_sink()), policy());
        assert!(lane.withdraw_available_funds().await.unwrap());
    }

    #[tokio::test]
    async fn test_rejected_receipt_returns_false() {
        let mut client = client_with_balance(dec!(0.5));
        client.expect_get_withdrawal_fee().returning(|| Ok(None));
        client.expect_flat_fee_estimate().return_const(Decimal::ZERO);
        client.expect_withdraw_funds().returning(|_| {
            Ok(WithdrawalReceipt {
                reference: None,
                error: Some("Invalid address".to_string()),
            })
        });

        let mut sink = MockNotificationSink::new();
        sink.expect_name().return_const("mock".to_string());
        sink.expect_send()
            .withf(|text| text.contains("rejected") && text.contains("Invalid address"))
            .times(1)
            .returning(|_| Ok(()));

        let lane = WithdrawalLane::new(Box::new(client), service(sink), policy());
        assert!(!lane.withdraw_available_funds().await.unwrap());
    }
}
