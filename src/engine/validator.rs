//! Custody validation of extraction proposals.
//!
//! Every output of a proposed transaction must pay an address we
//! control. The check runs on the node-decoded transaction, not on the
//! template we sent, so a malicious or buggy extraction service cannot
//! redirect funds.

use std::collections::HashSet;

use thiserror::Error;
use tracing::warn;

use crate::types::DecodedTransaction;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// A proposed output pays an address outside the controlled set.
    #[error("proposed transaction pays a foreign output: {address}")]
    ForeignOutput { address: String },

    /// The exchange deposit output exists but is below the configured
    /// floor, so the rotation would move dust to the exchange.
    #[error("deposit output of {amount_btc} BTC is below the minimum of {minimum_btc} BTC")]
    DepositBelowMinimum { amount_btc: f64, minimum_btc: f64 },
}

/// Outcome of the deposit-floor check. The proposal is free not to pay
/// the exchange at all (everything went to rare-sat wallets); the floor
/// only applies when a deposit output is present.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DepositCheck {
    Present { amount_btc: f64 },
    Absent,
}

/// Validate a decoded proposal against the controlled address set and
/// the deposit floor.
///
/// An output whose script does not encode an address (OP_RETURN, bare
/// scripts) fails custody: we cannot prove we control it.
pub fn validate(
    decoded: &DecodedTransaction,
    user_controlled: &HashSet<String>,
    deposit_address: &str,
    min_deposit_btc: f64,
) -> Result<DepositCheck, ValidationError> {
    for output in &decoded.vout {
        match output.address() {
            Some(address) if user_controlled.contains(address) => {}
            Some(address) => {
                return Err(ValidationError::ForeignOutput {
                    address: address.to_string(),
                })
            }
            None => {
                return Err(ValidationError::ForeignOutput {
                    address: "<no address>".to_string(),
                })
            }
        }
    }

    let deposit = decoded
        .vout
        .iter()
        .find(|o| o.address() == Some(deposit_address));

    match deposit {
        Some(output) => {
            let amount_btc = output.amount_btc();
            if amount_btc < min_deposit_btc {
                return Err(ValidationError::DepositBelowMinimum {
                    amount_btc,
                    minimum_btc: min_deposit_btc,
                });
            }
            Ok(DepositCheck::Present { amount_btc })
        }
        None => {
            warn!("proposal has no exchange deposit output, skipping floor check");
            Ok(DepositCheck::Absent)
        }
    }
}
