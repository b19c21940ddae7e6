//! Shared types for the satminer agent.
//!
//! These types form the data model used across all modules: the wire
//! shapes of the external services (fee oracle, extraction service,
//! Bitcoin Core RPC) and the domain error taxonomy. Wallet, engine and
//! exchange modules depend on them without circular references.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::engine::validator::ValidationError;
use crate::wallet::assembler::AssemblyError;

/// Minimum output value considered economically spendable, in sats.
pub const DUST_LIMIT: u64 = 546;

// ---------------------------------------------------------------------------
// Transaction template
// ---------------------------------------------------------------------------

/// Reference to a prior transaction output, consumed as a transaction input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Input {
    /// Transaction id, big-endian display hex.
    pub hash: String,
    /// Output index within the referenced transaction.
    pub index: u32,
}

/// A destination for a transaction output.
///
/// Duplicate addresses across outputs are allowed; the assembler builds
/// the transaction directly from this template rather than going through
/// the node's create-transaction call, which rejects duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub address: String,
    /// Value in satoshis. Anything at or below [`DUST_LIMIT`] will not
    /// survive relay.
    pub value: u64,
}

// ---------------------------------------------------------------------------
// Fee oracle
// ---------------------------------------------------------------------------

/// Recommended fee rates in sat/vB, as served by mempool.space.
///
/// Only `fastest_fee` drives policy; the other tiers are kept for
/// logging and operator context.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeEstimate {
    pub fastest_fee: u64,
    pub half_hour_fee: u64,
    #[serde(default)]
    pub hour_fee: u64,
    pub economy_fee: u64,
    pub minimum_fee: u64,
}

// ---------------------------------------------------------------------------
// Extraction service
// ---------------------------------------------------------------------------

/// Request to the external rare-sat extraction service.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionRequest {
    pub scan_address: String,
    pub address_to_send_special_sats: String,
    pub address_to_send_common_sats: String,
    pub fee_per_byte: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_satributes: Option<Vec<String>>,
}

/// A scarce satoshi interval inside a UTXO, reported by the extraction
/// service. Used for reporting only; control flow depends solely on
/// presence or absence of ranges.
#[derive(Debug, Clone, Deserialize)]
pub struct SpecialRange {
    /// The UTXO holding the range, formatted `txid:vout`.
    pub output: String,
    pub start: u64,
    #[serde(default)]
    pub end: Option<u64>,
    pub size: u64,
    #[serde(default)]
    pub offset: u64,
    pub satributes: Vec<String>,
}

/// Response from the extraction service: the special ranges it found and
/// an externally computed transaction proposal moving everything off the
/// scan address.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionProposal {
    #[serde(rename = "specialRanges", default)]
    pub special_ranges: Vec<SpecialRange>,
    /// Unsigned raw transaction hex. Absent when the scan address is empty.
    #[serde(default)]
    pub tx: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ExtractionProposal {
    /// Whether the service reported the scan address as holding nothing.
    pub fn scan_address_empty(&self) -> bool {
        self.message
            .as_deref()
            .map(|m| m.contains("Address is empty"))
            .unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Rare-sat routing
// ---------------------------------------------------------------------------

/// A destination wallet for one class of rare sats. The configured list
/// is ranked by priority: the first wallet whose satribute matches wins.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RareSatWallet {
    pub address: String,
    pub satribute: String,
}

// ---------------------------------------------------------------------------
// Bitcoin Core RPC shapes
// ---------------------------------------------------------------------------

/// `decoderawtransaction` result, reduced to the outputs the custody
/// validator needs.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DecodedTransaction {
    #[serde(default)]
    pub vout: Vec<DecodedOutput>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DecodedOutput {
    /// Output value in BTC. Bitcoin Core reports it here; some decoders
    /// nest it under `scriptPubKey` instead, so both spots are read.
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(rename = "scriptPubKey", default)]
    pub script_pub_key: DecodedScriptPubKey,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DecodedScriptPubKey {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
}

impl DecodedOutput {
    /// Destination address, when the script encodes one.
    pub fn address(&self) -> Option<&str> {
        self.script_pub_key.address.as_deref()
    }

    /// Output value in BTC, whichever field the decoder populated.
    pub fn amount_btc(&self) -> f64 {
        self.value.or(self.script_pub_key.value).unwrap_or(0.0)
    }
}

/// `signrawtransactionwithwallet` result.
#[derive(Debug, Clone, Deserialize)]
pub struct SignRawTransactionResult {
    pub hex: String,
    pub complete: bool,
    #[serde(default)]
    pub errors: Option<Vec<SignTxError>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignTxError {
    #[serde(default)]
    pub txid: Option<String>,
    pub error: String,
}

// ---------------------------------------------------------------------------
// Exchange withdrawal
// ---------------------------------------------------------------------------

/// Outcome of a withdrawal submission. A receipt lacking a reference, or
/// carrying an error message, is a failure.
#[derive(Debug, Clone, Default)]
pub struct WithdrawalReceipt {
    pub reference: Option<String>,
    pub error: Option<String>,
}

impl WithdrawalReceipt {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.reference.is_some()
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Message severity. A service configured at `Info` drops `Verbose`
/// messages; `Verbose` passes everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    #[default]
    Info,
    Verbose,
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationLevel::Info => write!(f, "info"),
            NotificationLevel::Verbose => write!(f, "verbose"),
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Fatal conditions for a rotation cycle. All abort the current cycle
/// only; the scheduler runs the next cycle at the next interval.
#[derive(Debug, thiserror::Error)]
pub enum RotationError {
    #[error("fee rate {fastest} sat/vB exceeds ceiling of {ceiling} sat/vB")]
    FeeCeilingExceeded { fastest: u64, ceiling: u64 },

    #[error("wallet could not fully sign the transaction: {reasons}")]
    SigningIncomplete { reasons: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    /// Fee oracle, extraction service or wallet RPC unreachable or
    /// error-shaped response.
    #[error("external service error: {0}")]
    External(#[from] anyhow::Error),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_estimate_wire_names() {
        let json = r#"{
            "fastestFee": 20,
            "halfHourFee": 18,
            "hourFee": 15,
            "economyFee": 10,
            "minimumFee": 8
        }"#;
        let est: FeeEstimate = serde_json::from_str(json).unwrap();
        assert_eq!(est.fastest_fee, 20);
        assert_eq!(est.hour_fee, 15);
        assert_eq!(est.minimum_fee, 8);
    }

    #[test]
    fn test_extraction_request_omits_absent_filter() {
        let req = ExtractionRequest {
            scan_address: "scan".into(),
            address_to_send_special_sats: "special".into(),
            address_to_send_common_sats: "common".into(),
            fee_per_byte: 20,
            filter_satributes: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["scanAddress"], "scan");
        assert_eq!(json["addressToSendSpecialSats"], "special");
        assert_eq!(json["feePerByte"], 20);
        assert!(json.get("filterSatributes").is_none());
    }

    #[test]
    fn test_extraction_request_includes_filter() {
        let req = ExtractionRequest {
            scan_address: "scan".into(),
            address_to_send_special_sats: "special".into(),
            address_to_send_common_sats: "common".into(),
            fee_per_byte: 20,
            filter_satributes: Some(vec!["uncommon".into()]),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["filterSatributes"][0], "uncommon");
    }

    #[test]
    fn test_proposal_empty_address_detection() {
        let proposal: ExtractionProposal = serde_json::from_str(
            r#"{"specialRanges": [], "tx": null, "message": "Address is empty"}"#,
        )
        .unwrap();
        assert!(proposal.scan_address_empty());
        assert!(proposal.tx.is_none());

        let proposal: ExtractionProposal =
            serde_json::from_str(r#"{"specialRanges": [], "tx": "0200"}"#).unwrap();
        assert!(!proposal.scan_address_empty());
    }

    #[test]
    fn test_special_range_deserializes_service_shape() {
        let json = r#"{
            "start": 280810779975733,
            "output": "826fe75c2e9d567baa6bee11160ae265b3007814ecca79299c5bd8338298b5d5:0",
            "size": 1,
            "offset": 0,
            "satributes": ["pizza"]
        }"#;
        let range: SpecialRange = serde_json::from_str(json).unwrap();
        assert_eq!(range.size, 1);
        assert_eq!(range.satributes, vec!["pizza".to_string()]);
        assert!(range.end.is_none());
    }

    #[test]
    fn test_decoded_output_reads_value_from_either_spot() {
        // Bitcoin Core shape: value on the vout entry.
        let core: DecodedOutput =
            serde_json::from_str(r#"{"value": 0.1, "scriptPubKey": {"address": "addr"}}"#).unwrap();
        assert_eq!(core.amount_btc(), 0.1);
        assert_eq!(core.address(), Some("addr"));

        // Nested shape: value inside scriptPubKey.
        let nested: DecodedOutput =
            serde_json::from_str(r#"{"scriptPubKey": {"address": "addr", "value": 0.2}}"#).unwrap();
        assert_eq!(nested.amount_btc(), 0.2);

        // No value anywhere.
        let bare: DecodedOutput =
            serde_json::from_str(r#"{"scriptPubKey": {"address": "addr"}}"#).unwrap();
        assert_eq!(bare.amount_btc(), 0.0);
    }

    #[test]
    fn test_withdrawal_receipt_success_rules() {
        let ok = WithdrawalReceipt {
            reference: Some("REF-1".into()),
            error: None,
        };
        assert!(ok.is_success());

        let no_reference = WithdrawalReceipt {
            reference: None,
            error: None,
        };
        assert!(!no_reference.is_success());

        let with_error = WithdrawalReceipt {
            reference: Some("REF-1".into()),
            error: Some("boom".into()),
        };
        assert!(!with_error.is_success());
    }

    #[test]
    fn test_notification_level_parses_lowercase() {
        let level: NotificationLevel = serde_json::from_str(r#""verbose""#).unwrap();
        assert_eq!(level, NotificationLevel::Verbose);
        assert_eq!(NotificationLevel::default(), NotificationLevel::Info);
    }
}
