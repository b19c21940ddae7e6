//! End-to-end rotation and withdrawal cycles against in-memory fakes.
//!
//! Everything external (fee oracle, extraction service, bitcoin node,
//! exchange, notification sink) is a deterministic in-memory
//! implementation of the corresponding trait, so the full wiring runs
//! without network access.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use bitcoin::Network;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use satminer::config::RotationConfig;
use satminer::engine::Rotator;
use satminer::exchanges::{ExchangeClient, WithdrawalLane, WithdrawalPolicy};
use satminer::extractor::ExtractionClient;
use satminer::fees::FeeOracle;
use satminer::notifications::{NotificationSink, NotificationService};
use satminer::types::{
    DecodedOutput, DecodedScriptPubKey, DecodedTransaction, ExtractionProposal, ExtractionRequest,
    FeeEstimate, NotificationLevel, SignRawTransactionResult, SpecialRange, WithdrawalReceipt,
};
use satminer::wallet::rpc::WalletRpc;
use satminer::wallet::Wallet;

const TUMBLER: &str = "bc1qtumbler";
const INVENTORY: &str = "bc1qinventory";
const DEPOSIT: &str = "bc1qdeposit";

// ---------------------------------------------------------------------------
// In-memory fakes
// ---------------------------------------------------------------------------

struct FixedFeeOracle {
    fastest: u64,
}

#[async_trait]
impl FeeOracle for FixedFeeOracle {
    async fn estimate_fee(&self) -> Result<FeeEstimate> {
        Ok(FeeEstimate {
            fastest_fee: self.fastest,
            half_hour_fee: self.fastest / 2,
            hour_fee: self.fastest / 3,
            economy_fee: 2,
            minimum_fee: 1,
        })
    }
}

struct CannedExtractor {
    proposal: ExtractionProposal,
    requests: Arc<Mutex<Vec<ExtractionRequest>>>,
}

impl CannedExtractor {
    fn new(proposal: ExtractionProposal) -> Self {
        Self {
            proposal,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl ExtractionClient for CannedExtractor {
    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionProposal> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self.proposal.clone())
    }
}

/// Bitcoin node fake: decodes to a fixed transaction, signs completely,
/// records every broadcast.
struct FakeNode {
    decoded: DecodedTransaction,
    sign_calls: Arc<Mutex<u32>>,
    broadcasts: Arc<Mutex<Vec<String>>>,
}

impl FakeNode {
    fn new(decoded: DecodedTransaction) -> Self {
        Self {
            decoded,
            sign_calls: Arc::new(Mutex::new(0)),
            broadcasts: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl WalletRpc for FakeNode {
    async fn get_raw_transaction(&self, _txid: &str) -> Result<String> {
        Ok(String::new())
    }

    async fn decode_raw_transaction(&self, _raw_hex: &str) -> Result<DecodedTransaction> {
        Ok(self.decoded.clone())
    }

    async fn sign_raw_transaction_with_wallet(
        &self,
        raw_hex: &str,
    ) -> Result<SignRawTransactionResult> {
        *self.sign_calls.lock().unwrap() += 1;
        Ok(SignRawTransactionResult {
            hex: format!("signed:{raw_hex}"),
            complete: true,
            errors: None,
        })
    }

    async fn send_raw_transaction(&self, signed_hex: &str) -> Result<String> {
        self.broadcasts.lock().unwrap().push(signed_hex.to_string());
        Ok("txid-e2e".to_string())
    }

    async fn get_balance(&self, _min_conf: u32) -> Result<f64> {
        Ok(1.0)
    }

    async fn get_unconfirmed_balance(&self) -> Result<f64> {
        Ok(0.0)
    }

    async fn list_wallets(&self) -> Result<Vec<String>> {
        Ok(vec![])
    }

    async fn load_wallet(&self, _name: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSink {
    messages: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, text: &str) -> Result<()> {
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

struct FakeExchange {
    balance: Decimal,
    fee_quote: Option<Decimal>,
    withdrawals: Arc<Mutex<Vec<Decimal>>>,
}

#[async_trait]
impl ExchangeClient for FakeExchange {
    async fn get_account_balance(&self) -> Result<Decimal> {
        Ok(self.balance)
    }

    async fn get_withdrawal_fee(&self) -> Result<Option<Decimal>> {
        Ok(self.fee_quote)
    }

    async fn withdraw_funds(&self, amount: Decimal) -> Result<WithdrawalReceipt> {
        self.withdrawals.lock().unwrap().push(amount);
        Ok(WithdrawalReceipt {
            reference: Some("ref-e2e".to_string()),
            error: None,
        })
    }

    fn currency(&self) -> &str {
        "BTC"
    }

    fn withdrawal_wallet(&self) -> &str {
        "cold-storage"
    }

    fn name(&self) -> &str {
        "fake-exchange"
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn rotation_config() -> RotationConfig {
    RotationConfig {
        tumbler_address: TUMBLER.to_string(),
        inventory_address: INVENTORY.to_string(),
        min_deposit_btc: 0.00015,
        max_fee_rate: 1000,
        min_output_size: 5000,
        extract_interval_min: 30,
        include_satributes: None,
        rare_sat_wallets: vec![],
    }
}

fn decoded_paying(outputs: &[(&str, f64)]) -> DecodedTransaction {
    DecodedTransaction {
        vout: outputs
            .iter()
            .map(|(address, value)| DecodedOutput {
                value: Some(*value),
                script_pub_key: DecodedScriptPubKey {
                    address: Some(address.to_string()),
                    value: None,
                },
            })
            .collect(),
    }
}

fn proposal_with_ranges(ranges: Vec<SpecialRange>) -> ExtractionProposal {
    ExtractionProposal {
        special_ranges: ranges,
        tx: Some("deadbeef".to_string()),
        message: None,
    }
}

fn uncommon_range() -> SpecialRange {
    SpecialRange {
        output: "txid:1".to_string(),
        start: 0,
        end: Some(20000),
        size: 20000,
        offset: 0,
        satributes: vec!["uncommon".to_string()],
    }
}

struct TestBed {
    rotator: Rotator,
    node_sign_calls: Arc<Mutex<u32>>,
    node_broadcasts: Arc<Mutex<Vec<String>>>,
    extractor_requests: Arc<Mutex<Vec<ExtractionRequest>>>,
    messages: Arc<Mutex<Vec<String>>>,
}

fn testbed(fastest_fee: u64, proposal: ExtractionProposal, decoded: DecodedTransaction) -> TestBed {
    let node = FakeNode::new(decoded);
    let node_sign_calls = node.sign_calls.clone();
    let node_broadcasts = node.broadcasts.clone();
    let extractor = CannedExtractor::new(proposal);
    let extractor_requests = extractor.requests.clone();
    let sink = RecordingSink::default();
    let messages = sink.messages.clone();

    let wallet = Arc::new(Wallet::new(Arc::new(node), Network::Bitcoin));
    let notifications = Arc::new(NotificationService::new(
        NotificationLevel::Verbose,
        vec![Box::new(sink)],
    ));
    let rotator = Rotator::new(
        wallet,
        Arc::new(FixedFeeOracle {
            fastest: fastest_fee,
        }),
        Arc::new(extractor),
        notifications,
        rotation_config(),
        DEPOSIT.to_string(),
    );

    TestBed {
        rotator,
        node_sign_calls,
        node_broadcasts,
        extractor_requests,
        messages,
    }
}

// ---------------------------------------------------------------------------
// Rotation cycles
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_full_cycle_broadcasts_and_notifies() {
    let bed = testbed(
        25,
        proposal_with_ranges(vec![uncommon_range()]),
        decoded_paying(&[(INVENTORY, 0.0002), (DEPOSIT, 0.5)]),
    );

    let txid = bed.rotator.cycle().await.unwrap();
    assert_eq!(txid, Some("txid-e2e".to_string()));

    assert_eq!(*bed.node_sign_calls.lock().unwrap(), 1);
    assert_eq!(
        bed.node_broadcasts.lock().unwrap().as_slice(),
        ["signed:deadbeef".to_string()]
    );

    let requests = bed.extractor_requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].scan_address, TUMBLER);
    assert_eq!(requests[0].fee_per_byte, 25);

    let messages = bed.messages.lock().unwrap();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].contains("found and extracted special ranges in txid-e2e"));
    assert!(messages[0].contains("20000 x uncommon"));
    assert!(messages[1].contains("rotation cycle complete: txid-e2e"));
}

#[tokio::test]
async fn test_empty_tumbler_is_a_quiet_noop() {
    let bed = testbed(
        25,
        ExtractionProposal {
            special_ranges: vec![],
            tx: None,
            message: Some("Address is empty".to_string()),
        },
        decoded_paying(&[]),
    );

    assert_eq!(bed.rotator.cycle().await.unwrap(), None);
    assert_eq!(*bed.node_sign_calls.lock().unwrap(), 0);
    assert!(bed.node_broadcasts.lock().unwrap().is_empty());
    assert!(bed.messages.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_fee_ceiling_stops_cycle_before_extraction() {
    let bed = testbed(
        2000,
        proposal_with_ranges(vec![uncommon_range()]),
        decoded_paying(&[(DEPOSIT, 0.5)]),
    );

    bed.rotator.run_and_report().await;

    assert!(bed.extractor_requests.lock().unwrap().is_empty());
    assert!(bed.node_broadcasts.lock().unwrap().is_empty());

    let messages = bed.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("rotation cycle failed"));
    assert!(messages[0].contains("2000"));
}

#[tokio::test]
async fn test_foreign_output_aborts_and_alerts() {
    let bed = testbed(
        25,
        proposal_with_ranges(vec![uncommon_range()]),
        decoded_paying(&[(DEPOSIT, 0.5), ("bc1qattacker", 0.1)]),
    );

    bed.rotator.run_and_report().await;

    assert_eq!(*bed.node_sign_calls.lock().unwrap(), 0);
    assert!(bed.node_broadcasts.lock().unwrap().is_empty());

    let messages = bed.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("rotation cycle failed"));
    assert!(messages[0].contains("bc1qattacker"));
}

#[tokio::test]
async fn test_sub_minimum_deposit_aborts_before_signing() {
    let bed = testbed(
        25,
        proposal_with_ranges(vec![uncommon_range()]),
        decoded_paying(&[(DEPOSIT, 0.0001)]),
    );

    bed.rotator.run_and_report().await;

    assert_eq!(*bed.node_sign_calls.lock().unwrap(), 0);
    assert!(bed.node_broadcasts.lock().unwrap().is_empty());
    assert_eq!(bed.messages.lock().unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Withdrawal lane
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_withdrawal_clamps_and_subtracts_quoted_fee() {
    let withdrawals = Arc::new(Mutex::new(Vec::new()));
    let sink = RecordingSink::default();
    let messages = sink.messages.clone();
    let lane = WithdrawalLane::new(
        Box::new(FakeExchange {
            balance: dec!(10),
            fee_quote: Some(dec!(0.0005)),
            withdrawals: withdrawals.clone(),
        }),
        Arc::new(NotificationService::new(
            NotificationLevel::Verbose,
            vec![Box::new(sink)],
        )),
        WithdrawalPolicy {
            min_btc: dec!(0.01),
            max_btc: dec!(1),
        },
    );

    assert!(lane.withdraw_available_funds().await.unwrap());
    assert_eq!(withdrawals.lock().unwrap().as_slice(), [dec!(0.9995)]);

    let messages = messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("withdrew 0.9995 BTC"));
    assert!(messages[0].contains("cold-storage"));
}

#[tokio::test]
async fn test_withdrawal_below_minimum_makes_no_calls() {
    let withdrawals = Arc::new(Mutex::new(Vec::new()));
    let sink = RecordingSink::default();
    let messages = sink.messages.clone();
    let lane = WithdrawalLane::new(
        Box::new(FakeExchange {
            balance: dec!(0.001),
            fee_quote: None,
            withdrawals: withdrawals.clone(),
        }),
        Arc::new(NotificationService::new(
            NotificationLevel::Verbose,
            vec![Box::new(sink)],
        )),
        WithdrawalPolicy {
            min_btc: dec!(0.01),
            max_btc: dec!(1),
        },
    );

    assert!(!lane.withdraw_available_funds().await.unwrap());
    assert!(withdrawals.lock().unwrap().is_empty());
    assert!(messages.lock().unwrap().is_empty());
}
