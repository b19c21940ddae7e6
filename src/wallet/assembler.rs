//! Raw-transaction assembler.
//!
//! Builds an unsigned transaction directly from an input/output template.
//! The node's own create-transaction call cannot express duplicate
//! destination addresses, which rare-sat routing needs (several ranges
//! can land on the same inventory wallet), so the transaction is
//! assembled here and only signing is delegated to the node.
//!
//! Pure function of its arguments: no I/O, no clock, no randomness.
//! Identical arguments always produce byte-identical hex, which makes
//! retries idempotent.

use bitcoin::absolute::LockTime;
use bitcoin::address::NetworkUnchecked;
use bitcoin::consensus::encode;
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};
use std::str::FromStr;

use crate::types::{Input, Output};

/// Local, never-retried failures of transaction assembly.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("invalid input txid: {hash}")]
    InvalidTxid { hash: String },

    #[error("output address {address} is not valid on {network}: {reason}")]
    InvalidAddress {
        address: String,
        network: Network,
        reason: String,
    },

    #[error("{supplied} prior transactions supplied for {inputs} inputs")]
    PriorTxCount { supplied: usize, inputs: usize },

    #[error("prior transaction {index} does not decode")]
    PriorTxUndecodable { index: usize },

    #[error("prior transaction {index} has txid {actual}, input references {expected}")]
    PriorTxMismatch {
        index: usize,
        actual: String,
        expected: String,
    },

    #[error("input {index} references vout {vout} but its prior transaction has {outputs} outputs")]
    VoutOutOfRange {
        index: usize,
        vout: u32,
        outputs: usize,
    },
}

/// Assemble an unsigned transaction from explicit input and output lists.
///
/// Every input's sequence number is set below the default maximum minus
/// one, signaling replace-by-fee so a stuck sweep can be re-broadcast at
/// a higher rate.
///
/// `prior_raw_txs`, when supplied, must hold the full referenced
/// transaction bytes for each input in order; they are checked against
/// the inputs (txid match, vout in range) so that non-witness UTXO
/// verification is possible at sign time. Omitting them is legal but
/// removes that check.
pub fn assemble(
    inputs: &[Input],
    outputs: &[Output],
    prior_raw_txs: Option<&[Vec<u8>]>,
    network: Network,
) -> Result<String, AssemblyError> {
    // Address decoding is pure; it fails here, before anything touches
    // the network.
    let mut tx_outputs = Vec::with_capacity(outputs.len());
    for output in outputs {
        let script_pubkey = decode_address(&output.address, network)?;
        tx_outputs.push(TxOut {
            value: Amount::from_sat(output.value),
            script_pubkey,
        });
    }

    let mut tx_inputs = Vec::with_capacity(inputs.len());
    for input in inputs {
        let txid = Txid::from_str(&input.hash).map_err(|_| AssemblyError::InvalidTxid {
            hash: input.hash.clone(),
        })?;
        tx_inputs.push(TxIn {
            previous_output: OutPoint {
                txid,
                vout: input.index,
            },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::new(),
        });
    }

    if let Some(prior) = prior_raw_txs {
        verify_prior_txs(&tx_inputs, prior)?;
    }

    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: tx_inputs,
        output: tx_outputs,
    };

    Ok(encode::serialize_hex(&tx))
}

fn decode_address(address: &str, network: Network) -> Result<ScriptBuf, AssemblyError> {
    let parsed: Address<NetworkUnchecked> =
        address
            .parse()
            .map_err(|e: bitcoin::address::ParseError| AssemblyError::InvalidAddress {
                address: address.to_string(),
                network,
                reason: e.to_string(),
            })?;
    let checked = parsed
        .require_network(network)
        .map_err(|e| AssemblyError::InvalidAddress {
            address: address.to_string(),
            network,
            reason: e.to_string(),
        })?;
    Ok(checked.script_pubkey())
}

fn verify_prior_txs(inputs: &[TxIn], prior: &[Vec<u8>]) -> Result<(), AssemblyError> {
    if prior.len() != inputs.len() {
        return Err(AssemblyError::PriorTxCount {
            supplied: prior.len(),
            inputs: inputs.len(),
        });
    }

    for (index, (input, raw)) in inputs.iter().zip(prior).enumerate() {
        let tx: Transaction = encode::deserialize(raw)
            .map_err(|_| AssemblyError::PriorTxUndecodable { index })?;
        let actual = tx.compute_txid();
        if actual != input.previous_output.txid {
            return Err(AssemblyError::PriorTxMismatch {
                index,
                actual: actual.to_string(),
                expected: input.previous_output.txid.to_string(),
            });
        }
        let vout = input.previous_output.vout;
        if vout as usize >= tx.output.len() {
            return Err(AssemblyError::VoutOutOfRange {
                index,
                vout,
                outputs: tx.output.len(),
            });
        }
    }

    Ok(())
}
